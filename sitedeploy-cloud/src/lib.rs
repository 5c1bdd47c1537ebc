//! Static website deployment engine.
//!
//! Mirrors a local directory into an S3 website bucket and provisions the
//! pieces around it:
//! - Content fingerprinting compatible with S3 ETags (single and multipart)
//! - Manifest diffing and bounded-concurrency upload passes
//! - Idempotent bucket, Route 53 alias, and CloudFront distribution setup
//! - A staged provisioner that reports `Pending` while certificates validate

pub mod bucket_sync;
pub mod cdn;
pub mod config;
pub mod content_type;
pub mod dns;
pub mod endpoints;
pub mod error;
pub mod fingerprint;
pub mod manifest;
pub mod provisioner;
pub mod s3_transport;
pub mod scan;
pub mod session;
pub mod storage;
pub mod types;

pub use bucket_sync::{BucketSyncEngine, SyncOptions};
pub use cdn::{CdnCollaborator, CloudFrontCdn};
pub use config::DeployConfig;
pub use dns::{DnsCollaborator, Route53Dns};
pub use error::{DeployError, DeployResult, ErrorKind};
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use provisioner::{
    DistributionProvisioner, ProvisioningPlan, ProvisioningReport, ProvisioningState, Stage,
    StageReport, StageStatus,
};
pub use s3_transport::S3Transport;
pub use session::AwsSession;
pub use storage::StorageCollaborator;
pub use types::*;
