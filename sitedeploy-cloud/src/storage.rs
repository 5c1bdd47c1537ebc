//! Object storage seam used by the sync engine.

use crate::error::DeployResult;
use crate::types::{BucketSummary, CreateBucketOutcome, Manifest};
use async_trait::async_trait;
use std::path::Path;

/// Operations the sync engine needs from an object store.
///
/// `put_object` must be atomic per object: a failed call leaves either the
/// previous object or nothing visible under `key`.
#[async_trait]
pub trait StorageCollaborator: Send + Sync {
    async fn list_buckets(&self) -> DeployResult<Vec<BucketSummary>>;

    /// Creates a bucket. A bucket that already exists and belongs to the
    /// caller yields `AlreadyOwned`, not an error.
    async fn create_bucket(&self, name: &str, region: &str) -> DeployResult<CreateBucketOutcome>;

    /// Region the bucket lives in.
    async fn bucket_region(&self, name: &str) -> DeployResult<String>;

    /// Lifts the account-level guard that rejects public bucket policies.
    async fn allow_public_policies(&self, name: &str) -> DeployResult<()>;

    async fn set_bucket_policy(&self, name: &str, policy: &str) -> DeployResult<()>;

    async fn set_website_config(
        &self,
        name: &str,
        index_document: &str,
        error_document: &str,
    ) -> DeployResult<()>;

    /// Full listing of the bucket, every page.
    async fn list_objects(&self, bucket: &str) -> DeployResult<Manifest>;

    /// Streams the file at `source` to `key`.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> DeployResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> DeployResult<()>;
}

/// Bucket policy granting anonymous read access to every object.
pub fn public_read_policy(bucket: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "PublicReadGetObject",
            "Effect": "Allow",
            "Principal": "*",
            "Action": ["s3:GetObject"],
            "Resource": [format!("arn:aws:s3:::{bucket}/*")],
        }],
    })
    .to_string()
}
