//! Shared types for sync and provisioning.

use crate::config::DeployConfig;
use crate::error::{DeployError, DeployResult, ErrorKind};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A regular file found under the sync root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
    /// Slash-separated path relative to the sync root. Also the object key.
    pub key: String,
    /// Location on disk, used to stream the body.
    pub path: PathBuf,
    pub size: u64,
    pub fingerprint: Fingerprint,
    pub content_type: String,
}

/// Last-known server-side state of an object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub key: String,
    pub fingerprint: Fingerprint,
    pub size: u64,
}

/// Remote objects keyed by object key, in key order.
pub type Manifest = BTreeMap<String, RemoteObject>;

/// What the sync pass does with a local file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Upload,
    Skip,
}

/// One entry of a change-set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub action: ChangeAction,
    pub local: LocalFile,
    pub previous: Option<RemoteObject>,
}

impl ChangeEntry {
    pub fn key(&self) -> &str {
        &self.local.key
    }
}

/// Result of comparing a local tree with a remote manifest.
///
/// Entries are sorted by key. Orphans are remote objects with no local
/// counterpart, also sorted by key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub entries: Vec<ChangeEntry>,
    pub orphans: Vec<RemoteObject>,
    /// Local files that could not be read. Never uploaded, never orphaned.
    pub unreadable: Vec<FileError>,
}

impl ChangeSet {
    pub fn uploads(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries
            .iter()
            .filter(|e| e.action == ChangeAction::Upload)
    }

    pub fn skips(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter().filter(|e| e.action == ChangeAction::Skip)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads().count()
    }

    pub fn skip_count(&self) -> usize {
        self.skips().count()
    }

    /// True when nothing needs to be uploaded.
    pub fn is_up_to_date(&self) -> bool {
        self.upload_count() == 0
    }
}

/// Index and error documents for website hosting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteDocuments {
    pub index_document: String,
    pub error_document: String,
}

/// Desired configuration of a website bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub name: String,
    pub region: String,
    /// Grant anonymous `s3:GetObject` on every key.
    pub public_read: bool,
    /// Website hosting configuration. `None` leaves hosting unmanaged.
    pub website: Option<WebsiteDocuments>,
}

impl BucketConfig {
    /// A publicly readable website bucket using the configured documents.
    pub fn website(name: impl Into<String>, config: &DeployConfig) -> Self {
        Self {
            name: name.into(),
            region: config.region.clone(),
            public_read: true,
            website: Some(WebsiteDocuments {
                index_document: config.index_document.clone(),
                error_document: config.error_document.clone(),
            }),
        }
    }

    pub fn validate(&self) -> DeployResult<()> {
        validate_bucket_name(&self.name)?;
        if self.region.trim().is_empty() {
            return Err(DeployError::Config(format!(
                "bucket {} has no region",
                self.name
            )));
        }
        Ok(())
    }

    /// Index document, if website hosting is managed.
    pub fn index_document(&self) -> Option<&str> {
        self.website.as_ref().map(|w| w.index_document.as_str())
    }
}

/// Checks S3's DNS-compatible bucket naming rules.
pub fn validate_bucket_name(name: &str) -> DeployResult<()> {
    let invalid = |reason: &str| {
        Err(DeployError::Config(format!(
            "invalid bucket name {name:?}: {reason}"
        )))
    };

    if name.len() < 3 || name.len() > 63 {
        return invalid("must be between 3 and 63 characters");
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return invalid("only lowercase letters, digits, '.' and '-' are allowed");
    }
    let first = name.as_bytes()[0];
    let last = name.as_bytes()[name.len() - 1];
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return invalid("must start and end with a letter or digit");
    }
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return invalid("labels must not be empty or start/end with '-'");
    }
    if name.parse::<std::net::Ipv4Addr>().is_ok() {
        return invalid("must not be formatted as an IP address");
    }
    Ok(())
}

/// Result of a create-bucket call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateBucketOutcome {
    Created,
    AlreadyOwned,
}

/// A bucket as listed by the storage service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Route 53 hosted zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    pub id: String,
    /// Zone name with the trailing dot removed.
    pub name: String,
}

/// Target of an A-alias record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTarget {
    /// Hosted zone id of the aliased endpoint (not of the record's zone).
    pub hosted_zone_id: String,
    pub dns_name: String,
}

impl AliasTarget {
    /// Compares ignoring case and the trailing dot Route 53 appends.
    pub fn points_at(&self, other: &AliasTarget) -> bool {
        self.hosted_zone_id == other.hosted_zone_id
            && normalize_dns_name(&self.dns_name) == normalize_dns_name(&other.dns_name)
    }
}

/// Lowercases and strips the trailing root dot.
pub fn normalize_dns_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Desired DNS alias for the website.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Fully qualified record name, e.g. `www.example.com`.
    pub name: String,
    /// Create a hosted zone for the registrable domain when none exists.
    pub create_zone: bool,
}

/// Desired CDN distribution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnConfig {
    /// Hostnames served by the distribution. The first one names the certificate.
    pub aliases: Vec<String>,
    /// Existing certificate to use instead of looking one up.
    pub certificate_arn: Option<String>,
}

impl CdnConfig {
    pub fn primary_domain(&self) -> Option<&str> {
        self.aliases.first().map(String::as_str)
    }
}

/// DNS record the certificate authority checks to prove domain control.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub domain: String,
    pub name: String,
    pub record_type: String,
    pub value: String,
}

/// Certificate lifecycle as far as the provisioner cares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Issued,
    PendingValidation,
    Failed(String),
}

/// A TLS certificate usable by the CDN.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub arn: String,
    pub domain: String,
    pub status: CertificateStatus,
    pub validation_records: Vec<ValidationRecord>,
}

/// Response to a new certificate request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub arn: String,
    pub validation_records: Vec<ValidationRecord>,
}

/// Returns true if a certificate name (possibly a wildcard) covers `domain`.
pub fn certificate_covers(cert_name: &str, domain: &str) -> bool {
    let cert_name = normalize_dns_name(cert_name);
    let domain = normalize_dns_name(domain);
    if cert_name == domain {
        return true;
    }
    match cert_name.strip_prefix("*.") {
        // A wildcard matches exactly one label.
        Some(parent) => domain
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == parent),
        None => false,
    }
}

/// A CDN distribution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub id: String,
    /// Domain name assigned by the CDN, e.g. `d111111abcdef8.cloudfront.net`.
    pub domain_name: String,
    pub status: String,
    pub origins: Vec<String>,
    pub aliases: Vec<String>,
}

/// Parameters for a new distribution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSpec {
    /// Origin host, the bucket website endpoint.
    pub origin: String,
    pub aliases: Vec<String>,
    pub certificate_arn: String,
    pub default_root_object: String,
}

/// An object uploaded during a sync pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedObject {
    pub key: String,
    pub content_type: String,
    pub size: u64,
    /// The key existed remotely with different content.
    pub replaced: bool,
}

/// A per-key failure recorded without aborting the pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub key: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl FileError {
    pub fn from_error(key: impl Into<String>, err: &DeployError) -> Self {
        Self {
            key: key.into(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one sync pass. All lists are sorted by key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub bucket: String,
    pub uploaded: Vec<UploadedObject>,
    pub skipped: Vec<String>,
    pub orphaned: Vec<String>,
    pub deleted: Vec<String>,
    /// Uploads never scheduled because the pass was cancelled.
    pub not_attempted: Vec<String>,
    /// Orphan deletions skipped because the pass was cancelled.
    pub deletions_not_attempted: Vec<String>,
    /// The cancel signal fired at some point during the pass.
    pub cancelled: bool,
    pub errors: Vec<FileError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn new(bucket: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            bucket: bucket.into(),
            uploaded: Vec::new(),
            skipped: Vec::new(),
            orphaned: Vec::new(),
            deleted: Vec::new(),
            not_attempted: Vec::new(),
            deletions_not_attempted: Vec::new(),
            cancelled: false,
            errors: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn uploaded_count(&self) -> usize {
        self.uploaded.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn orphaned_count(&self) -> usize {
        self.orphaned.len()
    }

    /// True if every planned mutation was applied.
    pub fn is_success(&self) -> bool {
        !self.was_cancelled()
            && self.errors.is_empty()
            && self.not_attempted.is_empty()
            && self.deletions_not_attempted.is_empty()
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
            || !self.not_attempted.is_empty()
            || !self.deletions_not_attempted.is_empty()
    }

    /// Content type recorded for an uploaded key.
    pub fn content_type_of(&self, key: &str) -> Option<&str> {
        self.uploaded
            .iter()
            .find(|u| u.key == key)
            .map(|u| u.content_type.as_str())
    }
}
