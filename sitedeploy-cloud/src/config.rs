//! Deployment configuration.

use crate::error::{DeployError, DeployResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default multipart part size used by the AWS transfer tooling (8 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Smallest part size S3 accepts for all but the last part of a multipart upload.
pub const MIN_MULTIPART_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Configuration shared by the sync engine and the provisioner.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Named credentials profile. `None` uses the default provider chain.
    pub profile: Option<String>,

    /// AWS region for new buckets.
    pub region: String,

    /// Optional S3 endpoint override (for MinIO in testing).
    pub endpoint_override: Option<String>,

    /// Upper bound on concurrent object uploads during a sync pass.
    pub max_concurrent_uploads: usize,

    /// Multipart part size. Fingerprints are computed with the same size.
    pub multipart_chunk_size: u64,

    /// Delete remote objects that have no local counterpart.
    pub delete_orphans: bool,

    /// Website index document suffix.
    pub index_document: String,

    /// Website error document key.
    pub error_document: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            profile: None,
            region: "us-east-1".to_string(),
            endpoint_override: None,
            max_concurrent_uploads: 8,
            multipart_chunk_size: DEFAULT_CHUNK_SIZE,
            delete_orphans: false,
            index_document: "index.html".to_string(),
            error_document: "error.html".to_string(),
        }
    }
}

impl DeployConfig {
    /// Loads a config from a JSON file. Missing fields use defaults.
    pub fn from_json_file(path: &Path) -> DeployResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DeployResult<()> {
        if self.max_concurrent_uploads == 0 {
            return Err(DeployError::Config(
                "max_concurrent_uploads must be at least 1".to_string(),
            ));
        }
        if self.multipart_chunk_size < MIN_MULTIPART_CHUNK_SIZE {
            return Err(DeployError::Config(format!(
                "multipart_chunk_size must be at least {MIN_MULTIPART_CHUNK_SIZE} bytes"
            )));
        }
        if self.index_document.trim().is_empty() || self.error_document.trim().is_empty() {
            return Err(DeployError::Config(
                "index and error documents must be named".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(DeployError::Config("region must not be empty".to_string()));
        }
        Ok(())
    }
}
