//! Bucket setup and one-way directory sync.
//!
//! A sync pass scans the local tree, lists the bucket once, diffs the two,
//! and uploads what changed through a bounded pool of transfer tasks. A
//! failed upload is recorded and the pass moves on; re-running the pass is
//! the retry mechanism.

use crate::config::DeployConfig;
use crate::error::{DeployError, DeployResult};
use crate::fingerprint::Fingerprinter;
use crate::manifest;
use crate::scan::{LocalScan, scan_directory};
use crate::storage::{StorageCollaborator, public_read_policy};
use crate::types::*;
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tuning for sync passes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncOptions {
    pub max_concurrent_uploads: usize,
    pub chunk_size: u64,
    pub delete_orphans: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&DeployConfig::default())
    }
}

impl From<&DeployConfig> for SyncOptions {
    fn from(config: &DeployConfig) -> Self {
        Self {
            max_concurrent_uploads: config.max_concurrent_uploads,
            chunk_size: config.multipart_chunk_size,
            delete_orphans: config.delete_orphans,
        }
    }
}

/// Creates website buckets and mirrors local directories into them.
pub struct BucketSyncEngine {
    storage: Arc<dyn StorageCollaborator>,
    options: SyncOptions,
    fingerprinter: Fingerprinter,
}

impl BucketSyncEngine {
    pub fn new(storage: Arc<dyn StorageCollaborator>, options: SyncOptions) -> Self {
        let fingerprinter = Fingerprinter::new(options.chunk_size);
        Self {
            storage,
            options,
            fingerprinter,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageCollaborator> {
        &self.storage
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Creates the bucket if needed and reconciles its policy and website
    /// configuration to the desired values.
    pub async fn ensure_bucket(&self, config: &BucketConfig) -> DeployResult<CreateBucketOutcome> {
        config.validate()?;
        let name = config.name.as_str();

        let outcome = self.storage.create_bucket(name, &config.region).await?;
        match outcome {
            CreateBucketOutcome::Created => info!("created bucket {name} in {}", config.region),
            CreateBucketOutcome::AlreadyOwned => info!("bucket {name} already exists, reusing it"),
        }

        if config.public_read {
            self.storage.allow_public_policies(name).await?;
            self.storage
                .set_bucket_policy(name, &public_read_policy(name))
                .await?;
            debug!("applied public-read policy to {name}");
        }

        if let Some(ref website) = config.website {
            self.storage
                .set_website_config(name, &website.index_document, &website.error_document)
                .await?;
            debug!(
                "configured website hosting on {name} (index {}, error {})",
                website.index_document, website.error_document
            );
        }

        Ok(outcome)
    }

    /// Scans `root` and diffs it against the bucket without changing anything.
    ///
    /// Keys whose local file could not be read land in
    /// [`ChangeSet::unreadable`] and are kept out of the orphan list.
    pub async fn plan_sync(&self, root: &Path, bucket: &str) -> DeployResult<ChangeSet> {
        let local = self.scan(root).await?;
        let remote = self.storage.list_objects(bucket).await?;
        let mut changes = manifest::diff(&local.files, &remote);

        let unreadable: HashSet<&str> = local.unreadable.iter().map(|f| f.key.as_str()).collect();
        changes
            .orphans
            .retain(|orphan| !unreadable.contains(orphan.key.as_str()));
        changes.unreadable = local.unreadable;
        Ok(changes)
    }

    /// Mirrors `root` into `bucket`.
    ///
    /// Returns `Err` only when the pass cannot start (bad root, listing
    /// failure). Per-file failures are collected in the report.
    pub async fn sync_directory(&self, root: &Path, bucket: &str) -> DeployResult<SyncReport> {
        // Keep the sender alive so the signal never fires
        let (_never, signal) = watch::channel(false);
        self.sync_directory_with_cancel(root, bucket, signal).await
    }

    /// Like [`sync_directory`](Self::sync_directory), but stops scheduling
    /// uploads and orphan deletions once `cancel` becomes `true`. Uploads
    /// already running finish.
    pub async fn sync_directory_with_cancel(
        &self,
        root: &Path,
        bucket: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> DeployResult<SyncReport> {
        let mut report = SyncReport::new(bucket);
        let changes = self.plan_sync(root, bucket).await?;

        info!(
            "sync {} -> s3://{bucket}: {} to upload, {} up to date, {} orphaned",
            root.display(),
            changes.upload_count(),
            changes.skip_count(),
            changes.orphans.len()
        );

        for entry in changes.skips() {
            debug!("skipping {}, fingerprints match", entry.key());
            report.skipped.push(entry.key().to_string());
        }
        report.orphaned = changes.orphans.iter().map(|o| o.key.clone()).collect();
        report.errors.extend(changes.unreadable.iter().cloned());

        let uploads: Vec<ChangeEntry> = changes.uploads().cloned().collect();
        let mut cancelled = self
            .apply_uploads(bucket, uploads, &mut cancel, &mut report)
            .await;
        // The signal may fire after the last upload was scheduled
        cancelled |= *cancel.borrow();

        if self.options.delete_orphans {
            cancelled |= self
                .delete_orphans(bucket, &changes.orphans, &cancel, &mut report)
                .await;
        }
        report.cancelled = cancelled;

        report.uploaded.sort_by(|a, b| a.key.cmp(&b.key));
        report.errors.sort_by(|a, b| a.key.cmp(&b.key));
        report.finished_at = Utc::now();

        info!(
            "sync to s3://{bucket} finished: {} uploaded, {} skipped, {} orphaned, {} failed",
            report.uploaded_count(),
            report.skipped_count(),
            report.orphaned_count(),
            report.errors.len()
        );
        Ok(report)
    }

    async fn scan(&self, root: &Path) -> DeployResult<LocalScan> {
        let root = root.to_path_buf();
        let fingerprinter = self.fingerprinter;
        tokio::task::spawn_blocking(move || scan_directory(&root, &fingerprinter))
            .await
            .map_err(|e| DeployError::Scan(format!("scan task failed: {e}")))?
    }

    /// Runs uploads with at most `max_concurrent_uploads` in flight.
    ///
    /// Returns true if cancellation stopped scheduling early.
    async fn apply_uploads(
        &self,
        bucket: &str,
        uploads: Vec<ChangeEntry>,
        cancel: &mut watch::Receiver<bool>,
        report: &mut SyncReport,
    ) -> bool {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_uploads.max(1)));
        let mut in_flight: Vec<(ChangeEntry, JoinHandle<DeployResult<()>>)> = Vec::new();
        let mut remaining = uploads.into_iter();
        let mut cancelled = false;

        while let Some(entry) = remaining.next() {
            let permit = tokio::select! {
                biased;
                _ = wait_for_cancel(cancel) => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                warn!("sync cancelled, not scheduling remaining uploads");
                report.not_attempted.push(entry.local.key.clone());
                report
                    .not_attempted
                    .extend(remaining.by_ref().map(|e| e.local.key));
                cancelled = true;
                break;
            };

            let storage = Arc::clone(&self.storage);
            let bucket = bucket.to_string();
            let file = entry.local.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                storage
                    .put_object(&bucket, &file.key, &file.path, &file.content_type)
                    .await
            });
            in_flight.push((entry, handle));
        }

        for (entry, handle) in in_flight {
            let key = entry.local.key.clone();
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(DeployError::transfer(&key, format!("upload task aborted: {e}"))),
            };

            match result {
                Ok(()) => {
                    debug!("uploaded {key} ({})", entry.local.content_type);
                    report.uploaded.push(UploadedObject {
                        key,
                        content_type: entry.local.content_type,
                        size: entry.local.size,
                        replaced: entry.previous.is_some(),
                    });
                }
                Err(e) => {
                    warn!("upload of {key} failed: {e}");
                    report.errors.push(FileError::from_error(key, &e));
                }
            }
        }

        cancelled
    }

    /// Deletes orphans one at a time, checking `cancel` before each.
    ///
    /// Returns true if cancellation left orphans in place.
    async fn delete_orphans(
        &self,
        bucket: &str,
        orphans: &[RemoteObject],
        cancel: &watch::Receiver<bool>,
        report: &mut SyncReport,
    ) -> bool {
        for (i, orphan) in orphans.iter().enumerate() {
            if *cancel.borrow() {
                warn!("sync cancelled, leaving {} orphan(s) in place", orphans.len() - i);
                report
                    .deletions_not_attempted
                    .extend(orphans[i..].iter().map(|o| o.key.clone()));
                return true;
            }
            match self.storage.delete_object(bucket, &orphan.key).await {
                Ok(()) => {
                    debug!("deleted orphan {}", orphan.key);
                    report.deleted.push(orphan.key.clone());
                }
                Err(e) => {
                    warn!("delete of orphan {} failed: {e}", orphan.key);
                    report.errors.push(FileError::from_error(&orphan.key, &e));
                }
            }
        }
        false
    }
}

/// Resolves once the signal reads `true`. Never resolves if the sender is
/// dropped without cancelling.
async fn wait_for_cancel(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
