//! Staged provisioning: bucket, then DNS alias, then CDN distribution.
//!
//! Every stage first observes the remote state and only mutates what
//! differs, so a plan can be re-run at any time. Waiting on external
//! convergence (certificate validation) surfaces as `Pending` instead of
//! blocking; the caller decides when to come back.

use crate::bucket_sync::BucketSyncEngine;
use crate::cdn::CdnCollaborator;
use crate::dns::DnsCollaborator;
use crate::endpoints;
use crate::error::{DeployError, DeployResult, ErrorKind};
use crate::storage::StorageCollaborator;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything the user asked for, built once and executed stage by stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningPlan {
    pub bucket: BucketConfig,
    /// Directory to mirror into the bucket. `None` only ensures the bucket.
    pub content_root: Option<PathBuf>,
    pub domain: Option<DomainRecord>,
    pub cdn: Option<CdnConfig>,
}

impl ProvisioningPlan {
    pub fn new(bucket: BucketConfig) -> Self {
        Self {
            bucket,
            content_root: None,
            domain: None,
            cdn: None,
        }
    }

    pub fn with_content(mut self, root: impl Into<PathBuf>) -> Self {
        self.content_root = Some(root.into());
        self
    }

    pub fn with_domain(mut self, domain: DomainRecord) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_cdn(mut self, cdn: CdnConfig) -> Self {
        self.cdn = Some(cdn);
        self
    }
}

/// Provisioning stages in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    BucketReady,
    DomainConfigured,
    CdnConfigured,
}

impl Stage {
    pub const ALL: [Stage; 3] = [
        Stage::BucketReady,
        Stage::DomainConfigured,
        Stage::CdnConfigured,
    ];

    fn reached(self) -> ProvisioningState {
        match self {
            Stage::BucketReady => ProvisioningState::BucketReady,
            Stage::DomainConfigured => ProvisioningState::DomainConfigured,
            Stage::CdnConfigured => ProvisioningState::CdnConfigured,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::BucketReady => write!(f, "BucketReady"),
            Stage::DomainConfigured => write!(f, "DomainConfigured"),
            Stage::CdnConfigured => write!(f, "CdnConfigured"),
        }
    }
}

/// Where a plan stands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    NotStarted,
    BucketReady,
    DomainConfigured,
    CdnConfigured,
    Complete,
    Failed { stage: Stage, reason: String },
    /// Only reachable from `CdnConfigured`.
    Pending { stage: Stage, reason: String },
}

impl ProvisioningState {
    pub fn is_complete(&self) -> bool {
        matches!(self, ProvisioningState::Complete)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ProvisioningState::Pending { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProvisioningState::Failed { .. })
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningState::NotStarted => write!(f, "NotStarted"),
            ProvisioningState::BucketReady => write!(f, "BucketReady"),
            ProvisioningState::DomainConfigured => write!(f, "DomainConfigured"),
            ProvisioningState::CdnConfigured => write!(f, "CdnConfigured"),
            ProvisioningState::Complete => write!(f, "Complete"),
            ProvisioningState::Failed { stage, reason } => write!(f, "Failed({stage}, {reason})"),
            ProvisioningState::Pending { stage, reason } => write!(f, "Pending({stage}, {reason})"),
        }
    }
}

/// What a stage did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Remote state was changed.
    Applied,
    /// The desired end state was already in place.
    AlreadySatisfied,
    /// The plan does not ask for this stage.
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub detail: String,
}

/// Final state plus what each executed stage did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    pub state: ProvisioningState,
    pub stages: Vec<StageReport>,
    pub sync: Option<SyncReport>,
}

impl ProvisioningReport {
    fn new() -> Self {
        Self {
            state: ProvisioningState::NotStarted,
            stages: Vec::new(),
            sync: None,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

type StageResult = DeployResult<(StageStatus, String)>;

fn served_by_cdn(plan: &ProvisioningPlan, name: &str) -> bool {
    let name = normalize_dns_name(name);
    plan.cdn
        .as_ref()
        .is_some_and(|cdn| cdn.aliases.iter().any(|a| normalize_dns_name(a) == name))
}

/// Drives a [`ProvisioningPlan`] through its stages.
pub struct DistributionProvisioner {
    engine: BucketSyncEngine,
    dns: Arc<dyn DnsCollaborator>,
    cdn: Arc<dyn CdnCollaborator>,
}

impl DistributionProvisioner {
    pub fn new(
        engine: BucketSyncEngine,
        dns: Arc<dyn DnsCollaborator>,
        cdn: Arc<dyn CdnCollaborator>,
    ) -> Self {
        Self { engine, dns, cdn }
    }

    pub fn engine(&self) -> &BucketSyncEngine {
        &self.engine
    }

    fn storage(&self) -> &Arc<dyn StorageCollaborator> {
        self.engine.storage()
    }

    /// Runs every stage from the beginning.
    pub async fn run(&self, plan: &ProvisioningPlan) -> ProvisioningReport {
        self.run_from(plan, Stage::BucketReady).await
    }

    /// Continues after a previous run.
    ///
    /// From `Pending(stage, _)` the pending stage is re-entered and its
    /// external check repeated; earlier stages are not re-run. Any other
    /// previous state starts over, which is safe since stages are idempotent.
    pub async fn resume(
        &self,
        plan: &ProvisioningPlan,
        previous: &ProvisioningState,
    ) -> ProvisioningReport {
        match previous {
            ProvisioningState::Pending { stage, .. } => self.run_from(plan, *stage).await,
            _ => self.run(plan).await,
        }
    }

    async fn run_from(&self, plan: &ProvisioningPlan, first: Stage) -> ProvisioningReport {
        let mut report = ProvisioningReport::new();

        for stage in Stage::ALL.into_iter().filter(|s| *s >= first) {
            debug!("entering stage {stage} for bucket {}", plan.bucket.name);
            let result = match stage {
                Stage::BucketReady => self.bucket_stage(plan, &mut report).await,
                Stage::DomainConfigured => self.domain_stage(plan).await,
                Stage::CdnConfigured => self.cdn_stage(plan).await,
            };

            match result {
                Ok((status, detail)) => {
                    info!("stage {stage}: {status:?} ({detail})");
                    report.stages.push(StageReport {
                        stage,
                        status,
                        detail,
                    });
                    report.state = stage.reached();
                }
                Err(e) if e.kind() == ErrorKind::ExternalPending && stage == Stage::CdnConfigured => {
                    info!("stage {stage} pending: {e}");
                    report.state = ProvisioningState::Pending {
                        stage,
                        reason: e.to_string(),
                    };
                    return report;
                }
                Err(e) => {
                    warn!("stage {stage} failed: {e}");
                    report.state = ProvisioningState::Failed {
                        stage,
                        reason: e.to_string(),
                    };
                    return report;
                }
            }
        }

        report.state = ProvisioningState::Complete;
        report
    }

    async fn bucket_stage(
        &self,
        plan: &ProvisioningPlan,
        report: &mut ProvisioningReport,
    ) -> StageResult {
        let bucket = &plan.bucket.name;
        let outcome = self.engine.ensure_bucket(&plan.bucket).await?;

        let Some(ref root) = plan.content_root else {
            let status = match outcome {
                CreateBucketOutcome::Created => StageStatus::Applied,
                CreateBucketOutcome::AlreadyOwned => StageStatus::AlreadySatisfied,
            };
            return Ok((status, format!("bucket {bucket} configured")));
        };

        let sync = self.engine.sync_directory(root, bucket).await?;
        let detail = format!(
            "{} uploaded, {} skipped, {} orphaned",
            sync.uploaded_count(),
            sync.skipped_count(),
            sync.orphaned_count()
        );
        let failed = sync.errors.len();
        let cancelled = sync.was_cancelled();
        let changed = outcome == CreateBucketOutcome::Created
            || sync.uploaded_count() > 0
            || !sync.deleted.is_empty();
        report.sync = Some(sync);

        if failed > 0 {
            return Err(DeployError::transfer(
                bucket,
                format!("{failed} object(s) failed to sync ({detail})"),
            ));
        }
        if cancelled {
            return Err(DeployError::transfer(bucket, "sync was cancelled"));
        }

        let status = if changed {
            StageStatus::Applied
        } else {
            StageStatus::AlreadySatisfied
        };
        Ok((status, detail))
    }

    async fn domain_stage(&self, plan: &ProvisioningPlan) -> StageResult {
        let Some(ref record) = plan.domain else {
            return Ok((StageStatus::Skipped, "no domain record in plan".to_string()));
        };
        let bucket = &plan.bucket.name;

        // S3 serves a website alias only when the bucket is named after the host
        if normalize_dns_name(&record.name) != *bucket {
            return Err(DeployError::Precondition(format!(
                "record {} must match bucket name {bucket} to alias its website endpoint",
                record.name
            )));
        }

        let region = self.storage().bucket_region(bucket).await?;
        let target = endpoints::website_alias_target(&region)?;
        let zone = self.resolve_zone(&record.name, record.create_zone).await?;

        if let Some(current) = self.dns.find_alias_record(&zone, &record.name).await? {
            if current.points_at(&target) {
                return Ok((
                    StageStatus::AlreadySatisfied,
                    format!("{} already points at {}", record.name, target.dns_name),
                ));
            }
            // Once the CDN stage has taken the record over, leave it there
            if served_by_cdn(plan, &record.name)
                && current.hosted_zone_id == endpoints::CLOUDFRONT_HOSTED_ZONE_ID
            {
                return Ok((
                    StageStatus::AlreadySatisfied,
                    format!("{} is served by the CDN at {}", record.name, current.dns_name),
                ));
            }
            debug!("{} points at {}, re-pointing", record.name, current.dns_name);
        }

        self.dns
            .upsert_alias_record(&zone, &record.name, &target)
            .await?;
        Ok((
            StageStatus::Applied,
            format!("{} -> {}", record.name, target.dns_name),
        ))
    }

    async fn cdn_stage(&self, plan: &ProvisioningPlan) -> StageResult {
        let Some(ref cdn) = plan.cdn else {
            return Ok((StageStatus::Skipped, "no CDN config in plan".to_string()));
        };
        let primary = cdn
            .primary_domain()
            .ok_or_else(|| DeployError::Config("CDN config needs at least one alias".to_string()))?;
        let bucket = &plan.bucket.name;

        let region = self.storage().bucket_region(bucket).await?;
        let origin = endpoints::website_host(bucket, &region)?;
        let zone = self.dns.find_zone(primary).await?;

        if let Some(dist) = self.cdn.find_distribution_by_origin(&origin).await? {
            let repointed = self.point_aliases(zone.as_ref(), &cdn.aliases, &dist).await?;
            let status = if repointed > 0 {
                StageStatus::Applied
            } else {
                StageStatus::AlreadySatisfied
            };
            return Ok((
                status,
                format!("distribution {} already serves {origin}", dist.id),
            ));
        }

        let certificate = self.ready_certificate(cdn, primary, zone.as_ref()).await?;

        let spec = DistributionSpec {
            origin: origin.clone(),
            aliases: cdn.aliases.clone(),
            certificate_arn: certificate.arn,
            default_root_object: plan
                .bucket
                .index_document()
                .unwrap_or("index.html")
                .to_string(),
        };
        let dist = self.cdn.create_distribution(&spec).await?;
        info!("created distribution {} ({}) for {origin}", dist.id, dist.domain_name);

        self.point_aliases(zone.as_ref(), &cdn.aliases, &dist).await?;
        Ok((
            StageStatus::Applied,
            format!("distribution {} created at {}", dist.id, dist.domain_name),
        ))
    }

    async fn resolve_zone(&self, domain: &str, create: bool) -> DeployResult<HostedZone> {
        if let Some(zone) = self.dns.find_zone(domain).await? {
            return Ok(zone);
        }
        if !create {
            return Err(DeployError::Precondition(format!(
                "no hosted zone found for {domain}"
            )));
        }
        let zone = self.dns.create_zone(domain).await?;
        info!("created hosted zone {} for {domain}", zone.name);
        Ok(zone)
    }

    /// Returns an issued certificate, or a pending error after making sure
    /// a request exists and its validation records are published.
    async fn ready_certificate(
        &self,
        cdn: &CdnConfig,
        primary: &str,
        zone: Option<&HostedZone>,
    ) -> DeployResult<CertificateInfo> {
        let existing = match cdn.certificate_arn {
            Some(ref arn) => Some(self.cdn.describe_certificate(arn).await?),
            None => self.cdn.find_certificate(primary).await?,
        };

        let Some(info) = existing else {
            let alternative_names: Vec<String> = cdn.aliases.iter().skip(1).cloned().collect();
            let request = self
                .cdn
                .request_certificate(primary, &alternative_names)
                .await?;
            info!("requested certificate {} for {primary}", request.arn);
            self.publish_validation(zone, &request.validation_records)
                .await?;
            return Err(DeployError::Pending(format!(
                "certificate {} requested for {primary}, waiting for DNS validation",
                request.arn
            )));
        };

        match info.status {
            CertificateStatus::Issued => Ok(info),
            CertificateStatus::PendingValidation => {
                self.publish_validation(zone, &info.validation_records)
                    .await?;
                Err(DeployError::Pending(format!(
                    "certificate {} for {primary} is awaiting validation",
                    info.arn
                )))
            }
            CertificateStatus::Failed(ref reason) => Err(DeployError::Precondition(format!(
                "certificate {} for {primary} is unusable: {reason}",
                info.arn
            ))),
        }
    }

    async fn publish_validation(
        &self,
        zone: Option<&HostedZone>,
        records: &[ValidationRecord],
    ) -> DeployResult<()> {
        let Some(zone) = zone else {
            if !records.is_empty() {
                warn!("no hosted zone to publish certificate validation records; add them manually");
            }
            return Ok(());
        };

        for record in records.iter().filter(|r| r.record_type.eq_ignore_ascii_case("CNAME")) {
            self.dns
                .upsert_cname_record(zone, &record.name, &record.value)
                .await?;
            debug!("published validation record {} for {}", record.name, record.domain);
        }
        Ok(())
    }

    /// Points each alias inside `zone` at the distribution. Returns how many
    /// records changed.
    async fn point_aliases(
        &self,
        zone: Option<&HostedZone>,
        aliases: &[String],
        dist: &DistributionSummary,
    ) -> DeployResult<usize> {
        let Some(zone) = zone else {
            warn!("no hosted zone for CDN aliases, DNS left unchanged");
            return Ok(0);
        };
        let target = endpoints::cloudfront_alias_target(&dist.domain_name);
        let zone_suffix = format!(".{}", normalize_dns_name(&zone.name));
        let mut changed = 0;

        for alias in aliases {
            let name = normalize_dns_name(alias);
            if name != normalize_dns_name(&zone.name) && !name.ends_with(&zone_suffix) {
                warn!("alias {alias} is outside zone {}, skipping", zone.name);
                continue;
            }
            match self.dns.find_alias_record(zone, alias).await? {
                Some(current) if current.points_at(&target) => continue,
                _ => {}
            }
            self.dns.upsert_alias_record(zone, alias, &target).await?;
            changed += 1;
        }

        Ok(changed)
    }
}
