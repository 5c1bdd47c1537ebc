//! DNS seam and Route 53 implementation.

use crate::error::{DeployError, DeployResult};
use crate::session::AwsSession;
use crate::types::{AliasTarget, HostedZone, normalize_dns_name};
use async_trait::async_trait;
use aws_sdk_route53::Client as Route53Client;
use aws_sdk_route53::types::{
    AliasTarget as R53AliasTarget, Change, ChangeAction, ChangeBatch, ResourceRecord,
    ResourceRecordSet, RrType,
};
use tracing::debug;

/// TTL for plain (non-alias) records such as certificate validation CNAMEs.
const CNAME_TTL_SECS: i64 = 300;

const CHANGE_COMMENT: &str = "Managed by sitedeploy";

/// Operations the provisioner needs from a DNS service.
#[async_trait]
pub trait DnsCollaborator: Send + Sync {
    /// Hosted zone that owns `domain`, if any.
    async fn find_zone(&self, domain: &str) -> DeployResult<Option<HostedZone>>;

    /// Creates a zone for the registrable part of `domain`.
    async fn create_zone(&self, domain: &str) -> DeployResult<HostedZone>;

    /// Current A-alias target of `name`, if the record exists.
    async fn find_alias_record(
        &self,
        zone: &HostedZone,
        name: &str,
    ) -> DeployResult<Option<AliasTarget>>;

    async fn upsert_alias_record(
        &self,
        zone: &HostedZone,
        name: &str,
        target: &AliasTarget,
    ) -> DeployResult<()>;

    async fn upsert_cname_record(
        &self,
        zone: &HostedZone,
        name: &str,
        value: &str,
    ) -> DeployResult<()>;
}

/// Picks the most specific zone containing `domain` on a label boundary.
pub fn best_zone_match<'a, I>(zones: I, domain: &str) -> Option<&'a HostedZone>
where
    I: IntoIterator<Item = &'a HostedZone>,
{
    let domain = normalize_dns_name(domain);
    zones
        .into_iter()
        .filter(|zone| {
            let zone_name = normalize_dns_name(&zone.name);
            domain == zone_name || domain.ends_with(&format!(".{zone_name}"))
        })
        .max_by_key(|zone| normalize_dns_name(&zone.name).len())
}

/// Last two labels of a domain, e.g. `www.example.com` -> `example.com`.
pub fn registrable_domain(domain: &str) -> String {
    let domain = normalize_dns_name(domain);
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() <= 2 {
        return domain;
    }
    labels[labels.len() - 2..].join(".")
}

/// Route 53 backed DNS collaborator.
pub struct Route53Dns {
    client: Route53Client,
}

impl Route53Dns {
    pub fn new(session: &AwsSession) -> Self {
        Self {
            client: session.route53_client(),
        }
    }

    async fn list_zones(&self) -> DeployResult<Vec<HostedZone>> {
        let mut zones = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_hosted_zones()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| DeployError::Dns(format!("list hosted zones failed: {e}")))?;

            zones.extend(resp.hosted_zones().iter().map(|z| HostedZone {
                id: z.id().to_string(),
                name: normalize_dns_name(z.name()),
            }));

            match resp.next_marker() {
                Some(next) if resp.is_truncated() => marker = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(zones)
    }

    async fn upsert(&self, zone: &HostedZone, record: ResourceRecordSet) -> DeployResult<()> {
        let change = Change::builder()
            .action(ChangeAction::Upsert)
            .resource_record_set(record)
            .build()
            .map_err(|e| DeployError::Dns(e.to_string()))?;
        let batch = ChangeBatch::builder()
            .comment(CHANGE_COMMENT)
            .changes(change)
            .build()
            .map_err(|e| DeployError::Dns(e.to_string()))?;

        self.client
            .change_resource_record_sets()
            .hosted_zone_id(&zone.id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| DeployError::Dns(format!("record change in zone {} failed: {e}", zone.name)))?;
        Ok(())
    }
}

#[async_trait]
impl DnsCollaborator for Route53Dns {
    async fn find_zone(&self, domain: &str) -> DeployResult<Option<HostedZone>> {
        let zones = self.list_zones().await?;
        Ok(best_zone_match(&zones, domain).cloned())
    }

    async fn create_zone(&self, domain: &str) -> DeployResult<HostedZone> {
        let zone_name = registrable_domain(domain);
        self.client
            .create_hosted_zone()
            .name(&zone_name)
            .caller_reference(uuid::Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| DeployError::Dns(format!("create hosted zone {zone_name} failed: {e}")))?;

        debug!("created hosted zone {zone_name}");
        self.find_zone(domain)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("hosted zone {zone_name} after creation")))
    }

    async fn find_alias_record(
        &self,
        zone: &HostedZone,
        name: &str,
    ) -> DeployResult<Option<AliasTarget>> {
        let resp = self
            .client
            .list_resource_record_sets()
            .hosted_zone_id(&zone.id)
            .start_record_name(name)
            .start_record_type(RrType::A)
            .max_items(1)
            .send()
            .await
            .map_err(|e| DeployError::Dns(format!("list records for {name} failed: {e}")))?;

        let wanted = normalize_dns_name(name);
        let target = resp
            .resource_record_sets()
            .iter()
            .find(|rrs| normalize_dns_name(rrs.name()) == wanted && *rrs.r#type() == RrType::A)
            .and_then(|rrs| rrs.alias_target())
            .map(|t| AliasTarget {
                hosted_zone_id: t.hosted_zone_id().to_string(),
                dns_name: t.dns_name().to_string(),
            });

        Ok(target)
    }

    async fn upsert_alias_record(
        &self,
        zone: &HostedZone,
        name: &str,
        target: &AliasTarget,
    ) -> DeployResult<()> {
        let alias = R53AliasTarget::builder()
            .hosted_zone_id(&target.hosted_zone_id)
            .dns_name(&target.dns_name)
            .evaluate_target_health(false)
            .build()
            .map_err(|e| DeployError::Dns(e.to_string()))?;
        let record = ResourceRecordSet::builder()
            .name(name)
            .r#type(RrType::A)
            .alias_target(alias)
            .build()
            .map_err(|e| DeployError::Dns(e.to_string()))?;

        self.upsert(zone, record).await?;
        debug!("pointed {name} at {}", target.dns_name);
        Ok(())
    }

    async fn upsert_cname_record(
        &self,
        zone: &HostedZone,
        name: &str,
        value: &str,
    ) -> DeployResult<()> {
        let value = ResourceRecord::builder()
            .value(value)
            .build()
            .map_err(|e| DeployError::Dns(e.to_string()))?;
        let record = ResourceRecordSet::builder()
            .name(name)
            .r#type(RrType::Cname)
            .ttl(CNAME_TTL_SECS)
            .resource_records(value)
            .build()
            .map_err(|e| DeployError::Dns(e.to_string()))?;

        self.upsert(zone, record).await?;
        debug!("upserted CNAME {name}");
        Ok(())
    }
}
