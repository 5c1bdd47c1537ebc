//! CDN seam with a CloudFront + ACM implementation.

use crate::error::{DeployError, DeployResult};
use crate::session::AwsSession;
use crate::types::{
    CertificateInfo, CertificateRequest, CertificateStatus, DistributionSpec, DistributionSummary,
    ValidationRecord, certificate_covers, normalize_dns_name,
};
use async_trait::async_trait;
use aws_sdk_acm::Client as AcmClient;
use aws_sdk_acm::types::{CertificateStatus as AcmCertificateStatus, ValidationMethod};
use aws_sdk_cloudfront::Client as CloudFrontClient;
use aws_sdk_cloudfront::types::{
    Aliases, CustomOriginConfig, DefaultCacheBehavior, DistributionConfig,
    MinimumProtocolVersion, Origin, OriginProtocolPolicy, Origins, SslSupportMethod,
    ViewerCertificate, ViewerProtocolPolicy,
};
use md5::{Digest, Md5};
use tracing::debug;

/// AWS managed "CachingOptimized" cache policy.
const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

const ORIGIN_ID_PREFIX: &str = "S3-Website-";

/// Operations the provisioner needs from a CDN and its certificate authority.
#[async_trait]
pub trait CdnCollaborator: Send + Sync {
    /// Distribution whose origin is `origin`, if one exists.
    async fn find_distribution_by_origin(
        &self,
        origin: &str,
    ) -> DeployResult<Option<DistributionSummary>>;

    /// Issued or pending certificate covering `domain`. Issued wins.
    async fn find_certificate(&self, domain: &str) -> DeployResult<Option<CertificateInfo>>;

    async fn describe_certificate(&self, arn: &str) -> DeployResult<CertificateInfo>;

    /// Requests a DNS-validated certificate.
    async fn request_certificate(
        &self,
        domain: &str,
        alternative_names: &[String],
    ) -> DeployResult<CertificateRequest>;

    async fn create_distribution(
        &self,
        spec: &DistributionSpec,
    ) -> DeployResult<DistributionSummary>;
}

/// CloudFront distributions with ACM certificates from us-east-1.
pub struct CloudFrontCdn {
    cloudfront: CloudFrontClient,
    acm: AcmClient,
}

impl CloudFrontCdn {
    pub fn new(session: &AwsSession) -> Self {
        Self {
            cloudfront: session.cloudfront_client(),
            acm: session.acm_client(),
        }
    }

    fn distribution_config(spec: &DistributionSpec) -> DeployResult<DistributionConfig> {
        let build_err = |e: aws_sdk_cloudfront::error::BuildError| DeployError::Cdn(e.to_string());
        let origin_id = format!("{ORIGIN_ID_PREFIX}{}", spec.origin);

        let origin = Origin::builder()
            .id(&origin_id)
            .domain_name(&spec.origin)
            .custom_origin_config(
                CustomOriginConfig::builder()
                    .http_port(80)
                    .https_port(443)
                    // Website endpoints only speak HTTP
                    .origin_protocol_policy(OriginProtocolPolicy::HttpOnly)
                    .build()
                    .map_err(build_err)?,
            )
            .build()
            .map_err(build_err)?;

        let cache_behavior = DefaultCacheBehavior::builder()
            .target_origin_id(&origin_id)
            .viewer_protocol_policy(ViewerProtocolPolicy::RedirectToHttps)
            .cache_policy_id(CACHING_OPTIMIZED_POLICY_ID)
            .compress(true)
            .build()
            .map_err(build_err)?;

        let aliases = Aliases::builder()
            .quantity(spec.aliases.len() as i32)
            .set_items(Some(spec.aliases.clone()))
            .build()
            .map_err(build_err)?;

        let certificate = ViewerCertificate::builder()
            .acm_certificate_arn(&spec.certificate_arn)
            .ssl_support_method(SslSupportMethod::SniOnly)
            .minimum_protocol_version(MinimumProtocolVersion::from("TLSv1.2_2021"))
            .build();

        DistributionConfig::builder()
            .caller_reference(uuid::Uuid::new_v4().to_string())
            .comment(format!("Website for {}", spec.aliases.join(", ")))
            .enabled(true)
            .default_root_object(&spec.default_root_object)
            .origins(
                Origins::builder()
                    .quantity(1)
                    .items(origin)
                    .build()
                    .map_err(build_err)?,
            )
            .default_cache_behavior(cache_behavior)
            .aliases(aliases)
            .viewer_certificate(certificate)
            .build()
            .map_err(build_err)
    }
}

fn map_status(status: Option<&AcmCertificateStatus>) -> CertificateStatus {
    match status {
        Some(AcmCertificateStatus::Issued) => CertificateStatus::Issued,
        Some(AcmCertificateStatus::PendingValidation) => CertificateStatus::PendingValidation,
        Some(other) => CertificateStatus::Failed(other.as_str().to_string()),
        None => CertificateStatus::Failed("unknown status".to_string()),
    }
}

/// ACM idempotency tokens are at most 32 alphanumeric characters. Hashing
/// the domain makes repeated requests for the same name collapse into one.
fn idempotency_token(domain: &str) -> String {
    hex::encode(Md5::digest(normalize_dns_name(domain).as_bytes()))
}

#[async_trait]
impl CdnCollaborator for CloudFrontCdn {
    async fn find_distribution_by_origin(
        &self,
        origin: &str,
    ) -> DeployResult<Option<DistributionSummary>> {
        let wanted = normalize_dns_name(origin);
        let mut marker: Option<String> = None;

        loop {
            let resp = self
                .cloudfront
                .list_distributions()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| DeployError::Cdn(format!("list distributions failed: {e}")))?;

            let Some(list) = resp.distribution_list() else {
                return Ok(None);
            };

            for dist in list.items() {
                let origins: Vec<String> = dist
                    .origins()
                    .map(|o| o.items().iter().map(|i| i.domain_name().to_string()).collect())
                    .unwrap_or_default();
                if origins.iter().any(|o| normalize_dns_name(o) == wanted) {
                    return Ok(Some(DistributionSummary {
                        id: dist.id().to_string(),
                        domain_name: dist.domain_name().to_string(),
                        status: dist.status().to_string(),
                        origins,
                        aliases: dist
                            .aliases()
                            .map(|a| a.items().to_vec())
                            .unwrap_or_default(),
                    }));
                }
            }

            match list.next_marker() {
                Some(next) if list.is_truncated() => marker = Some(next.to_string()),
                _ => return Ok(None),
            }
        }
    }

    async fn find_certificate(&self, domain: &str) -> DeployResult<Option<CertificateInfo>> {
        let mut next_token: Option<String> = None;
        let mut pending_arn: Option<String> = None;

        loop {
            let resp = self
                .acm
                .list_certificates()
                .certificate_statuses(AcmCertificateStatus::Issued)
                .certificate_statuses(AcmCertificateStatus::PendingValidation)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| DeployError::Cdn(format!("list certificates failed: {e}")))?;

            for cert in resp.certificate_summary_list() {
                let Some(arn) = cert.certificate_arn() else { continue };
                let covers = cert
                    .domain_name()
                    .into_iter()
                    .chain(cert.subject_alternative_name_summaries().iter().map(String::as_str))
                    .any(|name| certificate_covers(name, domain));
                if !covers {
                    continue;
                }

                match cert.status() {
                    Some(AcmCertificateStatus::Issued) => {
                        return self.describe_certificate(arn).await.map(Some);
                    }
                    _ => {
                        pending_arn.get_or_insert_with(|| arn.to_string());
                    }
                }
            }

            match resp.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        match pending_arn {
            Some(arn) => self.describe_certificate(&arn).await.map(Some),
            None => Ok(None),
        }
    }

    async fn describe_certificate(&self, arn: &str) -> DeployResult<CertificateInfo> {
        let resp = self
            .acm
            .describe_certificate()
            .certificate_arn(arn)
            .send()
            .await
            .map_err(|e| DeployError::Cdn(format!("describe certificate {arn} failed: {e}")))?;

        let detail = resp
            .certificate()
            .ok_or_else(|| DeployError::NotFound(format!("certificate {arn}")))?;

        let validation_records = detail
            .domain_validation_options()
            .iter()
            .filter_map(|dv| {
                dv.resource_record().map(|rr| ValidationRecord {
                    domain: dv.domain_name().to_string(),
                    name: rr.name().to_string(),
                    record_type: rr.r#type().as_str().to_string(),
                    value: rr.value().to_string(),
                })
            })
            .collect();

        Ok(CertificateInfo {
            arn: arn.to_string(),
            domain: detail.domain_name().unwrap_or_default().to_string(),
            status: map_status(detail.status()),
            validation_records,
        })
    }

    async fn request_certificate(
        &self,
        domain: &str,
        alternative_names: &[String],
    ) -> DeployResult<CertificateRequest> {
        let sans = (!alternative_names.is_empty()).then(|| alternative_names.to_vec());
        let resp = self
            .acm
            .request_certificate()
            .domain_name(domain)
            .validation_method(ValidationMethod::Dns)
            .set_subject_alternative_names(sans)
            .idempotency_token(idempotency_token(domain))
            .send()
            .await
            .map_err(|e| DeployError::Cdn(format!("request certificate for {domain} failed: {e}")))?;

        let arn = resp
            .certificate_arn()
            .ok_or_else(|| DeployError::Cdn(format!("no certificate ARN returned for {domain}")))?
            .to_string();
        debug!("requested certificate {arn} for {domain}");

        // Validation records appear a few seconds after the request.
        let validation_records = self
            .describe_certificate(&arn)
            .await
            .map(|info| info.validation_records)
            .unwrap_or_default();

        Ok(CertificateRequest {
            arn,
            validation_records,
        })
    }

    async fn create_distribution(
        &self,
        spec: &DistributionSpec,
    ) -> DeployResult<DistributionSummary> {
        let config = Self::distribution_config(spec)?;
        let resp = self
            .cloudfront
            .create_distribution()
            .distribution_config(config)
            .send()
            .await
            .map_err(|e| DeployError::Cdn(format!("create distribution for {} failed: {e}", spec.origin)))?;

        let dist = resp
            .distribution()
            .ok_or_else(|| DeployError::Cdn("create distribution returned no distribution".to_string()))?;

        debug!("created distribution {} ({})", dist.id(), dist.domain_name());
        Ok(DistributionSummary {
            id: dist.id().to_string(),
            domain_name: dist.domain_name().to_string(),
            status: dist.status().to_string(),
            origins: vec![spec.origin.clone()],
            aliases: spec.aliases.clone(),
        })
    }
}
