//! AWS session context.
//!
//! One `AwsSession` is built per invocation and handed to each service
//! adapter. It owns the resolved SDK configuration, so there is no global
//! "current profile".

use crate::config::DeployConfig;
use crate::error::{DeployError, DeployResult};
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_types::SdkConfig;
use aws_types::region::Region;
use tracing::debug;

/// ACM certificates used by CloudFront must live in this region.
pub const CLOUDFRONT_CERTIFICATE_REGION: &str = "us-east-1";

/// Resolved credentials, region, and endpoint settings.
#[derive(Clone, Debug)]
pub struct AwsSession {
    sdk_config: SdkConfig,
    profile: Option<String>,
    endpoint_override: Option<String>,
}

impl AwsSession {
    /// Resolves credentials from the named profile or the default chain.
    ///
    /// Fails with a configuration error if no usable credentials are found.
    pub async fn load(config: &DeployConfig) -> DeployResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(ref profile) = config.profile {
            loader = loader.profile_name(profile);
        }

        let session = Self {
            sdk_config: loader.load().await,
            profile: config.profile.clone(),
            endpoint_override: config.endpoint_override.clone(),
        };
        session.check_credentials().await?;
        Ok(session)
    }

    /// Builds a session from fixed keys (MinIO and other S3-compatible servers).
    pub async fn with_static_credentials(
        access_key_id: &str,
        secret_access_key: &str,
        region: &str,
        endpoint_override: Option<String>,
    ) -> Self {
        let credentials =
            Credentials::new(access_key_id, secret_access_key, None, None, "sitedeploy-static");
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials)
            .load()
            .await;

        Self {
            sdk_config,
            profile: None,
            endpoint_override,
        }
    }

    async fn check_credentials(&self) -> DeployResult<()> {
        let source = match self.profile {
            Some(ref p) => format!("profile {p}"),
            None => "default credential chain".to_string(),
        };
        let provider = self
            .sdk_config
            .credentials_provider()
            .ok_or_else(|| DeployError::Config(format!("no credentials provider for {source}")))?;

        provider
            .provide_credentials()
            .await
            .map_err(|e| DeployError::Config(format!("no usable credentials from {source}: {e}")))?;

        debug!("resolved AWS credentials from {source}");
        Ok(())
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.sdk_config
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn region(&self) -> Option<String> {
        self.sdk_config.region().map(|r| r.to_string())
    }

    /// S3 client. An endpoint override implies path-style addressing.
    pub fn s3_client(&self) -> aws_sdk_s3::Client {
        let mut builder = aws_sdk_s3::config::Builder::from(&self.sdk_config);
        if let Some(ref endpoint) = self.endpoint_override {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        aws_sdk_s3::Client::from_conf(builder.build())
    }

    pub fn route53_client(&self) -> aws_sdk_route53::Client {
        aws_sdk_route53::Client::new(&self.sdk_config)
    }

    pub fn cloudfront_client(&self) -> aws_sdk_cloudfront::Client {
        aws_sdk_cloudfront::Client::new(&self.sdk_config)
    }

    /// ACM client pinned to the region CloudFront reads certificates from.
    pub fn acm_client(&self) -> aws_sdk_acm::Client {
        let config = aws_sdk_acm::config::Builder::from(&self.sdk_config)
            .region(Region::new(CLOUDFRONT_CERTIFICATE_REGION))
            .build();
        aws_sdk_acm::Client::from_conf(config)
    }
}
