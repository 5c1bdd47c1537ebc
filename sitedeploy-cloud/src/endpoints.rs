//! S3 static website endpoints by region.
//!
//! Route 53 alias records need both the website endpoint host and the
//! hosted zone id AWS publishes for that endpoint.

use crate::error::{DeployError, DeployResult};
use crate::types::AliasTarget;

/// Hosted zone id shared by every CloudFront distribution.
pub const CLOUDFRONT_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

/// Website endpoint for one region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WebsiteEndpoint {
    pub region: &'static str,
    pub host: &'static str,
    pub zone: &'static str,
}

const WEBSITE_ENDPOINTS: &[WebsiteEndpoint] = &[
    WebsiteEndpoint { region: "us-east-1", host: "s3-website-us-east-1.amazonaws.com", zone: "Z3AQBSTGFYJSTF" },
    WebsiteEndpoint { region: "us-east-2", host: "s3-website.us-east-2.amazonaws.com", zone: "Z2O1EMRO9K5GLX" },
    WebsiteEndpoint { region: "us-west-1", host: "s3-website-us-west-1.amazonaws.com", zone: "Z2F56UZL2M1ACD" },
    WebsiteEndpoint { region: "us-west-2", host: "s3-website-us-west-2.amazonaws.com", zone: "Z3BJ6K6RIION7M" },
    WebsiteEndpoint { region: "ca-central-1", host: "s3-website.ca-central-1.amazonaws.com", zone: "Z1QDHH18159H29" },
    WebsiteEndpoint { region: "ap-south-1", host: "s3-website.ap-south-1.amazonaws.com", zone: "Z11RGJOFQNVJUP" },
    WebsiteEndpoint { region: "ap-northeast-1", host: "s3-website-ap-northeast-1.amazonaws.com", zone: "Z2M4EHUR26P7ZW" },
    WebsiteEndpoint { region: "ap-northeast-2", host: "s3-website.ap-northeast-2.amazonaws.com", zone: "Z3W03O7B5YMIYP" },
    WebsiteEndpoint { region: "ap-northeast-3", host: "s3-website.ap-northeast-3.amazonaws.com", zone: "Z2YQB5RD63NC85" },
    WebsiteEndpoint { region: "ap-southeast-1", host: "s3-website-ap-southeast-1.amazonaws.com", zone: "Z3O0J2DXBE1FTB" },
    WebsiteEndpoint { region: "ap-southeast-2", host: "s3-website-ap-southeast-2.amazonaws.com", zone: "Z1WCIGYICN2BYD" },
    WebsiteEndpoint { region: "eu-central-1", host: "s3-website.eu-central-1.amazonaws.com", zone: "Z21DNDUVLTQW6Q" },
    WebsiteEndpoint { region: "eu-west-1", host: "s3-website-eu-west-1.amazonaws.com", zone: "Z1BKCTXD74EZPE" },
    WebsiteEndpoint { region: "eu-west-2", host: "s3-website.eu-west-2.amazonaws.com", zone: "Z3GKZC51ZF0DB4" },
    WebsiteEndpoint { region: "eu-west-3", host: "s3-website.eu-west-3.amazonaws.com", zone: "Z3R1K369G5AVDG" },
    WebsiteEndpoint { region: "eu-north-1", host: "s3-website.eu-north-1.amazonaws.com", zone: "Z3BAZG2TWCNX0D" },
    WebsiteEndpoint { region: "sa-east-1", host: "s3-website-sa-east-1.amazonaws.com", zone: "Z7KQH4QJS55SO" },
];

/// Looks up the website endpoint for a region.
pub fn website_endpoint(region: &str) -> DeployResult<WebsiteEndpoint> {
    WEBSITE_ENDPOINTS
        .iter()
        .find(|e| e.region == region)
        .copied()
        .ok_or_else(|| DeployError::Config(format!("no S3 website endpoint known for region {region}")))
}

/// Host serving a bucket's website, e.g. `example.com.s3-website-us-east-1.amazonaws.com`.
pub fn website_host(bucket: &str, region: &str) -> DeployResult<String> {
    let endpoint = website_endpoint(region)?;
    Ok(format!("{bucket}.{}", endpoint.host))
}

pub fn website_url(bucket: &str, region: &str) -> DeployResult<String> {
    Ok(format!("http://{}", website_host(bucket, region)?))
}

/// Alias target for a bucket website record. Route 53 aliases the regional
/// endpoint host, not the bucket-specific one.
pub fn website_alias_target(region: &str) -> DeployResult<AliasTarget> {
    let endpoint = website_endpoint(region)?;
    Ok(AliasTarget {
        hosted_zone_id: endpoint.zone.to_string(),
        dns_name: endpoint.host.to_string(),
    })
}

/// Alias target for a CloudFront distribution domain.
pub fn cloudfront_alias_target(distribution_domain: &str) -> AliasTarget {
    AliasTarget {
        hosted_zone_id: CLOUDFRONT_HOSTED_ZONE_ID.to_string(),
        dns_name: distribution_domain.to_string(),
    }
}
