mod support;

use pretty_assertions::assert_eq;
use sitedeploy_cloud::endpoints::{self, CLOUDFRONT_HOSTED_ZONE_ID};
use sitedeploy_cloud::*;
use std::sync::Arc;
use support::{FakeCdn, FakeDns, FakeStorage, engine, website_bucket, write_site};

const SITE: &str = "www.example.com";

struct Harness {
    storage: Arc<FakeStorage>,
    dns: Arc<FakeDns>,
    cdn: Arc<FakeCdn>,
    provisioner: DistributionProvisioner,
}

impl Harness {
    fn new() -> Self {
        Self::with_dns(FakeDns::with_zone("example.com"))
    }

    fn with_dns(dns: FakeDns) -> Self {
        let storage = Arc::new(FakeStorage::new());
        let dns = Arc::new(dns);
        let cdn = Arc::new(FakeCdn::new());
        let dns_dyn: Arc<dyn DnsCollaborator> = dns.clone();
        let cdn_dyn: Arc<dyn CdnCollaborator> = cdn.clone();
        let provisioner = DistributionProvisioner::new(engine(&storage), dns_dyn, cdn_dyn);
        Self {
            storage,
            dns,
            cdn,
            provisioner,
        }
    }
}

fn statuses(report: &ProvisioningReport) -> Vec<(Stage, StageStatus)> {
    report.stages.iter().map(|s| (s.stage, s.status)).collect()
}

fn cdn_plan() -> ProvisioningPlan {
    ProvisioningPlan::new(website_bucket(SITE)).with_cdn(CdnConfig {
        aliases: vec![SITE.to_string()],
        certificate_arn: None,
    })
}

fn website_target() -> AliasTarget {
    endpoints::website_alias_target("us-east-1").unwrap()
}

// ── Bucket stage ─────────────────────────────────────────────────

#[tokio::test]
async fn bucket_only_plan_completes_and_skips_later_stages() {
    let h = Harness::new();
    let site = write_site(&[("index.html", b"<h1>hi</h1>"), ("style.css", b"body{}")]);
    let plan = ProvisioningPlan::new(website_bucket(SITE)).with_content(site.path());

    let report = h.provisioner.run(&plan).await;

    assert_eq!(report.state, ProvisioningState::Complete);
    assert_eq!(
        statuses(&report),
        vec![
            (Stage::BucketReady, StageStatus::Applied),
            (Stage::DomainConfigured, StageStatus::Skipped),
            (Stage::CdnConfigured, StageStatus::Skipped),
        ]
    );
    let sync = report.sync.unwrap();
    assert_eq!(sync.content_type_of("index.html"), Some("text/html"));
    assert_eq!(sync.content_type_of("style.css"), Some("text/css"));
    assert_eq!(h.storage.object(SITE, "style.css").unwrap().content_type, "text/css");
}

#[tokio::test]
async fn rerun_reports_already_satisfied() {
    let h = Harness::new();
    let site = write_site(&[("index.html", b"<h1>hi</h1>")]);
    let plan = ProvisioningPlan::new(website_bucket(SITE)).with_content(site.path());

    h.provisioner.run(&plan).await;
    let report = h.provisioner.run(&plan).await;

    assert_eq!(report.state, ProvisioningState::Complete);
    assert_eq!(
        report.stage(Stage::BucketReady).unwrap().status,
        StageStatus::AlreadySatisfied
    );
    assert_eq!(report.sync.unwrap().skipped, vec!["index.html"]);
}

#[tokio::test]
async fn plan_without_content_only_ensures_bucket() {
    let h = Harness::new();
    let report = h.provisioner.run(&ProvisioningPlan::new(website_bucket(SITE))).await;

    assert!(report.state.is_complete());
    assert!(report.sync.is_none());
    assert!(h.storage.calls_named("list_objects").is_empty());
    assert!(h.storage.website(SITE).is_some());
}

#[tokio::test]
async fn sync_failure_fails_bucket_stage_and_stops() {
    let h = Harness::new();
    h.storage.fail_key("b.html");
    let site = write_site(&[("a.html", b"a"), ("b.html", b"b")]);
    let plan = ProvisioningPlan::new(website_bucket(SITE))
        .with_content(site.path())
        .with_domain(DomainRecord {
            name: SITE.to_string(),
            create_zone: false,
        });

    let report = h.provisioner.run(&plan).await;

    match report.state {
        ProvisioningState::Failed { stage, ref reason } => {
            assert_eq!(stage, Stage::BucketReady);
            assert!(reason.contains("1 object(s) failed"), "{reason}");
        }
        ref other => panic!("expected failure, got {other}"),
    }
    assert!(report.stages.is_empty());
    assert_eq!(report.sync.unwrap().errors[0].key, "b.html");
    assert!(h.dns.alias(SITE).is_none());
}

#[tokio::test]
async fn foreign_bucket_fails_first_stage() {
    let h = Harness::new();
    h.storage.add_foreign_bucket(SITE);

    let report = h.provisioner.run(&ProvisioningPlan::new(website_bucket(SITE))).await;
    assert!(matches!(
        report.state,
        ProvisioningState::Failed {
            stage: Stage::BucketReady,
            ..
        }
    ));
}

// ── Domain stage ─────────────────────────────────────────────────

#[tokio::test]
async fn domain_stage_aliases_website_endpoint() {
    let h = Harness::new();
    let plan = ProvisioningPlan::new(website_bucket(SITE)).with_domain(DomainRecord {
        name: SITE.to_string(),
        create_zone: false,
    });

    let report = h.provisioner.run(&plan).await;

    assert!(report.state.is_complete());
    assert_eq!(
        report.stage(Stage::DomainConfigured).unwrap().status,
        StageStatus::Applied
    );
    assert_eq!(h.dns.alias(SITE), Some(website_target()));

    let again = h.provisioner.run(&plan).await;
    assert_eq!(
        again.stage(Stage::DomainConfigured).unwrap().status,
        StageStatus::AlreadySatisfied
    );
    assert_eq!(h.dns.calls_named("upsert_alias_record").len(), 1);
}

#[tokio::test]
async fn domain_stage_repoints_stale_alias() {
    let h = Harness::new();
    h.dns.set_alias(
        SITE,
        AliasTarget {
            hosted_zone_id: "Z1BKCTXD74EZPE".into(),
            dns_name: "s3-website-eu-west-1.amazonaws.com".into(),
        },
    );
    let plan = ProvisioningPlan::new(website_bucket(SITE)).with_domain(DomainRecord {
        name: SITE.to_string(),
        create_zone: false,
    });

    let report = h.provisioner.run(&plan).await;
    assert_eq!(
        report.stage(Stage::DomainConfigured).unwrap().status,
        StageStatus::Applied
    );
    assert_eq!(h.dns.alias(SITE), Some(website_target()));
}

#[tokio::test]
async fn record_must_match_bucket_name() {
    let h = Harness::new();
    let plan = ProvisioningPlan::new(website_bucket("example-site-bucket")).with_domain(
        DomainRecord {
            name: SITE.to_string(),
            create_zone: false,
        },
    );

    let report = h.provisioner.run(&plan).await;
    assert!(matches!(
        report.state,
        ProvisioningState::Failed {
            stage: Stage::DomainConfigured,
            ..
        }
    ));
    assert_eq!(statuses(&report), vec![(Stage::BucketReady, StageStatus::Applied)]);
}

#[tokio::test]
async fn missing_zone_is_created_when_allowed() {
    let h = Harness::with_dns(FakeDns::new());
    let plan = ProvisioningPlan::new(website_bucket(SITE)).with_domain(DomainRecord {
        name: SITE.to_string(),
        create_zone: true,
    });

    let report = h.provisioner.run(&plan).await;
    assert!(report.state.is_complete());
    assert_eq!(h.dns.zones()[0].name, "example.com");
    assert_eq!(h.dns.alias(SITE), Some(website_target()));
}

#[tokio::test]
async fn missing_zone_fails_when_creation_not_allowed() {
    let h = Harness::with_dns(FakeDns::new());
    let plan = ProvisioningPlan::new(website_bucket(SITE)).with_domain(DomainRecord {
        name: SITE.to_string(),
        create_zone: false,
    });

    let report = h.provisioner.run(&plan).await;
    assert!(report.state.is_failed());
    assert!(h.dns.calls_named("create_zone").is_empty());
}

// ── CDN stage ────────────────────────────────────────────────────

#[tokio::test]
async fn cdn_waits_for_certificate_then_completes() {
    let h = Harness::new();
    let plan = cdn_plan();

    let first = h.provisioner.run(&plan).await;
    assert!(first.state.is_pending());
    assert!(matches!(
        first.state,
        ProvisioningState::Pending {
            stage: Stage::CdnConfigured,
            ..
        }
    ));
    assert_eq!(h.cdn.certificate_requests(), 1);
    assert!(
        h.dns
            .cname("_3639ac514e785e898d2646601fa951d5.www.example.com")
            .is_some()
    );

    // Still validating: re-check without a second request
    let second = h.provisioner.resume(&plan, &first.state).await;
    assert!(second.state.is_pending());
    assert_eq!(h.cdn.certificate_requests(), 1);
    assert!(second.stage(Stage::BucketReady).is_none());
    assert!(h.cdn.created().is_empty());

    h.cdn.issue_all();
    let third = h.provisioner.resume(&plan, &second.state).await;
    assert_eq!(third.state, ProvisioningState::Complete);
    assert_eq!(h.cdn.certificate_requests(), 1);

    let created = h.cdn.created();
    assert_eq!(created.len(), 1);
    assert_eq!(
        created[0].origin,
        "www.example.com.s3-website-us-east-1.amazonaws.com"
    );
    assert_eq!(created[0].aliases, vec![SITE.to_string()]);
    assert_eq!(created[0].default_root_object, "index.html");
    assert_eq!(
        created[0].certificate_arn,
        "arn:aws:acm:us-east-1:123456789012:certificate/1"
    );

    let alias = h.dns.alias(SITE).unwrap();
    assert_eq!(alias.hosted_zone_id, CLOUDFRONT_HOSTED_ZONE_ID);
    assert_eq!(alias.dns_name, "d1abcdef.cloudfront.net");
}

#[tokio::test]
async fn existing_distribution_is_reused() {
    let h = Harness::new();
    h.cdn.add_certificate(SITE, CertificateStatus::Issued);
    h.cdn.add_distribution(
        "www.example.com.s3-website-us-east-1.amazonaws.com",
        "d9existing.cloudfront.net",
    );
    h.dns.set_alias(SITE, endpoints::cloudfront_alias_target("d9existing.cloudfront.net"));

    let report = h.provisioner.run(&cdn_plan()).await;

    assert!(report.state.is_complete());
    assert_eq!(
        report.stage(Stage::CdnConfigured).unwrap().status,
        StageStatus::AlreadySatisfied
    );
    assert!(h.cdn.created().is_empty());
    assert!(h.dns.calls_named("upsert_alias_record").is_empty());
}

#[tokio::test]
async fn issued_wildcard_certificate_is_used_without_request() {
    let h = Harness::new();
    let arn = h.cdn.add_certificate("*.example.com", CertificateStatus::Issued);

    let report = h.provisioner.run(&cdn_plan()).await;

    assert!(report.state.is_complete());
    assert_eq!(h.cdn.certificate_requests(), 0);
    assert_eq!(h.cdn.created()[0].certificate_arn, arn);
}

#[tokio::test]
async fn failed_certificate_fails_cdn_stage() {
    let h = Harness::new();
    h.cdn
        .add_certificate(SITE, CertificateStatus::Failed("CAA_ERROR".into()));
    let plan = ProvisioningPlan::new(website_bucket(SITE)).with_cdn(CdnConfig {
        aliases: vec![SITE.to_string()],
        certificate_arn: Some("arn:aws:acm:us-east-1:123456789012:certificate/1".into()),
    });

    let report = h.provisioner.run(&plan).await;
    match report.state {
        ProvisioningState::Failed { stage, ref reason } => {
            assert_eq!(stage, Stage::CdnConfigured);
            assert!(reason.contains("CAA_ERROR"), "{reason}");
        }
        ref other => panic!("expected failure, got {other}"),
    }
}

#[tokio::test]
async fn empty_alias_list_is_a_configuration_failure() {
    let h = Harness::new();
    let plan = ProvisioningPlan::new(website_bucket(SITE)).with_cdn(CdnConfig {
        aliases: Vec::new(),
        certificate_arn: None,
    });

    let report = h.provisioner.run(&plan).await;
    assert!(matches!(
        report.state,
        ProvisioningState::Failed {
            stage: Stage::CdnConfigured,
            ..
        }
    ));
}

#[tokio::test]
async fn full_plan_runs_stages_in_order() {
    let h = Harness::new();
    h.cdn.add_certificate(SITE, CertificateStatus::Issued);
    let site = write_site(&[("index.html", b"<h1>hi</h1>")]);
    let plan = cdn_plan().with_content(site.path()).with_domain(DomainRecord {
        name: SITE.to_string(),
        create_zone: false,
    });

    let report = h.provisioner.run(&plan).await;

    assert_eq!(report.state, ProvisioningState::Complete);
    let order: Vec<Stage> = report.stages.iter().map(|s| s.stage).collect();
    assert_eq!(order, Stage::ALL.to_vec());
    assert_eq!(h.dns.alias(SITE).unwrap().hosted_zone_id, CLOUDFRONT_HOSTED_ZONE_ID);

    // The record stays with the CDN on re-runs
    let again = h.provisioner.run(&plan).await;
    assert_eq!(
        statuses(&again),
        vec![
            (Stage::BucketReady, StageStatus::AlreadySatisfied),
            (Stage::DomainConfigured, StageStatus::AlreadySatisfied),
            (Stage::CdnConfigured, StageStatus::AlreadySatisfied),
        ]
    );
    assert_eq!(h.dns.alias(SITE).unwrap().hosted_zone_id, CLOUDFRONT_HOSTED_ZONE_ID);
}

#[tokio::test]
async fn resume_after_failure_starts_over() {
    let h = Harness::new();
    let failed = ProvisioningState::Failed {
        stage: Stage::DomainConfigured,
        reason: "earlier".into(),
    };

    let report = h
        .provisioner
        .resume(&ProvisioningPlan::new(website_bucket(SITE)), &failed)
        .await;
    assert!(report.state.is_complete());
    assert!(report.stage(Stage::BucketReady).is_some());
}

#[test]
fn state_display() {
    assert_eq!(ProvisioningState::NotStarted.to_string(), "NotStarted");
    assert_eq!(
        ProvisioningState::Pending {
            stage: Stage::CdnConfigured,
            reason: "validating".into(),
        }
        .to_string(),
        "Pending(CdnConfigured, validating)"
    );
}

#[test]
fn stages_are_ordered() {
    assert!(Stage::BucketReady < Stage::DomainConfigured);
    assert!(Stage::DomainConfigured < Stage::CdnConfigured);
}
