//! In-memory collaborators and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sitedeploy_cloud::dns::{best_zone_match, registrable_domain};
use sitedeploy_cloud::*;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

// ── Storage ──────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub fingerprint: Fingerprint,
}

#[derive(Default)]
struct FakeBucket {
    region: String,
    objects: BTreeMap<String, StoredObject>,
    policy: Option<String>,
    website: Option<(String, String)>,
    public_policies_allowed: bool,
}

#[derive(Default)]
struct StorageState {
    buckets: BTreeMap<String, FakeBucket>,
    foreign_buckets: HashSet<String>,
    failing_keys: HashSet<String>,
    calls: Vec<String>,
}

/// Object store that fingerprints bodies the same way S3 computes ETags.
pub struct FakeStorage {
    fingerprinter: Fingerprinter,
    upload_delay: Option<Duration>,
    state: Mutex<StorageState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    puts_started: AtomicUsize,
    deletes_started: AtomicUsize,
    cancel_trigger: Mutex<Option<(usize, watch::Sender<bool>)>>,
    delete_cancel_trigger: Mutex<Option<(usize, watch::Sender<bool>)>>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::with_chunk_size(sitedeploy_cloud::config::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: u64) -> Self {
        Self {
            fingerprinter: Fingerprinter::new(chunk_size),
            upload_delay: None,
            state: Mutex::new(StorageState::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            puts_started: AtomicUsize::new(0),
            deletes_started: AtomicUsize::new(0),
            cancel_trigger: Mutex::new(None),
            delete_cancel_trigger: Mutex::new(None),
        }
    }

    /// Every upload sleeps this long, so concurrency can be observed.
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    /// Returns a cancel signal that fires when the `n`th upload starts.
    pub fn cancel_on_upload(&self, n: usize) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        *self.cancel_trigger.lock().unwrap() = Some((n, tx));
        rx
    }

    /// Returns a cancel signal that fires when the `n`th delete starts.
    pub fn cancel_on_delete(&self, n: usize) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        *self.delete_cancel_trigger.lock().unwrap() = Some((n, tx));
        rx
    }

    pub fn add_bucket(&self, name: &str, region: &str) {
        self.state.lock().unwrap().buckets.insert(
            name.to_string(),
            FakeBucket {
                region: region.to_string(),
                ..FakeBucket::default()
            },
        );
    }

    /// A bucket name taken by another account.
    pub fn add_foreign_bucket(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .foreign_buckets
            .insert(name.to_string());
    }

    pub fn insert_object(&self, bucket: &str, key: &str, body: &[u8]) {
        let object = StoredObject {
            body: body.to_vec(),
            content_type: content_type::resolve(key).to_string(),
            fingerprint: self.fingerprinter.fingerprint(body),
        };
        self.bucket_mut(bucket, |b| {
            b.objects.insert(key.to_string(), object);
        });
    }

    /// Overrides the stored fingerprint, e.g. to simulate an unparseable ETag.
    pub fn set_fingerprint(&self, bucket: &str, key: &str, fingerprint: Fingerprint) {
        self.bucket_mut(bucket, |b| {
            if let Some(obj) = b.objects.get_mut(key) {
                obj.fingerprint = fingerprint;
            }
        });
    }

    /// Uploads of `key` fail until cleared.
    pub fn fail_key(&self, key: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_keys
            .insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing_keys.clear();
    }

    pub fn objects(&self, bucket: &str) -> BTreeMap<String, StoredObject> {
        self.state
            .lock()
            .unwrap()
            .buckets
            .get(bucket)
            .map(|b| b.objects.clone())
            .unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects(bucket).remove(key)
    }

    pub fn policy(&self, bucket: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.buckets.get(bucket).and_then(|b| b.policy.clone())
    }

    pub fn website(&self, bucket: &str) -> Option<(String, String)> {
        let state = self.state.lock().unwrap();
        state.buckets.get(bucket).and_then(|b| b.website.clone())
    }

    pub fn public_policies_allowed(&self, bucket: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .buckets
            .get(bucket)
            .is_some_and(|b| b.public_policies_allowed)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls whose name starts with `prefix`.
    pub fn calls_named(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn bucket_mut(&self, bucket: &str, f: impl FnOnce(&mut FakeBucket)) {
        let mut state = self.state.lock().unwrap();
        let entry = state.buckets.entry(bucket.to_string()).or_insert_with(|| FakeBucket {
            region: "us-east-1".to_string(),
            ..FakeBucket::default()
        });
        f(entry);
    }

    fn with_bucket<T>(
        &self,
        bucket: &str,
        f: impl FnOnce(&mut FakeBucket) -> T,
    ) -> DeployResult<T> {
        let mut state = self.state.lock().unwrap();
        state
            .buckets
            .get_mut(bucket)
            .map(f)
            .ok_or_else(|| DeployError::S3(format!("NoSuchBucket: {bucket}")))
    }
}

#[async_trait]
impl StorageCollaborator for FakeStorage {
    async fn list_buckets(&self) -> DeployResult<Vec<BucketSummary>> {
        self.record("list_buckets".to_string());
        let state = self.state.lock().unwrap();
        Ok(state
            .buckets
            .keys()
            .map(|name| BucketSummary {
                name: name.clone(),
                created_at: None,
            })
            .collect())
    }

    async fn create_bucket(&self, name: &str, region: &str) -> DeployResult<CreateBucketOutcome> {
        self.record(format!("create_bucket:{name}"));
        let mut state = self.state.lock().unwrap();
        if state.foreign_buckets.contains(name) {
            return Err(DeployError::Precondition(format!(
                "bucket {name} already exists and is owned by another account"
            )));
        }
        if state.buckets.contains_key(name) {
            return Ok(CreateBucketOutcome::AlreadyOwned);
        }
        state.buckets.insert(
            name.to_string(),
            FakeBucket {
                region: region.to_string(),
                ..FakeBucket::default()
            },
        );
        Ok(CreateBucketOutcome::Created)
    }

    async fn bucket_region(&self, name: &str) -> DeployResult<String> {
        self.record(format!("bucket_region:{name}"));
        self.with_bucket(name, |b| b.region.clone())
    }

    async fn allow_public_policies(&self, name: &str) -> DeployResult<()> {
        self.record(format!("allow_public_policies:{name}"));
        self.with_bucket(name, |b| b.public_policies_allowed = true)
    }

    async fn set_bucket_policy(&self, name: &str, policy: &str) -> DeployResult<()> {
        self.record(format!("set_bucket_policy:{name}"));
        let policy = policy.to_string();
        self.with_bucket(name, |b| b.policy = Some(policy))
    }

    async fn set_website_config(
        &self,
        name: &str,
        index_document: &str,
        error_document: &str,
    ) -> DeployResult<()> {
        self.record(format!("set_website_config:{name}"));
        let docs = (index_document.to_string(), error_document.to_string());
        self.with_bucket(name, |b| b.website = Some(docs))
    }

    async fn list_objects(&self, bucket: &str) -> DeployResult<Manifest> {
        self.record(format!("list_objects:{bucket}"));
        self.with_bucket(bucket, |b| {
            b.objects
                .iter()
                .map(|(key, obj)| {
                    (
                        key.clone(),
                        RemoteObject {
                            key: key.clone(),
                            fingerprint: obj.fingerprint.clone(),
                            size: obj.body.len() as u64,
                        },
                    )
                })
                .collect()
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> DeployResult<()> {
        self.record(format!("put_object:{key}"));
        let started = self.puts_started.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, ref tx)) = *self.cancel_trigger.lock().unwrap() {
            if started >= n {
                let _ = tx.send(true);
            }
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.state.lock().unwrap().failing_keys.contains(key);
        let result = if failing {
            Err(DeployError::transfer(key, "injected failure"))
        } else {
            match tokio::fs::read(source).await {
                Ok(body) => {
                    let object = StoredObject {
                        fingerprint: self.fingerprinter.fingerprint(&body),
                        body,
                        content_type: content_type.to_string(),
                    };
                    self.with_bucket(bucket, |b| {
                        b.objects.insert(key.to_string(), object);
                    })
                }
                Err(e) => Err(DeployError::transfer(key, e)),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> DeployResult<()> {
        self.record(format!("delete_object:{key}"));
        let started = self.deletes_started.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, ref tx)) = *self.delete_cancel_trigger.lock().unwrap() {
            if started >= n {
                let _ = tx.send(true);
            }
        }
        if self.state.lock().unwrap().failing_keys.contains(key) {
            return Err(DeployError::transfer(key, "injected failure"));
        }
        self.with_bucket(bucket, |b| {
            b.objects.remove(key);
        })
    }
}

// ── DNS ──────────────────────────────────────────────────────────

#[derive(Default)]
struct DnsState {
    zones: Vec<HostedZone>,
    aliases: BTreeMap<String, AliasTarget>,
    cnames: BTreeMap<String, String>,
    calls: Vec<String>,
}

/// Route 53 stand-in keyed by normalized record name.
#[derive(Default)]
pub struct FakeDns {
    state: Mutex<DnsState>,
}

impl FakeDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zone(name: &str) -> Self {
        let dns = Self::new();
        dns.add_zone(name);
        dns
    }

    pub fn add_zone(&self, name: &str) -> HostedZone {
        let zone = HostedZone {
            id: format!("Z{}", name.replace('.', "").to_ascii_uppercase()),
            name: name.to_string(),
        };
        self.state.lock().unwrap().zones.push(zone.clone());
        zone
    }

    pub fn zones(&self) -> Vec<HostedZone> {
        self.state.lock().unwrap().zones.clone()
    }

    pub fn set_alias(&self, name: &str, target: AliasTarget) {
        self.state
            .lock()
            .unwrap()
            .aliases
            .insert(normalize_dns_name(name), target);
    }

    pub fn alias(&self, name: &str) -> Option<AliasTarget> {
        self.state
            .lock()
            .unwrap()
            .aliases
            .get(&normalize_dns_name(name))
            .cloned()
    }

    pub fn cname(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .cnames
            .get(&normalize_dns_name(name))
            .cloned()
    }

    pub fn calls_named(&self, prefix: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl DnsCollaborator for FakeDns {
    async fn find_zone(&self, domain: &str) -> DeployResult<Option<HostedZone>> {
        self.record(format!("find_zone:{domain}"));
        let state = self.state.lock().unwrap();
        Ok(best_zone_match(&state.zones, domain).cloned())
    }

    async fn create_zone(&self, domain: &str) -> DeployResult<HostedZone> {
        self.record(format!("create_zone:{domain}"));
        Ok(self.add_zone(&registrable_domain(domain)))
    }

    async fn find_alias_record(
        &self,
        _zone: &HostedZone,
        name: &str,
    ) -> DeployResult<Option<AliasTarget>> {
        Ok(self.alias(name))
    }

    async fn upsert_alias_record(
        &self,
        _zone: &HostedZone,
        name: &str,
        target: &AliasTarget,
    ) -> DeployResult<()> {
        self.record(format!("upsert_alias_record:{name}"));
        self.set_alias(name, target.clone());
        Ok(())
    }

    async fn upsert_cname_record(
        &self,
        _zone: &HostedZone,
        name: &str,
        value: &str,
    ) -> DeployResult<()> {
        self.record(format!("upsert_cname_record:{name}"));
        self.state
            .lock()
            .unwrap()
            .cnames
            .insert(normalize_dns_name(name), value.to_string());
        Ok(())
    }
}

// ── CDN ──────────────────────────────────────────────────────────

#[derive(Default)]
struct CdnState {
    certificates: Vec<CertificateInfo>,
    distributions: Vec<DistributionSummary>,
    created: Vec<DistributionSpec>,
}

/// CloudFront + ACM stand-in. New certificates start pending.
#[derive(Default)]
pub struct FakeCdn {
    state: Mutex<CdnState>,
    certificate_requests: AtomicUsize,
}

impl FakeCdn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_certificate(&self, domain: &str, status: CertificateStatus) -> String {
        let mut state = self.state.lock().unwrap();
        let arn = format!(
            "arn:aws:acm:us-east-1:123456789012:certificate/{}",
            state.certificates.len() + 1
        );
        state.certificates.push(CertificateInfo {
            arn: arn.clone(),
            domain: domain.to_string(),
            status,
            validation_records: vec![validation_record(domain)],
        });
        arn
    }

    /// Simulates validation completing for every pending certificate.
    pub fn issue_all(&self) {
        for cert in &mut self.state.lock().unwrap().certificates {
            if cert.status == CertificateStatus::PendingValidation {
                cert.status = CertificateStatus::Issued;
            }
        }
    }

    pub fn add_distribution(&self, origin: &str, domain_name: &str) {
        let mut state = self.state.lock().unwrap();
        let id = format!("E{}", state.distributions.len() + 1);
        state.distributions.push(DistributionSummary {
            id,
            domain_name: domain_name.to_string(),
            status: "Deployed".to_string(),
            origins: vec![origin.to_string()],
            aliases: Vec::new(),
        });
    }

    pub fn certificate_requests(&self) -> usize {
        self.certificate_requests.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<DistributionSpec> {
        self.state.lock().unwrap().created.clone()
    }
}

fn validation_record(domain: &str) -> ValidationRecord {
    ValidationRecord {
        domain: domain.to_string(),
        name: format!("_3639ac514e785e898d2646601fa951d5.{domain}"),
        record_type: "CNAME".to_string(),
        value: "_98d2646601fa951d5.acm-validations.aws".to_string(),
    }
}

#[async_trait]
impl CdnCollaborator for FakeCdn {
    async fn find_distribution_by_origin(
        &self,
        origin: &str,
    ) -> DeployResult<Option<DistributionSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .distributions
            .iter()
            .find(|d| d.origins.iter().any(|o| o == origin))
            .cloned())
    }

    async fn find_certificate(&self, domain: &str) -> DeployResult<Option<CertificateInfo>> {
        let state = self.state.lock().unwrap();
        let covering: Vec<&CertificateInfo> = state
            .certificates
            .iter()
            .filter(|c| certificate_covers(&c.domain, domain))
            .collect();
        let found = covering
            .iter()
            .find(|c| c.status == CertificateStatus::Issued)
            .or_else(|| {
                covering
                    .iter()
                    .find(|c| c.status == CertificateStatus::PendingValidation)
            });
        Ok(found.copied().cloned())
    }

    async fn describe_certificate(&self, arn: &str) -> DeployResult<CertificateInfo> {
        let state = self.state.lock().unwrap();
        state
            .certificates
            .iter()
            .find(|c| c.arn == arn)
            .cloned()
            .ok_or_else(|| DeployError::NotFound(format!("certificate {arn}")))
    }

    async fn request_certificate(
        &self,
        domain: &str,
        _alternative_names: &[String],
    ) -> DeployResult<CertificateRequest> {
        self.certificate_requests.fetch_add(1, Ordering::SeqCst);
        let arn = self.add_certificate(domain, CertificateStatus::PendingValidation);
        Ok(CertificateRequest {
            arn,
            validation_records: vec![validation_record(domain)],
        })
    }

    async fn create_distribution(
        &self,
        spec: &DistributionSpec,
    ) -> DeployResult<DistributionSummary> {
        let mut state = self.state.lock().unwrap();
        let n = state.distributions.len() + 1;
        let dist = DistributionSummary {
            id: format!("E{n}"),
            domain_name: format!("d{n}abcdef.cloudfront.net"),
            status: "InProgress".to_string(),
            origins: vec![spec.origin.clone()],
            aliases: spec.aliases.clone(),
        };
        state.distributions.push(dist.clone());
        state.created.push(spec.clone());
        Ok(dist)
    }
}

// ── Fixtures ─────────────────────────────────────────────────────

/// Writes `files` (relative path, body) under a fresh temp directory.
pub fn write_site(files: &[(&str, &[u8])]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (relative, body) in files {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, body).unwrap();
    }
    dir
}

pub fn engine(storage: &Arc<FakeStorage>) -> BucketSyncEngine {
    engine_with(storage, SyncOptions::default())
}

pub fn engine_with(storage: &Arc<FakeStorage>, options: SyncOptions) -> BucketSyncEngine {
    let storage: Arc<dyn StorageCollaborator> = storage.clone();
    BucketSyncEngine::new(storage, options)
}

/// Website bucket config in us-east-1 with default documents.
pub fn website_bucket(name: &str) -> BucketConfig {
    BucketConfig::website(name, &DeployConfig::default())
}
