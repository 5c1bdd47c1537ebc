//! sitedeploy CLI
//!
//! Deploys static websites to S3 and provisions DNS and CDN in front of them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sitedeploy_cloud::endpoints;
use sitedeploy_cloud::*;

/// Exit code when provisioning waits on external validation.
const EXIT_PENDING: u8 = 2;

#[derive(Parser)]
#[command(name = "sitedeploy")]
#[command(about = "Deploy static websites to AWS")]
#[command(version)]
struct Cli {
    /// Credentials profile to use
    #[arg(long, global = true, env = "AWS_PROFILE")]
    profile: Option<String>,

    /// Region for new buckets
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// S3-compatible endpoint (e.g. MinIO)
    #[arg(long, global = true, env = "SITEDEPLOY_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// JSON config file
    #[arg(long, global = true, env = "SITEDEPLOY_CONFIG")]
    config: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all buckets
    ListBuckets,
    /// List objects in a bucket
    ListBucketObjects {
        /// Bucket name
        bucket: String,
    },
    /// Create and configure a website bucket
    SetupBucket {
        /// Bucket name
        bucket: String,
    },
    /// Sync a directory into a bucket
    Sync {
        /// Local site root
        path: PathBuf,
        /// Bucket name
        bucket: String,
        /// Print the change-set without uploading
        #[arg(long)]
        dry_run: bool,
        /// Delete remote objects with no local file
        #[arg(long)]
        delete_orphans: bool,
        /// Maximum concurrent uploads
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Stop scheduling uploads after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Point a domain at a bucket's website endpoint
    SetupDns {
        /// Record name, e.g. www.example.com
        domain: String,
        /// Bucket name (must equal the domain)
        bucket: String,
    },
    /// Put a CDN distribution in front of the bucket named after the domain
    SetupCdn {
        /// Domain served by the distribution
        domain: String,
    },
    /// Sync content and provision bucket, DNS and CDN in one run
    Deploy {
        /// Local site root
        path: PathBuf,
        /// Bucket name
        bucket: String,
        /// Alias the bucket website under this domain
        #[arg(long)]
        domain: Option<String>,
        /// Also provision a CDN distribution for the domain
        #[arg(long, requires = "domain")]
        cdn: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> Result<DeployConfig> {
    let mut config = match cli.config {
        Some(ref path) => {
            let path = shellexpand::tilde(path).to_string();
            DeployConfig::from_json_file(Path::new(&path))
                .with_context(|| format!("loading config from {path}"))?
        }
        None => DeployConfig::default(),
    };

    if let Some(ref profile) = cli.profile {
        config.profile = Some(profile.clone());
    }
    if let Some(ref region) = cli.region {
        config.region = region.clone();
    }
    if let Some(ref endpoint) = cli.endpoint_url {
        config.endpoint_override = Some(endpoint.clone());
    }
    if let Commands::Sync {
        delete_orphans,
        concurrency,
        ..
    } = cli.command
    {
        config.delete_orphans |= delete_orphans;
        if let Some(n) = concurrency {
            config.max_concurrent_uploads = n;
        }
    }

    config.validate()?;
    Ok(config)
}

/// Collaborators built from one session.
struct Services {
    storage: Arc<dyn StorageCollaborator>,
    session: AwsSession,
}

impl Services {
    async fn connect(config: &DeployConfig) -> Result<Self> {
        let session = AwsSession::load(config)
            .await
            .context("resolving AWS credentials")?;
        let storage: Arc<dyn StorageCollaborator> =
            Arc::new(S3Transport::new(&session, config.multipart_chunk_size));
        Ok(Self { storage, session })
    }

    fn engine(&self, config: &DeployConfig) -> BucketSyncEngine {
        BucketSyncEngine::new(Arc::clone(&self.storage), SyncOptions::from(config))
    }

    fn provisioner(&self, config: &DeployConfig) -> DistributionProvisioner {
        DistributionProvisioner::new(
            self.engine(config),
            Arc::new(Route53Dns::new(&self.session)),
            Arc::new(CloudFrontCdn::new(&self.session)),
        )
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    let services = Services::connect(&config).await?;

    match cli.command {
        Commands::ListBuckets => {
            for bucket in services.storage.list_buckets().await? {
                match bucket.created_at {
                    Some(created) => println!("{}\t{}", bucket.name, created.to_rfc3339()),
                    None => println!("{}", bucket.name),
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::ListBucketObjects { bucket } => {
            for object in services.storage.list_objects(&bucket).await?.values() {
                println!("{}\t{}\t{}", object.key, object.size, object.fingerprint);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::SetupBucket { bucket } => {
            let plan = ProvisioningPlan::new(BucketConfig::website(&bucket, &config));
            let report = services.provisioner(&config).run(&plan).await;
            if report.state.is_complete() {
                if let Some(url) = website_url_for(services.storage.as_ref(), &bucket).await {
                    println!("{url}");
                }
            }
            Ok(finish(&report))
        }

        Commands::Sync {
            path,
            bucket,
            dry_run,
            timeout_secs,
            ..
        } => {
            let path = expand_path(&path);
            let engine = services.engine(&config);
            if dry_run {
                let changes = engine.plan_sync(&path, &bucket).await?;
                print_change_set(&changes);
                return Ok(ExitCode::SUCCESS);
            }

            let cancel = spawn_cancel_signal(timeout_secs.map(Duration::from_secs));
            let report = engine
                .sync_directory_with_cancel(&path, &bucket, cancel)
                .await?;
            print_sync_report(&report);

            if report.is_success() {
                if let Some(url) = website_url_for(services.storage.as_ref(), &bucket).await {
                    println!("{url}");
                }
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }

        Commands::SetupDns { domain, bucket } => {
            let plan = ProvisioningPlan::new(BucketConfig::website(&bucket, &config)).with_domain(
                DomainRecord {
                    name: domain,
                    create_zone: true,
                },
            );
            let report = services.provisioner(&config).run(&plan).await;
            Ok(finish(&report))
        }

        Commands::SetupCdn { domain } => {
            let plan = ProvisioningPlan::new(BucketConfig::website(&domain, &config)).with_cdn(
                CdnConfig {
                    aliases: vec![domain.clone()],
                    certificate_arn: None,
                },
            );
            let report = services.provisioner(&config).run(&plan).await;
            Ok(finish(&report))
        }

        Commands::Deploy {
            path,
            bucket,
            domain,
            cdn,
        } => {
            let mut plan = ProvisioningPlan::new(BucketConfig::website(&bucket, &config))
                .with_content(expand_path(&path));
            if let Some(domain) = domain {
                if cdn {
                    plan = plan.with_cdn(CdnConfig {
                        aliases: vec![domain.clone()],
                        certificate_arn: None,
                    });
                }
                plan = plan.with_domain(DomainRecord {
                    name: domain,
                    create_zone: true,
                });
            }

            let report = services.provisioner(&config).run(&plan).await;
            if let Some(ref sync) = report.sync {
                print_sync_report(sync);
            }
            Ok(finish(&report))
        }
    }
}

/// Expands a leading `~` in a user-supplied path.
fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(raw) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
        None => path.to_path_buf(),
    }
}

/// Website URL of `bucket`, or `None` if its region cannot be resolved.
async fn website_url_for(storage: &dyn StorageCollaborator, bucket: &str) -> Option<String> {
    let url = storage
        .bucket_region(bucket)
        .await
        .and_then(|region| endpoints::website_url(bucket, &region));
    match url {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("could not determine website URL for {bucket}: {e}");
            None
        }
    }
}

/// Fires on Ctrl-C or after `timeout`, whichever comes first.
fn spawn_cancel_signal(timeout: Option<Duration>) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("interrupted, finishing in-flight uploads"),
            _ = deadline => warn!("timeout reached, finishing in-flight uploads"),
            _ = tx.closed() => return,
        }
        let _ = tx.send(true);
    });
    rx
}

fn print_change_set(changes: &ChangeSet) {
    for entry in changes.uploads() {
        let verb = if entry.previous.is_some() { "update" } else { "upload" };
        println!("{verb}\t{}\t{}", entry.key(), entry.local.content_type);
    }
    for orphan in &changes.orphans {
        println!("orphan\t{}", orphan.key);
    }
    for error in &changes.unreadable {
        eprintln!("unreadable\t{}\t{}", error.key, error.message);
    }
    println!(
        "{} to upload, {} up to date, {} orphaned",
        changes.upload_count(),
        changes.skip_count(),
        changes.orphans.len()
    );
}

fn print_sync_report(report: &SyncReport) {
    for object in &report.uploaded {
        println!("uploaded\t{}\t{}", object.key, object.content_type);
    }
    for key in &report.deleted {
        println!("deleted\t{key}");
    }
    println!(
        "{} uploaded, {} skipped, {} orphaned, {} deleted",
        report.uploaded_count(),
        report.skipped_count(),
        report.orphaned_count(),
        report.deleted.len()
    );

    if !report.errors.is_empty() {
        eprintln!("{} file(s) failed:", report.errors.len());
        for error in &report.errors {
            eprintln!("  {} [{}]: {}", error.key, error.kind, error.message);
        }
    }
    if report.was_cancelled() {
        eprintln!("sync cancelled");
        if !report.not_attempted.is_empty() {
            eprintln!("{} upload(s) not attempted:", report.not_attempted.len());
            for key in &report.not_attempted {
                eprintln!("  {key}");
            }
        }
        if !report.deletions_not_attempted.is_empty() {
            eprintln!(
                "{} orphan deletion(s) not attempted:",
                report.deletions_not_attempted.len()
            );
            for key in &report.deletions_not_attempted {
                eprintln!("  {key}");
            }
        }
    }
}

/// Prints the stage summary and maps the final state to an exit code.
fn finish(report: &ProvisioningReport) -> ExitCode {
    for stage in &report.stages {
        info!("{}: {:?} ({})", stage.stage, stage.status, stage.detail);
    }

    match report.state {
        ProvisioningState::Complete => {
            println!("provisioning complete");
            ExitCode::SUCCESS
        }
        ProvisioningState::Pending { stage, ref reason } => {
            println!("pending at {stage}: {reason}");
            println!("re-run the same command once validation completes");
            ExitCode::from(EXIT_PENDING)
        }
        ProvisioningState::Failed { stage, ref reason } => {
            eprintln!("failed at {stage}: {reason}");
            ExitCode::FAILURE
        }
        ref other => {
            eprintln!("provisioning stopped in state {other}");
            ExitCode::FAILURE
        }
    }
}
