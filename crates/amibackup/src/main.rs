//! amibackup: cross-region EC2 AMI backups with tiered retention
//!
//! Creates an AMI of every instance carrying a given `Name` tag, copies it
//! to a second region, and prunes older backups according to retention
//! windows. Meant to be run from cron; `--nagios` turns the output into a
//! monitoring check.

use amibackup::aws::{AwsContext, Ec2Client, FromAwsContext};
use amibackup::config::{BackupConfig, Encryption, ImageOptions, RegionPair, RunFlags};
use amibackup::error::{ConfigError, RunError};
use amibackup::report::{self, RunReport};
use amibackup::{catalog, orchestrator, retention};
use amibackup_common::Disposition;
use amibackup_common::defaults::{
    DEFAULT_DEST_REGION, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SOURCE_REGION, DEFAULT_TIMEOUT_SECS,
    is_known_region,
};
use anyhow::{Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// SDK crates whose logs are capped at `warn`
const NOISY_TARGETS: &[&str] = &[
    "aws_config",
    "aws_sdk_ec2",
    "aws_smithy_runtime",
    "aws_smithy_runtime_api",
    "hyper",
];

#[derive(Parser, Debug)]
#[command(name = "amibackup")]
#[command(about = "Cross-region EC2 AMI backups with tiered retention")]
#[command(version)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

/// Arguments for the backup command (extracted to reduce enum size)
#[derive(clap::Args, Debug)]
struct BackupArgs {
    /// Instance Name tag values to back up
    #[arg(required = true, value_name = "NAME")]
    names: Vec<String>,

    /// Region of the running instances
    #[arg(short, long, default_value = DEFAULT_SOURCE_REGION)]
    source: String,

    /// Region the backup copies are stored in
    #[arg(long, default_value = DEFAULT_DEST_REGION)]
    dest: String,

    /// Global timeout in seconds for creating and copying images
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Keep one image per INTERVAL between START and END ago (e.g. 1d:1d:7d)
    #[arg(short = 'p', long = "purge", value_name = "INTERVAL:START:END")]
    windows: Vec<String>,

    /// Log what would be pruned or created without doing it
    #[arg(long)]
    dry_run: bool,

    /// Prune old images and exit without creating new ones
    #[arg(long)]
    prune_only: bool,

    /// Device name to leave out of the image, repeatable (e.g. /dev/sdb)
    #[arg(long = "ignore-device", value_name = "DEVICE")]
    ignore_devices: Vec<String>,

    /// Encrypt the cross-region copy
    #[arg(long)]
    encrypt: bool,

    /// KMS key ARN in the destination region for the copy (implies --encrypt)
    #[arg(long, value_name = "ARN")]
    kms_key_id: Option<String>,

    /// Let EC2 reboot the instance before imaging
    #[arg(long)]
    reboot: bool,

    /// Seconds between image state checks
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval: u64,

    /// AWS profile to use (overrides AWS_PROFILE env var)
    #[arg(long)]
    aws_profile: Option<String>,

    /// Print a single monitoring status line instead of the summary
    #[arg(short, long)]
    nagios: bool,

    /// Output JSON file for the run report
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl BackupArgs {
    /// Everything but the retention windows, which need the invocation time
    fn to_config(&self) -> BackupConfig {
        BackupConfig {
            targets: self.names.clone(),
            regions: RegionPair::new(&self.source, &self.dest),
            windows: Vec::new(),
            image: ImageOptions {
                no_reboot: !self.reboot,
                excluded_devices: self.ignore_devices.clone(),
            },
            encryption: Encryption::new(self.encrypt, self.kms_key_id.clone()),
            flags: RunFlags {
                dry_run: self.dry_run,
                prune_only: self.prune_only,
                timeout: Duration::from_secs(self.timeout),
                poll_interval: Duration::from_secs(self.poll_interval),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prune old backups, then back up and replicate matching instances
    Backup(Box<BackupArgs>),

    /// List the matching instances and their managed backups, newest first
    Inventory {
        /// Instance Name tag value
        name: String,

        /// Region of the original images
        #[arg(short, long, default_value = DEFAULT_SOURCE_REGION)]
        source: String,

        /// Region of the copies
        #[arg(long, default_value = DEFAULT_DEST_REGION)]
        dest: String,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// AWS profile to use (overrides AWS_PROFILE env var)
        #[arg(long)]
        aws_profile: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    let disposition = match args.command {
        Command::Backup(backup_args) => handle_backup(*backup_args).await,
        Command::Inventory {
            name,
            source,
            dest,
            format,
            aws_profile,
        } => match handle_inventory(&name, &source, &dest, format, aws_profile.as_deref()).await {
            Ok(()) => Disposition::Ok,
            Err(e) => {
                print_error(&e);
                Disposition::Critical
            }
        },
    };
    ExitCode::from(disposition.exit_code())
}

fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let mut filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    for target in NOISY_TARGETS {
        if let Ok(directive) = format!("{}=warn", target).parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }
}

async fn handle_backup(args: BackupArgs) -> Disposition {
    let mut config = args.to_config();
    let mut report = RunReport::new(&config);

    if let Err(e) = run_backup(&args, &mut config, &mut report).await {
        error!(error = %e, "Run aborted");
        report.abort(e);
    }

    if let Some(path) = &args.output {
        if let Err(e) = report.write_json(path) {
            print_error(&e);
            report.warn(format!("{:#}", e));
        }
    }

    if args.nagios {
        println!("{}", report.status_line());
    } else {
        println!("{}", report.summary());
    }
    report.disposition()
}

async fn run_backup(
    args: &BackupArgs,
    config: &mut BackupConfig,
    report: &mut RunReport,
) -> Result<(), RunError> {
    config.windows =
        retention::parse_windows(&args.windows, Utc::now()).map_err(ConfigError::from)?;
    config.validate()?;
    for window in &config.windows {
        debug!(
            window = %window,
            start = %window.start(),
            stop = %window.stop(),
            interval_secs = window.interval().num_seconds(),
            "Retention window"
        );
    }

    let profile = args.aws_profile.as_deref();
    if let Some(profile) = profile {
        info!(profile = %profile, "Using AWS profile");
    }
    let source_ctx = AwsContext::with_profile(config.source_region(), profile).await;
    source_ctx
        .probe_credentials()
        .await
        .map_err(|e| ConfigError::MissingCredentials {
            region: config.source_region().to_string(),
            message: format!("{:#}", e),
        })?;
    let dest_ctx = AwsContext::with_profile(config.dest_region(), profile).await;

    info!(
        targets = ?config.targets,
        source = %config.source_region(),
        dest = %config.dest_region(),
        windows = config.windows.len(),
        purge_regions = ?config.regions.purge_regions(),
        dry_run = config.dry_run(),
        prune_only = config.prune_only(),
        "Starting backup run"
    );

    let source = Arc::new(Ec2Client::from_aws_context(&source_ctx));
    let dest = Arc::new(Ec2Client::from_aws_context(&dest_ctx));
    orchestrator::run(source, dest, config, report).await
}

/// Handle the inventory command
async fn handle_inventory(
    name: &str,
    source: &str,
    dest: &str,
    format: OutputFormat,
    profile: Option<&str>,
) -> Result<()> {
    let mut regions = vec![source];
    if dest != source {
        regions.push(dest);
    }

    let mut instances = Vec::new();
    let mut inventories = Vec::new();
    for region in regions {
        if !is_known_region(region) {
            bail!("unknown region '{}'", region);
        }
        let ctx = AwsContext::with_profile(region, profile).await;
        let ec2 = Ec2Client::from_aws_context(&ctx);
        if region == source {
            instances = catalog::find_instances(&ec2, name).await?;
        }
        inventories.push(catalog::list_managed_images(&ec2, name).await?);
    }

    match instances.len() {
        0 => warn!(region = %source, name = %name, "No instances with matching Name tag"),
        1 => {}
        count => warn!(region = %source, name = %name, count, "Multiple instances with matching Name tag"),
    }

    match format {
        OutputFormat::Json => {
            let listing = serde_json::json!({
                "instances": instances,
                "inventories": inventories,
            });
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        OutputFormat::Table => {
            if !instances.is_empty() {
                println!("{}", report::instance_table(source, &instances));
            }
            let total: usize = inventories.iter().map(|i| i.len()).sum();
            if total == 0 {
                println!("No managed images found for {}.", name);
                return Ok(());
            }
            println!("{}", report::inventory_table(&inventories));
            for inventory in &inventories {
                println!(
                    "{}: {} image(s), {} unmanaged skipped",
                    inventory.region,
                    inventory.len(),
                    inventory.skipped.len()
                );
            }
        }
    }
    Ok(())
}
