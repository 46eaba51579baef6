//! Migration Scout
//!
//! Command line entry point:
//! - `collect`: batch host collection from a CSV worklist
//! - `cloud-info`: dump availability zones, flavors, networks and quota
//! - `cloud-check`: authenticate, locate the local node and check quota
//! - `check-quota`: validate a migration instance against the cloud

use clap::error::ErrorKind;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use migration_scout::collector::DEFAULT_PACKAGE_NAME;
use migration_scout::{
    BatchCollector, CloudDriverRef, CollectorConfig, DriverFactory, Error, MigrationInstance, Result,
    ScoutConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Migration Scout - host inventory and cloud readiness checks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, arg_required_else_help = true)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Shortcut for --log-level debug
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect host information listed in a CSV worklist
    Collect(CollectArgs),
    /// Print the cloud inventory as JSON
    CloudInfo(CloudArgs),
    /// Check authentication, local node registration and quota
    CloudCheck(CloudCheckArgs),
    /// Check placement, quota and fixed IP for a migration instance
    CheckQuota(CheckQuotaArgs),
}

#[derive(ClapArgs, Debug)]
struct CollectArgs {
    /// Host worklist CSV, updated in place
    #[arg(long, env = "HOST_FILE")]
    host_file: PathBuf,

    /// Directory collection output is written under
    #[arg(long, env = "OUTPUT_PATH")]
    output_path: PathBuf,

    /// Collect hosts already marked successful
    #[arg(short, long)]
    force_check: bool,

    /// Collection directory name under the output path
    #[arg(long, default_value = DEFAULT_PACKAGE_NAME)]
    package_name: String,

    /// TCP connect timeout for reachability probes, in seconds
    #[arg(long, default_value = "5")]
    connect_timeout_secs: u64,
}

#[derive(ClapArgs, Debug)]
struct CloudArgs {
    /// YAML file holding the cloud credential
    #[arg(long, short, env = "SCOUT_CONFIG")]
    config: PathBuf,
}

#[derive(ClapArgs, Debug)]
struct CloudCheckArgs {
    #[command(flatten)]
    cloud: CloudArgs,

    /// Also find the instance this host runs as
    #[arg(long)]
    register: bool,
}

#[derive(ClapArgs, Debug)]
struct CheckQuotaArgs {
    #[command(flatten)]
    cloud: CloudArgs,

    /// JSON file describing the migration instance
    #[arg(long)]
    instance: PathBuf,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    init_logging(&args);
    info!("Starting {} {}", migration_scout::NAME, migration_scout::VERSION);

    match run(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Collect(args) => collect(args).await,
        Command::CloudInfo(args) => {
            let driver = driver_from(&args.config)?;
            driver.authenticate().await?;
            print_json(&driver.get_cloud_info().await?)
        }
        Command::CloudCheck(args) => cloud_check(args).await,
        Command::CheckQuota(args) => check_quota(args).await,
    }
}

async fn collect(args: CollectArgs) -> Result<()> {
    let mut config = CollectorConfig::new(args.host_file, args.output_path);
    config.force_check = args.force_check;
    config.package_name = args.package_name;
    config.probe.connect_timeout = std::time::Duration::from_secs(args.connect_timeout_secs);

    let collector = BatchCollector::with_defaults(config);
    let report = collector.collect_hosts().await?;
    info!(
        "Collection written to {} ({} succeeded, {} failed)",
        collector.collection_path().display(),
        report.success_hosts.len(),
        report.failed_hosts.len()
    );
    Ok(())
}

async fn cloud_check(args: CloudCheckArgs) -> Result<()> {
    let driver = driver_from(&args.cloud.config)?;
    let session = driver.authenticate().await?;
    info!("Authenticated to project {}", session.project_id);

    if args.register {
        let node = driver.check_register().await?;
        info!("Local node is instance {} ({})", node.node_id, node.node_mac_addr);
    }

    driver.check_cloud_env().await?;
    print_json(&driver.get_cloud_quota().await?)
}

#[derive(Serialize)]
struct CheckQuotaOutput {
    instance: String,
    ip_addr: migration_scout::IpAddrStatus,
    placement: migration_scout::domain::ResolvedPlacement,
}

async fn check_quota(args: CheckQuotaArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.instance)?;
    let instance: MigrationInstance = serde_json::from_str(&content)?;

    let driver = driver_from(&args.cloud.config)?;
    driver.authenticate().await?;
    let placement = driver.check_instance_params(&instance).await?;
    driver.check_quota(&instance, &placement).await?;
    let ip_addr = driver.check_ip_addr(&instance).await;

    print_json(&CheckQuotaOutput {
        instance: instance.id,
        ip_addr,
        placement,
    })
}

fn driver_from(config_path: &Path) -> Result<CloudDriverRef> {
    let config = ScoutConfig::load(config_path)?;
    let cloud_config = config.cloud_config();
    DriverFactory::create(config.credential, cloud_config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(Error::JsonParse)?;
    println!("{}", json);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = if args.debug {
        Level::DEBUG
    } else {
        match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // stdout carries command output
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
