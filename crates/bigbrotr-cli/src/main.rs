//! bigbrotr: the single binary that runs each of the five services (§6
//! "Control surface"). Subcommand selects the service; everything else
//! (interval, pool, per-service tuning) comes from the YAML file named by
//! `--config`.

use bigbrotr_core::service::{install_signal_handlers, run_forever, Service, ServiceConfig};
use bigbrotr_services::{Finder, FinderConfig, Monitor, MonitorConfig, Seeder, SeederConfig, Synchronizer, SynchronizerConfig, Validator, ValidatorConfig};
use bigbrotr_store::{build_pool, run_migrations, Store};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bigbrotr", about = "BigBrotr: Nostr relay ecosystem archiver and monitor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Overrides RUST_LOG. Accepts tracing-subscriber filter syntax.
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(clap::Args)]
struct ServiceArgs {
    /// Path to this service's YAML config file.
    #[arg(long)]
    config: PathBuf,
    /// Run a single cycle and exit instead of looping forever.
    #[arg(long)]
    once: bool,
    /// Directory of `*.sql` migrations to apply before starting. Skipped
    /// if not given.
    #[arg(long)]
    migrations_dir: Option<PathBuf>,
    /// Synchronizer only: `index/count` selecting this process's disjoint
    /// relay subset for the multi-process variant (§5), overriding any
    /// `shard` set in the config file.
    #[arg(long, value_name = "INDEX/COUNT")]
    shard: Option<String>,
}

fn parse_shard_arg(raw: &str) -> Result<bigbrotr_services::synchronizer::ShardConfig, String> {
    let (index, count) = raw.split_once('/').ok_or_else(|| format!("--shard must be INDEX/COUNT, got {raw:?}"))?;
    let index: u32 = index.parse().map_err(|_| format!("--shard index {index:?} is not a valid integer"))?;
    let count: u32 = count.parse().map_err(|_| format!("--shard count {count:?} is not a valid integer"))?;
    Ok(bigbrotr_services::synchronizer::ShardConfig { count, index })
}

#[derive(Subcommand)]
enum Command {
    Seeder(ServiceArgs),
    Finder(ServiceArgs),
    Validator(ServiceArgs),
    Monitor(ServiceArgs),
    Synchronizer(ServiceArgs),
}

fn init_tracing(log_level: Option<&str>) {
    let filter = log_level.map(EnvFilter::new).unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

fn load_config<T: DeserializeOwned + ServiceConfig>(path: &PathBuf) -> Result<T, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("reading {path:?}: {e}"))?;
    let config: T = serde_yaml::from_str(&raw).map_err(|e| format!("parsing {path:?}: {e}"))?;
    config.validate().map_err(|errors| {
        errors.iter().map(|e| format!("{}: {}", e.field, e.reason)).collect::<Vec<_>>().join("; ")
    })?;
    Ok(config)
}

fn init_metrics(metrics: &bigbrotr_core::service::MetricsConfig) {
    if !metrics.enabled {
        return;
    }
    let addr: std::net::SocketAddr = format!("{}:{}", metrics.host, metrics.port).parse().expect("metrics host:port must parse as a socket address");
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr).install() {
        tracing::warn!(error = %e, "failed to install prometheus exporter, continuing without metrics");
    } else {
        tracing::info!(%addr, path = %metrics.path, "metrics endpoint listening");
    }
}

/// Runs one cycle or loops forever per `args.once`, mapping the result to
/// the exit-code contract in §6: 0 on clean shutdown, nonzero on a fatal
/// config or circuit-breaker failure.
async fn drive(service: &dyn Service, args: &ServiceArgs, token: CancellationToken) -> ExitCode {
    if args.once {
        match service.run_once(&token).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(bigbrotr_core::service::ServiceError::Cancelled) => ExitCode::SUCCESS,
            Err(bigbrotr_core::service::ServiceError::Failed(message)) => {
                tracing::error!(service = service.name(), error = %message, "single cycle failed");
                ExitCode::FAILURE
            }
        }
    } else {
        match run_forever(service, token).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(()) => ExitCode::FAILURE,
        }
    }
}

async fn store_for(args: &ServiceArgs, common: &bigbrotr_core::service::CommonConfig) -> Result<Store, String> {
    let pool = build_pool(&common.pool).await.map_err(|e| e.to_string())?;
    if let Some(dir) = &args.migrations_dir {
        let applied = run_migrations(&pool, dir).await.map_err(|e| e.to_string())?;
        tracing::info!(applied, "migrations applied");
    }
    Ok(Store::new(pool))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    let token = install_signal_handlers();

    let result = match &cli.command {
        Command::Seeder(args) => run_seeder(args, token).await,
        Command::Finder(args) => run_finder(args, token).await,
        Command::Validator(args) => run_validator(args, token).await,
        Command::Monitor(args) => run_monitor(args, token).await,
        Command::Synchronizer(args) => run_synchronizer(args, token).await,
    };

    match result {
        Ok(code) => code,
        Err(message) => {
            tracing::error!(error = %message, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

async fn run_seeder(args: &ServiceArgs, token: CancellationToken) -> Result<ExitCode, String> {
    let config: SeederConfig = load_config(&args.config)?;
    init_metrics(&config.common.metrics);
    let store = store_for(args, &config.common).await?;
    let service = Seeder::new(config, store);
    Ok(drive(&service, args, token).await)
}

async fn run_finder(args: &ServiceArgs, token: CancellationToken) -> Result<ExitCode, String> {
    let config: FinderConfig = load_config(&args.config)?;
    init_metrics(&config.common.metrics);
    let store = store_for(args, &config.common).await?;
    let service = Finder::new(config, store);
    Ok(drive(&service, args, token).await)
}

async fn run_validator(args: &ServiceArgs, token: CancellationToken) -> Result<ExitCode, String> {
    let config: ValidatorConfig = load_config(&args.config)?;
    init_metrics(&config.common.metrics);
    let store = store_for(args, &config.common).await?;
    let service = Validator::new(config, store);
    Ok(drive(&service, args, token).await)
}

async fn run_monitor(args: &ServiceArgs, token: CancellationToken) -> Result<ExitCode, String> {
    let config: MonitorConfig = load_config(&args.config)?;
    init_metrics(&config.common.metrics);
    let store = store_for(args, &config.common).await?;
    let service = Monitor::new(config, store)?;
    Ok(drive(&service, args, token).await)
}

async fn run_synchronizer(args: &ServiceArgs, token: CancellationToken) -> Result<ExitCode, String> {
    let mut config: SynchronizerConfig = load_config(&args.config)?;
    if let Some(raw) = &args.shard {
        config.shard = Some(parse_shard_arg(raw)?);
    }
    init_metrics(&config.common.metrics);
    let store = store_for(args, &config.common).await?;
    let service = Synchronizer::new(config, store);
    Ok(drive(&service, args, token).await)
}
