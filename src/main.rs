use std::path::PathBuf;

use carbon_publisher::carbon_aware::{CarbonIntensityEstimator, GenerationProvider};
use carbon_publisher::config::{self, AppConfig};
use carbon_publisher::publisher::{MqttBroker, PublishLoop};
use carbon_publisher::telemetry::{init_logging, LogFormat};
use carbon_publisher::Error;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short, global = true, env = "CARBON_PUBLISHER_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Estimate and publish carbon intensity until interrupted
    Run(RunArgs),
    /// Compute one estimate and print it
    Estimate(EstimateArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct ProviderArgs {
    /// Zone name, short code or EIC code (overrides provider.zone)
    #[arg(long, env = "CARBON_ZONE")]
    zone: Option<String>,

    /// ENTSO-E security token (overrides the credentials file)
    #[arg(long, env = "ENTSOE_KEY", hide_env_values = true)]
    entsoe_key: Option<String>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    provider: ProviderArgs,

    /// Broker host (overrides broker.host)
    #[arg(long, env = "MQTT_BROKER")]
    broker_host: Option<String>,

    /// Broker port (overrides broker.port)
    #[arg(long, env = "MQTT_PORT")]
    broker_port: Option<u16>,

    /// Publishes per estimate (overrides cadence.repeat_count)
    #[arg(long)]
    repeat_count: Option<u32>,

    /// Seconds between publishes (overrides cadence.interval_secs)
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[derive(Parser, Debug)]
struct EstimateArgs {
    #[command(flatten)]
    provider: ProviderArgs,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    if let Commands::Version = args.command {
        println!("Carbon Publisher v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_logging(args.log_format);
    let mut config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Commands::Run(run_args) => {
            apply_provider_args(&mut config, &run_args.provider);
            if let Some(host) = run_args.broker_host {
                config.broker.host = host;
            }
            if let Some(port) = run_args.broker_port {
                config.broker.port = port;
            }
            if let Some(repeat_count) = run_args.repeat_count {
                config.cadence.repeat_count = repeat_count;
            }
            if let Some(interval_secs) = run_args.interval_secs {
                config.cadence.interval_secs = interval_secs;
            }
            config.validate()?;
            run_publisher(config, run_args.provider.entsoe_key).await
        }
        Commands::Estimate(estimate_args) => {
            apply_provider_args(&mut config, &estimate_args.provider);
            config.validate()?;
            run_estimate(config, estimate_args).await
        }
        Commands::Version => Ok(()),
    }
}

fn apply_provider_args(config: &mut AppConfig, args: &ProviderArgs) {
    if let Some(zone) = &args.zone {
        config.provider.zone = zone.clone();
    }
}

async fn run_publisher(config: AppConfig, credential: Option<String>) -> Result<(), Error> {
    info!("Starting Carbon Publisher v{}", env!("CARGO_PKG_VERSION"));

    let hostname = config::local_hostname();
    let estimator = CarbonIntensityEstimator::new(config.provider.build(credential)?);
    let broker = MqttBroker::new(
        config.broker.client_id(&hostname),
        config.broker.keep_alive(),
        config.broker.connect_timeout(),
    );

    let mut publish_loop = PublishLoop::new(&config, &hostname, estimator, broker);
    info!("Node {} publishes on {}", hostname, publish_loop.topic());
    let result = publish_loop.run(shutdown_signal()).await;
    if result.is_ok() {
        info!("Carbon Publisher stopped");
    }
    result
}

async fn run_estimate(config: AppConfig, args: EstimateArgs) -> Result<(), Error> {
    let estimator =
        CarbonIntensityEstimator::new(config.provider.build(args.provider.entsoe_key)?);
    info!(
        "Estimating carbon intensity for zone {} from {}",
        config.provider.zone,
        estimator.provider().name()
    );
    let result = estimator
        .compute_carbon_intensity(&config.provider.zone)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{} {:.2} gCO2eq/kWh at {} (profile {})",
            result.zone, result.carbon_intensity, result.timestamp, result.factor_profile
        );
    }
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
