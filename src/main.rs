// src/main.rs - Heat pump controller host entry point.
use clap::Parser;
use pumphost::config;
use pumphost::host::Host;
use tokio::time::MissedTickBehavior;

#[derive(Parser, Debug)]
#[command(name = "pumphost", about = "Residential heat pump controller host")]
struct Args {
    /// Configuration file path
    #[arg(default_value = "pumphost.toml")]
    config: String,

    /// Run a single control cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    tracing::info!("Starting pumphost");
    tracing::info!("Loading configuration from: {}", args.config);

    let config = config::load_config(&args.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", args.config, e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    tracing::info!(
        "Gains kp={} ki={} kd={}, cycle every {} s",
        config.controller.kp,
        config.controller.ki,
        config.controller.kd,
        config.host.cycle_seconds
    );

    let cycle_seconds = config.host.cycle_seconds;
    let mut host = match Host::from_config(config) {
        Ok(host) => host,
        Err(e) => {
            tracing::error!("Failed to initialize host: {}", e);
            return Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>);
        }
    };

    // Cycles are serialized by construction: the next tick is not awaited
    // until the previous cycle has completed.
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(cycle_seconds));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let command = host.run_cycle().await;
        tracing::info!("Cycle complete, command {}", command);
        if args.once {
            break;
        }
    }

    Ok(())
}
