//! Field telemetry binary
use anyhow::Context;
use clap::Parser;
use terra::{components::prelude::*, utils::logging};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the Fusion Component.
    #[arg(short, long)]
    filepath: String,
    /// Run without GPIO, regardless of what the config says.
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    let mut config = FusionConfig::from_file(&args.filepath)
        .with_context(|| format!("failed to load {}", args.filepath))?;
    if args.simulate {
        config.hardware = Some(false);
    }

    let publisher = MqttPublisher::connect(&config.broker);
    let cycle = FusionCycle::from_config(config, publisher)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("stopped by user");
                signal.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    FusionCycleController::start(cycle, shutdown).await;
    Ok(())
}
