//! Datahead CoAP node
//!
//! Serves the temperature on `/dh/tmp` (GET and Observe), greets the
//! collector once, and reports every 20 seconds.

use clap::Parser;
use dh_core::{resolve_sensor, HwmonRegistry, SimulatedRegistry};
use dh_node::{init_logging, run_networked, simulated_sensor, CommonArgs, NetworkArgs};
use tracing::info;

/// Report temperature to a Datahead collector over CoAP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    network: NetworkArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.common.log_level)?;

    let config = args.network.node_config(&args.common);
    info!("Datahead node {:?} starting", config.name);

    if let Some(simulated) = simulated_sensor(&args.common, &config.sensor.name) {
        let registry = SimulatedRegistry::new().with(simulated);
        let sensor = resolve_sensor(&registry, &config.sensor.name)?;
        run_networked(&config, sensor).await?;
        return Ok(());
    }

    let registry = HwmonRegistry::new(&config.sensor.sysfs_root);
    let sensor = resolve_sensor(&registry, &config.sensor.name)?;
    run_networked(&config, sensor).await?;
    Ok(())
}
