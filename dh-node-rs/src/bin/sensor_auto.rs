//! Autodetecting sensor node
//!
//! Finds the temperature sensor by name among the available hwmon devices
//! and prints the temperature every second.

use clap::Parser;
use dh_core::{resolve_sensor, HwmonRegistry, SimulatedRegistry, LOCAL_PERIOD};
use dh_node::{init_logging, run_local, simulated_sensor, CommonArgs};
use tracing::info;

/// Print readings of a sensor found by name
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Sensor name to look up
    #[arg(short, long, default_value = "jc42")]
    sensor: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.common.log_level)?;

    info!("Looking up sensor {:?}", args.sensor);

    if let Some(simulated) = simulated_sensor(&args.common, &args.sensor) {
        let registry = SimulatedRegistry::new().with(simulated);
        let sensor = resolve_sensor(&registry, &args.sensor)?;
        run_local(sensor, LOCAL_PERIOD).await;
        return Ok(());
    }

    let registry = HwmonRegistry::new(&args.common.sysfs_root);
    let sensor = resolve_sensor(&registry, &args.sensor)?;
    run_local(sensor, LOCAL_PERIOD).await;
    Ok(())
}
