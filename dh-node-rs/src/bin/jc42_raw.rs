//! jc42 raw driver node
//!
//! Opens the jc42 directly by I2C bus and address and prints the
//! temperature every second.

use clap::Parser;
use dh_core::{Jc42Params, NodeConfig, LOCAL_PERIOD};
use dh_node::{init_logging, parse_i2c_addr, run_local, simulated_sensor, CommonArgs};
use tracing::{error, info};

/// Print jc42 readings every second
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// I2C bus number
    #[arg(long, default_value = "0")]
    bus: u8,

    /// I2C device address
    #[arg(long, default_value = "0x18", value_parser = parse_i2c_addr)]
    addr: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.common.log_level)?;

    let config = NodeConfig::new("jc42-raw")
        .with_period(LOCAL_PERIOD)
        .with_sysfs_root(args.common.sysfs_root.clone())
        .with_jc42(Jc42Params {
            bus: args.bus,
            addr: args.addr,
        });

    info!("Initializing sensor...");

    if let Some(sensor) = simulated_sensor(&args.common, &config.sensor.name) {
        run_local(sensor, config.period).await;
        return Ok(());
    }

    let sensor = config.sensor.open_jc42().inspect_err(|e| {
        error!("Failed: {}", e);
    })?;

    run_local(sensor, config.period).await;
    Ok(())
}
