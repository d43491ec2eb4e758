//! Datahead mesh node
//!
//! Joins the mesh (local address, serial-tunnel neighbor, routing
//! instance), then behaves like the `datahead` node.

use clap::Parser;
use dh_core::{resolve_sensor, HwmonRegistry, SimulatedRegistry};
use dh_node::{init_logging, run_networked, simulated_sensor, CommonArgs, MeshArgs, NetworkArgs};
use tracing::info;

/// Join a mesh and report temperature to a Datahead collector
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    network: NetworkArgs,

    #[command(flatten)]
    mesh: MeshArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.common.log_level)?;

    let mesh_config = args.mesh.mesh_config();
    info!(
        "Datahead mesh node {:?} starting on {}",
        args.network.name, mesh_config.iface
    );
    let config = args.network.node_config(&args.common).with_mesh(mesh_config);

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
