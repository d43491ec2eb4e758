//! Shared plumbing for the Datahead node binaries

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use dh_core::hwmon::DEFAULT_SYSFS_ROOT;
use dh_core::{MeshConfig, Node, NodeConfig, SensorSource, SimulatedSensor, StartupError};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Options common to every variant
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// sysfs mount point holding the hwmon devices
    #[arg(long, default_value = DEFAULT_SYSFS_ROOT)]
    pub sysfs_root: PathBuf,

    /// Use a simulated sensor with this constant reading (hundredths of °C)
    #[arg(long, allow_negative_numbers = true)]
    pub simulate: Option<i16>,
}

/// Options of the networked variants
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Node name announced to the collector
    #[arg(short, long, default_value = "datahead-node")]
    pub name: String,

    /// Sensor name to look up
    #[arg(short, long, default_value = "jc42")]
    pub sensor: String,

    /// Local CoAP address
    #[arg(long, default_value = "[::]:5683")]
    pub listen: SocketAddr,

    /// Collector address
    #[arg(long, default_value = "fd00:bbbb::1")]
    pub peer_addr: String,

    /// Collector port
    #[arg(long, default_value = "5683")]
    pub peer_port: String,
}

/// Options of the mesh variant
#[derive(Args, Debug)]
pub struct MeshArgs {
    /// Mesh interface
    #[arg(long, default_value = "sl0")]
    pub iface: String,

    /// Local mesh address as addr/prefix
    #[arg(long, default_value = "fd00:bbbb::2/64")]
    pub local_addr: String,

    /// Serial-tunnel peer address
    #[arg(long, default_value = "fe80::1")]
    pub tunnel_peer: String,

    /// Routing instance
    #[arg(long, default_value = "0")]
    pub instance_id: u8,

    /// Join as a leaf instead of routing root
    #[arg(long)]
    pub leaf: bool,
}

impl NetworkArgs {
    pub fn node_config(&self, common: &CommonArgs) -> NodeConfig {
        NodeConfig::new(self.name.clone())
            .with_sensor(self.sensor.clone())
            .with_sysfs_root(common.sysfs_root.clone())
            .with_listen(self.listen)
            .with_peer(self.peer_addr.clone(), self.peer_port.clone())
    }
}

impl MeshArgs {
    pub fn mesh_config(&self) -> MeshConfig {
        MeshConfig {
            iface: self.iface.clone(),
            local_addr: self.local_addr.clone(),
            tunnel_peer: self.tunnel_peer.clone(),
            instance_id: self.instance_id,
            root: !self.leaf,
        }
    }
}

/// Parse an I2C address given in hex, with or without a single `0x` prefix
pub fn parse_i2c_addr(s: &str) -> Result<u16, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid I2C address {:?}: {}", s, e))
}

/// Simulated sensor registered as `name`, when `--simulate` was given
pub fn simulated_sensor(common: &CommonArgs, name: &str) -> Option<SimulatedSensor> {
    common.simulate.map(|value| {
        info!("Simulating sensor {:?} at {}", name, value);
        SimulatedSensor::constant(name, value)
    })
}

/// Install the global fmt subscriber
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let subscriber = fmt().with_env_filter(filter).with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Shutdown signal flipped by Ctrl-C
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!("Cannot listen for Ctrl-C: {}", e);
                // Keep the sender alive so the loop runs on
                std::future::pending::<()>().await;
            }
        }
    });

    shutdown_rx
}

/// Run a local (non-networked) node until Ctrl-C
pub async fn run_local<S: SensorSource>(sensor: S, period: Duration) {
    let shutdown = shutdown_on_ctrl_c();
    Node::local(sensor, period).run(shutdown).await;
}

/// Start a networked node and run it until Ctrl-C
///
/// The mesh is bootstrapped first when `config.mesh` is set. Startup errors
/// are logged and returned; the loop is not entered.
pub async fn run_networked<S: SensorSource>(
    config: &NodeConfig,
    sensor: S,
) -> Result<(), StartupError> {
    let node = Node::from_config(config, sensor)
        .await
        .inspect_err(|e| error!("Startup failed: {}", e))?;

    let shutdown = shutdown_on_ctrl_c();
    node.run(shutdown).await;
    Ok(())
}
