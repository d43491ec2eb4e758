//! Datahead Core Library
//!
//! Periodic temperature sampling for jc42 sensor nodes, published through a
//! CoAP resource (pull) and Observe notifications (push) to a remote
//! Datahead collector.
//!
//! ## Architecture
//!
//! ```text
//!  SensorSource ──► Reporter (every period) ──► PushNotifier ──► observers
//!   (hwmon / sim)        │
//!                        └─► latest sample ──► PullResponder ◄── GET /dh/tmp
//!
//!  Startup: sensor lookup → [mesh bootstrap] → CoAP endpoint → greeting
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use dh_core::{HwmonRegistry, Node, NodeConfig, resolve_sensor};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::new("node-1").with_peer("fd00:bbbb::1", "5683");
//!     let sensor = resolve_sensor(&HwmonRegistry::default(), &config.sensor.name)?;
//!
//!     let node = Node::networked(&config, sensor, None).await?;
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     node.run(shutdown_rx).await;
//!
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod sensor;
pub mod hwmon;
pub mod publish;
pub mod coap;
pub mod greeting;
pub mod mesh;
pub mod config;
pub mod node;

pub use types::*;
pub use sensor::{SensorError, SensorRegistry, SensorSource, SimulatedRegistry, SimulatedSensor};
pub use hwmon::{HwmonRegistry, HwmonSensor, Jc42, Jc42Params};
pub use publish::{Iteration, LatestSample, NoNotifier, NotifyError, PullResponder, PushNotifier, Reporter};
pub use coap::{CoapEndpoint, CoapNotifier, Observer, RequestError};
pub use greeting::{greet, GreetingOutcome};
pub use mesh::{InterfaceTable, MeshBootstrapper, MeshConfig, MeshError, MeshInterface, MeshStatus, StaticMesh};
pub use config::{CoapConfig, ConfigError, NodeConfig, PeerConfig, SensorConfig};
pub use node::{resolve_sensor, Node, StartupError};
