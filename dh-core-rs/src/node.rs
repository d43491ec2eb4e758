//! Node assembly
//!
//! Each variant is built from the same [`Reporter`] loop:
//!
//! | Variant         | Sensor            | Notifier       | Mesh |
//! |-----------------|-------------------|----------------|------|
//! | raw driver      | `Jc42::open`      | `NoNotifier`   | no   |
//! | autodetect      | registry by name  | `NoNotifier`   | no   |
//! | networked       | registry by name  | `CoapNotifier` | no   |
//! | mesh-networked  | registry by name  | `CoapNotifier` | yes  |
//!
//! Startup runs in `Initializing`; any failure is a [`StartupError`] and the
//! loop is never entered.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::coap::{CoapEndpoint, CoapNotifier};
use crate::config::{ConfigError, NodeConfig, TEMPERATURE_PATH};
use crate::greeting::{greet, GreetingOutcome};
use crate::mesh::{MeshBootstrapper, MeshError, MeshStatus, StaticMesh};
use crate::publish::{NoNotifier, PushNotifier, Reporter};
use crate::sensor::{SensorError, SensorRegistry, SensorSource};
use crate::types::NodeState;

/// Fatal startup errors
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("sensor {0:?} not found")]
    SensorNotFound(String),

    #[error("sensor initialization failed: {0}")]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("mesh bootstrap failed: {0}")]
    Mesh(#[from] MeshError),

    #[error("cannot bind CoAP endpoint: {0}")]
    Bind(#[source] std::io::Error),
}

/// Resolve a sensor by name
pub fn resolve_sensor<R: SensorRegistry>(
    registry: &R,
    name: &str,
) -> Result<R::Sensor, StartupError> {
    match registry.find_by_name(name) {
        Some(sensor) => {
            info!("Found sensor {:?}", sensor.name());
            Ok(sensor)
        }
        None => {
            error!("No sensor named {:?}", name);
            Err(StartupError::SensorNotFound(name.to_string()))
        }
    }
}

/// A running node: the loop plus whatever it was assembled with
///
/// A `Node` only exists once every startup step succeeded, so it is always
/// in [`NodeState::Running`]. `Initializing` lasts for the duration of the
/// constructors.
pub struct Node<S, N> {
    reporter: Reporter<S, N>,
    endpoint: Option<CoapEndpoint>,
    receiver: Option<JoinHandle<()>>,
    greeting: Option<GreetingOutcome>,
    mesh: Option<MeshStatus>,
}

impl<S: SensorSource> Node<S, NoNotifier> {
    /// Local node: prints readings, publishes nowhere
    pub fn local(sensor: S, period: Duration) -> Self {
        info!("Node state: {}", NodeState::Initializing);
        let node = Self::assemble(Reporter::new(sensor, NoNotifier, TEMPERATURE_PATH, period));
        info!("Node state: {}", node.state());
        node
    }
}

impl<S: SensorSource> Node<S, CoapNotifier> {
    /// Networked node: CoAP resource, Observe notifications, greeting
    ///
    /// When `mesh` is given it is bootstrapped first. Peer configuration is
    /// validated before anything is bound.
    pub async fn networked(
        config: &NodeConfig,
        sensor: S,
        mesh: Option<&mut dyn MeshBootstrapper>,
    ) -> Result<Self, StartupError> {
        info!("Node state: {}", NodeState::Initializing);

        let mesh = match mesh {
            Some(bootstrapper) => Some(bootstrapper.bootstrap()?),
            None => None,
        };

        let peer = config.peer.resolve()?;

        let endpoint = CoapEndpoint::bind(config.coap.listen)
            .await
            .map_err(StartupError::Bind)?;
        if let Ok(local) = endpoint.local_addr() {
            info!("CoAP endpoint listening on {}", local);
        }

        let reporter = Reporter::new(
            sensor,
            endpoint.notifier(),
            config.coap.resource_path.as_str(),
            config.period,
        );
        endpoint
            .register(&config.coap.resource_path, reporter.latest())
            .await;
        let receiver = endpoint.start_receive();

        let greeting = greet(&endpoint, peer, &config.name, config.coap.greeting_timeout).await;

        let mut node = Self::assemble(reporter);
        node.endpoint = Some(endpoint);
        node.receiver = Some(receiver);
        node.greeting = Some(greeting);
        node.mesh = mesh;
        info!("Node state: {}", node.state());
        Ok(node)
    }

    /// Networked node joining the mesh described by `config.mesh`, if any
    pub async fn from_config(config: &NodeConfig, sensor: S) -> Result<Self, StartupError> {
        let mut mesh = config.mesh.as_ref().map(StaticMesh::from_config);
        let bootstrapper = mesh.as_mut().map(|m| m as &mut dyn MeshBootstrapper);
        Self::networked(config, sensor, bootstrapper).await
    }
}

impl<S: SensorSource, N: PushNotifier> Node<S, N> {
    fn assemble(reporter: Reporter<S, N>) -> Self {
        Self {
            reporter,
            endpoint: None,
            receiver: None,
            greeting: None,
            mesh: None,
        }
    }

    /// Always `Running`; see the type docs
    pub fn state(&self) -> NodeState {
        NodeState::Running
    }

    pub fn endpoint(&self) -> Option<&CoapEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn greeting(&self) -> Option<&GreetingOutcome> {
        self.greeting.as_ref()
    }

    pub fn mesh(&self) -> Option<&MeshStatus> {
        self.mesh.as_ref()
    }

    pub fn reporter_mut(&mut self) -> &mut Reporter<S, N> {
        &mut self.reporter
    }

    /// Run the loop until shutdown; returns the iteration count
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> u64 {
        let iterations = self.reporter.run(shutdown).await;
        if let Some(receiver) = self.receiver {
            receiver.abort();
        }
        iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{InterfaceTable, MeshConfig, StaticMesh};
    use crate::publish::Iteration;
    use crate::sensor::{SimulatedRegistry, SimulatedSensor};
    use crate::types::Sample;
    use std::net::SocketAddr;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    fn test_config() -> NodeConfig {
        NodeConfig::new("test-node")
            .with_listen(loopback())
            .with_peer("127.0.0.1", "9")
            .with_greeting_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_sensor_not_found_is_fatal() {
        let registry = SimulatedRegistry::new().with(SimulatedSensor::constant("bmp180", 1));

        let err = resolve_sensor(&registry, "jc42").err().unwrap();
        assert!(matches!(err, StartupError::SensorNotFound(name) if name == "jc42"));
    }

    #[tokio::test]
    async fn test_local_node_runs() {
        let registry = SimulatedRegistry::new().with(SimulatedSensor::constant("jc42", 2345));
        let sensor = resolve_sensor(&registry, "jc42").unwrap();

        let mut node = Node::local(sensor, Duration::from_secs(1));
        assert_eq!(node.state(), NodeState::Running);
        assert!(node.endpoint().is_none());
        assert_eq!(
            node.reporter_mut().poll_once().await,
            Iteration::Unobserved(Sample::new(2345, 0))
        );
    }

    #[tokio::test]
    async fn test_bad_peer_port_fails_before_bind() {
        let config = test_config().with_peer("127.0.0.1", "0");
        let sensor = SimulatedSensor::constant("jc42", 2345);

        let result = Node::networked(&config, sensor, None).await;
        assert!(matches!(
            result,
            Err(StartupError::Config(ConfigError::InvalidPeerPort(_)))
        ));
    }

    #[tokio::test]
    async fn test_bad_peer_address_is_fatal() {
        let config = test_config().with_peer("collector.local", "5683");
        let sensor = SimulatedSensor::constant("jc42", 2345);

        let result = Node::networked(&config, sensor, None).await;
        assert!(matches!(
            result,
            Err(StartupError::Config(ConfigError::InvalidPeerAddress(_)))
        ));
    }

    #[tokio::test]
    async fn test_mesh_failure_is_fatal() {
        let config = test_config();
        let mut mesh = StaticMesh::new(
            MeshConfig {
                local_addr: "bogus".to_string(),
                ..Default::default()
            },
            InterfaceTable::with_interfaces(["sl0"]),
        );

        let result = Node::networked(
            &config,
            SimulatedSensor::constant("jc42", 2345),
            Some(&mut mesh),
        )
        .await;
        assert!(matches!(result, Err(StartupError::Mesh(_))));
    }

    #[tokio::test]
    async fn test_from_config_bootstraps_configured_mesh() {
        let plain = Node::from_config(&test_config(), SimulatedSensor::constant("jc42", 1))
            .await
            .unwrap();
        assert!(plain.mesh().is_none());

        let config = test_config().with_mesh(MeshConfig {
            instance_id: 2,
            root: false,
            ..Default::default()
        });
        let meshed = Node::from_config(&config, SimulatedSensor::constant("jc42", 1))
            .await
            .unwrap();
        let status = meshed.mesh().unwrap();
        assert_eq!(status.instance_id, 2);
        assert!(!status.root);

        let broken = test_config().with_mesh(MeshConfig {
            tunnel_peer: "bogus".to_string(),
            ..Default::default()
        });
        let result = Node::from_config(&broken, SimulatedSensor::constant("jc42", 1)).await;
        assert!(matches!(result, Err(StartupError::Mesh(_))));
    }

    #[tokio::test]
    async fn test_networked_node_survives_silent_collector() {
        let collector = tokio::net::UdpSocket::bind(loopback()).await.unwrap();
        let port = collector.local_addr().unwrap().port().to_string();
        let config = test_config().with_peer("127.0.0.1", port);
        let mut mesh = StaticMesh::new(
            MeshConfig::default(),
            InterfaceTable::with_interfaces(["sl0"]),
        );

        let mut node = Node::networked(
            &config,
            SimulatedSensor::constant("jc42", 2345),
            Some(&mut mesh),
        )
        .await
        .unwrap();

        assert_eq!(node.state(), NodeState::Running);
        assert_eq!(node.greeting(), Some(&GreetingOutcome::Timeout));
        assert!(node.mesh().unwrap().root);
        assert_eq!(
            node.reporter_mut().poll_once().await,
            Iteration::Unobserved(Sample::new(2345, 0))
        );
    }
}
