//! Node configuration
//!
//! Compiled-in defaults select each variant's behavior. Peer address and port
//! are kept as configured strings and validated at startup.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::coap::COAP_PORT;
use crate::greeting::GREETING_TIMEOUT;
use crate::hwmon::{HwmonSensor, Jc42, Jc42Params, DEFAULT_SYSFS_ROOT};
use crate::mesh::MeshConfig;
use crate::sensor::SensorError;
use crate::types::NETWORK_PERIOD;

/// Resource serving the temperature
pub const TEMPERATURE_PATH: &str = "/dh/tmp";

/// Sensor looked up by the autodetecting variants
pub const DEFAULT_SENSOR_NAME: &str = "jc42";

/// Errors in static configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid peer address: {0:?}")]
    InvalidPeerAddress(String),

    #[error("invalid peer port: {0:?}")]
    InvalidPeerPort(String),
}

/// Complete node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name announced to the collector
    pub name: String,

    /// Loop period
    pub period: Duration,

    pub sensor: SensorConfig,
    pub coap: CoapConfig,
    pub peer: PeerConfig,

    /// Mesh bootstrap, for routing variants only
    pub mesh: Option<MeshConfig>,
}

/// Sensor selection
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Registry name of the sensor
    pub name: String,

    /// sysfs mount point
    pub sysfs_root: PathBuf,

    /// Bus and address for direct driver access
    pub jc42: Jc42Params,
}

/// Local CoAP endpoint
#[derive(Debug, Clone)]
pub struct CoapConfig {
    pub listen: SocketAddr,
    pub resource_path: String,
    pub greeting_timeout: Duration,
}

/// Datahead collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// IP address, optionally in brackets
    pub addr: String,
    /// Decimal UDP port, must not be zero
    pub port: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "datahead-node".to_string(),
            period: NETWORK_PERIOD,
            sensor: SensorConfig::default(),
            coap: CoapConfig::default(),
            peer: PeerConfig::default(),
            mesh: None,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SENSOR_NAME.to_string(),
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            jc42: Jc42Params::default(),
        }
    }
}

impl Default for CoapConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), COAP_PORT),
            resource_path: TEMPERATURE_PATH.to_string(),
            greeting_timeout: GREETING_TIMEOUT,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            addr: "fd00:bbbb::1".to_string(),
            port: COAP_PORT.to_string(),
        }
    }
}

impl SensorConfig {
    /// Open the jc42 at the configured bus and address
    pub fn open_jc42(&self) -> Result<HwmonSensor, SensorError> {
        Jc42::open(&self.sysfs_root, self.jc42)
    }
}

impl PeerConfig {
    pub fn new(addr: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            port: port.into(),
        }
    }

    /// Parse the configured address and port
    pub fn resolve(&self) -> Result<SocketAddr, ConfigError> {
        let addr = self
            .addr
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']');
        let ip: IpAddr = addr
            .parse()
            .map_err(|_| ConfigError::InvalidPeerAddress(self.addr.clone()))?;

        let port = match self.port.trim().parse::<u16>() {
            Ok(0) | Err(_) => return Err(ConfigError::InvalidPeerPort(self.port.clone())),
            Ok(port) => port,
        };

        Ok(SocketAddr::new(ip, port))
    }
}

impl NodeConfig {
    /// Config for a named node with defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the loop period
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Set the sensor registry name
    pub fn with_sensor(mut self, name: impl Into<String>) -> Self {
        self.sensor.name = name.into();
        self
    }

    /// Set the sysfs root
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sensor.sysfs_root = root.into();
        self
    }

    /// Set the jc42 bus and address
    pub fn with_jc42(mut self, params: Jc42Params) -> Self {
        self.sensor.jc42 = params;
        self
    }

    /// Set the local CoAP address
    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.coap.listen = listen;
        self
    }

    /// Set the collector address and port
    pub fn with_peer(mut self, addr: impl Into<String>, port: impl Into<String>) -> Self {
        self.peer = PeerConfig::new(addr, port);
        self
    }

    /// Set the greeting timeout
    pub fn with_greeting_timeout(mut self, timeout: Duration) -> Self {
        self.coap.greeting_timeout = timeout;
        self
    }

    /// Enable mesh bootstrap
    pub fn with_mesh(mut self, mesh: MeshConfig) -> Self {
        self.mesh = Some(mesh);
        self
    }
}
