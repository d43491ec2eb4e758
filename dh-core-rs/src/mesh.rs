//! Mesh network bootstrap
//!
//! Routing variants join a multi-hop mesh before serving CoAP:
//! 1. install the configured local address on the mesh interface
//! 2. seed the neighbor cache with the serial-tunnel peer
//! 3. start a routing instance, as DODAG root when configured
//!
//! The routing protocol itself lives behind [`MeshInterface`].
//! [`InterfaceTable`] is the in-process implementation used on hosts
//! without a routing stack.

use std::collections::HashMap;
use std::net::Ipv6Addr;

use thiserror::Error;
use tracing::info;

/// Errors during mesh bootstrap
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MeshError {
    #[error("invalid local address: {0:?}")]
    InvalidLocalAddress(String),

    #[error("invalid tunnel peer address: {0:?}")]
    InvalidPeerAddress(String),

    #[error("prefix length {0} exceeds 128")]
    InvalidPrefix(u8),

    #[error("interface {iface}: {reason}")]
    Interface { iface: String, reason: String },
}

/// Static mesh configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshConfig {
    /// Mesh interface name
    pub iface: String,
    /// Local address as `addr/prefix`
    pub local_addr: String,
    /// Serial-tunnel peer address
    pub tunnel_peer: String,
    /// Routing instance
    pub instance_id: u8,
    /// Act as routing root
    pub root: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            iface: "sl0".to_string(),
            local_addr: "fd00:bbbb::2/64".to_string(),
            tunnel_peer: "fe80::1".to_string(),
            instance_id: 0,
            root: true,
        }
    }
}

impl MeshConfig {
    /// Parse `local_addr` into address and prefix length
    pub fn local(&self) -> Result<(Ipv6Addr, u8), MeshError> {
        let invalid = || MeshError::InvalidLocalAddress(self.local_addr.clone());

        let (addr, prefix) = match self.local_addr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, prefix.parse::<u8>().map_err(|_| invalid())?),
            None => (self.local_addr.trim(), 128),
        };
        if prefix > 128 {
            return Err(MeshError::InvalidPrefix(prefix));
        }

        let addr = addr.parse::<Ipv6Addr>().map_err(|_| invalid())?;
        Ok((addr, prefix))
    }

    /// Parse `tunnel_peer`
    pub fn peer(&self) -> Result<Ipv6Addr, MeshError> {
        self.tunnel_peer
            .trim()
            .parse()
            .map_err(|_| MeshError::InvalidPeerAddress(self.tunnel_peer.clone()))
    }
}

/// Network interface operations needed by the bootstrap
pub trait MeshInterface {
    /// Install `addr/prefix` on `iface`
    fn add_address(&mut self, iface: &str, addr: Ipv6Addr, prefix: u8) -> Result<(), MeshError>;

    /// Add a static neighbor-cache entry on `iface`
    fn add_neighbor(&mut self, iface: &str, addr: Ipv6Addr) -> Result<(), MeshError>;

    /// Start routing instance `instance_id`, as root of `dodag` when given
    fn init_routing(
        &mut self,
        iface: &str,
        instance_id: u8,
        dodag: Option<Ipv6Addr>,
    ) -> Result<(), MeshError>;
}

/// Result of a successful bootstrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshStatus {
    pub local: Ipv6Addr,
    pub prefix: u8,
    pub tunnel_peer: Ipv6Addr,
    pub instance_id: u8,
    pub root: bool,
}

/// Joins a node to the mesh
pub trait MeshBootstrapper {
    fn bootstrap(&mut self) -> Result<MeshStatus, MeshError>;
}

/// Bootstrap from a [`MeshConfig`] through a [`MeshInterface`]
pub struct StaticMesh<I> {
    config: MeshConfig,
    iface: I,
}

impl<I: MeshInterface> StaticMesh<I> {
    pub fn new(config: MeshConfig, iface: I) -> Self {
        Self { config, iface }
    }

    pub fn interface(&self) -> &I {
        &self.iface
    }
}

impl StaticMesh<InterfaceTable> {
    /// Bootstrap `config` on an in-process table holding its interface
    pub fn from_config(config: &MeshConfig) -> Self {
        let iface = InterfaceTable::with_interfaces([config.iface.as_str()]);
        Self::new(config.clone(), iface)
    }
}

impl<I: MeshInterface> MeshBootstrapper for StaticMesh<I> {
    fn bootstrap(&mut self) -> Result<MeshStatus, MeshError> {
        let (local, prefix) = self.config.local()?;
        let tunnel_peer = self.config.peer()?;
        let name = self.config.iface.as_str();

        self.iface.add_address(name, local, prefix)?;
        info!("{}: address {}/{}", name, local, prefix);

        self.iface.add_neighbor(name, tunnel_peer)?;
        info!("{}: tunnel neighbor {}", name, tunnel_peer);

        let dodag = self.config.root.then_some(local);
        self.iface
            .init_routing(name, self.config.instance_id, dodag)?;
        match dodag {
            Some(root) => info!(
                "{}: routing instance {} as root of {}",
                name, self.config.instance_id, root
            ),
            None => info!("{}: routing instance {}", name, self.config.instance_id),
        }

        Ok(MeshStatus {
            local,
            prefix,
            tunnel_peer,
            instance_id: self.config.instance_id,
            root: self.config.root,
        })
    }
}

/// Routing instance state kept by [`InterfaceTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingInstance {
    pub instance_id: u8,
    pub dodag: Option<Ipv6Addr>,
}

/// Per-interface state
#[derive(Debug, Clone, Default)]
pub struct InterfaceState {
    pub addresses: Vec<(Ipv6Addr, u8)>,
    pub neighbors: Vec<Ipv6Addr>,
    pub routing: Option<RoutingInstance>,
}

/// In-process interface table
#[derive(Debug, Clone, Default)]
pub struct InterfaceTable {
    interfaces: HashMap<String, InterfaceState>,
}

impl InterfaceTable {
    /// Table with the given interfaces present
    pub fn with_interfaces<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            interfaces: names
                .into_iter()
                .map(|n| (n.to_string(), InterfaceState::default()))
                .collect(),
        }
    }

    pub fn get(&self, iface: &str) -> Option<&InterfaceState> {
        self.interfaces.get(iface)
    }

    fn state_mut(&mut self, iface: &str) -> Result<&mut InterfaceState, MeshError> {
        self.interfaces
            .get_mut(iface)
            .ok_or_else(|| MeshError::Interface {
                iface: iface.to_string(),
                reason: "no such interface".to_string(),
            })
    }
}

impl MeshInterface for InterfaceTable {
    fn add_address(&mut self, iface: &str, addr: Ipv6Addr, prefix: u8) -> Result<(), MeshError> {
        let state = self.state_mut(iface)?;
        if !state.addresses.iter().any(|(a, _)| *a == addr) {
            state.addresses.push((addr, prefix));
        }
        Ok(())
    }

    fn add_neighbor(&mut self, iface: &str, addr: Ipv6Addr) -> Result<(), MeshError> {
        let state = self.state_mut(iface)?;
        if !state.neighbors.contains(&addr) {
            state.neighbors.push(addr);
        }
        Ok(())
    }

    fn init_routing(
        &mut self,
        iface: &str,
        instance_id: u8,
        dodag: Option<Ipv6Addr>,
    ) -> Result<(), MeshError> {
        let state = self.state_mut(iface)?;
        if let Some(existing) = state.routing {
            if existing.instance_id != instance_id {
                return Err(MeshError::Interface {
                    iface: iface.to_string(),
                    reason: format!("routing instance {} already running", existing.instance_id),
                });
            }
        }
        state.routing = Some(RoutingInstance { instance_id, dodag });
        Ok(())
    }
}
