//! Router, port and connection management plus packet simulation.
//!
//! [`DeviceService`] validates requests, keeps the router/port/connection
//! invariants and talks to a [`Store`]. It owns the process-wide random
//! source used for IP allocation and the packet model.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::error::{DeviceError, StoreError};
use crate::models::{
    ConfigurePortRequest, ConfigureResponse, ConfigureRouterRequest, ConnectRouterResponse,
    Connection, ConnectionInfo, ConnectionStatus, CreateConnectionResponse, CreateRouterRequest,
    DuplexMode, PacketRequest, PacketResult, Port, PortRequest, PortStatus, Protocol, Router,
    RouterPatch, RouterStatus, Speed,
};
use crate::simulator::{self, UNSUPPORTED_PROTOCOL};
use crate::store::Store;

/// Random draws per allocation before falling back to [`FALLBACK_IP`].
const IP_ALLOCATION_ATTEMPTS: usize = 100;
const FALLBACK_IP: &str = "192.168.0.1";
/// Allocate-and-insert rounds when the store reports an IP conflict.
const CREATE_ATTEMPTS: usize = 3;

/// Resolves the host's own IPv4 address for connect responses.
pub type LocalAddr = fn() -> Option<Ipv4Addr>;

/// Router, port and connection operations over a shared [`Store`].
///
/// One instance serves every request. Mutations are checked here first for
/// readable errors, and the store enforces uniqueness again when it writes.
pub struct DeviceService {
    store: Arc<dyn Store>,
    rng: Mutex<StdRng>,
    local_addr: LocalAddr,
}

impl DeviceService {
    /// Creates a service seeded from `seed`, or from OS entropy when `None`.
    pub fn new(store: Arc<dyn Store>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            rng: Mutex::new(rng),
            local_addr: discover_local_ipv4,
        }
    }

    /// Replaces host address discovery.
    pub fn with_local_addr(mut self, local_addr: LocalAddr) -> Self {
        self.local_addr = local_addr;
        self
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        // The generator holds no invariants a panicking holder could break.
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Picks a free `192.168.x.y` address.
    ///
    /// Best effort: after [`IP_ALLOCATION_ATTEMPTS`] collisions it returns
    /// [`FALLBACK_IP`] even if that address is taken.
    fn allocate_ip(&self) -> Result<String, DeviceError> {
        for _ in 0..IP_ALLOCATION_ATTEMPTS {
            let (x, y) = {
                let mut rng = self.rng();
                (rng.gen::<u8>(), rng.gen::<u8>())
            };
            let ip = format!("192.168.{x}.{y}");
            if !self.store.is_ip_taken(&ip)? {
                return Ok(ip);
            }
        }

        warn!(
            "No free address after {} attempts, falling back to {}",
            IP_ALLOCATION_ATTEMPTS, FALLBACK_IP
        );
        Ok(FALLBACK_IP.to_string())
    }

    fn router_by_ip(&self, ip: &str, role: &str) -> Result<Router, DeviceError> {
        match self.store.router_by_ip(ip) {
            Ok(router) => Ok(router),
            Err(StoreError::NotFound(_)) => {
                Err(DeviceError::NotFound(format!("{role} router with IP {ip}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Creates a router with a fresh IP, the default ports 80/tcp (open) and
    /// 443/tcp (closed), and any requested ports not already present.
    pub fn create_router(&self, req: &CreateRouterRequest) -> Result<Router, DeviceError> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(DeviceError::validation("name", "must not be empty"));
        }
        let ports = seed_ports(&req.ports)?;

        let mut last_conflict = None;
        for _ in 0..CREATE_ATTEMPTS {
            let router = Router {
                id: 0,
                name: name.to_string(),
                ip_address: self.allocate_ip()?,
                status: RouterStatus::Active,
                connected: false,
                ports: ports.clone(),
            };

            match self.store.create_router(router) {
                Ok(router) => {
                    info!(
                        "Created router {} '{}' at {}",
                        router.id, router.name, router.ip_address
                    );
                    return Ok(router);
                }
                Err(StoreError::IpConflict(ip)) => {
                    warn!("Address {} was taken concurrently, retrying", ip);
                    last_conflict = Some(StoreError::IpConflict(ip));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_conflict
            .unwrap_or(StoreError::IpConflict(FALLBACK_IP.to_string()))
            .into())
    }

    /// Marks the router at `ip` as connected to this host.
    pub fn connect_router(&self, ip: &str) -> Result<ConnectRouterResponse, DeviceError> {
        let router = self.router_by_ip(ip, "requested")?;
        // The store flips the flag under its write lock; of two racing
        // connects only one gets past here.
        let router = self.store.mark_connected(router.id)?;

        let local_ip = (self.local_addr)().unwrap_or_else(|| {
            warn!("No non-loopback IPv4 address found, reporting loopback");
            Ipv4Addr::LOCALHOST
        });
        info!("Router {} at {} connected", router.id, router.ip_address);

        Ok(ConnectRouterResponse {
            router_id: router.id,
            name: router.name,
            ip_address: router.ip_address,
            local_ip: local_ip.to_string(),
            status: router.status,
            connected: true,
        })
    }

    /// Applies the non-empty name/status fields of `req`.
    pub fn configure_router(
        &self,
        req: &ConfigureRouterRequest,
    ) -> Result<ConfigureResponse, DeviceError> {
        let name = req
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let status = match req.status.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => Some(parse_field::<RouterStatus>("status", s)?),
            _ => None,
        };

        let router = self.store.router_by_id(req.router_id)?;
        let patch = RouterPatch {
            name,
            status,
            connected: None,
        };
        self.store.update_router_fields(router.id, &patch)?;
        info!("Configured router {}: {:?}", router.id, patch);

        Ok(ConfigureResponse {
            success: true,
            message: "Router configuration updated".to_string(),
        })
    }

    /// Updates the matching port in place or appends a new one.
    ///
    /// A port matching both number and protocol wins over one matching the
    /// number only, so `(number, protocol)` stays unique per router.
    pub fn configure_port(&self, req: &ConfigurePortRequest) -> Result<(), DeviceError> {
        let router_id = req
            .router_id
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                DeviceError::validation(
                    "routerId",
                    format!("'{}' is not a positive integer", req.router_id),
                )
            })?;
        let number = parse_port_number("portNumber", req.port_number)?;
        let speed = parse_optional_field("speed", &req.speed)?.unwrap_or(Speed::Auto);
        let duplex_mode =
            parse_optional_field("duplexMode", &req.duplex_mode)?.unwrap_or(DuplexMode::Auto);
        let status = parse_field::<PortStatus>("status", req.status.trim())?;
        let protocol = parse_optional_field::<Protocol>("protocol", &req.protocol)?;

        let mut router = self.store.router_by_id(router_id)?;

        let existing = router
            .ports
            .iter()
            .position(|p| p.number == number && protocol.is_none_or(|proto| p.protocol == proto))
            .or_else(|| router.ports.iter().position(|p| p.number == number));

        let port = match existing {
            Some(idx) => &mut router.ports[idx],
            None => {
                let mut port = Port::new(number, protocol.unwrap_or(Protocol::Tcp), status);
                port.router_id = router.id;
                router.ports.push(port);
                let last = router.ports.len() - 1;
                &mut router.ports[last]
            }
        };
        port.status = status;
        if let Some(protocol) = protocol {
            port.protocol = protocol;
        }
        port.speed = speed;
        port.duplex_mode = duplex_mode;
        port.description.clone_from(&req.description);

        self.store.update_router(&router)?;
        info!(
            "Configured port {} on router {} ({})",
            number, router.id, status
        );
        Ok(())
    }

    pub fn routers(&self) -> Result<Vec<Router>, DeviceError> {
        Ok(self.store.list_routers()?)
    }

    pub fn router(&self, id: u64) -> Result<Router, DeviceError> {
        Ok(self.store.router_by_id(id)?)
    }

    pub fn router_at(&self, ip: &str) -> Result<Router, DeviceError> {
        self.router_by_ip(ip, "requested")
    }

    /// Links two routers. The link is undirected: `(a, b)` and `(b, a)` are
    /// the same connection.
    pub fn create_connection(
        &self,
        from_ip: &str,
        to_ip: &str,
    ) -> Result<CreateConnectionResponse, DeviceError> {
        let from = self.router_by_ip(from_ip, "source")?;
        let to = self.router_by_ip(to_ip, "destination")?;
        if from.id == to.id {
            return Err(DeviceError::validation(
                "router_to_ip",
                "a router cannot be connected to itself",
            ));
        }

        let exists = || {
            DeviceError::ConnectionExists(from.ip_address.clone(), to.ip_address.clone())
        };
        if self.store.connection_exists(from.id, to.id)? {
            return Err(exists());
        }

        let connection = Connection {
            id: 0,
            router_from_id: from.id,
            router_to_id: to.id,
            status: ConnectionStatus::Active,
            created_at: Utc::now(),
        };
        let connection = match self.store.create_connection(connection) {
            Ok(connection) => connection,
            Err(StoreError::ConnectionConflict(..)) => return Err(exists()),
            Err(e) => return Err(e.into()),
        };
        info!(
            "Connected {} <-> {} (connection {})",
            from.ip_address, to.ip_address, connection.id
        );

        Ok(CreateConnectionResponse {
            id: connection.id,
            router_from_ip: from.ip_address,
            router_to_ip: to.ip_address,
            status: connection.status,
            created_at: connection.created_at,
        })
    }

    /// Every connection with both endpoint routers resolved.
    ///
    /// Fails if any endpoint router is missing.
    pub fn connections(&self) -> Result<Vec<ConnectionInfo>, DeviceError> {
        self.store
            .list_connections()?
            .into_iter()
            .map(|c| self.describe(c))
            .collect()
    }

    pub fn connection(&self, id: u64) -> Result<ConnectionInfo, DeviceError> {
        let connection = self.store.connection_by_id(id)?;
        self.describe(connection)
    }

    pub fn connections_of(&self, ip: &str) -> Result<Vec<ConnectionInfo>, DeviceError> {
        let router = self.router_by_ip(ip, "requested")?;
        self.store
            .connections_involving(router.id)?
            .into_iter()
            .map(|c| self.describe(c))
            .collect()
    }

    fn describe(&self, connection: Connection) -> Result<ConnectionInfo, DeviceError> {
        let endpoint = |id: u64, role: &str| match self.store.router_by_id(id) {
            Ok(router) => Ok(router),
            Err(StoreError::NotFound(_)) => Err(DeviceError::NotFound(format!(
                "{role} router {id} of connection {}",
                connection.id
            ))),
            Err(e) => Err(DeviceError::from(e)),
        };
        let from_router = endpoint(connection.router_from_id, "source")?;
        let to_router = endpoint(connection.router_to_id, "destination")?;

        Ok(ConnectionInfo {
            id: connection.id,
            router_from_ip: from_router.ip_address.clone(),
            router_to_ip: to_router.ip_address.clone(),
            status: connection.status,
            created_at: connection.created_at,
            from_router,
            to_router,
        })
    }

    /// Simulates sending a packet from a connected router to a port on
    /// another router.
    ///
    /// Closed or missing ports and simulated network failures come back as a
    /// `failed` [`PacketResult`]; errors are reserved for bad input, unknown
    /// routers and a disconnected source.
    pub fn send_packet(&self, req: &PacketRequest) -> Result<PacketResult, DeviceError> {
        if req.source_ip.trim().is_empty() {
            return Err(DeviceError::validation(
                "source_ip",
                "source_ip is required, connect to a router first",
            ));
        }

        let source = self.router_by_ip(&req.source_ip, "source")?;
        if !source.connected {
            return Err(DeviceError::NotConnected(source.ip_address));
        }
        let destination = self.router_by_ip(&req.destination_ip, "destination")?;

        let Ok(protocol) = req.protocol.parse::<Protocol>() else {
            debug!("Rejecting packet with protocol '{}'", req.protocol);
            return Ok(PacketResult::failed(req, UNSUPPORTED_PROTOCOL));
        };

        let port = destination
            .ports
            .iter()
            .find(|p| i64::from(p.number) == req.port && p.protocol == protocol);
        match port {
            None => return Ok(PacketResult::failed(req, format!("port {} not found", req.port))),
            Some(p) if p.status != PortStatus::Open => {
                return Ok(PacketResult::failed(
                    req,
                    format!("port {} is {}", req.port, p.status),
                ));
            }
            Some(_) => {}
        }

        let transmission = simulator::transmit(&mut *self.rng(), protocol);
        debug!(
            "{} -> {}:{}/{} ({} bytes) {} in {:.2}ms",
            req.source_ip,
            req.destination_ip,
            req.port,
            protocol,
            req.data.len(),
            transmission.status,
            transmission.latency
        );

        Ok(PacketResult {
            source_ip: req.source_ip.clone(),
            destination_ip: req.destination_ip.clone(),
            protocol: req.protocol.clone(),
            port: req.port,
            status: transmission.status,
            latency: transmission.latency,
            error: transmission.error.map(str::to_string),
        })
    }
}

/// Default ports plus the requested ones, skipping duplicate
/// `(number, protocol)` pairs.
fn seed_ports(requested: &[PortRequest]) -> Result<Vec<Port>, DeviceError> {
    let mut ports = vec![
        Port::new(80, Protocol::Tcp, PortStatus::Open),
        Port::new(443, Protocol::Tcp, PortStatus::Closed),
    ];
    for req in requested {
        let number = parse_port_number("ports.number", req.number)?;
        let protocol = parse_field::<Protocol>("ports.protocol", req.protocol.trim())?;
        if ports
            .iter()
            .any(|p| p.number == number && p.protocol == protocol)
        {
            continue;
        }
        ports.push(Port::new(number, protocol, PortStatus::Closed));
    }
    Ok(ports)
}

fn parse_port_number(field: &'static str, number: i64) -> Result<u16, DeviceError> {
    u16::try_from(number)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| DeviceError::validation(field, format!("{number} (must be 1-65535)")))
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, DeviceError> {
    value
        .parse()
        .map_err(|_| DeviceError::validation(field, format!("unsupported value '{value}'")))
}

/// Like [`parse_field`], but an empty value means "not provided".
fn parse_optional_field<T: FromStr>(
    field: &'static str,
    value: &str,
) -> Result<Option<T>, DeviceError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    parse_field(field, value).map(Some)
}

/// First non-loopback IPv4 address of the host's interfaces.
#[cfg(unix)]
pub fn discover_local_ipv4() -> Option<Ipv4Addr> {
    use std::net::SocketAddrV4;

    let addrs = nix::ifaddrs::getifaddrs().ok()?;
    addrs
        .filter_map(|ifaddr| {
            let address = ifaddr.address?;
            let sin = *address.as_sockaddr_in()?;
            Some(*SocketAddrV4::from(sin).ip())
        })
        .find(|ip| !ip.is_loopback())
}

/// Address of the interface the OS would route outbound traffic through.
/// `connect` on a UDP socket only selects a route; nothing is sent.
#[cfg(not(unix))]
pub fn discover_local_ipv4() -> Option<Ipv4Addr> {
    use std::net::{IpAddr, UdpSocket};

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() => Some(ip),
        _ => None,
    }
}
