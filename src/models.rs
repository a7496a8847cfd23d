//! Data models for routers, ports, connections and simulated packets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Administrative state of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RouterStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
}

/// Transport protocol a port listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Port state. `up` and `down` are accepted as input aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
pub enum PortStatus {
    #[serde(rename = "open", alias = "up")]
    #[strum(to_string = "open", serialize = "up")]
    Open,
    #[default]
    #[serde(rename = "closed", alias = "down")]
    #[strum(to_string = "closed", serialize = "down")]
    Closed,
}

/// Link speed in Mbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
pub enum Speed {
    #[default]
    #[serde(rename = "auto")]
    #[strum(serialize = "auto")]
    Auto,
    #[serde(rename = "10")]
    #[strum(serialize = "10")]
    Mbps10,
    #[serde(rename = "100")]
    #[strum(serialize = "100")]
    Mbps100,
    #[serde(rename = "1000")]
    #[strum(serialize = "1000")]
    Mbps1000,
    #[serde(rename = "10000")]
    #[strum(serialize = "10000")]
    Mbps10000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DuplexMode {
    #[default]
    Auto,
    Full,
    Half,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Active,
}

/// Outcome of a simulated transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

/// A managed network node. Owns its ports.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Router {
    pub id: u64,
    pub name: String,
    pub ip_address: String,
    pub status: RouterStatus,
    pub connected: bool,
    pub ports: Vec<Port>,
}

/// A numbered, protocol-typed endpoint on a router.
///
/// `(number, protocol)` is unique within one router.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Port {
    /// Assigned by the store; zero until the owning router is saved.
    pub id: u64,
    pub router_id: u64,
    pub number: u16,
    pub protocol: Protocol,
    pub status: PortStatus,
    #[serde(default)]
    pub speed: Speed,
    #[serde(default, rename = "duplexMode")]
    pub duplex_mode: DuplexMode,
    #[serde(default)]
    pub description: String,
}

impl Port {
    pub fn new(number: u16, protocol: Protocol, status: PortStatus) -> Self {
        Self {
            id: 0,
            router_id: 0,
            number,
            protocol,
            status,
            speed: Speed::Auto,
            duplex_mode: DuplexMode::Auto,
            description: String::new(),
        }
    }
}

/// Undirected link between two routers, referenced by id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Connection {
    pub id: u64,
    pub router_from_id: u64,
    pub router_to_id: u64,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    /// True if this connection links `a` and `b` in either direction.
    pub fn links(&self, a: u64, b: u64) -> bool {
        (self.router_from_id == a && self.router_to_id == b)
            || (self.router_from_id == b && self.router_to_id == a)
    }

    pub fn involves(&self, router_id: u64) -> bool {
        self.router_from_id == router_id || self.router_to_id == router_id
    }
}

/// Partial router update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouterPatch {
    pub name: Option<String>,
    pub status: Option<RouterStatus>,
    pub connected: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRouterRequest {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<PortRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortRequest {
    pub number: i64,
    pub protocol: String,
}

#[derive(Debug, Deserialize)]
pub struct ConnectRouterRequest {
    pub ip_address: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConnectRouterResponse {
    pub router_id: u64,
    pub name: String,
    pub ip_address: String,
    pub local_ip: String,
    pub status: RouterStatus,
    pub connected: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigureRouterRequest {
    #[serde(alias = "routerId")]
    pub router_id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Port upsert request. Fields stay as raw strings so validation can name
/// the offending field.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurePortRequest {
    pub router_id: String,
    pub port_number: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub speed: String,
    #[serde(default)]
    pub duplex_mode: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigureResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateConnectionRequest {
    pub router_from_ip: String,
    pub router_to_ip: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CreateConnectionResponse {
    pub id: u64,
    pub router_from_ip: String,
    pub router_to_ip: String,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
}

/// Connection enriched with both endpoint routers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub id: u64,
    pub router_from_ip: String,
    pub router_to_ip: String,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub from_router: Router,
    pub to_router: Router,
}

#[derive(Debug, Deserialize)]
pub struct PacketRequest {
    #[serde(default)]
    pub source_ip: String,
    pub destination_ip: String,
    pub protocol: String,
    pub port: i64,
    #[serde(default)]
    pub data: String,
}

/// Result of one simulated transmission. Not persisted.
///
/// A `failed` status is a delivered outcome (refused, lost, closed port),
/// not an error of the call itself.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PacketResult {
    pub source_ip: String,
    pub destination_ip: String,
    pub protocol: String,
    pub port: i64,
    pub status: DeliveryStatus,
    /// Milliseconds.
    pub latency: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PacketResult {
    pub fn failed(req: &PacketRequest, error: impl Into<String>) -> Self {
        Self {
            source_ip: req.source_ip.clone(),
            destination_ip: req.destination_ip.clone(),
            protocol: req.protocol.clone(),
            port: req.port,
            status: DeliveryStatus::Failed,
            latency: 0.0,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_port_status_aliases() {
        assert_eq!(PortStatus::from_str("up").ok(), Some(PortStatus::Open));
        assert_eq!(PortStatus::from_str("down").ok(), Some(PortStatus::Closed));
        assert_eq!(PortStatus::Open.to_string(), "open");

        let status: PortStatus = serde_json::from_str("\"up\"").unwrap();
        assert_eq!(status, PortStatus::Open);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"open\"");
    }

    #[test]
    fn test_speed_parsing() {
        assert_eq!(Speed::from_str("1000").ok(), Some(Speed::Mbps1000));
        assert!(Speed::from_str("7").is_err());
        assert_eq!(serde_json::to_string(&Speed::Mbps10).unwrap(), "\"10\"");
    }

    #[test]
    fn test_connection_links_is_undirected() {
        let conn = Connection {
            id: 1,
            router_from_id: 3,
            router_to_id: 7,
            status: ConnectionStatus::Active,
            created_at: Utc::now(),
        };
        assert!(conn.links(3, 7));
        assert!(conn.links(7, 3));
        assert!(!conn.links(3, 3));
        assert!(conn.involves(7));
        assert!(!conn.involves(1));
    }

    #[test]
    fn test_packet_result_omits_empty_error() {
        let result = PacketResult {
            source_ip: "192.168.1.1".into(),
            destination_ip: "192.168.1.2".into(),
            protocol: "tcp".into(),
            port: 80,
            status: DeliveryStatus::Success,
            latency: 12.5,
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
    }
}
