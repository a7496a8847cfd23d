//! Router, port and connection storage.
//!
//! [`Store`] is the narrow interface the device service consumes.
//! [`MemoryStore`] keeps everything in memory and can mirror its tables to a
//! JSON snapshot file so state survives restarts.
//!
//! Uniqueness (router IP, unordered router pair, `(number, protocol)` per
//! router) is enforced here, under the same write lock that inserts, so
//! concurrent requests cannot race a duplicate past the service's own checks.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{Connection, Router, RouterPatch};

/// Persistence operations used by the device service.
pub trait Store: Send + Sync {
    /// Inserts a router, assigning ids to it and its ports.
    ///
    /// Fails with [`StoreError::IpConflict`] if the address is taken.
    fn create_router(&self, router: Router) -> Result<Router, StoreError>;

    fn list_routers(&self) -> Result<Vec<Router>, StoreError>;

    fn router_by_id(&self, id: u64) -> Result<Router, StoreError>;

    fn router_by_ip(&self, ip: &str) -> Result<Router, StoreError>;

    fn is_ip_taken(&self, ip: &str) -> Result<bool, StoreError>;

    /// Replaces a stored router, ports included. New ports get ids.
    fn update_router(&self, router: &Router) -> Result<Router, StoreError>;

    fn update_router_fields(&self, id: u64, patch: &RouterPatch) -> Result<(), StoreError>;

    /// Sets the connected flag, failing with [`StoreError::AlreadyConnected`]
    /// if it is already set. Returns the router as stored.
    fn mark_connected(&self, id: u64) -> Result<Router, StoreError>;

    /// True if `a` and `b` are linked in either direction.
    fn connection_exists(&self, a: u64, b: u64) -> Result<bool, StoreError>;

    /// Inserts a connection, assigning its id.
    ///
    /// Fails with [`StoreError::ConnectionConflict`] if the pair is already linked.
    fn create_connection(&self, connection: Connection) -> Result<Connection, StoreError>;

    fn list_connections(&self) -> Result<Vec<Connection>, StoreError>;

    fn connection_by_id(&self, id: u64) -> Result<Connection, StoreError>;

    fn connections_involving(&self, router_id: u64) -> Result<Vec<Connection>, StoreError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    next_router_id: u64,
    next_port_id: u64,
    next_connection_id: u64,
    routers: BTreeMap<u64, Router>,
    connections: BTreeMap<u64, Connection>,
}

impl Tables {
    fn router_by_ip(&self, ip: &str) -> Option<&Router> {
        self.routers.values().find(|r| r.ip_address == ip)
    }

    /// Assigns ids to unsaved ports and ties every port to its router.
    fn assign_port_ids(&mut self, router: &mut Router) {
        for port in &mut router.ports {
            if port.id == 0 {
                self.next_port_id += 1;
                port.id = self.next_port_id;
            }
            port.router_id = router.id;
        }
    }
}

fn check_unique_ports(router: &Router) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for port in &router.ports {
        if !seen.insert((port.number, port.protocol)) {
            return Err(StoreError::DuplicatePort {
                router_id: router.id,
                number: port.number,
                protocol: port.protocol,
            });
        }
    }
    Ok(())
}

/// In-memory [`Store`] with optional JSON snapshot persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    data_file: Option<PathBuf>,
}

impl MemoryStore {
    /// Creates an empty store that is never written to disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by `path`.
    ///
    /// A missing file yields an empty store; the file is created on the
    /// first mutation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the file exists but cannot be read.
    /// Returns `StoreError::Json` if its contents are malformed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tables = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let tables: Tables = serde_json::from_str(&content)?;
            info!(
                "Loaded {} routers and {} connections from {:?}",
                tables.routers.len(),
                tables.connections.len(),
                path
            );
            tables
        } else {
            Tables::default()
        };

        Ok(Self {
            tables: RwLock::new(tables),
            data_file: Some(path),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }

    /// Applies `change` to a copy of the tables, writes the snapshot and only
    /// then swaps the copy in. A failed change or write leaves state as it was.
    fn commit<T>(
        &self,
        change: impl FnOnce(&mut Tables) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.write()?;
        let mut staged = (*tables).clone();
        let out = change(&mut staged)?;
        self.persist(&staged)?;
        *tables = staged;
        Ok(out)
    }

    /// Mirrors `tables` to the snapshot file, if one is configured.
    fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        write_snapshot(path, tables)
    }
}

fn write_snapshot(path: &Path, tables: &Tables) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json_data = serde_json::to_string_pretty(tables)?;
    fs::write(path, json_data)?;
    debug!("Saved snapshot to {:?}", path);
    Ok(())
}

fn router_mut(tables: &mut Tables, id: u64) -> Result<&mut Router, StoreError> {
    tables
        .routers
        .get_mut(&id)
        .ok_or_else(|| StoreError::NotFound(format!("router {id}")))
}

impl Store for MemoryStore {
    fn create_router(&self, mut router: Router) -> Result<Router, StoreError> {
        self.commit(|tables| {
            if tables.router_by_ip(&router.ip_address).is_some() {
                return Err(StoreError::IpConflict(router.ip_address.clone()));
            }
            check_unique_ports(&router)?;

            tables.next_router_id += 1;
            router.id = tables.next_router_id;
            tables.assign_port_ids(&mut router);
            tables.routers.insert(router.id, router.clone());
            Ok(router)
        })
    }

    fn list_routers(&self) -> Result<Vec<Router>, StoreError> {
        Ok(self.read()?.routers.values().cloned().collect())
    }

    fn router_by_id(&self, id: u64) -> Result<Router, StoreError> {
        self.read()?
            .routers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("router {id}")))
    }

    fn router_by_ip(&self, ip: &str) -> Result<Router, StoreError> {
        self.read()?
            .router_by_ip(ip)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("router with IP {ip}")))
    }

    fn is_ip_taken(&self, ip: &str) -> Result<bool, StoreError> {
        Ok(self.read()?.router_by_ip(ip).is_some())
    }

    fn update_router(&self, router: &Router) -> Result<Router, StoreError> {
        self.commit(|tables| {
            if !tables.routers.contains_key(&router.id) {
                return Err(StoreError::NotFound(format!("router {}", router.id)));
            }
            if tables
                .router_by_ip(&router.ip_address)
                .is_some_and(|other| other.id != router.id)
            {
                return Err(StoreError::IpConflict(router.ip_address.clone()));
            }
            check_unique_ports(router)?;

            let mut saved = router.clone();
            tables.assign_port_ids(&mut saved);
            tables.routers.insert(saved.id, saved.clone());
            Ok(saved)
        })
    }

    fn update_router_fields(&self, id: u64, patch: &RouterPatch) -> Result<(), StoreError> {
        self.commit(|tables| {
            let router = router_mut(tables, id)?;
            if let Some(name) = &patch.name {
                router.name.clone_from(name);
            }
            if let Some(status) = patch.status {
                router.status = status;
            }
            if let Some(connected) = patch.connected {
                router.connected = connected;
            }
            Ok(())
        })
    }

    fn mark_connected(&self, id: u64) -> Result<Router, StoreError> {
        self.commit(|tables| {
            let router = router_mut(tables, id)?;
            if router.connected {
                return Err(StoreError::AlreadyConnected(router.ip_address.clone()));
            }
            router.connected = true;
            Ok(router.clone())
        })
    }

    fn connection_exists(&self, a: u64, b: u64) -> Result<bool, StoreError> {
        Ok(self.read()?.connections.values().any(|c| c.links(a, b)))
    }

    fn create_connection(&self, mut connection: Connection) -> Result<Connection, StoreError> {
        self.commit(|tables| {
            let (a, b) = (connection.router_from_id, connection.router_to_id);
            if tables.connections.values().any(|c| c.links(a, b)) {
                return Err(StoreError::ConnectionConflict(a, b));
            }

            tables.next_connection_id += 1;
            connection.id = tables.next_connection_id;
            tables.connections.insert(connection.id, connection.clone());
            Ok(connection)
        })
    }

    fn list_connections(&self) -> Result<Vec<Connection>, StoreError> {
        Ok(self.read()?.connections.values().cloned().collect())
    }

    fn connection_by_id(&self, id: u64) -> Result<Connection, StoreError> {
        self.read()?
            .connections
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("connection {id}")))
    }

    fn connections_involving(&self, router_id: u64) -> Result<Vec<Connection>, StoreError> {
        Ok(self
            .read()?
            .connections
            .values()
            .filter(|c| c.involves(router_id))
            .cloned()
            .collect())
    }
}
