//! Relational persistence
//!
//! A single SQLite file holds the whole device tree. Every in-memory
//! mutation enqueues a [`WriteOp`] in the same critical section as the
//! update; a dedicated writer thread coalesces ops within a quiet window
//! and commits them in one transaction. On startup the controller reads
//! the entire tree back in topological order.

pub mod migrations;

use chrono::TimeZone;
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use zigbee_wire::zdo::{Neighbor, NodeDescriptor, Route};
use zigbee_wire::{Eui64, ZclValue};

use crate::device::{ClusterState, Device, DeviceStatus, Endpoint};
use crate::group::Groups;

pub use migrations::SCHEMA_VERSION;

/// Default write coalescing window
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(100);

/// Persistence errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database schema v{found} is newer than supported v{supported}")]
    IncompatibleVersion { found: i64, supported: i64 },

    #[error("Value serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persistence engine is shut down")]
    Closed,
}

/// One queued mutation
#[derive(Debug)]
pub enum WriteOp {
    /// Upsert the device row (address, status, last seen, node descriptor)
    SaveDevice(Box<Device>),
    /// Upsert the device row plus its endpoint and cluster structure
    SaveDeviceTree(Box<Device>),
    DeleteDevice(Eui64),
    SaveAttribute {
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attr_id: u16,
        value: ZclValue,
    },
    SaveUnsupportedAttribute {
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attr_id: u16,
    },
    ReplaceNeighbors {
        ieee: Eui64,
        neighbors: Vec<Neighbor>,
    },
    ReplaceRoutes {
        ieee: Eui64,
        routes: Vec<Route>,
    },
    SaveRelays {
        ieee: Eui64,
        relays: Vec<u16>,
    },
    SaveGroup {
        group_id: u16,
        name: String,
    },
    RemoveGroup {
        group_id: u16,
    },
    SaveGroupMember {
        group_id: u16,
        ieee: Eui64,
        endpoint: u8,
    },
    RemoveGroupMember {
        group_id: u16,
        ieee: Eui64,
        endpoint: u8,
    },
    SaveNetworkBackup {
        backup_json: String,
    },
}

/// Everything read back at startup
#[derive(Debug, Default)]
pub struct LoadedState {
    pub devices: Vec<Device>,
    pub groups: Groups,
    /// (monotonic id, JSON blob), oldest first
    pub backups: Vec<(i64, String)>,
}

/// Synchronous store over one SQLite connection
///
/// Used from the single writer thread; readers run on the same thread and
/// therefore always see write-through state.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        // Foreign keys stay off while old table generations are dropped
        conn.pragma_update(None, "foreign_keys", false)?;
        migrations::migrate(&mut conn)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn })
    }

    /// Apply a batch of ops in one transaction
    ///
    /// The transaction either commits every op or none of them, so the
    /// database can never hold half of an in-memory mutation.
    pub fn apply(&mut self, ops: &[WriteOp]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        for op in ops {
            match op {
                WriteOp::SaveDevice(device) => save_device_row(&tx, device)?,
                WriteOp::SaveDeviceTree(device) => {
                    save_device_row(&tx, device)?;
                    save_device_structure(&tx, device)?;
                }
                WriteOp::DeleteDevice(ieee) => {
                    tx.execute(
                        "DELETE FROM devices_v11 WHERE ieee = ?1",
                        params![ieee.to_string()],
                    )?;
                }
                WriteOp::SaveAttribute {
                    ieee,
                    endpoint,
                    cluster,
                    attr_id,
                    value,
                } => {
                    tx.execute(
                        "INSERT OR REPLACE INTO attributes_cache_v11 \
                         (ieee, endpoint_id, cluster, attrid, value) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            ieee.to_string(),
                            endpoint,
                            cluster,
                            attr_id,
                            serde_json::to_string(value)?
                        ],
                    )?;
                }
                WriteOp::SaveUnsupportedAttribute {
                    ieee,
                    endpoint,
                    cluster,
                    attr_id,
                } => {
                    tx.execute(
                        "INSERT OR IGNORE INTO unsupported_attributes_v11 \
                         (ieee, endpoint_id, cluster, attrid) VALUES (?1, ?2, ?3, ?4)",
                        params![ieee.to_string(), endpoint, cluster, attr_id],
                    )?;
                }
                WriteOp::ReplaceNeighbors { ieee, neighbors } => {
                    tx.execute(
                        "DELETE FROM neighbors_v11 WHERE device_ieee = ?1",
                        params![ieee.to_string()],
                    )?;
                    for n in neighbors {
                        tx.execute(
                            "INSERT INTO neighbors_v11 (device_ieee, extended_pan_id, ieee, \
                             nwk, device_type, rx_on_when_idle, relationship, permit_joining, \
                             depth, lqi) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                            params![
                                ieee.to_string(),
                                n.extended_pan_id.to_string(),
                                n.ieee.to_string(),
                                n.nwk,
                                n.device_type,
                                n.rx_on_when_idle,
                                n.relationship,
                                n.permit_joining,
                                n.depth,
                                n.lqi
                            ],
                        )?;
                    }
                }
                WriteOp::ReplaceRoutes { ieee, routes } => {
                    tx.execute(
                        "DELETE FROM routes_v11 WHERE device_ieee = ?1",
                        params![ieee.to_string()],
                    )?;
                    for r in routes {
                        tx.execute(
                            "INSERT INTO routes_v11 (device_ieee, dst_nwk, route_status, \
                             memory_constrained, many_to_one, route_record_required, next_hop) \
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                            params![
                                ieee.to_string(),
                                r.dst_nwk,
                                r.route_status,
                                r.memory_constrained,
                                r.many_to_one,
                                r.route_record_required,
                                r.next_hop
                            ],
                        )?;
                    }
                }
                WriteOp::SaveRelays { ieee, relays } => {
                    tx.execute(
                        "INSERT OR REPLACE INTO relays_v11 (ieee, relays) VALUES (?1, ?2)",
                        params![ieee.to_string(), serde_json::to_string(relays)?],
                    )?;
                }
                WriteOp::SaveGroup { group_id, name } => {
                    tx.execute(
                        "INSERT OR REPLACE INTO groups_v11 (group_id, name) VALUES (?1, ?2)",
                        params![group_id, name],
                    )?;
                }
                WriteOp::RemoveGroup { group_id } => {
                    tx.execute(
                        "DELETE FROM groups_v11 WHERE group_id = ?1",
                        params![group_id],
                    )?;
                }
                WriteOp::SaveGroupMember {
                    group_id,
                    ieee,
                    endpoint,
                } => {
                    tx.execute(
                        "INSERT OR IGNORE INTO group_members_v11 (group_id, ieee, endpoint_id) \
                         VALUES (?1, ?2, ?3)",
                        params![group_id, ieee.to_string(), endpoint],
                    )?;
                }
                WriteOp::RemoveGroupMember {
                    group_id,
                    ieee,
                    endpoint,
                } => {
                    tx.execute(
                        "DELETE FROM group_members_v11 \
                         WHERE group_id = ?1 AND ieee = ?2 AND endpoint_id = ?3",
                        params![group_id, ieee.to_string(), endpoint],
                    )?;
                }
                WriteOp::SaveNetworkBackup { backup_json } => {
                    tx.execute(
                        "INSERT INTO network_backups_v11 (backup_json) VALUES (?1)",
                        params![backup_json],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Read the whole device tree, groups and backups in topological order
    pub fn load(&self) -> Result<LoadedState, StoreError> {
        let mut state = LoadedState::default();
        let conn = &self.conn;

        // devices
        let mut devices: Vec<Device> = Vec::new();
        {
            let mut stmt =
                conn.prepare("SELECT ieee, nwk, status, last_seen FROM devices_v11")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u16>(1)?,
                    row.get::<_, u8>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?;
            for row in rows {
                let (ieee_str, nwk, status, last_seen) = row?;
                let Some(ieee) = Eui64::parse(&ieee_str) else {
                    tracing::warn!("Skipping device row with bad IEEE: {}", ieee_str);
                    continue;
                };
                let mut device = Device::new(ieee, nwk);
                device.status = DeviceStatus::from_u8(status);
                if last_seen > 0.0 {
                    device.last_seen = chrono::Utc
                        .timestamp_millis_opt((last_seen * 1000.0) as i64)
                        .single();
                }
                devices.push(device);
            }
        }

        let find = |devices: &mut Vec<Device>, ieee_str: &str| -> Option<usize> {
            let ieee = Eui64::parse(ieee_str)?;
            devices.iter().position(|d| d.ieee == ieee)
        };

        // endpoints
        {
            let mut stmt = conn.prepare(
                "SELECT ieee, endpoint_id, profile_id, device_type FROM endpoints_v11",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u8>(1)?,
                    row.get::<_, u16>(2)?,
                    row.get::<_, u16>(3)?,
                ))
            })?;
            for row in rows {
                let (ieee_str, endpoint_id, profile_id, device_type) = row?;
                if let Some(i) = find(&mut devices, &ieee_str) {
                    devices[i].endpoints.insert(
                        endpoint_id,
                        Endpoint {
                            id: endpoint_id,
                            profile_id,
                            device_type,
                            in_clusters: Default::default(),
                            out_clusters: Default::default(),
                        },
                    );
                }
            }
        }

        // in/out clusters
        for (table, is_input) in [("in_clusters_v11", true), ("out_clusters_v11", false)] {
            let mut stmt =
                conn.prepare(&format!("SELECT ieee, endpoint_id, cluster FROM {table}"))?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u8>(1)?,
                    row.get::<_, u16>(2)?,
                ))
            })?;
            for row in rows {
                let (ieee_str, endpoint_id, cluster) = row?;
                if let Some(i) = find(&mut devices, &ieee_str) {
                    if let Some(ep) = devices[i].endpoints.get_mut(&endpoint_id) {
                        let clusters = if is_input {
                            &mut ep.in_clusters
                        } else {
                            &mut ep.out_clusters
                        };
                        clusters.insert(cluster, ClusterState::default());
                    }
                }
            }
        }

        // node descriptors
        {
            let mut stmt = conn.prepare(
                "SELECT ieee, logical_type, complex_descriptor, user_descriptor, aps_flags, \
                 frequency_band, mac_capability_flags, manufacturer_code, max_buffer_size, \
                 max_incoming_transfer_size, server_mask, max_outgoing_transfer_size, \
                 descriptor_capability FROM node_descriptors_v11",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    NodeDescriptor {
                        logical_type: row.get(1)?,
                        complex_descriptor_available: row.get(2)?,
                        user_descriptor_available: row.get(3)?,
                        aps_flags: row.get(4)?,
                        frequency_band: row.get(5)?,
                        mac_capability_flags: row.get(6)?,
                        manufacturer_code: row.get(7)?,
                        max_buffer_size: row.get(8)?,
                        max_incoming_transfer_size: row.get(9)?,
                        server_mask: row.get(10)?,
                        max_outgoing_transfer_size: row.get(11)?,
                        descriptor_capability: row.get(12)?,
                    },
                ))
            })?;
            for row in rows {
                let (ieee_str, descriptor) = row?;
                if let Some(i) = find(&mut devices, &ieee_str) {
                    devices[i].node_descriptor = Some(descriptor);
                }
            }
        }

        // attribute cache; rows for endpoints without descriptors (virtual
        // clusters) stay in the database but cannot attach to the tree
        {
            let mut stmt = conn.prepare(
                "SELECT ieee, endpoint_id, cluster, attrid, value FROM attributes_cache_v11",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u8>(1)?,
                    row.get::<_, u16>(2)?,
                    row.get::<_, u16>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;
            for row in rows {
                let (ieee_str, endpoint_id, cluster, attr_id, value_json) = row?;
                let value: ZclValue = match serde_json::from_str(&value_json) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("Skipping undecodable attribute value: {}", e);
                        continue;
                    }
                };
                if let Some(i) = find(&mut devices, &ieee_str) {
                    if let Some(ep) = devices[i].endpoints.get_mut(&endpoint_id) {
                        if let Some(state) = ep
                            .in_clusters
                            .get_mut(&cluster)
                            .or_else(|| ep.out_clusters.get_mut(&cluster))
                        {
                            state.attributes.insert(attr_id, value.clone());
                        }
                    }
                    // Basic cluster identity feeds the device row
                    if cluster == crate::registry::cluster_id::BASIC {
                        if let Some(s) = value.as_str() {
                            match attr_id {
                                crate::registry::basic_attr::MANUFACTURER_NAME => {
                                    devices[i].manufacturer = Some(s.to_string());
                                }
                                crate::registry::basic_attr::MODEL_IDENTIFIER => {
                                    devices[i].model = Some(s.to_string());
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
        }

        // neighbors
        {
            let mut stmt = conn.prepare(
                "SELECT device_ieee, extended_pan_id, ieee, nwk, device_type, \
                 rx_on_when_idle, relationship, permit_joining, depth, lqi FROM neighbors_v11",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u16>(3)?,
                    row.get::<_, u8>(4)?,
                    row.get::<_, u8>(5)?,
                    row.get::<_, u8>(6)?,
                    row.get::<_, u8>(7)?,
                    row.get::<_, u8>(8)?,
                    row.get::<_, u8>(9)?,
                ))
            })?;
            for row in rows {
                let (device_str, epid_str, ieee_str, nwk, dt, rx, rel, pj, depth, lqi) = row?;
                let (Some(i), Some(extended_pan_id), Some(ieee)) = (
                    find(&mut devices, &device_str),
                    Eui64::parse(&epid_str),
                    Eui64::parse(&ieee_str),
                ) else {
                    continue;
                };
                devices[i].neighbors.push(Neighbor {
                    extended_pan_id,
                    ieee,
                    nwk,
                    device_type: dt,
                    rx_on_when_idle: rx,
                    relationship: rel,
                    permit_joining: pj,
                    depth,
                    lqi,
                });
            }
        }

        // routes
        {
            let mut stmt = conn.prepare(
                "SELECT device_ieee, dst_nwk, route_status, memory_constrained, many_to_one, \
                 route_record_required, next_hop FROM routes_v11",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Route {
                        dst_nwk: row.get(1)?,
                        route_status: row.get(2)?,
                        memory_constrained: row.get(3)?,
                        many_to_one: row.get(4)?,
                        route_record_required: row.get(5)?,
                        next_hop: row.get(6)?,
                    },
                ))
            })?;
            for row in rows {
                let (ieee_str, route) = row?;
                if let Some(i) = find(&mut devices, &ieee_str) {
                    devices[i].routes.push(route);
                }
            }
        }

        // relays
        {
            let mut stmt = conn.prepare("SELECT ieee, relays FROM relays_v11")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
            for row in rows {
                let (ieee_str, relays_json) = row?;
                if let Some(i) = find(&mut devices, &ieee_str) {
                    devices[i].relays = serde_json::from_str(&relays_json).unwrap_or_default();
                }
            }
        }

        // groups and members
        {
            let mut stmt = conn.prepare("SELECT group_id, name FROM groups_v11")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, u16>(0)?, row.get::<_, String>(1)?))
                })?;
            for row in rows {
                let (group_id, name) = row?;
                state.groups.add(group_id, &name);
            }
        }
        {
            let mut stmt =
                conn.prepare("SELECT group_id, ieee, endpoint_id FROM group_members_v11")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, u16>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u8>(2)?,
                ))
            })?;
            for row in rows {
                let (group_id, ieee_str, endpoint) = row?;
                if let Some(ieee) = Eui64::parse(&ieee_str) {
                    state.groups.add_member(group_id, ieee, endpoint);
                }
            }
        }

        // unsupported attributes
        {
            let mut stmt = conn.prepare(
                "SELECT ieee, endpoint_id, cluster, attrid FROM unsupported_attributes_v11",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u8>(1)?,
                    row.get::<_, u16>(2)?,
                    row.get::<_, u16>(3)?,
                ))
            })?;
            for row in rows {
                let (ieee_str, endpoint_id, cluster, attr_id) = row?;
                if let Some(i) = find(&mut devices, &ieee_str) {
                    if let Some(ep) = devices[i].endpoints.get_mut(&endpoint_id) {
                        if let Some(state) = ep
                            .in_clusters
                            .get_mut(&cluster)
                            .or_else(|| ep.out_clusters.get_mut(&cluster))
                        {
                            state.unsupported.insert(attr_id);
                        }
                    }
                }
            }
        }

        // network backups
        {
            let mut stmt =
                conn.prepare("SELECT id, backup_json FROM network_backups_v11 ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?;
            for row in rows {
                state.backups.push(row?);
            }
        }

        state.devices = devices;
        tracing::info!(
            "Loaded {} devices and {} groups from database",
            state.devices.len(),
            state.groups.len()
        );
        Ok(state)
    }

    #[cfg(test)]
    fn count(&self, table: &str) -> i64 {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap()
    }
}

fn save_device_row(tx: &rusqlite::Transaction<'_>, device: &Device) -> Result<(), StoreError> {
    let last_seen = device
        .last_seen
        .map(|t| t.timestamp_millis() as f64 / 1000.0)
        .unwrap_or(0.0);
    tx.execute(
        "INSERT INTO devices_v11 (ieee, nwk, status, last_seen) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(ieee) DO UPDATE SET nwk = ?2, status = ?3, last_seen = ?4",
        params![
            device.ieee.to_string(),
            device.nwk,
            device.status.to_u8(),
            last_seen
        ],
    )?;
    if let Some(d) = &device.node_descriptor {
        tx.execute(
            "INSERT OR REPLACE INTO node_descriptors_v11 (ieee, logical_type, \
             complex_descriptor, user_descriptor, aps_flags, frequency_band, \
             mac_capability_flags, manufacturer_code, max_buffer_size, \
             max_incoming_transfer_size, server_mask, max_outgoing_transfer_size, \
             descriptor_capability) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                device.ieee.to_string(),
                d.logical_type,
                d.complex_descriptor_available,
                d.user_descriptor_available,
                d.aps_flags,
                d.frequency_band,
                d.mac_capability_flags,
                d.manufacturer_code,
                d.max_buffer_size,
                d.max_incoming_transfer_size,
                d.server_mask,
                d.max_outgoing_transfer_size,
                d.descriptor_capability
            ],
        )?;
    }
    Ok(())
}

fn save_device_structure(
    tx: &rusqlite::Transaction<'_>,
    device: &Device,
) -> Result<(), StoreError> {
    let ieee = device.ieee.to_string();

    // Endpoints no longer on the device cascade their clusters (and group
    // memberships) out; the attribute cache keys on the device and survives
    let keep: Vec<String> = device.endpoints.keys().map(u8::to_string).collect();
    tx.execute(
        &format!(
            "DELETE FROM endpoints_v11 WHERE ieee = ?1 AND endpoint_id NOT IN ({})",
            if keep.is_empty() {
                "-1".to_string()
            } else {
                keep.join(", ")
            }
        ),
        params![ieee],
    )?;

    for endpoint in device.endpoints.values() {
        tx.execute(
            "INSERT INTO endpoints_v11 (ieee, endpoint_id, profile_id, device_type, status) \
             VALUES (?1, ?2, ?3, ?4, 1) \
             ON CONFLICT(ieee, endpoint_id) DO UPDATE SET profile_id = ?3, device_type = ?4",
            params![ieee, endpoint.id, endpoint.profile_id, endpoint.device_type],
        )?;
        for (table, clusters) in [
            ("in_clusters_v11", &endpoint.in_clusters),
            ("out_clusters_v11", &endpoint.out_clusters),
        ] {
            let keep: Vec<String> = clusters.keys().map(u16::to_string).collect();
            tx.execute(
                &format!(
                    "DELETE FROM {table} WHERE ieee = ?1 AND endpoint_id = ?2 \
                     AND cluster NOT IN ({})",
                    if keep.is_empty() {
                        "-1".to_string()
                    } else {
                        keep.join(", ")
                    }
                ),
                params![ieee, endpoint.id],
            )?;
            for cluster_id in clusters.keys() {
                tx.execute(
                    &format!(
                        "INSERT OR IGNORE INTO {table} (ieee, endpoint_id, cluster) \
                         VALUES (?1, ?2, ?3)"
                    ),
                    params![ieee, endpoint.id, cluster_id],
                )?;
            }
        }
    }
    Ok(())
}

enum Command {
    Op(WriteOp),
    Flush(oneshot::Sender<Result<(), String>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the write-through engine
///
/// Cheap to clone; ops are queued to a dedicated writer thread that owns
/// the connection, batches within the quiet window and commits once.
#[derive(Clone)]
pub struct Persistence {
    tx: std::sync::mpsc::Sender<Command>,
}

impl Persistence {
    pub fn start(store: Store) -> Self {
        Self::with_quiet_window(store, DEFAULT_QUIET_WINDOW)
    }

    pub fn with_quiet_window(store: Store, quiet: Duration) -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::Builder::new()
            .name("zigbee-persistence".into())
            .spawn(move || writer_loop(store, rx, quiet))
            .expect("failed to spawn persistence thread");
        Self { tx }
    }

    /// Queue a mutation; call in the same critical section as the
    /// in-memory update
    pub fn enqueue(&self, op: WriteOp) {
        if self.tx.send(Command::Op(op)).is_err() {
            tracing::error!("Persistence engine is gone; dropping write");
        }
    }

    /// Force everything queued so far to disk
    pub async fn flush(&self) -> Result<(), StoreError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack_tx))
            .map_err(|_| StoreError::Closed)?;
        match ack_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!("Persistence flush failed: {}", e);
                Err(StoreError::Closed)
            }
            Err(_) => Err(StoreError::Closed),
        }
    }

    /// Flush and stop the writer thread
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

fn writer_loop(mut store: Store, rx: std::sync::mpsc::Receiver<Command>, quiet: Duration) {
    use std::sync::mpsc::RecvTimeoutError;

    loop {
        let first = match rx.recv() {
            Ok(command) => command,
            Err(_) => break,
        };

        let mut batch = Vec::new();
        let mut flushes = Vec::new();
        let mut shutdown = None;
        match first {
            Command::Op(op) => batch.push(op),
            Command::Flush(ack) => flushes.push(ack),
            Command::Shutdown(ack) => shutdown = Some(ack),
        }

        // Coalesce everything that arrives within the quiet window; a
        // flush or shutdown ends the window immediately
        while shutdown.is_none() && flushes.is_empty() {
            match rx.recv_timeout(quiet) {
                Ok(Command::Op(op)) => batch.push(op),
                Ok(Command::Flush(ack)) => flushes.push(ack),
                Ok(Command::Shutdown(ack)) => shutdown = Some(ack),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    shutdown = None;
                    break;
                }
            }
        }
        // Drain anything already queued behind a flush/shutdown
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Op(op) => batch.push(op),
                Command::Flush(ack) => flushes.push(ack),
                Command::Shutdown(ack) => shutdown = Some(ack),
            }
        }

        let result = if batch.is_empty() {
            Ok(())
        } else {
            store.apply(&batch)
        };
        if let Err(e) = &result {
            tracing::error!("Persistence commit of {} ops failed: {}", batch.len(), e);
        }
        for ack in flushes {
            let _ = ack.send(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        }
        if let Some(ack) = shutdown {
            let _ = ack.send(());
            break;
        }
    }
    tracing::debug!("Persistence writer thread stopped");
}
