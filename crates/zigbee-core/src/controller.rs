//! The application controller
//!
//! Owns the device table, dispatches inbound APS packets to the right
//! cluster handler, serializes outbound requests behind a wrapping TSN
//! allocator with per-device FIFO delivery, fans events out to listeners,
//! and drives interviews, groups, permit-join and backup/restore.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};

use zigbee_wire::zcl::{
    Direction, FrameType, GeneralCommand, GeneralCommandId, ReadAttributeRecord,
    WriteAttributeRecord, ZclFrame, ZclStatus,
};
use zigbee_wire::{profiles, zdo, Eui64, ZclValue, ZdoCluster};

use crate::backup::NetworkBackup;
use crate::config::Config;
use crate::device::{
    Device, DeviceStatus, ACTIVE_EP_ATTEMPTS, NODE_DESC_ATTEMPTS, SIMPLE_DESC_ATTEMPTS,
};
use crate::error::ControllerError;
use crate::event::Event;
use crate::group::Groups;
use crate::ota::OtaEngine;
use crate::persistence::{Persistence, Store, WriteOp};
use crate::radio::{
    ApsFrame, ApsPacket, Destination, NetworkInfo, NodeInfo, RadioDriver, RadioEvent,
    BROADCAST_RX_ON_WHEN_IDLE,
};
use crate::registry::{basic_attr, cluster_id, Registry};

/// Default unicast reply timeout
pub const UNICAST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout for interview steps
pub const INTERVIEW_TIMEOUT: Duration = Duration::from_secs(60);
/// Base delay for interview retry backoff
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// The coordinator's application endpoint
pub const COORDINATOR_ENDPOINT: u8 = 1;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeouts {
    pub unicast: Duration,
    pub interview: Duration,
    pub backoff_base: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            unicast: UNICAST_TIMEOUT,
            interview: INTERVIEW_TIMEOUT,
            backoff_base: BACKOFF_BASE,
        }
    }
}

/// A request awaiting its reply
///
/// The TSN alone is ambiguous after wrap-around; collisions are resolved
/// by also matching (src_ep, dst_ep, cluster, direction) of the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PendingKey {
    tsn: u8,
    nwk: u16,
    /// Cluster the reply arrives on (request cluster | 0x8000 for ZDO)
    cluster: u16,
    /// Remote endpoint the reply comes from (the request's destination)
    src_endpoint: u8,
    /// Local endpoint the reply targets (the request's source)
    dst_endpoint: u8,
    /// ZCL direction of the reply; None for ZDO frames, which have no
    /// frame-control byte
    direction: Option<Direction>,
}

struct PendingReply {
    tx: oneshot::Sender<ApsPacket>,
}

/// The application controller; construct with [`Controller::new`] and share
/// as `Arc<Controller>`
pub struct Controller {
    config: Config,
    radio: Arc<dyn RadioDriver>,
    registry: Arc<Registry>,
    devices: Arc<DashMap<Eui64, Device>>,
    groups: Arc<std::sync::Mutex<Groups>>,
    persistence: Persistence,
    ota: OtaEngine,
    event_tx: broadcast::Sender<Event>,
    tsn: AtomicU8,
    pending: Mutex<HashMap<PendingKey, PendingReply>>,
    /// Per-device send locks: one request in flight per destination
    device_locks: DashMap<Eui64, Arc<Mutex<()>>>,
    network: std::sync::Mutex<Option<(NetworkInfo, NodeInfo)>>,
    running: AtomicBool,
    timeouts: Timeouts,
}

impl Controller {
    /// Open the database, load the device tree and build a controller
    pub async fn new(
        config: Config,
        radio: Arc<dyn RadioDriver>,
    ) -> Result<Arc<Self>, ControllerError> {
        Self::with_parts(config, radio, Arc::new(Registry::standard()), Timeouts::default()).await
    }

    pub(crate) async fn with_parts(
        config: Config,
        radio: Arc<dyn RadioDriver>,
        registry: Arc<Registry>,
        timeouts: Timeouts,
    ) -> Result<Arc<Self>, ControllerError> {
        let store = Store::open(&config.database_path)?;
        let state = store.load()?;

        let devices = Arc::new(DashMap::new());
        for device in state.devices {
            devices.insert(device.ieee, device);
        }
        let groups = Arc::new(std::sync::Mutex::new(state.groups));
        let persistence = Persistence::start(store);
        let ota = OtaEngine::from_config(&config.ota);

        let (event_tx, _) = broadcast::channel(256);

        Ok(Arc::new(Self {
            config,
            radio,
            registry,
            devices,
            groups,
            persistence,
            ota,
            event_tx,
            tsn: AtomicU8::new(0),
            pending: Mutex::new(HashMap::new()),
            device_locks: DashMap::new(),
            network: std::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            timeouts,
        }))
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Bring the network up and start dispatching radio events
    pub async fn start(
        self: &Arc<Self>,
        auto_form: bool,
        radio_events: mpsc::Receiver<RadioEvent>,
    ) -> Result<(), ControllerError> {
        if !self.radio.probe().await {
            return Err(ControllerError::RadioUnavailable(
                "no radio answered the configured device".into(),
            ));
        }
        let auto_form = auto_form || self.config.startup.auto_form;
        self.radio.startup(auto_form).await?;

        let info = self.radio.network_info().await?;
        tracing::info!(
            "Network up: pan={:#06x} channel={} coordinator={}",
            info.0.pan_id,
            info.0.channel,
            info.1.ieee
        );
        *self.network.lock().expect("network lock") = Some(info);
        self.running.store(true, Ordering::SeqCst);

        self.spawn_dispatch(radio_events);
        if auto_form {
            self.emit(Event::NetworkFormed);
        }
        Ok(())
    }

    /// Flush state and release the radio
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.running.store(false, Ordering::SeqCst);
        self.persistence.flush().await?;
        self.persistence.shutdown().await;
        self.radio.shutdown().await?;
        Ok(())
    }

    /// Drain radio events on a single dispatch task
    fn spawn_dispatch(self: &Arc<Self>, mut radio_events: mpsc::Receiver<RadioEvent>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = radio_events.recv().await {
                match event {
                    RadioEvent::PacketReceived(packet) => controller.packet_received(packet).await,
                    RadioEvent::DeviceJoined {
                        nwk,
                        ieee,
                        parent_nwk,
                    } => controller.handle_join(nwk, ieee, parent_nwk).await,
                    RadioEvent::DeviceLeft { nwk, ieee } => controller.handle_leave(nwk, ieee).await,
                    RadioEvent::RelaysUpdated { ieee, relays } => {
                        controller.handle_relays_updated(ieee, relays).await;
                    }
                }
            }
            tracing::debug!("Radio event channel closed, dispatch stopped");
        });
    }

    // ---- addressing helpers -------------------------------------------------

    fn device_by_nwk(&self, nwk: u16) -> Option<Eui64> {
        self.devices
            .iter()
            .find(|entry| entry.nwk == nwk)
            .map(|entry| entry.ieee)
    }

    fn nwk_of(&self, ieee: Eui64) -> Result<u16, ControllerError> {
        self.devices
            .get(&ieee)
            .map(|d| d.nwk)
            .ok_or(ControllerError::DeviceNotFound(ieee))
    }

    /// Allocate the next transaction sequence number (wraps through 0..255)
    pub fn next_tsn(&self) -> u8 {
        self.tsn.fetch_add(1, Ordering::SeqCst)
    }

    fn device_lock(&self, ieee: Eui64) -> Arc<Mutex<()>> {
        self.device_locks
            .entry(ieee)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ---- outbound path ------------------------------------------------------

    /// Send a unicast request; with `expect_reply` the matching reply payload
    /// is awaited and returned
    #[allow(clippy::too_many_arguments)]
    pub async fn request(
        &self,
        ieee: Eui64,
        profile: u16,
        cluster: u16,
        src_endpoint: u8,
        dst_endpoint: u8,
        sequence: u8,
        data: Vec<u8>,
        expect_reply: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<ApsPacket>, ControllerError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ControllerError::NotInitialized);
        }
        let nwk = self.nwk_of(ieee)?;

        // FIFO per destination: the lock is held across send and reply
        let lock = self.device_lock(ieee);
        let _guard = lock.lock().await;

        // ZDO replies come back on the request cluster with the high bit
        // set; ZCL replies flip the outbound frame's direction bit
        let (reply_cluster, reply_direction) = if profile == profiles::ZDO {
            (cluster | 0x8000, None)
        } else {
            let direction = match ZclFrame::parse(&data) {
                Ok(frame) => frame.header.control.direction.flipped(),
                Err(_) => Direction::ServerToClient,
            };
            (cluster, Some(direction))
        };
        let key = PendingKey {
            tsn: sequence,
            nwk,
            cluster: reply_cluster,
            src_endpoint: dst_endpoint,
            dst_endpoint: src_endpoint,
            direction: reply_direction,
        };
        let reply_rx = if expect_reply {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().await.insert(key, PendingReply { tx });
            Some(rx)
        } else {
            None
        };

        let frame = ApsFrame {
            dst: Destination::Unicast(nwk),
            profile,
            cluster,
            src_endpoint,
            dst_endpoint,
            sequence,
            radius: 0,
            data,
        };
        if let Err(e) = self.radio.send(frame).await {
            if expect_reply {
                self.pending.lock().await.remove(&key);
            }
            return Err(e.into());
        }

        let Some(rx) = reply_rx else {
            return Ok(None);
        };
        let timeout = timeout.unwrap_or(self.timeouts.unicast);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(packet)) => Ok(Some(packet)),
            Ok(Err(_)) => {
                // The pending slot was dropped without a reply
                Err(ControllerError::InvalidResponse("reply channel closed".into()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&key);
                Err(ControllerError::Timeout)
            }
        }
    }

    /// Broadcast a frame; no reply is awaited
    #[allow(clippy::too_many_arguments)]
    pub async fn broadcast(
        &self,
        broadcast_address: u16,
        profile: u16,
        cluster: u16,
        src_endpoint: u8,
        dst_endpoint: u8,
        sequence: u8,
        data: Vec<u8>,
    ) -> Result<(), ControllerError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ControllerError::NotInitialized);
        }
        self.radio
            .send(ApsFrame {
                dst: Destination::Broadcast(broadcast_address),
                profile,
                cluster,
                src_endpoint,
                dst_endpoint,
                sequence,
                radius: 0,
                data,
            })
            .await?;
        Ok(())
    }

    /// Multicast a frame to a group
    pub async fn multicast(
        &self,
        group_id: u16,
        profile: u16,
        cluster: u16,
        src_endpoint: u8,
        sequence: u8,
        data: Vec<u8>,
    ) -> Result<(), ControllerError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ControllerError::NotInitialized);
        }
        self.radio
            .send(ApsFrame {
                dst: Destination::Group(group_id),
                profile,
                cluster,
                src_endpoint,
                dst_endpoint: 0,
                sequence,
                radius: 0,
                data,
            })
            .await?;
        Ok(())
    }

    /// Open (or close, with 0) the network for joining
    pub async fn permit(&self, duration: u8, node: Option<Eui64>) -> Result<(), ControllerError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ControllerError::NotInitialized);
        }
        let duration = duration.min(254);

        match node {
            Some(ieee) => {
                let tsn = self.next_tsn();
                let payload = zdo::permit_joining_request(tsn, duration, true);
                self.request(
                    ieee,
                    profiles::ZDO,
                    ZdoCluster::MgmtPermitJoiningReq as u16,
                    0,
                    0,
                    tsn,
                    payload,
                    true,
                    None,
                )
                .await?;
            }
            None => {
                let tsn = self.next_tsn();
                let payload = zdo::permit_joining_request(tsn, duration, true);
                self.broadcast(
                    BROADCAST_RX_ON_WHEN_IDLE,
                    profiles::ZDO,
                    ZdoCluster::MgmtPermitJoiningReq as u16,
                    0,
                    0,
                    tsn,
                    payload,
                )
                .await?;
                self.radio.permit_ncp(duration).await?;
            }
        }
        self.emit(Event::PermitDuration { duration });
        Ok(())
    }

    // ---- ZDO / ZCL request helpers -----------------------------------------

    async fn zdo_request(
        &self,
        ieee: Eui64,
        cluster: ZdoCluster,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<ApsPacket, ControllerError> {
        let tsn = payload.first().copied().unwrap_or(0);
        let reply = self
            .request(
                ieee,
                profiles::ZDO,
                cluster as u16,
                0,
                0,
                tsn,
                payload,
                true,
                Some(timeout),
            )
            .await?;
        reply.ok_or_else(|| ControllerError::InvalidResponse("empty ZDO reply".into()))
    }

    /// Read attributes from a cluster, updating the cache
    pub async fn read_attributes(
        &self,
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attributes: &[u16],
    ) -> Result<Vec<ReadAttributeRecord>, ControllerError> {
        // Skip attributes already known to be unsupported
        let to_read: Vec<u16> = {
            let device = self
                .devices
                .get(&ieee)
                .ok_or(ControllerError::DeviceNotFound(ieee))?;
            let unsupported = device
                .endpoints
                .get(&endpoint)
                .and_then(|ep| {
                    ep.in_clusters
                        .get(&cluster)
                        .or_else(|| ep.out_clusters.get(&cluster))
                })
                .map(|state| state.unsupported.clone())
                .unwrap_or_default();
            attributes
                .iter()
                .copied()
                .filter(|attr| !unsupported.contains(attr))
                .collect()
        };
        if to_read.is_empty() {
            return Err(ControllerError::AttributeNotSupported {
                ieee,
                endpoint,
                cluster,
                attr: attributes.first().copied().unwrap_or_default(),
            });
        }

        let tsn = self.next_tsn();
        let frame = ZclFrame::general(
            tsn,
            &GeneralCommand::ReadAttributes(to_read),
            Direction::ClientToServer,
            None,
        );
        let reply = self
            .request(
                ieee,
                profiles::HOME_AUTOMATION,
                cluster,
                COORDINATOR_ENDPOINT,
                endpoint,
                tsn,
                frame.serialize(),
                true,
                None,
            )
            .await?
            .ok_or_else(|| ControllerError::InvalidResponse("missing read reply".into()))?;

        let zcl = ZclFrame::parse(&reply.payload)?;
        let GeneralCommand::ReadAttributesResponse(records) = zcl.general_command()? else {
            return Err(ControllerError::InvalidResponse(
                "expected Read-Attributes-Response".into(),
            ));
        };
        for record in &records {
            match (&record.status, &record.value) {
                (ZclStatus::Success, Some(value)) => {
                    self.update_attribute(ieee, endpoint, cluster, record.attr_id, value.clone());
                }
                (ZclStatus::UnsupportedAttribute, _) => {
                    self.mark_unsupported(ieee, endpoint, cluster, record.attr_id);
                }
                _ => {}
            }
        }
        Ok(records)
    }

    /// Write attributes to a cluster
    pub async fn write_attributes(
        &self,
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        values: Vec<(u16, ZclValue)>,
    ) -> Result<(), ControllerError> {
        let records = values
            .into_iter()
            .map(|(attr_id, value)| WriteAttributeRecord { attr_id, value })
            .collect();
        let tsn = self.next_tsn();
        let frame = ZclFrame::general(
            tsn,
            &GeneralCommand::WriteAttributes(records),
            Direction::ClientToServer,
            None,
        );
        self.request(
            ieee,
            profiles::HOME_AUTOMATION,
            cluster,
            COORDINATOR_ENDPOINT,
            endpoint,
            tsn,
            frame.serialize(),
            true,
            None,
        )
        .await?;
        Ok(())
    }

    /// Send a cluster-specific command encoded through the registry
    pub async fn send_cluster_command(
        &self,
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        command_id: u8,
        args: &[ZclValue],
        expect_reply: bool,
    ) -> Result<Option<ApsPacket>, ControllerError> {
        if self.registry.get(None, cluster).is_none() {
            return Err(ControllerError::UnsupportedCluster(cluster));
        }
        let payload =
            self.registry
                .encode_command(cluster, Direction::ClientToServer, command_id, args)?;
        let tsn = self.next_tsn();
        let frame = ZclFrame::cluster_request(tsn, command_id, payload, None);
        self.request(
            ieee,
            profiles::HOME_AUTOMATION,
            cluster,
            COORDINATOR_ENDPOINT,
            endpoint,
            tsn,
            frame.serialize(),
            expect_reply,
            None,
        )
        .await
    }

    /// Configure reporting for one attribute
    pub async fn configure_reporting(
        &self,
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attr_id: u16,
        min_interval: u16,
        max_interval: u16,
        reportable_change: Option<ZclValue>,
    ) -> Result<(), ControllerError> {
        let type_id = self.registry.attribute_type(cluster, attr_id).ok_or_else(|| {
            ControllerError::BadArgument(format!(
                "unknown attribute {attr_id:#06x} on cluster {cluster:#06x}"
            ))
        })?;
        if let Some(device) = self.devices.get_mut(&ieee).as_deref_mut() {
            if let Some(ep) = device.endpoints.get_mut(&endpoint) {
                if let Some(state) = ep
                    .in_clusters
                    .get_mut(&cluster)
                    .or_else(|| ep.out_clusters.get_mut(&cluster))
                {
                    state
                        .pending_reports
                        .insert(attr_id, (min_interval, max_interval));
                }
            }
        }
        let tsn = self.next_tsn();
        let frame = ZclFrame::general(
            tsn,
            &GeneralCommand::ConfigureReporting(vec![zigbee_wire::zcl::ReportingConfig::Reported {
                attr_id,
                type_id,
                min_interval,
                max_interval,
                reportable_change,
            }]),
            Direction::ClientToServer,
            None,
        );
        let reply = self
            .request(
                ieee,
                profiles::HOME_AUTOMATION,
                cluster,
                COORDINATOR_ENDPOINT,
                endpoint,
                tsn,
                frame.serialize(),
                true,
                None,
            )
            .await?
            .ok_or_else(|| ControllerError::InvalidResponse("missing configure reply".into()))?;

        let zcl = ZclFrame::parse(&reply.payload)?;
        let GeneralCommand::ConfigureReportingResponse(records) = zcl.general_command()? else {
            return Err(ControllerError::InvalidResponse(
                "expected Configure-Reporting-Response".into(),
            ));
        };
        // An all-success response is a lone SUCCESS record; otherwise the
        // device lists a status per rejected attribute
        let rejected = records
            .iter()
            .find(|r| r.status != ZclStatus::Success && (records.len() == 1 || r.attr_id == attr_id));
        if let Some(record) = rejected {
            // The entry stays pending until the device confirms it
            return Err(ControllerError::InvalidResponse(format!(
                "Configure-Reporting for {attr_id:#06x} rejected with status {:?}",
                record.status
            )));
        }

        if let Some(device) = self.devices.get_mut(&ieee).as_deref_mut() {
            if let Some(ep) = device.endpoints.get_mut(&endpoint) {
                if let Some(state) = ep
                    .in_clusters
                    .get_mut(&cluster)
                    .or_else(|| ep.out_clusters.get_mut(&cluster))
                {
                    state.pending_reports.remove(&attr_id);
                }
            }
        }
        Ok(())
    }

    /// Bind a device's cluster to the coordinator
    pub async fn bind(
        &self,
        ieee: Eui64,
        src_endpoint: u8,
        cluster: u16,
    ) -> Result<(), ControllerError> {
        let coordinator = self
            .network
            .lock()
            .expect("network lock")
            .as_ref()
            .map(|(_, node)| node.ieee)
            .ok_or(ControllerError::NotInitialized)?;
        let tsn = self.next_tsn();
        let request = zdo::BindRequest {
            tsn,
            src: ieee,
            src_endpoint,
            cluster_id: cluster,
            target: zdo::BindTarget::Unicast {
                ieee: coordinator,
                endpoint: COORDINATOR_ENDPOINT,
            },
        };
        let reply = self
            .zdo_request(
                ieee,
                ZdoCluster::BindReq,
                request.serialize(),
                self.timeouts.unicast,
            )
            .await?;
        let status = zdo::StatusResponse::parse(&reply.payload)?;
        if status.status != zdo::ZDO_SUCCESS {
            return Err(ControllerError::InvalidResponse(format!(
                "bind failed with ZDO status {:#04x}",
                status.status
            )));
        }
        Ok(())
    }

    /// Refresh a device's neighbor table with a full Mgmt-Lqi scan
    pub async fn scan_neighbors(&self, ieee: Eui64) -> Result<usize, ControllerError> {
        let mut neighbors = Vec::new();
        let mut index = 0u8;
        loop {
            let tsn = self.next_tsn();
            let reply = self
                .zdo_request(
                    ieee,
                    ZdoCluster::MgmtLqiReq,
                    zdo::mgmt_table_request(tsn, index),
                    self.timeouts.unicast,
                )
                .await?;
            let response = zdo::MgmtLqiResponse::parse(&reply.payload)?;
            if response.status != zdo::ZDO_SUCCESS {
                return Err(ControllerError::InvalidResponse(format!(
                    "Mgmt-Lqi failed with status {:#04x}",
                    response.status
                )));
            }
            neighbors.extend(response.neighbors.iter().copied());
            index = index.saturating_add(response.neighbors.len() as u8);
            if response.neighbors.is_empty() || index >= response.total_entries {
                break;
            }
        }
        let count = neighbors.len();
        if let Some(device) = self.devices.get_mut(&ieee).as_deref_mut() {
            device.neighbors = neighbors.clone();
            self.persistence
                .enqueue(WriteOp::ReplaceNeighbors { ieee, neighbors });
        }
        Ok(count)
    }

    /// Refresh a device's routing table with a full Mgmt-Rtg scan
    pub async fn scan_routes(&self, ieee: Eui64) -> Result<usize, ControllerError> {
        let mut routes = Vec::new();
        let mut index = 0u8;
        loop {
            let tsn = self.next_tsn();
            let reply = self
                .zdo_request(
                    ieee,
                    ZdoCluster::MgmtRtgReq,
                    zdo::mgmt_table_request(tsn, index),
                    self.timeouts.unicast,
                )
                .await?;
            let response = zdo::MgmtRtgResponse::parse(&reply.payload)?;
            if response.status != zdo::ZDO_SUCCESS {
                return Err(ControllerError::InvalidResponse(format!(
                    "Mgmt-Rtg failed with status {:#04x}",
                    response.status
                )));
            }
            routes.extend(response.routes.iter().copied());
            index = index.saturating_add(response.routes.len() as u8);
            if response.routes.is_empty() || index >= response.total_entries {
                break;
            }
        }
        let count = routes.len();
        if let Some(device) = self.devices.get_mut(&ieee).as_deref_mut() {
            device.routes = routes.clone();
            self.persistence
                .enqueue(WriteOp::ReplaceRoutes { ieee, routes });
        }
        Ok(count)
    }

    /// Ask a device to leave the network and drop it from the table
    pub async fn remove_device(&self, ieee: Eui64) -> Result<(), ControllerError> {
        if self.devices.get(&ieee).is_none() {
            return Err(ControllerError::DeviceNotFound(ieee));
        }
        let tsn = self.next_tsn();
        let leave = zdo::mgmt_leave_request(tsn, ieee, false, false);
        // Best effort: the device may already be gone
        if let Err(e) = self
            .zdo_request(ieee, ZdoCluster::MgmtLeaveReq, leave, self.timeouts.unicast)
            .await
        {
            tracing::debug!("Mgmt-Leave for {} failed: {}", ieee, e);
        }
        let _ = self.radio.force_remove(ieee).await;
        self.drop_device(ieee);
        Ok(())
    }

    // ---- groups -------------------------------------------------------------

    pub fn group(&self, group_id: u16) -> Option<crate::group::Group> {
        self.groups.lock().expect("groups lock").get(group_id).cloned()
    }

    pub fn add_group(&self, group_id: u16, name: &str) {
        let created = self.groups.lock().expect("groups lock").add(group_id, name);
        if created {
            self.persistence.enqueue(WriteOp::SaveGroup {
                group_id,
                name: name.to_string(),
            });
            self.emit(Event::GroupAdded { group_id });
        }
    }

    pub fn add_group_member(&self, group_id: u16, ieee: Eui64, endpoint: u8) {
        let (created_group, added) = {
            let mut groups = self.groups.lock().expect("groups lock");
            let created = groups.get(group_id).is_none();
            let added = groups.add_member(group_id, ieee, endpoint);
            (created, added)
        };
        if created_group {
            self.persistence.enqueue(WriteOp::SaveGroup {
                group_id,
                name: String::new(),
            });
            self.emit(Event::GroupAdded { group_id });
        }
        if added {
            self.persistence.enqueue(WriteOp::SaveGroupMember {
                group_id,
                ieee,
                endpoint,
            });
            self.emit(Event::GroupMemberAdded {
                group_id,
                ieee,
                endpoint,
            });
        }
    }

    pub fn remove_group_member(&self, group_id: u16, ieee: Eui64, endpoint: u8) {
        let removed = self
            .groups
            .lock()
            .expect("groups lock")
            .remove_member(group_id, ieee, endpoint);
        if removed {
            self.persistence.enqueue(WriteOp::RemoveGroupMember {
                group_id,
                ieee,
                endpoint,
            });
            self.emit(Event::GroupMemberRemoved {
                group_id,
                ieee,
                endpoint,
            });
        }
    }

    pub fn remove_group(&self, group_id: u16) {
        let removed = self.groups.lock().expect("groups lock").remove(group_id);
        if removed.is_some() {
            self.persistence.enqueue(WriteOp::RemoveGroup { group_id });
            self.emit(Event::GroupRemoved { group_id });
        }
    }

    // ---- backup / restore ---------------------------------------------------

    /// Capture the network into an appended, returned backup blob
    pub async fn backup(&self) -> Result<String, ControllerError> {
        let (network, node) = self
            .network
            .lock()
            .expect("network lock")
            .clone()
            .ok_or(ControllerError::NotInitialized)?;
        let devices: Vec<Device> = self.devices.iter().map(|e| e.value().clone()).collect();
        let backup = NetworkBackup::new(&network, &node, devices, chrono::Utc::now());
        let blob = backup
            .to_json()
            .map_err(|e| ControllerError::BadArgument(e.to_string()))?;
        self.persistence.enqueue(WriteOp::SaveNetworkBackup {
            backup_json: blob.clone(),
        });
        Ok(blob)
    }

    /// Re-form the network from a backup blob
    pub async fn restore(&self, blob: &str) -> Result<(), ControllerError> {
        let backup = NetworkBackup::from_json(blob)
            .map_err(|e| ControllerError::BackupIncompatible(e.to_string()))?;
        let network = backup.network_info();
        self.radio
            .write_network_info(&network, &backup.node_info)
            .await?;
        self.radio.startup(false).await?;

        for mut device in backup.devices {
            device.lqi = None;
            device.rssi = None;
            self.persistence
                .enqueue(WriteOp::SaveDeviceTree(Box::new(device.clone())));
            self.devices.insert(device.ieee, device);
        }
        *self.network.lock().expect("network lock") = Some((network, backup.node_info));
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    // ---- inbound path -------------------------------------------------------

    /// Radio entry point: a device joined or rejoined
    pub async fn handle_join(self: &Arc<Self>, nwk: u16, ieee: Eui64, parent_nwk: u16) {
        tracing::info!(
            "Device join: ieee={} nwk={:#06x} parent={:#06x}",
            ieee,
            nwk,
            parent_nwk
        );

        let needs_interview = {
            let mut entry = self.devices.entry(ieee).or_insert_with(|| {
                Device::new(ieee, nwk)
            });
            let device = entry.value_mut();
            // I1: the IEEE is the identity; the short address just moves
            device.nwk = nwk;
            device.last_seen = Some(chrono::Utc::now());
            self.persistence
                .enqueue(WriteOp::SaveDevice(Box::new(device.clone())));
            !device.is_initialized()
        };

        self.emit(Event::DeviceJoined { ieee, nwk });

        if needs_interview {
            let controller = Arc::clone(self);
            tokio::spawn(async move {
                controller.interview(ieee).await;
            });
        }
    }

    /// Radio entry point: a device left the network
    pub async fn handle_leave(&self, nwk: u16, ieee: Eui64) {
        tracing::info!("Device left: ieee={} nwk={:#06x}", ieee, nwk);
        if let Some(device) = self.devices.get_mut(&ieee).as_deref_mut() {
            device.status = DeviceStatus::Left;
        } else {
            return;
        }
        self.emit(Event::DeviceLeft { ieee, nwk });
        self.drop_device(ieee);
    }

    fn drop_device(&self, ieee: Eui64) {
        if self.devices.remove(&ieee).is_some() {
            let removed = self.groups.lock().expect("groups lock").remove_device(ieee);
            for (group_id, endpoint) in removed {
                self.emit(Event::GroupMemberRemoved {
                    group_id,
                    ieee,
                    endpoint,
                });
            }
            // Group membership rows cascade with the device row
            self.persistence.enqueue(WriteOp::DeleteDevice(ieee));
            self.device_locks.remove(&ieee);
            self.emit(Event::DeviceRemoved { ieee });
        }
    }

    /// Radio entry point: observed source-route relays changed
    pub async fn handle_relays_updated(&self, ieee: Eui64, relays: Vec<u16>) {
        if let Some(device) = self.devices.get_mut(&ieee).as_deref_mut() {
            if device.relays == relays {
                return;
            }
            device.relays = relays.clone();
            self.persistence.enqueue(WriteOp::SaveRelays {
                ieee,
                relays: relays.clone(),
            });
        } else {
            return;
        }
        self.emit(Event::DeviceRelaysUpdated { ieee, relays });
    }

    /// Radio entry point: an APS packet arrived
    pub async fn packet_received(&self, packet: ApsPacket) {
        // Reply correlation happens before any other processing
        if self.try_resolve_pending(&packet).await {
            return;
        }

        if packet.profile == profiles::ZDO || packet.dst_endpoint == 0 {
            self.handle_zdo_packet(packet).await;
        } else {
            self.handle_zcl_packet(packet).await;
        }
    }

    /// Match an inbound packet against the pending-reply table
    ///
    /// The key carries (src_ep, dst_ep, cluster, direction) alongside the
    /// TSN, so wrap-around collisions cannot misroute a reply.
    async fn try_resolve_pending(&self, packet: &ApsPacket) -> bool {
        let (tsn, direction) = if packet.profile == profiles::ZDO || packet.dst_endpoint == 0 {
            match packet.payload.first() {
                Some(tsn) => (*tsn, None),
                None => return false,
            }
        } else {
            match ZclFrame::parse(&packet.payload) {
                Ok(frame) => (frame.header.tsn, Some(frame.header.control.direction)),
                Err(_) => return false,
            }
        };
        let key = PendingKey {
            tsn,
            nwk: packet.src_nwk,
            cluster: packet.cluster,
            src_endpoint: packet.src_endpoint,
            dst_endpoint: packet.dst_endpoint,
            direction,
        };
        let reply = self.pending.lock().await.remove(&key);
        match reply {
            Some(reply) => {
                let _ = reply.tx.send(packet.clone());
                true
            }
            None => false,
        }
    }

    async fn handle_zdo_packet(&self, packet: ApsPacket) {
        match packet.cluster {
            c if c == ZdoCluster::DeviceAnnce as u16 => {
                match zdo::DeviceAnnounce::parse(&packet.payload) {
                    Ok(announce) => {
                        self.emit(Event::DeviceAnnounce {
                            ieee: announce.ieee,
                            nwk: announce.nwk,
                        });
                        if let Some(device) =
                            self.devices.get_mut(&announce.ieee).as_deref_mut()
                        {
                            if device.nwk != announce.nwk {
                                tracing::info!(
                                    "Device {} moved {:#06x} -> {:#06x}",
                                    announce.ieee,
                                    device.nwk,
                                    announce.nwk
                                );
                                device.nwk = announce.nwk;
                                self.persistence
                                    .enqueue(WriteOp::SaveDevice(Box::new(device.clone())));
                            }
                        }
                    }
                    Err(e) => tracing::warn!("Malformed device announce dropped: {}", e),
                }
            }
            other => {
                tracing::debug!("Unsolicited ZDO frame {:#06x} ignored", other);
            }
        }
    }

    async fn handle_zcl_packet(&self, packet: ApsPacket) {
        let Some(ieee) = packet
            .src_ieee
            .or_else(|| self.device_by_nwk(packet.src_nwk))
        else {
            tracing::debug!(
                "ZCL frame from unknown device {:#06x} dropped",
                packet.src_nwk
            );
            return;
        };

        if let Some(device) = self.devices.get_mut(&ieee).as_deref_mut() {
            device.last_seen = Some(chrono::Utc::now());
            device.lqi = Some(packet.lqi);
            device.rssi = Some(packet.rssi);
        }

        let frame = match ZclFrame::parse(&packet.payload) {
            Ok(frame) => frame,
            Err(e) => {
                // Codec errors never escape the dispatch loop
                tracing::warn!("Malformed ZCL frame from {} dropped: {}", ieee, e);
                return;
            }
        };

        let known_cluster = self
            .registry
            .get(frame.header.manufacturer_code, packet.cluster)
            .is_some();
        if !known_cluster {
            self.emit(Event::UnknownClusterMessage {
                ieee,
                endpoint: packet.src_endpoint,
                cluster: packet.cluster,
                payload: packet.payload.clone(),
            });
            return;
        }

        let mut responded = false;
        match frame.header.control.frame_type {
            FrameType::ClusterSpecific => {
                self.emit(Event::ClusterCommand {
                    ieee,
                    endpoint: packet.src_endpoint,
                    cluster: packet.cluster,
                    command_id: frame.header.command_id,
                    payload: frame.payload.clone(),
                });
                if packet.cluster == cluster_id::OTA_UPGRADE {
                    responded = self.handle_ota_command(ieee, &packet, &frame).await;
                }
            }
            FrameType::Global => {
                responded = self.handle_general_command(ieee, &packet, &frame).await;
            }
        }

        if !responded && frame.wants_default_response() {
            let response = frame.default_response(ZclStatus::Success);
            self.send_response(&packet, response.serialize()).await;
        }
    }

    /// Handle a general command from a device; returns true if a
    /// command-specific response was sent
    async fn handle_general_command(
        &self,
        ieee: Eui64,
        packet: &ApsPacket,
        frame: &ZclFrame,
    ) -> bool {
        let command = match frame.general_command() {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Malformed general command from {} dropped: {}", ieee, e);
                return false;
            }
        };
        self.emit(Event::GeneralCommand {
            ieee,
            endpoint: packet.src_endpoint,
            cluster: packet.cluster,
            command_id: frame.header.command_id,
        });

        match command {
            GeneralCommand::ReportAttributes(reports) => {
                for report in reports {
                    self.update_attribute(
                        ieee,
                        packet.src_endpoint,
                        packet.cluster,
                        report.attr_id,
                        report.value,
                    );
                }
                false
            }
            GeneralCommand::WriteAttributes(records) => {
                // attribute_updated goes out before the write is acknowledged
                for record in records {
                    self.update_attribute(
                        ieee,
                        packet.src_endpoint,
                        packet.cluster,
                        record.attr_id,
                        record.value,
                    );
                }
                false
            }
            GeneralCommand::WriteAttributesNoResponse(records) => {
                for record in records {
                    self.update_attribute(
                        ieee,
                        packet.src_endpoint,
                        packet.cluster,
                        record.attr_id,
                        record.value,
                    );
                }
                false
            }
            GeneralCommand::ReadAttributes(attrs) => {
                // The coordinator exposes no readable attributes of its own
                let records = attrs
                    .into_iter()
                    .map(|attr_id| ReadAttributeRecord {
                        attr_id,
                        status: ZclStatus::UnsupportedAttribute,
                        value: None,
                    })
                    .collect();
                let response = ZclFrame {
                    header: zigbee_wire::zcl::ZclHeader {
                        control: zigbee_wire::zcl::FrameControl {
                            frame_type: FrameType::Global,
                            manufacturer_specific: frame.header.manufacturer_code.is_some(),
                            direction: frame.header.control.direction.flipped(),
                            disable_default_response: true,
                        },
                        manufacturer_code: frame.header.manufacturer_code,
                        tsn: frame.header.tsn,
                        command_id: GeneralCommandId::ReadAttributesResponse as u8,
                    },
                    payload: GeneralCommand::ReadAttributesResponse(records).encode(),
                };
                self.send_response(packet, response.serialize()).await;
                true
            }
            GeneralCommand::DefaultResponse(response) => {
                tracing::debug!(
                    "Default response from {}: cmd={:#04x} status={:?}",
                    ieee,
                    response.command_id,
                    response.status
                );
                false
            }
            other => {
                tracing::debug!("Unhandled general command from {}: {:?}", ieee, other.id());
                false
            }
        }
    }

    /// Route an OTA cluster command to the engine; returns true if a
    /// response frame was sent
    async fn handle_ota_command(&self, ieee: Eui64, packet: &ApsPacket, frame: &ZclFrame) -> bool {
        match self
            .ota
            .handle_command(ieee, frame.header.command_id, &frame.payload)
            .await
        {
            Ok(Some(reply)) => {
                let response = frame.cluster_response(reply.command_id, reply.payload);
                self.send_response(packet, response.serialize()).await;
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("OTA command from {} failed: {}", ieee, e);
                false
            }
        }
    }

    /// Send a frame back to the source of `packet`
    async fn send_response(&self, packet: &ApsPacket, data: Vec<u8>) {
        let frame = ApsFrame {
            dst: Destination::Unicast(packet.src_nwk),
            profile: packet.profile,
            cluster: packet.cluster,
            src_endpoint: packet.dst_endpoint,
            dst_endpoint: packet.src_endpoint,
            sequence: packet.sequence,
            radius: 0,
            data,
        };
        if let Err(e) = self.radio.send(frame).await {
            tracing::warn!("Failed to send response: {}", e);
        }
    }

    /// Write-through attribute cache update plus event emission
    fn update_attribute(
        &self,
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attr_id: u16,
        value: ZclValue,
    ) {
        {
            let mut device_ref = self.devices.get_mut(&ieee);
            let Some(device) = device_ref.as_deref_mut() else {
                return;
            };
            if let Some(ep) = device.endpoints.get_mut(&endpoint) {
                if let Some(state) = ep
                    .in_clusters
                    .get_mut(&cluster)
                    .or_else(|| ep.out_clusters.get_mut(&cluster))
                {
                    state.attributes.insert(attr_id, value.clone());
                }
            }
            // Basic-cluster identity mirrors onto the device row
            if cluster == cluster_id::BASIC {
                if let Some(s) = value.as_str() {
                    match attr_id {
                        basic_attr::MANUFACTURER_NAME => device.manufacturer = Some(s.to_string()),
                        basic_attr::MODEL_IDENTIFIER => device.model = Some(s.to_string()),
                        _ => {}
                    }
                }
            }
            // Same critical section as the in-memory update
            self.persistence.enqueue(WriteOp::SaveAttribute {
                ieee,
                endpoint,
                cluster,
                attr_id,
                value: value.clone(),
            });
        }
        self.emit(Event::AttributeUpdated {
            ieee,
            endpoint,
            cluster,
            attr_id,
            value,
        });
    }

    fn mark_unsupported(&self, ieee: Eui64, endpoint: u8, cluster: u16, attr_id: u16) {
        let mut device_ref = self.devices.get_mut(&ieee);
        let Some(device) = device_ref.as_deref_mut() else {
            return;
        };
        if let Some(ep) = device.endpoints.get_mut(&endpoint) {
            if let Some(state) = ep
                .in_clusters
                .get_mut(&cluster)
                .or_else(|| ep.out_clusters.get_mut(&cluster))
            {
                state.unsupported.insert(attr_id);
            }
        }
        self.persistence.enqueue(WriteOp::SaveUnsupportedAttribute {
            ieee,
            endpoint,
            cluster,
            attr_id,
        });
    }

    // ---- interview ----------------------------------------------------------

    /// Exponential backoff with jitter for interview retries
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.timeouts.backoff_base * 2u32.saturating_pow(attempt);
        let jitter_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0) as u64
            % (base.as_nanos() as u64 / 2 + 1);
        base + Duration::from_nanos(jitter_ns)
    }

    async fn interview_step<F, T>(
        &self,
        ieee: Eui64,
        attempts: u32,
        step: impl Fn() -> F,
        parse: impl Fn(ApsPacket) -> Result<T, ControllerError>,
    ) -> Result<T, ControllerError>
    where
        F: std::future::Future<Output = Result<ApsPacket, ControllerError>>,
    {
        let mut last_err = ControllerError::Timeout;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt - 1)).await;
            }
            match step().await.and_then(&parse) {
                Ok(value) => return Ok(value),
                Err(e @ ControllerError::RadioUnavailable(_)) => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        "Interview step for {} failed (attempt {}/{}): {}",
                        ieee,
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Run the interview state machine for one device
    pub async fn interview(self: &Arc<Self>, ieee: Eui64) {
        if let Err(reason) = self.interview_inner(ieee).await {
            tracing::warn!("Interview of {} failed: {}", ieee, reason);
            // The device keeps its last successful state; a later announce
            // restarts the interview from there
            self.emit(Event::DeviceInitFailure {
                ieee,
                reason: reason.to_string(),
            });
        }
    }

    async fn interview_inner(self: &Arc<Self>, ieee: Eui64) -> Result<(), ControllerError> {
        let nwk = self.nwk_of(ieee)?;

        // Node descriptor
        let descriptor = self
            .interview_step(
                ieee,
                NODE_DESC_ATTEMPTS,
                || {
                    let tsn = self.next_tsn();
                    self.zdo_request(
                        ieee,
                        ZdoCluster::NodeDescReq,
                        zdo::addr_request(tsn, nwk),
                        self.timeouts.interview,
                    )
                },
                |packet| {
                    let response = zdo::NodeDescResponse::parse(&packet.payload)?;
                    response.descriptor.ok_or_else(|| {
                        ControllerError::InvalidResponse(format!(
                            "Node-Descriptor status {:#04x}",
                            response.status
                        ))
                    })
                },
            )
            .await?;
        if let Some(device) = self.devices.get_mut(&ieee).as_deref_mut() {
            device.set_node_descriptor(descriptor);
            self.persistence
                .enqueue(WriteOp::SaveDevice(Box::new(device.clone())));
        }
        self.emit(Event::NodeDescriptorUpdated { ieee });

        // Power descriptor is opportunistic: one attempt, failures ignored
        let tsn = self.next_tsn();
        match self
            .zdo_request(
                ieee,
                ZdoCluster::PowerDescReq,
                zdo::addr_request(tsn, nwk),
                self.timeouts.interview,
            )
            .await
            .and_then(|packet| Ok(zdo::PowerDescResponse::parse(&packet.payload)?))
        {
            Ok(response) => {
                if let Some(descriptor) = response.descriptor {
                    if let Some(device) = self.devices.get_mut(&ieee).as_deref_mut() {
                        device.power_descriptor = Some(descriptor);
                    }
                }
            }
            Err(e) => tracing::debug!("Power descriptor fetch for {} failed: {}", ieee, e),
        }

        // Active endpoints
        let endpoints = self
            .interview_step(
                ieee,
                ACTIVE_EP_ATTEMPTS,
                || {
                    let tsn = self.next_tsn();
                    self.zdo_request(
                        ieee,
                        ZdoCluster::ActiveEpReq,
                        zdo::addr_request(tsn, nwk),
                        self.timeouts.interview,
                    )
                },
                |packet| {
                    let response = zdo::ActiveEpResponse::parse(&packet.payload)?;
                    if response.status != zdo::ZDO_SUCCESS {
                        return Err(ControllerError::InvalidResponse(format!(
                            "Active-Endpoints status {:#04x}",
                            response.status
                        )));
                    }
                    Ok(response.endpoints)
                },
            )
            .await?;
        if let Some(device) = self.devices.get_mut(&ieee).as_deref_mut() {
            device.set_active_endpoints(&endpoints);
            self.persistence
                .enqueue(WriteOp::SaveDeviceTree(Box::new(device.clone())));
        }

        // Simple descriptors
        for endpoint in endpoints
            .iter()
            .copied()
            .filter(|&ep| ep != crate::device::GREEN_POWER_ENDPOINT)
        {
            let descriptor = self
                .interview_step(
                    ieee,
                    SIMPLE_DESC_ATTEMPTS,
                    || {
                        let tsn = self.next_tsn();
                        self.zdo_request(
                            ieee,
                            ZdoCluster::SimpleDescReq,
                            zdo::simple_desc_request(tsn, nwk, endpoint),
                            self.timeouts.interview,
                        )
                    },
                    |packet| {
                        let response = zdo::SimpleDescResponse::parse(&packet.payload)?;
                        response.descriptor.ok_or_else(|| {
                            ControllerError::InvalidResponse(format!(
                                "Simple-Descriptor status {:#04x}",
                                response.status
                            ))
                        })
                    },
                )
                .await?;
            if let Some(device) = self.devices.get_mut(&ieee).as_deref_mut() {
                device.set_simple_descriptor(&descriptor);
                self.persistence
                    .enqueue(WriteOp::SaveDeviceTree(Box::new(device.clone())));
            }
        }

        // Basic-cluster identity; best effort, unsupported answers are
        // recorded but do not fail the interview
        let basic_endpoint = self.devices.get(&ieee).and_then(|device| {
            device
                .endpoints
                .values()
                .find(|ep| ep.in_clusters.contains_key(&cluster_id::BASIC))
                .map(|ep| ep.id)
        });
        if let Some(endpoint) = basic_endpoint {
            if let Err(e) = self
                .read_attributes(
                    ieee,
                    endpoint,
                    cluster_id::BASIC,
                    &[basic_attr::MANUFACTURER_NAME, basic_attr::MODEL_IDENTIFIER],
                )
                .await
            {
                tracing::debug!("Basic identity read for {} failed: {}", ieee, e);
            }
        }

        let snapshot = {
            let mut device_ref = self.devices.get_mut(&ieee);
            let Some(device) = device_ref.as_deref_mut() else {
                return Ok(());
            };
            device.mark_initialized();
            self.persistence
                .enqueue(WriteOp::SaveDeviceTree(Box::new(device.clone())));
            device.snapshot()
        };
        tracing::info!(
            "Device {} initialized: {} {}",
            ieee,
            snapshot.manufacturer.as_deref().unwrap_or("?"),
            snapshot.model.as_deref().unwrap_or("?")
        );
        self.emit(Event::RawDeviceInitialized(snapshot.clone()));
        self.emit(Event::DeviceInitialized(snapshot));
        Ok(())
    }

    // ---- accessors ----------------------------------------------------------

    pub fn device(&self, ieee: Eui64) -> Option<Device> {
        self.devices.get(&ieee).map(|d| d.clone())
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices.iter().map(|e| e.value().clone()).collect()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn ota(&self) -> &OtaEngine {
        &self.ota
    }

    /// Flush pending writes (mainly for tests and orderly shutdown)
    pub async fn flush_persistence(&self) -> Result<(), ControllerError> {
        self.persistence.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RadioError;
    use crate::radio::KeyInfo;
    use async_trait::async_trait;
    use zigbee_wire::zdo::{
        ActiveEpResponse, NodeDescResponse, NodeDescriptor, PowerDescResponse, PowerDescriptor,
        SimpleDescResponse, SimpleDescriptor,
    };

    const IKEA_IEEE: Eui64 = Eui64::new([0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, 0x00]);
    const IKEA_NWK: u16 = 0x1234;

    type Responder = Box<dyn Fn(&ApsFrame) -> Option<ApsPacket> + Send + Sync>;

    struct StubRadio {
        events_tx: mpsc::Sender<RadioEvent>,
        sent: std::sync::Mutex<Vec<ApsFrame>>,
        permits: std::sync::Mutex<Vec<u8>>,
        written_network: std::sync::Mutex<Option<NetworkInfo>>,
        responder: std::sync::Mutex<Option<Responder>>,
    }

    impl StubRadio {
        fn new() -> (Arc<Self>, mpsc::Receiver<RadioEvent>) {
            let (events_tx, events_rx) = mpsc::channel(256);
            (
                Arc::new(Self {
                    events_tx,
                    sent: std::sync::Mutex::new(Vec::new()),
                    permits: std::sync::Mutex::new(Vec::new()),
                    written_network: std::sync::Mutex::new(None),
                    responder: std::sync::Mutex::new(None),
                }),
                events_rx,
            )
        }

        fn respond_with(
            &self,
            responder: impl Fn(&ApsFrame) -> Option<ApsPacket> + Send + Sync + 'static,
        ) {
            *self.responder.lock().unwrap() = Some(Box::new(responder));
        }

        fn sent(&self) -> Vec<ApsFrame> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RadioDriver for StubRadio {
        async fn probe(&self) -> bool {
            true
        }

        async fn startup(&self, _auto_form: bool) -> Result<(), RadioError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), RadioError> {
            Ok(())
        }

        async fn network_info(&self) -> Result<(NetworkInfo, NodeInfo), RadioError> {
            Ok((
                NetworkInfo {
                    extended_pan_id: Eui64::from(0xDDDD_DDDD_DDDD_DDDD),
                    pan_id: 0x1A62,
                    nwk_update_id: 0,
                    nwk_manager_id: 0,
                    channel: 15,
                    channel_mask: 1 << 15,
                    security_level: 5,
                    network_key: KeyInfo {
                        key: [0xAA; 16],
                        seq: 0,
                        rx_counter: 0,
                        tx_counter: 0,
                        partner_ieee: None,
                    },
                    tc_link_key: KeyInfo {
                        key: *b"ZigBeeAlliance09",
                        seq: 0,
                        rx_counter: 0,
                        tx_counter: 0,
                        partner_ieee: None,
                    },
                },
                NodeInfo {
                    ieee: Eui64::from(0x00AA_BBCC_DDEE_FF00),
                    nwk: 0x0000,
                    logical_type: 0,
                    manufacturer: None,
                    model: None,
                    version: None,
                },
            ))
        }

        async fn write_network_info(
            &self,
            network: &NetworkInfo,
            _node: &NodeInfo,
        ) -> Result<(), RadioError> {
            *self.written_network.lock().unwrap() = Some(network.clone());
            Ok(())
        }

        async fn force_remove(&self, _ieee: Eui64) -> Result<(), RadioError> {
            Ok(())
        }

        async fn permit_ncp(&self, duration: u8) -> Result<(), RadioError> {
            self.permits.lock().unwrap().push(duration);
            Ok(())
        }

        async fn permit_with_key(
            &self,
            _node: u16,
            _key: [u8; 16],
            _duration: u8,
        ) -> Result<(), RadioError> {
            Ok(())
        }

        async fn send(&self, frame: ApsFrame) -> Result<(), RadioError> {
            self.sent.lock().unwrap().push(frame.clone());
            let response = self.responder.lock().unwrap().as_ref().and_then(|r| r(&frame));
            if let Some(packet) = response {
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(RadioEvent::PacketReceived(packet)).await;
                });
            }
            Ok(())
        }
    }

    fn fast_timeouts() -> Timeouts {
        Timeouts {
            unicast: Duration::from_millis(200),
            interview: Duration::from_millis(200),
            backoff_base: Duration::from_millis(1),
        }
    }

    async fn test_controller(
        dir: &tempfile::TempDir,
    ) -> (Arc<Controller>, Arc<StubRadio>, mpsc::Receiver<RadioEvent>) {
        let config = Config::new(dir.path().join("zigbee.db"));
        let (radio, events_rx) = StubRadio::new();
        let controller = Controller::with_parts(
            config,
            radio.clone() as Arc<dyn RadioDriver>,
            Arc::new(Registry::standard()),
            fast_timeouts(),
        )
        .await
        .unwrap();
        (controller, radio, events_rx)
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<Event>,
        mut predicate: impl FnMut(&Event) -> bool,
    ) -> Event {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event stream closed");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Scripted responses for a TRADFRI control outlet
    fn ikea_responder(frame: &ApsFrame) -> Option<ApsPacket> {
        let reply = |cluster: u16, dst_endpoint: u8, sequence: u8, payload: Vec<u8>| ApsPacket {
            src_nwk: IKEA_NWK,
            src_ieee: Some(IKEA_IEEE),
            src_endpoint: if cluster & 0x8000 != 0 { 0 } else { 1 },
            dst_endpoint,
            profile: if cluster & 0x8000 != 0 {
                profiles::ZDO
            } else {
                profiles::HOME_AUTOMATION
            },
            cluster,
            payload,
            sequence,
            lqi: 255,
            rssi: -40,
        };

        if frame.profile == profiles::ZDO {
            let tsn = *frame.data.first()?;
            let cluster = ZdoCluster::from_u16(frame.cluster)?;
            let payload = match cluster {
                ZdoCluster::NodeDescReq => NodeDescResponse {
                    tsn,
                    status: zdo::ZDO_SUCCESS,
                    nwk: IKEA_NWK,
                    descriptor: Some(NodeDescriptor {
                        logical_type: 1,
                        complex_descriptor_available: false,
                        user_descriptor_available: false,
                        aps_flags: 0,
                        frequency_band: 8,
                        mac_capability_flags: 0x8E,
                        manufacturer_code: 4476,
                        max_buffer_size: 82,
                        max_incoming_transfer_size: 82,
                        server_mask: 0,
                        max_outgoing_transfer_size: 82,
                        descriptor_capability: 0,
                    }),
                }
                .serialize(),
                ZdoCluster::PowerDescReq => PowerDescResponse {
                    tsn,
                    status: zdo::ZDO_SUCCESS,
                    nwk: IKEA_NWK,
                    descriptor: Some(PowerDescriptor {
                        current_power_mode: 0,
                        available_power_sources: 0x1,
                        current_power_source: 0x1,
                        current_power_source_level: 0xC,
                    }),
                }
                .serialize(),
                ZdoCluster::ActiveEpReq => ActiveEpResponse {
                    tsn,
                    status: zdo::ZDO_SUCCESS,
                    nwk: IKEA_NWK,
                    endpoints: vec![1, 242],
                }
                .serialize(),
                ZdoCluster::SimpleDescReq => {
                    let endpoint = *frame.data.get(3)?;
                    SimpleDescResponse {
                        tsn,
                        status: zdo::ZDO_SUCCESS,
                        nwk: IKEA_NWK,
                        descriptor: Some(SimpleDescriptor {
                            endpoint,
                            profile_id: 0x0104,
                            device_type: 266,
                            device_version: 1,
                            in_clusters: vec![0, 3, 4, 5, 6, 8, 4096],
                            out_clusters: vec![25],
                        }),
                    }
                    .serialize()
                }
                _ => return None,
            };
            return Some(reply(cluster.response_id(), 0, tsn, payload));
        }

        let zcl = ZclFrame::parse(&frame.data).ok()?;
        if frame.cluster == cluster_id::BASIC
            && zcl.header.command_id == GeneralCommandId::ReadAttributes as u8
        {
            let response = ZclFrame::general(
                zcl.header.tsn,
                &GeneralCommand::ReadAttributesResponse(vec![
                    ReadAttributeRecord {
                        attr_id: basic_attr::MANUFACTURER_NAME,
                        status: ZclStatus::Success,
                        value: Some(ZclValue::CharString(Some("IKEA of Sweden".into()))),
                    },
                    ReadAttributeRecord {
                        attr_id: basic_attr::MODEL_IDENTIFIER,
                        status: ZclStatus::Success,
                        value: Some(ZclValue::CharString(Some("TRADFRI control outlet".into()))),
                    },
                ]),
                Direction::ServerToClient,
                None,
            );
            return Some(reply(
                frame.cluster,
                frame.src_endpoint,
                zcl.header.tsn,
                response.serialize(),
            ));
        }
        None
    }

    #[tokio::test]
    async fn test_join_interview_persists_device() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("zigbee.db");
        {
            let (controller, radio, events_rx) = test_controller(&dir).await;
            radio.respond_with(ikea_responder);
            let mut events = controller.subscribe();
            controller.start(false, events_rx).await.unwrap();

            radio
                .events_tx
                .send(RadioEvent::DeviceJoined {
                    nwk: IKEA_NWK,
                    ieee: IKEA_IEEE,
                    parent_nwk: 0x0000,
                })
                .await
                .unwrap();

            // device_joined strictly precedes device_initialized
            wait_for(&mut events, |e| matches!(e, Event::DeviceJoined { .. })).await;
            let initialized = wait_for(&mut events, |e| {
                matches!(e, Event::DeviceInitialized(_))
            })
            .await;
            let Event::DeviceInitialized(snapshot) = initialized else {
                unreachable!()
            };
            assert_eq!(snapshot.ieee, IKEA_IEEE);
            assert_eq!(snapshot.manufacturer.as_deref(), Some("IKEA of Sweden"));
            assert_eq!(snapshot.model.as_deref(), Some("TRADFRI control outlet"));

            let device = controller.device(IKEA_IEEE).unwrap();
            assert_eq!(device.status, DeviceStatus::Initialized);
            assert_eq!(device.nwk, IKEA_NWK);
            assert_eq!(
                device.node_descriptor.as_ref().unwrap().manufacturer_code,
                4476
            );
            assert_eq!(
                device.power_descriptor.unwrap().current_power_source_level,
                0xC
            );
            assert_eq!(
                device.endpoints.keys().copied().collect::<Vec<_>>(),
                vec![1, 242]
            );
            let ep1 = &device.endpoints[&1];
            assert_eq!(ep1.profile_id, 0x0104);
            assert_eq!(ep1.device_type, 266);
            assert!(ep1.in_clusters.contains_key(&4096));
            assert!(ep1.out_clusters.contains_key(&25));

            controller.shutdown().await.unwrap();
        }

        // The tree survives a restart
        let state = Store::open(&db_path).unwrap().load().unwrap();
        assert_eq!(state.devices.len(), 1);
        let device = &state.devices[0];
        assert_eq!(device.ieee, IKEA_IEEE);
        assert_eq!(device.status, DeviceStatus::Initialized);
        assert_eq!(device.model.as_deref(), Some("TRADFRI control outlet"));
        assert_eq!(device.endpoints.len(), 2);
    }

    #[tokio::test]
    async fn test_rejoin_updates_short_address_only() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, radio, events_rx) = test_controller(&dir).await;
        radio.respond_with(ikea_responder);
        let mut events = controller.subscribe();
        controller.start(false, events_rx).await.unwrap();

        radio
            .events_tx
            .send(RadioEvent::DeviceJoined {
                nwk: IKEA_NWK,
                ieee: IKEA_IEEE,
                parent_nwk: 0,
            })
            .await
            .unwrap();
        wait_for(&mut events, |e| matches!(e, Event::DeviceInitialized(_))).await;

        // Rejoin under a new short address
        let mut events = controller.subscribe();
        radio
            .events_tx
            .send(RadioEvent::DeviceJoined {
                nwk: 0x5678,
                ieee: IKEA_IEEE,
                parent_nwk: 0,
            })
            .await
            .unwrap();
        wait_for(&mut events, |e| {
            matches!(e, Event::DeviceJoined { nwk: 0x5678, .. })
        })
        .await;

        assert_eq!(controller.device_count(), 1);
        assert_eq!(controller.device(IKEA_IEEE).unwrap().nwk, 0x5678);
        // An initialized device is not re-interviewed
        let extra = tokio::time::timeout(Duration::from_millis(200), async {
            loop {
                if let Ok(Event::DeviceInitialized(_)) = events.recv().await {
                    return;
                }
            }
        })
        .await;
        assert!(extra.is_err(), "rejoin must not emit device_initialized");
    }

    #[tokio::test]
    async fn test_tsn_wrap_without_cross_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, radio, events_rx) = test_controller(&dir).await;
        controller.start(false, events_rx).await.unwrap();

        // Every request gets a default response echoing its TSN
        radio.respond_with(|frame| {
            let zcl = ZclFrame::parse(&frame.data).ok()?;
            let Destination::Unicast(nwk) = frame.dst else {
                return None;
            };
            let response = zcl.default_response(ZclStatus::Success);
            Some(ApsPacket {
                src_nwk: nwk,
                src_ieee: None,
                src_endpoint: frame.dst_endpoint,
                dst_endpoint: frame.src_endpoint,
                profile: frame.profile,
                cluster: frame.cluster,
                payload: response.serialize(),
                sequence: zcl.header.tsn,
                lqi: 200,
                rssi: -50,
            })
        });

        let mut targets = Vec::new();
        for i in 0..300u64 {
            let ieee = Eui64::from(0x1000_0000_0000_0000 + i);
            controller
                .devices
                .insert(ieee, Device::new(ieee, 0x0100 + i as u16));
            targets.push(ieee);
        }

        let mut handles = Vec::new();
        for ieee in targets {
            let controller = Arc::clone(&controller);
            handles.push(tokio::spawn(async move {
                let tsn = controller.next_tsn();
                let frame = ZclFrame::cluster_request(tsn, 0x02, Vec::new(), None);
                let reply = controller
                    .request(
                        ieee,
                        profiles::HOME_AUTOMATION,
                        cluster_id::ON_OFF,
                        COORDINATOR_ENDPOINT,
                        1,
                        tsn,
                        frame.serialize(),
                        true,
                        None,
                    )
                    .await
                    .expect("request failed")
                    .expect("missing reply");
                // The reply must carry our TSN back
                let zcl = ZclFrame::parse(&reply.payload).unwrap();
                assert_eq!(zcl.header.tsn, tsn);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(controller.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_default_response_policy() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, radio, events_rx) = test_controller(&dir).await;
        let mut events = controller.subscribe();
        controller.start(false, events_rx).await.unwrap();

        let mut device = Device::new(IKEA_IEEE, IKEA_NWK);
        device.set_simple_descriptor(&SimpleDescriptor {
            endpoint: 1,
            profile_id: 0x0104,
            device_type: 266,
            device_version: 1,
            in_clusters: vec![6],
            out_clusters: vec![],
        });
        controller.devices.insert(IKEA_IEEE, device);

        let write = GeneralCommand::WriteAttributes(vec![WriteAttributeRecord {
            attr_id: 0x4001,
            value: ZclValue::Uint16(30),
        }]);

        // disable-default-response = 0: exactly one Default-Response goes out
        let frame = ZclFrame::general(0x42, &write, Direction::ClientToServer, None);
        radio
            .events_tx
            .send(RadioEvent::PacketReceived(ApsPacket {
                src_nwk: IKEA_NWK,
                src_ieee: Some(IKEA_IEEE),
                src_endpoint: 1,
                dst_endpoint: COORDINATOR_ENDPOINT,
                profile: profiles::HOME_AUTOMATION,
                cluster: cluster_id::ON_OFF,
                payload: frame.serialize(),
                sequence: 0x42,
                lqi: 255,
                rssi: -40,
            }))
            .await
            .unwrap();
        // attribute_updated is delivered before the write is acknowledged
        wait_for(&mut events, |e| {
            matches!(e, Event::AttributeUpdated { attr_id: 0x4001, .. })
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sent = radio.sent();
        assert_eq!(sent.len(), 1);
        let response = ZclFrame::parse(&sent[0].data).unwrap();
        assert_eq!(response.header.tsn, 0x42);
        match response.general_command().unwrap() {
            GeneralCommand::DefaultResponse(dr) => {
                assert_eq!(dr.status, ZclStatus::Success);
                assert_eq!(dr.command_id, GeneralCommandId::WriteAttributes as u8);
            }
            other => panic!("expected default response, got {other:?}"),
        }

        // disable-default-response = 1: nothing goes out
        let mut frame = ZclFrame::general(0x43, &write, Direction::ClientToServer, None);
        frame.header.control.disable_default_response = true;
        radio
            .events_tx
            .send(RadioEvent::PacketReceived(ApsPacket {
                src_nwk: IKEA_NWK,
                src_ieee: Some(IKEA_IEEE),
                src_endpoint: 1,
                dst_endpoint: COORDINATOR_ENDPOINT,
                profile: profiles::HOME_AUTOMATION,
                cluster: cluster_id::ON_OFF,
                payload: frame.serialize(),
                sequence: 0x43,
                lqi: 255,
                rssi: -40,
            }))
            .await
            .unwrap();
        wait_for(&mut events, |e| {
            matches!(e, Event::AttributeUpdated { attr_id: 0x4001, .. })
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(radio.sent().len(), 1, "suppressed write must send nothing");
    }

    #[tokio::test]
    async fn test_permit_broadcasts_and_opens_ncp() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, radio, events_rx) = test_controller(&dir).await;
        let mut events = controller.subscribe();
        controller.start(false, events_rx).await.unwrap();

        controller.permit(60, None).await.unwrap();
        assert_eq!(*radio.permits.lock().unwrap(), vec![60]);
        let sent = radio.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            sent[0].dst,
            Destination::Broadcast(BROADCAST_RX_ON_WHEN_IDLE)
        ));
        assert_eq!(sent[0].cluster, ZdoCluster::MgmtPermitJoiningReq as u16);
        wait_for(&mut events, |e| {
            matches!(e, Event::PermitDuration { duration: 60 })
        })
        .await;

        // permit(0) closes the network
        controller.permit(0, None).await.unwrap();
        assert_eq!(*radio.permits.lock().unwrap(), vec![60, 0]);
    }

    #[tokio::test]
    async fn test_timeout_releases_pending_slot() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _radio, events_rx) = test_controller(&dir).await;
        controller.start(false, events_rx).await.unwrap();

        let ieee = Eui64::from(0x42);
        controller.devices.insert(ieee, Device::new(ieee, 0x4242));

        let tsn = controller.next_tsn();
        let frame = ZclFrame::cluster_request(tsn, 0x00, Vec::new(), None);
        let result = controller
            .request(
                ieee,
                profiles::HOME_AUTOMATION,
                cluster_id::ON_OFF,
                COORDINATOR_ENDPOINT,
                1,
                tsn,
                frame.serialize(),
                true,
                Some(Duration::from_millis(50)),
            )
            .await;
        assert!(matches!(result, Err(ControllerError::Timeout)));
        assert!(controller.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_leave_removes_device_and_group_members() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, radio, events_rx) = test_controller(&dir).await;
        let mut events = controller.subscribe();
        controller.start(false, events_rx).await.unwrap();

        controller
            .devices
            .insert(IKEA_IEEE, Device::new(IKEA_IEEE, IKEA_NWK));
        controller.add_group_member(0x0002, IKEA_IEEE, 1);

        radio
            .events_tx
            .send(RadioEvent::DeviceLeft {
                nwk: IKEA_NWK,
                ieee: IKEA_IEEE,
            })
            .await
            .unwrap();

        wait_for(&mut events, |e| matches!(e, Event::DeviceLeft { .. })).await;
        wait_for(&mut events, |e| matches!(e, Event::DeviceRemoved { .. })).await;
        assert_eq!(controller.device_count(), 0);
        assert!(controller
            .group(0x0002)
            .map(|g| g.members.is_empty())
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn test_backup_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _radio, events_rx) = test_controller(&dir).await;
        controller.start(false, events_rx).await.unwrap();

        let mut device = Device::new(IKEA_IEEE, IKEA_NWK);
        device.mark_initialized();
        controller.devices.insert(IKEA_IEEE, device);

        let blob = controller.backup().await.unwrap();

        // Restore into a fresh controller on new hardware
        let dir2 = tempfile::tempdir().unwrap();
        let (restored, radio2, events_rx2) = test_controller(&dir2).await;
        restored.start(false, events_rx2).await.unwrap();
        restored.restore(&blob).await.unwrap();

        assert_eq!(restored.device_count(), 1);
        assert_eq!(restored.device(IKEA_IEEE).unwrap().nwk, IKEA_NWK);
        let written = radio2.written_network.lock().unwrap().clone().unwrap();
        assert_eq!(written.pan_id, 0x1A62);
        assert_eq!(written.network_key.key, [0xAA; 16]);

        // Garbage is rejected, not applied
        assert!(matches!(
            restored.restore("{\"devices\": []}").await,
            Err(ControllerError::BackupIncompatible(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_cluster_degrades_to_raw_event() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, radio, events_rx) = test_controller(&dir).await;
        let mut events = controller.subscribe();
        controller.start(false, events_rx).await.unwrap();

        controller
            .devices
            .insert(IKEA_IEEE, Device::new(IKEA_IEEE, IKEA_NWK));

        let frame = ZclFrame::cluster_request(7, 0x01, vec![0xDE, 0xAD], None);
        radio
            .events_tx
            .send(RadioEvent::PacketReceived(ApsPacket {
                src_nwk: IKEA_NWK,
                src_ieee: Some(IKEA_IEEE),
                src_endpoint: 1,
                dst_endpoint: COORDINATOR_ENDPOINT,
                profile: profiles::HOME_AUTOMATION,
                cluster: 0xFC99,
                payload: frame.serialize(),
                sequence: 7,
                lqi: 255,
                rssi: -40,
            }))
            .await
            .unwrap();

        let event = wait_for(&mut events, |e| {
            matches!(e, Event::UnknownClusterMessage { .. })
        })
        .await;
        let Event::UnknownClusterMessage { cluster, .. } = event else {
            unreachable!()
        };
        assert_eq!(cluster, 0xFC99);
    }

    #[tokio::test]
    async fn test_reply_matching_requires_endpoints_and_direction() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, radio, events_rx) = test_controller(&dir).await;
        controller.start(false, events_rx).await.unwrap();

        controller
            .devices
            .insert(IKEA_IEEE, Device::new(IKEA_IEEE, IKEA_NWK));

        let tsn = controller.next_tsn();
        let request_frame = ZclFrame::cluster_request(tsn, 0x02, Vec::new(), None);
        let requester = Arc::clone(&controller);
        let handle = tokio::spawn(async move {
            requester
                .request(
                    IKEA_IEEE,
                    profiles::HOME_AUTOMATION,
                    cluster_id::ON_OFF,
                    COORDINATOR_ENDPOINT,
                    1,
                    tsn,
                    request_frame.serialize(),
                    true,
                    Some(Duration::from_secs(2)),
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let packet = |src_endpoint: u8, payload: Vec<u8>| ApsPacket {
            src_nwk: IKEA_NWK,
            src_ieee: Some(IKEA_IEEE),
            src_endpoint,
            dst_endpoint: COORDINATOR_ENDPOINT,
            profile: profiles::HOME_AUTOMATION,
            cluster: cluster_id::ON_OFF,
            payload,
            sequence: tsn,
            lqi: 255,
            rssi: -40,
        };
        let response = |status: ZclStatus, direction: Direction| {
            ZclFrame::general(
                tsn,
                &GeneralCommand::DefaultResponse(zigbee_wire::zcl::DefaultResponse {
                    command_id: 0x02,
                    status,
                }),
                direction,
                None,
            )
            .serialize()
        };

        // Same (tsn, nwk, cluster) but the wrong source endpoint
        radio
            .events_tx
            .send(RadioEvent::PacketReceived(packet(
                2,
                response(ZclStatus::Failure, Direction::ServerToClient),
            )))
            .await
            .unwrap();
        // Right endpoints but the wrong direction bit
        radio
            .events_tx
            .send(RadioEvent::PacketReceived(packet(
                1,
                response(ZclStatus::Failure, Direction::ClientToServer),
            )))
            .await
            .unwrap();
        // The genuine reply
        radio
            .events_tx
            .send(RadioEvent::PacketReceived(packet(
                1,
                response(ZclStatus::Success, Direction::ServerToClient),
            )))
            .await
            .unwrap();

        let reply = handle.await.unwrap().unwrap().unwrap();
        let zcl = ZclFrame::parse(&reply.payload).unwrap();
        match zcl.general_command().unwrap() {
            GeneralCommand::DefaultResponse(dr) => assert_eq!(dr.status, ZclStatus::Success),
            other => panic!("resolved the wrong frame: {other:?}"),
        }
        assert!(controller.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_configure_reporting_requires_confirmation() {
        use zigbee_wire::zcl::ConfigureReportingStatus;

        let dir = tempfile::tempdir().unwrap();
        let (controller, radio, events_rx) = test_controller(&dir).await;
        controller.start(false, events_rx).await.unwrap();

        let mut device = Device::new(IKEA_IEEE, IKEA_NWK);
        device.set_simple_descriptor(&SimpleDescriptor {
            endpoint: 1,
            profile_id: 0x0104,
            device_type: 770,
            device_version: 1,
            in_clusters: vec![cluster_id::TEMPERATURE_MEASUREMENT],
            out_clusters: vec![],
        });
        controller.devices.insert(IKEA_IEEE, device);

        let configure_response = |frame: &ApsFrame, status: ZclStatus| -> Option<ApsPacket> {
            let zcl = ZclFrame::parse(&frame.data).ok()?;
            if zcl.header.command_id != GeneralCommandId::ConfigureReporting as u8 {
                return None;
            }
            let response = ZclFrame::general(
                zcl.header.tsn,
                &GeneralCommand::ConfigureReportingResponse(vec![ConfigureReportingStatus {
                    status,
                    direction: 0,
                    attr_id: 0x0000,
                }]),
                Direction::ServerToClient,
                None,
            );
            Some(ApsPacket {
                src_nwk: IKEA_NWK,
                src_ieee: Some(IKEA_IEEE),
                src_endpoint: frame.dst_endpoint,
                dst_endpoint: frame.src_endpoint,
                profile: frame.profile,
                cluster: frame.cluster,
                payload: response.serialize(),
                sequence: zcl.header.tsn,
                lqi: 255,
                rssi: -40,
            })
        };

        // The device rejects the configuration: the entry stays pending
        radio.respond_with(move |frame| {
            configure_response(frame, ZclStatus::UnreportableAttribute)
        });
        let result = controller
            .configure_reporting(
                IKEA_IEEE,
                1,
                cluster_id::TEMPERATURE_MEASUREMENT,
                0x0000,
                10,
                300,
                Some(ZclValue::Int16(50)),
            )
            .await;
        assert!(matches!(result, Err(ControllerError::InvalidResponse(_))));
        let pending = controller.device(IKEA_IEEE).unwrap().endpoints[&1]
            .in_clusters[&cluster_id::TEMPERATURE_MEASUREMENT]
            .pending_reports
            .clone();
        assert_eq!(pending.get(&0x0000), Some(&(10, 300)));

        // The device confirms: the entry clears
        radio.respond_with(move |frame| configure_response(frame, ZclStatus::Success));
        controller
            .configure_reporting(
                IKEA_IEEE,
                1,
                cluster_id::TEMPERATURE_MEASUREMENT,
                0x0000,
                10,
                300,
                Some(ZclValue::Int16(50)),
            )
            .await
            .unwrap();
        let pending = controller.device(IKEA_IEEE).unwrap().endpoints[&1]
            .in_clusters[&cluster_id::TEMPERATURE_MEASUREMENT]
            .pending_reports
            .clone();
        assert!(pending.is_empty());
    }
}
