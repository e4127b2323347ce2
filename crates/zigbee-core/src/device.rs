//! Device, endpoint and cluster entities
//!
//! The controller owns the device table; endpoints are owned by their
//! device and clusters by their endpoint, mirroring the persistence
//! cascade. Interview progress is tracked by [`DeviceStatus`]:
//! `new → zdo_init → endpoints_init → initialized`, with the orthogonal
//! terminal `left`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use zigbee_wire::zdo::{Neighbor, NodeDescriptor, PowerDescriptor, Route, SimpleDescriptor};
use zigbee_wire::{Eui64, ZclValue};

/// GreenPower endpoint id; recorded during the interview but not probed
/// for basic attributes
pub const GREEN_POWER_ENDPOINT: u8 = 242;

/// Interview retry caps
pub const NODE_DESC_ATTEMPTS: u32 = 3;
pub const ACTIVE_EP_ATTEMPTS: u32 = 3;
pub const SIMPLE_DESC_ATTEMPTS: u32 = 2;

/// Device lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    New,
    ZdoInit,
    EndpointsInit,
    Initialized,
    Left,
}

impl DeviceStatus {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::New => 0,
            Self::ZdoInit => 1,
            Self::EndpointsInit => 2,
            Self::Initialized => 3,
            Self::Left => 4,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::ZdoInit,
            2 => Self::EndpointsInit,
            3 => Self::Initialized,
            4 => Self::Left,
            _ => Self::New,
        }
    }
}

/// Per-cluster state: the attribute cache and reporting bookkeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterState {
    /// Last observed value per attribute
    pub attributes: BTreeMap<u16, ZclValue>,
    /// Attributes the device answered UNSUPPORTED_ATTRIBUTE for
    pub unsupported: BTreeSet<u16>,
    /// Reporting configurations not yet confirmed by the device,
    /// keyed by attribute: (min_interval, max_interval)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending_reports: BTreeMap<u16, (u16, u16)>,
}

/// Cluster direction relative to the endpoint that hosts it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterSide {
    /// Input (server) cluster
    In,
    /// Output (client) cluster
    Out,
}

/// An application endpoint on a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: u8,
    pub profile_id: u16,
    pub device_type: u16,
    /// In-clusters keyed by cluster id
    pub in_clusters: BTreeMap<u16, ClusterState>,
    /// Out-clusters keyed by cluster id
    pub out_clusters: BTreeMap<u16, ClusterState>,
}

impl Endpoint {
    /// Build an endpoint from a simple descriptor
    pub fn from_descriptor(descriptor: &SimpleDescriptor) -> Self {
        Self {
            id: descriptor.endpoint,
            profile_id: descriptor.profile_id,
            device_type: descriptor.device_type,
            in_clusters: descriptor
                .in_clusters
                .iter()
                .map(|&id| (id, ClusterState::default()))
                .collect(),
            out_clusters: descriptor
                .out_clusters
                .iter()
                .map(|&id| (id, ClusterState::default()))
                .collect(),
        }
    }

    pub fn cluster(&self, side: ClusterSide, cluster_id: u16) -> Option<&ClusterState> {
        match side {
            ClusterSide::In => self.in_clusters.get(&cluster_id),
            ClusterSide::Out => self.out_clusters.get(&cluster_id),
        }
    }

    pub fn cluster_mut(&mut self, side: ClusterSide, cluster_id: u16) -> Option<&mut ClusterState> {
        match side {
            ClusterSide::In => self.in_clusters.get_mut(&cluster_id),
            ClusterSide::Out => self.out_clusters.get_mut(&cluster_id),
        }
    }

    pub fn has_cluster(&self, cluster_id: u16) -> bool {
        self.in_clusters.contains_key(&cluster_id) || self.out_clusters.contains_key(&cluster_id)
    }
}

/// A Zigbee device on the network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Permanent EUI-64, the device table key
    pub ieee: Eui64,
    /// Short address; may change on rejoin
    pub nwk: u16,
    pub status: DeviceStatus,
    #[serde(default)]
    pub node_descriptor: Option<NodeDescriptor>,
    /// Fetched opportunistically during the interview; a missing one never
    /// blocks initialization
    #[serde(default)]
    pub power_descriptor: Option<PowerDescriptor>,
    /// Manufacturer name from the Basic cluster
    #[serde(default)]
    pub manufacturer: Option<String>,
    /// Model identifier from the Basic cluster
    #[serde(default)]
    pub model: Option<String>,
    /// Endpoints keyed by endpoint id
    #[serde(default)]
    pub endpoints: BTreeMap<u8, Endpoint>,
    /// Neighbor table from Mgmt-Lqi scans
    #[serde(default)]
    pub neighbors: Vec<Neighbor>,
    /// Routing table from Mgmt-Rtg scans
    #[serde(default)]
    pub routes: Vec<Route>,
    /// Source-route relay list
    #[serde(default)]
    pub relays: Vec<u16>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub lqi: Option<u8>,
    #[serde(skip)]
    pub rssi: Option<i8>,
}

impl Device {
    pub fn new(ieee: Eui64, nwk: u16) -> Self {
        Self {
            ieee,
            nwk,
            status: DeviceStatus::New,
            node_descriptor: None,
            power_descriptor: None,
            manufacturer: None,
            model: None,
            endpoints: BTreeMap::new(),
            neighbors: Vec::new(),
            routes: Vec::new(),
            relays: Vec::new(),
            last_seen: None,
            lqi: None,
            rssi: None,
        }
    }

    /// Record the node descriptor; `new → zdo_init`
    pub fn set_node_descriptor(&mut self, descriptor: NodeDescriptor) {
        self.node_descriptor = Some(descriptor);
        if self.status == DeviceStatus::New {
            self.status = DeviceStatus::ZdoInit;
        }
    }

    /// Record the active endpoint list; `zdo_init → endpoints_init`
    pub fn set_active_endpoints(&mut self, endpoint_ids: &[u8]) {
        for &id in endpoint_ids {
            self.endpoints.entry(id).or_insert(Endpoint {
                id,
                profile_id: 0,
                device_type: 0,
                in_clusters: BTreeMap::new(),
                out_clusters: BTreeMap::new(),
            });
        }
        // Endpoints that disappeared since the last interview are dropped
        self.endpoints.retain(|id, _| endpoint_ids.contains(id));
        if self.status == DeviceStatus::ZdoInit {
            self.status = DeviceStatus::EndpointsInit;
        }
    }

    /// Fill in one endpoint from its simple descriptor
    pub fn set_simple_descriptor(&mut self, descriptor: &SimpleDescriptor) {
        self.endpoints
            .insert(descriptor.endpoint, Endpoint::from_descriptor(descriptor));
    }

    /// Whether every endpoint has its simple descriptor (GreenPower excepted)
    pub fn endpoints_populated(&self) -> bool {
        !self.endpoints.is_empty()
            && self
                .endpoints
                .values()
                .all(|ep| ep.id == GREEN_POWER_ENDPOINT || ep.profile_id != 0)
    }

    /// The interview is done; `endpoints_init → initialized`
    pub fn mark_initialized(&mut self) {
        self.status = DeviceStatus::Initialized;
    }

    pub fn is_initialized(&self) -> bool {
        self.status == DeviceStatus::Initialized
    }

    /// Endpoints that should be asked for Basic manufacturer/model
    pub fn interview_endpoints(&self) -> Vec<u8> {
        self.endpoints
            .keys()
            .copied()
            .filter(|&id| id != GREEN_POWER_ENDPOINT)
            .collect()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            ieee: self.ieee,
            nwk: self.nwk,
            status: self.status,
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            endpoint_ids: self.endpoints.keys().copied().collect(),
        }
    }
}

/// A lightweight copy of device identity handed to event listeners
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub ieee: Eui64,
    pub nwk: u16,
    pub status: DeviceStatus,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub endpoint_ids: Vec<u8>,
}
