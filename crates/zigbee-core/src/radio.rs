//! The narrow interface the core consumes from a radio driver
//!
//! Concrete drivers (UART framing, vendor command sets) live in their own
//! crates and implement [`RadioDriver`]. Inbound traffic flows the other
//! way: drivers push [`RadioEvent`]s into the channel handed to the
//! controller, which drains them on its single dispatch task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zigbee_wire::Eui64;

use crate::error::RadioError;

/// Destination of an outbound APS frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Unicast to a short address
    Unicast(u16),
    /// Broadcast to one of the broadcast addresses (0xFFFC..=0xFFFF)
    Broadcast(u16),
    /// Multicast to a group id
    Group(u16),
}

/// A fully-encoded outbound APS frame plus addressing metadata
#[derive(Debug, Clone)]
pub struct ApsFrame {
    pub dst: Destination,
    pub profile: u16,
    pub cluster: u16,
    pub src_endpoint: u8,
    pub dst_endpoint: u8,
    pub sequence: u8,
    pub radius: u8,
    pub data: Vec<u8>,
}

/// An inbound APS packet as delivered by the radio
#[derive(Debug, Clone)]
pub struct ApsPacket {
    pub src_nwk: u16,
    pub src_ieee: Option<Eui64>,
    pub src_endpoint: u8,
    pub dst_endpoint: u8,
    pub profile: u16,
    pub cluster: u16,
    pub payload: Vec<u8>,
    pub sequence: u8,
    pub lqi: u8,
    pub rssi: i8,
}

/// A network key or trust-center link key with its frame counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key: [u8; 16],
    #[serde(default)]
    pub seq: u8,
    #[serde(default)]
    pub rx_counter: u32,
    #[serde(default)]
    pub tx_counter: u32,
    #[serde(default)]
    pub partner_ieee: Option<Eui64>,
}

/// Coordinator network parameters, as read from or written to the radio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub extended_pan_id: Eui64,
    pub pan_id: u16,
    pub nwk_update_id: u8,
    pub nwk_manager_id: u16,
    pub channel: u8,
    pub channel_mask: u32,
    pub security_level: u8,
    pub network_key: KeyInfo,
    pub tc_link_key: KeyInfo,
}

/// Coordinator node identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub ieee: Eui64,
    pub nwk: u16,
    /// 0 = coordinator, 1 = router, 2 = end device
    pub logical_type: u8,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Unsolicited traffic from the radio to the core
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// A raw APS packet arrived
    PacketReceived(ApsPacket),
    /// A device joined or rejoined the network
    DeviceJoined {
        nwk: u16,
        ieee: Eui64,
        parent_nwk: u16,
    },
    /// A device left the network
    DeviceLeft { nwk: u16, ieee: Eui64 },
    /// Source-route relay list observed for a device
    RelaysUpdated { ieee: Eui64, relays: Vec<u16> },
}

/// Operations the core calls on a radio driver
#[async_trait]
pub trait RadioDriver: Send + Sync {
    /// Whether a radio is reachable with the configured device settings
    async fn probe(&self) -> bool;

    /// Bring the radio up; `auto_form` permits forming a new network
    async fn startup(&self, auto_form: bool) -> Result<(), RadioError>;

    /// Release the radio
    async fn shutdown(&self) -> Result<(), RadioError>;

    /// Read the current network parameters and coordinator identity
    async fn network_info(&self) -> Result<(NetworkInfo, NodeInfo), RadioError>;

    /// Overwrite network parameters (used by restore)
    async fn write_network_info(
        &self,
        network: &NetworkInfo,
        node: &NodeInfo,
    ) -> Result<(), RadioError>;

    /// Drop a device from the NCP's child/neighbor tables
    async fn force_remove(&self, ieee: Eui64) -> Result<(), RadioError>;

    /// Open the coordinator itself for joining
    async fn permit_ncp(&self, duration: u8) -> Result<(), RadioError>;

    /// Open joining through a specific router with an install-code key
    async fn permit_with_key(
        &self,
        node: u16,
        key: [u8; 16],
        duration: u8,
    ) -> Result<(), RadioError>;

    /// Transmit a frame; `Ok` means the radio accepted it for delivery
    async fn send(&self, frame: ApsFrame) -> Result<(), RadioError>;
}

/// Broadcast address: all devices with rx on when idle
pub const BROADCAST_RX_ON_WHEN_IDLE: u16 = 0xFFFD;
/// Broadcast address: all routers and coordinator
pub const BROADCAST_ROUTERS_AND_COORDINATOR: u16 = 0xFFFC;
/// Broadcast address: all devices
pub const BROADCAST_ALL_DEVICES: u16 = 0xFFFF;
