//! Controller events
//!
//! Listeners subscribe through [`crate::Controller::subscribe`] and receive
//! every event in the order the controller observed it for a given device.
//! Handlers must not block: the fan-out happens on the dispatch task.

use zigbee_wire::{Eui64, ZclValue};

use crate::device::DeviceSnapshot;

/// Events emitted by the application controller
#[derive(Debug, Clone)]
pub enum Event {
    /// A device announced itself (join or rejoin)
    DeviceJoined { ieee: Eui64, nwk: u16 },
    /// Device announce ZDO frame observed
    DeviceAnnounce { ieee: Eui64, nwk: u16 },
    /// Interview finished; the device tree is fully populated
    DeviceInitialized(DeviceSnapshot),
    /// Interview finished for a device that was already known
    RawDeviceInitialized(DeviceSnapshot),
    /// An interview step exhausted its retries
    DeviceInitFailure { ieee: Eui64, reason: String },
    /// A device left the network
    DeviceLeft { ieee: Eui64, nwk: u16 },
    /// A device row was removed from the table
    DeviceRemoved { ieee: Eui64 },
    /// Node descriptor fetched or refreshed
    NodeDescriptorUpdated { ieee: Eui64 },
    /// Source-route relay list changed
    DeviceRelaysUpdated { ieee: Eui64, relays: Vec<u16> },
    /// An attribute cache entry changed
    AttributeUpdated {
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attr_id: u16,
        value: ZclValue,
    },
    /// A cluster-specific command arrived
    ClusterCommand {
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        command_id: u8,
        payload: Vec<u8>,
    },
    /// A general (profile-wide) command arrived
    GeneralCommand {
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        command_id: u8,
    },
    /// A frame arrived for a cluster the registry does not know
    UnknownClusterMessage {
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        payload: Vec<u8>,
    },
    /// Permit-join duration changed
    PermitDuration { duration: u8 },
    /// A group was created
    GroupAdded { group_id: u16 },
    /// A member was added to a group
    GroupMemberAdded {
        group_id: u16,
        ieee: Eui64,
        endpoint: u8,
    },
    /// A member was removed from a group
    GroupMemberRemoved {
        group_id: u16,
        ieee: Eui64,
        endpoint: u8,
    },
    /// A group was removed
    GroupRemoved { group_id: u16 },
    /// The radio formed (or re-formed) a network
    NetworkFormed,
}
