//! Network backup and restore
//!
//! A backup is a self-contained JSON blob: coordinator identity, network
//! parameters with key material and frame counters, and the device table.
//! Backups append to the `network_backups` table and can re-form an
//! identical network on fresh hardware.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zigbee_wire::Eui64;

use crate::device::Device;
use crate::radio::{KeyInfo, NetworkInfo, NodeInfo};

/// Network parameters as stored inside a backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupNetworkInfo {
    pub extended_pan_id: Eui64,
    pub pan_id: u16,
    pub nwk_update_id: u8,
    pub nwk_manager_id: u16,
    pub channel: u8,
    pub channel_mask: u32,
    pub security_level: u8,
    pub network_key: KeyInfo,
    pub tc_link_key: KeyInfo,
    #[serde(default)]
    pub key_table: Vec<KeyInfo>,
    #[serde(default)]
    pub children: Vec<Eui64>,
    /// IEEE → short address map for children without device rows
    #[serde(default)]
    pub nwk_addresses: BTreeMap<Eui64, u16>,
    /// Radio-specific state carried opaquely
    #[serde(default)]
    pub stack_specific: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Which stack produced this backup
    pub source: String,
    pub backup_time: DateTime<Utc>,
}

/// A complete network backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkBackup {
    pub node_info: NodeInfo,
    pub network_info: BackupNetworkInfo,
    pub devices: Vec<Device>,
}

impl NetworkBackup {
    pub fn new(
        network: &NetworkInfo,
        node: &NodeInfo,
        devices: Vec<Device>,
        backup_time: DateTime<Utc>,
    ) -> Self {
        let nwk_addresses = devices.iter().map(|d| (d.ieee, d.nwk)).collect();
        Self {
            node_info: node.clone(),
            network_info: BackupNetworkInfo {
                extended_pan_id: network.extended_pan_id,
                pan_id: network.pan_id,
                nwk_update_id: network.nwk_update_id,
                nwk_manager_id: network.nwk_manager_id,
                channel: network.channel,
                channel_mask: network.channel_mask,
                security_level: network.security_level,
                network_key: network.network_key.clone(),
                tc_link_key: network.tc_link_key.clone(),
                key_table: Vec::new(),
                children: Vec::new(),
                nwk_addresses,
                stack_specific: serde_json::Value::Null,
                metadata: serde_json::Value::Null,
                source: concat!("zigbee-core@", env!("CARGO_PKG_VERSION")).to_string(),
                backup_time,
            },
            devices,
        }
    }

    /// The network parameters to hand the radio on restore
    pub fn network_info(&self) -> NetworkInfo {
        NetworkInfo {
            extended_pan_id: self.network_info.extended_pan_id,
            pan_id: self.network_info.pan_id,
            nwk_update_id: self.network_info.nwk_update_id,
            nwk_manager_id: self.network_info.nwk_manager_id,
            channel: self.network_info.channel,
            channel_mask: self.network_info.channel_mask,
            security_level: self.network_info.security_level,
            network_key: self.network_info.network_key.clone(),
            tc_link_key: self.network_info.tc_link_key.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse and validate a backup blob; missing key material is an error
    pub fn from_json(blob: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(blob)
    }
}
