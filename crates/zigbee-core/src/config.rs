//! Controller configuration surface

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use zigbee_wire::Eui64;

/// Serial device settings forwarded to the radio driver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub baudrate: Option<u32>,
    #[serde(default)]
    pub flow_control: Option<String>,
}

/// Network parameters used when auto-forming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub channel: Option<u8>,
    /// Channel mask for energy scans when no channel is pinned
    #[serde(default = "default_channels")]
    pub channels: u32,
    #[serde(default)]
    pub pan_id: Option<u16>,
    #[serde(default)]
    pub extended_pan_id: Option<Eui64>,
    #[serde(default)]
    pub network_key: Option<[u8; 16]>,
    #[serde(default)]
    pub network_key_seq: u8,
    #[serde(default)]
    pub tc_link_key: Option<[u8; 16]>,
    #[serde(default)]
    pub tc_address: Option<Eui64>,
    #[serde(default)]
    pub update_id: u8,
}

fn default_channels() -> u32 {
    // Channels 11..=26
    0x07FF_F800
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            channel: None,
            channels: default_channels(),
            pan_id: None,
            extended_pan_id: None,
            network_key: None,
            network_key_seq: 0,
            tc_link_key: None,
            tc_address: None,
            update_id: 0,
        }
    }
}

/// OTA provider switches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtaConfig {
    /// Local directory scanned for *.ota / *.zigbee files
    #[serde(default)]
    pub otau_directory: Option<PathBuf>,
    #[serde(default)]
    pub ikea_provider: bool,
    #[serde(default)]
    pub ledvance_provider: bool,
    #[serde(default)]
    pub sonoff_provider: bool,
    #[serde(default)]
    pub inovelli_provider: bool,
    #[serde(default)]
    pub salus_provider: bool,
    /// Extra aggregate index URLs (Koenkk-style JSON indexes)
    #[serde(default)]
    pub extra_providers: Vec<String>,
}

/// Source routing switches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRoutingConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Startup behavior
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Form a network if the radio has none
    #[serde(default)]
    pub auto_form: bool,
}

/// Top-level controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_path: PathBuf,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub ota: OtaConfig,
    #[serde(default)]
    pub source_routing: SourceRoutingConfig,
    #[serde(default)]
    pub startup: StartupConfig,
}

impl Config {
    /// A configuration with defaults for everything but the database path
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            device: DeviceConfig::default(),
            network: NetworkConfig::default(),
            ota: OtaConfig::default(),
            source_routing: SourceRoutingConfig::default(),
            startup: StartupConfig::default(),
        }
    }
}
