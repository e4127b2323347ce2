//! Cluster registry
//!
//! The registry holds the schema for every known cluster: attribute ids,
//! wire types and access bits, plus client/server command schemas. Attribute
//! reads and writes consult it to pick the codec; cluster-specific commands
//! are resolved against it by (cluster, direction, command id).
//!
//! Manufacturer-specific clusters are keyed by (manufacturer code, cluster
//! id). A miss degrades gracefully: frames for unknown clusters are still
//! decoded to raw bytes and surfaced as unknown-cluster events.

use std::collections::HashMap;
use zigbee_wire::zcl::Direction;
use zigbee_wire::{CodecError, TypeId, ZclValue};

/// Attribute access bits
pub mod access {
    pub const READ: u8 = 0x01;
    pub const WRITE: u8 = 0x02;
    pub const REPORT: u8 = 0x04;
    pub const SCENE: u8 = 0x08;
}

/// Well-known cluster ids
pub mod cluster_id {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const DEVICE_TEMP: u16 = 0x0002;
    pub const IDENTIFY: u16 = 0x0003;
    pub const GROUPS: u16 = 0x0004;
    pub const SCENES: u16 = 0x0005;
    pub const ON_OFF: u16 = 0x0006;
    pub const LEVEL_CONTROL: u16 = 0x0008;
    pub const ALARMS: u16 = 0x0009;
    pub const TIME: u16 = 0x000A;
    pub const OTA_UPGRADE: u16 = 0x0019;
    pub const COLOR_CONTROL: u16 = 0x0300;
    pub const ILLUMINANCE_MEASUREMENT: u16 = 0x0400;
    pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
    pub const PRESSURE_MEASUREMENT: u16 = 0x0403;
    pub const HUMIDITY_MEASUREMENT: u16 = 0x0405;
    pub const OCCUPANCY_SENSING: u16 = 0x0406;
    pub const IAS_ZONE: u16 = 0x0500;
    pub const ELECTRICAL_MEASUREMENT: u16 = 0x0B04;
}

/// Basic cluster attribute ids used by the interview
pub mod basic_attr {
    pub const ZCL_VERSION: u16 = 0x0000;
    pub const MANUFACTURER_NAME: u16 = 0x0004;
    pub const MODEL_IDENTIFIER: u16 = 0x0005;
    pub const POWER_SOURCE: u16 = 0x0007;
    pub const SW_BUILD_ID: u16 = 0x4000;
}

/// One attribute in a cluster schema
#[derive(Debug, Clone, Copy)]
pub struct AttributeDef {
    pub id: u16,
    pub name: &'static str,
    pub type_id: TypeId,
    pub access: u8,
    pub mandatory: bool,
}

/// One parameter of a cluster-specific command
#[derive(Debug, Clone, Copy)]
pub struct ParamDef {
    pub name: &'static str,
    pub type_id: TypeId,
}

/// One cluster-specific command
#[derive(Debug, Clone, Copy)]
pub struct CommandDef {
    pub id: u8,
    pub name: &'static str,
    pub params: &'static [ParamDef],
    /// Command id of the expected response, if any
    pub response: Option<u8>,
}

/// A complete cluster schema
#[derive(Debug, Clone, Copy)]
pub struct ClusterDef {
    pub id: u16,
    pub name: &'static str,
    pub attributes: &'static [AttributeDef],
    /// Commands received by the server (client → server)
    pub client_commands: &'static [CommandDef],
    /// Commands generated by the server (server → client)
    pub server_commands: &'static [CommandDef],
}

impl ClusterDef {
    pub fn attribute(&self, attr_id: u16) -> Option<&'static AttributeDef> {
        self.attributes.iter().find(|a| a.id == attr_id)
    }

    pub fn command(&self, direction: Direction, command_id: u8) -> Option<&'static CommandDef> {
        let commands = match direction {
            Direction::ClientToServer => self.client_commands,
            Direction::ServerToClient => self.server_commands,
        };
        commands.iter().find(|c| c.id == command_id)
    }
}

macro_rules! attrs {
    ($(($id:expr, $name:expr, $ty:ident, $access:expr, $mandatory:expr)),* $(,)?) => {
        &[$(AttributeDef {
            id: $id,
            name: $name,
            type_id: TypeId::$ty,
            access: $access,
            mandatory: $mandatory,
        }),*]
    };
}

macro_rules! cmds {
    ($(($id:expr, $name:expr, [$(($pname:expr, $pty:ident)),*], $resp:expr)),* $(,)?) => {
        &[$(CommandDef {
            id: $id,
            name: $name,
            params: &[$(ParamDef { name: $pname, type_id: TypeId::$pty }),*],
            response: $resp,
        }),*]
    };
}

use access::{READ, REPORT, SCENE, WRITE};

static BASIC: ClusterDef = ClusterDef {
    id: cluster_id::BASIC,
    name: "Basic",
    attributes: attrs![
        (0x0000, "zcl_version", Uint8, READ, true),
        (0x0001, "app_version", Uint8, READ, false),
        (0x0002, "stack_version", Uint8, READ, false),
        (0x0003, "hw_version", Uint8, READ, false),
        (0x0004, "manufacturer", CharString, READ, false),
        (0x0005, "model", CharString, READ, false),
        (0x0006, "date_code", CharString, READ, false),
        (0x0007, "power_source", Enum8, READ, true),
        (0x0010, "location_desc", CharString, READ | WRITE, false),
        (0x4000, "sw_build_id", CharString, READ, false),
    ],
    client_commands: cmds![(0x00, "reset_fact_default", [], None)],
    server_commands: &[],
};

static POWER_CONFIG: ClusterDef = ClusterDef {
    id: cluster_id::POWER_CONFIG,
    name: "Power Configuration",
    attributes: attrs![
        (0x0000, "mains_voltage", Uint16, READ, false),
        (0x0020, "battery_voltage", Uint8, READ | REPORT, false),
        (0x0021, "battery_percentage_remaining", Uint8, READ | REPORT, false),
    ],
    client_commands: &[],
    server_commands: &[],
};

static DEVICE_TEMP: ClusterDef = ClusterDef {
    id: cluster_id::DEVICE_TEMP,
    name: "Device Temperature",
    attributes: attrs![(0x0000, "current_temperature", Int16, READ, true)],
    client_commands: &[],
    server_commands: &[],
};

static IDENTIFY: ClusterDef = ClusterDef {
    id: cluster_id::IDENTIFY,
    name: "Identify",
    attributes: attrs![(0x0000, "identify_time", Uint16, READ | WRITE, true)],
    client_commands: cmds![
        (0x00, "identify", [("identify_time", Uint16)], None),
        (0x01, "identify_query", [], Some(0x00)),
    ],
    server_commands: cmds![(0x00, "identify_query_response", [("timeout", Uint16)], None)],
};

static GROUPS: ClusterDef = ClusterDef {
    id: cluster_id::GROUPS,
    name: "Groups",
    attributes: attrs![(0x0000, "name_support", Bitmap8, READ, true)],
    client_commands: cmds![
        (0x00, "add", [("group_id", Uint16), ("group_name", CharString)], Some(0x00)),
        (0x01, "view", [("group_id", Uint16)], Some(0x01)),
        (0x02, "get_membership", [], Some(0x02)),
        (0x03, "remove", [("group_id", Uint16)], Some(0x03)),
        (0x04, "remove_all", [], None),
        (0x05, "add_if_identifying", [("group_id", Uint16), ("group_name", CharString)], None),
    ],
    server_commands: cmds![
        (0x00, "add_response", [("status", Enum8), ("group_id", Uint16)], None),
        (0x01, "view_response", [("status", Enum8), ("group_id", Uint16), ("group_name", CharString)], None),
        (0x03, "remove_response", [("status", Enum8), ("group_id", Uint16)], None),
    ],
};

static SCENES: ClusterDef = ClusterDef {
    id: cluster_id::SCENES,
    name: "Scenes",
    attributes: attrs![
        (0x0000, "count", Uint8, READ, true),
        (0x0001, "current_scene", Uint8, READ, true),
        (0x0002, "current_group", Uint16, READ, true),
        (0x0003, "scene_valid", Bool, READ, true),
        (0x0004, "name_support", Bitmap8, READ, true),
    ],
    client_commands: cmds![
        (0x02, "remove", [("group_id", Uint16), ("scene_id", Uint8)], Some(0x02)),
        (0x03, "remove_all", [("group_id", Uint16)], Some(0x03)),
        (0x04, "store", [("group_id", Uint16), ("scene_id", Uint8)], Some(0x04)),
        (0x05, "recall", [("group_id", Uint16), ("scene_id", Uint8)], None),
    ],
    server_commands: &[],
};

static ON_OFF: ClusterDef = ClusterDef {
    id: cluster_id::ON_OFF,
    name: "On/Off",
    attributes: attrs![
        (0x0000, "on_off", Bool, READ | REPORT | SCENE, true),
        (0x4001, "on_time", Uint16, READ | WRITE, false),
        (0x4002, "off_wait_time", Uint16, READ | WRITE, false),
    ],
    client_commands: cmds![
        (0x00, "off", [], None),
        (0x01, "on", [], None),
        (0x02, "toggle", [], None),
        (0x40, "off_with_effect", [("effect_id", Enum8), ("effect_variant", Enum8)], None),
        (0x42, "on_with_timed_off", [("on_off_control", Bitmap8), ("on_time", Uint16), ("off_wait_time", Uint16)], None),
    ],
    server_commands: &[],
};

static LEVEL_CONTROL: ClusterDef = ClusterDef {
    id: cluster_id::LEVEL_CONTROL,
    name: "Level Control",
    attributes: attrs![
        (0x0000, "current_level", Uint8, READ | REPORT | SCENE, true),
        (0x0001, "remaining_time", Uint16, READ, false),
        (0x0011, "on_level", Uint8, READ | WRITE, false),
    ],
    client_commands: cmds![
        (0x00, "move_to_level", [("level", Uint8), ("transition_time", Uint16)], None),
        (0x01, "move", [("move_mode", Enum8), ("rate", Uint8)], None),
        (0x02, "step", [("step_mode", Enum8), ("step_size", Uint8), ("transition_time", Uint16)], None),
        (0x03, "stop", [], None),
        (0x04, "move_to_level_with_on_off", [("level", Uint8), ("transition_time", Uint16)], None),
        (0x07, "stop_with_on_off", [], None),
    ],
    server_commands: &[],
};

static ALARMS: ClusterDef = ClusterDef {
    id: cluster_id::ALARMS,
    name: "Alarms",
    attributes: attrs![(0x0000, "alarm_count", Uint16, READ, false)],
    client_commands: cmds![
        (0x00, "reset_alarm", [("alarm_code", Enum8), ("cluster_id", Uint16)], None),
        (0x01, "reset_all_alarms", [], None),
    ],
    server_commands: cmds![
        (0x00, "alarm", [("alarm_code", Enum8), ("cluster_id", Uint16)], None),
    ],
};

static TIME: ClusterDef = ClusterDef {
    id: cluster_id::TIME,
    name: "Time",
    attributes: attrs![
        (0x0000, "time", UtcTime, READ | WRITE, true),
        (0x0001, "time_status", Bitmap8, READ | WRITE, true),
        (0x0002, "time_zone", Int32, READ | WRITE, false),
    ],
    client_commands: &[],
    server_commands: &[],
};

static OTA_UPGRADE: ClusterDef = ClusterDef {
    id: cluster_id::OTA_UPGRADE,
    name: "OTA Upgrade",
    attributes: attrs![
        (0x0000, "upgrade_server_id", Eui64, READ, true),
        (0x0001, "file_offset", Uint32, READ, false),
        (0x0002, "current_file_version", Uint32, READ, false),
        (0x0006, "image_upgrade_status", Enum8, READ, true),
        (0x0008, "minimum_block_req_delay", Uint16, READ, false),
    ],
    // The coordinator plays the server role: these arrive from devices
    client_commands: cmds![
        (0x01, "query_next_image", [("field_control", Bitmap8), ("manufacturer_code", Uint16), ("image_type", Uint16), ("current_file_version", Uint32)], Some(0x02)),
        (0x03, "image_block", [("field_control", Bitmap8), ("manufacturer_code", Uint16), ("image_type", Uint16), ("file_version", Uint32), ("file_offset", Uint32), ("maximum_data_size", Uint8)], Some(0x05)),
        (0x06, "upgrade_end", [("status", Enum8), ("manufacturer_code", Uint16), ("image_type", Uint16), ("file_version", Uint32)], Some(0x07)),
    ],
    server_commands: cmds![
        (0x00, "image_notify", [("payload_type", Enum8), ("query_jitter", Uint8)], None),
        (0x02, "query_next_image_response", [("status", Enum8)], None),
        (0x05, "image_block_response", [("status", Enum8)], None),
        (0x07, "upgrade_end_response", [("manufacturer_code", Uint16), ("image_type", Uint16), ("file_version", Uint32), ("current_time", UtcTime), ("upgrade_time", UtcTime)], None),
    ],
};

static COLOR_CONTROL: ClusterDef = ClusterDef {
    id: cluster_id::COLOR_CONTROL,
    name: "Color Control",
    attributes: attrs![
        (0x0000, "current_hue", Uint8, READ | REPORT, false),
        (0x0001, "current_saturation", Uint8, READ | REPORT | SCENE, false),
        (0x0003, "current_x", Uint16, READ | REPORT | SCENE, true),
        (0x0004, "current_y", Uint16, READ | REPORT | SCENE, true),
        (0x0007, "color_temperature", Uint16, READ | REPORT, false),
    ],
    client_commands: cmds![
        (0x00, "move_to_hue", [("hue", Uint8), ("direction", Enum8), ("transition_time", Uint16)], None),
        (0x03, "move_to_saturation", [("saturation", Uint8), ("transition_time", Uint16)], None),
        (0x06, "move_to_hue_and_saturation", [("hue", Uint8), ("saturation", Uint8), ("transition_time", Uint16)], None),
        (0x07, "move_to_color", [("color_x", Uint16), ("color_y", Uint16), ("transition_time", Uint16)], None),
        (0x0A, "move_to_color_temp", [("color_temp_mireds", Uint16), ("transition_time", Uint16)], None),
    ],
    server_commands: &[],
};

static ILLUMINANCE_MEASUREMENT: ClusterDef = ClusterDef {
    id: cluster_id::ILLUMINANCE_MEASUREMENT,
    name: "Illuminance Measurement",
    attributes: attrs![
        (0x0000, "measured_value", Uint16, READ | REPORT, true),
        (0x0001, "min_measured_value", Uint16, READ, true),
        (0x0002, "max_measured_value", Uint16, READ, true),
    ],
    client_commands: &[],
    server_commands: &[],
};

static TEMPERATURE_MEASUREMENT: ClusterDef = ClusterDef {
    id: cluster_id::TEMPERATURE_MEASUREMENT,
    name: "Temperature Measurement",
    attributes: attrs![
        (0x0000, "measured_value", Int16, READ | REPORT, true),
        (0x0001, "min_measured_value", Int16, READ, true),
        (0x0002, "max_measured_value", Int16, READ, true),
    ],
    client_commands: &[],
    server_commands: &[],
};

static PRESSURE_MEASUREMENT: ClusterDef = ClusterDef {
    id: cluster_id::PRESSURE_MEASUREMENT,
    name: "Pressure Measurement",
    attributes: attrs![
        (0x0000, "measured_value", Int16, READ | REPORT, true),
        (0x0001, "min_measured_value", Int16, READ, true),
        (0x0002, "max_measured_value", Int16, READ, true),
    ],
    client_commands: &[],
    server_commands: &[],
};

static HUMIDITY_MEASUREMENT: ClusterDef = ClusterDef {
    id: cluster_id::HUMIDITY_MEASUREMENT,
    name: "Relative Humidity Measurement",
    attributes: attrs![
        (0x0000, "measured_value", Uint16, READ | REPORT, true),
        (0x0001, "min_measured_value", Uint16, READ, true),
        (0x0002, "max_measured_value", Uint16, READ, true),
    ],
    client_commands: &[],
    server_commands: &[],
};

static OCCUPANCY_SENSING: ClusterDef = ClusterDef {
    id: cluster_id::OCCUPANCY_SENSING,
    name: "Occupancy Sensing",
    attributes: attrs![
        (0x0000, "occupancy", Bitmap8, READ | REPORT, true),
        (0x0001, "occupancy_sensor_type", Enum8, READ, true),
    ],
    client_commands: &[],
    server_commands: &[],
};

static IAS_ZONE: ClusterDef = ClusterDef {
    id: cluster_id::IAS_ZONE,
    name: "IAS Zone",
    attributes: attrs![
        (0x0000, "zone_state", Enum8, READ, true),
        (0x0001, "zone_type", Enum16, READ, true),
        (0x0002, "zone_status", Bitmap16, READ, true),
        (0x0010, "cie_addr", Eui64, READ | WRITE, true),
    ],
    client_commands: cmds![
        (0x00, "enroll_response", [("enroll_response_code", Enum8), ("zone_id", Uint8)], None),
    ],
    server_commands: cmds![
        (0x00, "status_change_notification", [("zone_status", Bitmap16), ("extended_status", Bitmap8), ("zone_id", Uint8), ("delay", Uint16)], None),
        (0x01, "enroll", [("zone_type", Enum16), ("manufacturer_code", Uint16)], Some(0x00)),
    ],
};

static ELECTRICAL_MEASUREMENT: ClusterDef = ClusterDef {
    id: cluster_id::ELECTRICAL_MEASUREMENT,
    name: "Electrical Measurement",
    attributes: attrs![
        (0x0000, "measurement_type", Bitmap32, READ, true),
        (0x0505, "rms_voltage", Uint16, READ | REPORT, false),
        (0x0508, "rms_current", Uint16, READ | REPORT, false),
        (0x050B, "active_power", Int16, READ | REPORT, false),
    ],
    client_commands: &[],
    server_commands: &[],
};

/// Process-wide cluster registry
///
/// Effectively immutable after initialization; quirk layers may register
/// manufacturer-specific definitions before handing it to the controller.
pub struct Registry {
    clusters: HashMap<(Option<u16>, u16), &'static ClusterDef>,
}

impl Registry {
    /// A registry with every standard cluster this stack knows
    pub fn standard() -> Self {
        let mut registry = Self {
            clusters: HashMap::new(),
        };
        for def in [
            &BASIC,
            &POWER_CONFIG,
            &DEVICE_TEMP,
            &IDENTIFY,
            &GROUPS,
            &SCENES,
            &ON_OFF,
            &LEVEL_CONTROL,
            &ALARMS,
            &TIME,
            &OTA_UPGRADE,
            &COLOR_CONTROL,
            &ILLUMINANCE_MEASUREMENT,
            &TEMPERATURE_MEASUREMENT,
            &PRESSURE_MEASUREMENT,
            &HUMIDITY_MEASUREMENT,
            &OCCUPANCY_SENSING,
            &IAS_ZONE,
            &ELECTRICAL_MEASUREMENT,
        ] {
            registry.register(None, def);
        }
        registry
    }

    /// Register a cluster definition, optionally manufacturer-specific
    pub fn register(&mut self, manufacturer_code: Option<u16>, def: &'static ClusterDef) {
        self.clusters.insert((manufacturer_code, def.id), def);
    }

    /// Look up a cluster; manufacturer-specific entries shadow standard ones
    pub fn get(
        &self,
        manufacturer_code: Option<u16>,
        cluster_id: u16,
    ) -> Option<&'static ClusterDef> {
        if manufacturer_code.is_some() {
            if let Some(def) = self.clusters.get(&(manufacturer_code, cluster_id)) {
                return Some(def);
            }
        }
        self.clusters.get(&(None, cluster_id)).copied()
    }

    /// The declared wire type of an attribute, if known
    pub fn attribute_type(&self, cluster_id: u16, attr_id: u16) -> Option<TypeId> {
        self.get(None, cluster_id)
            .and_then(|def| def.attribute(attr_id))
            .map(|attr| attr.type_id)
    }

    /// Encode a cluster-specific command's parameters per its schema
    pub fn encode_command(
        &self,
        cluster_id: u16,
        direction: Direction,
        command_id: u8,
        args: &[ZclValue],
    ) -> Result<Vec<u8>, CodecError> {
        let def = self
            .get(None, cluster_id)
            .and_then(|c| c.command(direction, command_id))
            .ok_or_else(|| {
                CodecError::InvalidFrame(format!(
                    "No command {command_id:#04x} on cluster {cluster_id:#06x}"
                ))
            })?;
        if args.len() != def.params.len() {
            return Err(CodecError::InvalidFrame(format!(
                "Command {} takes {} parameters, got {}",
                def.name,
                def.params.len(),
                args.len()
            )));
        }
        let mut out = Vec::new();
        for (param, arg) in def.params.iter().zip(args) {
            if arg.type_id() != param.type_id {
                return Err(CodecError::InvalidFrame(format!(
                    "Parameter {} expects type {:?}, got {:?}",
                    param.name,
                    param.type_id,
                    arg.type_id()
                )));
            }
            arg.encode(&mut out);
        }
        Ok(out)
    }

    /// Decode a cluster-specific command's parameters per its schema
    pub fn decode_command(
        &self,
        cluster_id: u16,
        direction: Direction,
        command_id: u8,
        payload: &[u8],
    ) -> Result<Vec<ZclValue>, CodecError> {
        let def = self
            .get(None, cluster_id)
            .and_then(|c| c.command(direction, command_id))
            .ok_or_else(|| {
                CodecError::InvalidFrame(format!(
                    "No command {command_id:#04x} on cluster {cluster_id:#06x}"
                ))
            })?;
        let mut values = Vec::with_capacity(def.params.len());
        let mut rest = payload;
        for param in def.params {
            let (value, r) = ZclValue::decode(param.type_id, rest)?;
            values.push(value);
            rest = r;
        }
        Ok(values)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_clusters_present() {
        let registry = Registry::standard();
        assert_eq!(registry.get(None, cluster_id::BASIC).unwrap().name, "Basic");
        assert_eq!(
            registry.get(None, cluster_id::OTA_UPGRADE).unwrap().name,
            "OTA Upgrade"
        );
        assert!(registry.get(None, 0xFC00).is_none());
    }

    #[test]
    fn test_attribute_type_lookup() {
        let registry = Registry::standard();
        assert_eq!(
            registry.attribute_type(cluster_id::BASIC, basic_attr::MANUFACTURER_NAME),
            Some(TypeId::CharString)
        );
        assert_eq!(
            registry.attribute_type(cluster_id::ON_OFF, 0x0000),
            Some(TypeId::Bool)
        );
        assert_eq!(registry.attribute_type(cluster_id::BASIC, 0x9999), None);
    }

    #[test]
    fn test_manufacturer_specific_shadows_standard() {
        static QUIRK: ClusterDef = ClusterDef {
            id: cluster_id::ON_OFF,
            name: "Vendor On/Off",
            attributes: &[],
            client_commands: &[],
            server_commands: &[],
        };
        let mut registry = Registry::standard();
        registry.register(Some(0x117C), &QUIRK);
        assert_eq!(
            registry.get(Some(0x117C), cluster_id::ON_OFF).unwrap().name,
            "Vendor On/Off"
        );
        // Other manufacturers fall through to the standard definition
        assert_eq!(
            registry.get(Some(0x1021), cluster_id::ON_OFF).unwrap().name,
            "On/Off"
        );
    }

    #[test]
    fn test_command_roundtrip_via_schema() {
        let registry = Registry::standard();
        let args = vec![ZclValue::Uint8(128), ZclValue::Uint16(10)];
        let payload = registry
            .encode_command(
                cluster_id::LEVEL_CONTROL,
                Direction::ClientToServer,
                0x00,
                &args,
            )
            .unwrap();
        let decoded = registry
            .decode_command(
                cluster_id::LEVEL_CONTROL,
                Direction::ClientToServer,
                0x00,
                &payload,
            )
            .unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_command_arity_checked() {
        let registry = Registry::standard();
        let err = registry.encode_command(
            cluster_id::LEVEL_CONTROL,
            Direction::ClientToServer,
            0x00,
            &[ZclValue::Uint8(128)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_group_commands_have_responses() {
        let registry = Registry::standard();
        let groups = registry.get(None, cluster_id::GROUPS).unwrap();
        let add = groups.command(Direction::ClientToServer, 0x00).unwrap();
        assert_eq!(add.response, Some(0x00));
        let remove_all = groups.command(Direction::ClientToServer, 0x04).unwrap();
        assert_eq!(remove_all.response, None);
    }
}
