//! Zigbee application-layer wire formats
//!
//! This crate implements the hardware-independent codecs: ZCL primitive
//! types and the tagged attribute value, ZCL frame headers and general
//! commands, ZDO request/response frames, and the OTA upgrade file format.

pub mod ota_image;
pub mod types;
pub mod zcl;
pub mod zdo;

pub use ota_image::{ImageKey, OtaImage};
pub use types::{CodecError, Eui64, TypeId, ZclValue};
pub use zcl::{Direction, FrameType, GeneralCommand, GeneralCommandId, ZclFrame, ZclStatus};
pub use zdo::{NodeDescriptor, SimpleDescriptor, ZdoCluster};

/// Well-known profile ids
pub mod profiles {
    /// Zigbee Device Object (endpoint 0)
    pub const ZDO: u16 = 0x0000;
    /// Home Automation
    pub const HOME_AUTOMATION: u16 = 0x0104;
    /// Green Power (endpoint 242)
    pub const GREEN_POWER: u16 = 0xA1E0;
}
