//! Zigbee Home Automation application core
//!
//! This crate is the hardware-independent heart of a Zigbee application
//! stack: it models the PAN, tracks devices through their interview
//! lifecycle, dispatches ZCL/ZDO traffic, persists everything across
//! restarts and drives over-the-air firmware upgrades. Concrete radio
//! drivers plug in underneath through the [`radio::RadioDriver`] trait.

pub mod backup;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod event;
pub mod group;
pub mod ota;
pub mod persistence;
pub mod radio;
pub mod registry;

pub use backup::NetworkBackup;
pub use config::Config;
pub use controller::Controller;
pub use device::{Device, DeviceStatus, Endpoint};
pub use error::{ControllerError, RadioError};
pub use event::Event;
pub use group::{Group, Groups};
pub use ota::{OtaEngine, OtaProvider};
pub use radio::{ApsFrame, ApsPacket, RadioDriver, RadioEvent};
pub use registry::Registry;
