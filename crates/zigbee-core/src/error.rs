//! Error types for the application core

use thiserror::Error;
use zigbee_wire::{CodecError, Eui64};

/// Errors surfaced by the radio driver
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("Radio unavailable: {0}")]
    Unavailable(String),

    #[error("Network formation failed: {0}")]
    FormationFailed(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Radio I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to embedders by the application controller
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),

    #[error("Network formation failed: {0}")]
    NetworkFormFailed(String),

    #[error("Controller not initialized")]
    NotInitialized,

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(Eui64),

    #[error("Attribute {attr:#06x} not supported on {ieee} ep {endpoint} cluster {cluster:#06x}")]
    AttributeNotSupported {
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attr: u16,
    },

    #[error("Unsupported cluster: {0:#06x}")]
    UnsupportedCluster(u16),

    #[error("Bad argument: {0}")]
    BadArgument(String),

    #[error("Backup incompatible: {0}")]
    BackupIncompatible(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Persistence backend failed: {0}")]
    Persistence(#[from] crate::persistence::StoreError),
}

impl From<RadioError> for ControllerError {
    fn from(e: RadioError) -> Self {
        match e {
            RadioError::Unavailable(msg) => Self::RadioUnavailable(msg),
            RadioError::FormationFailed(msg) => Self::NetworkFormFailed(msg),
            RadioError::DeliveryFailed(msg) => Self::DeliveryFailed(msg),
            RadioError::Io(e) => Self::RadioUnavailable(e.to_string()),
        }
    }
}
