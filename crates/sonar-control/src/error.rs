//! Error types for the control layer

use sonar_core::StoreError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Read-back of {key} does not match the requested value")]
    VerifyFailed { key: String },
    #[error("Not supported by this device: {0}")]
    Unsupported(&'static str),
    #[error("Unknown source or port: {0}")]
    UnknownSource(String),
    #[error("Unknown preset {preset} for {device}")]
    UnknownPreset { device: String, preset: i64 },
}
