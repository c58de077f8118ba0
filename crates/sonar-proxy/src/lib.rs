//! Sonar Proxy - re-export a sonar device to downstream clients
//!
//! A [`ProxyForwarder`] wraps an upstream [`sonar_control::ControlFacade`]
//! and presents a device of its own, either verbatim or reduced and
//! downsampled.

pub mod forwarder;
pub mod remap;
pub mod scale;
pub mod schema;

pub use forwarder::{ProxyConfig, ProxyForwarder, ProxyMode};
pub use remap::PresetRemap;
pub use scale::{decode_amplitude, Downsampler, ScaleBuffer, ScaleConfig, TransformError};
pub use schema::computed_schema;
