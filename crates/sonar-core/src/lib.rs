//! Sonar Core - schema, parameter store and sample types
//!
//! This crate provides the data model shared by every layer of the sonar
//! control stack:
//! - Typed parameter values and atomic key/value lists
//! - The schema describing a device's key tree, and a builder for it
//! - The `ParameterStore` interface plus an in-memory implementation
//! - Streaming sample types and the channel ↔ numeric id binding

pub mod binding;
pub mod builder;
pub mod device;
pub mod keys;
pub mod sample;
pub mod schema;
pub mod store;
pub mod value;

pub use binding::{ChannelBinding, ChannelRef};
pub use builder::{
    DeviceDescription, GeneratorDescription, IdAllocator, SchemaBuilder, SensorDescription,
    SourceDescription, TvgDescription,
};
pub use device::{
    AntennaPosition, GeneratorModes, GeneratorSignal, SensorPortType, SensorProtocol,
    SignalTypes, SyncModes, SyncType, TrackType, TvgModes,
};
pub use sample::{DataSample, DataType};
pub use schema::{
    Access, EnumValue, KeyDescriptor, Schema, SchemaError, SONAR_SCHEMA_ID, SONAR_SCHEMA_VERSION,
};
pub use store::{ListenerId, MemoryStore, ParameterStore, StoreError, StoreListener};
pub use value::{ParamList, ParamValue, ValueType};
