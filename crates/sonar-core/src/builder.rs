//! Builds the sonar key tree from a device description
//!
//! Numeric data ids are handed out by an [`IdAllocator`] passed into each
//! builder call, so two builds from the same description yield the same ids.

use serde::{Deserialize, Serialize};

use crate::device::{
    AntennaPosition, GeneratorModes, GeneratorSignal, SensorPortType, SensorProtocol,
    SignalTypes, SyncModes, SyncType, TrackType, TvgModes,
};
use crate::keys;
use crate::schema::{EnumValue, KeyDescriptor, Schema};

/// Sequential numeric id source, starting at 1
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u32,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first: u32) -> Self {
        Self { next: first }
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Generator capabilities of a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorDescription {
    pub modes: GeneratorModes,
    pub signals: SignalTypes,
    #[serde(default)]
    pub presets: Vec<String>,
    /// Longest pulse in seconds
    #[serde(default = "default_max_duration")]
    pub max_duration: f64,
}

fn default_max_duration() -> f64 {
    0.01
}

/// TVG capabilities of a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvgDescription {
    pub modes: TvgModes,
    #[serde(default = "default_min_gain")]
    pub min_gain: f64,
    #[serde(default = "default_max_gain")]
    pub max_gain: f64,
}

fn default_min_gain() -> f64 {
    -20.0
}

fn default_max_gain() -> f64 {
    80.0
}

/// One acoustic source (board side, frequency band)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescription {
    pub name: String,
    #[serde(default = "default_channels")]
    pub channels: u32,
    /// Centre frequency in Hz
    pub frequency: f64,
    /// Bandwidth in Hz
    pub bandwidth: f64,
    /// Longest receive window in seconds
    #[serde(default = "default_max_receive_time")]
    pub max_receive_time: f64,
    #[serde(default)]
    pub antenna: AntennaPosition,
    #[serde(default)]
    pub generator: Option<GeneratorDescription>,
    #[serde(default)]
    pub tvg: Option<TvgDescription>,
}

fn default_channels() -> u32 {
    1
}

fn default_max_receive_time() -> f64 {
    1.0
}

/// One sensor port (GPS, attitude, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDescription {
    pub name: String,
    pub port_type: SensorPortType,
    #[serde(default)]
    pub uart_devices: Vec<String>,
    #[serde(default)]
    pub uart_modes: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

/// Everything needed to lay out a device's key tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub model: String,
    #[serde(default)]
    pub serial: String,
    pub sync: SyncModes,
    /// Client liveness timeout in seconds
    #[serde(default = "default_alive_timeout")]
    pub alive_timeout: f64,
    #[serde(default)]
    pub sources: Vec<SourceDescription>,
    #[serde(default)]
    pub sensors: Vec<SensorDescription>,
}

fn default_alive_timeout() -> f64 {
    5.0
}

/// Incremental schema builder
pub struct SchemaBuilder {
    schema: Schema,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            schema: Schema::sonar(),
        }
    }

    /// Lay out a whole device
    pub fn from_description(desc: &DeviceDescription, ids: &mut IdAllocator) -> Schema {
        let mut builder = Self::new();
        builder.add_info(&desc.model, &desc.serial);
        builder.add_sonar(desc.sync, desc.alive_timeout);
        for sensor in &desc.sensors {
            builder.add_sensor(sensor, ids);
        }
        for source in &desc.sources {
            builder.add_source(source, ids);
        }
        builder.build()
    }

    pub fn add_info(&mut self, model: &str, serial: &str) -> &mut Self {
        self.schema.insert(keys::INFO_MODEL, KeyDescriptor::string(model).read_only());
        self.schema.insert(keys::INFO_SERIAL, KeyDescriptor::string(serial).read_only());
        self
    }

    /// Sync, start/stop/ping triggers and the liveness keys
    pub fn add_sonar(&mut self, sync: SyncModes, alive_timeout: f64) -> &mut Self {
        let s = &mut self.schema;
        s.insert(keys::SYNC_CAPABILITIES, KeyDescriptor::int(sync.bits() as i64).read_only());
        if !sync.is_empty() {
            let values: Vec<EnumValue> = SyncType::ALL
                .into_iter()
                .filter(|t| sync.contains(t.flag()))
                .map(|t| EnumValue::new(t.id(), t.name()))
                .collect();
            let default = values.first().map(|v| v.id).unwrap_or(0);
            s.insert(keys::SYNC_TYPE, KeyDescriptor::enumeration(default, values));
        }

        s.insert(keys::START_PROJECT, KeyDescriptor::string(""));
        s.insert(keys::START_TRACK, KeyDescriptor::string(""));
        s.insert(
            keys::START_TRACK_TYPE,
            KeyDescriptor::enumeration(
                TrackType::Survey.id(),
                TrackType::ALL
                    .into_iter()
                    .map(|t| EnumValue::new(t.id(), t.name()))
                    .collect(),
            ),
        );
        s.insert(keys::STOP, KeyDescriptor::bool(false));
        s.insert(keys::PING, KeyDescriptor::bool(false));
        s.insert(keys::ALIVE, KeyDescriptor::bool(false));
        s.insert(
            keys::ALIVE_TIMEOUT,
            KeyDescriptor::double(alive_timeout).read_only(),
        );
        self
    }

    pub fn add_sensor(&mut self, desc: &SensorDescription, ids: &mut IdAllocator) -> &mut Self {
        let port = desc.name.as_str();
        let s = &mut self.schema;

        s.insert(
            keys::sensor(port, "type"),
            KeyDescriptor::enumeration(desc.port_type.id(), port_type_values()).read_only(),
        );
        s.insert(keys::sensor(port, "id"), KeyDescriptor::int(ids.next_id() as i64).read_only());
        s.insert(keys::sensor(port, "enable"), KeyDescriptor::bool(false));
        for axis in AntennaPosition::FIELDS {
            s.insert(keys::sensor_position(port, axis), position_descriptor());
        }
        s.insert(keys::sensor(port, "channel"), KeyDescriptor::int(1).range(1.0, 5.0));
        s.insert(
            keys::sensor(port, "time-offset"),
            KeyDescriptor::double(0.0).range(-10.0, 10.0).describe("seconds"),
        );

        match desc.port_type {
            SensorPortType::Virtual => {}
            SensorPortType::Uart => {
                s.insert(keys::sensor(port, "protocol"), protocol_descriptor());
                s.insert(keys::sensor(port, "uart-device"), named_enum(&desc.uart_devices));
                s.insert(keys::sensor(port, "uart-mode"), named_enum(&desc.uart_modes));
            }
            SensorPortType::Udp => {
                s.insert(keys::sensor(port, "protocol"), protocol_descriptor());
                s.insert(keys::sensor(port, "ip-address"), named_enum(&desc.ip_addresses));
                s.insert(
                    keys::sensor(port, "udp-port"),
                    KeyDescriptor::int(10_000).range(1024.0, 65535.0),
                );
            }
        }
        self
    }

    pub fn add_source(&mut self, desc: &SourceDescription, ids: &mut IdAllocator) -> &mut Self {
        let src = desc.name.as_str();
        let s = &mut self.schema;

        for index in 1..=desc.channels {
            s.insert(
                keys::channel_id(src, index),
                KeyDescriptor::int(ids.next_id() as i64).read_only(),
            );
        }

        let antenna = desc.antenna.to_array();
        for (axis, value) in AntennaPosition::FIELDS.iter().zip(antenna) {
            let mut key = position_descriptor();
            key.default = value.into();
            s.insert(keys::antenna(src, axis), key);
        }
        s.insert(
            keys::antenna(src, "frequency"),
            KeyDescriptor::double(desc.frequency).read_only(),
        );
        s.insert(
            keys::antenna(src, "bandwidth"),
            KeyDescriptor::double(desc.bandwidth).read_only(),
        );
        s.insert(
            keys::receiver(src, "time"),
            KeyDescriptor::double(0.0).range(0.0, desc.max_receive_time),
        );

        if let Some(generator) = &desc.generator {
            Self::add_generator(s, src, generator);
        }
        if let Some(tvg) = &desc.tvg {
            Self::add_tvg(s, src, tvg);
        }
        self
    }

    // Every mode's field keys are laid out whenever the source has a
    // generator; the capability mask alone says which modes are usable.
    fn add_generator(s: &mut Schema, src: &str, desc: &GeneratorDescription) {
        s.insert(
            keys::generator(src, "capabilities"),
            KeyDescriptor::int(desc.modes.bits() as i64).read_only(),
        );
        s.insert(
            keys::generator(src, "signals"),
            KeyDescriptor::int(desc.signals.bits() as i64).read_only(),
        );

        s.insert(keys::generator(src, "preset/id"), named_enum(&desc.presets));

        let signals: Vec<EnumValue> = GeneratorSignal::ALL
            .into_iter()
            .filter(|sig| desc.signals.contains(sig.flag()))
            .map(|sig| EnumValue::new(sig.id(), sig.name()))
            .collect();
        let default_signal = signals.first().map(|v| v.id).unwrap_or(0);

        s.insert(
            keys::generator(src, "auto/signal"),
            KeyDescriptor::enumeration(default_signal, signals.clone()),
        );
        s.insert(
            keys::generator(src, "simple/signal"),
            KeyDescriptor::enumeration(default_signal, signals.clone()),
        );
        s.insert(
            keys::generator(src, "simple/power"),
            KeyDescriptor::double(100.0).range(0.0, 100.0),
        );
        s.insert(
            keys::generator(src, "extended/signal"),
            KeyDescriptor::enumeration(default_signal, signals),
        );
        s.insert(
            keys::generator(src, "extended/duration"),
            KeyDescriptor::double(desc.max_duration / 10.0).range(0.0, desc.max_duration),
        );
        s.insert(
            keys::generator(src, "extended/power"),
            KeyDescriptor::double(100.0).range(0.0, 100.0),
        );
        s.insert(keys::generator(src, "enable"), KeyDescriptor::bool(false));
    }

    fn add_tvg(s: &mut Schema, src: &str, desc: &TvgDescription) {
        let gain = || KeyDescriptor::double(0.0).range(desc.min_gain, desc.max_gain);

        s.insert(
            keys::tvg(src, "capabilities"),
            KeyDescriptor::int(desc.modes.bits() as i64).read_only(),
        );
        s.insert(keys::tvg(src, "auto/level"), KeyDescriptor::double(0.9).range(0.0, 1.0));
        s.insert(
            keys::tvg(src, "auto/sensitivity"),
            KeyDescriptor::double(0.6).range(0.0, 1.0),
        );
        s.insert(keys::tvg(src, "constant/gain"), gain());
        s.insert(keys::tvg(src, "linear-db/gain0"), gain());
        s.insert(
            keys::tvg(src, "linear-db/step"),
            KeyDescriptor::double(20.0).range(0.0, 100.0),
        );
        s.insert(keys::tvg(src, "logarithmic/gain0"), gain());
        s.insert(
            keys::tvg(src, "logarithmic/beta"),
            KeyDescriptor::double(20.0).range(0.0, 100.0),
        );
        s.insert(
            keys::tvg(src, "logarithmic/alpha"),
            KeyDescriptor::double(0.0).range(0.0, 1.0),
        );
        s.insert(keys::tvg(src, "enable"), KeyDescriptor::bool(false));
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

fn position_descriptor() -> KeyDescriptor {
    KeyDescriptor::double(0.0).range(-1000.0, 1000.0)
}

fn port_type_values() -> Vec<EnumValue> {
    SensorPortType::ALL
        .into_iter()
        .map(|t| EnumValue::new(t.id(), t.name()))
        .collect()
}

fn protocol_descriptor() -> KeyDescriptor {
    KeyDescriptor::enumeration(
        SensorProtocol::Nmea.id(),
        SensorProtocol::ALL
            .into_iter()
            .map(|p| EnumValue::new(p.id(), p.name()))
            .collect(),
    )
}

/// Enumeration of names with ids 1..=n
fn named_enum(names: &[String]) -> KeyDescriptor {
    let values: Vec<EnumValue> = names
        .iter()
        .enumerate()
        .map(|(i, name)| EnumValue::new(i as i64 + 1, name.clone()))
        .collect();
    let default = values.first().map(|v| v.id).unwrap_or(0);
    KeyDescriptor::enumeration(default, values)
}

/// A starboard/port side-scan with an NMEA GPS, used by tests and the simulator
pub fn sample_sidescan() -> DeviceDescription {
    let source = |name: &str, frequency: f64| SourceDescription {
        name: name.to_string(),
        channels: 1,
        frequency,
        bandwidth: 20_000.0,
        max_receive_time: 0.5,
        antenna: AntennaPosition::default(),
        generator: Some(GeneratorDescription {
            modes: GeneratorModes::PRESET | GeneratorModes::AUTO | GeneratorModes::SIMPLE,
            signals: SignalTypes::TONE | SignalTypes::LFM,
            presets: vec!["short".to_string(), "long".to_string()],
            max_duration: 0.01,
        }),
        tvg: Some(TvgDescription {
            modes: TvgModes::AUTO | TvgModes::CONSTANT | TvgModes::LINEAR_DB,
            min_gain: -20.0,
            max_gain: 80.0,
        }),
    };

    DeviceDescription {
        model: "sidescan-sim".to_string(),
        serial: "0001".to_string(),
        sync: SyncModes::SOFTWARE | SyncModes::INTERNAL,
        alive_timeout: 5.0,
        sources: vec![source("starboard", 100_000.0), source("port", 100_000.0)],
        sensors: vec![SensorDescription {
            name: "gps".to_string(),
            port_type: SensorPortType::Uart,
            uart_devices: vec!["ttyS0".to_string(), "ttyS1".to_string()],
            uart_modes: vec!["4800".to_string(), "9600".to_string(), "115200".to_string()],
            ip_addresses: Vec::new(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::ChannelBinding;
    use crate::value::ParamValue;

    #[test]
    fn test_ids_are_sequential_and_deterministic() {
        let desc = sample_sidescan();
        let a = SchemaBuilder::from_description(&desc, &mut IdAllocator::new());
        let b = SchemaBuilder::from_description(&desc, &mut IdAllocator::new());
        assert_eq!(a, b);

        // Sensors first, then sources in declaration order
        assert_eq!(a.default_i64(&keys::sensor("gps", "id")), Some(1));
        assert_eq!(a.default_i64(&keys::channel_id("starboard", 1)), Some(2));
        assert_eq!(a.default_i64(&keys::channel_id("port", 1)), Some(3));
    }

    #[test]
    fn test_allocator_is_explicit() {
        let mut ids = IdAllocator::starting_at(100);
        let schema = SchemaBuilder::from_description(&sample_sidescan(), &mut ids);
        assert_eq!(schema.default_i64(&keys::sensor("gps", "id")), Some(100));
        assert_eq!(ids.next_id(), 103);
    }

    #[test]
    fn test_all_generator_fields_present_regardless_of_modes() {
        let schema = SchemaBuilder::from_description(&sample_sidescan(), &mut IdAllocator::new());
        // EXTENDED is not in the mode mask, its keys are still laid out
        assert!(schema.contains(&keys::generator("port", "extended/duration")));
        assert_eq!(
            schema.default_i64(&keys::generator("port", "capabilities")),
            Some((GeneratorModes::PRESET | GeneratorModes::AUTO | GeneratorModes::SIMPLE).bits() as i64)
        );
    }

    #[test]
    fn test_uart_sensor_keys() {
        let schema = SchemaBuilder::from_description(&sample_sidescan(), &mut IdAllocator::new());
        let mode = schema.get(&keys::sensor("gps", "uart-mode")).unwrap();
        assert_eq!(mode.enum_id("9600"), Some(2));
        assert!(!schema.contains(&keys::sensor("gps", "udp-port")));
        assert_eq!(
            schema.get(&keys::sensor("gps", "type")).unwrap().default,
            ParamValue::Enum(SensorPortType::Uart.id())
        );
    }

    #[test]
    fn test_schema_is_sonar_and_bindable() {
        let schema = SchemaBuilder::from_description(&sample_sidescan(), &mut IdAllocator::new());
        assert!(schema.check_sonar().is_ok());
        assert_eq!(ChannelBinding::from_schema(&schema).len(), 3);
    }
}
