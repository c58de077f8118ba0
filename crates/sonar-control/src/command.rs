//! Typed commands and the key groups they are bound to
//!
//! Every [`OperationKind`] names a fixed set of fields under a device
//! prefix. A [`Command`] is one fully-typed invocation of such an operation;
//! it converts to and from the `(key, value)` batch written to the store.

use serde::{Deserialize, Serialize};
use sonar_core::{
    keys, AntennaPosition, GeneratorSignal, ParamList, ParamValue, SensorProtocol, SyncType,
    TrackType,
};

/// Device name of the sonar-wide operations (sync, start, stop, ping)
pub const SONAR_DEVICE: &str = "sonar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    SensorVirtual,
    SensorUart,
    SensorUdp,
    SensorPosition,
    SensorEnable,
    GeneratorPreset,
    GeneratorAuto,
    GeneratorSimple,
    GeneratorExtended,
    GeneratorEnable,
    TvgAuto,
    TvgConstant,
    TvgLinearDb,
    TvgLogarithmic,
    TvgEnable,
    SonarSyncType,
    SonarPosition,
    SonarReceiveTime,
    SonarStart,
    SonarStop,
    SonarPing,
}

impl OperationKind {
    /// Field names, relative to the device prefix
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Self::SensorVirtual => &["channel", "time-offset"],
            Self::SensorUart => &["channel", "time-offset", "protocol", "uart-device", "uart-mode"],
            Self::SensorUdp => &["channel", "time-offset", "protocol", "ip-address", "udp-port"],
            Self::SensorPosition | Self::SonarPosition => &AntennaPosition::FIELDS,
            Self::SensorEnable | Self::GeneratorEnable | Self::TvgEnable => &["enable"],
            Self::GeneratorPreset => &["preset/id"],
            Self::GeneratorAuto => &["auto/signal"],
            Self::GeneratorSimple => &["simple/signal", "simple/power"],
            Self::GeneratorExtended => &["extended/signal", "extended/duration", "extended/power"],
            Self::TvgAuto => &["auto/level", "auto/sensitivity"],
            Self::TvgConstant => &["constant/gain"],
            Self::TvgLinearDb => &["linear-db/gain0", "linear-db/step"],
            Self::TvgLogarithmic => &["logarithmic/gain0", "logarithmic/beta", "logarithmic/alpha"],
            Self::SonarSyncType => &["type"],
            Self::SonarReceiveTime => &["time"],
            Self::SonarStart => &["project", "track", "track-type"],
            Self::SonarStop => &["stop"],
            Self::SonarPing => &["ping"],
        }
    }

    /// Full key of one field of this operation on `device`
    pub fn key(self, device: &str, field: &str) -> String {
        match self {
            Self::SensorVirtual | Self::SensorUart | Self::SensorUdp | Self::SensorEnable => {
                keys::sensor(device, field)
            }
            Self::SensorPosition => keys::sensor_position(device, field),
            Self::GeneratorPreset
            | Self::GeneratorAuto
            | Self::GeneratorSimple
            | Self::GeneratorExtended
            | Self::GeneratorEnable => keys::generator(device, field),
            Self::TvgAuto
            | Self::TvgConstant
            | Self::TvgLinearDb
            | Self::TvgLogarithmic
            | Self::TvgEnable => keys::tvg(device, field),
            Self::SonarPosition => keys::antenna(device, field),
            Self::SonarReceiveTime => keys::receiver(device, field),
            Self::SonarSyncType => format!("/sonar/sync/{}", field),
            Self::SonarStart => format!("/sonar/control/start/{}", field),
            Self::SonarStop | Self::SonarPing => format!("/sonar/control/{}", field),
        }
    }

    pub fn keys(self, device: &str) -> Vec<String> {
        self.fields().iter().map(|f| self.key(device, f)).collect()
    }
}

/// One typed device command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SensorVirtual {
        port: String,
        channel: i64,
        time_offset: f64,
    },
    SensorUart {
        port: String,
        channel: i64,
        time_offset: f64,
        protocol: SensorProtocol,
        device: i64,
        mode: i64,
    },
    SensorUdp {
        port: String,
        channel: i64,
        time_offset: f64,
        protocol: SensorProtocol,
        address: i64,
        udp_port: i64,
    },
    SensorPosition {
        port: String,
        position: AntennaPosition,
    },
    SensorEnable {
        port: String,
        enable: bool,
    },
    GeneratorPreset {
        source: String,
        preset: i64,
    },
    GeneratorAuto {
        source: String,
        signal: GeneratorSignal,
    },
    GeneratorSimple {
        source: String,
        signal: GeneratorSignal,
        power: f64,
    },
    GeneratorExtended {
        source: String,
        signal: GeneratorSignal,
        duration: f64,
        power: f64,
    },
    GeneratorEnable {
        source: String,
        enable: bool,
    },
    TvgAuto {
        source: String,
        level: f64,
        sensitivity: f64,
    },
    TvgConstant {
        source: String,
        gain: f64,
    },
    TvgLinearDb {
        source: String,
        gain0: f64,
        step: f64,
    },
    TvgLogarithmic {
        source: String,
        gain0: f64,
        beta: f64,
        alpha: f64,
    },
    TvgEnable {
        source: String,
        enable: bool,
    },
    SonarSyncType {
        sync: SyncType,
    },
    SonarPosition {
        source: String,
        position: AntennaPosition,
    },
    SonarReceiveTime {
        source: String,
        time: f64,
    },
    SonarStart {
        project: String,
        track: String,
        track_type: TrackType,
    },
    SonarStop,
    SonarPing,
}

impl Command {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::SensorVirtual { .. } => OperationKind::SensorVirtual,
            Self::SensorUart { .. } => OperationKind::SensorUart,
            Self::SensorUdp { .. } => OperationKind::SensorUdp,
            Self::SensorPosition { .. } => OperationKind::SensorPosition,
            Self::SensorEnable { .. } => OperationKind::SensorEnable,
            Self::GeneratorPreset { .. } => OperationKind::GeneratorPreset,
            Self::GeneratorAuto { .. } => OperationKind::GeneratorAuto,
            Self::GeneratorSimple { .. } => OperationKind::GeneratorSimple,
            Self::GeneratorExtended { .. } => OperationKind::GeneratorExtended,
            Self::GeneratorEnable { .. } => OperationKind::GeneratorEnable,
            Self::TvgAuto { .. } => OperationKind::TvgAuto,
            Self::TvgConstant { .. } => OperationKind::TvgConstant,
            Self::TvgLinearDb { .. } => OperationKind::TvgLinearDb,
            Self::TvgLogarithmic { .. } => OperationKind::TvgLogarithmic,
            Self::TvgEnable { .. } => OperationKind::TvgEnable,
            Self::SonarSyncType { .. } => OperationKind::SonarSyncType,
            Self::SonarPosition { .. } => OperationKind::SonarPosition,
            Self::SonarReceiveTime { .. } => OperationKind::SonarReceiveTime,
            Self::SonarStart { .. } => OperationKind::SonarStart,
            Self::SonarStop => OperationKind::SonarStop,
            Self::SonarPing => OperationKind::SonarPing,
        }
    }

    /// Sensor port or source name, [`SONAR_DEVICE`] for sonar-wide commands
    pub fn device(&self) -> &str {
        match self {
            Self::SensorVirtual { port, .. }
            | Self::SensorUart { port, .. }
            | Self::SensorUdp { port, .. }
            | Self::SensorPosition { port, .. }
            | Self::SensorEnable { port, .. } => port,
            Self::GeneratorPreset { source, .. }
            | Self::GeneratorAuto { source, .. }
            | Self::GeneratorSimple { source, .. }
            | Self::GeneratorExtended { source, .. }
            | Self::GeneratorEnable { source, .. }
            | Self::TvgAuto { source, .. }
            | Self::TvgConstant { source, .. }
            | Self::TvgLinearDb { source, .. }
            | Self::TvgLogarithmic { source, .. }
            | Self::TvgEnable { source, .. }
            | Self::SonarPosition { source, .. }
            | Self::SonarReceiveTime { source, .. } => source,
            Self::SonarSyncType { .. }
            | Self::SonarStart { .. }
            | Self::SonarStop
            | Self::SonarPing => SONAR_DEVICE,
        }
    }

    /// The `(key, value)` batch that carries this command
    pub fn to_params(&self) -> ParamList {
        let values: Vec<ParamValue> = match self {
            Self::SensorVirtual {
                channel,
                time_offset,
                ..
            } => vec![(*channel).into(), (*time_offset).into()],
            Self::SensorUart {
                channel,
                time_offset,
                protocol,
                device,
                mode,
                ..
            } => vec![
                (*channel).into(),
                (*time_offset).into(),
                ParamValue::Enum(protocol.id()),
                ParamValue::Enum(*device),
                ParamValue::Enum(*mode),
            ],
            Self::SensorUdp {
                channel,
                time_offset,
                protocol,
                address,
                udp_port,
                ..
            } => vec![
                (*channel).into(),
                (*time_offset).into(),
                ParamValue::Enum(protocol.id()),
                ParamValue::Enum(*address),
                (*udp_port).into(),
            ],
            Self::SensorPosition { position, .. } | Self::SonarPosition { position, .. } => {
                position.to_array().into_iter().map(ParamValue::from).collect()
            }
            Self::SensorEnable { enable, .. }
            | Self::GeneratorEnable { enable, .. }
            | Self::TvgEnable { enable, .. } => vec![(*enable).into()],
            Self::GeneratorPreset { preset, .. } => vec![ParamValue::Enum(*preset)],
            Self::GeneratorAuto { signal, .. } => vec![ParamValue::Enum(signal.id())],
            Self::GeneratorSimple { signal, power, .. } => {
                vec![ParamValue::Enum(signal.id()), (*power).into()]
            }
            Self::GeneratorExtended {
                signal,
                duration,
                power,
                ..
            } => vec![
                ParamValue::Enum(signal.id()),
                (*duration).into(),
                (*power).into(),
            ],
            Self::TvgAuto {
                level, sensitivity, ..
            } => vec![(*level).into(), (*sensitivity).into()],
            Self::TvgConstant { gain, .. } => vec![(*gain).into()],
            Self::TvgLinearDb { gain0, step, .. } => vec![(*gain0).into(), (*step).into()],
            Self::TvgLogarithmic {
                gain0, beta, alpha, ..
            } => vec![(*gain0).into(), (*beta).into(), (*alpha).into()],
            Self::SonarSyncType { sync } => vec![ParamValue::Enum(sync.id())],
            Self::SonarReceiveTime { time, .. } => vec![(*time).into()],
            Self::SonarStart {
                project,
                track,
                track_type,
            } => vec![
                project.as_str().into(),
                track.as_str().into(),
                ParamValue::Enum(track_type.id()),
            ],
            Self::SonarStop | Self::SonarPing => vec![true.into()],
        };

        let kind = self.kind();
        kind.keys(self.device()).into_iter().zip(values).collect()
    }

    /// Extract a command of `kind` on `device` from a batch
    ///
    /// Every field must be present under its exact key with its declared
    /// type; `None` otherwise.
    pub fn parse(kind: OperationKind, device: &str, params: &ParamList) -> Option<Self> {
        let f = Fields {
            kind,
            device,
            params,
        };
        let name = device.to_string();

        let command = match kind {
            OperationKind::SensorVirtual => Self::SensorVirtual {
                port: name,
                channel: f.int("channel")?,
                time_offset: f.double("time-offset")?,
            },
            OperationKind::SensorUart => Self::SensorUart {
                port: name,
                channel: f.int("channel")?,
                time_offset: f.double("time-offset")?,
                protocol: SensorProtocol::from_id(f.enumeration("protocol")?)?,
                device: f.enumeration("uart-device")?,
                mode: f.enumeration("uart-mode")?,
            },
            OperationKind::SensorUdp => Self::SensorUdp {
                port: name,
                channel: f.int("channel")?,
                time_offset: f.double("time-offset")?,
                protocol: SensorProtocol::from_id(f.enumeration("protocol")?)?,
                address: f.enumeration("ip-address")?,
                udp_port: f.int("udp-port")?,
            },
            OperationKind::SensorPosition => Self::SensorPosition {
                port: name,
                position: f.position()?,
            },
            OperationKind::SensorEnable => Self::SensorEnable {
                port: name,
                enable: f.boolean("enable")?,
            },
            OperationKind::GeneratorPreset => Self::GeneratorPreset {
                source: name,
                preset: f.enumeration("preset/id")?,
            },
            OperationKind::GeneratorAuto => Self::GeneratorAuto {
                source: name,
                signal: f.signal("auto/signal")?,
            },
            OperationKind::GeneratorSimple => Self::GeneratorSimple {
                source: name,
                signal: f.signal("simple/signal")?,
                power: f.double("simple/power")?,
            },
            OperationKind::GeneratorExtended => Self::GeneratorExtended {
                source: name,
                signal: f.signal("extended/signal")?,
                duration: f.double("extended/duration")?,
                power: f.double("extended/power")?,
            },
            OperationKind::GeneratorEnable => Self::GeneratorEnable {
                source: name,
                enable: f.boolean("enable")?,
            },
            OperationKind::TvgAuto => Self::TvgAuto {
                source: name,
                level: f.double("auto/level")?,
                sensitivity: f.double("auto/sensitivity")?,
            },
            OperationKind::TvgConstant => Self::TvgConstant {
                source: name,
                gain: f.double("constant/gain")?,
            },
            OperationKind::TvgLinearDb => Self::TvgLinearDb {
                source: name,
                gain0: f.double("linear-db/gain0")?,
                step: f.double("linear-db/step")?,
            },
            OperationKind::TvgLogarithmic => Self::TvgLogarithmic {
                source: name,
                gain0: f.double("logarithmic/gain0")?,
                beta: f.double("logarithmic/beta")?,
                alpha: f.double("logarithmic/alpha")?,
            },
            OperationKind::TvgEnable => Self::TvgEnable {
                source: name,
                enable: f.boolean("enable")?,
            },
            OperationKind::SonarSyncType => Self::SonarSyncType {
                sync: SyncType::from_id(f.enumeration("type")?)?,
            },
            OperationKind::SonarPosition => Self::SonarPosition {
                source: name,
                position: f.position()?,
            },
            OperationKind::SonarReceiveTime => Self::SonarReceiveTime {
                source: name,
                time: f.double("time")?,
            },
            OperationKind::SonarStart => Self::SonarStart {
                project: f.string("project")?,
                track: f.string("track")?,
                track_type: TrackType::from_id(f.enumeration("track-type")?)?,
            },
            OperationKind::SonarStop => {
                f.boolean("stop")?;
                Self::SonarStop
            }
            OperationKind::SonarPing => {
                f.boolean("ping")?;
                Self::SonarPing
            }
        };
        Some(command)
    }
}

/// Typed field lookup for one operation instance
struct Fields<'a> {
    kind: OperationKind,
    device: &'a str,
    params: &'a ParamList,
}

impl Fields<'_> {
    fn key(&self, field: &str) -> String {
        self.kind.key(self.device, field)
    }

    fn boolean(&self, field: &str) -> Option<bool> {
        self.params.get_bool(&self.key(field))
    }

    fn int(&self, field: &str) -> Option<i64> {
        self.params.get_i64(&self.key(field))
    }

    fn double(&self, field: &str) -> Option<f64> {
        self.params.get_f64(&self.key(field))
    }

    fn string(&self, field: &str) -> Option<String> {
        self.params.get_str(&self.key(field)).map(str::to_string)
    }

    fn enumeration(&self, field: &str) -> Option<i64> {
        self.params.get_enum(&self.key(field))
    }

    fn signal(&self, field: &str) -> Option<GeneratorSignal> {
        GeneratorSignal::from_id(self.enumeration(field)?)
    }

    fn position(&self) -> Option<AntennaPosition> {
        let mut values = [0.0; 6];
        for (value, axis) in values.iter_mut().zip(AntennaPosition::FIELDS) {
            *value = self.double(axis)?;
        }
        Some(AntennaPosition::from_array(values))
    }
}
