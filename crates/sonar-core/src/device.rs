//! Sonar device domain types: capabilities, signals, sync modes, geometry

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Generator modes a source supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct GeneratorModes: u32 {
        const PRESET = 1 << 0;
        const AUTO = 1 << 1;
        const SIMPLE = 1 << 2;
        const EXTENDED = 1 << 3;
    }
}

bitflags! {
    /// Signal shapes a generator can emit
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SignalTypes: u32 {
        const TONE = 1 << 0;
        const LFM = 1 << 1;
        const LFMD = 1 << 2;
    }
}

bitflags! {
    /// Time-varied-gain modes a source supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TvgModes: u32 {
        const AUTO = 1 << 0;
        const CONSTANT = 1 << 1;
        const LINEAR_DB = 1 << 2;
        const LOGARITHMIC = 1 << 3;
    }
}

bitflags! {
    /// Ping synchronisation modes of the sonar
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SyncModes: u32 {
        const SOFTWARE = 1 << 0;
        const INTERNAL = 1 << 1;
        const EXTERNAL = 1 << 2;
    }
}

/// Generator signal shape, stored as an enum id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorSignal {
    Tone,
    Lfm,
    Lfmd,
}

impl GeneratorSignal {
    pub const ALL: [GeneratorSignal; 3] = [Self::Tone, Self::Lfm, Self::Lfmd];

    pub fn id(self) -> i64 {
        match self {
            Self::Tone => 1,
            Self::Lfm => 2,
            Self::Lfmd => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Tone => "tone",
            Self::Lfm => "lfm",
            Self::Lfmd => "lfmd",
        }
    }

    /// Capability bit matching this signal
    pub fn flag(self) -> SignalTypes {
        match self {
            Self::Tone => SignalTypes::TONE,
            Self::Lfm => SignalTypes::LFM,
            Self::Lfmd => SignalTypes::LFMD,
        }
    }
}

/// Ping synchronisation source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Software,
    Internal,
    External,
}

impl SyncType {
    pub const ALL: [SyncType; 3] = [Self::Software, Self::Internal, Self::External];

    pub fn id(self) -> i64 {
        self.flag().bits() as i64
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Internal => "internal",
            Self::External => "external",
        }
    }

    pub fn flag(self) -> SyncModes {
        match self {
            Self::Software => SyncModes::SOFTWARE,
            Self::Internal => SyncModes::INTERNAL,
            Self::External => SyncModes::EXTERNAL,
        }
    }
}

/// Physical kind of a sensor port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorPortType {
    Virtual,
    Uart,
    Udp,
}

impl SensorPortType {
    pub const ALL: [SensorPortType; 3] = [Self::Virtual, Self::Uart, Self::Udp];

    pub fn id(self) -> i64 {
        match self {
            Self::Virtual => 1,
            Self::Uart => 2,
            Self::Udp => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Virtual => "virtual",
            Self::Uart => "uart",
            Self::Udp => "udp",
        }
    }
}

/// Data protocol spoken on a sensor port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorProtocol {
    Nmea,
    Sas,
}

impl SensorProtocol {
    pub const ALL: [SensorProtocol; 2] = [Self::Nmea, Self::Sas];

    pub fn id(self) -> i64 {
        match self {
            Self::Nmea => 1,
            Self::Sas => 2,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nmea => "nmea",
            Self::Sas => "sas",
        }
    }
}

/// Kind of track recorded between `start` and `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Survey,
    Tack,
    Calibration,
}

impl TrackType {
    pub const ALL: [TrackType; 3] = [Self::Survey, Self::Tack, Self::Calibration];

    pub fn id(self) -> i64 {
        match self {
            Self::Survey => 1,
            Self::Tack => 2,
            Self::Calibration => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Survey => "survey",
            Self::Tack => "tack",
            Self::Calibration => "calibration",
        }
    }
}

/// Antenna or sensor mounting position relative to the vessel origin
///
/// Offsets are in metres, angles in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AntennaPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub psi: f64,
    pub gamma: f64,
    pub theta: f64,
}

impl AntennaPosition {
    /// Field names in key order
    pub const FIELDS: [&'static str; 6] = ["x", "y", "z", "psi", "gamma", "theta"];

    pub fn to_array(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.psi, self.gamma, self.theta]
    }

    pub fn from_array(v: [f64; 6]) -> Self {
        Self {
            x: v[0],
            y: v[1],
            z: v[2],
            psi: v[3],
            gamma: v[4],
            theta: v[5],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_type_ids_follow_capability_bits() {
        for sync in SyncType::ALL {
            assert_eq!(sync.id(), sync.flag().bits() as i64);
            assert_eq!(SyncType::from_id(sync.id()), Some(sync));
        }
    }

    #[test]
    fn test_signal_round_trip() {
        assert_eq!(GeneratorSignal::from_id(2), Some(GeneratorSignal::Lfm));
        assert_eq!(GeneratorSignal::from_id(0), None);
    }

    #[test]
    fn test_position_array_order() {
        let pos = AntennaPosition::from_array([1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
        assert_eq!(pos.y, 2.0);
        assert_eq!(pos.theta, 0.3);
        assert_eq!(pos.to_array()[3], 0.1);
    }
}
