//! Per-capability sub-controllers of the facade

use std::sync::Arc;

use sonar_core::{
    keys, AntennaPosition, EnumValue, GeneratorModes, GeneratorSignal, SensorPortType,
    SensorProtocol, SignalTypes, SyncModes, SyncType, TrackType, TvgModes,
};

use crate::command::Command;
use crate::data::DataDemux;
use crate::error::ControlError;
use crate::facade::Link;

fn capability_bits(link: &Link, key: &str) -> u32 {
    link.schema
        .default_i64(key)
        .and_then(|bits| u32::try_from(bits).ok())
        .unwrap_or(0)
}

pub struct SensorControl {
    link: Link,
    demux: Arc<DataDemux>,
}

impl SensorControl {
    pub(crate) fn new(link: Link, demux: Arc<DataDemux>) -> Self {
        Self { link, demux }
    }

    pub fn ports(&self) -> Vec<String> {
        keys::sensor_names(self.link.schema.keys_with_prefix("/sensors/"))
    }

    pub fn port_type(&self, port: &str) -> Option<SensorPortType> {
        self.link
            .schema
            .get(&keys::sensor(port, "type"))
            .and_then(|d| d.default.as_enum())
            .and_then(SensorPortType::from_id)
    }

    pub fn set_virtual_port(&self, port: &str, channel: i64, time_offset: f64) -> Result<(), ControlError> {
        self.require(port, SensorPortType::Virtual)?;
        self.link.apply(&Command::SensorVirtual {
            port: port.to_string(),
            channel,
            time_offset,
        })
    }

    pub fn set_uart_port(
        &self,
        port: &str,
        channel: i64,
        time_offset: f64,
        protocol: SensorProtocol,
        device: i64,
        mode: i64,
    ) -> Result<(), ControlError> {
        self.require(port, SensorPortType::Uart)?;
        self.link.apply(&Command::SensorUart {
            port: port.to_string(),
            channel,
            time_offset,
            protocol,
            device,
            mode,
        })
    }

    pub fn set_udp_port(
        &self,
        port: &str,
        channel: i64,
        time_offset: f64,
        protocol: SensorProtocol,
        address: i64,
        udp_port: i64,
    ) -> Result<(), ControlError> {
        self.require(port, SensorPortType::Udp)?;
        self.link.apply(&Command::SensorUdp {
            port: port.to_string(),
            channel,
            time_offset,
            protocol,
            address,
            udp_port,
        })
    }

    /// Change channel and time offset, keeping the port's other settings
    pub fn set_timing(&self, port: &str, channel: i64, time_offset: f64) -> Result<(), ControlError> {
        let field = |name: &str| keys::sensor(port, name);
        match self.port_type(port) {
            Some(SensorPortType::Virtual) => self.set_virtual_port(port, channel, time_offset),
            Some(SensorPortType::Uart) => {
                let (protocol, device, mode) = (field("protocol"), field("uart-device"), field("uart-mode"));
                let current = self.link.read(&[protocol.as_str(), device.as_str(), mode.as_str()])?;
                self.set_uart_port(
                    port,
                    channel,
                    time_offset,
                    current
                        .get_enum(&protocol)
                        .and_then(SensorProtocol::from_id)
                        .unwrap_or(SensorProtocol::Nmea),
                    current.get_enum(&device).unwrap_or_default(),
                    current.get_enum(&mode).unwrap_or_default(),
                )
            }
            Some(SensorPortType::Udp) => {
                let (protocol, address, udp_port) = (field("protocol"), field("ip-address"), field("udp-port"));
                let current = self.link.read(&[protocol.as_str(), address.as_str(), udp_port.as_str()])?;
                self.set_udp_port(
                    port,
                    channel,
                    time_offset,
                    current
                        .get_enum(&protocol)
                        .and_then(SensorProtocol::from_id)
                        .unwrap_or(SensorProtocol::Nmea),
                    current.get_enum(&address).unwrap_or_default(),
                    current.get_i64(&udp_port).unwrap_or_default(),
                )
            }
            None => Err(ControlError::UnknownSource(port.to_string())),
        }
    }

    pub fn set_position(&self, port: &str, position: AntennaPosition) -> Result<(), ControlError> {
        self.known(port)?;
        self.link.apply(&Command::SensorPosition {
            port: port.to_string(),
            position,
        })?;
        self.demux.set_geometry(port, position);
        Ok(())
    }

    pub fn set_enable(&self, port: &str, enable: bool) -> Result<(), ControlError> {
        self.known(port)?;
        self.link.apply(&Command::SensorEnable {
            port: port.to_string(),
            enable,
        })
    }

    fn known(&self, port: &str) -> Result<SensorPortType, ControlError> {
        self.port_type(port)
            .ok_or_else(|| ControlError::UnknownSource(port.to_string()))
    }

    fn require(&self, port: &str, expected: SensorPortType) -> Result<(), ControlError> {
        if self.known(port)? != expected {
            return Err(ControlError::Unsupported("sensor port type"));
        }
        Ok(())
    }
}

pub struct GeneratorControl {
    link: Link,
}

impl GeneratorControl {
    pub(crate) fn new(link: Link) -> Self {
        Self { link }
    }

    pub fn capabilities(&self, source: &str) -> GeneratorModes {
        GeneratorModes::from_bits_truncate(capability_bits(
            &self.link,
            &keys::generator(source, "capabilities"),
        ))
    }

    pub fn signals(&self, source: &str) -> SignalTypes {
        SignalTypes::from_bits_truncate(capability_bits(
            &self.link,
            &keys::generator(source, "signals"),
        ))
    }

    pub fn presets(&self, source: &str) -> Vec<EnumValue> {
        self.link
            .schema
            .get(&keys::generator(source, "preset/id"))
            .map(|d| d.enum_values.clone())
            .unwrap_or_default()
    }

    pub fn set_preset(&self, source: &str, preset: i64) -> Result<(), ControlError> {
        self.require(source, GeneratorModes::PRESET, "generator preset mode")?;
        if !self.presets(source).iter().any(|p| p.id == preset) {
            return Err(ControlError::UnknownPreset {
                device: source.to_string(),
                preset,
            });
        }
        self.reconfigure(&Command::GeneratorPreset {
            source: source.to_string(),
            preset,
        })
    }

    pub fn set_auto(&self, source: &str, signal: GeneratorSignal) -> Result<(), ControlError> {
        self.require(source, GeneratorModes::AUTO, "generator auto mode")?;
        self.require_signal(source, signal)?;
        self.reconfigure(&Command::GeneratorAuto {
            source: source.to_string(),
            signal,
        })
    }

    pub fn set_simple(&self, source: &str, signal: GeneratorSignal, power: f64) -> Result<(), ControlError> {
        self.require(source, GeneratorModes::SIMPLE, "generator simple mode")?;
        self.require_signal(source, signal)?;
        self.reconfigure(&Command::GeneratorSimple {
            source: source.to_string(),
            signal,
            power,
        })
    }

    /// Duration in seconds, power in percent
    pub fn set_extended(
        &self,
        source: &str,
        signal: GeneratorSignal,
        duration: f64,
        power: f64,
    ) -> Result<(), ControlError> {
        self.require(source, GeneratorModes::EXTENDED, "generator extended mode")?;
        self.require_signal(source, signal)?;
        self.reconfigure(&Command::GeneratorExtended {
            source: source.to_string(),
            signal,
            duration,
            power,
        })
    }

    pub fn set_enable(&self, source: &str, enable: bool) -> Result<(), ControlError> {
        if self.capabilities(source).is_empty() {
            return Err(ControlError::UnknownSource(source.to_string()));
        }
        self.link.apply(&Command::GeneratorEnable {
            source: source.to_string(),
            enable,
        })
    }

    fn reconfigure(&self, command: &Command) -> Result<(), ControlError> {
        let enable_key = keys::generator(command.device(), "enable");
        self.link.reconfigure(&enable_key, command)
    }

    fn require(&self, source: &str, mode: GeneratorModes, what: &'static str) -> Result<(), ControlError> {
        let caps = self.capabilities(source);
        if caps.is_empty() {
            return Err(ControlError::UnknownSource(source.to_string()));
        }
        if !caps.contains(mode) {
            return Err(ControlError::Unsupported(what));
        }
        Ok(())
    }

    fn require_signal(&self, source: &str, signal: GeneratorSignal) -> Result<(), ControlError> {
        if !self.signals(source).contains(signal.flag()) {
            return Err(ControlError::Unsupported("generator signal"));
        }
        Ok(())
    }
}

pub struct TvgControl {
    link: Link,
}

impl TvgControl {
    pub(crate) fn new(link: Link) -> Self {
        Self { link }
    }

    pub fn capabilities(&self, source: &str) -> TvgModes {
        TvgModes::from_bits_truncate(capability_bits(&self.link, &keys::tvg(source, "capabilities")))
    }

    /// Automatic gain; level and sensitivity in 0..=1
    pub fn set_auto(&self, source: &str, level: f64, sensitivity: f64) -> Result<(), ControlError> {
        self.require(source, TvgModes::AUTO, "tvg auto mode")?;
        self.reconfigure(&Command::TvgAuto {
            source: source.to_string(),
            level,
            sensitivity,
        })
    }

    /// Constant gain in dB
    pub fn set_constant(&self, source: &str, gain: f64) -> Result<(), ControlError> {
        self.require(source, TvgModes::CONSTANT, "tvg constant mode")?;
        self.reconfigure(&Command::TvgConstant {
            source: source.to_string(),
            gain,
        })
    }

    /// Initial gain in dB plus a gain step in dB per 100 m
    pub fn set_linear_db(&self, source: &str, gain0: f64, step: f64) -> Result<(), ControlError> {
        self.require(source, TvgModes::LINEAR_DB, "tvg linear-db mode")?;
        self.reconfigure(&Command::TvgLinearDb {
            source: source.to_string(),
            gain0,
            step,
        })
    }

    /// `gain0 + beta * log10(r) + alpha * r`
    pub fn set_logarithmic(&self, source: &str, gain0: f64, beta: f64, alpha: f64) -> Result<(), ControlError> {
        self.require(source, TvgModes::LOGARITHMIC, "tvg logarithmic mode")?;
        self.reconfigure(&Command::TvgLogarithmic {
            source: source.to_string(),
            gain0,
            beta,
            alpha,
        })
    }

    pub fn set_enable(&self, source: &str, enable: bool) -> Result<(), ControlError> {
        if self.capabilities(source).is_empty() {
            return Err(ControlError::UnknownSource(source.to_string()));
        }
        self.link.apply(&Command::TvgEnable {
            source: source.to_string(),
            enable,
        })
    }

    fn reconfigure(&self, command: &Command) -> Result<(), ControlError> {
        let enable_key = keys::tvg(command.device(), "enable");
        self.link.reconfigure(&enable_key, command)
    }

    fn require(&self, source: &str, mode: TvgModes, what: &'static str) -> Result<(), ControlError> {
        let caps = self.capabilities(source);
        if caps.is_empty() {
            return Err(ControlError::UnknownSource(source.to_string()));
        }
        if !caps.contains(mode) {
            return Err(ControlError::Unsupported(what));
        }
        Ok(())
    }
}

pub struct SonarControl {
    link: Link,
    demux: Arc<DataDemux>,
}

impl SonarControl {
    pub(crate) fn new(link: Link, demux: Arc<DataDemux>) -> Self {
        Self { link, demux }
    }

    pub fn sync_capabilities(&self) -> SyncModes {
        SyncModes::from_bits_truncate(capability_bits(&self.link, keys::SYNC_CAPABILITIES))
    }

    pub fn set_sync_type(&self, sync: SyncType) -> Result<(), ControlError> {
        if !self.sync_capabilities().contains(sync.flag()) {
            return Err(ControlError::Unsupported("sync type"));
        }
        self.link.apply(&Command::SonarSyncType { sync })
    }

    pub fn set_position(&self, source: &str, position: AntennaPosition) -> Result<(), ControlError> {
        self.known(source)?;
        self.link.apply(&Command::SonarPosition {
            source: source.to_string(),
            position,
        })?;
        self.demux.set_geometry(source, position);
        Ok(())
    }

    /// Receive window in seconds, 0 for automatic
    pub fn set_receive_time(&self, source: &str, time: f64) -> Result<(), ControlError> {
        self.known(source)?;
        self.link.apply(&Command::SonarReceiveTime {
            source: source.to_string(),
            time,
        })
    }

    pub fn start(&self, project: &str, track: &str, track_type: TrackType) -> Result<(), ControlError> {
        self.link.apply(&Command::SonarStart {
            project: project.to_string(),
            track: track.to_string(),
            track_type,
        })
    }

    pub fn stop(&self) -> Result<(), ControlError> {
        self.link.apply(&Command::SonarStop)
    }

    /// Software-synchronised single ping
    pub fn ping(&self) -> Result<(), ControlError> {
        self.link.apply(&Command::SonarPing)
    }

    fn known(&self, source: &str) -> Result<(), ControlError> {
        if !self.link.schema.contains(&keys::receiver(source, "time")) {
            return Err(ControlError::UnknownSource(source.to_string()));
        }
        Ok(())
    }
}
