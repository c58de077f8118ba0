//! Client-side typed control over a parameter store
//!
//! Every mutation writes one command batch, reads the same keys back and
//! compares them within a per-field tolerance. Generator and TVG mode
//! changes run as disable, configure, re-enable under the facade lock.

use std::sync::Arc;

use parking_lot::Mutex;
use sonar_core::{
    keys, ChannelBinding, GeneratorModes, ListenerId, ParamList, ParamValue, ParameterStore,
    Schema, SchemaError, TvgModes,
};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::controls::{GeneratorControl, SensorControl, SonarControl, TvgControl};
use crate::data::{DataDemux, DataHandler, HandlerId};
use crate::error::ControlError;

/// Accepted deviation between a written and a read-back value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    Exact,
    Absolute(f64),
    /// Fraction of the requested magnitude
    Relative(f64),
}

impl Tolerance {
    /// Tolerance by field name: gains and powers 1 %, times 1 µs, frequencies 1 Hz
    pub fn for_key(key: &str) -> Self {
        let field = key.rsplit('/').next().unwrap_or(key);
        match field {
            "gain" | "gain0" | "power" => Self::Relative(0.01),
            "duration" | "time" | "time-offset" => Self::Absolute(1e-6),
            "frequency" | "bandwidth" => Self::Absolute(1.0),
            _ => Self::Absolute(1e-6),
        }
    }

    pub fn accepts(self, requested: &ParamValue, actual: &ParamValue) -> bool {
        match (requested, actual) {
            (ParamValue::Double(r), ParamValue::Double(a)) => match self {
                Self::Exact => r == a,
                Self::Absolute(tol) => (r - a).abs() <= tol,
                Self::Relative(tol) => (r - a).abs() <= tol * r.abs(),
            },
            _ => requested == actual,
        }
    }
}

/// Store access shared by the facade and its sub-controllers
#[derive(Clone)]
pub(crate) struct Link {
    pub(crate) store: Arc<dyn ParameterStore>,
    pub(crate) schema: Arc<Schema>,
    lock: Arc<Mutex<()>>,
}

impl Link {
    /// Set a batch, then read it back and verify
    fn write(&self, params: &ParamList) -> Result<(), ControlError> {
        self.store.set(params).map_err(|e| {
            debug!(error = %e, "Store refused command batch");
            e
        })?;

        let keys: Vec<&str> = params.keys().collect();
        let actual = self.store.get(&keys)?;
        for (key, requested) in params.iter() {
            let matches = actual
                .get(key)
                .is_some_and(|value| Tolerance::for_key(key).accepts(requested, value));
            if !matches {
                warn!(key = key, requested = %requested, actual = ?actual.get(key), "Read-back mismatch");
                return Err(ControlError::VerifyFailed {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    fn read_bool(&self, key: &str) -> Result<bool, ControlError> {
        let values = self.store.get(&[key])?;
        Ok(values.get_bool(key).unwrap_or(false))
    }

    /// Write one command under the facade lock
    pub(crate) fn apply(&self, command: &Command) -> Result<(), ControlError> {
        let _guard = self.lock.lock();
        self.write(&command.to_params())
    }

    /// Disable `enable_key` if set, write the command, then re-enable
    pub(crate) fn reconfigure(&self, enable_key: &str, command: &Command) -> Result<(), ControlError> {
        let _guard = self.lock.lock();

        let enabled = self.read_bool(enable_key)?;
        if enabled {
            self.write(&ParamList::new().with(enable_key, false))?;
        }
        let configured = self.write(&command.to_params());
        let restored = if enabled {
            self.write(&ParamList::new().with(enable_key, true))
        } else {
            Ok(())
        };
        configured.and(restored)
    }

    pub(crate) fn read(&self, keys: &[&str]) -> Result<ParamList, ControlError> {
        Ok(self.store.get(keys)?)
    }
}

pub struct ControlFacade {
    link: Link,
    sensor: Option<SensorControl>,
    generator: Option<GeneratorControl>,
    tvg: Option<TvgControl>,
    sonar: Option<SonarControl>,
    demux: Arc<DataDemux>,
    listener: ListenerId,
}

impl ControlFacade {
    /// Probe the store's schema and build one sub-controller per capability
    pub fn new(store: Arc<dyn ParameterStore>) -> Result<Self, SchemaError> {
        let schema = store.schema();
        if let Err(e) = schema.check_sonar() {
            error!(error = %e, "Refusing to control a device with this schema");
            return Err(e);
        }

        let link = Link {
            store: store.clone(),
            schema: schema.clone(),
            lock: Arc::new(Mutex::new(())),
        };
        let demux = Arc::new(DataDemux::new(&store));
        let listener = store.connect(demux.clone());

        let sources = keys::source_names(schema.keys_with_prefix("/sources/"));
        let ports = keys::sensor_names(schema.keys_with_prefix("/sensors/"));
        let has_generator = sources.iter().any(|s| {
            schema
                .default_i64(&keys::generator(s, "capabilities"))
                .and_then(|bits| u32::try_from(bits).ok())
                .is_some_and(|bits| !GeneratorModes::from_bits_truncate(bits).is_empty())
        });
        let has_tvg = sources.iter().any(|s| {
            schema
                .default_i64(&keys::tvg(s, "capabilities"))
                .and_then(|bits| u32::try_from(bits).ok())
                .is_some_and(|bits| !TvgModes::from_bits_truncate(bits).is_empty())
        });

        let facade = Self {
            sensor: (!ports.is_empty()).then(|| SensorControl::new(link.clone(), demux.clone())),
            generator: has_generator.then(|| GeneratorControl::new(link.clone())),
            tvg: has_tvg.then(|| TvgControl::new(link.clone())),
            sonar: schema
                .contains(keys::STOP)
                .then(|| SonarControl::new(link.clone(), demux.clone())),
            link,
            demux,
            listener,
        };

        info!(
            sources = sources.len(),
            ports = ports.len(),
            generator = facade.generator.is_some(),
            tvg = facade.tvg.is_some(),
            "Control facade ready"
        );
        Ok(facade)
    }

    pub fn store(&self) -> &Arc<dyn ParameterStore> {
        &self.link.store
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.link.schema
    }

    pub fn binding(&self) -> &ChannelBinding {
        self.demux.binding()
    }

    pub fn sources(&self) -> Vec<String> {
        keys::source_names(self.link.schema.keys_with_prefix("/sources/"))
    }

    pub fn sensor(&self) -> Option<&SensorControl> {
        self.sensor.as_ref()
    }

    pub fn generator(&self) -> Option<&GeneratorControl> {
        self.generator.as_ref()
    }

    pub fn tvg(&self) -> Option<&TvgControl> {
        self.tvg.as_ref()
    }

    pub fn sonar(&self) -> Option<&SonarControl> {
        self.sonar.as_ref()
    }

    /// Subscribe to demultiplexed sample events
    pub fn connect_data(&self, handler: Arc<dyn DataHandler>) -> HandlerId {
        self.demux.connect(handler)
    }

    pub fn disconnect_data(&self, id: HandlerId) {
        self.demux.disconnect(id)
    }

    /// Run a typed command through the matching sub-controller
    pub fn execute(&self, command: &Command) -> Result<(), ControlError> {
        match command {
            Command::SensorVirtual {
                port,
                channel,
                time_offset,
            } => self.sensor_control()?.set_virtual_port(port, *channel, *time_offset),
            Command::SensorUart {
                port,
                channel,
                time_offset,
                protocol,
                device,
                mode,
            } => self.sensor_control()?.set_uart_port(
                port,
                *channel,
                *time_offset,
                *protocol,
                *device,
                *mode,
            ),
            Command::SensorUdp {
                port,
                channel,
                time_offset,
                protocol,
                address,
                udp_port,
            } => self.sensor_control()?.set_udp_port(
                port,
                *channel,
                *time_offset,
                *protocol,
                *address,
                *udp_port,
            ),
            Command::SensorPosition { port, position } => {
                self.sensor_control()?.set_position(port, *position)
            }
            Command::SensorEnable { port, enable } => self.sensor_control()?.set_enable(port, *enable),
            Command::GeneratorPreset { source, preset } => {
                self.generator_control()?.set_preset(source, *preset)
            }
            Command::GeneratorAuto { source, signal } => {
                self.generator_control()?.set_auto(source, *signal)
            }
            Command::GeneratorSimple {
                source,
                signal,
                power,
            } => self.generator_control()?.set_simple(source, *signal, *power),
            Command::GeneratorExtended {
                source,
                signal,
                duration,
                power,
            } => self
                .generator_control()?
                .set_extended(source, *signal, *duration, *power),
            Command::GeneratorEnable { source, enable } => {
                self.generator_control()?.set_enable(source, *enable)
            }
            Command::TvgAuto {
                source,
                level,
                sensitivity,
            } => self.tvg_control()?.set_auto(source, *level, *sensitivity),
            Command::TvgConstant { source, gain } => self.tvg_control()?.set_constant(source, *gain),
            Command::TvgLinearDb {
                source,
                gain0,
                step,
            } => self.tvg_control()?.set_linear_db(source, *gain0, *step),
            Command::TvgLogarithmic {
                source,
                gain0,
                beta,
                alpha,
            } => self
                .tvg_control()?
                .set_logarithmic(source, *gain0, *beta, *alpha),
            Command::TvgEnable { source, enable } => self.tvg_control()?.set_enable(source, *enable),
            Command::SonarSyncType { sync } => self.sonar_control()?.set_sync_type(*sync),
            Command::SonarPosition { source, position } => {
                self.sonar_control()?.set_position(source, *position)
            }
            Command::SonarReceiveTime { source, time } => {
                self.sonar_control()?.set_receive_time(source, *time)
            }
            Command::SonarStart {
                project,
                track,
                track_type,
            } => self.sonar_control()?.start(project, track, *track_type),
            Command::SonarStop => self.sonar_control()?.stop(),
            Command::SonarPing => self.sonar_control()?.ping(),
        }
    }

    fn sensor_control(&self) -> Result<&SensorControl, ControlError> {
        self.sensor.as_ref().ok_or(ControlError::Unsupported("sensor ports"))
    }

    fn generator_control(&self) -> Result<&GeneratorControl, ControlError> {
        self.generator.as_ref().ok_or(ControlError::Unsupported("generator"))
    }

    fn tvg_control(&self) -> Result<&TvgControl, ControlError> {
        self.tvg.as_ref().ok_or(ControlError::Unsupported("tvg"))
    }

    fn sonar_control(&self) -> Result<&SonarControl, ControlError> {
        self.sonar.as_ref().ok_or(ControlError::Unsupported("sonar control"))
    }
}

impl Drop for ControlFacade {
    fn drop(&mut self) {
        self.link.store.disconnect(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataEvent;
    use crate::router::{CommandHandler, CommandRouter, Rejected};
    use sonar_core::builder::sample_sidescan;
    use sonar_core::{
        DataSample, GeneratorSignal, IdAllocator, MemoryStore, SchemaBuilder, StoreError,
        StoreListener,
    };

    /// Device side: a store with a router recording every command
    struct Device {
        store: Arc<MemoryStore>,
        router: Arc<CommandRouter>,
        log: Arc<Mutex<Vec<Command>>>,
    }

    struct Log(Arc<Mutex<Vec<Command>>>);

    impl CommandHandler for Log {
        fn handle(&self, command: &Command) -> Result<(), Rejected> {
            self.0.lock().push(command.clone());
            Ok(())
        }
    }

    fn device() -> Device {
        let schema = SchemaBuilder::from_description(&sample_sidescan(), &mut IdAllocator::new());
        let store = Arc::new(MemoryStore::new(schema));
        let dyn_store: Arc<dyn ParameterStore> = store.clone();
        let router = CommandRouter::attach(&dyn_store).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        router.connect(Arc::new(Log(log.clone())));
        Device { store, router, log }
    }

    /// Store whose read-back skews selected doubles, like quantizing hardware
    struct SkewedStore {
        inner: Arc<MemoryStore>,
        field: &'static str,
        skew: fn(f64) -> f64,
    }

    impl ParameterStore for SkewedStore {
        fn schema(&self) -> Arc<Schema> {
            self.inner.schema()
        }

        fn set(&self, params: &ParamList) -> Result<(), StoreError> {
            self.inner.set(params)
        }

        fn get(&self, keys: &[&str]) -> Result<ParamList, StoreError> {
            let values = self.inner.get(keys)?;
            Ok(values
                .into_iter()
                .map(|(key, value)| match value {
                    ParamValue::Double(v) if key.ends_with(self.field) => {
                        (key, ParamValue::Double((self.skew)(v)))
                    }
                    other => (key, other),
                })
                .collect())
        }

        fn publish_sample(&self, sample: &DataSample) {
            self.inner.publish_sample(sample)
        }

        fn connect(&self, listener: Arc<dyn StoreListener>) -> ListenerId {
            self.inner.connect(listener)
        }

        fn disconnect(&self, id: ListenerId) {
            self.inner.disconnect(id)
        }
    }

    fn skewed(dev: &Device, field: &'static str, skew: fn(f64) -> f64) -> ControlFacade {
        ControlFacade::new(Arc::new(SkewedStore {
            inner: dev.store.clone(),
            field,
            skew,
        }))
        .unwrap()
    }

    #[test]
    fn test_tolerance_by_field() {
        assert_eq!(Tolerance::for_key("/sources/port/tvg/constant/gain"), Tolerance::Relative(0.01));
        assert_eq!(
            Tolerance::for_key("/sources/port/generator/extended/duration"),
            Tolerance::Absolute(1e-6)
        );
        assert_eq!(Tolerance::for_key("/sources/port/antenna/frequency"), Tolerance::Absolute(1.0));

        let freq = Tolerance::for_key("/x/frequency");
        assert!(freq.accepts(&100_000.0.into(), &100_000.8.into()));
        assert!(!freq.accepts(&100_000.0.into(), &100_001.5.into()));
        assert!(Tolerance::Exact.accepts(&ParamValue::Enum(2), &ParamValue::Enum(2)));
        assert!(!Tolerance::Exact.accepts(&ParamValue::Enum(2), &ParamValue::Enum(3)));
    }

    #[test]
    fn test_gain_within_one_percent_verifies() {
        let dev = device();
        let facade = skewed(&dev, "gain", |v| v * 1.005);
        let tvg = facade.tvg().unwrap();
        assert!(tvg.set_constant("port", 20.0).is_ok());
    }

    #[test]
    fn test_gain_outside_one_percent_fails() {
        let dev = device();
        let facade = skewed(&dev, "gain", |v| v * 1.02);
        let tvg = facade.tvg().unwrap();
        assert_eq!(
            tvg.set_constant("port", 20.0),
            Err(ControlError::VerifyFailed {
                key: keys::tvg("port", "constant/gain")
            })
        );
    }

    #[test]
    fn test_receive_time_within_one_microsecond() {
        let dev = device();
        let facade = skewed(&dev, "time", |v| v + 0.5e-6);
        assert!(facade.sonar().unwrap().set_receive_time("port", 0.1).is_ok());

        let facade = skewed(&dev, "time", |v| v + 2e-6);
        assert!(facade.sonar().unwrap().set_receive_time("port", 0.1).is_err());
    }

    #[test]
    fn test_mode_change_disables_and_reenables() {
        let dev = device();
        let dyn_store: Arc<dyn ParameterStore> = dev.store.clone();
        let facade = ControlFacade::new(dyn_store).unwrap();
        let generator = facade.generator().unwrap();

        generator.set_enable("port", true).unwrap();
        dev.log.lock().clear();

        generator.set_simple("port", GeneratorSignal::Tone, 80.0).unwrap();
        let log = dev.log.lock().clone();
        assert_eq!(
            log,
            vec![
                Command::GeneratorEnable {
                    source: "port".to_string(),
                    enable: false
                },
                Command::GeneratorSimple {
                    source: "port".to_string(),
                    signal: GeneratorSignal::Tone,
                    power: 80.0
                },
                Command::GeneratorEnable {
                    source: "port".to_string(),
                    enable: true
                },
            ]
        );
    }

    #[test]
    fn test_mode_change_on_disabled_channel_skips_toggle() {
        let dev = device();
        let dyn_store: Arc<dyn ParameterStore> = dev.store.clone();
        let facade = ControlFacade::new(dyn_store).unwrap();

        facade.tvg().unwrap().set_linear_db("starboard", 10.0, 20.0).unwrap();
        assert_eq!(dev.log.lock().len(), 1);
    }

    #[test]
    fn test_concurrent_reconfigurations_do_not_interleave() {
        let dev = device();
        let dyn_store: Arc<dyn ParameterStore> = dev.store.clone();
        let facade = Arc::new(ControlFacade::new(dyn_store).unwrap());
        facade.tvg().unwrap().set_enable("port", true).unwrap();
        dev.log.lock().clear();

        let workers: Vec<_> = (0..2)
            .map(|n| {
                let facade = facade.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        let gain = (n * 20 + i) as f64;
                        facade.tvg().unwrap().set_constant("port", gain).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let log = dev.log.lock().clone();
        assert_eq!(log.len(), 40 * 3);
        for group in log.chunks(3) {
            assert!(matches!(group[0], Command::TvgEnable { enable: false, .. }));
            assert!(matches!(group[1], Command::TvgConstant { .. }));
            assert!(matches!(group[2], Command::TvgEnable { enable: true, .. }));
        }
    }

    #[test]
    fn test_unsupported_mode_is_refused_before_writing() {
        let dev = device();
        let dyn_store: Arc<dyn ParameterStore> = dev.store.clone();
        let facade = ControlFacade::new(dyn_store).unwrap();

        let result = facade
            .generator()
            .unwrap()
            .set_extended("port", GeneratorSignal::Lfm, 0.001, 50.0);
        assert_eq!(result, Err(ControlError::Unsupported("generator extended mode")));
        assert!(dev.log.lock().is_empty());
    }

    #[test]
    fn test_unknown_preset() {
        let dev = device();
        let dyn_store: Arc<dyn ParameterStore> = dev.store.clone();
        let facade = ControlFacade::new(dyn_store).unwrap();

        let generator = facade.generator().unwrap();
        assert!(generator.set_preset("port", 2).is_ok());
        let err = generator.set_preset("port", 9).unwrap_err();
        assert_eq!(
            err,
            ControlError::UnknownPreset {
                device: "port".into(),
                preset: 9
            }
        );
        assert_eq!(err.to_string(), "Unknown preset 9 for port");
    }

    #[test]
    fn test_execute_dispatches_command() {
        let dev = device();
        let dyn_store: Arc<dyn ParameterStore> = dev.store.clone();
        let facade = ControlFacade::new(dyn_store).unwrap();

        facade.execute(&Command::SonarPing).unwrap();
        assert_eq!(dev.log.lock().as_slice(), &[Command::SonarPing]);
    }

    #[test]
    fn test_samples_demultiplexed_with_geometry() {
        let dev = device();
        let dyn_store: Arc<dyn ParameterStore> = dev.store.clone();
        let facade = ControlFacade::new(dyn_store).unwrap();

        let position = sonar_core::AntennaPosition::from_array([0.5, 0.0, -1.0, 0.0, 0.0, 0.0]);
        facade.sonar().unwrap().set_position("port", position).unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        facade.connect_data(Arc::new(move |event: &DataEvent| sink.lock().push(event.clone())));

        dev.router.publish_channel("port", 1, DataSample::from_f32(0, 10, 5000.0, &[1.0, 2.0]));
        dev.router.publish_channel("gps", 0, DataSample::from_text(0, 11, "$GPGGA"));
        dev.store.publish_sample(&DataSample::from_f32(77, 12, 5000.0, &[1.0]));

        let events = events.lock();
        assert_eq!(events.len(), 2);
        match &events[0] {
            DataEvent::Acoustic(a) => {
                assert_eq!(a.source, "port");
                assert_eq!(a.channel, 1);
                assert_eq!(a.antenna, position);
                assert_eq!(a.frequency, 100_000.0);
                assert_eq!(a.sample.time, 10);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(&events[1], DataEvent::Sensor(s) if s.port == "gps"));
    }
}
