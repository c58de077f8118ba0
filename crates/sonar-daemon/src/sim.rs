//! Simulated sidescan sonar
//!
//! Serves the key tree of a [`DeviceDescription`] from an in-memory store
//! and generates synthetic echo lines plus NMEA time sentences while a
//! track is running.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sonar_control::{Command, CommandHandler, CommandRouter, Rejected};
use sonar_core::builder::DeviceDescription;
use sonar_core::{
    keys, DataSample, IdAllocator, MemoryStore, ParameterStore, SchemaBuilder, SyncType,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DeviceConfig;

/// Pings between two NMEA sentences on each sensor port
const NMEA_EVERY: u64 = 5;

#[derive(Default)]
struct SimShared {
    running: AtomicBool,
    shutdown: AtomicBool,
    ping_requested: AtomicBool,
    pings: AtomicU64,
    sync: Mutex<Option<SyncType>>,
    track: Mutex<Option<String>>,
}

/// Device-side command handler
struct SimHandler {
    shared: Arc<SimShared>,
}

impl CommandHandler for SimHandler {
    fn handle(&self, command: &Command) -> Result<(), Rejected> {
        let shared = &self.shared;
        match command {
            Command::SonarStart {
                project,
                track,
                track_type,
            } => {
                if track.is_empty() {
                    return Err(Rejected::new("track name is empty"));
                }
                info!(project = %project, track = %track, track_type = track_type.name(), "Track started");
                *shared.track.lock() = Some(format!("{}/{}", project, track));
                shared.running.store(true, Ordering::SeqCst);
            }
            Command::SonarStop => {
                if shared.running.swap(false, Ordering::SeqCst) {
                    info!(pings = shared.pings.load(Ordering::Relaxed), "Track stopped");
                }
                *shared.track.lock() = None;
            }
            Command::SonarPing => {
                if !shared.running.load(Ordering::SeqCst) {
                    return Err(Rejected::new("sonar is not started"));
                }
                if *shared.sync.lock() != Some(SyncType::Software) {
                    return Err(Rejected::new("software sync is not selected"));
                }
                shared.ping_requested.store(true, Ordering::SeqCst);
            }
            Command::SonarSyncType { sync } => {
                debug!(sync = sync.name(), "Sync type changed");
                *shared.sync.lock() = Some(*sync);
            }
            other => debug!(kind = ?other.kind(), device = other.device(), "Accepted"),
        }
        Ok(())
    }
}

/// What the ping thread emits on
struct Layout {
    /// `(source, channel count, max receive time)`
    sources: Vec<(String, u32, f64)>,
    sensors: Vec<String>,
    line_points: usize,
    period: Duration,
}

/// A device store plus its router and ping generator
pub struct SimulatedSonar {
    store: Arc<MemoryStore>,
    shared: Arc<SimShared>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedSonar {
    pub fn start(config: &DeviceConfig) -> Result<Self> {
        let desc = &config.description;
        let schema = SchemaBuilder::from_description(desc, &mut IdAllocator::new());
        let store = Arc::new(MemoryStore::new(schema));

        let dyn_store: Arc<dyn ParameterStore> = store.clone();
        let router = CommandRouter::attach(&dyn_store)?;

        let shared = Arc::new(SimShared::default());
        *shared.sync.lock() = store
            .value(keys::SYNC_TYPE)
            .and_then(|v| v.as_enum())
            .and_then(SyncType::from_id);
        router.connect(Arc::new(SimHandler {
            shared: shared.clone(),
        }));

        info!(
            model = %desc.model,
            sources = desc.sources.len(),
            sensors = desc.sensors.len(),
            operations = router.operations().len(),
            "Simulated sonar ready"
        );

        let layout = layout(config);
        let thread = {
            let store = store.clone();
            let shared = shared.clone();
            thread::Builder::new()
                .name("sonar-sim".into())
                .spawn(move || ping_loop(&store, &router, &shared, &layout))?
        };

        Ok(Self {
            store,
            shared,
            thread: Some(thread),
        })
    }

    pub fn store(&self) -> Arc<dyn ParameterStore> {
        self.store.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Pings emitted since startup
    pub fn pings(&self) -> u64 {
        self.shared.pings.load(Ordering::Relaxed)
    }

    /// `project/track` of the running track
    pub fn track(&self) -> Option<String> {
        self.shared.track.lock().clone()
    }
}

impl Drop for SimulatedSonar {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn layout(config: &DeviceConfig) -> Layout {
    let desc: &DeviceDescription = &config.description;
    Layout {
        sources: desc
            .sources
            .iter()
            .map(|s| (s.name.clone(), s.channels, s.max_receive_time))
            .collect(),
        sensors: desc.sensors.iter().map(|s| s.name.clone()).collect(),
        line_points: config.line_points.max(1),
        period: Duration::from_millis(config.ping_period_ms.max(1)),
    }
}

fn ping_loop(store: &MemoryStore, router: &CommandRouter, shared: &SimShared, layout: &Layout) {
    while !shared.shutdown.load(Ordering::SeqCst) {
        thread::sleep(layout.period);

        if !shared.running.load(Ordering::SeqCst) {
            continue;
        }
        let fire = match *shared.sync.lock() {
            Some(SyncType::Software) => shared.ping_requested.swap(false, Ordering::SeqCst),
            _ => true,
        };
        if !fire {
            continue;
        }

        let ping = shared.pings.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let time = now.timestamp_micros();

        for (source, channels, max_time) in &layout.sources {
            let receive_time = store
                .value(&keys::receiver(source, "time"))
                .and_then(|v| v.as_f64())
                .filter(|t| *t > 0.0)
                .unwrap_or(*max_time);
            let rate = layout.line_points as f64 / receive_time;
            for index in 1..=*channels {
                let line = echo_line(layout.line_points, ping, index);
                router.publish_channel(source, index, DataSample::from_f32(0, time, rate, &line));
            }
        }

        if ping % NMEA_EVERY == 0 {
            let sentence = zda_sentence(&now);
            for port in &layout.sensors {
                router.publish_channel(port, 0, DataSample::from_text(0, time, &sentence));
            }
        }
    }
}

/// Synthetic echo envelope: spreading loss, a drifting bottom return and
/// deterministic speckle
fn echo_line(points: usize, ping: u64, channel: u32) -> Vec<f32> {
    let bottom = 0.6 + 0.1 * (ping as f32 * 0.05).sin();
    (0..points)
        .map(|i| {
            let x = i as f32 / points as f32;
            let spreading = 0.5 * (-4.0 * x).exp();
            let d = (x - bottom) / 0.02;
            let echo = 0.8 * (-d * d).exp();
            let seed = (i as u64)
                .wrapping_mul(7919)
                .wrapping_add(ping.wrapping_mul(104_729))
                .wrapping_add(channel as u64 * 31);
            let speckle = (seed % 997) as f32 / 997.0 * 0.05;
            spreading + echo + speckle
        })
        .collect()
}

/// `$GPZDA` time and date sentence
fn zda_sentence(now: &DateTime<Utc>) -> String {
    let body = format!(
        "GPZDA,{},{},00,00",
        now.format("%H%M%S%.3f"),
        now.format("%d,%m,%Y")
    );
    let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${}*{:02X}", body, checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sonar_control::{ControlFacade, DataEvent};
    use sonar_core::TrackType;
    use std::time::Instant;

    fn config() -> DeviceConfig {
        DeviceConfig {
            ping_period_ms: 5,
            line_points: 64,
            ..DeviceConfig::default()
        }
    }

    fn collect(facade: &ControlFacade) -> Arc<Mutex<Vec<DataEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        facade.connect_data(Arc::new(move |e: &DataEvent| sink.lock().push(e.clone())));
        events
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_internal_sync_pings_while_started() {
        let sim = SimulatedSonar::start(&config()).unwrap();
        let facade = ControlFacade::new(sim.store()).unwrap();
        let events = collect(&facade);
        let sonar = facade.sonar().unwrap();

        sonar.set_sync_type(SyncType::Internal).unwrap();
        sonar.start("survey", "line-1", TrackType::Survey).unwrap();
        assert!(sim.is_running());
        assert_eq!(sim.track().as_deref(), Some("survey/line-1"));

        assert!(wait_for(|| {
            events
                .lock()
                .iter()
                .any(|e| matches!(e, DataEvent::Acoustic(a) if a.source == "port"))
        }));

        sonar.stop().unwrap();
        assert!(!sim.is_running());
        assert!(sim.pings() > 0);

        let events = events.lock();
        let acoustic = events
            .iter()
            .find_map(|e| match e {
                DataEvent::Acoustic(a) => Some(a),
                _ => None,
            })
            .unwrap();
        assert_eq!(acoustic.sample.points(), 64);
        assert_eq!(acoustic.frequency, 100_000.0);
        // default receive time 0 falls back to the 0.5 s maximum
        assert_eq!(acoustic.sample.rate, 128.0);
    }

    #[test]
    fn test_software_sync_pings_on_request() {
        let sim = SimulatedSonar::start(&config()).unwrap();
        let facade = ControlFacade::new(sim.store()).unwrap();
        let sonar = facade.sonar().unwrap();

        sonar.start("survey", "line-2", TrackType::Tack).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sim.pings(), 0);

        sonar.ping().unwrap();
        assert!(wait_for(|| sim.pings() == 1));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sim.pings(), 1);
    }

    #[test]
    fn test_ping_rejected_when_stopped() {
        let sim = SimulatedSonar::start(&config()).unwrap();
        let facade = ControlFacade::new(sim.store()).unwrap();
        assert!(facade.sonar().unwrap().ping().is_err());
    }

    #[test]
    fn test_start_rejects_empty_track() {
        let sim = SimulatedSonar::start(&config()).unwrap();
        let facade = ControlFacade::new(sim.store()).unwrap();
        assert!(facade
            .sonar()
            .unwrap()
            .start("survey", "", TrackType::Survey)
            .is_err());
        assert!(!sim.is_running());
    }

    #[test]
    fn test_sensor_port_receives_nmea() {
        let sim = SimulatedSonar::start(&config()).unwrap();
        let facade = ControlFacade::new(sim.store()).unwrap();
        let events = collect(&facade);
        let sonar = facade.sonar().unwrap();
        sonar.set_sync_type(SyncType::Internal).unwrap();
        sonar.start("survey", "line-3", TrackType::Survey).unwrap();

        assert!(wait_for(|| {
            events
                .lock()
                .iter()
                .any(|e| matches!(e, DataEvent::Sensor(s) if s.port == "gps"))
        }));
    }

    #[test]
    fn test_zda_checksum() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 5).unwrap();
        let sentence = zda_sentence(&now);
        assert!(sentence.starts_with("$GPZDA,123005.000,09,03,2024,00,00*"));
        let (body, checksum) = sentence[1..].split_once('*').unwrap();
        let expected = body.bytes().fold(0u8, |acc, b| acc ^ b);
        assert_eq!(checksum, format!("{:02X}", expected));
    }

    #[test]
    fn test_echo_line_has_bottom() {
        let line = echo_line(100, 0, 1);
        let peak = line
            .iter()
            .enumerate()
            .skip(20)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((55..=65).contains(&peak));
    }
}
