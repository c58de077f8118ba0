//! Client-side sample demultiplexing

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sonar_core::{
    keys, AntennaPosition, ChannelBinding, DataSample, ParameterStore, StoreListener,
};
use tracing::trace;

/// Acoustic data of one source channel, with its geometry
#[derive(Debug, Clone, PartialEq)]
pub struct AcousticSample {
    pub source: String,
    pub channel: u32,
    pub antenna: AntennaPosition,
    /// Centre frequency in Hz
    pub frequency: f64,
    /// Bandwidth in Hz
    pub bandwidth: f64,
    pub sample: DataSample,
}

/// Raw sensor message of one port
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub port: String,
    pub position: AntennaPosition,
    pub sample: DataSample,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
    Acoustic(AcousticSample),
    Sensor(SensorSample),
}

impl DataEvent {
    pub fn sample(&self) -> &DataSample {
        match self {
            Self::Acoustic(a) => &a.sample,
            Self::Sensor(s) => &s.sample,
        }
    }

    /// Source or port name
    pub fn device(&self) -> &str {
        match self {
            Self::Acoustic(a) => &a.source,
            Self::Sensor(s) => &s.port,
        }
    }
}

pub trait DataHandler: Send + Sync {
    fn on_data(&self, event: &DataEvent);
}

impl<F> DataHandler for F
where
    F: Fn(&DataEvent) + Send + Sync,
{
    fn on_data(&self, event: &DataEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Resolves numeric sample ids to channels and fans events out
pub(crate) struct DataDemux {
    binding: ChannelBinding,
    geometry: RwLock<HashMap<String, AntennaPosition>>,
    bands: HashMap<String, (f64, f64)>,
    handlers: RwLock<Vec<(HandlerId, Arc<dyn DataHandler>)>>,
    next_handler: AtomicU64,
}

impl DataDemux {
    pub(crate) fn new(store: &Arc<dyn ParameterStore>) -> Self {
        let schema = store.schema();
        let binding = ChannelBinding::from_schema(&schema);

        let mut geometry = HashMap::new();
        let mut bands = HashMap::new();
        for source in keys::source_names(schema.keys_with_prefix("/sources/")) {
            let position = read_position(store, |axis| keys::antenna(&source, axis));
            geometry.insert(source.clone(), position);

            let frequency = schema.default_f64(&keys::antenna(&source, "frequency")).unwrap_or(0.0);
            let bandwidth = schema.default_f64(&keys::antenna(&source, "bandwidth")).unwrap_or(0.0);
            bands.insert(source, (frequency, bandwidth));
        }
        for port in keys::sensor_names(schema.keys_with_prefix("/sensors/")) {
            let position = read_position(store, |axis| keys::sensor_position(&port, axis));
            geometry.insert(port, position);
        }

        Self {
            binding,
            geometry: RwLock::new(geometry),
            bands,
            handlers: RwLock::new(Vec::new()),
            next_handler: AtomicU64::new(1),
        }
    }

    pub(crate) fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    pub(crate) fn set_geometry(&self, device: &str, position: AntennaPosition) {
        self.geometry.write().insert(device.to_string(), position);
    }

    pub(crate) fn connect(&self, handler: Arc<dyn DataHandler>) -> HandlerId {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, handler));
        id
    }

    pub(crate) fn disconnect(&self, id: HandlerId) {
        self.handlers.write().retain(|(hid, _)| *hid != id);
    }

    fn event(&self, sample: &DataSample) -> Option<DataEvent> {
        let channel = self.binding.channel(sample.id)?;
        let position = self
            .geometry
            .read()
            .get(&channel.device)
            .copied()
            .unwrap_or_default();

        if channel.is_sensor() {
            return Some(DataEvent::Sensor(SensorSample {
                port: channel.device.clone(),
                position,
                sample: sample.clone(),
            }));
        }

        let (frequency, bandwidth) = self.bands.get(&channel.device).copied().unwrap_or_default();
        Some(DataEvent::Acoustic(AcousticSample {
            source: channel.device.clone(),
            channel: channel.index,
            antenna: position,
            frequency,
            bandwidth,
            sample: sample.clone(),
        }))
    }
}

impl StoreListener for DataDemux {
    fn on_sample(&self, sample: &DataSample) {
        let Some(event) = self.event(sample) else {
            trace!(id = sample.id, "Sample for unknown channel");
            return;
        };
        let handlers: Vec<Arc<dyn DataHandler>> =
            self.handlers.read().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler.on_data(&event);
        }
    }
}

fn read_position(
    store: &Arc<dyn ParameterStore>,
    key: impl Fn(&str) -> String,
) -> AntennaPosition {
    let names: Vec<String> = AntennaPosition::FIELDS.into_iter().map(&key).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();

    let Ok(values) = store.get(&refs) else {
        return AntennaPosition::default();
    };
    let mut array = [0.0; 6];
    for (slot, name) in array.iter_mut().zip(&refs) {
        *slot = values.get_f64(name).unwrap_or(0.0);
    }
    AntennaPosition::from_array(array)
}
