//! Re-exports an upstream device as a device of its own
//!
//! Downstream `set` calls are routed into typed commands and replayed on
//! the upstream facade; upstream samples are re-tagged with downstream ids
//! and, in computed mode, downsampled before publishing.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sonar_control::{
    Command, CommandHandler, CommandRouter, ControlFacade, DataEvent, DataHandler, HandlerId,
    Rejected,
};
use sonar_core::{
    ChannelBinding, MemoryStore, ParamList, ParameterStore, Schema, SchemaError, SensorPortType,
};
use tracing::{error, info, trace, warn};

use crate::remap::PresetRemap;
use crate::scale::{Downsampler, ScaleConfig};
use crate::schema::computed_schema;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    /// Same schema and data as upstream
    #[default]
    PassThrough,
    /// Virtual sensor ports, one channel per source, downsampled data
    Computed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub mode: ProxyMode,
    #[serde(default)]
    pub scale: ScaleConfig,
}

pub struct ProxyForwarder {
    upstream: Arc<ControlFacade>,
    store: Arc<MemoryStore>,
    router: Arc<CommandRouter>,
    data_handler: HandlerId,
    config: ProxyConfig,
}

impl ProxyForwarder {
    pub fn new(upstream: Arc<ControlFacade>, config: ProxyConfig) -> Result<Self, SchemaError> {
        let upstream_schema = upstream.schema().clone();
        upstream_schema.check_sonar()?;

        let schema = match config.mode {
            ProxyMode::PassThrough => (*upstream_schema).clone(),
            ProxyMode::Computed => computed_schema(&upstream_schema),
        };
        let store = Arc::new(MemoryStore::new(schema));
        seed_values(&upstream, &upstream_schema, &store);

        let downstream: Arc<dyn ParameterStore> = store.clone();
        let router = CommandRouter::attach(&downstream)?;

        router.connect(Arc::new(CommandRelay {
            upstream: upstream.clone(),
            remap: PresetRemap::build(&upstream_schema, &store.schema()),
            mode: config.mode,
        }));

        let scale = match config.mode {
            ProxyMode::PassThrough => ScaleConfig::default(),
            ProxyMode::Computed => config.scale,
        };
        let data_handler = upstream.connect_data(Arc::new(DataRelay {
            router: Arc::downgrade(&router),
            binding: router.binding().clone(),
            downsampler: Mutex::new(Downsampler::new(scale)),
        }));

        info!(
            mode = ?config.mode,
            range_scale = scale.range_scale,
            track_scale = scale.track_scale,
            operations = router.operations().len(),
            "Proxy forwarder ready"
        );
        Ok(Self {
            upstream,
            store,
            router,
            data_handler,
            config,
        })
    }

    /// The store downstream clients talk to
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn downstream(&self) -> Arc<dyn ParameterStore> {
        self.store.clone()
    }

    pub fn schema(&self) -> Arc<Schema> {
        self.store.schema()
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn upstream(&self) -> &Arc<ControlFacade> {
        &self.upstream
    }

    pub fn config(&self) -> ProxyConfig {
        self.config
    }
}

impl Drop for ProxyForwarder {
    fn drop(&mut self) {
        self.upstream.disconnect_data(self.data_handler);
    }
}

/// Copy current upstream values of keys the two schemas declare identically
fn seed_values(upstream: &ControlFacade, upstream_schema: &Schema, store: &MemoryStore) {
    let downstream_schema = store.schema();
    let shared: Vec<&str> = downstream_schema
        .keys_with_prefix("/")
        .filter(|key| upstream_schema.get(key) == downstream_schema.get(key))
        .collect();

    let result = upstream
        .store()
        .get(&shared)
        .and_then(|values: ParamList| store.set_internal(&values));
    if let Err(e) = result {
        warn!(error = %e, "Could not mirror upstream parameter values");
    }
}

/// Replays downstream commands on the upstream device
struct CommandRelay {
    upstream: Arc<ControlFacade>,
    remap: PresetRemap,
    mode: ProxyMode,
}

impl CommandRelay {
    fn forward(&self, command: &Command) -> Result<(), Rejected> {
        match command {
            Command::GeneratorPreset { source, preset } => {
                let upstream_preset = self
                    .remap
                    .to_upstream(source, *preset)
                    .ok_or_else(|| Rejected::new(format!("preset {} has no upstream match", preset)))?;
                self.execute(&Command::GeneratorPreset {
                    source: source.clone(),
                    preset: upstream_preset,
                })
            }
            Command::SensorVirtual {
                port,
                channel,
                time_offset,
            } if self.mode == ProxyMode::Computed => {
                let sensor = self
                    .upstream
                    .sensor()
                    .ok_or_else(|| Rejected::new("upstream has no sensor ports"))?;
                if sensor.port_type(port) == Some(SensorPortType::Virtual) {
                    return self.execute(command);
                }
                sensor
                    .set_timing(port, *channel, *time_offset)
                    .map_err(|e| Rejected::new(e.to_string()))
            }
            _ => self.execute(command),
        }
    }

    fn execute(&self, command: &Command) -> Result<(), Rejected> {
        self.upstream
            .execute(command)
            .map_err(|e| Rejected::new(e.to_string()))
    }
}

impl CommandHandler for CommandRelay {
    fn handle(&self, command: &Command) -> Result<(), Rejected> {
        let result = self.forward(command);
        if let Err(rejected) = &result {
            warn!(kind = ?command.kind(), device = command.device(), %rejected, "Upstream refused command");
        }
        result
    }
}

/// Re-tags upstream samples and publishes them downstream
struct DataRelay {
    router: Weak<CommandRouter>,
    binding: ChannelBinding,
    downsampler: Mutex<Downsampler>,
}

impl DataHandler for DataRelay {
    fn on_data(&self, event: &DataEvent) {
        let id = match event {
            DataEvent::Acoustic(a) => self.binding.id_of(&a.source, a.channel),
            DataEvent::Sensor(s) => self.binding.id_of(&s.port, 0),
        };
        let Some(id) = id else {
            trace!(device = event.device(), "No downstream channel for sample");
            return;
        };
        let Some(router) = self.router.upgrade() else {
            return;
        };

        let mut sample = event.sample().clone();
        sample.id = id;

        match event {
            DataEvent::Sensor(_) => router.publish(sample),
            DataEvent::Acoustic(_) => {
                let transformed = self.downsampler.lock().process(sample);
                match transformed {
                    Ok(Some(out)) => router.publish(out),
                    Ok(None) => {}
                    Err(e) => error!(id = id, error = %e, "Dropping sample"),
                }
            }
        }
    }
}
