//! Server-side command routing
//!
//! A [`CommandRouter`] binds schema key groups to typed operations and
//! turns every accepted `set` batch into a [`Command`] passed through a
//! voting handler chain. A `false` vote rejects the store write.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use sonar_core::{
    keys, ChannelBinding, DataSample, GeneratorModes, ListenerId, ParamList, ParameterStore,
    Schema, SchemaError, SensorPortType, StoreListener, SyncModes, TvgModes,
};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::command::{Command, OperationKind, SONAR_DEVICE};

/// Vote cast by a handler that declines a command
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Command rejected: {0}")]
pub struct Rejected(pub String);

impl Rejected {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Application logic behind a router
pub trait CommandHandler: Send + Sync {
    fn handle(&self, command: &Command) -> Result<(), Rejected>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Command) -> Result<(), Rejected> + Send + Sync,
{
    fn handle(&self, command: &Command) -> Result<(), Rejected> {
        self(command)
    }
}

/// One registered operation: a kind bound to a device and its keys
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub device: String,
    pub keys: Vec<String>,
}

pub struct CommandRouter {
    schema: Arc<Schema>,
    operations: Vec<Operation>,
    /// Key to index into `operations`
    index: HashMap<String, usize>,
    binding: ChannelBinding,
    handlers: RwLock<Vec<Arc<dyn CommandHandler>>>,
    store: Weak<dyn ParameterStore>,
    listener: RwLock<Option<ListenerId>>,
}

impl CommandRouter {
    /// Build the operation table from a schema, without attaching to a store
    pub fn new(schema: Arc<Schema>) -> Result<Self, SchemaError> {
        schema.check_sonar().map_err(|e| {
            error!(error = %e, "Refusing to route commands for this schema");
            e
        })?;

        let mut router = Self {
            binding: ChannelBinding::from_schema(&schema),
            schema,
            operations: Vec::new(),
            index: HashMap::new(),
            handlers: RwLock::new(Vec::new()),
            store: Weak::<sonar_core::MemoryStore>::new(),
            listener: RwLock::new(None),
        };
        router.register_sensors();
        router.register_sources();
        router.register_sonar();

        debug!(
            operations = router.operations.len(),
            keys = router.index.len(),
            "Command router built"
        );
        Ok(router)
    }

    /// Build a router for the store's schema and listen to its `set` calls
    pub fn attach(store: &Arc<dyn ParameterStore>) -> Result<Arc<Self>, SchemaError> {
        let mut router = Self::new(store.schema())?;
        router.store = Arc::downgrade(store);
        let router = Arc::new(router);

        let id = store.connect(Arc::new(RouterListener {
            router: Arc::downgrade(&router),
        }));
        *router.listener.write() = Some(id);
        info!(operations = router.operations.len(), "Command router attached");
        Ok(router)
    }

    /// Append a handler to the voting chain
    pub fn connect(&self, handler: Arc<dyn CommandHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Operation a key belongs to
    pub fn operation_for(&self, key: &str) -> Option<&Operation> {
        self.index.get(key).map(|&i| &self.operations[i])
    }

    /// Validate a batch and run it through the handler chain
    ///
    /// Returns `false` for an empty batch, a batch repeating a key, a batch
    /// mixing operations, a batch missing fields, or a handler vote against
    /// it. A batch whose
    /// first key belongs to no operation is not ours and returns `true`.
    pub fn handle_set(&self, params: &ParamList) -> bool {
        let mut rest = params.keys();
        let Some(first) = rest.next() else {
            return false;
        };
        let Some(&op_index) = self.index.get(first) else {
            trace!(key = first, "Key not routed here");
            return true;
        };
        if let Some(key) = params.duplicate_key() {
            warn!(key = key, "Batch repeats a key");
            return false;
        }

        for key in rest {
            if self.index.get(key) != Some(&op_index) {
                warn!(first = first, key = key, "Batch mixes fields of different commands");
                return false;
            }
        }

        let operation = &self.operations[op_index];
        let Some(command) = Command::parse(operation.kind, &operation.device, params) else {
            warn!(
                kind = ?operation.kind,
                device = %operation.device,
                "Incomplete or mistyped command batch"
            );
            return false;
        };

        match self.dispatch(&command) {
            Ok(()) => {
                debug!(kind = ?operation.kind, device = %operation.device, "Command accepted");
                true
            }
            Err(rejected) => {
                debug!(kind = ?operation.kind, device = %operation.device, %rejected, "Command vetoed");
                false
            }
        }
    }

    /// Run the handler chain; the first rejection stops it
    pub fn dispatch(&self, command: &Command) -> Result<(), Rejected> {
        let handlers = self.handlers.read().clone();
        handlers.iter().try_for_each(|h| h.handle(command))
    }

    /// Push a sample to the store if its id belongs to this device
    pub fn publish(&self, sample: DataSample) {
        if !self.binding.contains_id(sample.id) {
            trace!(id = sample.id, "Dropping sample for unbound id");
            return;
        }
        match self.store.upgrade() {
            Some(store) => store.publish_sample(&sample),
            None => trace!(id = sample.id, "Router is not attached to a store"),
        }
    }

    /// Publish on a `(device, channel)` pair instead of a numeric id
    pub fn publish_channel(&self, device: &str, index: u32, mut sample: DataSample) {
        match self.binding.id_of(device, index) {
            Some(id) => {
                sample.id = id;
                self.publish(sample);
            }
            None => trace!(device = device, index = index, "Dropping sample for unknown channel"),
        }
    }

    fn register(&mut self, kind: OperationKind, device: &str) {
        let keys = kind.keys(device);
        if let Some(missing) = keys.iter().find(|k| !self.schema.contains(k)) {
            debug!(kind = ?kind, device = device, key = %missing, "Skipping operation with missing key");
            return;
        }
        if let Some(taken) = keys.iter().find(|k| self.index.contains_key(*k)) {
            warn!(kind = ?kind, device = device, key = %taken, "Key already bound to another operation");
            return;
        }

        let op_index = self.operations.len();
        for key in &keys {
            self.index.insert(key.clone(), op_index);
        }
        self.operations.push(Operation {
            kind,
            device: device.to_string(),
            keys,
        });
    }

    fn register_sensors(&mut self) {
        let ports = keys::sensor_names(self.schema.keys_with_prefix("/sensors/"));
        for port in &ports {
            let port_type = self
                .schema
                .get(&keys::sensor(port, "type"))
                .and_then(|d| d.default.as_enum())
                .and_then(SensorPortType::from_id);

            match port_type {
                Some(SensorPortType::Virtual) => self.register(OperationKind::SensorVirtual, port),
                Some(SensorPortType::Uart) => self.register(OperationKind::SensorUart, port),
                Some(SensorPortType::Udp) => self.register(OperationKind::SensorUdp, port),
                None => {
                    debug!(port = %port, "Sensor port without a known type");
                    continue;
                }
            }
            self.register(OperationKind::SensorPosition, port);
            self.register(OperationKind::SensorEnable, port);
        }
    }

    fn register_sources(&mut self) {
        let sources = keys::source_names(self.schema.keys_with_prefix("/sources/"));
        for source in &sources {
            let generator = GeneratorModes::from_bits_truncate(
                self.capabilities(&keys::generator(source, "capabilities")),
            );
            let generator_modes = [
                (GeneratorModes::PRESET, OperationKind::GeneratorPreset),
                (GeneratorModes::AUTO, OperationKind::GeneratorAuto),
                (GeneratorModes::SIMPLE, OperationKind::GeneratorSimple),
                (GeneratorModes::EXTENDED, OperationKind::GeneratorExtended),
            ];
            for (flag, kind) in generator_modes {
                if generator.contains(flag) {
                    self.register(kind, source);
                }
            }
            if !generator.is_empty() {
                self.register(OperationKind::GeneratorEnable, source);
            }

            let tvg = TvgModes::from_bits_truncate(self.capabilities(&keys::tvg(source, "capabilities")));
            let tvg_modes = [
                (TvgModes::AUTO, OperationKind::TvgAuto),
                (TvgModes::CONSTANT, OperationKind::TvgConstant),
                (TvgModes::LINEAR_DB, OperationKind::TvgLinearDb),
                (TvgModes::LOGARITHMIC, OperationKind::TvgLogarithmic),
            ];
            for (flag, kind) in tvg_modes {
                if tvg.contains(flag) {
                    self.register(kind, source);
                }
            }
            if !tvg.is_empty() {
                self.register(OperationKind::TvgEnable, source);
            }

            self.register(OperationKind::SonarPosition, source);
            self.register(OperationKind::SonarReceiveTime, source);
        }
    }

    fn register_sonar(&mut self) {
        let sync = SyncModes::from_bits_truncate(self.capabilities(keys::SYNC_CAPABILITIES));
        if !sync.is_empty() {
            self.register(OperationKind::SonarSyncType, SONAR_DEVICE);
        }
        self.register(OperationKind::SonarStart, SONAR_DEVICE);
        self.register(OperationKind::SonarStop, SONAR_DEVICE);
        self.register(OperationKind::SonarPing, SONAR_DEVICE);
    }

    fn capabilities(&self, key: &str) -> u32 {
        self.schema
            .default_i64(key)
            .and_then(|bits| u32::try_from(bits).ok())
            .unwrap_or(0)
    }
}

impl Drop for CommandRouter {
    fn drop(&mut self) {
        if let (Some(store), Some(id)) = (self.store.upgrade(), self.listener.write().take()) {
            store.disconnect(id);
        }
    }
}

/// Store listener forwarding `set` votes to the router
struct RouterListener {
    router: Weak<CommandRouter>,
}

impl StoreListener for RouterListener {
    fn on_set(&self, params: &ParamList) -> bool {
        match self.router.upgrade() {
            Some(router) => router.handle_set(params),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sonar_core::builder::sample_sidescan;
    use sonar_core::{
        GeneratorSignal, IdAllocator, MemoryStore, ParamValue, SchemaBuilder, StoreError,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sidescan() -> (Arc<MemoryStore>, Arc<dyn ParameterStore>) {
        let schema = SchemaBuilder::from_description(&sample_sidescan(), &mut IdAllocator::new());
        let store = Arc::new(MemoryStore::new(schema));
        let dyn_store: Arc<dyn ParameterStore> = store.clone();
        (store, dyn_store)
    }

    struct Recorder {
        seen: Mutex<Vec<Command>>,
    }

    impl CommandHandler for Recorder {
        fn handle(&self, command: &Command) -> Result<(), Rejected> {
            self.seen.lock().push(command.clone());
            Ok(())
        }
    }

    #[test]
    fn test_operations_follow_capabilities() {
        let (_store, dyn_store) = sidescan();
        let router = CommandRouter::attach(&dyn_store).unwrap();

        let kinds: Vec<OperationKind> = router
            .operations()
            .iter()
            .filter(|op| op.device == "port")
            .map(|op| op.kind)
            .collect();
        assert!(kinds.contains(&OperationKind::GeneratorPreset));
        assert!(kinds.contains(&OperationKind::GeneratorSimple));
        assert!(kinds.contains(&OperationKind::GeneratorEnable));
        assert!(!kinds.contains(&OperationKind::GeneratorExtended));
        assert!(!kinds.contains(&OperationKind::TvgLogarithmic));

        // Extended keys exist in the schema but stay unrouted
        assert!(router
            .operation_for(&keys::generator("port", "extended/power"))
            .is_none());
        assert_eq!(
            router.operation_for(&keys::sensor("gps", "uart-mode")).map(|op| op.kind),
            Some(OperationKind::SensorUart)
        );
    }

    #[test]
    fn test_zero_capabilities_register_nothing() {
        let mut desc = sample_sidescan();
        desc.sources[0].generator.as_mut().unwrap().modes = GeneratorModes::empty();
        let schema = SchemaBuilder::from_description(&desc, &mut IdAllocator::new());
        let router = CommandRouter::new(Arc::new(schema)).unwrap();

        assert!(!router.operations().iter().any(|op| op.device == "starboard"
            && matches!(
                op.kind,
                OperationKind::GeneratorPreset | OperationKind::GeneratorEnable
            )));
    }

    #[test]
    fn test_schema_mismatch_refused() {
        let schema = Schema::new(0x1234, 100);
        assert!(matches!(
            CommandRouter::new(Arc::new(schema)),
            Err(SchemaError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_empty_batch_is_false() {
        let (_store, dyn_store) = sidescan();
        let router = CommandRouter::attach(&dyn_store).unwrap();
        assert!(!router.handle_set(&ParamList::new()));
    }

    #[test]
    fn test_unrouted_key_passes_through() {
        let (store, dyn_store) = sidescan();
        let router = CommandRouter::attach(&dyn_store).unwrap();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        router.connect(recorder.clone());

        let batch = ParamList::new().with(keys::ALIVE, true);
        assert!(router.handle_set(&batch));
        assert!(store.set(&batch).is_ok());
        assert!(recorder.seen.lock().is_empty());
    }

    #[test]
    fn test_mixed_batch_rejected_atomically() {
        let (store, dyn_store) = sidescan();
        let router = CommandRouter::attach(&dyn_store).unwrap();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        router.connect(recorder.clone());

        let gain_key = keys::tvg("port", "constant/gain");
        let enable_key = keys::generator("port", "enable");
        let before = store.get(&[gain_key.as_str(), enable_key.as_str()]).unwrap();

        let batch = ParamList::new()
            .with(gain_key.clone(), 12.0)
            .with(enable_key.clone(), true);
        assert!(!router.handle_set(&batch));
        assert_eq!(store.set(&batch), Err(StoreError::Rejected));

        assert_eq!(store.get(&[gain_key.as_str(), enable_key.as_str()]).unwrap(), before);
        assert!(recorder.seen.lock().is_empty());
    }

    #[test]
    fn test_same_kind_on_two_devices_rejected() {
        let (_store, dyn_store) = sidescan();
        let router = CommandRouter::attach(&dyn_store).unwrap();

        let batch = ParamList::new()
            .with(keys::tvg("port", "constant/gain"), 1.0)
            .with(keys::tvg("starboard", "constant/gain"), 1.0);
        assert!(!router.handle_set(&batch));
    }

    #[test]
    fn test_partial_batch_rejected() {
        let (store, dyn_store) = sidescan();
        let _router = CommandRouter::attach(&dyn_store).unwrap();

        let batch = ParamList::new().with(keys::generator("port", "simple/signal"), ParamValue::Enum(1));
        assert_eq!(store.set(&batch), Err(StoreError::Rejected));
    }

    #[test]
    fn test_accepted_batch_becomes_typed_command() {
        let (store, dyn_store) = sidescan();
        let router = CommandRouter::attach(&dyn_store).unwrap();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        router.connect(recorder.clone());

        let command = Command::GeneratorSimple {
            source: "port".to_string(),
            signal: GeneratorSignal::Lfm,
            power: 50.0,
        };
        assert!(store.set(&command.to_params()).is_ok());
        assert_eq!(recorder.seen.lock().as_slice(), &[command]);
    }

    #[test]
    fn test_vote_short_circuits() {
        let (store, dyn_store) = sidescan();
        let router = CommandRouter::attach(&dyn_store).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        router.connect(Arc::new(move |_: &Command| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let c = calls.clone();
        router.connect(Arc::new(move |_: &Command| {
            c.fetch_add(1, Ordering::SeqCst);
            Err(Rejected::new("hardware busy"))
        }));
        let t = third.clone();
        router.connect(Arc::new(move |_: &Command| {
            t.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let key = keys::tvg("starboard", "constant/gain");
        let batch = ParamList::new().with(key.clone(), 30.0);
        assert_eq!(store.set(&batch), Err(StoreError::Rejected));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(third.load(Ordering::SeqCst), 0);
        assert_eq!(store.value(&key), Some(ParamValue::Double(0.0)));
    }

    #[test]
    fn test_repeated_key_cannot_slip_past_veto() {
        let (store, dyn_store) = sidescan();
        let router = CommandRouter::attach(&dyn_store).unwrap();
        router.connect(Arc::new(|command: &Command| match command {
            Command::GeneratorEnable { enable: true, .. } => Err(Rejected::new("locked off")),
            _ => Ok(()),
        }));

        let key = keys::generator("port", "enable");
        let vetoed = ParamList::new().with(key.clone(), true);
        assert_eq!(store.set(&vetoed), Err(StoreError::Rejected));

        let before = store.value(&key);
        let batch = ParamList::new()
            .with(key.clone(), false)
            .with(key.clone(), true);
        assert!(!router.handle_set(&batch));
        assert!(store.set(&batch).is_err());
        assert_eq!(store.value(&key), before);
    }

    #[test]
    fn test_publish_drops_unknown_ids() {
        struct Samples(AtomicUsize);
        impl StoreListener for Samples {
            fn on_sample(&self, _sample: &DataSample) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (store, dyn_store) = sidescan();
        let router = CommandRouter::attach(&dyn_store).unwrap();
        let samples = Arc::new(Samples(AtomicUsize::new(0)));
        store.connect(samples.clone());

        router.publish(DataSample::from_f32(2, 0, 1000.0, &[1.0]));
        router.publish(DataSample::from_f32(99, 0, 1000.0, &[1.0]));
        router.publish_channel("port", 1, DataSample::from_f32(0, 0, 1000.0, &[1.0]));
        router.publish_channel("port", 7, DataSample::from_f32(0, 0, 1000.0, &[1.0]));

        assert_eq!(samples.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropped_router_detaches() {
        let (store, dyn_store) = sidescan();
        let router = CommandRouter::attach(&dyn_store).unwrap();
        router.connect(Arc::new(|_: &Command| Err(Rejected::new("always"))));
        drop(router);

        let batch = ParamList::new().with(keys::tvg("port", "constant/gain"), 3.0);
        assert!(store.set(&batch).is_ok());
    }
}
