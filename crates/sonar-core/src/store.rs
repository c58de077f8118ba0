//! Key/value parameter store interface and an in-process implementation

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

use crate::sample::DataSample;
use crate::schema::Schema;
use crate::value::{ParamList, ParamValue, ValueType};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Unknown key: {0}")]
    UnknownKey(String),
    #[error("Type mismatch for {key}: expected {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: ValueType,
        actual: ValueType,
    },
    #[error("Value {value} out of range for {key}")]
    OutOfRange { key: String, value: f64 },
    #[error("Key is read-only: {0}")]
    ReadOnly(String),
    #[error("Set rejected by a listener")]
    Rejected,
    #[error("Empty parameter list")]
    Empty,
    #[error("Key given more than once: {0}")]
    DuplicateKey(String),
}

/// Receiver of store notifications
///
/// All methods run synchronously on the thread that triggered them.
pub trait StoreListener: Send + Sync {
    /// Vote on a pending `set`; returning `false` rejects the whole batch
    fn on_set(&self, _params: &ParamList) -> bool {
        true
    }

    /// A `set` was committed
    fn on_changed(&self) {}

    /// A data sample was published
    fn on_sample(&self, _sample: &DataSample) {}
}

/// Handle for removing a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Hierarchical key/value registry with schema and change notifications
pub trait ParameterStore: Send + Sync {
    fn schema(&self) -> Arc<Schema>;

    /// Atomic multi-key write: either every value is committed or none is
    fn set(&self, params: &ParamList) -> Result<(), StoreError>;

    /// Atomic multi-key read
    fn get(&self, keys: &[&str]) -> Result<ParamList, StoreError>;

    /// Outbound data path
    fn publish_sample(&self, sample: &DataSample);

    fn connect(&self, listener: Arc<dyn StoreListener>) -> ListenerId;

    fn disconnect(&self, id: ListenerId);
}

/// In-memory store backed by a schema
pub struct MemoryStore {
    schema: Arc<Schema>,
    values: RwLock<HashMap<String, ParamValue>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn StoreListener>)>>,
    next_listener: AtomicU64,
}

impl MemoryStore {
    /// Create a store with every key at its schema default
    pub fn new(schema: Schema) -> Self {
        let values = schema
            .keys
            .iter()
            .map(|(k, d)| (k.clone(), d.default.clone()))
            .collect();
        Self {
            schema: Arc::new(schema),
            values: RwLock::new(values),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Device-side write: skips the access check and all notifications
    pub fn set_internal(&self, params: &ParamList) -> Result<(), StoreError> {
        check_unique(params)?;
        for (key, value) in params.iter() {
            let desc = self
                .schema
                .get(key)
                .ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;
            desc.check_value(key, value)?;
        }
        self.commit(params);
        Ok(())
    }

    /// Current value of a single key
    pub fn value(&self, key: &str) -> Option<ParamValue> {
        self.values.read().get(key).cloned()
    }

    /// Snapshot of every value, sorted by key
    pub fn snapshot(&self) -> ParamList {
        let values = self.values.read();
        let mut entries: Vec<_> = values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().collect()
    }

    fn commit(&self, params: &ParamList) {
        let mut values = self.values.write();
        for (key, value) in params.iter() {
            values.insert(key.to_string(), value.clone());
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn StoreListener>> {
        self.listeners.read().iter().map(|(_, l)| l.clone()).collect()
    }
}

fn check_unique(params: &ParamList) -> Result<(), StoreError> {
    match params.duplicate_key() {
        Some(key) => Err(StoreError::DuplicateKey(key.to_string())),
        None => Ok(()),
    }
}

impl ParameterStore for MemoryStore {
    fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    fn set(&self, params: &ParamList) -> Result<(), StoreError> {
        if params.is_empty() {
            return Err(StoreError::Empty);
        }
        check_unique(params)?;
        for (key, value) in params.iter() {
            self.schema.validate(key, value)?;
        }

        // Listeners run without any store lock held so they may read back
        let listeners = self.listeners();
        if !listeners.iter().all(|l| l.on_set(params)) {
            debug!(keys = params.len(), "Parameter set rejected by listener");
            return Err(StoreError::Rejected);
        }

        self.commit(params);
        trace!(keys = params.len(), "Parameter set committed");

        for listener in &listeners {
            listener.on_changed();
        }
        Ok(())
    }

    fn get(&self, keys: &[&str]) -> Result<ParamList, StoreError> {
        let values = self.values.read();
        keys.iter()
            .map(|key| {
                values
                    .get(*key)
                    .map(|v| (key.to_string(), v.clone()))
                    .ok_or_else(|| StoreError::UnknownKey(key.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|entries| entries.into_iter().collect())
    }

    fn publish_sample(&self, sample: &DataSample) {
        for listener in self.listeners() {
            listener.on_sample(sample);
        }
    }

    fn connect(&self, listener: Arc<dyn StoreListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    fn disconnect(&self, id: ListenerId) {
        self.listeners.write().retain(|(lid, _)| *lid != id);
    }
}
