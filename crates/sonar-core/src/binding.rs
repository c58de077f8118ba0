//! Mapping between semantic channels and numeric data ids

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::keys;
use crate::schema::Schema;

/// A semantic channel: a source (or sensor port) and a channel index
///
/// Sensor ports have a single channel with index 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelRef {
    pub device: String,
    pub index: u32,
}

impl ChannelRef {
    pub fn new(device: impl Into<String>, index: u32) -> Self {
        Self {
            device: device.into(),
            index,
        }
    }

    pub fn is_sensor(&self) -> bool {
        self.index == 0
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.device, self.index)
    }
}

/// Bidirectional channel ↔ numeric id table, read-only after construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelBinding {
    by_id: BTreeMap<u32, ChannelRef>,
    by_channel: BTreeMap<ChannelRef, u32>,
}

impl ChannelBinding {
    /// Collect every `/sources/*/channels/*/id` and `/sensors/*/id` key
    pub fn from_schema(schema: &Schema) -> Self {
        let mut binding = Self::default();

        for (key, desc) in &schema.keys {
            let Some(id) = desc.default.as_i64() else {
                continue;
            };
            let Ok(id) = u32::try_from(id) else {
                continue;
            };

            let parts = keys::segments(key);
            let channel = match parts.as_slice() {
                ["sources", source, "channels", index, "id"] => match index.parse::<u32>() {
                    Ok(index) if index > 0 => ChannelRef::new(*source, index),
                    _ => continue,
                },
                ["sensors", port, "id"] => ChannelRef::new(*port, 0),
                _ => continue,
            };

            binding.insert(channel, id);
        }

        binding
    }

    fn insert(&mut self, channel: ChannelRef, id: u32) {
        if let Some(previous) = self.by_id.get(&id) {
            tracing::warn!(id = id, first = %previous, second = %channel, "Duplicate data id in schema, keeping first");
            return;
        }
        self.by_channel.insert(channel.clone(), id);
        self.by_id.insert(id, channel);
    }

    pub fn channel(&self, id: u32) -> Option<&ChannelRef> {
        self.by_id.get(&id)
    }

    pub fn id(&self, channel: &ChannelRef) -> Option<u32> {
        self.by_channel.get(channel).copied()
    }

    pub fn id_of(&self, device: &str, index: u32) -> Option<u32> {
        self.id(&ChannelRef::new(device, index))
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &ChannelRef)> {
        self.by_id.iter().map(|(id, ch)| (*id, ch))
    }
}
