//! Preset id translation between a proxy and its upstream device

use std::collections::HashMap;

use sonar_core::{keys, Schema};
use tracing::debug;

/// Per-source table of downstream preset id to upstream preset id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetRemap {
    tables: HashMap<String, HashMap<i64, i64>>,
}

impl PresetRemap {
    /// Match preset enumeration entries by name
    pub fn build(upstream: &Schema, downstream: &Schema) -> Self {
        let mut tables = HashMap::new();

        for source in keys::source_names(downstream.keys_with_prefix("/sources/")) {
            let key = keys::generator(&source, "preset/id");
            let (Some(down), Some(up)) = (downstream.get(&key), upstream.get(&key)) else {
                continue;
            };

            let table: HashMap<i64, i64> = down
                .enum_values
                .iter()
                .filter_map(|entry| up.enum_id(&entry.name).map(|up_id| (entry.id, up_id)))
                .collect();
            if table.len() < down.enum_values.len() {
                debug!(source = %source, "Some presets have no upstream counterpart");
            }
            tables.insert(source, table);
        }

        Self { tables }
    }

    pub fn to_upstream(&self, source: &str, preset: i64) -> Option<i64> {
        self.tables.get(source)?.get(&preset).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(HashMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_core::{EnumValue, KeyDescriptor};

    fn with_presets(values: Vec<EnumValue>) -> Schema {
        let mut schema = Schema::sonar();
        let default = values.first().map(|v| v.id).unwrap_or(0);
        schema.insert(
            keys::generator("port", "preset/id"),
            KeyDescriptor::enumeration(default, values),
        );
        schema
    }

    #[test]
    fn test_presets_matched_by_name() {
        let upstream = with_presets(vec![
            EnumValue::new(10, "short"),
            EnumValue::new(20, "long"),
            EnumValue::new(30, "factory"),
        ]);
        let downstream = with_presets(vec![EnumValue::new(1, "long"), EnumValue::new(2, "short")]);

        let remap = PresetRemap::build(&upstream, &downstream);
        assert_eq!(remap.to_upstream("port", 1), Some(20));
        assert_eq!(remap.to_upstream("port", 2), Some(10));
        assert_eq!(remap.to_upstream("port", 3), None);
        assert_eq!(remap.to_upstream("starboard", 1), None);
    }

    #[test]
    fn test_unmatched_names_dropped() {
        let upstream = with_presets(vec![EnumValue::new(1, "a")]);
        let downstream = with_presets(vec![EnumValue::new(1, "b")]);
        assert!(PresetRemap::build(&upstream, &downstream).is_empty());
    }
}
