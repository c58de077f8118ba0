//! Downstream schema derivation

use sonar_core::{keys, IdAllocator, KeyDescriptor, ParamValue, Schema, SensorPortType};

/// Sensor keys that only exist on physical ports
const PHYSICAL_PORT_FIELDS: [&str; 5] = ["protocol", "uart-device", "uart-mode", "ip-address", "udp-port"];

/// Reduced schema for computed mode
///
/// Every sensor port becomes virtual, every source keeps a single acoustic
/// channel, data ids are allocated afresh (ports first, then sources, both
/// in name order) and preset enumerations are renumbered from 1.
pub fn computed_schema(upstream: &Schema) -> Schema {
    let mut schema = upstream.clone();
    let mut ids = IdAllocator::new();

    for port in keys::sensor_names(upstream.keys_with_prefix("/sensors/")) {
        for field in PHYSICAL_PORT_FIELDS {
            schema.remove(&keys::sensor(&port, field));
        }

        let type_key = keys::sensor(&port, "type");
        if let Some(mut desc) = schema.get(&type_key).cloned() {
            desc.default = ParamValue::Enum(SensorPortType::Virtual.id());
            schema.insert(type_key, desc);
        }

        let id_key = keys::sensor(&port, "id");
        if schema.contains(&id_key) {
            schema.insert(id_key, KeyDescriptor::int(ids.next_id() as i64).read_only());
        }
    }

    for source in keys::source_names(upstream.keys_with_prefix("/sources/")) {
        let prefix = format!("{}/{}/channels/", keys::SOURCES, source);
        let channels: Vec<String> = upstream
            .keys_with_prefix(&prefix)
            .map(str::to_string)
            .collect();
        if !channels.is_empty() {
            for key in &channels {
                schema.remove(key);
            }
            schema.insert(
                keys::channel_id(&source, 1),
                KeyDescriptor::int(ids.next_id() as i64).read_only(),
            );
        }

        let preset_key = keys::generator(&source, "preset/id");
        if let Some(mut desc) = schema.get(&preset_key).cloned() {
            for (i, entry) in desc.enum_values.iter_mut().enumerate() {
                entry.id = i as i64 + 1;
            }
            desc.default = ParamValue::Enum(desc.enum_values.first().map(|v| v.id).unwrap_or(0));
            schema.insert(preset_key, desc);
        }
    }

    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_core::builder::sample_sidescan;
    use sonar_core::{ChannelBinding, EnumValue, SchemaBuilder};

    fn upstream() -> Schema {
        let mut desc = sample_sidescan();
        desc.sources[0].channels = 3;
        SchemaBuilder::from_description(&desc, &mut IdAllocator::starting_at(40))
    }

    #[test]
    fn test_ports_become_virtual() {
        let schema = computed_schema(&upstream());
        assert_eq!(
            schema.get(&keys::sensor("gps", "type")).unwrap().default,
            ParamValue::Enum(SensorPortType::Virtual.id())
        );
        assert!(!schema.contains(&keys::sensor("gps", "uart-device")));
        assert!(schema.contains(&keys::sensor("gps", "time-offset")));
    }

    #[test]
    fn test_one_channel_per_source_with_fresh_ids() {
        let schema = computed_schema(&upstream());
        assert!(!schema.contains(&keys::channel_id("starboard", 2)));

        let binding = ChannelBinding::from_schema(&schema);
        assert_eq!(binding.len(), 3);
        assert_eq!(binding.id_of("gps", 0), Some(1));
        assert_eq!(binding.id_of("port", 1), Some(2));
        assert_eq!(binding.id_of("starboard", 1), Some(3));
        assert!(schema.check_sonar().is_ok());
    }

    #[test]
    fn test_presets_renumbered() {
        let mut up = upstream();
        let key = keys::generator("port", "preset/id");
        up.insert(
            key.clone(),
            KeyDescriptor::enumeration(7, vec![EnumValue::new(7, "short"), EnumValue::new(9, "long")]),
        );

        let schema = computed_schema(&up);
        let presets = &schema.get(&key).unwrap().enum_values;
        assert_eq!(presets, &vec![EnumValue::new(1, "short"), EnumValue::new(2, "long")]);
        assert_eq!(schema.get(&key).unwrap().default, ParamValue::Enum(1));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let up = upstream();
        assert_eq!(computed_schema(&up), computed_schema(&up));
    }
}
