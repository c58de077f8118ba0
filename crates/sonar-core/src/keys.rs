//! Key paths of the sonar parameter tree
//!
//! Every component addresses the store through these helpers so the layout
//! lives in one place.

pub const SCHEMA_ID: &str = "/schema/id";
pub const SCHEMA_VERSION: &str = "/schema/version";

pub const INFO_MODEL: &str = "/info/model";
pub const INFO_SERIAL: &str = "/info/serial";

pub const SENSORS: &str = "/sensors";
pub const SOURCES: &str = "/sources";

pub const SYNC_CAPABILITIES: &str = "/sonar/sync/capabilities";
pub const SYNC_TYPE: &str = "/sonar/sync/type";
pub const START_PROJECT: &str = "/sonar/control/start/project";
pub const START_TRACK: &str = "/sonar/control/start/track";
pub const START_TRACK_TYPE: &str = "/sonar/control/start/track-type";
pub const STOP: &str = "/sonar/control/stop";
pub const PING: &str = "/sonar/control/ping";
pub const ALIVE: &str = "/sonar/alive";
pub const ALIVE_TIMEOUT: &str = "/sonar/alive-timeout";

/// `/sensors/<port>/<field>`
pub fn sensor(port: &str, field: &str) -> String {
    format!("{}/{}/{}", SENSORS, port, field)
}

/// `/sensors/<port>/position/<axis>`
pub fn sensor_position(port: &str, axis: &str) -> String {
    format!("{}/{}/position/{}", SENSORS, port, axis)
}

/// `/sources/<source>/channels/<index>/id`
pub fn channel_id(source: &str, index: u32) -> String {
    format!("{}/{}/channels/{}/id", SOURCES, source, index)
}

/// `/sources/<source>/antenna/<field>`
pub fn antenna(source: &str, field: &str) -> String {
    format!("{}/{}/antenna/{}", SOURCES, source, field)
}

/// `/sources/<source>/generator/<field>`
pub fn generator(source: &str, field: &str) -> String {
    format!("{}/{}/generator/{}", SOURCES, source, field)
}

/// `/sources/<source>/tvg/<field>`
pub fn tvg(source: &str, field: &str) -> String {
    format!("{}/{}/tvg/{}", SOURCES, source, field)
}

/// `/sources/<source>/receiver/<field>`
pub fn receiver(source: &str, field: &str) -> String {
    format!("{}/{}/receiver/{}", SOURCES, source, field)
}

/// Split a key into its non-empty path segments
pub fn segments(key: &str) -> Vec<&str> {
    key.split('/').filter(|s| !s.is_empty()).collect()
}

/// Source names present in a key set, in sorted order
pub fn source_names<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    names_under(keys, "sources")
}

/// Sensor port names present in a key set, in sorted order
pub fn sensor_names<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    names_under(keys, "sensors")
}

fn names_under<'a>(keys: impl Iterator<Item = &'a str>, root: &str) -> Vec<String> {
    let mut names: Vec<String> = keys
        .filter_map(|key| {
            let parts = segments(key);
            match parts.as_slice() {
                [first, name, _, ..] if *first == root => Some(name.to_string()),
                _ => None,
            }
        })
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builders() {
        assert_eq!(generator("starboard", "simple/power"), "/sources/starboard/generator/simple/power");
        assert_eq!(channel_id("port", 2), "/sources/port/channels/2/id");
        assert_eq!(sensor_position("gps", "z"), "/sensors/gps/position/z");
    }

    #[test]
    fn test_source_names() {
        let keys = [
            "/sources/starboard/generator/enable",
            "/sources/port/tvg/enable",
            "/sources/port/channels/1/id",
            "/sensors/gps/enable",
            "/schema/id",
        ];
        assert_eq!(source_names(keys.iter().copied()), vec!["port", "starboard"]);
        assert_eq!(sensor_names(keys.iter().copied()), vec!["gps"]);
    }
}
