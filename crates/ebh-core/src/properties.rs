//! Flat string property maps, the lingua franca between scopes, servers and clients.

use std::collections::BTreeMap;

use crate::error::ConfigError;

/// Ordered `key → value` map. Ordering keeps logs and snapshots stable.
pub type PropertyMap = BTreeMap<String, String>;

/// Parse a list of `key=value` entries into a map.
///
/// Splits at the first `=`, so values may themselves contain `=`. Keys are
/// trimmed; values are kept verbatim. Later entries win on duplicate keys.
pub fn parse_properties<I, S>(entries: I) -> Result<PropertyMap, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut map = PropertyMap::new();
    for entry in entries {
        let entry = entry.as_ref();
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedProperty {
                entry: entry.to_string(),
            })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::MalformedProperty {
                entry: entry.to_string(),
            });
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

/// Overlay `layer` onto `base`; entries from `layer` win.
pub fn overlay(base: &mut PropertyMap, layer: &PropertyMap) {
    for (key, value) in layer {
        base.insert(key.clone(), value.clone());
    }
}
