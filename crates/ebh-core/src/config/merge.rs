use super::ConfigScope;
use crate::error::ConfigError;
use crate::properties::{PropertyMap, overlay};
use crate::topics::NewTopic;

/// Flat result of merging a scope chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedConfig {
    /// Broker properties; for each key the innermost definition wins.
    pub broker_properties: PropertyMap,
    /// Topic requests, outer scopes first. Duplicates are kept.
    pub topics: Vec<NewTopic>,
    /// Whether service addresses should be published.
    pub expose_addresses: bool,
}

/// Fold scopes, given outermost first, into one [`MergedConfig`].
///
/// `None` entries stand for levels without a declaration and contribute
/// nothing. The input is only read, so the same scopes can be shared by
/// concurrently running tests.
pub fn merge_scopes<'a, I>(scopes: I) -> Result<MergedConfig, ConfigError>
where
    I: IntoIterator<Item = Option<&'a ConfigScope>>,
{
    let mut merged = MergedConfig::default();
    let mut expose = None;
    for scope in scopes.into_iter().flatten() {
        overlay(&mut merged.broker_properties, &scope.properties()?);
        merged.topics.extend(scope.topics()?);
        if scope.expose_addresses.is_some() {
            expose = scope.expose_addresses;
        }
    }
    merged.expose_addresses = expose.unwrap_or(false);
    Ok(merged)
}
