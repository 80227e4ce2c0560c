use serde::{Deserialize, Serialize};

use super::merge::{MergedConfig, merge_scopes};
use crate::error::ConfigError;
use crate::properties::{PropertyMap, parse_properties};
use crate::topics::NewTopic;

pub const DEFAULT_TOPIC_PARTITIONS: i32 = 1;
pub const DEFAULT_TOPIC_REPLICATION_FACTOR: i16 = 1;

/// Configuration declared at one nesting level.
///
/// Deserializable so that scopes can be kept as data next to the tests:
///
/// ```toml
/// broker_properties = ["auto.create.topics.enable=false"]
/// expose_addresses = true
/// create_topics = ["orders", "payments"]
/// topic_partitions = 3
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigScope {
    /// Broker properties as `key=value` entries.
    pub broker_properties: Vec<String>,
    /// Publish the service addresses to the caller's address sink.
    /// `None` leaves the decision to an outer scope.
    pub expose_addresses: Option<bool>,
    /// Topics to create once the broker is running.
    pub create_topics: Vec<String>,
    /// Partition count for this scope's topics.
    pub topic_partitions: i32,
    /// Replication factor for this scope's topics.
    pub topic_replication_factor: i16,
}

impl Default for ConfigScope {
    fn default() -> Self {
        Self {
            broker_properties: Vec::new(),
            expose_addresses: None,
            create_topics: Vec::new(),
            topic_partitions: DEFAULT_TOPIC_PARTITIONS,
            topic_replication_factor: DEFAULT_TOPIC_REPLICATION_FACTOR,
        }
    }
}

impl ConfigScope {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::InvalidScope {
            message: e.to_string(),
        })
    }

    pub fn with_broker_property(mut self, entry: impl Into<String>) -> Self {
        self.broker_properties.push(entry.into());
        self
    }

    pub fn with_topic(mut self, name: impl Into<String>) -> Self {
        self.create_topics.push(name.into());
        self
    }

    pub fn with_topic_layout(mut self, partitions: i32, replication_factor: i16) -> Self {
        self.topic_partitions = partitions;
        self.topic_replication_factor = replication_factor;
        self
    }

    pub fn exposing_addresses(mut self, expose: bool) -> Self {
        self.expose_addresses = Some(expose);
        self
    }

    /// Parsed broker properties of this scope alone.
    pub fn properties(&self) -> Result<PropertyMap, ConfigError> {
        parse_properties(&self.broker_properties)
    }

    /// Topic requests of this scope, in declaration order.
    pub fn topics(&self) -> Result<Vec<NewTopic>, ConfigError> {
        if self.create_topics.is_empty() {
            return Ok(Vec::new());
        }
        if self.topic_partitions < 1 {
            return Err(ConfigError::InvalidScope {
                message: format!("topic_partitions must be >= 1, got {}", self.topic_partitions),
            });
        }
        if self.topic_replication_factor < 1 {
            return Err(ConfigError::InvalidScope {
                message: format!(
                    "topic_replication_factor must be >= 1, got {}",
                    self.topic_replication_factor
                ),
            });
        }
        self.create_topics
            .iter()
            .map(|name| {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ConfigError::InvalidScope {
                        message: "topic names must not be empty".to_string(),
                    });
                }
                Ok(NewTopic::new(
                    name,
                    self.topic_partitions,
                    self.topic_replication_factor,
                ))
            })
            .collect()
    }
}

/// Scopes applicable to one test invocation, outermost first.
///
/// A level without any declaration is `None` and merges as an empty scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeChain {
    levels: Vec<Option<ConfigScope>>,
}

impl ScopeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the innermost-first order a test runner reports.
    pub fn from_innermost_first<I>(levels: I) -> Self
    where
        I: IntoIterator<Item = Option<ConfigScope>>,
    {
        let mut levels: Vec<_> = levels.into_iter().collect();
        levels.reverse();
        Self { levels }
    }

    /// Append a level nested inside the current innermost one.
    pub fn nest(mut self, scope: Option<ConfigScope>) -> Self {
        self.levels.push(scope);
        self
    }

    pub fn levels(&self) -> &[Option<ConfigScope>] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn merge(&self) -> Result<MergedConfig, ConfigError> {
        merge_scopes(self.levels.iter().map(Option::as_ref))
    }
}
