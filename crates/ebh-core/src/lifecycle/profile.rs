//! How each kind of service turns acquired resources into server properties.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;

use super::LifecycleState;
use crate::error::{LifecycleError, ServerError};
use crate::properties::{PropertyMap, overlay};

/// Property keys understood by the external services.
pub mod keys {
    /// Coordination service: port clients connect to.
    pub const CLIENT_PORT: &str = "clientPort";
    /// Coordination service: transaction log directory.
    pub const DATA_LOG_DIR: &str = "dataLogDir";
    /// Coordination service: snapshot directory.
    pub const DATA_DIR: &str = "dataDir";
    /// Coordination service: interval of the container sweeper helper.
    pub const CONTAINER_CHECK_INTERVAL_MS: &str = "znode.container.checkIntervalMs";
    /// Coordination service: max container nodes removed per minute.
    pub const CONTAINER_MAX_PER_MINUTE: &str = "znode.container.maxPerMinute";

    /// Broker: address of the coordination service.
    pub const ZOOKEEPER_CONNECT: &str = "zookeeper.connect";
    /// Broker: listener address.
    pub const LISTENERS: &str = "listeners";
    /// Broker: log directory.
    pub const LOG_DIR: &str = "log.dir";
    /// Broker: replication factor of the internal offsets topic.
    pub const OFFSETS_TOPIC_REPLICATION_FACTOR: &str = "offsets.topic.replication.factor";

    /// Clients: broker address.
    pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
    pub const KEY_SERIALIZER: &str = "key.serializer";
    pub const VALUE_SERIALIZER: &str = "value.serializer";
    pub const KEY_DESERIALIZER: &str = "key.deserializer";
    pub const VALUE_DESERIALIZER: &str = "value.deserializer";
    pub const GROUP_ID: &str = "group.id";
    pub const AUTO_OFFSET_RESET: &str = "auto.offset.reset";
    pub const CLIENT_ID: &str = "client.id";
}

/// A bound `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Directed Broker → Coordination edge.
///
/// Carries a live view of the coordination controller's state so the
/// coordination address can only be read while that service is running.
#[derive(Debug, Clone)]
pub struct DependencyLink {
    service: String,
    state: watch::Receiver<LifecycleState>,
    endpoint: Arc<OnceLock<Endpoint>>,
}

impl DependencyLink {
    pub(crate) fn new(
        service: String,
        state: watch::Receiver<LifecycleState>,
        endpoint: Arc<OnceLock<Endpoint>>,
    ) -> Self {
        Self {
            service,
            state,
            endpoint,
        }
    }

    /// Name of the service this link points at.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Address of the dependency; fails unless it is running right now.
    pub fn resolve(&self) -> Result<Endpoint, LifecycleError> {
        let state = *self.state.borrow();
        match (state, self.endpoint.get()) {
            (LifecycleState::Running, Some(endpoint)) => Ok(endpoint.clone()),
            _ => Err(LifecycleError::DependencyNotRunning {
                service: self.service.clone(),
                state,
            }),
        }
    }
}

/// The two kinds of service a controller can manage.
#[derive(Debug, Clone)]
pub enum ServiceProfile {
    /// The coordination service the broker depends on.
    Coordination {
        /// Extra server properties; managed keys always win.
        extra: PropertyMap,
    },
    /// The broker, configured to point at a running coordination service.
    Broker {
        dependency: DependencyLink,
        /// Extra broker properties; managed keys always win.
        extra: PropertyMap,
    },
}

impl ServiceProfile {
    pub fn coordination() -> Self {
        Self::Coordination {
            extra: PropertyMap::new(),
        }
    }

    pub fn broker(dependency: DependencyLink, extra: PropertyMap) -> Self {
        Self::Broker { dependency, extra }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Coordination { .. } => "coordination",
            Self::Broker { .. } => "broker",
        }
    }

    /// Prefixes of the directories acquired for this service, in the order
    /// they are passed to [`Self::server_properties`].
    pub fn dir_prefixes(&self) -> &'static [&'static str] {
        match self {
            Self::Coordination { .. } => &["zookeeper-log", "zookeeper-data"],
            Self::Broker { .. } => &["kafka"],
        }
    }

    /// Build the server property map from the acquired resources.
    pub fn server_properties(
        &self,
        endpoint: &Endpoint,
        dirs: &[PathBuf],
    ) -> Result<PropertyMap, ServerError> {
        let dir = |index: usize| -> Result<String, ServerError> {
            dirs.get(index)
                .map(|path| canonical(path))
                .ok_or_else(|| {
                    ServerError::config(format!(
                        "{} needs {} directories, got {}",
                        self.name(),
                        self.dir_prefixes().len(),
                        dirs.len()
                    ))
                })
        };

        match self {
            Self::Coordination { extra } => {
                let mut properties = extra.clone();
                properties.insert(keys::CLIENT_PORT.to_string(), endpoint.port.to_string());
                properties.insert(keys::DATA_LOG_DIR.to_string(), dir(0)?);
                properties.insert(keys::DATA_DIR.to_string(), dir(1)?);
                Ok(properties)
            }
            Self::Broker { dependency, extra } => {
                let coordination = dependency.resolve().map_err(|e| ServerError::Dependency {
                    message: e.to_string(),
                })?;
                let mut managed = PropertyMap::new();
                managed.insert(keys::ZOOKEEPER_CONNECT.to_string(), coordination.to_string());
                managed.insert(
                    keys::LISTENERS.to_string(),
                    format!("PLAINTEXT://{endpoint}"),
                );
                managed.insert(keys::LOG_DIR.to_string(), dir(0)?);
                managed.insert(
                    keys::OFFSETS_TOPIC_REPLICATION_FACTOR.to_string(),
                    "1".to_string(),
                );
                let mut properties = extra.clone();
                overlay(&mut properties, &managed);
                Ok(properties)
            }
        }
    }
}

fn canonical(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
