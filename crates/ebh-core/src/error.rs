//! Error types shared across the harness.
//!
//! The taxonomy follows what callers need to react to:
//!
//! - [`ServerError`]: reported by an external service implementation
//! - [`LifecycleError`]: a controller was driven through an invalid transition
//! - [`ConfigError`]: a declaration or test parameter could not be interpreted
//! - [`ClientError`]: a pre-built client failed to construct or talk to a service
//! - [`HarnessError`]: the umbrella returned by orchestration-level operations

use std::sync::Arc;
use std::time::Duration;

use crate::lifecycle::LifecycleState;

/// Error reported by an embedded server implementation.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid server configuration: {message}")]
    Config { message: String },

    #[error("dependency unavailable: {message}")]
    Dependency { message: String },

    #[error("server startup failed: {message}")]
    Startup {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("server shutdown failed: {message}")]
    Shutdown {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
            source: None,
        }
    }

    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::Shutdown {
            message: message.into(),
            source: None,
        }
    }
}

/// A sub-component that failed to stop cleanly.
///
/// Faults never abort teardown. They are logged when they happen and kept so
/// that callers who care can inspect them afterwards.
#[derive(Debug, Clone)]
pub struct ShutdownFault {
    /// Service the component belongs to (e.g. `"coordination"`).
    pub service: String,
    /// Component that failed (e.g. `"acceptor"`, `"database"`).
    pub component: String,
    /// Rendered error message.
    pub message: String,
}

impl std::fmt::Display for ShutdownFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.service, self.component, self.message)
    }
}

/// Misuse of a [`ServiceController`](crate::lifecycle::ServiceController).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("service '{service}' cannot be started from state {state}")]
    AlreadyStarted {
        service: String,
        state: LifecycleState,
    },

    #[error("service '{service}' has not been started")]
    NotStarted { service: String },

    #[error("service '{service}' is {state}, not running")]
    NotRunning {
        service: String,
        state: LifecycleState,
    },

    #[error("dependency '{service}' is not running (state {state})")]
    DependencyNotRunning {
        service: String,
        state: LifecycleState,
    },

    #[error("no async runtime available to drive service '{service}'")]
    NoRuntime { service: String },
}

/// Configuration that cannot be interpreted unambiguously.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("malformed property '{entry}': expected key=value")]
    MalformedProperty { entry: String },

    #[error(
        "parameter '{parameter}' cannot be annotated with both the producer and the consumer role"
    )]
    ConflictingRoles { parameter: String },

    #[error(
        "parameter '{parameter}' of type {shape} is ambiguous; annotate it with the producer or consumer role"
    )]
    AmbiguousRole { parameter: String, shape: String },

    #[error("parameter '{parameter}' is a {shape} but is annotated with the {role} role")]
    RoleMismatch {
        parameter: String,
        shape: String,
        role: &'static str,
    },

    #[error(
        "could not determine the {kind} class for {type_description} of parameter '{parameter}', \
         please specify it explicitly in the {role} annotation"
    )]
    UnknownCodec {
        parameter: String,
        kind: &'static str,
        role: &'static str,
        type_description: String,
    },

    #[error("invalid scope declaration: {message}")]
    InvalidScope { message: String },
}

/// Error raised by a pre-built client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("missing required client property '{key}'")]
    MissingProperty { key: String },

    #[error("invalid client property '{key}': {message}")]
    InvalidProperty { key: String, message: String },

    #[error("connection to {address} failed: {source}")]
    Connection {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request '{request}' rejected with {code}: {message}")]
    Rejected {
        request: String,
        code: String,
        message: String,
    },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("{codec} cannot handle {found}")]
    Serialization { codec: String, found: String },

    #[error("client is closed")]
    Closed,
}

/// Umbrella error for harness-level operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("bootstrap of service '{service}' failed: {source}")]
    Bootstrap {
        service: String,
        #[source]
        source: Arc<ServerError>,
    },

    #[error("shutdown of service '{service}' failed: {source}")]
    Shutdown {
        service: String,
        #[source]
        source: Arc<ServerError>,
    },

    #[error("timed out after {waited:?} waiting for service '{service}' to reach {target}")]
    Timeout {
        service: String,
        target: LifecycleState,
        waited: Duration,
    },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),
}
