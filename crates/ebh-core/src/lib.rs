//! Embedded coordination service and broker for tests.
//!
//! This crate drives the lifecycle of an embedded coordination service and
//! a broker that depends on it, merges configuration declared at several
//! nesting levels, creates topics, and resolves producer/consumer clients
//! for test parameters.
//!
//! The services and clients themselves sit behind traits
//! ([`lifecycle::EmbeddedServer`], [`client::ClientFactory`]); the
//! `embedded-broker-harness-loopback` crate provides an in-process
//! implementation of both.

pub mod client;
pub mod config;
pub mod error;
pub mod exposure;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
pub mod properties;
pub mod session;
pub mod support;
pub mod topics;

pub use config::{ConfigScope, MergedConfig, ScopeChain};
pub use error::{
    ClientError, ConfigError, HarnessError, LifecycleError, ServerError, ShutdownFault,
};
pub use exposure::{AddressRegistry, AddressSink};
pub use lifecycle::{LifecycleState, ServiceController, keys};
pub use orchestrator::{EmbeddedStack, StackSettings, TeardownReport};
pub use properties::PropertyMap;
pub use session::{EmbeddedSession, SessionOptions};
pub use topics::{NewTopic, provision_topics};
