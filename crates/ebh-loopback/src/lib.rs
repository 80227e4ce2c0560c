//! In-process loopback services for `embedded-broker-harness-core`.
//!
//! [`LoopbackCoordination`] and [`LoopbackBroker`] implement the core
//! [`EmbeddedServer`](embedded_broker_harness_core::lifecycle::EmbeddedServer)
//! boundary over local TCP, and [`LoopbackClients`] is the matching
//! [`ClientFactory`](embedded_broker_harness_core::client::ClientFactory).
//! Together they run the full stack without external binaries.

pub mod broker;
pub mod client;
pub mod coordination;
pub mod protocol;
pub mod record;
pub mod server;

pub use broker::{BrokerProcess, LoopbackBroker, OffsetReset};
pub use client::{LoopbackAdmin, LoopbackClients, LoopbackConsumer, LoopbackProducer};
pub use coordination::{CoordinationProcess, LoopbackCoordination};
pub use record::{ConsumerRecord, FromPayload, RecordMetadata, ToPayload, Value};

use embedded_broker_harness_core::EmbeddedSession;

/// A session running the loopback services.
pub type LoopbackSession = EmbeddedSession<LoopbackCoordination, LoopbackBroker, LoopbackClients>;
