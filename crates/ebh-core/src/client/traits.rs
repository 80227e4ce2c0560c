//! Boundary to the pre-built clients.
//!
//! Clients are constructed from a flat property map. Construction and
//! cleanup are synchronous so that cleanup can run from `Drop`; only the
//! operations that talk to the broker are async.

use async_trait::async_trait;

use crate::error::ClientError;
use crate::properties::PropertyMap;
use crate::topics::NewTopic;

/// Outcome of a create-topic call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicCreation {
    Created,
    AlreadyExists,
}

/// Administrative client.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Create `topic`; an existing topic is reported, not an error.
    async fn create_topic(&self, topic: &NewTopic) -> Result<TopicCreation, ClientError>;

    fn close(&mut self);
}

/// Producer-role client.
pub trait ProducerClient: Send + 'static {
    fn close(&mut self);
}

/// Consumer-role client.
#[async_trait]
pub trait ConsumerClient: Send + 'static {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError>;

    fn unsubscribe(&mut self);

    fn close(&mut self);
}

/// Builds the three client kinds from property maps.
pub trait ClientFactory: Send + Sync + 'static {
    type Producer: ProducerClient;
    type Consumer: ConsumerClient;
    type Admin: AdminClient;

    fn producer(&self, properties: &PropertyMap) -> Result<Self::Producer, ClientError>;

    fn consumer(&self, properties: &PropertyMap) -> Result<Self::Consumer, ClientError>;

    fn admin(&self, properties: &PropertyMap) -> Result<Self::Admin, ClientError>;
}
