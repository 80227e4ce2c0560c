//! Declarative topic creation against a running broker.

use tracing::{debug, info};

use crate::client::{AdminClient, ClientFactory, TopicCreation};
use crate::error::HarnessError;
use crate::lifecycle::keys;
use crate::properties::PropertyMap;

/// One create-if-absent request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewTopic {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i16,
}

impl NewTopic {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i16) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
        }
    }
}

/// Create every topic in order through an admin client pointed at
/// `bootstrap_servers`. Topics that already exist count as created.
///
/// The admin client is closed on every path.
pub async fn provision_topics<F: ClientFactory>(
    factory: &F,
    bootstrap_servers: &str,
    topics: &[NewTopic],
) -> Result<(), HarnessError> {
    if topics.is_empty() {
        return Ok(());
    }
    let mut properties = PropertyMap::new();
    properties.insert(
        keys::BOOTSTRAP_SERVERS.to_string(),
        bootstrap_servers.to_string(),
    );
    let mut admin = factory.admin(&properties)?;

    let mut outcome = Ok(());
    for topic in topics {
        match admin.create_topic(topic).await {
            Ok(TopicCreation::Created) => info!(
                "Created topic {} ({} partition(s), replication factor {})",
                topic.name, topic.partitions, topic.replication_factor
            ),
            Ok(TopicCreation::AlreadyExists) => {
                debug!("Topic {} already exists", topic.name)
            }
            Err(e) => {
                outcome = Err(e.into());
                break;
            }
        }
    }
    admin.close();
    outcome
}
