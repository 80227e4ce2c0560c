//! Recording client doubles for unit tests.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{AdminClient, ClientFactory, ConsumerClient, ProducerClient, TopicCreation};
use crate::error::ClientError;
use crate::properties::PropertyMap;
use crate::topics::NewTopic;

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingFactory {
    events: Arc<Mutex<Vec<String>>>,
    topics: Arc<Mutex<BTreeSet<String>>>,
    pub fail_subscribe: bool,
}

impl RecordingFactory {
    /// A factory whose consumers fail to subscribe.
    pub fn failing_subscribe() -> Self {
        Self {
            fail_subscribe: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn created_topics(&self) -> Vec<String> {
        self.topics.lock().unwrap().iter().cloned().collect()
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

fn render(properties: &PropertyMap) -> String {
    properties
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug)]
pub(crate) struct RecordingProducer {
    pub properties: PropertyMap,
    factory: RecordingFactory,
}

impl ProducerClient for RecordingProducer {
    fn close(&mut self) {
        self.factory.record("producer.close");
    }
}

#[derive(Debug)]
pub(crate) struct RecordingConsumer {
    pub properties: PropertyMap,
    pub subscription: Vec<String>,
    factory: RecordingFactory,
}

#[async_trait]
impl ConsumerClient for RecordingConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError> {
        self.factory
            .record(format!("consumer.subscribe {}", topics.join(",")));
        if self.factory.fail_subscribe {
            return Err(ClientError::Protocol {
                message: "subscribe refused".to_string(),
            });
        }
        self.subscription = topics.to_vec();
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.subscription.clear();
        self.factory.record("consumer.unsubscribe");
    }

    fn close(&mut self) {
        self.factory.record("consumer.close");
    }
}

#[derive(Debug)]
pub(crate) struct RecordingAdmin {
    factory: RecordingFactory,
}

#[async_trait]
impl AdminClient for RecordingAdmin {
    async fn create_topic(&self, topic: &NewTopic) -> Result<TopicCreation, ClientError> {
        self.factory.record(format!(
            "admin.create {}/{}/{}",
            topic.name, topic.partitions, topic.replication_factor
        ));
        if topic.replication_factor > 1 {
            return Err(ClientError::Rejected {
                request: "create-topic".to_string(),
                code: "InvalidReplicationFactor".to_string(),
                message: "only one broker".to_string(),
            });
        }
        let fresh = self.factory.topics.lock().unwrap().insert(topic.name.clone());
        Ok(if fresh {
            TopicCreation::Created
        } else {
            TopicCreation::AlreadyExists
        })
    }

    fn close(&mut self) {
        self.factory.record("admin.close");
    }
}

impl ClientFactory for RecordingFactory {
    type Producer = RecordingProducer;
    type Consumer = RecordingConsumer;
    type Admin = RecordingAdmin;

    fn producer(&self, properties: &PropertyMap) -> Result<Self::Producer, ClientError> {
        self.record(format!("producer.new {}", render(properties)));
        Ok(RecordingProducer {
            properties: properties.clone(),
            factory: self.clone(),
        })
    }

    fn consumer(&self, properties: &PropertyMap) -> Result<Self::Consumer, ClientError> {
        self.record(format!("consumer.new {}", render(properties)));
        Ok(RecordingConsumer {
            properties: properties.clone(),
            subscription: Vec::new(),
            factory: self.clone(),
        })
    }

    fn admin(&self, properties: &PropertyMap) -> Result<Self::Admin, ClientError> {
        self.record(format!("admin.new {}", render(properties)));
        Ok(RecordingAdmin {
            factory: self.clone(),
        })
    }
}
