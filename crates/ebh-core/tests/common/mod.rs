//! Scripted servers and clients shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use embedded_broker_harness_core::client::{
    AdminClient, ClientFactory, ConsumerClient, ProducerClient, TopicCreation,
};
use embedded_broker_harness_core::lifecycle::{
    EmbeddedServer, ServerProcess, ShutdownOutcome, keys,
};
use embedded_broker_harness_core::{ClientError, NewTopic, PropertyMap, ServerError};
use tokio::net::{TcpListener, TcpStream};

/// Ordered record of what the doubles observed.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.events().iter().position(|e| e.starts_with(prefix))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Coordination,
    Broker,
}

/// A server that binds a real listener on the port it is configured with.
///
/// The broker variant connects to `zookeeper.connect` before binding, so a
/// launch only succeeds against a coordination server that is listening.
#[derive(Debug, Clone)]
pub struct ScriptedServer {
    pub kind: Kind,
    pub log: EventLog,
    pub fail_launch: bool,
    pub launch_delay: Option<Duration>,
    pub failing_components: Vec<&'static str>,
    pub seen: Arc<Mutex<Option<PropertyMap>>>,
}

impl ScriptedServer {
    pub fn coordination(log: &EventLog) -> Self {
        Self::new(Kind::Coordination, log)
    }

    pub fn broker(log: &EventLog) -> Self {
        Self::new(Kind::Broker, log)
    }

    fn new(kind: Kind, log: &EventLog) -> Self {
        Self {
            kind,
            log: log.clone(),
            fail_launch: false,
            launch_delay: None,
            failing_components: Vec::new(),
            seen: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn slow_launch(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    pub fn failing_component(mut self, component: &'static str) -> Self {
        self.failing_components.push(component);
        self
    }

    pub fn properties(&self) -> Option<PropertyMap> {
        self.seen.lock().unwrap().clone()
    }

    fn name(&self) -> &'static str {
        match self.kind {
            Kind::Coordination => "coordination",
            Kind::Broker => "broker",
        }
    }

    fn port(&self, properties: &PropertyMap) -> Result<u16, ServerError> {
        let raw = match self.kind {
            Kind::Coordination => properties.get(keys::CLIENT_PORT).cloned(),
            Kind::Broker => properties
                .get(keys::LISTENERS)
                .and_then(|l| l.rsplit(':').next().map(str::to_string)),
        };
        raw.and_then(|p| p.parse().ok())
            .ok_or_else(|| ServerError::config("no port configured"))
    }
}

pub struct ScriptedProcess {
    name: &'static str,
    log: EventLog,
    listener: Option<TcpListener>,
    failing_components: Vec<&'static str>,
}

impl EmbeddedServer for ScriptedServer {
    type Process = ScriptedProcess;

    async fn launch(&self, properties: &PropertyMap) -> Result<ScriptedProcess, ServerError> {
        *self.seen.lock().unwrap() = Some(properties.clone());
        self.log.push(format!("{}.launch", self.name()));
        if let Some(delay) = self.launch_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_launch {
            return Err(ServerError::startup(format!("{} refused to boot", self.name())));
        }
        if self.kind == Kind::Broker {
            let connect = properties
                .get(keys::ZOOKEEPER_CONNECT)
                .ok_or_else(|| ServerError::config("zookeeper.connect missing"))?;
            TcpStream::connect(connect.as_str())
                .await
                .map_err(|e| ServerError::io(format!("connecting to {connect}"), e))?;
            self.log.push(format!("broker.connected {connect}"));
        }
        let port = self.port(properties)?;
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| ServerError::io("binding listener", e))?;
        self.log.push(format!("{}.bound {port}", self.name()));
        Ok(ScriptedProcess {
            name: self.name(),
            log: self.log.clone(),
            listener: Some(listener),
            failing_components: self.failing_components.clone(),
        })
    }
}

impl ServerProcess for ScriptedProcess {
    async fn shutdown(&mut self) -> ShutdownOutcome {
        let mut outcome = ShutdownOutcome::new();
        self.listener.take();
        for component in ["acceptor", "helpers", "database"] {
            let result = if self.failing_components.contains(&component) {
                Err(ServerError::shutdown(format!("{component} did not stop")))
            } else {
                Ok(())
            };
            outcome.record(component, result);
        }
        self.log.push(format!("{}.shutdown", self.name));
        outcome
    }
}

// ============================================================================
// Clients
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct StubFactory {
    pub log: EventLog,
    pub topics: Arc<Mutex<BTreeSet<String>>>,
}

pub struct StubProducer {
    pub properties: PropertyMap,
    log: EventLog,
}

impl ProducerClient for StubProducer {
    fn close(&mut self) {
        self.log.push("producer.close");
    }
}

pub struct StubConsumer {
    pub properties: PropertyMap,
    log: EventLog,
}

#[async_trait]
impl ConsumerClient for StubConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError> {
        self.log.push(format!("consumer.subscribe {}", topics.join(",")));
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.log.push("consumer.unsubscribe");
    }

    fn close(&mut self) {
        self.log.push("consumer.close");
    }
}

pub struct StubAdmin {
    log: EventLog,
    topics: Arc<Mutex<BTreeSet<String>>>,
}

#[async_trait]
impl AdminClient for StubAdmin {
    async fn create_topic(&self, topic: &NewTopic) -> Result<TopicCreation, ClientError> {
        self.log.push(format!("admin.create {}", topic.name));
        if self.topics.lock().unwrap().insert(topic.name.clone()) {
            Ok(TopicCreation::Created)
        } else {
            Ok(TopicCreation::AlreadyExists)
        }
    }

    fn close(&mut self) {
        self.log.push("admin.close");
    }
}

impl ClientFactory for StubFactory {
    type Producer = StubProducer;
    type Consumer = StubConsumer;
    type Admin = StubAdmin;

    fn producer(&self, properties: &PropertyMap) -> Result<StubProducer, ClientError> {
        self.log.push("producer.new");
        Ok(StubProducer {
            properties: properties.clone(),
            log: self.log.clone(),
        })
    }

    fn consumer(&self, properties: &PropertyMap) -> Result<StubConsumer, ClientError> {
        self.log.push("consumer.new");
        Ok(StubConsumer {
            properties: properties.clone(),
            log: self.log.clone(),
        })
    }

    fn admin(&self, properties: &PropertyMap) -> Result<StubAdmin, ClientError> {
        let bootstrap = properties
            .get(keys::BOOTSTRAP_SERVERS)
            .cloned()
            .ok_or_else(|| ClientError::MissingProperty {
                key: keys::BOOTSTRAP_SERVERS.to_string(),
            })?;
        self.log.push(format!("admin.new {bootstrap}"));
        Ok(StubAdmin {
            log: self.log.clone(),
            topics: Arc::clone(&self.topics),
        })
    }
}
