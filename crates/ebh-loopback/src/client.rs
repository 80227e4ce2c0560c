//! Clients for the loopback broker.
//!
//! [`LoopbackClients`] is the [`ClientFactory`] handed to the resolver. Codecs
//! come from the usual `key.serializer`/`value.deserializer` class names and
//! are checked against every record sent or received.

use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use embedded_broker_harness_core::client::{
    AdminClient, ClientFactory, Codec, ConsumerClient, ProducerClient, TopicCreation,
};
use embedded_broker_harness_core::keys;
use embedded_broker_harness_core::{ClientError, NewTopic, PropertyMap};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::broker::OffsetReset;
use crate::protocol::{self, Request, codes};
use crate::record::{ConsumerRecord, FromPayload, RecordMetadata, StoredRecord, ToPayload};

const FETCH_BACKOFF: Duration = Duration::from_millis(50);
const LEAVE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Factory for loopback producers, consumers and admin clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackClients;

fn bootstrap(properties: &PropertyMap) -> Result<String, ClientError> {
    let servers = properties
        .get(keys::BOOTSTRAP_SERVERS)
        .ok_or_else(|| ClientError::MissingProperty {
            key: keys::BOOTSTRAP_SERVERS.to_string(),
        })?;
    servers
        .split(',')
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ClientError::InvalidProperty {
            key: keys::BOOTSTRAP_SERVERS.to_string(),
            message: "no broker address given".to_string(),
        })
}

fn codec(properties: &PropertyMap, key: &str) -> Result<Codec, ClientError> {
    let class = properties
        .get(key)
        .ok_or_else(|| ClientError::MissingProperty {
            key: key.to_string(),
        })?;
    Codec::from_class_name(class).ok_or_else(|| ClientError::InvalidProperty {
        key: key.to_string(),
        message: format!("unknown codec class '{class}'"),
    })
}

fn offset_reset(properties: &PropertyMap) -> Result<OffsetReset, ClientError> {
    match properties.get(keys::AUTO_OFFSET_RESET).map(String::as_str) {
        None | Some("latest") => Ok(OffsetReset::Latest),
        Some("earliest") => Ok(OffsetReset::Earliest),
        Some(other) => Err(ClientError::InvalidProperty {
            key: keys::AUTO_OFFSET_RESET.to_string(),
            message: format!("expected 'earliest' or 'latest', got '{other}'"),
        }),
    }
}

impl ClientFactory for LoopbackClients {
    type Producer = LoopbackProducer;
    type Consumer = LoopbackConsumer;
    type Admin = LoopbackAdmin;

    fn producer(&self, properties: &PropertyMap) -> Result<LoopbackProducer, ClientError> {
        Ok(LoopbackProducer {
            address: bootstrap(properties)?,
            key_codec: codec(properties, keys::KEY_SERIALIZER)?,
            value_codec: codec(properties, keys::VALUE_SERIALIZER)?,
            closed: false,
        })
    }

    fn consumer(&self, properties: &PropertyMap) -> Result<LoopbackConsumer, ClientError> {
        let member = properties
            .get(keys::CLIENT_ID)
            .cloned()
            .unwrap_or_else(|| format!("consumer-{}", uuid::Uuid::new_v4()));
        Ok(LoopbackConsumer {
            address: bootstrap(properties)?,
            key_codec: codec(properties, keys::KEY_DESERIALIZER)?,
            value_codec: codec(properties, keys::VALUE_DESERIALIZER)?,
            group: properties.get(keys::GROUP_ID).cloned(),
            member,
            reset: offset_reset(properties)?,
            subscription: Vec::new(),
            closed: false,
        })
    }

    fn admin(&self, properties: &PropertyMap) -> Result<LoopbackAdmin, ClientError> {
        Ok(LoopbackAdmin {
            address: bootstrap(properties)?,
            closed: false,
        })
    }
}

// ── Producer ──────────────────────────────────────────────────────────────────

pub struct LoopbackProducer {
    address: String,
    key_codec: Codec,
    value_codec: Codec,
    closed: bool,
}

impl LoopbackProducer {
    /// Send one record and wait for the broker to acknowledge it.
    pub async fn send<K: ToPayload, V: ToPayload>(
        &self,
        topic: &str,
        key: K,
        value: V,
    ) -> Result<RecordMetadata, ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        let key = key.to_payload().checked(self.key_codec)?;
        let value = value.to_payload().checked(self.value_codec)?;
        protocol::call(
            &self.address,
            "produce",
            serde_json::json!({ "topic": topic, "key": key, "value": value }),
        )
        .await
    }
}

impl ProducerClient for LoopbackProducer {
    fn close(&mut self) {
        if !self.closed {
            debug!("Producer for {} closed", self.address);
        }
        self.closed = true;
    }
}

// ── Consumer ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct FetchReply {
    records: Vec<StoredRecord>,
}

pub struct LoopbackConsumer {
    address: String,
    key_codec: Codec,
    value_codec: Codec,
    group: Option<String>,
    member: String,
    reset: OffsetReset,
    subscription: Vec<String>,
    closed: bool,
}

impl LoopbackConsumer {
    pub fn subscription(&self) -> &[String] {
        &self.subscription
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Fetch records, waiting up to `timeout` for at least one to arrive.
    pub async fn poll<K: FromPayload, V: FromPayload>(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<ConsumerRecord<K, V>>, ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        let Some(group) = self.group.clone() else {
            return Err(ClientError::MissingProperty {
                key: keys::GROUP_ID.to_string(),
            });
        };
        if self.subscription.is_empty() {
            return Err(ClientError::Protocol {
                message: "consumer is not subscribed to any topic".to_string(),
            });
        }

        let deadline = Instant::now() + timeout;
        loop {
            let reply: FetchReply = protocol::call(
                &self.address,
                "fetch",
                serde_json::json!({
                    "group": group,
                    "member": self.member,
                    "reset": self.reset,
                }),
            )
            .await?;
            if !reply.records.is_empty() || Instant::now() >= deadline {
                return reply
                    .records
                    .into_iter()
                    .map(|record| self.decode(record))
                    .collect();
            }
            tokio::time::sleep(FETCH_BACKOFF.min(deadline.saturating_duration_since(Instant::now())))
                .await;
        }
    }

    fn decode<K: FromPayload, V: FromPayload>(
        &self,
        record: StoredRecord,
    ) -> Result<ConsumerRecord<K, V>, ClientError> {
        let mismatch = |what: &str| ClientError::Serialization {
            codec: format!("{:?}", if what == "key" { self.key_codec } else { self.value_codec }),
            found: format!(
                "the {what} at {}-{}@{}",
                record.topic, record.partition, record.offset
            ),
        };
        let key_value = record.key.clone().checked(self.key_codec)?;
        let value_value = record.value.clone().checked(self.value_codec)?;
        let key = K::from_payload(key_value).ok_or_else(|| mismatch("key"))?;
        let value = V::from_payload(value_value).ok_or_else(|| mismatch("value"))?;
        Ok(ConsumerRecord {
            topic: record.topic,
            partition: record.partition,
            offset: record.offset,
            timestamp: record.timestamp,
            key,
            value,
        })
    }

    /// Member id this consumer joins its group with.
    pub fn member(&self) -> &str {
        &self.member
    }
}

/// Send `leave` without waiting for the reply.
///
/// Runs from synchronous cleanup, often inside `Drop` on a runtime worker.
/// With a runtime present the blocking connect moves to the blocking pool;
/// otherwise it runs inline with a short connect timeout.
fn send_leave(address: String, group: String, member: String) {
    let leave = move || {
        if let Err(e) = write_leave(&address, &group, &member) {
            warn!("Consumer {member} could not leave group {group}: {e}");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => drop(runtime.spawn_blocking(leave)),
        Err(_) => leave(),
    }
}

fn write_leave(address: &str, group: &str, member: &str) -> std::io::Result<()> {
    let resolved: SocketAddr = address
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::other(format!("{address} did not resolve")))?;
    let request = Request::new(
        "leave",
        serde_json::json!({ "group": group, "member": member }),
    );
    let mut line = serde_json::to_string(&request)?;
    line.push('\n');
    let mut stream = TcpStream::connect_timeout(&resolved, LEAVE_CONNECT_TIMEOUT)?;
    stream.write_all(line.as_bytes())?;
    stream.flush()
}

#[async_trait]
impl ConsumerClient for LoopbackConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        let Some(group) = self.group.clone() else {
            return Err(ClientError::MissingProperty {
                key: keys::GROUP_ID.to_string(),
            });
        };
        protocol::call::<serde_json::Value>(
            &self.address,
            "join",
            serde_json::json!({ "group": group, "member": self.member, "topics": topics }),
        )
        .await?;
        self.subscription = topics.to_vec();
        info!("Consumer {} subscribed to {topics:?} in group {group}", self.member);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if self.subscription.is_empty() || self.closed {
            return;
        }
        if let Some(group) = self.group.clone() {
            send_leave(self.address.clone(), group, self.member.clone());
        }
        self.subscription.clear();
    }

    fn close(&mut self) {
        if !self.closed {
            debug!("Consumer {} closed", self.member);
        }
        self.closed = true;
    }
}

// ── Admin ─────────────────────────────────────────────────────────────────────

pub struct LoopbackAdmin {
    address: String,
    closed: bool,
}

#[async_trait]
impl AdminClient for LoopbackAdmin {
    async fn create_topic(&self, topic: &NewTopic) -> Result<TopicCreation, ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        let result = protocol::call::<serde_json::Value>(
            &self.address,
            "create-topic",
            serde_json::json!({
                "name": topic.name,
                "partitions": topic.partitions,
                "replication_factor": topic.replication_factor,
            }),
        )
        .await;
        match result {
            Ok(_) => Ok(TopicCreation::Created),
            Err(ClientError::Rejected { code, .. }) if code == codes::TOPIC_EXISTS => {
                Ok(TopicCreation::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[derive(Deserialize)]
struct GroupDescription {
    members: Vec<String>,
}

impl LoopbackAdmin {
    /// Member ids currently joined to `group`.
    pub async fn group_members(&self, group: &str) -> Result<Vec<String>, ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        let description: GroupDescription = protocol::call(
            &self.address,
            "describe-group",
            serde_json::json!({ "group": group }),
        )
        .await?;
        Ok(description.members)
    }
}
