//! Loopback broker: topics, partitions and consumer-group offsets in memory.
//!
//! At launch the broker checks that the coordination service answers, then
//! registers itself under `/brokers/ids/<broker.id>` and writes
//! `meta.properties` into its log directory. Commands: `create-topic`,
//! `produce`, `join`, `fetch`, `leave`, `describe-group`.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embedded_broker_harness_core::lifecycle::{
    EmbeddedServer, ServerProcess, ShutdownOutcome, keys,
};
use embedded_broker_harness_core::{ClientError, PropertyMap, ServerError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::protocol::{self, Rejection, Request, Response, codes};
use crate::record::{RecordMetadata, StoredRecord, Value};
use crate::server::{Acceptor, Dispatch};

/// Broker property: numeric id used for registration.
pub const BROKER_ID: &str = "broker.id";
/// Broker property: create unknown topics on first produce.
pub const AUTO_CREATE_TOPICS: &str = "auto.create.topics.enable";
/// Broker property: partition count of auto-created topics.
pub const NUM_PARTITIONS: &str = "num.partitions";

const META_PROPERTIES: &str = "meta.properties";

/// Consumer position when a group has no committed offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetReset {
    Earliest,
    #[default]
    Latest,
}

#[derive(Debug, Default)]
struct Group {
    /// member id → subscribed topics
    members: BTreeMap<String, Vec<String>>,
    committed: BTreeMap<(String, i32), u64>,
}

/// Topic and group state of one broker.
#[derive(Debug)]
pub struct BrokerState {
    topics: BTreeMap<String, Vec<Vec<StoredRecord>>>,
    groups: BTreeMap<String, Group>,
    auto_create: bool,
    default_partitions: i32,
    next_partition: u64,
}

impl BrokerState {
    pub fn new(auto_create: bool, default_partitions: i32) -> Self {
        Self {
            topics: BTreeMap::new(),
            groups: BTreeMap::new(),
            auto_create,
            default_partitions: default_partitions.max(1),
            next_partition: 0,
        }
    }

    pub fn create_topic(
        &mut self,
        name: &str,
        partitions: i32,
        replication_factor: i16,
    ) -> Result<(), Rejection> {
        if name.trim().is_empty() {
            return Err(Rejection::new(codes::INVALID_REQUEST, "topic name is empty"));
        }
        if partitions < 1 {
            return Err(Rejection::new(
                codes::INVALID_PARTITIONS,
                format!("partitions must be at least 1, got {partitions}"),
            ));
        }
        if replication_factor != 1 {
            return Err(Rejection::new(
                codes::INVALID_REPLICATION_FACTOR,
                format!("replication factor {replication_factor} larger than available brokers 1"),
            ));
        }
        if self.topics.contains_key(name) {
            return Err(Rejection::new(
                codes::TOPIC_EXISTS,
                format!("topic '{name}' already exists"),
            ));
        }
        self.topics
            .insert(name.to_string(), vec![Vec::new(); partitions as usize]);
        info!("Broker created topic {name} with {partitions} partition(s)");
        Ok(())
    }

    pub fn partitions(&self, topic: &str) -> Option<usize> {
        self.topics.get(topic).map(Vec::len)
    }

    pub fn produce(
        &mut self,
        topic: &str,
        partition: Option<i32>,
        key: Value,
        value: Value,
    ) -> Result<RecordMetadata, Rejection> {
        if !self.topics.contains_key(topic) {
            if !self.auto_create {
                return Err(Rejection::new(
                    codes::UNKNOWN_TOPIC,
                    format!("topic '{topic}' does not exist"),
                ));
            }
            self.create_topic(topic, self.default_partitions, 1)?;
        }
        let round_robin = self.next_partition;
        let Some(partitions) = self.topics.get_mut(topic) else {
            return Err(Rejection::new(codes::UNKNOWN_TOPIC, topic.to_string()));
        };
        let count = partitions.len();
        let index = match partition {
            Some(p) if p >= 0 && (p as usize) < count => p as usize,
            Some(p) => {
                return Err(Rejection::new(
                    codes::UNKNOWN_TOPIC,
                    format!("partition {p} of '{topic}' does not exist"),
                ));
            }
            None if key != Value::Null => {
                let mut hasher = DefaultHasher::new();
                serde_json::to_string(&key)
                    .unwrap_or_default()
                    .hash(&mut hasher);
                (hasher.finish() % count as u64) as usize
            }
            None => {
                self.next_partition = round_robin.wrapping_add(1);
                (round_robin % count as u64) as usize
            }
        };
        let log = &mut partitions[index];
        let offset = log.len() as u64;
        log.push(StoredRecord {
            topic: topic.to_string(),
            partition: index as i32,
            offset,
            timestamp: chrono::Utc::now().timestamp_millis(),
            key,
            value,
        });
        Ok(RecordMetadata {
            topic: topic.to_string(),
            partition: index as i32,
            offset,
        })
    }

    pub fn join(&mut self, group: &str, member: &str, topics: Vec<String>) {
        debug!("Member {member} joined group {group} for {topics:?}");
        self.groups
            .entry(group.to_string())
            .or_default()
            .members
            .insert(member.to_string(), topics);
    }

    pub fn leave(&mut self, group: &str, member: &str) -> bool {
        let left = self
            .groups
            .get_mut(group)
            .map(|g| g.members.remove(member).is_some())
            .unwrap_or(false);
        if left {
            debug!("Member {member} left group {group}");
        }
        left
    }

    /// Member ids of `group`, sorted.
    pub fn members(&self, group: &str) -> Vec<String> {
        self.groups
            .get(group)
            .map(|g| g.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Records past the group's committed offsets; commits what is returned.
    pub fn fetch(
        &mut self,
        group: &str,
        member: &str,
        reset: OffsetReset,
        max_records: usize,
    ) -> Result<Vec<StoredRecord>, Rejection> {
        let Some(state) = self.groups.get_mut(group) else {
            return Err(Rejection::new(
                codes::UNKNOWN_MEMBER,
                format!("group '{group}' has no members"),
            ));
        };
        let Some(topics) = state.members.get(member).cloned() else {
            return Err(Rejection::new(
                codes::UNKNOWN_MEMBER,
                format!("'{member}' is not a member of '{group}'"),
            ));
        };

        let mut out = Vec::new();
        for topic in topics {
            let Some(partitions) = self.topics.get(&topic) else {
                continue;
            };
            for (index, log) in partitions.iter().enumerate() {
                let position = state
                    .committed
                    .entry((topic.clone(), index as i32))
                    .or_insert(match reset {
                        OffsetReset::Earliest => 0,
                        OffsetReset::Latest => log.len() as u64,
                    });
                let available = log.iter().skip(*position as usize);
                let taken: Vec<StoredRecord> = available
                    .take(max_records.saturating_sub(out.len()))
                    .cloned()
                    .collect();
                *position += taken.len() as u64;
                out.extend(taken);
            }
        }
        Ok(out)
    }
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Request handling ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateTopicPayload {
    name: String,
    partitions: i32,
    replication_factor: i16,
}

#[derive(Deserialize)]
struct ProducePayload {
    topic: String,
    #[serde(default)]
    partition: Option<i32>,
    key: Value,
    value: Value,
}

#[derive(Deserialize)]
struct JoinPayload {
    group: String,
    member: String,
    topics: Vec<String>,
}

#[derive(Deserialize)]
struct FetchPayload {
    group: String,
    member: String,
    #[serde(default)]
    reset: OffsetReset,
    #[serde(default = "default_max_records")]
    max_records: usize,
}

fn default_max_records() -> usize {
    500
}

#[derive(Deserialize)]
struct GroupPayload {
    group: String,
}

#[derive(Deserialize)]
struct LeavePayload {
    group: String,
    member: String,
}

struct BrokerHandler {
    state: Arc<Mutex<BrokerState>>,
}

impl BrokerHandler {
    fn handle(&self, request: &Request) -> Result<serde_json::Value, Response> {
        let reject = |r: Rejection| r.into_response(&request.request_id);
        match request.command.as_str() {
            "create-topic" => {
                let p: CreateTopicPayload = request.payload()?;
                lock(&self.state)
                    .create_topic(&p.name, p.partitions, p.replication_factor)
                    .map_err(reject)?;
                Ok(serde_json::json!({ "name": p.name }))
            }
            "produce" => {
                let p: ProducePayload = request.payload()?;
                let metadata = lock(&self.state)
                    .produce(&p.topic, p.partition, p.key, p.value)
                    .map_err(reject)?;
                Ok(serde_json::json!(metadata))
            }
            "join" => {
                let p: JoinPayload = request.payload()?;
                lock(&self.state).join(&p.group, &p.member, p.topics);
                Ok(serde_json::json!({}))
            }
            "fetch" => {
                let p: FetchPayload = request.payload()?;
                let records = lock(&self.state)
                    .fetch(&p.group, &p.member, p.reset, p.max_records)
                    .map_err(reject)?;
                Ok(serde_json::json!({ "records": records }))
            }
            "describe-group" => {
                let p: GroupPayload = request.payload()?;
                let members = lock(&self.state).members(&p.group);
                Ok(serde_json::json!({ "members": members }))
            }
            "leave" => {
                let p: LeavePayload = request.payload()?;
                let left = lock(&self.state).leave(&p.group, &p.member);
                Ok(serde_json::json!({ "left": left }))
            }
            other => Err(Response::error(
                &request.request_id,
                codes::UNKNOWN_COMMAND,
                &format!("unknown command '{other}'"),
            )),
        }
    }
}

impl Dispatch for BrokerHandler {
    fn dispatch(&self, request: &Request) -> Response {
        match self.handle(request) {
            Ok(payload) => Response::ok(&request.request_id, payload),
            Err(response) => response,
        }
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// [`EmbeddedServer`] for the broker role.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackBroker;

pub struct BrokerProcess {
    acceptor: Acceptor,
    coordination: String,
    registration: Option<String>,
    state: Arc<Mutex<BrokerState>>,
}

impl BrokerProcess {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.acceptor.local_addr()
    }

    async fn deregister(&mut self) -> Result<(), ServerError> {
        let Some(path) = self.registration.take() else {
            return Ok(());
        };
        protocol::call::<serde_json::Value>(
            &self.coordination,
            "delete",
            serde_json::json!({ "path": path }),
        )
        .await
        .map(|_| ())
        .map_err(|e| ServerError::Shutdown {
            message: format!("removing registration {path}"),
            source: Some(Box::new(e)),
        })
    }
}

/// Host and port of the first `PLAINTEXT://host:port` listener.
fn listener_address(listeners: &str) -> Result<String, ServerError> {
    let first = listeners.split(',').next().unwrap_or_default().trim();
    let address = first
        .split_once("://")
        .map(|(_, address)| address)
        .unwrap_or(first);
    if address.rsplit_once(':').is_none() {
        return Err(ServerError::config(format!(
            "listener '{first}' has no port"
        )));
    }
    Ok(address.to_string())
}

fn write_meta_properties(log_dir: &Path, broker_id: u32) -> Result<(), ServerError> {
    let path = log_dir.join(META_PROPERTIES);
    let contents = format!(
        "#\n#{}\nversion=0\nbroker.id={broker_id}\n",
        chrono::Utc::now().to_rfc2822()
    );
    std::fs::write(&path, contents)
        .map_err(|e| ServerError::io(format!("writing {}", path.display()), e))
}

fn property<'a>(properties: &'a PropertyMap, key: &str) -> Result<&'a str, ServerError> {
    properties
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ServerError::config(format!("missing required property '{key}'")))
}

fn parsed<T: std::str::FromStr>(
    properties: &PropertyMap,
    key: &str,
    default: T,
) -> Result<T, ServerError> {
    properties.get(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse()
            .map_err(|_| ServerError::config(format!("invalid value '{raw}' for '{key}'")))
    })
}

impl EmbeddedServer for LoopbackBroker {
    type Process = BrokerProcess;

    async fn launch(&self, properties: &PropertyMap) -> Result<BrokerProcess, ServerError> {
        let coordination = property(properties, keys::ZOOKEEPER_CONNECT)?
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        let address = listener_address(property(properties, keys::LISTENERS)?)?;
        let log_dir = PathBuf::from(property(properties, keys::LOG_DIR)?);
        let broker_id: u32 = parsed(properties, BROKER_ID, 0)?;
        let auto_create: bool = parsed(properties, AUTO_CREATE_TOPICS, true)?;
        let partitions: i32 = parsed(properties, NUM_PARTITIONS, 1)?;

        let dependency = |e: ClientError| ServerError::Startup {
            message: format!("coordination service at {coordination} is unavailable"),
            source: Some(Box::new(e)),
        };
        protocol::call::<serde_json::Value>(&coordination, "ping", serde_json::json!({}))
            .await
            .map_err(dependency)?;
        for path in ["/brokers", "/brokers/ids"] {
            protocol::call::<serde_json::Value>(
                &coordination,
                "create",
                serde_json::json!({ "path": path }),
            )
            .await
            .map_err(dependency)?;
        }

        write_meta_properties(&log_dir, broker_id)?;
        let state = Arc::new(Mutex::new(BrokerState::new(auto_create, partitions)));
        let mut acceptor = Acceptor::bind(
            "broker",
            &address,
            Arc::new(BrokerHandler {
                state: Arc::clone(&state),
            }),
        )
        .await?;

        let registration = format!("/brokers/ids/{broker_id}");
        let registered = protocol::call::<serde_json::Value>(
            &coordination,
            "create",
            serde_json::json!({ "path": registration, "data": address }),
        )
        .await;
        if let Err(e) = registered {
            warn!("Broker registration failed, closing listener: {e}");
            let _ = acceptor.stop().await;
            return Err(dependency(e));
        }
        info!("Broker {broker_id} registered with coordination service {coordination}");

        Ok(BrokerProcess {
            acceptor,
            coordination,
            registration: Some(registration),
            state,
        })
    }
}

impl ServerProcess for BrokerProcess {
    async fn shutdown(&mut self) -> ShutdownOutcome {
        let mut outcome = ShutdownOutcome::new();
        outcome.record("acceptor", self.acceptor.stop().await);
        outcome.record("registration", self.deregister().await);
        let topics = lock(&self.state).topics.len();
        debug!("Broker released {topics} topic(s)");
        outcome
    }
}
