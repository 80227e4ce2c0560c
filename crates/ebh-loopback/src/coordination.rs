//! Loopback coordination service: a tree of nodes behind the JSON protocol.
//!
//! Commands: `ping`, `create`, `get`, `delete`, `children`. Every mutation is
//! appended to `<dataLogDir>/transactions.jsonl`; a snapshot of the tree is
//! written to `<dataDir>/snapshot.json` when the database closes.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use embedded_broker_harness_core::lifecycle::{
    EmbeddedServer, ServerProcess, ShutdownOutcome, keys,
};
use embedded_broker_harness_core::{PropertyMap, ServerError};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{Rejection, Request, Response, codes};
use crate::server::{Acceptor, Dispatch};

/// Optional bind address for the client port.
pub const CLIENT_PORT_ADDRESS: &str = "clientPortAddress";

const DEFAULT_CHECK_INTERVAL_MS: u64 = 60_000;
const DEFAULT_MAX_PER_MINUTE: usize = 10_000;
const TRANSACTION_LOG: &str = "transactions.jsonl";
const SNAPSHOT: &str = "snapshot.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    data: String,
    container: bool,
    had_children: bool,
}

/// In-memory node tree plus its transaction log.
pub struct Database {
    nodes: BTreeMap<String, Node>,
    zxid: u64,
    log: Option<File>,
    snapshot: PathBuf,
}

impl Database {
    /// Open a database whose transaction log lives in `log_dir` and whose
    /// snapshot is written to `data_dir`.
    pub fn open(log_dir: &Path, data_dir: &Path) -> Result<Self, ServerError> {
        let log_path = log_dir.join(TRANSACTION_LOG);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| ServerError::io(format!("opening {}", log_path.display()), e))?;
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: String::new(),
                container: false,
                had_children: false,
            },
        );
        Ok(Self {
            nodes,
            zxid: 0,
            log: Some(log),
            snapshot: data_dir.join(SNAPSHOT),
        })
    }

    /// Create `path` unless it exists. Returns whether a node was created.
    pub fn create(&mut self, path: &str, data: &str, container: bool) -> Result<bool, Rejection> {
        validate(path)?;
        self.ensure_open()?;
        if self.nodes.contains_key(path) {
            return Ok(false);
        }
        let parent = parent_of(path);
        let Some(parent_node) = self.nodes.get_mut(parent) else {
            return Err(Rejection::new(
                codes::NO_NODE,
                format!("parent {parent} of {path} does not exist"),
            ));
        };
        parent_node.had_children = true;
        self.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_string(),
                container,
                had_children: false,
            },
        );
        self.append("create", path)?;
        Ok(true)
    }

    pub fn get(&self, path: &str) -> Result<&str, Rejection> {
        self.nodes
            .get(path)
            .map(|node| node.data.as_str())
            .ok_or_else(|| Rejection::new(codes::NO_NODE, format!("{path} does not exist")))
    }

    pub fn delete(&mut self, path: &str) -> Result<(), Rejection> {
        validate(path)?;
        self.ensure_open()?;
        if path == "/" {
            return Err(Rejection::new(codes::INVALID_REQUEST, "cannot delete /"));
        }
        if !self.nodes.contains_key(path) {
            return Err(Rejection::new(codes::NO_NODE, format!("{path} does not exist")));
        }
        if !self.children(path)?.is_empty() {
            return Err(Rejection::new(codes::NOT_EMPTY, format!("{path} has children")));
        }
        self.nodes.remove(path);
        self.append("delete", path)
    }

    /// Names of the direct children of `path`, sorted.
    pub fn children(&self, path: &str) -> Result<Vec<String>, Rejection> {
        if !self.nodes.contains_key(path) {
            return Err(Rejection::new(codes::NO_NODE, format!("{path} does not exist")));
        }
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        Ok(self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect())
    }

    /// Remove empty container nodes that once had children, at most `limit`.
    pub fn sweep_containers(&mut self, limit: usize) -> usize {
        let candidates: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.container && node.had_children)
            .map(|(path, _)| path.clone())
            .collect();
        let mut removed = 0;
        for path in candidates {
            if removed >= limit {
                break;
            }
            if self.children(&path).map(|c| c.is_empty()).unwrap_or(false) {
                self.nodes.remove(&path);
                if let Err(e) = self.append("delete", &path) {
                    warn!("Transaction log write for swept {path} failed: {}", e.message);
                }
                debug!("Swept empty container {path}");
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn ensure_open(&self) -> Result<(), Rejection> {
        match self.log {
            Some(_) => Ok(()),
            None => Err(Rejection::new(codes::INTERNAL, "database is closed")),
        }
    }

    fn append(&mut self, op: &str, path: &str) -> Result<(), Rejection> {
        self.zxid += 1;
        let Some(log) = self.log.as_mut() else {
            return Err(Rejection::new(codes::INTERNAL, "database is closed"));
        };
        let entry = serde_json::json!({
            "zxid": self.zxid,
            "time": chrono::Utc::now().to_rfc3339(),
            "op": op,
            "path": path,
        });
        writeln!(log, "{entry}")
            .map_err(|e| Rejection::new(codes::INTERNAL, format!("transaction log: {e}")))
    }

    /// Flush the log and write the snapshot. Later mutations are refused.
    pub fn close(&mut self) -> Result<(), ServerError> {
        let Some(log) = self.log.take() else {
            return Ok(());
        };
        log.sync_all()
            .map_err(|e| ServerError::io("syncing the transaction log", e))?;
        let snapshot = serde_json::to_vec_pretty(&self.nodes).map_err(|e| ServerError::Shutdown {
            message: "encoding snapshot".to_string(),
            source: Some(Box::new(e)),
        })?;
        std::fs::write(&self.snapshot, snapshot)
            .map_err(|e| ServerError::io(format!("writing {}", self.snapshot.display()), e))?;
        info!(
            "Coordination snapshot with {} node(s) written to {}",
            self.nodes.len(),
            self.snapshot.display()
        );
        Ok(())
    }
}

fn validate(path: &str) -> Result<(), Rejection> {
    let valid = path == "/"
        || (path.starts_with('/') && !path.ends_with('/') && !path.contains("//"));
    if valid {
        Ok(())
    } else {
        Err(Rejection::new(codes::INVALID_REQUEST, format!("invalid path '{path}'")))
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &path[..index],
    }
}

fn lock(database: &Mutex<Database>) -> MutexGuard<'_, Database> {
    database.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Request handling ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PathPayload {
    path: String,
}

#[derive(Deserialize)]
struct CreatePayload {
    path: String,
    #[serde(default)]
    data: String,
    #[serde(default)]
    container: bool,
}

struct CoordinationHandler {
    database: Arc<Mutex<Database>>,
}

impl CoordinationHandler {
    fn handle(&self, request: &Request) -> Result<serde_json::Value, Response> {
        let reject = |r: Rejection| r.into_response(&request.request_id);
        match request.command.as_str() {
            "ping" => Ok(serde_json::json!({ "status": "imok" })),
            "create" => {
                let p: CreatePayload = request.payload()?;
                let created = lock(&self.database)
                    .create(&p.path, &p.data, p.container)
                    .map_err(reject)?;
                Ok(serde_json::json!({ "created": created }))
            }
            "get" => {
                let p: PathPayload = request.payload()?;
                let database = lock(&self.database);
                let data = database.get(&p.path).map_err(reject)?;
                Ok(serde_json::json!({ "data": data }))
            }
            "delete" => {
                let p: PathPayload = request.payload()?;
                lock(&self.database).delete(&p.path).map_err(reject)?;
                Ok(serde_json::json!({}))
            }
            "children" => {
                let p: PathPayload = request.payload()?;
                let children = lock(&self.database).children(&p.path).map_err(reject)?;
                Ok(serde_json::json!({ "children": children }))
            }
            other => Err(Response::error(
                &request.request_id,
                codes::UNKNOWN_COMMAND,
                &format!("unknown command '{other}'"),
            )),
        }
    }
}

impl Dispatch for CoordinationHandler {
    fn dispatch(&self, request: &Request) -> Response {
        match self.handle(request) {
            Ok(payload) => Response::ok(&request.request_id, payload),
            Err(response) => response,
        }
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// [`EmbeddedServer`] for the coordination role.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackCoordination;

pub struct CoordinationProcess {
    acceptor: Acceptor,
    sweeper_cancel: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
    database: Arc<Mutex<Database>>,
}

impl CoordinationProcess {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.acceptor.local_addr()
    }

    async fn stop_sweeper(&mut self) -> Result<(), ServerError> {
        self.sweeper_cancel.cancel();
        let Some(task) = self.sweeper.take() else {
            return Ok(());
        };
        task.await.map_err(|e| ServerError::Shutdown {
            message: "container sweeper did not exit cleanly".to_string(),
            source: Some(Box::new(e)),
        })
    }
}

fn required<'a>(properties: &'a PropertyMap, key: &str) -> Result<&'a str, ServerError> {
    properties
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ServerError::config(format!("missing required property '{key}'")))
}

fn optional<T: std::str::FromStr>(
    properties: &PropertyMap,
    key: &str,
    default: T,
) -> Result<T, ServerError> {
    match properties.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ServerError::config(format!("invalid value '{raw}' for '{key}'"))),
    }
}

impl EmbeddedServer for LoopbackCoordination {
    type Process = CoordinationProcess;

    async fn launch(&self, properties: &PropertyMap) -> Result<CoordinationProcess, ServerError> {
        let port: u16 = required(properties, keys::CLIENT_PORT)?
            .trim()
            .parse()
            .map_err(|_| ServerError::config("clientPort must be a port number"))?;
        let log_dir = PathBuf::from(required(properties, keys::DATA_LOG_DIR)?);
        let data_dir = PathBuf::from(required(properties, keys::DATA_DIR)?);
        let interval: u64 = optional(
            properties,
            keys::CONTAINER_CHECK_INTERVAL_MS,
            DEFAULT_CHECK_INTERVAL_MS,
        )?;
        let max_per_minute: usize =
            optional(properties, keys::CONTAINER_MAX_PER_MINUTE, DEFAULT_MAX_PER_MINUTE)?;
        let host = properties
            .get(CLIENT_PORT_ADDRESS)
            .map(String::as_str)
            .unwrap_or("127.0.0.1");

        let database = Arc::new(Mutex::new(Database::open(&log_dir, &data_dir)?));
        let acceptor = Acceptor::bind(
            "coordination",
            &format!("{host}:{port}"),
            Arc::new(CoordinationHandler {
                database: Arc::clone(&database),
            }),
        )
        .await?;

        let sweeper_cancel = CancellationToken::new();
        let sweeper = tokio::spawn(run_container_sweeper(
            Arc::clone(&database),
            Duration::from_millis(interval.max(1)),
            max_per_minute,
            sweeper_cancel.clone(),
        ));

        Ok(CoordinationProcess {
            acceptor,
            sweeper_cancel,
            sweeper: Some(sweeper),
            database,
        })
    }
}

async fn run_container_sweeper(
    database: Arc<Mutex<Database>>,
    interval: Duration,
    max_per_minute: usize,
    cancel: CancellationToken,
) {
    let per_tick = ((max_per_minute as u128 * interval.as_millis()) / 60_000).max(1) as usize;
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = lock(&database).sweep_containers(per_tick);
                if removed > 0 {
                    debug!("Container sweeper removed {removed} node(s)");
                }
            }
        }
    }
}

impl ServerProcess for CoordinationProcess {
    async fn shutdown(&mut self) -> ShutdownOutcome {
        let mut outcome = ShutdownOutcome::new();
        outcome.record("acceptor", self.acceptor.stop().await);
        outcome.record("container-sweeper", self.stop_sweeper().await);
        outcome.record("database", lock(&self.database).close());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn database() -> (tempfile::TempDir, tempfile::TempDir, Database) {
        let log = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let db = Database::open(log.path(), data.path()).unwrap();
        (log, data, db)
    }

    #[test]
    fn create_is_idempotent_and_needs_a_parent() {
        let (_log, _data, mut db) = database();
        assert!(db.create("/brokers", "", false).unwrap());
        assert!(!db.create("/brokers", "other", false).unwrap());
        assert_eq!(db.get("/brokers").unwrap(), "");

        let err = db.create("/a/b", "", false).unwrap_err();
        assert_eq!(err.code, codes::NO_NODE);
        assert_eq!(db.create("bad", "", false).unwrap_err().code, codes::INVALID_REQUEST);
    }

    #[test]
    fn children_are_direct_and_sorted() {
        let (_log, _data, mut db) = database();
        db.create("/brokers", "", false).unwrap();
        db.create("/brokers/ids", "", false).unwrap();
        db.create("/brokers/ids/1", "b1", false).unwrap();
        db.create("/brokers/ids/0", "b0", false).unwrap();
        db.create("/brokersx", "", false).unwrap();

        assert_eq!(db.children("/brokers/ids").unwrap(), vec!["0", "1"]);
        assert_eq!(db.children("/brokers").unwrap(), vec!["ids"]);
        assert_eq!(db.children("/").unwrap(), vec!["brokers", "brokersx"]);
    }

    #[test]
    fn delete_refuses_nodes_with_children() {
        let (_log, _data, mut db) = database();
        db.create("/a", "", false).unwrap();
        db.create("/a/b", "", false).unwrap();
        assert_eq!(db.delete("/a").unwrap_err().code, codes::NOT_EMPTY);
        db.delete("/a/b").unwrap();
        db.delete("/a").unwrap();
        assert_eq!(db.delete("/a").unwrap_err().code, codes::NO_NODE);
    }

    #[test]
    fn sweeper_removes_only_emptied_containers() {
        let (_log, _data, mut db) = database();
        db.create("/locks", "", true).unwrap();
        db.create("/fresh", "", true).unwrap();
        db.create("/locks/l1", "", false).unwrap();
        assert_eq!(db.sweep_containers(10), 0);

        db.delete("/locks/l1").unwrap();
        assert_eq!(db.sweep_containers(10), 1);
        assert!(db.get("/locks").is_err());
        assert!(db.get("/fresh").is_ok());
    }

    #[test]
    #[traced_test]
    fn sweeping_after_close_warns_about_the_lost_log_entry() {
        let (_log, _data, mut db) = database();
        db.create("/locks", "", true).unwrap();
        db.create("/locks/l1", "", false).unwrap();
        db.delete("/locks/l1").unwrap();
        db.close().unwrap();

        assert_eq!(db.sweep_containers(10), 1);
        assert!(logs_contain("Transaction log write for swept /locks failed"));
    }

    #[test]
    fn mutations_are_logged_and_close_writes_a_snapshot() {
        let (log, data, mut db) = database();
        db.create("/a", "x", false).unwrap();
        db.delete("/a").unwrap();
        db.close().unwrap();

        let entries = std::fs::read_to_string(log.path().join(TRANSACTION_LOG)).unwrap();
        let ops: Vec<serde_json::Value> = entries
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0]["op"], "create");
        assert_eq!(ops[1]["op"], "delete");
        assert_eq!(ops[1]["zxid"], 2);

        let snapshot = std::fs::read_to_string(data.path().join(SNAPSHOT)).unwrap();
        assert!(snapshot.contains("\"/\""));
        assert_eq!(db.create("/b", "", false).unwrap_err().code, codes::INTERNAL);
        db.close().unwrap();
    }

    #[test]
    fn missing_properties_fail_launch_validation() {
        let properties = PropertyMap::new();
        assert!(matches!(
            required(&properties, keys::CLIENT_PORT),
            Err(ServerError::Config { .. })
        ));
        let mut properties = PropertyMap::new();
        properties.insert(keys::CONTAINER_MAX_PER_MINUTE.to_string(), "many".to_string());
        assert!(optional(&properties, keys::CONTAINER_MAX_PER_MINUTE, 1usize).is_err());
    }
}
