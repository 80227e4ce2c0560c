//! Publishing service addresses for code that is not handed a client.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Key under which the broker bootstrap address is published.
pub const BOOTSTRAP_SERVERS_KEY: &str = "embedded.kafka.bootstrap.servers";
/// Key under which the coordination service address is published.
pub const COORDINATION_CONNECT_KEY: &str = "embedded.zookeeper.connect";

/// Destination for published addresses, supplied by the integration layer.
pub trait AddressSink: Send + Sync {
    fn publish(&self, key: &str, value: &str);

    fn retract(&self, key: &str);
}

/// In-memory [`AddressSink`]; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct AddressRegistry {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AddressSink for AddressRegistry {
    fn publish(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    fn retract(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
