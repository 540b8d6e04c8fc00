//! Access to the Consul key-value store and event bus
//!
//! Everything the cluster operations need from the outside world goes
//! through [`ConsulBackend`]:
//!
//! ```text
//! find(prefix)        -> map<key, raw json>     GET  /v1/kv/<prefix>?recurse
//! get(key)            -> raw json | none        GET  /v1/kv/<key>?raw
//! get_flag(key)       -> bool | none            GET  /v1/kv/<key>?raw
//! fire(name, payload) -> event id               PUT  /v1/event/fire/<name>
//! list_nodes()        -> node ids               GET  /v1/catalog/nodes
//! health_state(state) -> checks                 GET  /v1/health/state/<state>
//! ```
//!
//! [`ConsulClient`] speaks HTTP to an agent; [`MemoryConsul`] keeps the same
//! contract in memory.

pub mod client;
pub mod error;
pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::models::HealthCheck;

pub use client::ConsulClient;
pub use error::ConsulError;
pub use memory::{FiredEvent, MemoryConsul};

/// Result type for transport calls
pub type ConsulResult<T> = Result<T, ConsulError>;

/// The external store / bus contract
#[async_trait]
pub trait ConsulBackend: Send + Sync {
    /// All keys under `prefix` with their raw values
    async fn find(&self, prefix: &str) -> ConsulResult<BTreeMap<String, String>>;

    /// Raw value at `key`
    async fn get(&self, key: &str) -> ConsulResult<Option<String>>;

    /// Boolean flag at `key`; `None` when the key is absent
    async fn get_flag(&self, key: &str) -> ConsulResult<Option<bool>>;

    /// Broadcast an event, returning its id
    async fn fire(&self, name: &str, payload: &serde_json::Value) -> ConsulResult<String>;

    /// Node ids registered in the catalog
    async fn list_nodes(&self) -> ConsulResult<Vec<String>>;

    /// Health checks currently in `state`
    async fn health_state(&self, state: &str) -> ConsulResult<Vec<HealthCheck>>;
}

/// Interpret the raw body of a flag key
pub(crate) fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "0" | "null"
    )
}
