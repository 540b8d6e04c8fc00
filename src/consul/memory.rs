//! In-memory store and event bus
//!
//! Keeps the [`ConsulBackend`] contract without an agent. Fired events are
//! recorded; an optional reaction hook plays the part of the external
//! consumer by editing the state when an event arrives.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::error::ConsulError;
use super::{parse_flag, ConsulBackend, ConsulResult};
use crate::models::HealthCheck;

/// An event received by the in-memory bus
#[derive(Debug, Clone, PartialEq)]
pub struct FiredEvent {
    pub id: String,
    pub name: String,
    pub payload: serde_json::Value,
}

/// Mutable content of the in-memory backend
#[derive(Debug, Default)]
pub struct MemoryState {
    /// Raw KV values
    pub kv: BTreeMap<String, String>,
    /// Scripted answers for `get_flag`, consumed one per call
    pub flag_script: HashMap<String, VecDeque<Option<bool>>>,
    /// Catalog node ids
    pub nodes: Vec<String>,
    /// Health checks per state
    pub checks: HashMap<String, Vec<HealthCheck>>,
    /// Every event fired so far
    pub fired: Vec<FiredEvent>,
}

type Reaction = Arc<dyn Fn(&FiredEvent, &mut MemoryState) + Send + Sync>;

/// In-memory [`ConsulBackend`]
#[derive(Clone, Default)]
pub struct MemoryConsul {
    state: Arc<Mutex<MemoryState>>,
    reaction: Option<Reaction>,
}

impl MemoryConsul {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Register catalog nodes
    pub fn with_nodes<I, S>(self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().nodes = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Store a raw value
    pub fn with_value(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(key, value);
        self
    }

    /// Run `reaction` on every fired event, after it is recorded
    pub fn with_reaction<F>(mut self, reaction: F) -> Self
    where
        F: Fn(&FiredEvent, &mut MemoryState) + Send + Sync + 'static,
    {
        self.reaction = Some(Arc::new(reaction));
        self
    }

    /// Store a raw value
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().kv.insert(key.into(), value.into());
    }

    /// Queue answers for the next `get_flag(key)` calls
    pub fn script_flag<I>(&self, key: impl Into<String>, answers: I)
    where
        I: IntoIterator<Item = Option<bool>>,
    {
        self.lock()
            .flag_script
            .entry(key.into())
            .or_default()
            .extend(answers);
    }

    /// Register health checks returned for `state`
    pub fn add_checks(&self, state: impl Into<String>, checks: Vec<HealthCheck>) {
        self.lock().checks.entry(state.into()).or_default().extend(checks);
    }

    /// Events fired so far
    pub fn fired(&self) -> Vec<FiredEvent> {
        self.lock().fired.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test reaction panicked; the data is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for MemoryConsul {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConsul")
            .field("state", &self.state)
            .field("reaction", &self.reaction.is_some())
            .finish()
    }
}

#[async_trait]
impl ConsulBackend for MemoryConsul {
    async fn find(&self, prefix: &str) -> ConsulResult<BTreeMap<String, String>> {
        Ok(self
            .lock()
            .kv
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn get(&self, key: &str) -> ConsulResult<Option<String>> {
        Ok(self.lock().kv.get(key).cloned())
    }

    async fn get_flag(&self, key: &str) -> ConsulResult<Option<bool>> {
        let mut state = self.lock();
        if let Some(answer) = state.flag_script.get_mut(key).and_then(VecDeque::pop_front) {
            return Ok(answer);
        }
        Ok(state.kv.get(key).map(|raw| parse_flag(raw)))
    }

    async fn fire(&self, name: &str, payload: &serde_json::Value) -> ConsulResult<String> {
        if name.is_empty() {
            return Err(ConsulError::Status {
                status: 400,
                message: "Missing name".to_string(),
            });
        }

        let mut state = self.lock();
        let event = FiredEvent {
            id: format!("event-{}", state.fired.len() + 1),
            name: name.to_string(),
            payload: payload.clone(),
        };
        state.fired.push(event.clone());
        if let Some(reaction) = &self.reaction {
            reaction(&event, &mut *state);
        }
        Ok(event.id)
    }

    async fn list_nodes(&self) -> ConsulResult<Vec<String>> {
        Ok(self.lock().nodes.clone())
    }

    async fn health_state(&self, state: &str) -> ConsulResult<Vec<HealthCheck>> {
        Ok(self.lock().checks.get(state).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_by_prefix() {
        let consul = MemoryConsul::new()
            .with_value("app/repo_branch.12345", "{}")
            .with_value("app/repo_branch2.67890", "{}")
            .with_value("maintenance/repo_branch.12345", "true");

        let found = consul.find("app/repo_branch.").await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("app/repo_branch.12345"));

        assert_eq!(consul.find("app/").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_flag_script_then_stored_value() {
        let consul = MemoryConsul::new().with_value("maintenance/x", "true");
        consul.script_flag("maintenance/x", [None, Some(false)]);

        assert_eq!(consul.get_flag("maintenance/x").await.unwrap(), None);
        assert_eq!(consul.get_flag("maintenance/x").await.unwrap(), Some(false));
        assert_eq!(consul.get_flag("maintenance/x").await.unwrap(), Some(true));
        assert_eq!(consul.get_flag("maintenance/y").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fire_records_and_reacts() {
        let consul = MemoryConsul::new().with_reaction(|event, state| {
            state.kv.insert("seen".to_string(), event.name.clone());
        });

        let id = consul
            .fire("deploy", &serde_json::json!({"repo": "r"}))
            .await
            .unwrap();

        assert_eq!(id, "event-1");
        assert_eq!(consul.fired().len(), 1);
        assert_eq!(consul.get("seen").await.unwrap().as_deref(), Some("deploy"));
    }
}
