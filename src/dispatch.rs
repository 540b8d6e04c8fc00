//! Fire-and-wait event dispatch
//!
//! An event is fired on the bus, then, if asked, the store is polled until a
//! [`CompletionPredicate`] sees the effect or the timeout elapses. Nothing is
//! rolled back on timeout: the external consumer may still be working.

use std::time::Duration;
use tokio::time::Instant;

use crate::address::maintenance_key;
use crate::consul::ConsulBackend;
use crate::error::{Error, Result};
use crate::models::{ApplicationRecord, Event};

/// Decides whether a fired event has taken effect
pub trait CompletionPredicate: Send {
    /// Called once per poll with the record read before firing, the record
    /// read now, and the maintenance flag read now.
    fn is_complete(
        &mut self,
        before: Option<&ApplicationRecord>,
        after: Option<&ApplicationRecord>,
        maintenance: Option<bool>,
    ) -> bool;
}

impl<F> CompletionPredicate for F
where
    F: FnMut(Option<&ApplicationRecord>, Option<&ApplicationRecord>, Option<bool>) -> bool + Send,
{
    fn is_complete(
        &mut self,
        before: Option<&ApplicationRecord>,
        after: Option<&ApplicationRecord>,
        maintenance: Option<bool>,
    ) -> bool {
        self(before, after, maintenance)
    }
}

/// A deploy is done once the record shows a newer deploy date, or once a
/// record appears for a new service.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployFinished;

impl CompletionPredicate for DeployFinished {
    fn is_complete(
        &mut self,
        before: Option<&ApplicationRecord>,
        after: Option<&ApplicationRecord>,
        _maintenance: Option<bool>,
    ) -> bool {
        match (before, after) {
            (Some(before), Some(after)) => after.deploy_date > before.deploy_date,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

/// A migration is done once the target entered maintenance and left it.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateFinished {
    entered_maintenance: bool,
}

impl CompletionPredicate for MigrateFinished {
    fn is_complete(
        &mut self,
        _before: Option<&ApplicationRecord>,
        _after: Option<&ApplicationRecord>,
        maintenance: Option<bool>,
    ) -> bool {
        if maintenance == Some(true) {
            self.entered_maintenance = true;
            return false;
        }
        self.entered_maintenance
    }
}

/// Fires events and optionally waits for their effect
pub struct EventDispatcher<'a> {
    backend: &'a dyn ConsulBackend,
    poll_interval: Duration,
}

impl<'a> EventDispatcher<'a> {
    pub fn new(backend: &'a dyn ConsulBackend, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
        }
    }

    async fn read_record(&self, key: &str) -> Result<Option<ApplicationRecord>> {
        match self.backend.get(key).await? {
            Some(raw) => Ok(Some(ApplicationRecord::decode(key, &raw)?)),
            None => Ok(None),
        }
    }

    /// Fire `event` for the service stored at `key`
    ///
    /// Without `should_wait` this returns as soon as the bus accepted the
    /// event. Otherwise the record and its maintenance flag are re-read
    /// every poll interval until `predicate` holds, failing with
    /// [`Error::Timeout`] once `timeout` has elapsed.
    pub async fn fire<P: CompletionPredicate>(
        &self,
        key: &str,
        event: &Event,
        should_wait: bool,
        mut predicate: P,
        timeout: Duration,
    ) -> Result<String> {
        let before = self.read_record(key).await?;
        let event_id = self.backend.fire(event.kind.as_str(), &event.payload).await?;
        tracing::info!(key = %key, event = %event.kind, event_id = %event_id, "Event dispatched");

        if !should_wait {
            return Ok(event_id);
        }

        let flag_key = maintenance_key(key);
        let started = Instant::now();
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let after = self.read_record(key).await?;
            let maintenance = self.backend.get_flag(&flag_key).await?;
            if predicate.is_complete(before.as_ref(), after.as_ref(), maintenance) {
                tracing::info!(
                    key = %key,
                    event_id = %event_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Event completed"
                );
                return Ok(event_id);
            }

            let elapsed = started.elapsed();
            if elapsed > timeout {
                tracing::warn!(
                    key = %key,
                    event_id = %event_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Gave up waiting for event"
                );
                return Err(Error::Timeout { event_id, timeout });
            }
            tracing::debug!(key = %key, event_id = %event_id, maintenance = ?maintenance, "Waiting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consul::MemoryConsul;
    use crate::models::EventKind;

    const KEY: &str = "app/repo_main.12345";

    fn record_at(date: &str) -> String {
        format!(
            r#"{{"repo_url": "ssh://git@host/ns/repo", "branch": "main",
                "deploy_date": "{date}", "deploy_id": "id",
                "master": "node-1", "slave": "node-2"}}"#
        )
    }

    fn event() -> Event {
        Event {
            kind: EventKind::Deploy,
            payload: serde_json::json!({"repo": "ssh://git@host/ns/repo"}),
        }
    }

    fn dispatcher(consul: &MemoryConsul) -> EventDispatcher<'_> {
        EventDispatcher::new(consul, Duration::from_millis(5))
    }

    fn record(date: &str) -> ApplicationRecord {
        ApplicationRecord::decode(KEY, &record_at(date)).unwrap()
    }

    #[test]
    fn test_deploy_predicate() {
        let old = record("2018-08-05T224229.591386");
        let new = record("2018-08-05T224300.000001");
        let mut predicate = DeployFinished;

        assert!(predicate.is_complete(Some(&old), Some(&new), None));
        assert!(!predicate.is_complete(Some(&old), Some(&old), None));
        assert!(!predicate.is_complete(Some(&new), Some(&old), None));
        assert!(predicate.is_complete(None, Some(&new), None));
        assert!(!predicate.is_complete(None, None, None));
        assert!(!predicate.is_complete(Some(&old), None, None));
    }

    #[test]
    fn test_migrate_predicate_latches() {
        let mut predicate = MigrateFinished::default();

        assert!(!predicate.is_complete(None, None, None));
        assert!(!predicate.is_complete(None, None, Some(false)));
        assert!(!predicate.is_complete(None, None, Some(true)));
        assert!(!predicate.is_complete(None, None, Some(true)));
        assert!(predicate.is_complete(None, None, None));
    }

    #[tokio::test]
    async fn test_fire_without_wait_returns_id() {
        let consul = MemoryConsul::new().with_value(KEY, record_at("2018-08-05T224229.591386"));

        let id = dispatcher(&consul)
            .fire(KEY, &event(), false, DeployFinished, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(id, "event-1");
        assert_eq!(consul.fired()[0].name, "deploy");
    }

    #[tokio::test]
    async fn test_fire_waits_for_newer_deploy_date() {
        let consul = MemoryConsul::new()
            .with_value(KEY, record_at("2018-08-05T224229.591386"))
            .with_reaction(|_, state| {
                state
                    .kv
                    .insert(KEY.to_string(), record_at("2018-08-06T080000.000001"));
            });

        let id = dispatcher(&consul)
            .fire(KEY, &event(), true, DeployFinished, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(id, "event-1");
    }

    #[tokio::test]
    async fn test_fire_times_out_without_change() {
        let consul = MemoryConsul::new().with_value(KEY, record_at("2018-08-05T224229.591386"));

        let result = dispatcher(&consul)
            .fire(KEY, &event(), true, DeployFinished, Duration::from_millis(20))
            .await;

        match result {
            Err(Error::Timeout { event_id, timeout }) => {
                assert_eq!(event_id, "event-1");
                assert_eq!(timeout, Duration::from_millis(20));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // the event stays fired
        assert_eq!(consul.fired().len(), 1);
    }

    #[tokio::test]
    async fn test_fire_waits_for_maintenance_cycle() {
        let consul = MemoryConsul::new().with_value(KEY, record_at("2018-08-05T224229.591386"));
        consul.script_flag(
            "maintenance/repo_main.12345",
            [None, Some(true), Some(true), None],
        );

        let mut polls = 0;
        let mut migrate = MigrateFinished::default();
        let counting = |before: Option<&ApplicationRecord>,
                        after: Option<&ApplicationRecord>,
                        flag: Option<bool>| {
            polls += 1;
            migrate.is_complete(before, after, flag)
        };

        dispatcher(&consul)
            .fire(KEY, &event(), true, counting, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(polls, 4);
    }

    #[tokio::test]
    async fn test_fire_for_new_service_waits_for_record() {
        let consul = MemoryConsul::new().with_reaction(|_, state| {
            state
                .kv
                .insert(KEY.to_string(), record_at("2018-08-05T224229.591386"));
        });

        assert!(dispatcher(&consul)
            .fire(KEY, &event(), true, DeployFinished, Duration::from_secs(5))
            .await
            .is_ok());
    }
}
