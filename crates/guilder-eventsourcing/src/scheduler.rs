//! Durable scheduled commands
//!
//! Aggregates can ask for a command to be re-dispatched later (status
//! rechecks). The pending set is keyed by (aggregate type, aggregate id,
//! identifier): scheduling the same identifier again replaces the earlier
//! entry. The sled-backed store keeps pending entries across restarts;
//! [`CommandScheduler`] polls for due entries and routes them back
//! through the aggregate stores.

use crate::aggregate::CommandDispatcher;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// One persisted follow-up command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledCommand {
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub identifier: String,
    pub due: DateTime<Utc>,
    /// Serialized command, deserialized by the owning aggregate store
    pub command: serde_json::Value,
}

#[async_trait]
pub trait ScheduledCommandStore: Send + Sync {
    /// Insert or replace the entry for this (type, id, identifier) slot
    async fn schedule(&self, command: ScheduledCommand) -> Result<()>;

    /// Remove and return every entry due at or before `now`
    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledCommand>>;
}

type Slot = (String, Uuid, String);

#[derive(Default)]
pub struct InMemoryScheduledCommandStore {
    pending: RwLock<HashMap<Slot, ScheduledCommand>>,
}

impl InMemoryScheduledCommandStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduledCommandStore for InMemoryScheduledCommandStore {
    async fn schedule(&self, command: ScheduledCommand) -> Result<()> {
        let slot = (
            command.aggregate_type.clone(),
            command.aggregate_id,
            command.identifier.clone(),
        );
        self.pending.write().insert(slot, command);
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledCommand>> {
        let mut pending = self.pending.write();
        let due_slots: Vec<Slot> = pending
            .iter()
            .filter(|(_, cmd)| cmd.due <= now)
            .map(|(slot, _)| slot.clone())
            .collect();
        let mut due: Vec<ScheduledCommand> = due_slots
            .into_iter()
            .filter_map(|slot| pending.remove(&slot))
            .collect();
        due.sort_by_key(|cmd| cmd.due);
        Ok(due)
    }
}

/// Sled-backed store; entries survive process restarts
pub struct SledScheduledCommandStore {
    tree: sled::Tree,
}

impl SledScheduledCommandStore {
    pub fn open(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree("scheduled-commands")?;
        Ok(Self { tree })
    }

    fn key(command: &ScheduledCommand) -> String {
        format!(
            "{}/{}/{}",
            command.aggregate_type, command.aggregate_id, command.identifier
        )
    }
}

#[async_trait]
impl ScheduledCommandStore for SledScheduledCommandStore {
    async fn schedule(&self, command: ScheduledCommand) -> Result<()> {
        self.tree
            .insert(Self::key(&command).as_bytes(), serde_json::to_vec(&command)?)?;
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledCommand>> {
        let mut due = Vec::new();
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let command: ScheduledCommand = serde_json::from_slice(&value)?;
            if command.due <= now {
                self.tree.remove(key)?;
                due.push(command);
            }
        }
        due.sort_by_key(|cmd| cmd.due);
        Ok(due)
    }
}

/// Polls the store and dispatches due commands to their aggregate
pub struct CommandScheduler {
    store: Arc<dyn ScheduledCommandStore>,
    dispatchers: HashMap<&'static str, Arc<dyn CommandDispatcher>>,
    poll_interval: Duration,
}

impl CommandScheduler {
    pub fn new(store: Arc<dyn ScheduledCommandStore>) -> Self {
        Self {
            store,
            dispatchers: HashMap::new(),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn register(mut self, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        self.dispatchers.insert(dispatcher.aggregate_type(), dispatcher);
        self
    }

    /// Run until the token is cancelled
    pub async fn run(self, token: CancellationToken) {
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => self.dispatch_due().await,
            }
        }
    }

    async fn dispatch_due(&self) {
        let due = match self.store.take_due(Utc::now()).await {
            Ok(due) => due,
            Err(err) => {
                warn!(error = %err, "could not read due scheduled commands");
                return;
            }
        };

        for command in due {
            let Some(dispatcher) = self.dispatchers.get(command.aggregate_type.as_str()) else {
                warn!(
                    aggregate_type = %command.aggregate_type,
                    "no dispatcher for scheduled command"
                );
                continue;
            };

            debug!(
                aggregate_type = %command.aggregate_type,
                aggregate_id = %command.aggregate_id,
                identifier = %command.identifier,
                "dispatching scheduled command"
            );

            if let Err(err) = dispatcher.dispatch_json(&command.command).await {
                warn!(
                    aggregate_type = %command.aggregate_type,
                    aggregate_id = %command.aggregate_id,
                    identifier = %command.identifier,
                    error = %err,
                    "scheduled command failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn command(identifier: &str, due: DateTime<Utc>) -> ScheduledCommand {
        ScheduledCommand {
            aggregate_type: "recurring".to_string(),
            aggregate_id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            due,
            command: serde_json::json!({"type": "recheck"}),
        }
    }

    #[tokio::test]
    async fn test_take_due_only_returns_due() {
        let store = InMemoryScheduledCommandStore::new();
        let now = Utc::now();

        store.schedule(command("past", now - ChronoDuration::seconds(5))).await.unwrap();
        store.schedule(command("future", now + ChronoDuration::hours(1))).await.unwrap();

        let due = store.take_due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].identifier, "past");

        // taking is destructive
        assert!(store.take_due(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_identifier_replaces_pending() {
        let store = InMemoryScheduledCommandStore::new();
        let now = Utc::now();
        let aggregate_id = Uuid::new_v4();

        let mut first = command("1-min", now - ChronoDuration::seconds(10));
        first.aggregate_id = aggregate_id;
        let mut second = command("1-min", now - ChronoDuration::seconds(1));
        second.aggregate_id = aggregate_id;
        second.command = serde_json::json!({"type": "recheck", "n": 2});

        store.schedule(first).await.unwrap();
        store.schedule(second.clone()).await.unwrap();

        let due = store.take_due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0], second);
    }

    #[tokio::test]
    async fn test_sled_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();

        {
            let db = sled::open(dir.path()).unwrap();
            let store = SledScheduledCommandStore::open(&db).unwrap();
            store.schedule(command("1-min", now)).await.unwrap();
            db.flush().unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let store = SledScheduledCommandStore::open(&db).unwrap();
        let due = store.take_due(now + ChronoDuration::seconds(1)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].identifier, "1-min");
    }
}
