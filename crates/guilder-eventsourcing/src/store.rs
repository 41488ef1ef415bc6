//! Append-only event storage
//!
//! Events are stored as envelopes keyed by (aggregate type, aggregate id,
//! version); versions start at 1 and are strictly monotonic per aggregate.
//! Appends carry the version the writer last observed; a mismatch means
//! another writer got there first and the command must be re-evaluated.

use crate::error::{EventSourcingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One committed event, as stored and as published on the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    /// 1-based, monotonic per aggregate
    pub version: u64,
    /// Stable wire identity, e.g. `monetaryaccount:new-found`
    pub event_type: String,
    /// Opaque payload blob
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Load the full log for one aggregate, oldest first
    async fn load(&self, aggregate_type: &str, aggregate_id: Uuid) -> Result<Vec<EventEnvelope>>;

    /// Append `events` atomically, failing with `VersionConflict` when the
    /// aggregate's current version is not `expected_version`. The
    /// envelopes must already carry versions `expected_version + 1..`.
    async fn append(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<EventEnvelope>,
    ) -> Result<()>;
}

/// Event store held entirely in memory; the default for tests and for
/// development bootstraps
#[derive(Default)]
pub struct InMemoryEventStore {
    logs: RwLock<HashMap<(String, Uuid), Vec<EventEnvelope>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn load(&self, aggregate_type: &str, aggregate_id: Uuid) -> Result<Vec<EventEnvelope>> {
        let logs = self.logs.read();
        Ok(logs
            .get(&(aggregate_type.to_string(), aggregate_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn append(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<EventEnvelope>,
    ) -> Result<()> {
        let mut logs = self.logs.write();
        let log = logs
            .entry((aggregate_type.to_string(), aggregate_id))
            .or_default();

        let actual = log.len() as u64;
        if actual != expected_version {
            return Err(EventSourcingError::VersionConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        log.extend(events);
        Ok(())
    }
}

/// Event store backed by a sled tree.
///
/// Keys are `{aggregate_type}/{aggregate_id}/{version:020}` so a prefix
/// scan yields one aggregate's log in version order. Appends from this
/// process are serialised by a mutex; the version check still guards the
/// log itself.
pub struct SledEventStore {
    tree: sled::Tree,
    append_lock: Mutex<()>,
}

impl SledEventStore {
    pub fn open(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree("events")?;
        Ok(Self {
            tree,
            append_lock: Mutex::new(()),
        })
    }

    fn prefix(aggregate_type: &str, aggregate_id: Uuid) -> String {
        format!("{aggregate_type}/{aggregate_id}/")
    }

    fn key(aggregate_type: &str, aggregate_id: Uuid, version: u64) -> String {
        format!("{aggregate_type}/{aggregate_id}/{version:020}")
    }

    fn current_version(&self, aggregate_type: &str, aggregate_id: Uuid) -> Result<u64> {
        let prefix = Self::prefix(aggregate_type, aggregate_id);
        match self.tree.scan_prefix(prefix.as_bytes()).last() {
            Some(entry) => {
                let (key, _) = entry?;
                let key = String::from_utf8_lossy(&key);
                let version = key
                    .rsplit('/')
                    .next()
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or_else(|| EventSourcingError::Storage(format!("malformed key {key}")))?;
                Ok(version)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl EventStore for SledEventStore {
    async fn load(&self, aggregate_type: &str, aggregate_id: Uuid) -> Result<Vec<EventEnvelope>> {
        let prefix = Self::prefix(aggregate_type, aggregate_id);
        let mut envelopes = Vec::new();
        for entry in self.tree.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            envelopes.push(serde_json::from_slice(&value)?);
        }
        Ok(envelopes)
    }

    async fn append(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<EventEnvelope>,
    ) -> Result<()> {
        let _guard = self.append_lock.lock();

        let actual = self.current_version(aggregate_type, aggregate_id)?;
        if actual != expected_version {
            return Err(EventSourcingError::VersionConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        let mut batch = sled::Batch::default();
        for event in &events {
            let key = Self::key(aggregate_type, aggregate_id, event.version);
            batch.insert(key.as_bytes(), serde_json::to_vec(event)?);
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }
}
