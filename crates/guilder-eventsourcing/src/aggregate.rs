//! Aggregate contract and command execution
//!
//! An aggregate is a closed pair of enums (commands, events) plus two pure
//! functions: `decide` turns the current state and a command into events,
//! `apply` folds one event into the state. All I/O lives in
//! [`AggregateStore`], which replays the log, evaluates the command and
//! appends under optimistic concurrency.

use crate::bus::EventBus;
use crate::error::{EventSourcingError, Result};
use crate::scheduler::{ScheduledCommand, ScheduledCommandStore};
use crate::store::{EventEnvelope, EventStore};
use crate::MAX_CONFLICT_RETRIES;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A command to run again later, keyed by a replaceable identifier
#[derive(Debug, Clone, PartialEq)]
pub struct FollowupCommand<C> {
    /// Scheduling slot: a second follow-up with the same identifier
    /// replaces the pending one
    pub identifier: String,
    pub due: DateTime<Utc>,
    pub command: C,
}

/// Outcome of evaluating one command against one state
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<E, C> {
    pub events: Vec<E>,
    pub followups: Vec<FollowupCommand<C>>,
}

impl<E, C> Decision<E, C> {
    pub fn none() -> Self {
        Self {
            events: Vec::new(),
            followups: Vec::new(),
        }
    }

    pub fn events(events: Vec<E>) -> Self {
        Self {
            events,
            followups: Vec::new(),
        }
    }

    pub fn with_followups(mut self, followups: Vec<FollowupCommand<C>>) -> Self {
        self.followups = followups;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.followups.is_empty()
    }
}

/// State machine of one aggregate type
pub trait Aggregate: Default + Send + Sync + Sized + 'static {
    type Command: Serialize + DeserializeOwned + Clone + Send + Sync;
    type Event: Serialize + DeserializeOwned + Clone + Send + Sync;

    /// Stable storage/routing key, e.g. `monetaryaccount`
    const AGGREGATE_TYPE: &'static str;

    /// Which aggregate instance a command addresses
    fn aggregate_id(command: &Self::Command) -> Uuid;

    /// Stable command-type tag, e.g. `monetaryaccount:process`
    fn command_type(command: &Self::Command) -> &'static str;

    /// Stable event-type tag, e.g. `monetaryaccount:new-found`
    fn event_type(event: &Self::Event) -> &'static str;

    /// Pure decision function; `now` is passed in so replays and tests
    /// stay deterministic
    fn decide(&self, command: &Self::Command, now: DateTime<Utc>) -> Decision<Self::Event, Self::Command>;

    /// Pure event application; must accept any event on the empty state
    fn apply(self, event: &Self::Event) -> Self;
}

/// Replay-evaluate-append executor for one aggregate type
pub struct AggregateStore<A: Aggregate> {
    events: Arc<dyn EventStore>,
    bus: EventBus,
    scheduled: Arc<dyn ScheduledCommandStore>,
    max_retries: usize,
    _marker: PhantomData<A>,
}

impl<A: Aggregate> AggregateStore<A> {
    pub fn new(
        events: Arc<dyn EventStore>,
        bus: EventBus,
        scheduled: Arc<dyn ScheduledCommandStore>,
    ) -> Self {
        Self {
            events,
            bus,
            scheduled,
            max_retries: MAX_CONFLICT_RETRIES,
            _marker: PhantomData,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Rebuild the current state by folding the stored log
    pub async fn load(&self, aggregate_id: Uuid) -> Result<(A, u64)> {
        let envelopes = self.events.load(A::AGGREGATE_TYPE, aggregate_id).await?;
        let version = envelopes.len() as u64;
        let mut state = A::default();
        for envelope in &envelopes {
            let event: A::Event = serde_json::from_value(envelope.data.clone())?;
            state = state.apply(&event);
        }
        Ok((state, version))
    }

    /// Evaluate `command` against the replayed state and commit the
    /// outcome. Version conflicts re-evaluate from a fresh replay; after
    /// `max_retries` re-evaluations the command is given up on.
    pub async fn execute(&self, command: &A::Command) -> Result<Vec<EventEnvelope>> {
        let aggregate_id = A::aggregate_id(command);

        let mut attempts = 0;
        loop {
            attempts += 1;

            let (state, version) = self.load(aggregate_id).await?;
            let now = Utc::now();
            let decision = state.decide(command, now);

            if decision.is_empty() {
                return Ok(Vec::new());
            }

            let envelopes: Vec<EventEnvelope> = decision
                .events
                .iter()
                .enumerate()
                .map(|(i, event)| {
                    Ok(EventEnvelope {
                        aggregate_type: A::AGGREGATE_TYPE.to_string(),
                        aggregate_id,
                        version: version + 1 + i as u64,
                        event_type: A::event_type(event).to_string(),
                        data: serde_json::to_value(event)?,
                        timestamp: now,
                    })
                })
                .collect::<Result<_>>()?;

            if !envelopes.is_empty() {
                match self
                    .events
                    .append(A::AGGREGATE_TYPE, aggregate_id, version, envelopes.clone())
                    .await
                {
                    Ok(()) => {}
                    Err(EventSourcingError::VersionConflict { .. }) if attempts <= self.max_retries => {
                        debug!(
                            aggregate_type = A::AGGREGATE_TYPE,
                            %aggregate_id,
                            attempt = attempts,
                            "append conflicted, re-evaluating"
                        );
                        continue;
                    }
                    Err(EventSourcingError::VersionConflict { .. }) => {
                        return Err(EventSourcingError::ConflictRetriesExhausted {
                            aggregate_id,
                            attempts,
                        });
                    }
                    Err(err) => return Err(err),
                }
            }

            for followup in &decision.followups {
                self.scheduled
                    .schedule(ScheduledCommand {
                        aggregate_type: A::AGGREGATE_TYPE.to_string(),
                        aggregate_id,
                        identifier: followup.identifier.clone(),
                        due: followup.due,
                        command: serde_json::to_value(&followup.command)?,
                    })
                    .await?;
            }

            // fire-and-forget: a lagging or absent subscriber never
            // rolls back the append
            for envelope in &envelopes {
                self.bus.publish(envelope.clone());
            }

            return Ok(envelopes);
        }
    }
}

/// Type-erased dispatch used by the scheduler to route persisted
/// commands back to their aggregate
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    fn aggregate_type(&self) -> &'static str;

    async fn dispatch_json(&self, command: &serde_json::Value) -> Result<()>;
}

#[async_trait]
impl<A: Aggregate> CommandDispatcher for AggregateStore<A> {
    fn aggregate_type(&self) -> &'static str {
        A::AGGREGATE_TYPE
    }

    async fn dispatch_json(&self, command: &serde_json::Value) -> Result<()> {
        let command: A::Command = serde_json::from_value(command.clone())?;
        self.execute(&command).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::InMemoryScheduledCommandStore;
    use crate::store::InMemoryEventStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterCommand {
        Add { id: Uuid, by: i64 },
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterEvent {
        Added { by: i64 },
    }

    #[derive(Default)]
    struct Counter {
        total: i64,
    }

    impl Aggregate for Counter {
        type Command = CounterCommand;
        type Event = CounterEvent;

        const AGGREGATE_TYPE: &'static str = "counter";

        fn aggregate_id(command: &Self::Command) -> Uuid {
            match command {
                CounterCommand::Add { id, .. } => *id,
            }
        }

        fn command_type(_: &Self::Command) -> &'static str {
            "counter:add"
        }

        fn event_type(_: &Self::Event) -> &'static str {
            "counter:added"
        }

        fn decide(&self, command: &Self::Command, now: DateTime<Utc>) -> Decision<Self::Event, Self::Command> {
            match command {
                CounterCommand::Add { id, by } => {
                    if *by == 0 {
                        return Decision::none();
                    }
                    Decision::events(vec![CounterEvent::Added { by: *by }]).with_followups(vec![
                        FollowupCommand {
                            identifier: "again".to_string(),
                            due: now + chrono::Duration::seconds(60),
                            command: CounterCommand::Add { id: *id, by: 0 },
                        },
                    ])
                }
            }
        }

        fn apply(mut self, event: &Self::Event) -> Self {
            match event {
                CounterEvent::Added { by } => self.total += by,
            }
            self
        }
    }

    fn aggregate_store() -> AggregateStore<Counter> {
        AggregateStore::new(
            Arc::new(InMemoryEventStore::new()),
            EventBus::new(16),
            Arc::new(InMemoryScheduledCommandStore::new()),
        )
    }

    #[tokio::test]
    async fn test_execute_appends_and_replays() {
        let store = aggregate_store();
        let id = Uuid::new_v4();

        store.execute(&CounterCommand::Add { id, by: 2 }).await.unwrap();
        store.execute(&CounterCommand::Add { id, by: 3 }).await.unwrap();

        let (state, version) = store.load(id).await.unwrap();
        assert_eq!(state.total, 5);
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn test_empty_decision_appends_nothing() {
        let store = aggregate_store();
        let id = Uuid::new_v4();

        let envelopes = store.execute(&CounterCommand::Add { id, by: 0 }).await.unwrap();
        assert!(envelopes.is_empty());
        let (_, version) = store.load(id).await.unwrap();
        assert_eq!(version, 0);
    }

    #[tokio::test]
    async fn test_execute_publishes_on_bus() {
        let store = aggregate_store();
        let mut subscription = store.bus.subscribe();
        let id = Uuid::new_v4();

        store.execute(&CounterCommand::Add { id, by: 7 }).await.unwrap();

        let published = subscription.recv().await.unwrap();
        assert_eq!(published.event_type, "counter:added");
        assert_eq!(published.aggregate_id, id);
        assert_eq!(published.version, 1);
    }

    #[tokio::test]
    async fn test_followups_are_persisted() {
        let scheduled = Arc::new(InMemoryScheduledCommandStore::new());
        let store = AggregateStore::<Counter>::new(
            Arc::new(InMemoryEventStore::new()),
            EventBus::new(16),
            scheduled.clone(),
        );
        let id = Uuid::new_v4();

        store.execute(&CounterCommand::Add { id, by: 1 }).await.unwrap();

        let due = scheduled
            .take_due(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].identifier, "again");
        assert_eq!(due[0].aggregate_id, id);
    }

    /// Store wrapper that reports a conflict for the first N appends
    struct FlakyStore {
        inner: InMemoryEventStore,
        conflicts_left: Mutex<usize>,
    }

    use parking_lot::Mutex;

    #[async_trait]
    impl EventStore for FlakyStore {
        async fn load(&self, aggregate_type: &str, aggregate_id: Uuid) -> Result<Vec<EventEnvelope>> {
            self.inner.load(aggregate_type, aggregate_id).await
        }

        async fn append(
            &self,
            aggregate_type: &str,
            aggregate_id: Uuid,
            expected_version: u64,
            events: Vec<EventEnvelope>,
        ) -> Result<()> {
            {
                let mut left = self.conflicts_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(EventSourcingError::VersionConflict {
                        aggregate_id,
                        expected: expected_version,
                        actual: expected_version + 1,
                    });
                }
            }
            self.inner.append(aggregate_type, aggregate_id, expected_version, events).await
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let store = AggregateStore::<Counter>::new(
            Arc::new(FlakyStore {
                inner: InMemoryEventStore::new(),
                conflicts_left: Mutex::new(2),
            }),
            EventBus::new(16),
            Arc::new(InMemoryScheduledCommandStore::new()),
        );
        let id = Uuid::new_v4();

        store.execute(&CounterCommand::Add { id, by: 4 }).await.unwrap();
        let (state, _) = store.load(id).await.unwrap();
        assert_eq!(state.total, 4);
    }

    #[tokio::test]
    async fn test_conflict_retries_exhaust() {
        let store = AggregateStore::<Counter>::new(
            Arc::new(FlakyStore {
                inner: InMemoryEventStore::new(),
                conflicts_left: Mutex::new(100),
            }),
            EventBus::new(16),
            Arc::new(InMemoryScheduledCommandStore::new()),
        );
        let id = Uuid::new_v4();

        let err = store.execute(&CounterCommand::Add { id, by: 4 }).await.unwrap_err();
        assert!(matches!(err, EventSourcingError::ConflictRetriesExhausted { attempts: 4, .. }));
    }
}
