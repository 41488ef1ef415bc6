//! Guilder event-sourcing core
//!
//! The source of truth for every aggregate is its append-only event log.
//! This crate provides the pieces the two domains share:
//!
//! - `EventEnvelope` and the `EventStore` contract with optimistic
//!   concurrency, plus in-memory and sled-backed implementations
//! - the `Aggregate` trait: a pure `decide` (command → events) and a pure
//!   `apply` (state × event → state)
//! - `AggregateStore`, which replays the log, evaluates a command, appends
//!   the produced events and publishes them on the process event bus
//! - a durable store for scheduled follow-up commands and the scheduler
//!   task that dispatches them when due
//!
//! Commands for the same aggregate id are serialised through the
//! optimistic version check: a conflicting append is retried from a fresh
//! replay, at most [`MAX_CONFLICT_RETRIES`] times.

pub mod aggregate;
pub mod bus;
pub mod error;
pub mod scheduler;
pub mod store;

pub use aggregate::{Aggregate, AggregateStore, CommandDispatcher, Decision, FollowupCommand};
pub use bus::{spawn_event_logger, EventBus};
pub use error::{EventSourcingError, Result};
pub use scheduler::{
    CommandScheduler, InMemoryScheduledCommandStore, ScheduledCommand, ScheduledCommandStore,
    SledScheduledCommandStore,
};
pub use store::{EventEnvelope, EventStore, InMemoryEventStore, SledEventStore};

/// How often a conflicting append is re-evaluated before the command is
/// dropped
pub const MAX_CONFLICT_RETRIES: usize = 3;
