//! Recurring-transaction domain
//!
//! Infers and maintains recurring payment series from provider schedules
//! and repeated direct debits:
//!
//! - the aggregate: commands, events, decision logic, reducers and the
//!   scheduled status rechecks
//! - deterministic series/instance id resolvers
//! - the bus consumer
//! - frequency inference and the Dutch business calendar it leans on

pub mod calendar;
pub mod consumer;
pub mod domain;
pub mod frequency;
pub mod resolver;

pub use calendar::end_of_next_workday_after;
pub use consumer::RecurringDocumentsConsumer;
pub use domain::{
    ProcessDirectDebitTransactionDocument, ProcessSchedule, ProcessScheduledTransaction,
    RecurringTransactionAggregate, RecurringTransactionCommand, RecurringTransactionEvent, Status,
};
pub use frequency::frequency_for;
pub use resolver::{RecurringTransactionIdResolver, RecurringTransactionInstanceIdResolver};
