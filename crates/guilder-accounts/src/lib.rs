//! Monetary-account domain
//!
//! Everything that turns account and transaction documents into the
//! monetary-account event log:
//!
//! - the aggregate itself: commands, events, decision logic and reducers
//! - the identity resolvers that map provider keys to stable internal ids
//! - the consumer that drains the bus and dispatches commands

pub mod consumer;
pub mod domain;
pub mod resolver;

pub use consumer::AccountDocumentsConsumer;
pub use domain::{
    MonetaryAccountAggregate, MonetaryAccountCommand, MonetaryAccountDetails, MonetaryAccountEvent,
    ProcessMonetaryAccount, ProcessTransactionDocument,
};
pub use resolver::{
    InMemoryMonetaryAccountIdResolver, MonetaryAccountIdResolver, ResolveError, TransactionIdResolver,
};
