//! Guilder document bus
//!
//! Five bounded MPMC channels carry documents from the provider
//! integration to the aggregate consumers, plus one channel for
//! refresh-lifecycle updates. The bus is constructed once at startup and
//! the two halves are handed out separately: producers get `BusSenders`,
//! consumers get `BusReceivers`, so direction is enforced at the call
//! site.
//!
//! When every sender for a channel is dropped the channel disconnects;
//! consumers observe that as end-of-stream and drain what is left. The
//! bounded capacity provides backpressure: a producer blocks once a
//! consumer falls 50 documents behind.

pub mod channels;
pub mod documents;

pub use channels::{Bus, BusReceivers, BusSenders, CHANNEL_CAPACITY};
pub use documents::{
    DirectDebitTransactionDocument, DoneRefreshingUpdate, Geolocation, MonetaryAccountDocument,
    RefreshUpdate, ScheduleDocument, StartRefreshUpdate, TransactionDocument,
};
