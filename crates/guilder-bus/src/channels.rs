//! Channel construction and direction-split handles

use crate::documents::{
    DirectDebitTransactionDocument, MonetaryAccountDocument, RefreshUpdate, ScheduleDocument,
    TransactionDocument,
};

/// Bound of every bus channel; producers block beyond this backlog
pub const CHANNEL_CAPACITY: usize = 50;

/// Write half of the bus. Cloning shares the same underlying channels;
/// a channel disconnects once every sender clone is dropped.
#[derive(Clone)]
pub struct BusSenders {
    pub updates: flume::Sender<RefreshUpdate>,
    pub accounts: flume::Sender<MonetaryAccountDocument>,
    pub transactions: flume::Sender<TransactionDocument>,
    pub schedules: flume::Sender<ScheduleDocument>,
    pub direct_debits: flume::Sender<DirectDebitTransactionDocument>,
}

/// Read half of the bus
#[derive(Clone)]
pub struct BusReceivers {
    pub updates: flume::Receiver<RefreshUpdate>,
    pub accounts: flume::Receiver<MonetaryAccountDocument>,
    pub transactions: flume::Receiver<TransactionDocument>,
    pub schedules: flume::Receiver<ScheduleDocument>,
    pub direct_debits: flume::Receiver<DirectDebitTransactionDocument>,
}

pub struct Bus;

impl Bus {
    /// Create the five bounded channels and split them into their halves
    pub fn bounded() -> (BusSenders, BusReceivers) {
        let (updates_tx, updates_rx) = flume::bounded(CHANNEL_CAPACITY);
        let (accounts_tx, accounts_rx) = flume::bounded(CHANNEL_CAPACITY);
        let (transactions_tx, transactions_rx) = flume::bounded(CHANNEL_CAPACITY);
        let (schedules_tx, schedules_rx) = flume::bounded(CHANNEL_CAPACITY);
        let (direct_debits_tx, direct_debits_rx) = flume::bounded(CHANNEL_CAPACITY);

        (
            BusSenders {
                updates: updates_tx,
                accounts: accounts_tx,
                transactions: transactions_tx,
                schedules: schedules_tx,
                direct_debits: direct_debits_tx,
            },
            BusReceivers {
                updates: updates_rx,
                accounts: accounts_rx,
                transactions: transactions_rx,
                schedules: schedules_rx,
                direct_debits: direct_debits_rx,
            },
        )
    }
}
