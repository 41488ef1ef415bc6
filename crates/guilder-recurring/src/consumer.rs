//! Bus consumer for the recurring-transaction domain
//!
//! Drains the schedule and direct-debit channels until both are closed,
//! derives the deterministic series/instance ids and dispatches commands
//! through the aggregate store.

use crate::domain::{
    ProcessDirectDebitTransactionDocument, ProcessSchedule, RecurringTransactionAggregate,
    RecurringTransactionCommand,
};
use crate::resolver::{RecurringTransactionIdResolver, RecurringTransactionInstanceIdResolver};
use guilder_bus::{DirectDebitTransactionDocument, ScheduleDocument};
use guilder_eventsourcing::{Aggregate, AggregateStore};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RecurringDocumentsConsumer {
    schedules: flume::Receiver<ScheduleDocument>,
    direct_debits: flume::Receiver<DirectDebitTransactionDocument>,
    store: Arc<AggregateStore<RecurringTransactionAggregate>>,
    series_ids: RecurringTransactionIdResolver,
    instance_ids: RecurringTransactionInstanceIdResolver,
}

impl RecurringDocumentsConsumer {
    pub fn new(
        schedules: flume::Receiver<ScheduleDocument>,
        direct_debits: flume::Receiver<DirectDebitTransactionDocument>,
        store: Arc<AggregateStore<RecurringTransactionAggregate>>,
    ) -> Self {
        Self {
            schedules,
            direct_debits,
            store,
            series_ids: RecurringTransactionIdResolver::new(),
            instance_ids: RecurringTransactionInstanceIdResolver::new(),
        }
    }

    /// Consume until both channels are disconnected; see the account
    /// consumer for the shutdown contract
    pub async fn run(self) {
        let mut schedules_open = true;
        let mut direct_debits_open = true;

        while schedules_open || direct_debits_open {
            tokio::select! {
                document = self.schedules.recv_async(), if schedules_open => match document {
                    Ok(document) => self.handle_schedule_document(document).await,
                    Err(_) => schedules_open = false,
                },
                document = self.direct_debits.recv_async(), if direct_debits_open => match document {
                    Ok(document) => self.handle_direct_debit_document(document).await,
                    Err(_) => direct_debits_open = false,
                },
            }
        }

        debug!("recurring document consumer finished");
    }

    async fn handle_schedule_document(&self, document: ScheduleDocument) {
        let recurring_transaction_id = self
            .series_ids
            .resolve(document.institution, &document.institution_entity_id);

        let command = RecurringTransactionCommand::ProcessSchedule(ProcessSchedule {
            recurring_transaction_id,
            institution: document.institution,
            institution_entity_id: document.institution_entity_id,
            from_iban: document.from_iban,
            from_name: document.from_name,
            to_iban: document.to_iban,
            to_name: document.to_name,
            frequency: document.frequency,
            start_date: document.start_date,
            end_date: document.end_date,
            amount: document.amount,
            fetch_timestamp: document.fetch_timestamp,
        });
        self.dispatch(command).await;
    }

    async fn handle_direct_debit_document(&self, document: DirectDebitTransactionDocument) {
        let recurring_transaction_id = self
            .series_ids
            .resolve(document.institution, &document.institution_entity_id);
        let instance_id = self
            .instance_ids
            .resolve(document.institution, &document.institution_entity_id);

        let command = RecurringTransactionCommand::ProcessDirectDebitTransactionDocument(
            ProcessDirectDebitTransactionDocument {
                recurring_transaction_id,
                instance_id,
                institution: document.institution,
                institution_entity_id: document.institution_entity_id,
                from_iban: document.from_iban,
                from_name: document.from_name,
                to_iban: document.to_iban,
                to_name: document.to_name,
                transaction_date: document.transaction_date,
                amount: document.amount,
                fetch_timestamp: document.fetch_timestamp,
            },
        );
        self.dispatch(command).await;
    }

    async fn dispatch(&self, command: RecurringTransactionCommand) {
        if let Err(err) = self.store.execute(&command).await {
            warn!(
                command_type = RecurringTransactionAggregate::command_type(&command),
                error = %err,
                "could not handle command"
            );
        }
    }
}
