//! Bus consumer for the monetary-account domain
//!
//! Drains the account and transaction channels until both are closed,
//! resolves internal ids and dispatches commands through the aggregate
//! store. A document whose identities cannot be resolved is logged and
//! dropped; a transaction document is dispatched either for both of its
//! sides or not at all.

use crate::domain::{
    MonetaryAccountAggregate, MonetaryAccountCommand, ProcessMonetaryAccount,
    ProcessTransactionDocument,
};
use crate::resolver::{MonetaryAccountIdResolver, TransactionIdResolver};
use guilder_bus::{MonetaryAccountDocument, TransactionDocument};
use guilder_eventsourcing::{Aggregate, AggregateStore};
use guilder_types::TransactionParty;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct AccountDocumentsConsumer {
    accounts: flume::Receiver<MonetaryAccountDocument>,
    transactions: flume::Receiver<TransactionDocument>,
    store: Arc<AggregateStore<MonetaryAccountAggregate>>,
    account_ids: Arc<dyn MonetaryAccountIdResolver>,
    transaction_ids: TransactionIdResolver,
}

impl AccountDocumentsConsumer {
    pub fn new(
        accounts: flume::Receiver<MonetaryAccountDocument>,
        transactions: flume::Receiver<TransactionDocument>,
        store: Arc<AggregateStore<MonetaryAccountAggregate>>,
        account_ids: Arc<dyn MonetaryAccountIdResolver>,
    ) -> Self {
        Self {
            accounts,
            transactions,
            store,
            account_ids,
            transaction_ids: TransactionIdResolver::new(),
        }
    }

    /// Consume until both channels are disconnected. Shutdown is observed
    /// through channel closure: the refresher drops its senders once the
    /// global context is cancelled, after which the remaining documents
    /// drain here and the loop ends.
    pub async fn run(self) {
        let mut accounts_open = true;
        let mut transactions_open = true;

        while accounts_open || transactions_open {
            // biased: pending account documents are handled before
            // transactions, so an account exists by the time its own
            // transactions come through
            tokio::select! {
                biased;

                document = self.accounts.recv_async(), if accounts_open => match document {
                    Ok(document) => self.handle_account_document(document).await,
                    Err(_) => accounts_open = false,
                },
                document = self.transactions.recv_async(), if transactions_open => match document {
                    Ok(document) => self.handle_transaction_document(document).await,
                    Err(_) => transactions_open = false,
                },
            }
        }

        debug!("account document consumer finished");
    }

    async fn handle_account_document(&self, document: MonetaryAccountDocument) {
        let resolved = self
            .account_ids
            .resolve(
                Some(&document.iban),
                Some(document.institution),
                Some(&document.institution_entity_id),
                Some(&document.alias),
            )
            .await;

        let monetary_account_id = match resolved {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "could not resolve id for monetary account");
                return;
            }
        };

        let command = MonetaryAccountCommand::ProcessMonetaryAccount(ProcessMonetaryAccount {
            monetary_account_id,
            iban: document.iban,
            joint: document.joint,
            owner_user_id: document.owner_user_id,
            alias: document.alias,
            institution: document.institution,
            institution_entity_id: document.institution_entity_id,
            balance: document.balance,
            fetch_timestamp: document.fetch_timestamp,
        });
        self.dispatch(command).await;
    }

    async fn handle_transaction_document(&self, document: TransactionDocument) {
        let (from_resolved, to_resolved) = tokio::join!(
            self.account_ids.resolve(
                document.from_iban.as_ref(),
                document.from_institution,
                document.from_institution_entity_id.as_deref(),
                document.from_name.as_deref(),
            ),
            self.account_ids.resolve(
                document.to_iban.as_ref(),
                document.to_institution,
                document.to_institution_entity_id.as_deref(),
                document.to_name.as_deref(),
            ),
        );

        // no partial dispatch: either both sides resolve or the document
        // is dropped
        let (from_id, to_id) = match (from_resolved, to_resolved) {
            (Ok(from_id), Ok(to_id)) => (from_id, to_id),
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "could not resolve id for transaction party");
                return;
            }
        };

        let transaction_id = self.transaction_ids.resolve(
            document.from_iban.as_ref(),
            document.to_iban.as_ref(),
            &document.amount,
            &document.description,
            document.transaction_date,
        );

        let institution_entity_id = document
            .from_institution_entity_id
            .clone()
            .or_else(|| document.to_institution_entity_id.clone())
            .unwrap_or_default();

        let base = ProcessTransactionDocument {
            id: transaction_id,
            monetary_account_id: from_id,
            from_monetary_account_id: from_id,
            from: TransactionParty::new(document.from_iban.clone(), document.from_name.clone()),
            to_monetary_account_id: to_id,
            to: TransactionParty::new(document.to_iban.clone(), document.to_name.clone()),
            institution_entity_id,
            amount: document.amount.clone(),
            description: document.description.clone(),
            institution_schedule_id: document.institution_schedule_id.clone(),
            is_scheduled: document.institution_schedule_id.is_some(),
            balance_after_mutation: document.balance_after_mutation.clone(),
            transaction_date: document.transaction_date,
            fetch_timestamp: document.fetch_timestamp,
        };

        // both sides of the double entry record the reference
        self.dispatch(MonetaryAccountCommand::ProcessTransactionDocument(base.clone()))
            .await;

        let mut for_payee = base;
        for_payee.monetary_account_id = to_id;
        self.dispatch(MonetaryAccountCommand::ProcessTransactionDocument(for_payee))
            .await;
    }

    async fn dispatch(&self, command: MonetaryAccountCommand) {
        if let Err(err) = self.store.execute(&command).await {
            warn!(
                command_type = MonetaryAccountAggregate::command_type(&command),
                error = %err,
                "could not handle command"
            );
        }
    }
}
