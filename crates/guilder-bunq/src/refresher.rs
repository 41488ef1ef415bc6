//! Per-user refresher
//!
//! Turns one user's provider accounts into documents on the bus. Every
//! account gets its own sync task bracketed by a start/done lifecycle
//! pair with a shared sync id; the done update is emitted no matter how
//! the sync ends, cancellation included, so downstream observers can
//! always pair the two.

use crate::client::{ApiAccount, BunqAccountId, BunqApi};
use crate::stores::RefreshTimestampStore;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use guilder_bus::{BusSenders, DoneRefreshingUpdate, RefreshUpdate, StartRefreshUpdate};
use guilder_types::{SyncId, UserId};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct UserRefresher {
    api: Arc<dyn BunqApi>,
    timestamps: Arc<dyn RefreshTimestampStore>,
    senders: BusSenders,
    token: CancellationToken,
}

impl UserRefresher {
    pub fn new(
        api: Arc<dyn BunqApi>,
        timestamps: Arc<dyn RefreshTimestampStore>,
        senders: BusSenders,
        token: CancellationToken,
    ) -> Self {
        Self {
            api,
            timestamps,
            senders,
            token,
        }
    }

    /// Fetch the user's accounts and sync each one; returns once every
    /// sync task has emitted its done update
    pub async fn refresh(&self, user_id: UserId) {
        let mut accounts = self.api.fetch_accounts(self.token.clone());
        let mut syncs = JoinSet::new();

        while let Some(account) = accounts.next().await {
            match account {
                Err(err) => warn!(error = %err, "error from provider while listing accounts"),
                Ok(account) => {
                    let refresher = self.clone();
                    syncs.spawn(async move { refresher.sync_account(user_id, account).await });
                }
            }
        }

        while syncs.join_next().await.is_some() {}
    }

    async fn sync_account(&self, user_id: UserId, account: ApiAccount) {
        let last_refresh = match self.timestamps.last_refresh_for(account.id).await {
            Ok(Some(last_refresh)) => last_refresh,
            Ok(None) => DateTime::UNIX_EPOCH,
            Err(err) => {
                warn!(account_id = %account.id, error = %err, "could not load last refresh");
                DateTime::UNIX_EPOCH
            }
        };

        let start = StartRefreshUpdate {
            user_id,
            sync_id: SyncId::new(),
            institution_entity_id: account.id.to_string(),
            started: Utc::now(),
        };
        let _ = self
            .senders
            .updates
            .send_async(RefreshUpdate::Started(start.clone()))
            .await;

        let account_id = account.id;
        let _ = self
            .senders
            .accounts
            .send_async(account.into_document(user_id))
            .await;

        tokio::join!(
            self.sync_transactions(account_id, last_refresh),
            self.sync_schedules(account_id),
            self.sync_direct_debits(account_id, last_refresh),
        );

        // best-effort: a failed save only means re-reading old
        // transactions next time, which deduplication absorbs
        if let Err(err) = self
            .timestamps
            .save_last_refresh(account_id, start.started)
            .await
        {
            warn!(account_id = %account_id, error = %err, "unable to save last refresh time");
        }

        let done = DoneRefreshingUpdate::from_start(&start, Utc::now());
        let _ = self
            .senders
            .updates
            .send_async(RefreshUpdate::Done(done))
            .await;
    }

    async fn sync_transactions(&self, account_id: BunqAccountId, newer_than: DateTime<Utc>) {
        let mut transactions =
            self.api
                .fetch_transactions(account_id, newer_than, self.token.clone());

        while let Some(transaction) = transactions.next().await {
            match transaction {
                Err(err) => warn!(account_id = %account_id, error = %err, "error syncing transaction"),
                Ok(transaction) => {
                    let _ = self
                        .senders
                        .transactions
                        .send_async(transaction.into_document())
                        .await;
                }
            }
        }
    }

    async fn sync_schedules(&self, account_id: BunqAccountId) {
        let mut schedules = self.api.fetch_schedules(account_id, self.token.clone());

        while let Some(schedule) = schedules.next().await {
            match schedule {
                Err(err) => warn!(account_id = %account_id, error = %err, "error syncing schedule"),
                Ok(schedule) => match schedule.into_document() {
                    Some(document) => {
                        let _ = self.senders.schedules.send_async(document).await;
                    }
                    None => {
                        debug!(account_id = %account_id, "schedule without party IBANs dropped")
                    }
                },
            }
        }
    }

    async fn sync_direct_debits(
        &self,
        account_id: BunqAccountId,
        newer_than: DateTime<Utc>,
    ) {
        let mut debits =
            self.api
                .fetch_direct_debit_transactions(account_id, newer_than, self.token.clone());

        while let Some(debit) = debits.next().await {
            match debit {
                Err(err) => warn!(account_id = %account_id, error = %err, "error syncing direct debit"),
                Ok(debit) => match debit.into_document() {
                    Some(document) => {
                        let _ = self.senders.direct_debits.send_async(document).await;
                    }
                    None => {
                        debug!(account_id = %account_id, "direct debit without debtor IBAN dropped")
                    }
                },
            }
        }
    }
}
