//! Refresh driver
//!
//! Owns the write half of the bus and sweeps all users periodically:
//! every credential of every user gets a provider client and a
//! [`UserRefresher`] run. A credential whose client cannot be built is
//! deleted (best-effort) and the sweep moves on. When the global context
//! is cancelled the driver finishes the sweep in flight, then drops the
//! bus senders, which closes the document channels and lets the
//! consumers drain out.

use crate::client::{ApiContext, BunqApi, HttpBunqApi};
use crate::error::Result;
use crate::ratelimit::RateLimiter;
use crate::refresher::UserRefresher;
use crate::stores::{CredentialsStore, RefreshTimestampStore, UsersStore};
use async_trait::async_trait;
use guilder_bus::BusSenders;
use guilder_types::UserId;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Builds a provider client from a stored credential context
#[async_trait]
pub trait BunqApiFactory: Send + Sync {
    async fn connect(
        &self,
        api_context: &str,
        token: &CancellationToken,
    ) -> Result<Arc<dyn BunqApi>>;
}

pub struct HttpBunqApiFactory {
    limiter: Arc<RateLimiter>,
}

impl HttpBunqApiFactory {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl BunqApiFactory for HttpBunqApiFactory {
    async fn connect(
        &self,
        api_context: &str,
        token: &CancellationToken,
    ) -> Result<Arc<dyn BunqApi>> {
        let context = ApiContext::from_json(api_context)?;
        let api = HttpBunqApi::connect(context, self.limiter.clone(), token).await?;
        Ok(Arc::new(api))
    }
}

pub struct RefreshDriver {
    users: Arc<dyn UsersStore>,
    credentials: Arc<dyn CredentialsStore>,
    timestamps: Arc<dyn RefreshTimestampStore>,
    api_factory: Arc<dyn BunqApiFactory>,
    senders: BusSenders,
    token: CancellationToken,
    sweep_interval: Duration,
}

impl RefreshDriver {
    pub fn new(
        users: Arc<dyn UsersStore>,
        credentials: Arc<dyn CredentialsStore>,
        timestamps: Arc<dyn RefreshTimestampStore>,
        api_factory: Arc<dyn BunqApiFactory>,
        senders: BusSenders,
        token: CancellationToken,
    ) -> Self {
        Self {
            users,
            credentials,
            timestamps,
            api_factory,
            senders,
            token,
            sweep_interval: Duration::from_secs(6 * 60 * 60),
        }
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Sweep immediately, then on every interval tick, until cancelled.
    /// Consuming `self` is what closes the bus: the senders drop here.
    pub async fn run(self) {
        loop {
            self.sweep().await;

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.sweep_interval) => {}
            }
        }

        info!("refresh driver stopping, closing document channels");
    }

    async fn sweep(&self) {
        let user_ids = match self.users.user_ids().await {
            Ok(user_ids) => user_ids,
            Err(err) => {
                warn!(error = %err, "could not list users to refresh");
                return;
            }
        };

        for user_id in user_ids {
            if self.token.is_cancelled() {
                return;
            }
            self.refresh_user(user_id).await;
        }
    }

    pub async fn refresh_user(&self, user_id: UserId) {
        let credentials = match self.credentials.credentials_for(user_id).await {
            Ok(credentials) => credentials,
            Err(err) => {
                warn!(%user_id, error = %err, "could not fetch credentials");
                return;
            }
        };

        // credentials are independent; refresh them in parallel
        let runs = credentials.into_iter().map(|credential| async move {
            match self
                .api_factory
                .connect(&credential.api_context, &self.token)
                .await
            {
                Ok(api) => {
                    let refresher = UserRefresher::new(
                        api,
                        self.timestamps.clone(),
                        self.senders.clone(),
                        self.token.clone(),
                    );
                    refresher.refresh(user_id).await;
                }
                Err(err) => {
                    warn!(
                        %user_id,
                        credential_id = %credential.id,
                        error = %err,
                        "removing credential, client could not be built"
                    );
                    if let Err(err) = self.credentials.delete(user_id, credential.id).await {
                        warn!(credential_id = %credential.id, error = %err, "could not remove credential");
                    }
                }
            }
        });
        futures::future::join_all(runs).await;
    }
}
