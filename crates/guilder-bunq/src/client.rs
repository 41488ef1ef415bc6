//! Rate-limited bunq client
//!
//! Exposes the four streaming operations the refresher drives. Streams
//! deliver per-item errors inline instead of aborting: one unparseable
//! payment does not cost the rest of the page. Every HTTP round trip
//! first takes a token from the matching rate-limit bucket, and
//! cancelling the context stops production at the next suspension point.

use crate::error::{BunqError, Result};
use crate::ratelimit::RateLimiter;
use crate::wire::{
    self, WireEnvelope, WireMonetaryAccount, WireMonetaryAccountBankItem,
    WireMonetaryAccountSavingItem, WirePayment, WirePaymentItem, WireRequestResponse,
    WireRequestResponseItem, WireScheduledPayment, WireScheduledPaymentItem,
    WireSessionServerItem,
};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use guilder_types::{Iban, Money, Period};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// bunq's own id for a monetary account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BunqAccountId(pub i64);

impl fmt::Display for BunqAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BunqPaymentId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BunqRequestResponseId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BunqScheduleId(pub i64);

// ============================================================================
// Items produced by the streams
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiAccount {
    pub id: BunqAccountId,
    pub iban: Iban,
    pub joint: bool,
    pub alias: String,
    pub balance: Money,
    pub fetch_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiGeolocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub radius: f64,
}

#[derive(Debug, Clone)]
pub struct ApiTransaction {
    pub id: BunqPaymentId,
    pub amount: Money,
    pub name: Option<String>,
    pub iban: Option<Iban>,
    pub counterparty_name: Option<String>,
    pub counterparty_iban: Option<Iban>,
    pub description: String,
    pub institution_schedule_id: Option<String>,
    pub balance_after_mutation: Money,
    pub geolocation: Option<ApiGeolocation>,
    pub transaction_date: DateTime<Utc>,
    pub fetch_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ApiDirectDebitTransaction {
    pub id: BunqRequestResponseId,
    pub amount: Money,
    pub name: Option<String>,
    pub iban: Option<Iban>,
    pub counterparty_name: Option<String>,
    pub counterparty_iban: Option<Iban>,
    pub description: String,
    pub credit_scheme_id: String,
    pub mandate_id: String,
    pub created: DateTime<Utc>,
    pub responded: Option<DateTime<Utc>>,
    pub fetch_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ApiSchedule {
    pub id: BunqScheduleId,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub frequency: Period,
    pub amount: Money,
    pub description: String,
    pub name: Option<String>,
    pub iban: Option<Iban>,
    pub counterparty_name: Option<String>,
    pub counterparty_iban: Option<Iban>,
    pub fetch_timestamp: DateTime<Utc>,
}

pub type AccountStream = BoxStream<'static, Result<ApiAccount>>;
pub type TransactionStream = BoxStream<'static, Result<ApiTransaction>>;
pub type DirectDebitStream = BoxStream<'static, Result<ApiDirectDebitTransaction>>;
pub type ScheduleStream = BoxStream<'static, Result<ApiSchedule>>;

/// The slice of bunq the refresher needs
pub trait BunqApi: Send + Sync {
    /// Bank and savings accounts, merged into one stream
    fn fetch_accounts(&self, token: CancellationToken) -> AccountStream;

    /// Payments newer than `newer_than`, newest page first, paginated
    /// until a page has nothing newer
    fn fetch_transactions(
        &self,
        account_id: BunqAccountId,
        newer_than: DateTime<Utc>,
        token: CancellationToken,
    ) -> TransactionStream;

    /// Answered direct-debit requests, same pagination rule
    fn fetch_direct_debit_transactions(
        &self,
        account_id: BunqAccountId,
        newer_than: DateTime<Utc>,
        token: CancellationToken,
    ) -> DirectDebitStream;

    /// Standing orders; a single page
    fn fetch_schedules(&self, account_id: BunqAccountId, token: CancellationToken)
        -> ScheduleStream;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Stored credential payload: everything needed to talk to bunq on
/// behalf of one bunq user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiContext {
    pub base_url: String,
    pub api_key: String,
    pub bunq_user_id: String,
}

impl ApiContext {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Clone)]
pub struct HttpBunqApi {
    http: reqwest::Client,
    base_url: String,
    bunq_user_id: String,
    session_token: String,
    limiter: Arc<RateLimiter>,
}

impl HttpBunqApi {
    /// Build a client from a stored context and open a session. The
    /// session-server handshake is what consumes the dedicated bucket.
    pub async fn connect(
        context: ApiContext,
        limiter: Arc<RateLimiter>,
        token: &CancellationToken,
    ) -> Result<Self> {
        let http = reqwest::Client::new();

        limiter.for_session_server().acquire(token).await?;
        let url = format!("{}/v1/session-server", context.base_url);
        let response = http
            .post(&url)
            .json(&serde_json::json!({ "secret": context.api_key }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BunqError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let envelope: WireEnvelope<WireSessionServerItem> = response.json().await?;
        let session_token = envelope
            .response
            .iter()
            .find_map(|item| item.token.as_ref())
            .ok_or(BunqError::MissingField("session token"))?
            .token
            .clone();

        // OAuth-created contexts do not know their bunq user id yet; the
        // session handshake reveals it
        let bunq_user_id = if context.bunq_user_id.is_empty() {
            envelope
                .response
                .iter()
                .find_map(|item| item.user_person.as_ref())
                .map(|user| user.id.to_string())
                .ok_or(BunqError::MissingField("bunq user id"))?
        } else {
            context.bunq_user_id
        };

        Ok(Self {
            http,
            base_url: context.base_url,
            bunq_user_id,
            session_token,
            limiter,
        })
    }

    fn user_url(&self, suffix: &str) -> String {
        format!("{}/v1/user/{}/{}", self.base_url, self.bunq_user_id, suffix)
    }

    fn absolute(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .header("X-Bunq-Client-Authentication", &self.session_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BunqError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    async fn list_accounts(
        &self,
        token: &CancellationToken,
        suffix: &str,
    ) -> Result<Vec<Result<ApiAccount>>> {
        self.limiter.for_get().acquire(token).await?;
        let url = self.user_url(suffix);

        let accounts = if suffix == "monetary-account-bank" {
            let envelope: WireEnvelope<WireMonetaryAccountBankItem> = self.get_json(&url).await?;
            envelope
                .response
                .into_iter()
                .map(|item| map_account(item.account))
                .collect()
        } else {
            let envelope: WireEnvelope<WireMonetaryAccountSavingItem> = self.get_json(&url).await?;
            envelope
                .response
                .into_iter()
                .map(|item| map_account(item.account))
                .collect()
        };

        Ok(accounts)
    }
}

impl BunqApi for HttpBunqApi {
    fn fetch_accounts(&self, token: CancellationToken) -> AccountStream {
        let api = self.clone();
        Box::pin(async_stream::stream! {
            for suffix in ["monetary-account-bank", "monetary-account-savings"] {
                if token.is_cancelled() {
                    return;
                }
                match api.list_accounts(&token, suffix).await {
                    // a failed listing surfaces one error and does not
                    // keep the other listing from producing
                    Err(err) => yield Err(err),
                    Ok(accounts) => {
                        for account in accounts {
                            yield account;
                        }
                    }
                }
            }
        })
    }

    fn fetch_transactions(
        &self,
        account_id: BunqAccountId,
        newer_than: DateTime<Utc>,
        token: CancellationToken,
    ) -> TransactionStream {
        let api = self.clone();
        Box::pin(async_stream::stream! {
            let mut next_url =
                api.user_url(&format!("monetary-account/{}/payment?count=200", account_id));

            loop {
                if api.limiter.for_get().acquire(&token).await.is_err() {
                    return;
                }

                let envelope: WireEnvelope<WirePaymentItem> = match api.get_json(&next_url).await {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                if envelope.response.is_empty() {
                    return;
                }

                let mut has_newer = false;
                for item in envelope.response {
                    match map_payment(item.payment) {
                        Err(err) => yield Err(err),
                        Ok(tx) => {
                            if tx.transaction_date > newer_than {
                                has_newer = true;
                                yield Ok(tx);
                            }
                        }
                    }
                }

                // pages run newest to oldest: one page with nothing new
                // means the rest is older still
                if !has_newer {
                    return;
                }

                match envelope.pagination.and_then(|pagination| pagination.older_url) {
                    Some(older_url) => next_url = api.absolute(&older_url),
                    None => return,
                }
            }
        })
    }

    fn fetch_direct_debit_transactions(
        &self,
        account_id: BunqAccountId,
        newer_than: DateTime<Utc>,
        token: CancellationToken,
    ) -> DirectDebitStream {
        let api = self.clone();
        Box::pin(async_stream::stream! {
            let mut next_url = api.user_url(&format!(
                "monetary-account/{}/request-response?count=200",
                account_id
            ));

            loop {
                if api.limiter.for_get().acquire(&token).await.is_err() {
                    return;
                }

                let envelope: WireEnvelope<WireRequestResponseItem> =
                    match api.get_json(&next_url).await {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };

                if envelope.response.is_empty() {
                    return;
                }

                let mut has_newer = false;
                for item in envelope.response {
                    match map_request_response(item.request_response) {
                        Err(err) => yield Err(err),
                        Ok(debit) => {
                            if debit.created > newer_than {
                                has_newer = true;
                                yield Ok(debit);
                            }
                        }
                    }
                }

                if !has_newer {
                    return;
                }

                match envelope.pagination.and_then(|pagination| pagination.older_url) {
                    Some(older_url) => next_url = api.absolute(&older_url),
                    None => return,
                }
            }
        })
    }

    fn fetch_schedules(
        &self,
        account_id: BunqAccountId,
        token: CancellationToken,
    ) -> ScheduleStream {
        let api = self.clone();
        Box::pin(async_stream::stream! {
            if api.limiter.for_get().acquire(&token).await.is_err() {
                return;
            }

            let url =
                api.user_url(&format!("monetary-account/{}/schedule-payment", account_id));
            let envelope: WireEnvelope<WireScheduledPaymentItem> = match api.get_json(&url).await {
                Ok(envelope) => envelope,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            for item in envelope.response {
                yield map_scheduled_payment(item.scheduled_payment);
            }
        })
    }
}

// ============================================================================
// Wire-to-item mapping
// ============================================================================

fn parse_optional_iban(value: &str) -> Option<Iban> {
    if value.is_empty() {
        return None;
    }
    Iban::parse(value).ok()
}

fn map_account(account: WireMonetaryAccount) -> Result<ApiAccount> {
    let balance = wire::parse_amount(&account.balance)?;
    let iban_value = account
        .iban_pointer()
        .ok_or(BunqError::MissingField("IBAN pointer"))?;
    let iban = Iban::parse(&iban_value.value)?;

    Ok(ApiAccount {
        id: BunqAccountId(account.id),
        iban,
        joint: false,
        alias: account.description,
        balance,
        fetch_timestamp: Utc::now(),
    })
}

fn map_payment(payment: WirePayment) -> Result<ApiTransaction> {
    let amount = wire::parse_amount(&payment.amount)?;
    let balance_after_mutation = wire::parse_amount(&payment.balance_after_mutation)?;
    let transaction_date = wire::parse_datetime(&payment.created)?;

    let institution_schedule_id = payment
        .scheduled_id
        .filter(|id| *id > 0)
        .map(|id| id.to_string());

    let geolocation = payment.geolocation.map(|geo| ApiGeolocation {
        latitude: geo.latitude,
        longitude: geo.longitude,
        altitude: geo.altitude,
        radius: geo.radius,
    });

    Ok(ApiTransaction {
        id: BunqPaymentId(payment.id),
        amount,
        name: payment.alias.name(),
        iban: parse_optional_iban(&payment.alias.iban),
        counterparty_name: payment.counterparty_alias.name(),
        counterparty_iban: parse_optional_iban(&payment.counterparty_alias.iban),
        description: payment.description,
        institution_schedule_id,
        balance_after_mutation,
        geolocation,
        transaction_date,
        fetch_timestamp: Utc::now(),
    })
}

fn map_request_response(rr: WireRequestResponse) -> Result<ApiDirectDebitTransaction> {
    let amount = wire::parse_amount(&rr.amount_inquired)?;
    let created = wire::parse_datetime(&rr.created)?;
    let responded = wire::parse_optional_datetime(&rr.responded)?;

    Ok(ApiDirectDebitTransaction {
        id: BunqRequestResponseId(rr.id),
        amount,
        name: rr.alias.name(),
        iban: parse_optional_iban(&rr.alias.iban),
        counterparty_name: rr.counterparty_alias.name(),
        counterparty_iban: parse_optional_iban(&rr.counterparty_alias.iban),
        description: rr.description,
        credit_scheme_id: rr.credit_scheme_identifier,
        mandate_id: rr.mandate_identifier,
        created,
        responded,
        fetch_timestamp: Utc::now(),
    })
}

fn map_scheduled_payment(scheduled: WireScheduledPayment) -> Result<ApiSchedule> {
    let amount = wire::parse_amount(&scheduled.payment.amount)?;
    let start_date = wire::parse_datetime(&scheduled.schedule.time_start)?;
    let end_date = wire::parse_optional_datetime(&scheduled.schedule.time_end)?;
    let frequency = wire::map_to_period(
        &scheduled.schedule.recurrence_unit,
        scheduled.schedule.recurrence_size,
    );

    Ok(ApiSchedule {
        id: BunqScheduleId(scheduled.id),
        start_date,
        end_date,
        frequency,
        amount,
        description: scheduled.payment.description,
        name: scheduled.payment.alias.name(),
        iban: parse_optional_iban(&scheduled.payment.alias.iban),
        counterparty_name: scheduled.payment.counterparty_alias.name(),
        counterparty_iban: parse_optional_iban(&scheduled.payment.counterparty_alias.iban),
        fetch_timestamp: Utc::now(),
    })
}
