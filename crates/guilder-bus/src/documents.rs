//! Documents carried on the bus
//!
//! These are the canonicalised provider records: already parsed and
//! direction-normalised, but not yet resolved to internal identifiers.

use chrono::{DateTime, Utc};
use guilder_types::{Iban, Institution, Money, Period, SyncId, UserId};
use serde::{Deserialize, Serialize};

/// Where a transaction physically happened, when the provider knows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub radius: f64,
}

/// A monetary account as fetched from the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonetaryAccountDocument {
    pub iban: Iban,
    pub joint: bool,
    pub owner_user_id: UserId,
    pub alias: String,
    pub institution: Institution,
    pub institution_entity_id: String,
    pub balance: Money,
    pub fetch_timestamp: DateTime<Utc>,
}

/// One booked transaction. From/to sides carry whatever the provider
/// exposed; the side owned by the institution also carries its entity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDocument {
    pub amount: Money,

    pub from_name: Option<String>,
    pub from_iban: Option<Iban>,
    pub from_institution: Option<Institution>,
    pub from_institution_entity_id: Option<String>,

    pub to_name: Option<String>,
    pub to_iban: Option<Iban>,
    pub to_institution: Option<Institution>,
    pub to_institution_entity_id: Option<String>,

    pub description: String,
    pub institution_schedule_id: Option<String>,
    pub balance_after_mutation: Money,
    pub geolocation: Option<Geolocation>,
    pub transaction_date: DateTime<Utc>,
    pub fetch_timestamp: DateTime<Utc>,
}

/// A standing payment order (scheduled payment) at the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDocument {
    pub institution: Institution,
    pub institution_entity_id: String,
    pub from_iban: Iban,
    pub from_name: String,
    pub to_iban: Iban,
    pub to_name: String,
    pub frequency: Period,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub amount: Money,
    pub description: String,
    pub fetch_timestamp: DateTime<Utc>,
}

/// An answered direct-debit request at the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectDebitTransactionDocument {
    pub institution: Institution,
    pub institution_entity_id: String,
    pub from_iban: Iban,
    pub from_name: String,
    pub to_iban: Option<Iban>,
    pub to_name: Option<String>,
    pub description: String,
    pub credit_scheme_id: String,
    pub mandate_id: String,
    pub transaction_date: DateTime<Utc>,
    pub amount: Money,
    pub fetch_timestamp: DateTime<Utc>,
}

/// Lifecycle updates for one refresh attempt of one account.
///
/// Every `Started` is eventually matched by exactly one `Done` with the
/// same sync id, cancellation included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RefreshUpdate {
    Started(StartRefreshUpdate),
    Done(DoneRefreshingUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRefreshUpdate {
    pub user_id: UserId,
    pub sync_id: SyncId,
    pub institution_entity_id: String,
    pub started: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneRefreshingUpdate {
    pub user_id: UserId,
    pub sync_id: SyncId,
    pub institution_entity_id: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

impl DoneRefreshingUpdate {
    /// Derive the done update from its start counterpart, keeping the
    /// sync id so the pair can be correlated downstream
    pub fn from_start(start: &StartRefreshUpdate, finished: DateTime<Utc>) -> Self {
        Self {
            user_id: start.user_id,
            sync_id: start.sync_id,
            institution_entity_id: start.institution_entity_id.clone(),
            started: start.started,
            finished,
        }
    }
}
