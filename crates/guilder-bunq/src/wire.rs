//! bunq wire format
//!
//! Serde mappings for the slice of the bunq REST API this integration
//! reads, plus the parsing helpers shared by all of them: decimal-string
//! amounts in minor units, the bunq datetime layout, and the recurrence
//! unit to ISO-period mapping.

use crate::error::{BunqError, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use guilder_types::{Currency, Money, Period};
use serde::Deserialize;

/// Layout of every datetime bunq returns
const BUNQ_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

// ============================================================================
// Parsing helpers
// ============================================================================

/// bunq amounts are decimal strings; stored as minor units rounded to
/// the nearest integer
pub fn parse_amount(amount: &WireAmount) -> Result<Money> {
    let value: f64 = amount
        .value
        .parse()
        .map_err(|_| BunqError::ParseAmount(amount.value.clone()))?;
    if !value.is_finite() {
        return Err(BunqError::ParseAmount(amount.value.clone()));
    }

    let currency = Currency::new(&amount.currency)
        .map_err(|_| BunqError::ParseAmount(amount.currency.clone()))?;
    Ok(Money::new((value * 100.0).round() as i64, currency))
}

pub fn parse_datetime(input: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(input, BUNQ_DATETIME_FORMAT)
        .map_err(|_| BunqError::ParseDatetime(input.to_string()))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// A missing end-time is encoded as an empty string
pub fn parse_optional_datetime(input: &str) -> Result<Option<DateTime<Utc>>> {
    if input.is_empty() {
        return Ok(None);
    }
    parse_datetime(input).map(Some)
}

/// bunq recurrence units to ISO periods. `ONCE` is left to the caller
/// and falls through to the monthly default here.
pub fn map_to_period(recurrence_unit: &str, recurrence_size: u32) -> Period {
    match recurrence_unit {
        "HOURLY" => Period::hours(recurrence_size),
        "DAILY" => Period::days(recurrence_size),
        "WEEKLY" => Period::weeks(recurrence_size),
        "MONTHLY" => Period::months(recurrence_size),
        "YEARLY" => Period::years(recurrence_size),
        _ => Period::months(recurrence_size),
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// Standard bunq response envelope
#[derive(Debug, Deserialize)]
pub struct WireEnvelope<T> {
    #[serde(rename = "Response", default = "Vec::new")]
    pub response: Vec<T>,
    #[serde(rename = "Pagination", default)]
    pub pagination: Option<WirePagination>,
}

#[derive(Debug, Deserialize)]
pub struct WirePagination {
    #[serde(default)]
    pub older_url: Option<String>,
    #[serde(default)]
    pub newer_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireAmount {
    pub value: String,
    pub currency: String,
}

/// One entry of an account's `alias` pointer array
#[derive(Debug, Deserialize)]
pub struct WirePointer {
    #[serde(rename = "type")]
    pub pointer_type: String,
    pub value: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireLabelUser {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub public_nick_name: String,
}

#[derive(Debug, Deserialize)]
pub struct WireLabelMonetaryAccount {
    #[serde(default)]
    pub iban: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub label_user: WireLabelUser,
}

impl WireLabelMonetaryAccount {
    /// Best display name bunq has for this party, if any
    pub fn name(&self) -> Option<String> {
        if !self.display_name.is_empty() {
            Some(self.display_name.clone())
        } else if !self.label_user.display_name.is_empty() {
            Some(self.label_user.display_name.clone())
        } else if !self.label_user.public_nick_name.is_empty() {
            Some(self.label_user.public_nick_name.clone())
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WireMonetaryAccount {
    pub id: i64,
    pub balance: WireAmount,
    #[serde(default)]
    pub description: String,
    #[serde(default = "Vec::new")]
    pub alias: Vec<WirePointer>,
}

impl WireMonetaryAccount {
    pub fn iban_pointer(&self) -> Option<&WirePointer> {
        self.alias.iter().find(|pointer| pointer.pointer_type == "IBAN")
    }
}

#[derive(Debug, Deserialize)]
pub struct WireMonetaryAccountBankItem {
    #[serde(rename = "MonetaryAccountBank")]
    pub account: WireMonetaryAccount,
}

#[derive(Debug, Deserialize)]
pub struct WireMonetaryAccountSavingItem {
    #[serde(rename = "MonetaryAccountSavings")]
    pub account: WireMonetaryAccount,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireGeolocation {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default)]
    pub radius: f64,
}

#[derive(Debug, Deserialize)]
pub struct WirePayment {
    pub id: i64,
    pub created: String,
    pub amount: WireAmount,
    pub alias: WireLabelMonetaryAccount,
    pub counterparty_alias: WireLabelMonetaryAccount,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scheduled_id: Option<i64>,
    pub balance_after_mutation: WireAmount,
    #[serde(default)]
    pub geolocation: Option<WireGeolocation>,
}

#[derive(Debug, Deserialize)]
pub struct WirePaymentItem {
    #[serde(rename = "Payment")]
    pub payment: WirePayment,
}

#[derive(Debug, Deserialize)]
pub struct WireRequestResponse {
    pub id: i64,
    pub created: String,
    #[serde(default)]
    pub responded: String,
    pub amount_inquired: WireAmount,
    pub alias: WireLabelMonetaryAccount,
    pub counterparty_alias: WireLabelMonetaryAccount,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub credit_scheme_identifier: String,
    #[serde(default)]
    pub mandate_identifier: String,
}

#[derive(Debug, Deserialize)]
pub struct WireRequestResponseItem {
    #[serde(rename = "RequestResponse")]
    pub request_response: WireRequestResponse,
}

#[derive(Debug, Deserialize)]
pub struct WireSchedule {
    pub time_start: String,
    #[serde(default)]
    pub time_end: String,
    pub recurrence_unit: String,
    pub recurrence_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct WireSchedulePaymentBody {
    pub amount: WireAmount,
    pub alias: WireLabelMonetaryAccount,
    pub counterparty_alias: WireLabelMonetaryAccount,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct WireScheduledPayment {
    pub id: i64,
    pub payment: WireSchedulePaymentBody,
    pub schedule: WireSchedule,
}

#[derive(Debug, Deserialize)]
pub struct WireScheduledPaymentItem {
    #[serde(rename = "SchedulePayment")]
    pub scheduled_payment: WireScheduledPayment,
}

/// Session-server handshake response
#[derive(Debug, Deserialize)]
pub struct WireSessionToken {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct WireSessionUser {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct WireSessionServerItem {
    #[serde(rename = "Token", default)]
    pub token: Option<WireSessionToken>,
    #[serde(rename = "UserPerson", default)]
    pub user_person: Option<WireSessionUser>,
}
