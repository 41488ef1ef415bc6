//! Identity resolvers
//!
//! Provider records arrive keyed by external identifiers (IBANs, provider
//! entity ids, display aliases). The resolvers map those onto stable
//! internal UUIDs: the monetary-account resolver allocates ids on first
//! sight and remembers them, the transaction resolver derives its ids
//! deterministically so re-fetches deduplicate by construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guilder_types::{Iban, Institution, Money, MonetaryAccountId, TransactionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Namespace for UUIDv5 transaction ids. Fixed forever: changing it would
/// re-identify every known transaction.
const TRANSACTION_ID_NAMESPACE: Uuid = Uuid::from_u128(0x25675de1_ea03_49b8_bc67_6153906134dd);

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no key available to resolve a monetary account id")]
    NoKeyAvailable,
}

pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

#[async_trait]
pub trait MonetaryAccountIdResolver: Send + Sync {
    /// Resolve the internal id for whatever keys the document carries,
    /// allocating a fresh id on first sight. Errors only when no key is
    /// present at all.
    async fn resolve(
        &self,
        iban: Option<&Iban>,
        institution: Option<Institution>,
        institution_entity_id: Option<&str>,
        alias: Option<&str>,
    ) -> ResolveResult<MonetaryAccountId>;
}

#[derive(Default)]
struct ResolverMaps {
    by_iban: HashMap<Iban, MonetaryAccountId>,
    by_entity_id: HashMap<(Institution, String), MonetaryAccountId>,
    by_alias: HashMap<String, MonetaryAccountId>,
}

/// In-memory resolver with a startup-loaded seed map.
///
/// Reads take the shared lock; a miss retries under the writer lock
/// before allocating, so concurrent callers with the same key always
/// observe the same id.
pub struct InMemoryMonetaryAccountIdResolver {
    seed: HashMap<Iban, MonetaryAccountId>,
    maps: RwLock<ResolverMaps>,
}

impl InMemoryMonetaryAccountIdResolver {
    pub fn new() -> Self {
        Self::with_seed(HashMap::new())
    }

    /// `seed` is frozen after construction and consulted after the live
    /// IBAN map
    pub fn with_seed(seed: HashMap<Iban, MonetaryAccountId>) -> Self {
        Self {
            seed,
            maps: RwLock::new(ResolverMaps::default()),
        }
    }

    fn lookup(
        &self,
        maps: &ResolverMaps,
        iban: Option<&Iban>,
        institution: Option<Institution>,
        institution_entity_id: Option<&str>,
        alias: Option<&str>,
    ) -> Option<MonetaryAccountId> {
        if let Some(iban) = iban {
            if let Some(id) = maps.by_iban.get(iban) {
                return Some(*id);
            }
            if let Some(id) = self.seed.get(iban) {
                return Some(*id);
            }
        }

        if let (Some(institution), Some(entity_id)) = (institution, institution_entity_id) {
            if let Some(id) = maps.by_entity_id.get(&(institution, entity_id.to_string())) {
                return Some(*id);
            }
        }

        if let Some(alias) = alias {
            if let Some(id) = maps.by_alias.get(&normalize_alias(alias)) {
                return Some(*id);
            }
        }

        None
    }
}

impl Default for InMemoryMonetaryAccountIdResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MonetaryAccountIdResolver for InMemoryMonetaryAccountIdResolver {
    async fn resolve(
        &self,
        iban: Option<&Iban>,
        institution: Option<Institution>,
        institution_entity_id: Option<&str>,
        alias: Option<&str>,
    ) -> ResolveResult<MonetaryAccountId> {
        {
            let maps = self.maps.read();
            if let Some(id) = self.lookup(&maps, iban, institution, institution_entity_id, alias) {
                return Ok(id);
            }
        }

        let mut maps = self.maps.write();

        // somebody may have allocated between the two locks
        if let Some(id) = self.lookup(&maps, iban, institution, institution_entity_id, alias) {
            return Ok(id);
        }

        let id = MonetaryAccountId::new();
        if let Some(iban) = iban {
            maps.by_iban.insert(iban.clone(), id);
        } else if let (Some(institution), Some(entity_id)) = (institution, institution_entity_id) {
            maps.by_entity_id.insert((institution, entity_id.to_string()), id);
        } else if let Some(alias) = alias {
            maps.by_alias.insert(normalize_alias(alias), id);
        } else {
            return Err(ResolveError::NoKeyAvailable);
        }

        Ok(id)
    }
}

fn normalize_alias(alias: &str) -> String {
    alias.to_lowercase()
}

/// Deterministic transaction-id resolver: the id is a UUIDv5 over the
/// identifying fields, so the same transaction always resolves to the
/// same id across refreshes and across runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionIdResolver;

impl TransactionIdResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(
        &self,
        payer_iban: Option<&Iban>,
        payee_iban: Option<&Iban>,
        amount: &Money,
        description: &str,
        transaction_date: DateTime<Utc>,
    ) -> TransactionId {
        let payer = payer_iban.map(Iban::as_str).unwrap_or("");
        let payee = payee_iban.map(Iban::as_str).unwrap_or("");
        let name = format!(
            "{}-{}-{}-{}-{}",
            payer,
            payee,
            amount.amount(),
            description,
            transaction_date.format("%Y-%m-%d %H:%M"),
        );
        TransactionId(Uuid::new_v5(&TRANSACTION_ID_NAMESPACE, name.as_bytes()))
    }
}
