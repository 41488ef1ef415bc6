//! Recurring-series identity resolvers
//!
//! Both the series id and the instance id are derived deterministically
//! from (institution, institution entity id) with UUIDv5, under two
//! distinct namespaces. A re-fetched schedule or direct debit therefore
//! resolves to the id it had before, which is what makes replayed
//! documents idempotent downstream.

use guilder_types::{Institution, RecurringTransactionId, RecurringTransactionInstanceId};
use uuid::Uuid;

/// Namespace for series ids. Fixed forever.
const SERIES_ID_NAMESPACE: Uuid = Uuid::from_u128(0x17675de1_ea03_19b8_1c67_4153906134f1);

/// Namespace for instance ids. Fixed forever, distinct from the series
/// namespace so the two id spaces cannot collide.
const INSTANCE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x43a81f02_5b7d_4c11_9e35_d20c7a91b604);

fn derive(namespace: &Uuid, institution: Institution, institution_entity_id: &str) -> Uuid {
    let name = format!("{institution}-{institution_entity_id}");
    Uuid::new_v5(namespace, name.as_bytes())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecurringTransactionIdResolver;

impl RecurringTransactionIdResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(
        &self,
        institution: Institution,
        institution_entity_id: &str,
    ) -> RecurringTransactionId {
        RecurringTransactionId(derive(&SERIES_ID_NAMESPACE, institution, institution_entity_id))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecurringTransactionInstanceIdResolver;

impl RecurringTransactionInstanceIdResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(
        &self,
        institution: Institution,
        institution_entity_id: &str,
    ) -> RecurringTransactionInstanceId {
        RecurringTransactionInstanceId(derive(
            &INSTANCE_ID_NAMESPACE,
            institution,
            institution_entity_id,
        ))
    }
}
