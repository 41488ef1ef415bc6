//! Provider items to bus documents
//!
//! bunq records are single-sided: the account's own alias plus a
//! counterparty, with the direction encoded in the amount's sign. The
//! documents on the bus are double-sided, so the mapping assigns from/to
//! here. A positive amount is incoming (the counterparty pays), and the
//! side owned by the institution carries its entity id.

use crate::client::{ApiAccount, ApiDirectDebitTransaction, ApiSchedule, ApiTransaction};
use guilder_bus::{
    DirectDebitTransactionDocument, Geolocation, MonetaryAccountDocument, ScheduleDocument,
    TransactionDocument,
};
use guilder_types::{Institution, UserId};

impl ApiAccount {
    pub fn into_document(self, owner_user_id: UserId) -> MonetaryAccountDocument {
        MonetaryAccountDocument {
            iban: self.iban,
            joint: self.joint,
            owner_user_id,
            alias: self.alias,
            institution: Institution::Bunq,
            institution_entity_id: self.id.to_string(),
            balance: self.balance,
            fetch_timestamp: self.fetch_timestamp,
        }
    }
}

impl ApiTransaction {
    pub fn into_document(self) -> TransactionDocument {
        let geolocation = self.geolocation.map(|geo| Geolocation {
            latitude: geo.latitude,
            longitude: geo.longitude,
            altitude: geo.altitude,
            radius: geo.radius,
        });

        let entity_id = self.id.0.to_string();
        let own_side = (
            self.name,
            self.iban,
            Some(Institution::Bunq),
            Some(entity_id),
        );
        let counterparty_side = (self.counterparty_name, self.counterparty_iban, None, None);

        // a zero amount carries no direction; both sides stay empty and
        // the consumer drops the document for lack of a resolvable party
        let (from, to) = if self.amount.is_zero() {
            ((None, None, None, None), (None, None, None, None))
        } else if self.amount.is_positive() {
            (counterparty_side, own_side)
        } else {
            (own_side, counterparty_side)
        };

        TransactionDocument {
            amount: self.amount,
            from_name: from.0,
            from_iban: from.1,
            from_institution: from.2,
            from_institution_entity_id: from.3,
            to_name: to.0,
            to_iban: to.1,
            to_institution: to.2,
            to_institution_entity_id: to.3,
            description: self.description,
            institution_schedule_id: self.institution_schedule_id,
            balance_after_mutation: self.balance_after_mutation,
            geolocation,
            transaction_date: self.transaction_date,
            fetch_timestamp: self.fetch_timestamp,
        }
    }
}

impl ApiSchedule {
    pub fn into_document(self) -> Option<ScheduleDocument> {
        // zero amounts leave both sides empty, same as for transactions
        let (from_iban, from_name, to_iban, to_name) = if self.amount.is_zero() {
            (None, None, None, None)
        } else if self.amount.is_positive() {
            (self.counterparty_iban, self.counterparty_name, self.iban, self.name)
        } else {
            (self.iban, self.name, self.counterparty_iban, self.counterparty_name)
        };

        // both sides of a standing order are known at the provider; a
        // schedule without them cannot be keyed downstream
        let from_iban = from_iban?;
        let to_iban = to_iban?;

        Some(ScheduleDocument {
            institution: Institution::Bunq,
            institution_entity_id: self.id.0.to_string(),
            from_iban,
            from_name: from_name.unwrap_or_default(),
            to_iban,
            to_name: to_name.unwrap_or_default(),
            frequency: self.frequency,
            start_date: self.start_date,
            end_date: self.end_date,
            amount: self.amount,
            description: self.description,
            fetch_timestamp: self.fetch_timestamp,
        })
    }
}

impl ApiDirectDebitTransaction {
    pub fn into_document(self) -> Option<DirectDebitTransactionDocument> {
        // zero amounts leave both sides empty, same as for transactions
        let (from_iban, from_name, to_iban, to_name) = if self.amount.is_zero() {
            (None, None, None, None)
        } else if self.amount.is_positive() {
            (self.counterparty_iban, self.counterparty_name, self.iban, self.name)
        } else {
            (self.iban, self.name, self.counterparty_iban, self.counterparty_name)
        };

        // the debited side must be known; the creditor may be missing
        let from_iban = from_iban?;

        Some(DirectDebitTransactionDocument {
            institution: Institution::Bunq,
            institution_entity_id: self.id.0.to_string(),
            from_iban,
            from_name: from_name.unwrap_or_default(),
            to_iban,
            to_name,
            description: self.description,
            credit_scheme_id: self.credit_scheme_id,
            mandate_id: self.mandate_id,
            transaction_date: self.created,
            amount: self.amount,
            fetch_timestamp: self.fetch_timestamp,
        })
    }
}
