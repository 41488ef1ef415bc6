//! Monetary-account aggregate
//!
//! Tracks per-account identity, joint/singular ownership, the owner set,
//! the alias and a time-ordered balance history, plus transaction-id
//! membership for deduplication. Deciding and applying are pure; the
//! event log is the source of truth and the state here is a replayable
//! projection.

use chrono::{DateTime, Duration, Utc};
use guilder_eventsourcing::{Aggregate, Decision};
use guilder_types::{
    Currency, Iban, Institution, Money, MonetaryAccountId, TransactionId, TransactionParty, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A balance snapshot is considered stale once the newest recorded one is
/// more than this much older than the fetch that observed it
fn balance_stale_after() -> Duration {
    Duration::hours(1)
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMonetaryAccount {
    pub monetary_account_id: MonetaryAccountId,
    pub iban: Iban,
    pub joint: bool,
    pub owner_user_id: UserId,
    pub alias: String,
    pub institution: Institution,
    pub institution_entity_id: String,
    pub balance: Money,
    pub fetch_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTransactionDocument {
    pub id: TransactionId,

    /// The side of the double entry this dispatch records
    pub monetary_account_id: MonetaryAccountId,

    pub from_monetary_account_id: MonetaryAccountId,
    pub from: TransactionParty,

    pub to_monetary_account_id: MonetaryAccountId,
    pub to: TransactionParty,

    pub institution_entity_id: String,
    pub amount: Money,
    pub description: String,
    pub institution_schedule_id: Option<String>,
    pub is_scheduled: bool,
    pub balance_after_mutation: Money,
    pub transaction_date: DateTime<Utc>,
    pub fetch_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonetaryAccountCommand {
    #[serde(rename = "monetaryaccount:process")]
    ProcessMonetaryAccount(ProcessMonetaryAccount),

    #[serde(rename = "monetaryaccount:process-tx")]
    ProcessTransactionDocument(ProcessTransactionDocument),

    /// Reserved for manually maintained accounts that have no provider
    #[serde(rename = "monetaryaccount:update-balance-non-automated")]
    UpdateBalanceForNonAutomatedAccount {
        monetary_account_id: MonetaryAccountId,
    },
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonetaryAccountEvent {
    #[serde(rename = "monetaryaccount:new-found")]
    NewMonetaryAccountFound {
        id: MonetaryAccountId,
        iban: Iban,
        joint: bool,
        owner_user_ids: Vec<UserId>,
        alias: String,
        institution: Institution,
        currency: Currency,
    },

    #[serde(rename = "monetaryaccount:became-joint")]
    BecameJoint { id: MonetaryAccountId },

    #[serde(rename = "monetaryaccount:became-singular")]
    BecameSingular { id: MonetaryAccountId },

    #[serde(rename = "monetaryaccount:alias-updated")]
    AliasUpdated { id: MonetaryAccountId, alias: String },

    #[serde(rename = "monetaryaccount:new-tx")]
    NewTransactionFound {
        id: MonetaryAccountId,
        transaction_id: TransactionId,
        from: TransactionParty,
        to: TransactionParty,
        amount: Money,
        transaction_date: DateTime<Utc>,
    },

    #[serde(rename = "monetaryaccount:balance-snapshotted")]
    BalanceSnapshotted {
        id: MonetaryAccountId,
        balance: Money,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "monetaryaccount:user-added")]
    UserAdded {
        id: MonetaryAccountId,
        user_id: UserId,
    },
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonetaryAccountDetails {
    pub initialized: bool,
    pub iban: Option<Iban>,
    pub joint: bool,
    pub institution: Option<Institution>,
    pub alias: String,
    pub currency: Option<Currency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub balance: Money,
    pub timestamp: DateTime<Utc>,
}

/// Replayed state of one monetary account.
///
/// Once initialised the balance history and owner set are never empty,
/// and the owner set never shrinks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonetaryAccountAggregate {
    pub id: Option<MonetaryAccountId>,
    pub details: MonetaryAccountDetails,
    pub transactions: BTreeSet<TransactionId>,
    pub balance_history: Vec<BalanceSnapshot>,
    pub owners: BTreeSet<UserId>,
}

impl MonetaryAccountAggregate {
    fn decide_account(
        &self,
        cmd: &ProcessMonetaryAccount,
    ) -> Vec<MonetaryAccountEvent> {
        if !self.details.initialized {
            return vec![
                MonetaryAccountEvent::NewMonetaryAccountFound {
                    id: cmd.monetary_account_id,
                    iban: cmd.iban.clone(),
                    joint: cmd.joint,
                    owner_user_ids: vec![cmd.owner_user_id],
                    alias: cmd.alias.clone(),
                    institution: cmd.institution,
                    currency: cmd.balance.currency().clone(),
                },
                MonetaryAccountEvent::BalanceSnapshotted {
                    id: cmd.monetary_account_id,
                    balance: cmd.balance.clone(),
                    timestamp: cmd.fetch_timestamp,
                },
                MonetaryAccountEvent::UserAdded {
                    id: cmd.monetary_account_id,
                    user_id: cmd.owner_user_id,
                },
            ];
        }

        let mut events = Vec::new();

        if self.details.alias != cmd.alias {
            events.push(MonetaryAccountEvent::AliasUpdated {
                id: cmd.monetary_account_id,
                alias: cmd.alias.clone(),
            });
        }

        if self.details.joint && !cmd.joint {
            events.push(MonetaryAccountEvent::BecameSingular {
                id: cmd.monetary_account_id,
            });
        } else if !self.details.joint && cmd.joint {
            events.push(MonetaryAccountEvent::BecameJoint {
                id: cmd.monetary_account_id,
            });
        }

        // balance history is never empty once initialised
        if let Some(last) = self.balance_history.last() {
            let stale = last.timestamp + balance_stale_after() < cmd.fetch_timestamp;
            if last.balance != cmd.balance || stale {
                events.push(MonetaryAccountEvent::BalanceSnapshotted {
                    id: cmd.monetary_account_id,
                    balance: cmd.balance.clone(),
                    timestamp: cmd.fetch_timestamp,
                });
            }
        }

        if !self.owners.contains(&cmd.owner_user_id) {
            events.push(MonetaryAccountEvent::UserAdded {
                id: cmd.monetary_account_id,
                user_id: cmd.owner_user_id,
            });
        }

        events
    }

    fn decide_transaction(
        &self,
        cmd: &ProcessTransactionDocument,
    ) -> Vec<MonetaryAccountEvent> {
        if !self.details.initialized {
            return Vec::new();
        }

        if self.transactions.contains(&cmd.id) {
            return Vec::new();
        }

        vec![MonetaryAccountEvent::NewTransactionFound {
            id: cmd.monetary_account_id,
            transaction_id: cmd.id,
            from: cmd.from.clone(),
            to: cmd.to.clone(),
            amount: cmd.amount.clone(),
            transaction_date: cmd.transaction_date,
        }]
    }
}

impl Aggregate for MonetaryAccountAggregate {
    type Command = MonetaryAccountCommand;
    type Event = MonetaryAccountEvent;

    const AGGREGATE_TYPE: &'static str = "monetaryaccount";

    fn aggregate_id(command: &Self::Command) -> Uuid {
        match command {
            MonetaryAccountCommand::ProcessMonetaryAccount(cmd) => cmd.monetary_account_id.0,
            MonetaryAccountCommand::ProcessTransactionDocument(cmd) => cmd.monetary_account_id.0,
            MonetaryAccountCommand::UpdateBalanceForNonAutomatedAccount {
                monetary_account_id,
            } => monetary_account_id.0,
        }
    }

    fn command_type(command: &Self::Command) -> &'static str {
        match command {
            MonetaryAccountCommand::ProcessMonetaryAccount(_) => "monetaryaccount:process",
            MonetaryAccountCommand::ProcessTransactionDocument(_) => "monetaryaccount:process-tx",
            MonetaryAccountCommand::UpdateBalanceForNonAutomatedAccount { .. } => {
                "monetaryaccount:update-balance-non-automated"
            }
        }
    }

    fn event_type(event: &Self::Event) -> &'static str {
        match event {
            MonetaryAccountEvent::NewMonetaryAccountFound { .. } => "monetaryaccount:new-found",
            MonetaryAccountEvent::BecameJoint { .. } => "monetaryaccount:became-joint",
            MonetaryAccountEvent::BecameSingular { .. } => "monetaryaccount:became-singular",
            MonetaryAccountEvent::AliasUpdated { .. } => "monetaryaccount:alias-updated",
            MonetaryAccountEvent::NewTransactionFound { .. } => "monetaryaccount:new-tx",
            MonetaryAccountEvent::BalanceSnapshotted { .. } => "monetaryaccount:balance-snapshotted",
            MonetaryAccountEvent::UserAdded { .. } => "monetaryaccount:user-added",
        }
    }

    fn decide(
        &self,
        command: &Self::Command,
        _now: DateTime<Utc>,
    ) -> Decision<Self::Event, Self::Command> {
        match command {
            MonetaryAccountCommand::ProcessMonetaryAccount(cmd) => {
                Decision::events(self.decide_account(cmd))
            }
            MonetaryAccountCommand::ProcessTransactionDocument(cmd) => {
                Decision::events(self.decide_transaction(cmd))
            }
            MonetaryAccountCommand::UpdateBalanceForNonAutomatedAccount { .. } => Decision::none(),
        }
    }

    fn apply(mut self, event: &Self::Event) -> Self {
        match event {
            MonetaryAccountEvent::NewMonetaryAccountFound {
                id,
                iban,
                joint,
                alias,
                institution,
                currency,
                ..
            } => {
                let mut state = Self::default();
                state.id = Some(*id);
                state.details = MonetaryAccountDetails {
                    initialized: true,
                    iban: Some(iban.clone()),
                    joint: *joint,
                    institution: Some(*institution),
                    alias: alias.clone(),
                    currency: Some(currency.clone()),
                };
                state
            }

            MonetaryAccountEvent::BecameJoint { .. } => {
                self.details.joint = true;
                self
            }

            MonetaryAccountEvent::BecameSingular { .. } => {
                self.details.joint = false;
                self
            }

            MonetaryAccountEvent::AliasUpdated { alias, .. } => {
                self.details.alias = alias.clone();
                self
            }

            MonetaryAccountEvent::NewTransactionFound { transaction_id, .. } => {
                self.transactions.insert(*transaction_id);
                self
            }

            MonetaryAccountEvent::BalanceSnapshotted {
                balance, timestamp, ..
            } => {
                self.balance_history.push(BalanceSnapshot {
                    balance: balance.clone(),
                    timestamp: *timestamp,
                });
                self.balance_history.sort_by_key(|snapshot| snapshot.timestamp);
                self
            }

            MonetaryAccountEvent::UserAdded { user_id, .. } => {
                self.owners.insert(*user_id);
                self
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process_account_command(
        id: MonetaryAccountId,
        owner: UserId,
        balance: Money,
        joint: bool,
        fetch_timestamp: DateTime<Utc>,
    ) -> MonetaryAccountCommand {
        MonetaryAccountCommand::ProcessMonetaryAccount(ProcessMonetaryAccount {
            monetary_account_id: id,
            iban: Iban::parse("NL91ABNA0417164300").unwrap(),
            joint,
            owner_user_id: owner,
            alias: "Main".to_string(),
            institution: Institution::Bunq,
            institution_entity_id: "12".to_string(),
            balance,
            fetch_timestamp,
        })
    }

    fn state_after(
        mut state: MonetaryAccountAggregate,
        command: &MonetaryAccountCommand,
        now: DateTime<Utc>,
    ) -> MonetaryAccountAggregate {
        for event in state.decide(command, now).events {
            state = state.apply(&event);
        }
        state
    }

    #[test]
    fn test_new_account_produces_initial_events() {
        let state = MonetaryAccountAggregate::default();
        let now = Utc::now();
        let cmd = process_account_command(
            MonetaryAccountId::new(),
            UserId::new(),
            Money::eur(1200),
            false,
            now,
        );

        let events = state.decide(&cmd, now).events;

        assert!(matches!(
            events.as_slice(),
            [
                MonetaryAccountEvent::NewMonetaryAccountFound { .. },
                MonetaryAccountEvent::BalanceSnapshotted { .. },
                MonetaryAccountEvent::UserAdded { .. },
            ]
        ));
    }

    #[test]
    fn test_reapplying_same_command_is_idempotent() {
        let now = Utc::now();
        let cmd = process_account_command(
            MonetaryAccountId::new(),
            UserId::new(),
            Money::eur(1200),
            false,
            now,
        );

        let state = state_after(MonetaryAccountAggregate::default(), &cmd, now);
        assert!(state.decide(&cmd, now).events.is_empty());
    }

    #[test]
    fn test_balance_staleness_threshold() {
        let id = MonetaryAccountId::new();
        let owner = UserId::new();
        let t0 = Utc::now();
        let initial = process_account_command(id, owner, Money::eur(1200), false, t0);
        let state = state_after(MonetaryAccountAggregate::default(), &initial, t0);

        // same balance 59 minutes later: nothing to record
        let fresh = process_account_command(id, owner, Money::eur(1200), false, t0 + Duration::minutes(59));
        assert!(state.decide(&fresh, t0).events.is_empty());

        // same balance 61 minutes later: the snapshot is stale
        let stale = process_account_command(id, owner, Money::eur(1200), false, t0 + Duration::minutes(61));
        let events = state.decide(&stale, t0).events;
        assert!(matches!(
            events.as_slice(),
            [MonetaryAccountEvent::BalanceSnapshotted { .. }]
        ));
    }

    #[test]
    fn test_balance_change_is_snapshotted() {
        let id = MonetaryAccountId::new();
        let owner = UserId::new();
        let t0 = Utc::now();
        let initial = process_account_command(id, owner, Money::eur(1200), false, t0);
        let state = state_after(MonetaryAccountAggregate::default(), &initial, t0);

        let changed = process_account_command(id, owner, Money::eur(1300), false, t0 + Duration::minutes(1));
        let events = state.decide(&changed, t0).events;
        assert!(matches!(
            events.as_slice(),
            [MonetaryAccountEvent::BalanceSnapshotted { .. }]
        ));
    }

    #[test]
    fn test_joint_toggle() {
        let id = MonetaryAccountId::new();
        let owner = UserId::new();
        let t0 = Utc::now();
        let joint = process_account_command(id, owner, Money::eur(0), true, t0);
        let state = state_after(MonetaryAccountAggregate::default(), &joint, t0);
        assert!(state.details.joint);

        let singular = process_account_command(id, owner, Money::eur(0), false, t0);
        let events = state.decide(&singular, t0).events;
        assert!(matches!(
            events.as_slice(),
            [MonetaryAccountEvent::BecameSingular { .. }]
        ));

        let state = state_after(state, &singular, t0);
        assert!(state.decide(&singular, t0).events.is_empty());
    }

    #[test]
    fn test_second_owner_is_added_once() {
        let id = MonetaryAccountId::new();
        let first = UserId::new();
        let second = UserId::new();
        let t0 = Utc::now();

        let state = state_after(
            MonetaryAccountAggregate::default(),
            &process_account_command(id, first, Money::eur(0), false, t0),
            t0,
        );

        let cmd = process_account_command(id, second, Money::eur(0), false, t0);
        let events = state.decide(&cmd, t0).events;
        assert!(matches!(events.as_slice(), [MonetaryAccountEvent::UserAdded { .. }]));

        let state = state_after(state, &cmd, t0);
        assert_eq!(state.owners.len(), 2);
        assert!(state.decide(&cmd, t0).events.is_empty());
    }

    fn transaction_command(
        account: MonetaryAccountId,
        transaction: TransactionId,
    ) -> MonetaryAccountCommand {
        MonetaryAccountCommand::ProcessTransactionDocument(ProcessTransactionDocument {
            id: transaction,
            monetary_account_id: account,
            from_monetary_account_id: account,
            from: TransactionParty::new(None, Some("Albert Heijn".to_string())),
            to_monetary_account_id: MonetaryAccountId::new(),
            to: TransactionParty::new(None, None),
            institution_entity_id: "900".to_string(),
            amount: Money::eur(-1595),
            description: "Groceries".to_string(),
            institution_schedule_id: None,
            is_scheduled: false,
            balance_after_mutation: Money::eur(104405),
            transaction_date: Utc::now(),
            fetch_timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_transaction_on_uninitialised_account_is_ignored() {
        let state = MonetaryAccountAggregate::default();
        let cmd = transaction_command(MonetaryAccountId::new(), TransactionId::new());
        assert!(state.decide(&cmd, Utc::now()).events.is_empty());
    }

    #[test]
    fn test_transaction_dedup() {
        let id = MonetaryAccountId::new();
        let t0 = Utc::now();
        let state = state_after(
            MonetaryAccountAggregate::default(),
            &process_account_command(id, UserId::new(), Money::eur(0), false, t0),
            t0,
        );

        let cmd = transaction_command(id, TransactionId::new());
        let events = state.decide(&cmd, t0).events;
        assert!(matches!(
            events.as_slice(),
            [MonetaryAccountEvent::NewTransactionFound { .. }]
        ));

        let state = state_after(state, &cmd, t0);
        assert!(state.decide(&cmd, t0).events.is_empty());
    }

    #[test]
    fn test_balance_history_sorted_by_timestamp() {
        let id = MonetaryAccountId::new();
        let now = Utc::now();
        let later = MonetaryAccountEvent::BalanceSnapshotted {
            id,
            balance: Money::eur(0),
            timestamp: now + Duration::days(30),
        };
        let earlier = MonetaryAccountEvent::BalanceSnapshotted {
            id,
            balance: Money::eur(0),
            timestamp: now - Duration::days(30),
        };

        let state = MonetaryAccountAggregate::default().apply(&later).apply(&earlier);

        assert_eq!(state.balance_history.len(), 2);
        assert!(state.balance_history[0].timestamp < state.balance_history[1].timestamp);
    }

    #[test]
    fn test_event_payload_roundtrips_with_tag() {
        let event = MonetaryAccountEvent::UserAdded {
            id: MonetaryAccountId::new(),
            user_id: UserId::new(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "monetaryaccount:user-added");
        let back: MonetaryAccountEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
