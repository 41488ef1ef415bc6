//! Recurring-transaction aggregate
//!
//! A series is born either from a provider schedule or from the first
//! direct debit of a counterparty; the source never changes afterwards
//! and documents of the other source are ignored. Direct debits add
//! instances, may pull the start date back, may rewrite the current
//! amount (newest observation only) and re-derive the frequency; every
//! direct debit also schedules two status rechecks so a series that goes
//! quiet is eventually marked `Ended`.

use crate::calendar::end_of_next_workday_after;
use crate::frequency::frequency_for;
use chrono::{DateTime, Duration, Utc};
use guilder_eventsourcing::{Aggregate, Decision, FollowupCommand};
use guilder_types::{
    Iban, Institution, Money, Period, RecurringTransactionId, RecurringTransactionInstanceId,
    Source, TransactionParty,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identifier of the short-fuse recheck slot
const RECHECK_SOON_ID: &str = "1-min";
/// Identifier of the one-full-period recheck slot
const RECHECK_AFTER_FREQUENCY_ID: &str = "after-frequency";

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSchedule {
    pub recurring_transaction_id: RecurringTransactionId,
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
    pub fetch_timestamp: DateTime<Utc>,
}

impl ProcessSchedule {
    fn ends_before(&self, t: DateTime<Utc>) -> bool {
        self.end_date.map_or(false, |end| end < t)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDirectDebitTransactionDocument {
    pub recurring_transaction_id: RecurringTransactionId,
    pub instance_id: RecurringTransactionInstanceId,
    pub institution: Institution,
    pub institution_entity_id: String,
    pub from_iban: Iban,
    pub from_name: String,
    pub to_iban: Option<Iban>,
    pub to_name: Option<String>,
    pub transaction_date: DateTime<Utc>,
    pub amount: Money,
    pub fetch_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessScheduledTransaction {
    pub recurring_transaction_id: RecurringTransactionId,
    pub instance_id: RecurringTransactionInstanceId,
    pub amount: Money,
    pub from_iban: Iban,
    pub to_iban: Option<Iban>,
    pub transaction_date: DateTime<Utc>,
    pub fetch_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RecurringTransactionCommand {
    #[serde(rename = "recurring:process-schedule")]
    ProcessSchedule(ProcessSchedule),

    #[serde(rename = "recurring:process-direct-debit-tx")]
    ProcessDirectDebitTransactionDocument(ProcessDirectDebitTransactionDocument),

    #[serde(rename = "recurring:process-scheduled-tx")]
    ProcessScheduledTransaction(ProcessScheduledTransaction),

    #[serde(rename = "recurring:recheck")]
    RecheckStatus {
        recurring_transaction_id: RecurringTransactionId,
    },
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RecurringTransactionEvent {
    #[serde(rename = "recurring:new-found")]
    NewRecurringTransactionFound {
        id: RecurringTransactionId,
        from: TransactionParty,
        to: TransactionParty,
        frequency: Period,
        amount: Money,
        source: Source,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
    },

    #[serde(rename = "recurring:amount-changed")]
    AmountChanged {
        id: RecurringTransactionId,
        amount: Money,
    },

    #[serde(rename = "recurring:frequency-changed")]
    FrequencyChanged {
        id: RecurringTransactionId,
        frequency: Period,
    },

    #[serde(rename = "recurring:ended")]
    Ended { id: RecurringTransactionId },

    #[serde(rename = "recurring:start-date-changed")]
    StartDateChanged {
        id: RecurringTransactionId,
        start_date: DateTime<Utc>,
    },

    #[serde(rename = "recurring:reopened")]
    Reopened { id: RecurringTransactionId },

    #[serde(rename = "recurring:instance-found")]
    NewRecurringTransactionInstanceFound {
        id: RecurringTransactionInstanceId,
        recurring_transaction_id: RecurringTransactionId,
        amount: Money,
        from_iban: Iban,
        to_iban: Option<Iban>,
        transaction_date: DateTime<Utc>,
    },
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Active,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringTransactionInstance {
    pub amount: Money,
    pub from_iban: Iban,
    pub to_iban: Option<Iban>,
    pub transaction_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecurringTransactionDetails {
    pub initialized: bool,
    pub source: Option<Source>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub frequency: Option<Period>,
    pub amount: Option<Money>,
    pub last_transaction_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecurringTransactionAggregate {
    pub id: Option<RecurringTransactionId>,
    pub status: Status,
    pub details: RecurringTransactionDetails,
    pub instances: BTreeMap<RecurringTransactionInstanceId, RecurringTransactionInstance>,
}

impl RecurringTransactionAggregate {
    fn instance_dates(&self) -> Vec<DateTime<Utc>> {
        self.instances
            .values()
            .map(|instance| instance.transaction_date)
            .collect()
    }

    /// Deadline after which an active series with no fresh instance is
    /// considered stagnant
    fn stagnation_deadline(&self) -> Option<DateTime<Utc>> {
        let last = self.details.last_transaction_date?;
        let frequency = self.details.frequency?;
        Some(end_of_next_workday_after(last + frequency.approx_duration()))
    }

    /// True when the series should not be producing instances any more
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let past_end = self.details.end_date.map_or(false, |end| end < now);
        let stagnant = self.stagnation_deadline().map_or(false, |deadline| deadline < now);
        past_end || stagnant
    }

    fn decide_schedule(
        &self,
        cmd: &ProcessSchedule,
        now: DateTime<Utc>,
    ) -> Vec<RecurringTransactionEvent> {
        if !self.details.initialized {
            return vec![RecurringTransactionEvent::NewRecurringTransactionFound {
                id: cmd.recurring_transaction_id,
                from: TransactionParty::new(Some(cmd.from_iban.clone()), Some(cmd.from_name.clone())),
                to: TransactionParty::new(Some(cmd.to_iban.clone()), Some(cmd.to_name.clone())),
                frequency: cmd.frequency,
                amount: cmd.amount.clone(),
                source: Source::Schedule,
                start_date: cmd.start_date,
                end_date: cmd.end_date,
            }];
        }

        // a series born from direct debits is not overwritten by a schedule
        if self.details.source != Some(Source::Schedule) {
            return Vec::new();
        }

        let mut events = Vec::new();

        if self.details.start_date != Some(cmd.start_date) {
            events.push(RecurringTransactionEvent::StartDateChanged {
                id: cmd.recurring_transaction_id,
                start_date: cmd.start_date,
            });
        }

        if cmd.ends_before(now) && self.status != Status::Ended {
            events.push(RecurringTransactionEvent::Ended {
                id: cmd.recurring_transaction_id,
            });
        } else if !cmd.ends_before(now) && self.status == Status::Ended {
            events.push(RecurringTransactionEvent::Reopened {
                id: cmd.recurring_transaction_id,
            });
        }

        if self.details.amount.as_ref() != Some(&cmd.amount) {
            events.push(RecurringTransactionEvent::AmountChanged {
                id: cmd.recurring_transaction_id,
                amount: cmd.amount.clone(),
            });
        }

        if self.details.frequency != Some(cmd.frequency) {
            events.push(RecurringTransactionEvent::FrequencyChanged {
                id: cmd.recurring_transaction_id,
                frequency: cmd.frequency,
            });
        }

        events
    }

    fn decide_direct_debit(
        &self,
        cmd: &ProcessDirectDebitTransactionDocument,
        now: DateTime<Utc>,
    ) -> Decision<RecurringTransactionEvent, RecurringTransactionCommand> {
        if !self.details.initialized {
            return Decision::events(vec![
                RecurringTransactionEvent::NewRecurringTransactionFound {
                    id: cmd.recurring_transaction_id,
                    from: TransactionParty::new(
                        Some(cmd.from_iban.clone()),
                        Some(cmd.from_name.clone()),
                    ),
                    to: TransactionParty::new(cmd.to_iban.clone(), cmd.to_name.clone()),
                    frequency: Period::monthly(),
                    amount: cmd.amount.clone(),
                    source: Source::DirectDebit,
                    start_date: cmd.transaction_date,
                    end_date: None,
                },
            ]);
        }

        if self.details.source != Some(Source::DirectDebit) {
            return Decision::none();
        }

        let mut events = Vec::new();

        if self
            .details
            .start_date
            .map_or(false, |start| cmd.transaction_date < start)
        {
            events.push(RecurringTransactionEvent::StartDateChanged {
                id: cmd.recurring_transaction_id,
                start_date: cmd.transaction_date,
            });
        }

        if !self.instances.contains_key(&cmd.instance_id) {
            events.push(RecurringTransactionEvent::NewRecurringTransactionInstanceFound {
                id: cmd.instance_id,
                recurring_transaction_id: cmd.recurring_transaction_id,
                amount: cmd.amount.clone(),
                from_iban: cmd.from_iban.clone(),
                to_iban: cmd.to_iban.clone(),
                transaction_date: cmd.transaction_date,
            });
        }

        // only the newest observation may rewrite the current amount
        let newest = self
            .details
            .last_transaction_date
            .map_or(true, |last| cmd.transaction_date >= last);
        if self.details.amount.as_ref() != Some(&cmd.amount) && newest {
            events.push(RecurringTransactionEvent::AmountChanged {
                id: cmd.recurring_transaction_id,
                amount: cmd.amount.clone(),
            });
        }

        let mut dates = self.instance_dates();
        dates.push(cmd.transaction_date);
        let frequency = frequency_for(&dates);
        if self.details.frequency != Some(frequency) {
            events.push(RecurringTransactionEvent::FrequencyChanged {
                id: cmd.recurring_transaction_id,
                frequency,
            });
        }

        let recheck = RecurringTransactionCommand::RecheckStatus {
            recurring_transaction_id: cmd.recurring_transaction_id,
        };
        Decision::events(events).with_followups(vec![
            FollowupCommand {
                identifier: RECHECK_SOON_ID.to_string(),
                due: now + Duration::seconds(60),
                command: recheck.clone(),
            },
            FollowupCommand {
                identifier: RECHECK_AFTER_FREQUENCY_ID.to_string(),
                due: end_of_next_workday_after(now + frequency.approx_duration()),
                command: recheck,
            },
        ])
    }

    fn decide_scheduled_transaction(
        &self,
        cmd: &ProcessScheduledTransaction,
    ) -> Vec<RecurringTransactionEvent> {
        if self.details.source != Some(Source::Schedule) {
            return Vec::new();
        }

        if self.instances.contains_key(&cmd.instance_id) {
            return Vec::new();
        }

        vec![RecurringTransactionEvent::NewRecurringTransactionInstanceFound {
            id: cmd.instance_id,
            recurring_transaction_id: cmd.recurring_transaction_id,
            amount: cmd.amount.clone(),
            from_iban: cmd.from_iban.clone(),
            to_iban: cmd.to_iban.clone(),
            transaction_date: cmd.transaction_date,
        }]
    }

    fn decide_recheck(
        &self,
        id: RecurringTransactionId,
        now: DateTime<Utc>,
    ) -> Vec<RecurringTransactionEvent> {
        if !self.details.initialized {
            return Vec::new();
        }

        let expired = self.is_expired(now);
        match self.status {
            Status::Active if expired => vec![RecurringTransactionEvent::Ended { id }],
            Status::Ended if !expired => vec![RecurringTransactionEvent::Reopened { id }],
            _ => Vec::new(),
        }
    }
}

impl Aggregate for RecurringTransactionAggregate {
    type Command = RecurringTransactionCommand;
    type Event = RecurringTransactionEvent;

    const AGGREGATE_TYPE: &'static str = "recurring";

    fn aggregate_id(command: &Self::Command) -> Uuid {
        match command {
            RecurringTransactionCommand::ProcessSchedule(cmd) => cmd.recurring_transaction_id.0,
            RecurringTransactionCommand::ProcessDirectDebitTransactionDocument(cmd) => {
                cmd.recurring_transaction_id.0
            }
            RecurringTransactionCommand::ProcessScheduledTransaction(cmd) => {
                cmd.recurring_transaction_id.0
            }
            RecurringTransactionCommand::RecheckStatus {
                recurring_transaction_id,
            } => recurring_transaction_id.0,
        }
    }

    fn command_type(command: &Self::Command) -> &'static str {
        match command {
            RecurringTransactionCommand::ProcessSchedule(_) => "recurring:process-schedule",
            RecurringTransactionCommand::ProcessDirectDebitTransactionDocument(_) => {
                "recurring:process-direct-debit-tx"
            }
            RecurringTransactionCommand::ProcessScheduledTransaction(_) => {
                "recurring:process-scheduled-tx"
            }
            RecurringTransactionCommand::RecheckStatus { .. } => "recurring:recheck",
        }
    }

    fn event_type(event: &Self::Event) -> &'static str {
        match event {
            RecurringTransactionEvent::NewRecurringTransactionFound { .. } => "recurring:new-found",
            RecurringTransactionEvent::AmountChanged { .. } => "recurring:amount-changed",
            RecurringTransactionEvent::FrequencyChanged { .. } => "recurring:frequency-changed",
            RecurringTransactionEvent::Ended { .. } => "recurring:ended",
            RecurringTransactionEvent::StartDateChanged { .. } => "recurring:start-date-changed",
            RecurringTransactionEvent::Reopened { .. } => "recurring:reopened",
            RecurringTransactionEvent::NewRecurringTransactionInstanceFound { .. } => {
                "recurring:instance-found"
            }
        }
    }

    fn decide(
        &self,
        command: &Self::Command,
        now: DateTime<Utc>,
    ) -> Decision<Self::Event, Self::Command> {
        match command {
            RecurringTransactionCommand::ProcessSchedule(cmd) => {
                Decision::events(self.decide_schedule(cmd, now))
            }
            RecurringTransactionCommand::ProcessDirectDebitTransactionDocument(cmd) => {
                self.decide_direct_debit(cmd, now)
            }
            RecurringTransactionCommand::ProcessScheduledTransaction(cmd) => {
                Decision::events(self.decide_scheduled_transaction(cmd))
            }
            RecurringTransactionCommand::RecheckStatus {
                recurring_transaction_id,
            } => Decision::events(self.decide_recheck(*recurring_transaction_id, now)),
        }
    }

    fn apply(mut self, event: &Self::Event) -> Self {
        match event {
            RecurringTransactionEvent::NewRecurringTransactionFound {
                id,
                frequency,
                amount,
                source,
                start_date,
                end_date,
                ..
            } => {
                self.id = Some(*id);
                self.status = Status::Active;
                self.details.initialized = true;
                self.details.source = Some(*source);
                self.details.start_date = Some(*start_date);
                self.details.end_date = *end_date;
                self.details.frequency = Some(*frequency);
                self.details.amount = Some(amount.clone());
                self
            }

            RecurringTransactionEvent::AmountChanged { amount, .. } => {
                self.details.amount = Some(amount.clone());
                self
            }

            RecurringTransactionEvent::FrequencyChanged { frequency, .. } => {
                self.details.frequency = Some(*frequency);
                self
            }

            RecurringTransactionEvent::Ended { .. } => {
                self.status = Status::Ended;
                self
            }

            RecurringTransactionEvent::StartDateChanged { start_date, .. } => {
                self.details.start_date = Some(*start_date);
                self
            }

            RecurringTransactionEvent::Reopened { .. } => {
                self.status = Status::Active;
                self
            }

            RecurringTransactionEvent::NewRecurringTransactionInstanceFound {
                id,
                amount,
                from_iban,
                to_iban,
                transaction_date,
                ..
            } => {
                self.instances.insert(
                    *id,
                    RecurringTransactionInstance {
                        amount: amount.clone(),
                        from_iban: from_iban.clone(),
                        to_iban: to_iban.clone(),
                        transaction_date: *transaction_date,
                    },
                );

                let newer = self
                    .details
                    .last_transaction_date
                    .map_or(true, |last| *transaction_date > last);
                if newer {
                    self.details.last_transaction_date = Some(*transaction_date);
                }
                self
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn series_id() -> RecurringTransactionId {
        RecurringTransactionId::new()
    }

    fn day(year: i32, month: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, d, 9, 0, 0).unwrap()
    }

    fn iban() -> Iban {
        Iban::parse("NL91ABNA0417164300").unwrap()
    }

    fn direct_debit_command(
        id: RecurringTransactionId,
        instance_id: RecurringTransactionInstanceId,
        transaction_date: DateTime<Utc>,
        amount: Money,
    ) -> RecurringTransactionCommand {
        RecurringTransactionCommand::ProcessDirectDebitTransactionDocument(
            ProcessDirectDebitTransactionDocument {
                recurring_transaction_id: id,
                instance_id,
                institution: Institution::Bunq,
                institution_entity_id: "555".to_string(),
                from_iban: iban(),
                from_name: "Spotify".to_string(),
                to_iban: None,
                to_name: None,
                transaction_date,
                amount,
                fetch_timestamp: transaction_date,
            },
        )
    }

    fn schedule_command(
        id: RecurringTransactionId,
        amount: Money,
        end_date: Option<DateTime<Utc>>,
    ) -> RecurringTransactionCommand {
        RecurringTransactionCommand::ProcessSchedule(ProcessSchedule {
            recurring_transaction_id: id,
            institution: Institution::Bunq,
            institution_entity_id: "777".to_string(),
            from_iban: iban(),
            from_name: "Me".to_string(),
            to_iban: Iban::parse("DE89370400440532013000").unwrap(),
            to_name: "Landlord".to_string(),
            frequency: Period::monthly(),
            start_date: day(2024, 1, 1),
            end_date,
            amount,
            fetch_timestamp: day(2024, 1, 2),
        })
    }

    fn state_after(
        mut state: RecurringTransactionAggregate,
        command: &RecurringTransactionCommand,
        now: DateTime<Utc>,
    ) -> RecurringTransactionAggregate {
        for event in state.decide(command, now).events {
            state = state.apply(&event);
        }
        state
    }

    #[test]
    fn test_first_direct_debit_creates_series() {
        let id = series_id();
        let now = day(2024, 1, 15);
        let cmd = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 1, 15),
            Money::eur(999),
        );

        let decision = RecurringTransactionAggregate::default().decide(&cmd, now);

        match decision.events.as_slice() {
            [RecurringTransactionEvent::NewRecurringTransactionFound {
                source,
                start_date,
                amount,
                frequency,
                ..
            }] => {
                assert_eq!(*source, Source::DirectDebit);
                assert_eq!(*start_date, day(2024, 1, 15));
                assert_eq!(*amount, Money::eur(999));
                assert_eq!(*frequency, Period::monthly());
            }
            events => panic!("unexpected events: {events:?}"),
        }
        assert!(decision.followups.is_empty());
    }

    #[test]
    fn test_second_direct_debit_adds_instance_only() {
        let id = series_id();
        let first = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 1, 15),
            Money::eur(999),
        );
        let state = state_after(RecurringTransactionAggregate::default(), &first, day(2024, 1, 15));

        let second = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 2, 15),
            Money::eur(999),
        );
        let decision = state.decide(&second, day(2024, 2, 15));

        assert!(matches!(
            decision.events.as_slice(),
            [RecurringTransactionEvent::NewRecurringTransactionInstanceFound { .. }]
        ));
    }

    #[test]
    fn test_direct_debit_schedules_rechecks() {
        let id = series_id();
        let first = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 1, 15),
            Money::eur(999),
        );
        let state = state_after(RecurringTransactionAggregate::default(), &first, day(2024, 1, 15));

        let now = day(2024, 2, 15);
        let second = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 2, 15),
            Money::eur(999),
        );
        let decision = state.decide(&second, now);

        assert_eq!(decision.followups.len(), 2);
        assert_eq!(decision.followups[0].identifier, "1-min");
        assert_eq!(decision.followups[0].due, now + Duration::seconds(60));
        assert_eq!(decision.followups[1].identifier, "after-frequency");
        assert!(decision.followups[1].due > now + Duration::days(29));
    }

    #[test]
    fn test_replayed_instance_is_deduplicated() {
        let id = series_id();
        let instance_id = RecurringTransactionInstanceId::new();
        let first = direct_debit_command(id, instance_id, day(2024, 1, 15), Money::eur(999));
        let state = state_after(RecurringTransactionAggregate::default(), &first, day(2024, 1, 15));

        let replay = direct_debit_command(id, instance_id, day(2024, 1, 15), Money::eur(999));
        let state = state_after(state, &replay, day(2024, 1, 15));
        assert_eq!(state.instances.len(), 1);
        assert!(state.decide(&replay, day(2024, 1, 15)).events.is_empty());
    }

    #[test]
    fn test_only_newest_observation_rewrites_amount() {
        let id = series_id();
        let mut state = RecurringTransactionAggregate::default();
        for (month, day_of_month) in [(1, 15), (2, 15), (3, 15)] {
            let cmd = direct_debit_command(
                id,
                RecurringTransactionInstanceId::new(),
                day(2024, month, day_of_month),
                Money::eur(999),
            );
            state = state_after(state, &cmd, day(2024, month, day_of_month));
        }

        // an older fetch with a different amount must not rewrite
        let old = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 2, 20),
            Money::eur(899),
        );
        let events = state.decide(&old, day(2024, 3, 20)).events;
        assert!(events
            .iter()
            .all(|event| !matches!(event, RecurringTransactionEvent::AmountChanged { .. })));

        // a newer one may
        let new = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 4, 15),
            Money::eur(1099),
        );
        let events = state.decide(&new, day(2024, 4, 15)).events;
        assert!(events
            .iter()
            .any(|event| matches!(event, RecurringTransactionEvent::AmountChanged { .. })));
    }

    #[test]
    fn test_earlier_transaction_pulls_start_date_back() {
        let id = series_id();
        let first = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 3, 15),
            Money::eur(999),
        );
        let state = state_after(RecurringTransactionAggregate::default(), &first, day(2024, 3, 15));

        let earlier = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 2, 15),
            Money::eur(999),
        );
        let events = state.decide(&earlier, day(2024, 3, 20)).events;
        assert!(matches!(
            events.first(),
            Some(RecurringTransactionEvent::StartDateChanged { start_date, .. })
                if *start_date == day(2024, 2, 15)
        ));
    }

    #[test]
    fn test_schedule_does_not_overwrite_direct_debit_series() {
        let id = series_id();
        let debit = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 1, 15),
            Money::eur(999),
        );
        let state = state_after(RecurringTransactionAggregate::default(), &debit, day(2024, 1, 15));

        let schedule = schedule_command(id, Money::eur(5000), None);
        let decision = state.decide(&schedule, day(2024, 2, 1));
        assert!(decision.is_empty());
        assert_eq!(state.details.source, Some(Source::DirectDebit));
    }

    #[test]
    fn test_schedule_amount_change() {
        let id = series_id();
        let initial = schedule_command(id, Money::eur(1000), None);
        let state = state_after(RecurringTransactionAggregate::default(), &initial, day(2024, 1, 2));
        assert_eq!(state.details.source, Some(Source::Schedule));

        let changed = schedule_command(id, Money::eur(1200), None);
        let events = state.decide(&changed, day(2024, 2, 2)).events;
        assert!(matches!(
            events.as_slice(),
            [RecurringTransactionEvent::AmountChanged { amount, .. }] if *amount == Money::eur(1200)
        ));
    }

    #[test]
    fn test_schedule_past_end_date_ends_series() {
        let id = series_id();
        let initial = schedule_command(id, Money::eur(1000), Some(day(2024, 6, 1)));
        let state = state_after(RecurringTransactionAggregate::default(), &initial, day(2024, 1, 2));

        let refetched = schedule_command(id, Money::eur(1000), Some(day(2024, 6, 1)));
        let events = state.decide(&refetched, day(2024, 7, 1)).events;
        assert!(matches!(events.as_slice(), [RecurringTransactionEvent::Ended { .. }]));

        // and an extended end date reopens it
        let state = state_after(state, &refetched, day(2024, 7, 1));
        let extended = schedule_command(id, Money::eur(1000), Some(day(2025, 6, 1)));
        let events = state.decide(&extended, day(2024, 8, 1)).events;
        assert!(matches!(events.as_slice(), [RecurringTransactionEvent::Reopened { .. }]));
    }

    #[test]
    fn test_recheck_ends_stagnant_series() {
        let id = series_id();
        let mut state = RecurringTransactionAggregate::default();
        for month in [1, 2] {
            let cmd = direct_debit_command(
                id,
                RecurringTransactionInstanceId::new(),
                day(2024, month, 15),
                Money::eur(999),
            );
            state = state_after(state, &cmd, day(2024, month, 15));
        }
        assert_eq!(state.details.last_transaction_date, Some(day(2024, 2, 15)));

        let recheck = RecurringTransactionCommand::RecheckStatus {
            recurring_transaction_id: id,
        };

        // within one period: still fine
        assert!(state.decide(&recheck, day(2024, 3, 1)).events.is_empty());

        // well past one period plus the workday grace
        let events = state.decide(&recheck, day(2024, 5, 1)).events;
        assert!(matches!(events.as_slice(), [RecurringTransactionEvent::Ended { .. }]));

        // an instance arriving later reopens it on the next recheck
        let state = state_after(state, &recheck, day(2024, 5, 1));
        assert_eq!(state.status, Status::Ended);
        let revived = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 5, 10),
            Money::eur(999),
        );
        let state = state_after(state, &revived, day(2024, 5, 10));
        let events = state.decide(&recheck, day(2024, 5, 12)).events;
        assert!(matches!(events.as_slice(), [RecurringTransactionEvent::Reopened { .. }]));
    }

    #[test]
    fn test_recheck_on_uninitialised_state_is_noop() {
        let recheck = RecurringTransactionCommand::RecheckStatus {
            recurring_transaction_id: series_id(),
        };
        let decision = RecurringTransactionAggregate::default().decide(&recheck, Utc::now());
        assert!(decision.is_empty());
    }

    #[test]
    fn test_source_is_immutable_across_events() {
        let id = series_id();
        let debit = direct_debit_command(
            id,
            RecurringTransactionInstanceId::new(),
            day(2024, 1, 15),
            Money::eur(999),
        );
        let mut state =
            state_after(RecurringTransactionAggregate::default(), &debit, day(2024, 1, 15));

        let events = [
            RecurringTransactionEvent::AmountChanged { id, amount: Money::eur(1) },
            RecurringTransactionEvent::FrequencyChanged { id, frequency: Period::weeks(1) },
            RecurringTransactionEvent::Ended { id },
            RecurringTransactionEvent::Reopened { id },
            RecurringTransactionEvent::StartDateChanged { id, start_date: day(2020, 1, 1) },
        ];
        for event in &events {
            state = state.apply(event);
            assert_eq!(state.details.source, Some(Source::DirectDebit));
        }
    }

    #[test]
    fn test_instance_found_tracks_last_transaction_date() {
        let id = series_id();
        let event_for = |d: DateTime<Utc>| RecurringTransactionEvent::NewRecurringTransactionInstanceFound {
            id: RecurringTransactionInstanceId::new(),
            recurring_transaction_id: id,
            amount: Money::eur(999),
            from_iban: iban(),
            to_iban: None,
            transaction_date: d,
        };

        let state = RecurringTransactionAggregate::default()
            .apply(&event_for(day(2024, 2, 15)))
            .apply(&event_for(day(2024, 1, 15)));

        // an older instance never moves the watermark back
        assert_eq!(state.details.last_transaction_date, Some(day(2024, 2, 15)));
        assert_eq!(state.instances.len(), 2);
    }

    #[test]
    fn test_event_payload_roundtrips_with_tag() {
        let event = RecurringTransactionEvent::Ended { id: series_id() };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "recurring:ended");
        let back: RecurringTransactionEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
