//! Frequency inference
//!
//! Derives a series frequency from observed instance dates. The function
//! is deterministic over the input set (order and duplicates do not
//! matter) so that replaying an event log re-derives the same periods.

use chrono::{DateTime, Utc};
use guilder_types::Period;

/// Candidate periods, shortest first, with their length in whole days
const CANDIDATES: [(u32, CandidateKind); 4] = [
    (7, CandidateKind::Weekly),
    (30, CandidateKind::Monthly),
    (91, CandidateKind::Quarterly),
    (365, CandidateKind::Yearly),
];

#[derive(Clone, Copy)]
enum CandidateKind {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl CandidateKind {
    fn period(self) -> Period {
        match self {
            Self::Weekly => Period::weeks(1),
            Self::Monthly => Period::months(1),
            Self::Quarterly => Period::months(3),
            Self::Yearly => Period::years(1),
        }
    }
}

/// Infer the recurrence period from the set of transaction dates.
///
/// The median of the adjacent gaps (in whole days, lower-middle for even
/// counts) is rounded to the nearest candidate period; ties resolve to
/// the shorter one. Fewer than two distinct dates default to monthly.
pub fn frequency_for(dates: &[DateTime<Utc>]) -> Period {
    let mut sorted: Vec<DateTime<Utc>> = dates.to_vec();
    sorted.sort();
    sorted.dedup();

    if sorted.len() < 2 {
        return Period::monthly();
    }

    let mut gaps: Vec<i64> = sorted
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_days())
        .collect();
    gaps.sort_unstable();

    let median = gaps[(gaps.len() - 1) / 2];

    let (_, nearest) = CANDIDATES
        .iter()
        .map(|(days, kind)| ((median - *days as i64).abs(), *kind))
        .min_by_key(|(distance, _)| *distance)
        .expect("candidate list is non-empty");

    nearest.period()
}
