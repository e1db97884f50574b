// Grace period for removal candidates
//
//   ABSENT ──first seen──▶ PENDING ──elapsed ≥ grace──▶ REMOVABLE
//     ▲                       │                            │
//     └──── back in group ────┘◀──── removal attempted ────┘

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    /// No ledger entry
    Absent,
    /// Tracked, grace still running
    Pending {
        detected_at: DateTime<Utc>,
        remaining: Duration,
    },
    /// Tracked and overdue
    Removable {
        detected_at: DateTime<Utc>,
        elapsed: Duration,
    },
}

/// Classify a `(member, target)` pair from its ledger entry.
///
/// A clock that moved backwards gives a negative elapsed time, which stays
/// pending.
pub fn evaluate(
    detected_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    grace_period: Duration,
) -> CandidateState {
    let Some(detected_at) = detected_at else {
        return CandidateState::Absent;
    };

    let elapsed = now.signed_duration_since(detected_at);
    if elapsed >= grace_period {
        CandidateState::Removable { detected_at, elapsed }
    } else {
        CandidateState::Pending {
            detected_at,
            remaining: grace_period - elapsed,
        }
    }
}

/// Earliest instant a candidate detected at `detected_at` may be removed
pub fn removable_at(detected_at: DateTime<Utc>, grace_period: Duration) -> DateTime<Utc> {
    detected_at + grace_period
}
