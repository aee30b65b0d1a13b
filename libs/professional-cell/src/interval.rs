//! Half-open `[start, end)` interval predicates shared by slot resolution
//! and appointment conflict detection.

use chrono::{DateTime, Utc};

/// Two intervals overlap iff each one starts before the other ends.
/// Touching endpoints (`a_end == b_start`) do not overlap, so slots and
/// appointments may sit back-to-back.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// `[inner_start, inner_end)` lies entirely within `[outer_start, outer_end)`.
pub fn contains(
    outer_start: DateTime<Utc>,
    outer_end: DateTime<Utc>,
    inner_start: DateTime<Utc>,
    inner_end: DateTime<Utc>,
) -> bool {
    outer_start <= inner_start && inner_end <= outer_end
}
