use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Bookings from a start-sorted slice whose span overlaps `query`.
/// Binary search skips everything starting at or after `query.end`.
pub fn overlapping<'a>(sorted: &'a [Booking], query: &'a Span) -> impl Iterator<Item = &'a Booking> {
    let right_bound = sorted.partition_point(|b| b.span.start < query.end);
    sorted[..right_bound]
        .iter()
        .filter(move |b| b.span.end > query.start)
}

/// First slot-holding booking in `existing` that overlaps `span`, ignoring `exclude`.
/// `existing` must be sorted by start time.
pub fn first_conflict<'a>(
    existing: &'a [Booking],
    span: &'a Span,
    exclude: Option<Ulid>,
) -> Option<&'a Booking> {
    overlapping(existing, span)
        .find(|b| b.status.holds_slot() && Some(b.id) != exclude)
}

pub fn check_no_conflict(
    existing: &[Booking],
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match first_conflict(existing, span, exclude) {
        None => Ok(()),
        Some(b) => {
            metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(format!(
                "studio is not available for the selected time slot (overlaps {} booked {})",
                b.id, b.span
            )))
        }
    }
}
