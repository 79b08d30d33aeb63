use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Remove every span in `to_remove` from `base`. Both must be sorted by start.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Slot-holding bookings overlapping `window`, in start order.
pub fn booked_slots(sorted: &[Booking], window: &Span) -> Vec<BookedSlot> {
    super::conflict::overlapping(sorted, window)
        .filter(|b| b.status.holds_slot())
        .map(|b| BookedSlot {
            start: b.span.start,
            end: b.span.end,
            booking_id: b.id,
        })
        .collect()
}

/// Availability of `window` given the day's bookings (sorted by start).
/// The window itself is the only available slot when nothing overlaps it.
pub fn build_availability(
    studio_id: Ulid,
    date: NaiveDate,
    window: Span,
    sorted: &[Booking],
) -> Availability {
    let booked = booked_slots(sorted, &window);
    let available = booked.is_empty();
    Availability {
        studio_id,
        date,
        available,
        booked_slots: booked,
        available_slots: if available { vec![window] } else { Vec::new() },
    }
}

/// Free sub-intervals of `window` at least `min_minutes` long.
pub fn free_within(window: Span, sorted: &[Booking], min_minutes: i64) -> Vec<Span> {
    let taken: Vec<Span> = sorted
        .iter()
        .filter(|b| b.status.holds_slot())
        .map(|b| b.span)
        .collect();
    let taken = merge_overlapping(&taken);
    let mut free = subtract_intervals(&[window], &taken);
    free.retain(|s| s.duration_minutes() >= min_minutes);
    free
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Utc};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn s(a: (u32, u32), b: (u32, u32)) -> Span {
        Span::new(t(a.0, a.1), t(b.0, b.1))
    }

    fn booking(span: Span, status: BookingStatus) -> Booking {
        let now = Utc::now();
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            studio_id: Ulid::nil(),
            booking_date: NaiveDate::from_ymd_opt(2026, 11, 20).unwrap(),
            span,
            duration_hours: span.duration_minutes() / 60,
            total_price: 0,
            deposit: None,
            status,
            admin_notes: None,
            cancellation_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    // ── subtract_intervals ────────────────────────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![s((9, 0), (10, 0)), s((12, 0), (13, 0))];
        let remove = vec![s((10, 0), (12, 0))];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![s((10, 0), (11, 0))];
        let remove = vec![s((9, 0), (12, 0))];
        assert!(subtract_intervals(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_partial_edges() {
        let base = vec![s((10, 0), (12, 0))];
        assert_eq!(
            subtract_intervals(&base, &[s((9, 0), (11, 0))]),
            vec![s((11, 0), (12, 0))]
        );
        assert_eq!(
            subtract_intervals(&base, &[s((11, 0), (13, 0))]),
            vec![s((10, 0), (11, 0))]
        );
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![s((9, 0), (22, 0))];
        let remove = vec![s((10, 0), (11, 0)), s((14, 0), (17, 0)), s((20, 0), (21, 30))];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                s((9, 0), (10, 0)),
                s((11, 0), (14, 0)),
                s((17, 0), (20, 0)),
                s((21, 30), (22, 0)),
            ]
        );
    }

    // ── merge_overlapping ────────────────────────────────

    #[test]
    fn merge_overlapping_and_adjacent() {
        let spans = vec![s((9, 0), (11, 0)), s((10, 0), (12, 0)), s((12, 0), (13, 0)), s((15, 0), (16, 0))];
        assert_eq!(
            merge_overlapping(&spans),
            vec![s((9, 0), (13, 0)), s((15, 0), (16, 0))]
        );
    }

    // ── availability ─────────────────────────────────────

    #[test]
    fn free_window_is_the_only_slot() {
        let existing = vec![booking(s((9, 0), (11, 0)), BookingStatus::Confirmed)];
        let window = s((11, 0), (13, 0));
        let a = build_availability(Ulid::nil(), existing[0].booking_date, window, &existing);
        assert!(a.available);
        assert!(a.booked_slots.is_empty());
        assert_eq!(a.available_slots, vec![window]);
    }

    #[test]
    fn taken_window_lists_booked_slots_in_order() {
        let first = booking(s((10, 0), (12, 0)), BookingStatus::Pending);
        let second = booking(s((13, 0), (15, 0)), BookingStatus::Paid);
        let existing = vec![first.clone(), second.clone()];
        let a = build_availability(
            Ulid::nil(),
            first.booking_date,
            s((11, 0), (14, 0)),
            &existing,
        );
        assert!(!a.available);
        assert!(a.available_slots.is_empty());
        let ids: Vec<Ulid> = a.booked_slots.iter().map(|b| b.booking_id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn released_bookings_do_not_block() {
        let existing = vec![
            booking(s((10, 0), (12, 0)), BookingStatus::Cancelled),
            booking(s((10, 0), (12, 0)), BookingStatus::Expired),
        ];
        let free = free_within(s((9, 0), (13, 0)), &existing, 60);
        assert_eq!(free, vec![s((9, 0), (13, 0))]);
    }

    #[test]
    fn free_within_drops_short_gaps() {
        let existing = vec![
            booking(s((10, 0), (12, 0)), BookingStatus::Confirmed),
            booking(s((12, 30), (15, 0)), BookingStatus::Pending),
        ];
        let free = free_within(s((9, 0), (18, 0)), &existing, 60);
        assert_eq!(free, vec![s((9, 0), (10, 0)), s((15, 0), (18, 0))]);
    }
}
