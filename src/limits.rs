/// Minimum characters in an owner-supplied cancellation reason.
pub const DEFAULT_MIN_CANCEL_REASON_LEN: usize = 10;

pub const MAX_REASON_LEN: usize = 1000;
pub const MAX_NOTES_LEN: usize = 2000;
pub const MAX_PROOF_URL_LEN: usize = 2048;
pub const MAX_NAME_LEN: usize = 256;

/// Shortest bookable interval.
pub const MIN_BOOKING_MINUTES: i64 = 60;

/// How far ahead a booking may be made.
pub const MAX_ADVANCE_DAYS: i64 = 366;

/// Reason recorded when an admin cancels without giving one.
pub const ADMIN_CANCEL_REASON: &str = "Cancelled by admin";
