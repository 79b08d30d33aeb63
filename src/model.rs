use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minor currency units (e.g. rupiah, cents). The only money type.
pub type Money = i64;

/// Half-open wall-clock interval `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Span {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Returns `None` unless `start < end`.
    pub fn try_new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Created, waiting for payment.
    Pending,
    /// Deposit (or manual payment) acknowledged by an admin.
    Confirmed,
    /// Fully paid. Only reachable with a deposit policy.
    Paid,
    Completed,
    Cancelled,
    /// Deposit deadline passed without a verified payment.
    Expired,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Paid,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Paid => "paid",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Expired
        )
    }

    /// Whether a booking in this status occupies its time slot.
    pub fn holds_slot(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled | BookingStatus::Expired)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError {
                kind: "booking status",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Studio {
    pub id: Ulid,
    pub name: String,
    pub description: String,
    pub location: String,
    pub price_per_hour: Money,
    /// `"HH:MM-HH:MM"`, e.g. `"09:00-22:00"`.
    pub operating_hours: String,
    pub facilities: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Studio {
    /// Parse `operating_hours` into a span. `None` if empty or malformed.
    pub fn operating_window(&self) -> Option<Span> {
        let (open, close) = self.operating_hours.split_once('-')?;
        let open = NaiveTime::parse_from_str(open.trim(), "%H:%M").ok()?;
        let close = NaiveTime::parse_from_str(close.trim(), "%H:%M").ok()?;
        Span::try_new(open, close)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositTerms {
    pub amount: Money,
    pub remaining: Money,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub studio_id: Ulid,
    pub booking_date: NaiveDate,
    pub span: Span,
    pub duration_hours: i64,
    pub total_price: Money,
    /// Present only when the engine runs with a deposit policy.
    pub deposit: Option<DepositTerms>,
    pub status: BookingStatus,
    pub admin_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every successful update.
    pub version: u64,
}

impl Booking {
    pub fn is_owned_by(&self, user_id: Ulid) -> bool {
        self.user_id == user_id
    }

    /// Pending with a deposit deadline at or before `now`.
    pub fn deposit_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Pending
            && self.deposit.as_ref().is_some_and(|d| d.deadline <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Deposit,
    Full,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Deposit => "deposit",
            PaymentType::Full => "full",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deposit" | "dp" => Ok(PaymentType::Deposit),
            "full" | "full_payment" => Ok(PaymentType::Full),
            _ => Err(ParseEnumError {
                kind: "payment type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Verified,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Verified => "verified",
            PaymentStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub payment_type: PaymentType,
    pub amount: Money,
    pub proof_url: String,
    pub status: PaymentStatus,
    pub verified_by: Option<Ulid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    /// Recorded, waiting for manual processing.
    Pending,
    Processed,
    /// The booking was reopened before the refund was paid out.
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub reason: String,
    pub refund_amount: Money,
    pub refund_status: RefundStatus,
    pub cancelled_at: DateTime<Utc>,
}

/// Who is asking. The web layer derives this from its auth token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Customer(Ulid),
    Admin(Ulid),
    /// Background workers (expiry sweep).
    System,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin(_))
    }

    pub fn user_id(&self) -> Option<Ulid> {
        match self {
            Actor::Customer(id) | Actor::Admin(id) => Some(*id),
            Actor::System => None,
        }
    }

    /// Admins see everything; customers only their own bookings.
    pub fn can_view(&self, booking: &Booking) -> bool {
        match self {
            Actor::Admin(_) | Actor::System => true,
            Actor::Customer(id) => booking.is_owned_by(*id),
        }
    }
}

/// The journal record format. Every store mutation is one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StudioSaved(Studio),
    BookingCreated(Booking),
    BookingUpdated(Booking),
    PaymentCreated(Payment),
    PaymentUpdated(Payment),
    CancellationCreated(Cancellation),
    CancellationUpdated(Cancellation),
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookedSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub booking_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub studio_id: Ulid,
    pub date: NaiveDate,
    pub available: bool,
    pub booked_slots: Vec<BookedSlot>,
    pub available_slots: Vec<Span>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub studio_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.status.is_none_or(|s| b.status == s)
            && self.studio_id.is_none_or(|id| b.studio_id == id)
            && self.user_id.is_none_or(|id| b.user_id == id)
            && self.from.is_none_or(|d| b.booking_date >= d)
            && self.to.is_none_or(|d| b.booking_date <= d)
    }
}
