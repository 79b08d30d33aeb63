use chrono::Duration;

use crate::limits::DEFAULT_MIN_CANCEL_REASON_LEN;
use crate::model::Money;

/// How partial hours are charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationRounding {
    /// 90 minutes is charged as 2 hours.
    RoundUp,
    /// Only whole-hour bookings are accepted.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositPolicy {
    /// Full payment is arranged manually; no deadline, nothing expires.
    Disabled,
    /// `percent` of the total is due within `window` of creation.
    Enabled { percent: u32, window: Duration },
}

impl DepositPolicy {
    pub fn standard() -> Self {
        DepositPolicy::Enabled {
            percent: 30,
            window: Duration::hours(24),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, DepositPolicy::Enabled { .. })
    }
}

/// Business rules chosen once, at engine construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    pub deposit: DepositPolicy,
    pub rounding: DurationRounding,
    /// Share of the total price refunded when a confirmed or paid booking is cancelled.
    pub refund_percent: u32,
    pub min_cancel_reason_len: usize,
    /// Admins may move `cancelled` back to `pending`.
    pub reopen_cancelled: bool,
    /// Admins may move `expired` back to `pending`.
    pub reopen_expired: bool,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            deposit: DepositPolicy::standard(),
            rounding: DurationRounding::RoundUp,
            refund_percent: 70,
            min_cancel_reason_len: DEFAULT_MIN_CANCEL_REASON_LEN,
            reopen_cancelled: false,
            reopen_expired: false,
        }
    }
}

impl BookingPolicy {
    /// Manual-payment configuration: no deposit, admins may reopen cancelled bookings.
    pub fn manual_payment() -> Self {
        Self {
            deposit: DepositPolicy::Disabled,
            reopen_cancelled: true,
            ..Self::default()
        }
    }
}

/// `amount * percent / 100`, rounded half up. `None` on overflow.
pub fn percent_of(amount: Money, percent: u32) -> Option<Money> {
    amount
        .checked_mul(percent as Money)?
        .checked_add(50)
        .map(|scaled| scaled / 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(percent_of(300_000, 30), Some(90_000));
        assert_eq!(percent_of(300_000, 70), Some(210_000));
        assert_eq!(percent_of(5, 30), Some(2)); // 1.5 -> 2
        assert_eq!(percent_of(3, 30), Some(1)); // 0.9 -> 1
        assert_eq!(percent_of(1, 30), Some(0)); // 0.3 -> 0
    }

    #[test]
    fn percent_overflow_is_none() {
        assert_eq!(percent_of(Money::MAX / 4, 30), None);
        assert_eq!(percent_of(Money::MAX / 100, 100), None);
        assert_eq!(percent_of(Money::MAX / 200, 100), Some(Money::MAX / 200));
    }

    #[test]
    fn manual_payment_disables_deposit() {
        let p = BookingPolicy::manual_payment();
        assert!(!p.deposit.is_enabled());
        assert!(p.reopen_cancelled);
        assert!(BookingPolicy::default().deposit.is_enabled());
    }
}
