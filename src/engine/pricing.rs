use chrono::{DateTime, Utc};

use crate::limits::MIN_BOOKING_MINUTES;
use crate::model::*;
use crate::policy::{percent_of, BookingPolicy, DepositPolicy, DurationRounding};

use super::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub duration_hours: i64,
    pub total_price: Money,
    pub deposit: Option<DepositTerms>,
}

/// Billable whole hours for `span` under `rounding`.
pub fn billable_hours(span: &Span, rounding: DurationRounding) -> Result<i64, EngineError> {
    let minutes = span.duration_minutes();
    if minutes < MIN_BOOKING_MINUTES {
        return Err(EngineError::validation("minimum booking duration is 1 hour"));
    }
    match rounding {
        DurationRounding::RoundUp => Ok((minutes + 59) / 60),
        DurationRounding::Strict if minutes % 60 != 0 => Err(EngineError::validation(
            "booking duration must be a whole number of hours",
        )),
        DurationRounding::Strict => Ok(minutes / 60),
    }
}

/// Duration, total and (under a deposit policy) deposit terms for booking
/// `span` at `studio`. Pure: `now` only anchors the deposit deadline.
pub fn compute_price(
    studio: &Studio,
    span: &Span,
    now: DateTime<Utc>,
    policy: &BookingPolicy,
) -> Result<Quote, EngineError> {
    if studio.price_per_hour <= 0 {
        return Err(EngineError::validation("studio has no valid hourly rate"));
    }
    let duration_hours = billable_hours(span, policy.rounding)?;
    let total_price = duration_hours
        .checked_mul(studio.price_per_hour)
        .ok_or(EngineError::LimitExceeded("total price overflow"))?;

    let deposit = match policy.deposit {
        DepositPolicy::Disabled => None,
        DepositPolicy::Enabled { percent, window } => {
            let amount = percent_of(total_price, percent)
                .ok_or(EngineError::LimitExceeded("total price overflow"))?;
            Some(DepositTerms {
                amount,
                remaining: total_price - amount,
                deadline: now + window,
            })
        }
    };

    Ok(Quote {
        duration_hours,
        total_price,
        deposit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, TimeZone};
    use ulid::Ulid;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn studio(rate: Money) -> Studio {
        let now = Utc::now();
        Studio {
            id: Ulid::new(),
            name: "Studio 1".into(),
            description: String::new(),
            location: "Manado".into(),
            price_per_hour: rate,
            operating_hours: "09:00-22:00".into(),
            facilities: vec![],
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()
    }

    #[test]
    fn three_hours_with_deposit() {
        let q = compute_price(
            &studio(100_000),
            &Span::new(t(14, 0), t(17, 0)),
            now(),
            &BookingPolicy::default(),
        )
        .unwrap();
        assert_eq!(q.duration_hours, 3);
        assert_eq!(q.total_price, 300_000);
        let d = q.deposit.unwrap();
        assert_eq!(d.amount, 90_000);
        assert_eq!(d.remaining, 210_000);
        assert_eq!(d.amount + d.remaining, q.total_price);
        assert_eq!(d.deadline, now() + Duration::hours(24));
    }

    #[test]
    fn no_deposit_when_disabled() {
        let q = compute_price(
            &studio(100_000),
            &Span::new(t(14, 0), t(17, 0)),
            now(),
            &BookingPolicy::manual_payment(),
        )
        .unwrap();
        assert_eq!(q.total_price, 300_000);
        assert!(q.deposit.is_none());
    }

    #[test]
    fn partial_hours_round_up() {
        let q = compute_price(
            &studio(100_000),
            &Span::new(t(10, 0), t(11, 30)),
            now(),
            &BookingPolicy::default(),
        )
        .unwrap();
        assert_eq!(q.duration_hours, 2);
        assert_eq!(q.total_price, 200_000);
    }

    #[test]
    fn strict_rounding_rejects_partial_hours() {
        let policy = BookingPolicy {
            rounding: DurationRounding::Strict,
            ..BookingPolicy::default()
        };
        let err = compute_price(&studio(100_000), &Span::new(t(10, 0), t(11, 30)), now(), &policy)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let q = compute_price(&studio(100_000), &Span::new(t(10, 0), t(12, 0)), now(), &policy)
            .unwrap();
        assert_eq!(q.duration_hours, 2);
    }

    #[test]
    fn under_an_hour_rejected() {
        let err = compute_price(
            &studio(100_000),
            &Span::new(t(10, 0), t(10, 45)),
            now(),
            &BookingPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "minimum booking duration is 1 hour");
    }

    #[test]
    fn deposit_rounds_half_up() {
        // 3 x 55_555 = 166_665; 30% = 49_999.5 -> 50_000
        let q = compute_price(
            &studio(55_555),
            &Span::new(t(9, 0), t(12, 0)),
            now(),
            &BookingPolicy::default(),
        )
        .unwrap();
        let d = q.deposit.unwrap();
        assert_eq!(d.amount, 50_000);
        assert_eq!(d.remaining, 116_665);
    }

    #[test]
    fn deposit_overflow_is_a_limit_error() {
        // The total fits in i64; 30% of it does not before dividing.
        let err = compute_price(
            &studio(Money::MAX / 4),
            &Span::new(t(10, 0), t(12, 0)),
            now(),
            &BookingPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::LimitExceeded("total price overflow")));
    }

    #[test]
    fn rejects_non_positive_rate() {
        let err = compute_price(
            &studio(0),
            &Span::new(t(9, 0), t(12, 0)),
            now(),
            &BookingPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
