use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use ulid::Ulid;

use crate::limits::MAX_ADVANCE_DAYS;
use crate::model::*;
use crate::policy::BookingPolicy;

use super::pricing::{compute_price, Quote};
use super::EngineError;

/// A booking request as it arrives from the caller, times still unparsed.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub studio_id: Ulid,
    /// `YYYY-MM-DD`
    pub booking_date: String,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
}

#[derive(Debug, Clone)]
pub struct ValidatedBooking {
    pub studio: Studio,
    pub date: NaiveDate,
    pub span: Span,
    pub quote: Quote,
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::validation("invalid booking date format, use YYYY-MM-DD"))
}

fn parse_time(raw: &str, field: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| EngineError::validation(format!("invalid {field} format, use HH:MM")))
}

/// Parse `start`/`end` into a span with `end > start`.
pub fn parse_span(start: &str, end: &str) -> Result<Span, EngineError> {
    let start = parse_time(start, "start_time")?;
    let end = parse_time(end, "end_time")?;
    Span::try_new(start, end)
        .ok_or_else(|| EngineError::validation("end_time must be after start_time"))
}

/// Everything short of the slot check, fail-fast in a fixed order: studio,
/// date, times, duration and price. The slot check needs the slot lock and
/// is left to the caller.
pub fn validate_request(
    studio: Option<Studio>,
    req: &BookingRequest,
    now: DateTime<Utc>,
    today: NaiveDate,
    policy: &BookingPolicy,
) -> Result<ValidatedBooking, EngineError> {
    let studio = studio.ok_or(EngineError::NotFound {
        entity: "studio",
        id: req.studio_id,
    })?;
    if !studio.is_active {
        return Err(EngineError::validation("studio is currently inactive"));
    }

    let date = parse_date(&req.booking_date)?;
    if date < today {
        return Err(EngineError::validation("cannot book studio in the past"));
    }
    if date > today + Duration::days(MAX_ADVANCE_DAYS) {
        return Err(EngineError::LimitExceeded("booking date too far ahead"));
    }

    let span = parse_span(&req.start_time, &req.end_time)?;
    if let Some(window) = studio.operating_window()
        && !window.contains_span(&span) {
            return Err(EngineError::validation(format!(
                "selected time is outside operating hours ({window})"
            )));
        }

    let quote = compute_price(&studio, &span, now, policy)?;
    Ok(ValidatedBooking {
        studio,
        date,
        span,
        quote,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn studio(active: bool) -> Studio {
        let now = Utc::now();
        Studio {
            id: Ulid::new(),
            name: "Studio 1".into(),
            description: String::new(),
            location: "Manado".into(),
            price_per_hour: 100_000,
            operating_hours: "09:00-22:00".into(),
            facilities: vec!["drum kit".into()],
            is_active: active,
            created_at: now,
            updated_at: now,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()
    }

    fn request(studio_id: Ulid, date: &str, start: &str, end: &str) -> BookingRequest {
        BookingRequest {
            studio_id,
            booking_date: date.into(),
            start_time: start.into(),
            end_time: end.into(),
        }
    }

    fn run(studio: Option<Studio>, req: &BookingRequest) -> Result<ValidatedBooking, EngineError> {
        validate_request(studio, req, now(), now().date_naive(), &BookingPolicy::default())
    }

    #[test]
    fn accepts_a_valid_request() {
        let s = studio(true);
        let v = run(Some(s.clone()), &request(s.id, "2026-10-20", "14:00", "17:00")).unwrap();
        assert_eq!(v.span.duration_minutes(), 180);
        assert_eq!(v.quote.total_price, 300_000);
        assert_eq!(v.date, NaiveDate::from_ymd_opt(2026, 10, 20).unwrap());
    }

    #[test]
    fn today_is_bookable() {
        let s = studio(true);
        assert!(run(Some(s.clone()), &request(s.id, "2026-10-19", "14:00", "15:00")).is_ok());
    }

    #[test]
    fn checks_run_in_order() {
        let s = studio(false);
        // Inactive studio reported before the malformed date.
        let err = run(Some(s.clone()), &request(s.id, "19-10-2026", "x", "y")).unwrap_err();
        assert_eq!(err.to_string(), "studio is currently inactive");

        let err = run(None, &request(Ulid::new(), "2026-10-20", "14:00", "15:00")).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "studio", .. }));
    }

    #[test]
    fn rejects_bad_dates_and_times() {
        let s = studio(true);
        let cases = [
            (("2026/10/20", "14:00", "15:00"), "invalid booking date format, use YYYY-MM-DD"),
            (("2026-10-18", "14:00", "15:00"), "cannot book studio in the past"),
            (("2026-10-20", "2pm", "15:00"), "invalid start_time format, use HH:MM"),
            (("2026-10-20", "14:00", "25:00"), "invalid end_time format, use HH:MM"),
            (("2026-10-20", "15:00", "15:00"), "end_time must be after start_time"),
            (("2026-10-20", "16:00", "15:00"), "end_time must be after start_time"),
            (("2026-10-20", "14:00", "14:30"), "minimum booking duration is 1 hour"),
        ];
        for ((date, start, end), msg) in cases {
            let err = run(Some(s.clone()), &request(s.id, date, start, end)).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{date} {start}-{end}");
            assert_eq!(err.to_string(), msg);
        }
    }

    #[test]
    fn rejects_outside_operating_hours() {
        let s = studio(true);
        let err = run(Some(s.clone()), &request(s.id, "2026-10-20", "07:00", "10:00")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "selected time is outside operating hours (09:00-22:00)"
        );
    }

    #[test]
    fn rejects_far_future() {
        let s = studio(true);
        let err = run(Some(s.clone()), &request(s.id, "2028-01-01", "10:00", "12:00")).unwrap_err();
        assert!(matches!(err, EngineError::LimitExceeded(_)));
    }
}
