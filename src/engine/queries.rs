use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{build_availability, free_within};
use super::conflict::first_conflict;
use super::validate::{parse_date, parse_span};
use super::{Engine, EngineError};

impl Engine {
    pub(super) async fn load_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.repo
            .get_booking(id)
            .await
            .map_err(|e| EngineError::from_store("fetch booking", e))?
            .ok_or(EngineError::NotFound { entity: "booking", id })
    }

    pub(super) async fn load_payment(&self, id: Ulid) -> Result<Payment, EngineError> {
        self.repo
            .get_payment(id)
            .await
            .map_err(|e| EngineError::from_store("fetch payment", e))?
            .ok_or(EngineError::NotFound { entity: "payment", id })
    }

    pub(super) async fn load_studio(&self, id: Ulid) -> Result<Studio, EngineError> {
        self.repo
            .find_studio(id)
            .await
            .map_err(|e| EngineError::from_store("fetch studio", e))?
            .ok_or(EngineError::NotFound { entity: "studio", id })
    }

    async fn bookings_on(&self, studio_id: Ulid, date: NaiveDate) -> Result<Vec<Booking>, EngineError> {
        self.repo
            .list_bookings_for_studio_on_date(studio_id, date)
            .await
            .map_err(|e| EngineError::from_store("check availability", e))
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn get_booking(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self.load_booking(id).await?;
        if !actor.can_view(&booking) {
            return Err(EngineError::forbidden("you don't have access to this booking"));
        }
        Ok(booking)
    }

    /// Newest first. Customers only ever see their own bookings.
    pub async fn list_bookings(
        &self,
        actor: &Actor,
        mut filter: BookingFilter,
    ) -> Result<Vec<Booking>, EngineError> {
        if let Actor::Customer(id) = actor {
            filter.user_id = Some(*id);
        }
        self.repo
            .list_bookings(&filter)
            .await
            .map_err(|e| EngineError::from_store("fetch bookings", e))
    }

    // ── Availability ─────────────────────────────────────────

    /// True when no slot-holding booking overlaps `span`.
    pub async fn is_available(
        &self,
        studio_id: Ulid,
        date: NaiveDate,
        span: Span,
    ) -> Result<bool, EngineError> {
        let existing = self.bookings_on(studio_id, date).await?;
        Ok(first_conflict(&existing, &span, None).is_none())
    }

    /// Availability of the `start`..`end` window on `date` (`YYYY-MM-DD`,
    /// `HH:MM`), listing whatever is booked inside it.
    pub async fn get_availability(
        &self,
        studio_id: Ulid,
        date: &str,
        start: &str,
        end: &str,
    ) -> Result<Availability, EngineError> {
        let date = parse_date(date)?;
        let window = parse_span(start, end)?;
        self.load_studio(studio_id).await?;
        let existing = self.bookings_on(studio_id, date).await?;
        Ok(build_availability(studio_id, date, window, &existing))
    }

    /// Free stretches of at least `min_minutes` within the studio's
    /// operating hours on `date`.
    pub async fn free_slots(
        &self,
        studio_id: Ulid,
        date: NaiveDate,
        min_minutes: i64,
    ) -> Result<Vec<Span>, EngineError> {
        let studio = self.load_studio(studio_id).await?;
        let window = studio
            .operating_window()
            .ok_or_else(|| EngineError::validation("studio has no valid operating hours"))?;
        let existing = self.bookings_on(studio_id, date).await?;
        Ok(free_within(window, &existing, min_minutes.max(1)))
    }

    // ── Payments and cancellations ───────────────────────────

    pub async fn payments_for_booking(
        &self,
        actor: &Actor,
        booking_id: Ulid,
    ) -> Result<Vec<Payment>, EngineError> {
        self.get_booking(actor, booking_id).await?;
        self.repo
            .list_payments_for_booking(booking_id)
            .await
            .map_err(|e| EngineError::from_store("fetch payments", e))
    }

    pub async fn get_payment(&self, actor: &Actor, id: Ulid) -> Result<Payment, EngineError> {
        let payment = self.load_payment(id).await?;
        let booking = self.load_booking(payment.booking_id).await?;
        if !actor.can_view(&booking) {
            return Err(EngineError::forbidden("you don't have access to this payment"));
        }
        Ok(payment)
    }

    /// Admin queue of payments awaiting verification, oldest first.
    pub async fn pending_payments(&self, actor: &Actor) -> Result<Vec<Payment>, EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::forbidden("only admins can review payments"));
        }
        self.repo
            .list_payments(Some(PaymentStatus::Pending))
            .await
            .map_err(|e| EngineError::from_store("fetch pending payments", e))
    }

    pub async fn cancellation_for(
        &self,
        actor: &Actor,
        booking_id: Ulid,
    ) -> Result<Option<Cancellation>, EngineError> {
        self.get_booking(actor, booking_id).await?;
        self.repo
            .get_cancellation(booking_id)
            .await
            .map_err(|e| EngineError::from_store("fetch cancellation", e))
    }

    // ── Studios ──────────────────────────────────────────────

    pub async fn get_studio(&self, id: Ulid) -> Result<Studio, EngineError> {
        self.load_studio(id).await
    }

    /// Sorted by name.
    pub async fn list_studios(&self, active_only: bool) -> Result<Vec<Studio>, EngineError> {
        let mut studios = self
            .repo
            .list_studios()
            .await
            .map_err(|e| EngineError::from_store("fetch studios", e))?;
        if active_only {
            studios.retain(|s| s.is_active);
        }
        Ok(studios)
    }
}
