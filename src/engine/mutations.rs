use serde::Deserialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Notification;

use super::conflict::check_no_conflict;
use super::lifecycle::{authorize, refund_for};
use super::validate::{validate_request, BookingRequest};
use super::{timed, Engine, EngineError};

/// Customer-submitted proof of a transfer.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentProof {
    pub payment_type: PaymentType,
    pub amount: Money,
    pub proof_url: String,
}

/// An admin's decision on a pending payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Verify,
    Reject { reason: String },
}

/// Fields an admin supplies when registering a studio.
#[derive(Debug, Clone, Deserialize)]
pub struct NewStudio {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub location: String,
    pub price_per_hour: Money,
    pub operating_hours: String,
    #[serde(default)]
    pub facilities: Vec<String>,
}

fn require_admin(actor: &Actor, what: &str) -> Result<Ulid, EngineError> {
    match actor {
        Actor::Admin(id) => Ok(*id),
        _ => Err(EngineError::forbidden(format!("only admins can {what}"))),
    }
}

fn transition_notification(booking: Booking, reason: Option<String>) -> Notification {
    match booking.status {
        BookingStatus::Pending => Notification::Reopened { booking },
        BookingStatus::Confirmed => Notification::Confirmed { booking },
        BookingStatus::Paid => Notification::Paid { booking },
        BookingStatus::Completed => Notification::Completed { booking },
        BookingStatus::Cancelled => Notification::Cancelled {
            booking,
            reason: reason.unwrap_or_default(),
        },
        BookingStatus::Expired => Notification::Expired { booking },
    }
}

fn count_transition(from: BookingStatus, to: BookingStatus) {
    metrics::counter!(
        crate::observability::TRANSITIONS_TOTAL,
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

impl Engine {
    // ── Bookings ─────────────────────────────────────────────

    /// Validate, then check-and-insert under the studio-day lock.
    pub async fn create_booking(&self, actor: &Actor, req: BookingRequest) -> Result<Booking, EngineError> {
        timed("create_booking", async {
            let user_id = actor
                .user_id()
                .ok_or_else(|| EngineError::forbidden("bookings must belong to a user"))?;
            let studio = self
                .repo
                .find_studio(req.studio_id)
                .await
                .map_err(|e| EngineError::from_store("verify studio", e))?;
            let now = self.clock.now();
            let v = validate_request(studio, &req, now, self.clock.today(), &self.policy)?;

            let _slot = self.lock_slot(v.studio.id, v.date).await;
            let existing = self
                .repo
                .list_bookings_for_studio_on_date(v.studio.id, v.date)
                .await
                .map_err(|e| EngineError::from_store("check availability", e))?;
            check_no_conflict(&existing, &v.span, None)?;

            let booking = Booking {
                id: Ulid::new(),
                user_id,
                studio_id: v.studio.id,
                booking_date: v.date,
                span: v.span,
                duration_hours: v.quote.duration_hours,
                total_price: v.quote.total_price,
                deposit: v.quote.deposit,
                status: BookingStatus::Pending,
                admin_notes: None,
                cancellation_reason: None,
                cancelled_at: None,
                created_at: now,
                updated_at: now,
                version: 0,
            };
            self.repo
                .create_booking(booking.clone())
                .await
                .map_err(|e| EngineError::from_store("create booking", e))?;

            metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
            tracing::info!(
                "booking {} created: studio {} on {} {} for {}",
                booking.id,
                booking.studio_id,
                booking.booking_date,
                booking.span,
                booking.total_price
            );
            self.notify(Notification::Created { booking: booking.clone() });
            Ok(booking)
        })
        .await
    }

    /// Cancel as the owner (reason required) or as an admin (reason optional).
    pub async fn cancel_booking(
        &self,
        actor: &Actor,
        booking_id: Ulid,
        reason: &str,
    ) -> Result<Booking, EngineError> {
        timed("cancel_booking", async {
            let _guard = self.lock_booking(booking_id).await;
            let booking = self.load_booking(booking_id).await?;
            self.apply_transition(actor, booking, BookingStatus::Cancelled, Some(reason))
                .await
        })
        .await
    }

    /// Admin status change: confirm, mark paid, complete, cancel, or reopen.
    pub async fn update_status(
        &self,
        actor: &Actor,
        booking_id: Ulid,
        to: BookingStatus,
        reason: Option<&str>,
    ) -> Result<Booking, EngineError> {
        timed("update_status", async {
            require_admin(actor, "update booking status")?;
            let _guard = self.lock_booking(booking_id).await;
            let booking = self.load_booking(booking_id).await?;
            self.apply_transition(actor, booking, to, reason).await
        })
        .await
    }

    /// Check `booking → to` against the transition table and persist it.
    /// Caller holds the booking lock.
    async fn apply_transition(
        &self,
        actor: &Actor,
        booking: Booking,
        to: BookingStatus,
        reason: Option<&str>,
    ) -> Result<Booking, EngineError> {
        authorize(&booking, to, actor, &self.policy)?;
        let from = booking.status;
        let now = self.clock.now();

        let (stored, reason) = match to {
            BookingStatus::Cancelled => {
                let reason = self.cancellation_reason(actor, reason)?;
                let stored = self.record_cancellation(booking, reason.clone(), now).await?;
                (stored, Some(reason))
            }
            BookingStatus::Pending => (self.reopen(booking, now).await?, None),
            _ => {
                let mut updated = booking;
                updated.status = to;
                updated.updated_at = now;
                let stored = self
                    .repo
                    .update_booking(updated)
                    .await
                    .map_err(|e| EngineError::from_store("update booking status", e))?;
                (stored, None)
            }
        };

        count_transition(from, to);
        tracing::info!("booking {} moved from {from} to {to} by {actor:?}", stored.id);
        self.notify(transition_notification(stored.clone(), reason));
        Ok(stored)
    }

    fn cancellation_reason(&self, actor: &Actor, reason: Option<&str>) -> Result<String, EngineError> {
        let reason = reason.map(str::trim).unwrap_or_default();
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("cancellation reason too long"));
        }
        if actor.is_admin() {
            return Ok(if reason.is_empty() {
                ADMIN_CANCEL_REASON.to_string()
            } else {
                reason.to_string()
            });
        }
        let min = self.policy.min_cancel_reason_len;
        if reason.chars().count() < min {
            return Err(EngineError::validation(format!(
                "cancellation reason must be at least {min} characters"
            )));
        }
        Ok(reason.to_string())
    }

    async fn record_cancellation(
        &self,
        booking: Booking,
        reason: String,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Booking, EngineError> {
        let refund_amount = refund_for(booking.status, booking.total_price, &self.policy)?;
        // Proofs still awaiting review can never settle a cancelled booking.
        let rejected: Vec<Payment> = self
            .repo
            .list_payments_for_booking(booking.id)
            .await
            .map_err(|e| EngineError::from_store("fetch booking payments", e))?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Pending)
            .map(|mut p| {
                p.status = PaymentStatus::Rejected;
                p.verified_at = Some(now);
                p.rejection_reason = Some("booking was cancelled".to_string());
                p
            })
            .collect();
        let cancellation = Cancellation {
            id: Ulid::new(),
            booking_id: booking.id,
            reason: reason.clone(),
            refund_amount,
            refund_status: RefundStatus::Pending,
            cancelled_at: now,
        };
        let mut updated = booking;
        updated.status = BookingStatus::Cancelled;
        updated.cancellation_reason = Some(reason);
        updated.cancelled_at = Some(now);
        updated.updated_at = now;
        let stored = self
            .repo
            .cancel_booking(updated, cancellation, rejected.clone())
            .await
            .map_err(|e| EngineError::from_store("cancel booking", e))?;
        for p in &rejected {
            tracing::info!("payment {} rejected: booking {} cancelled", p.id, stored.id);
        }
        if refund_amount > 0 {
            tracing::info!("refund of {refund_amount} pending for booking {}", stored.id);
        }
        Ok(stored)
    }

    /// Back to pending, if the slot is still free. A fresh deposit window
    /// starts now and an unpaid refund is voided.
    async fn reopen(&self, booking: Booking, now: chrono::DateTime<chrono::Utc>) -> Result<Booking, EngineError> {
        let _slot = self.lock_slot(booking.studio_id, booking.booking_date).await;
        let existing = self
            .repo
            .list_bookings_for_studio_on_date(booking.studio_id, booking.booking_date)
            .await
            .map_err(|e| EngineError::from_store("check availability", e))?;
        check_no_conflict(&existing, &booking.span, Some(booking.id))?;

        let mut updated = booking;
        if let crate::policy::DepositPolicy::Enabled { window, .. } = self.policy.deposit
            && let Some(terms) = updated.deposit.as_mut() {
                terms.deadline = now + window;
            }
        updated.status = BookingStatus::Pending;
        updated.cancellation_reason = None;
        updated.cancelled_at = None;
        updated.updated_at = now;

        let voided = self
            .repo
            .get_cancellation(updated.id)
            .await
            .map_err(|e| EngineError::from_store("fetch cancellation", e))?
            .filter(|c| c.refund_status == RefundStatus::Pending)
            .map(|mut c| {
                c.refund_status = RefundStatus::Void;
                c
            });
        self.repo
            .reopen_booking(updated, voided)
            .await
            .map_err(|e| EngineError::from_store("reopen booking", e))
    }

    pub async fn add_admin_notes(
        &self,
        actor: &Actor,
        booking_id: Ulid,
        notes: &str,
    ) -> Result<Booking, EngineError> {
        require_admin(actor, "add booking notes")?;
        if notes.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("admin notes too long"));
        }
        let _guard = self.lock_booking(booking_id).await;
        let mut booking = self.load_booking(booking_id).await?;
        booking.admin_notes = (!notes.trim().is_empty()).then(|| notes.trim().to_string());
        booking.updated_at = self.clock.now();
        self.repo
            .update_booking(booking)
            .await
            .map_err(|e| EngineError::from_store("update booking notes", e))
    }

    /// Move every overdue pending booking to expired. Safe to run
    /// concurrently with itself and with user actions: each candidate is
    /// re-read under its lock and skipped unless still overdue.
    pub async fn expire_overdue(&self) -> Result<usize, EngineError> {
        let now = self.clock.now();
        let candidates = self
            .repo
            .list_expired_pending_bookings(now)
            .await
            .map_err(|e| EngineError::from_store("fetch expired bookings", e))?;

        let mut expired = 0;
        for candidate in candidates {
            let _guard = self.lock_booking(candidate.id).await;
            let booking = match self.repo.get_booking(candidate.id).await {
                Ok(Some(b)) if b.deposit_overdue(now) => b,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("expiry skipped booking {}: {e}", candidate.id);
                    continue;
                }
            };
            match self
                .apply_transition(&Actor::System, booking, BookingStatus::Expired, None)
                .await
            {
                Ok(_) => expired += 1,
                Err(e) => tracing::warn!("expiry skipped booking {}: {e}", candidate.id),
            }
        }

        if expired > 0 {
            metrics::counter!(crate::observability::BOOKINGS_EXPIRED_TOTAL).increment(expired as u64);
            tracing::info!("expired {expired} overdue bookings");
        }
        Ok(expired)
    }

    // ── Payments ─────────────────────────────────────────────

    /// Record proof of a deposit or full payment, pending admin verification.
    pub async fn upload_payment_proof(
        &self,
        actor: &Actor,
        booking_id: Ulid,
        proof: PaymentProof,
    ) -> Result<Payment, EngineError> {
        timed("upload_payment_proof", async {
            let proof_url = proof.proof_url.trim();
            if proof_url.is_empty() {
                return Err(EngineError::validation("proof_url is required"));
            }
            if proof_url.len() > MAX_PROOF_URL_LEN {
                return Err(EngineError::LimitExceeded("proof_url too long"));
            }

            let _guard = self.lock_booking(booking_id).await;
            let booking = self.load_booking(booking_id).await?;
            if actor.user_id() != Some(booking.user_id) {
                return Err(EngineError::forbidden(
                    "you can only upload payment for your own bookings",
                ));
            }
            match booking.status {
                BookingStatus::Cancelled => {
                    return Err(EngineError::validation("cannot upload payment for cancelled booking"));
                }
                BookingStatus::Expired => {
                    return Err(EngineError::validation("cannot upload payment for expired booking"));
                }
                BookingStatus::Completed => {
                    return Err(EngineError::validation("booking is already completed"));
                }
                BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::Paid => {}
            }

            let existing = self
                .repo
                .list_payments_for_booking(booking_id)
                .await
                .map_err(|e| EngineError::from_store("check existing payments", e))?;
            let same_type = |status: PaymentStatus| {
                existing
                    .iter()
                    .any(|p| p.payment_type == proof.payment_type && p.status == status)
            };
            if same_type(PaymentStatus::Verified) {
                return Err(EngineError::conflict(format!(
                    "{} payment has already been verified for this booking",
                    proof.payment_type
                )));
            }
            if same_type(PaymentStatus::Pending) {
                return Err(EngineError::conflict(format!(
                    "{} payment is already awaiting verification",
                    proof.payment_type
                )));
            }

            let now = self.clock.now();
            let expected = match (proof.payment_type, &booking.deposit) {
                (PaymentType::Deposit, Some(terms)) => {
                    if now > terms.deadline {
                        return Err(EngineError::validation("deposit payment deadline has passed"));
                    }
                    terms.amount
                }
                (PaymentType::Deposit, None) => {
                    return Err(EngineError::validation("this booking does not take a deposit"));
                }
                (PaymentType::Full, Some(terms)) => {
                    let deposit_verified = existing.iter().any(|p| {
                        p.payment_type == PaymentType::Deposit && p.status == PaymentStatus::Verified
                    });
                    if !deposit_verified {
                        return Err(EngineError::validation(
                            "deposit payment must be verified first before full payment",
                        ));
                    }
                    terms.remaining
                }
                (PaymentType::Full, None) => booking.total_price,
            };
            if proof.amount != expected {
                return Err(EngineError::validation(format!(
                    "payment amount must be exactly {expected}"
                )));
            }

            let payment = Payment {
                id: Ulid::new(),
                booking_id,
                payment_type: proof.payment_type,
                amount: proof.amount,
                proof_url: proof_url.to_string(),
                status: PaymentStatus::Pending,
                verified_by: None,
                verified_at: None,
                rejection_reason: None,
                created_at: now,
            };
            self.repo
                .create_payment(payment.clone())
                .await
                .map_err(|e| EngineError::from_store("upload payment proof", e))?;
            tracing::info!(
                "{} payment {} of {} uploaded for booking {booking_id}",
                payment.payment_type,
                payment.id,
                payment.amount
            );
            Ok(payment)
        })
        .await
    }

    /// Verify or reject a pending payment. Verification advances the booking:
    /// a deposit confirms it; a full payment marks it paid (or confirms it
    /// when the booking carries no deposit).
    pub async fn verify_payment(
        &self,
        actor: &Actor,
        payment_id: Ulid,
        verdict: Verdict,
    ) -> Result<Payment, EngineError> {
        timed("verify_payment", async {
            let admin_id = require_admin(actor, "verify payments")?;
            if let Verdict::Reject { reason } = &verdict
                && reason.trim().is_empty() {
                    return Err(EngineError::validation(
                        "rejection reason is required when rejecting payment",
                    ));
                }

            let booking_id = self.load_payment(payment_id).await?.booking_id;
            let _guard = self.lock_booking(booking_id).await;
            let mut payment = self.load_payment(payment_id).await?;
            if payment.status != PaymentStatus::Pending {
                return Err(EngineError::conflict(format!(
                    "payment is already {}",
                    payment.status
                )));
            }
            let now = self.clock.now();

            let reason = match verdict {
                Verdict::Reject { reason } => reason.trim().to_string(),
                Verdict::Verify => {
                    payment.status = PaymentStatus::Verified;
                    payment.verified_by = Some(admin_id);
                    payment.verified_at = Some(now);
                    return self.settle_verified(actor, payment, now).await;
                }
            };

            payment.status = PaymentStatus::Rejected;
            payment.verified_by = Some(admin_id);
            payment.verified_at = Some(now);
            payment.rejection_reason = Some(reason);
            self.repo
                .settle_payment(payment.clone(), None)
                .await
                .map_err(|e| EngineError::from_store("update payment status", e))?;
            tracing::info!("payment {} rejected", payment.id);
            Ok(payment)
        })
        .await
    }

    /// Persist a verified payment together with the booking move it implies.
    /// Caller holds the booking lock.
    async fn settle_verified(
        &self,
        actor: &Actor,
        payment: Payment,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Payment, EngineError> {
        let booking = self.load_booking(payment.booking_id).await?;
        let target = match payment.payment_type {
            PaymentType::Deposit => BookingStatus::Confirmed,
            PaymentType::Full if booking.deposit.is_some() => BookingStatus::Paid,
            PaymentType::Full => BookingStatus::Confirmed,
        };

        let moved = if booking.status == target {
            None
        } else {
            authorize(&booking, target, actor, &self.policy)?;
            let mut updated = booking.clone();
            updated.status = target;
            updated.updated_at = now;
            Some(updated)
        };

        let stored = self
            .repo
            .settle_payment(payment.clone(), moved)
            .await
            .map_err(|e| EngineError::from_store("update payment status", e))?;
        tracing::info!("payment {} verified", payment.id);

        if let Some(stored) = stored {
            count_transition(booking.status, stored.status);
            tracing::info!(
                "booking {} moved from {} to {} by payment {}",
                stored.id,
                booking.status,
                stored.status,
                payment.id
            );
            self.notify(transition_notification(stored, None));
        }
        Ok(payment)
    }

    /// Admin marks a cancellation's refund as paid out.
    pub async fn mark_refund_processed(
        &self,
        actor: &Actor,
        booking_id: Ulid,
    ) -> Result<Cancellation, EngineError> {
        require_admin(actor, "process refunds")?;
        let _guard = self.lock_booking(booking_id).await;
        let booking = self.load_booking(booking_id).await?;
        if booking.status != BookingStatus::Cancelled {
            return Err(EngineError::conflict(format!(
                "booking is {}, refunds apply only to cancelled bookings",
                booking.status
            )));
        }
        let mut cancellation = self
            .repo
            .get_cancellation(booking_id)
            .await
            .map_err(|e| EngineError::from_store("fetch cancellation", e))?
            .ok_or(EngineError::NotFound {
                entity: "cancellation",
                id: booking_id,
            })?;
        match cancellation.refund_status {
            RefundStatus::Pending => {}
            RefundStatus::Processed => {
                return Err(EngineError::conflict("refund is already processed"));
            }
            RefundStatus::Void => return Err(EngineError::conflict("refund was voided")),
        }
        if cancellation.refund_amount == 0 {
            return Err(EngineError::conflict("no refund is owed for this booking"));
        }
        cancellation.refund_status = RefundStatus::Processed;
        self.repo
            .update_cancellation(cancellation.clone())
            .await
            .map_err(|e| EngineError::from_store("update cancellation", e))?;
        tracing::info!(
            "refund of {} processed for booking {booking_id}",
            cancellation.refund_amount
        );
        Ok(cancellation)
    }

    // ── Studios ──────────────────────────────────────────────

    pub async fn register_studio(&self, actor: &Actor, new: NewStudio) -> Result<Studio, EngineError> {
        require_admin(actor, "register studios")?;
        let name = new.name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("studio name is required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("studio name too long"));
        }
        if new.price_per_hour <= 0 {
            return Err(EngineError::validation("price_per_hour must be positive"));
        }
        let now = self.clock.now();
        let studio = Studio {
            id: Ulid::new(),
            name: name.to_string(),
            description: new.description,
            location: new.location,
            price_per_hour: new.price_per_hour,
            operating_hours: new.operating_hours.trim().to_string(),
            facilities: new.facilities,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        if studio.operating_window().is_none() {
            return Err(EngineError::validation(
                "operating_hours must look like HH:MM-HH:MM",
            ));
        }
        self.repo
            .save_studio(studio.clone())
            .await
            .map_err(|e| EngineError::from_store("create studio", e))?;
        tracing::info!("studio {} registered: {}", studio.id, studio.name);
        Ok(studio)
    }

    /// Inactive studios take no new bookings; existing ones are untouched.
    pub async fn set_studio_active(
        &self,
        actor: &Actor,
        studio_id: Ulid,
        active: bool,
    ) -> Result<Studio, EngineError> {
        require_admin(actor, "update studios")?;
        let mut studio = self.load_studio(studio_id).await?;
        studio.is_active = active;
        studio.updated_at = self.clock.now();
        self.repo
            .save_studio(studio.clone())
            .await
            .map_err(|e| EngineError::from_store("update studio", e))?;
        Ok(studio)
    }
}
