//! Booking notifications. Committed mutations push onto an [`Outbox`]; a
//! dispatcher task drains it into a [`Notifier`] so delivery never blocks or
//! fails a booking operation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::model::Booking;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Created { booking: Booking },
    Confirmed { booking: Booking },
    Paid { booking: Booking },
    Completed { booking: Booking },
    Cancelled { booking: Booking, reason: String },
    Expired { booking: Booking },
    Reopened { booking: Booking },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Created { .. } => "created",
            Notification::Confirmed { .. } => "confirmed",
            Notification::Paid { .. } => "paid",
            Notification::Completed { .. } => "completed",
            Notification::Cancelled { .. } => "cancelled",
            Notification::Expired { .. } => "expired",
            Notification::Reopened { .. } => "reopened",
        }
    }

    pub fn booking(&self) -> &Booking {
        match self {
            Notification::Created { booking }
            | Notification::Confirmed { booking }
            | Notification::Paid { booking }
            | Notification::Completed { booking }
            | Notification::Cancelled { booking, .. }
            | Notification::Expired { booking }
            | Notification::Reopened { booking } => booking,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivery collaborator (email, chat, push). Implementations may be slow or
/// fail; the dispatcher absorbs both.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_booking_created(&self, booking: &Booking) -> Result<(), NotifyError>;
    async fn notify_booking_confirmed(&self, booking: &Booking) -> Result<(), NotifyError>;
    async fn notify_booking_cancelled(&self, booking: &Booking, reason: &str) -> Result<(), NotifyError>;

    async fn notify_booking_expired(&self, _booking: &Booking) -> Result<(), NotifyError> {
        Ok(())
    }

    /// Paid, completed and reopened bookings. Silent unless overridden.
    async fn notify_status_changed(&self, _booking: &Booking) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Route one notification to the matching notifier method.
pub async fn deliver(notifier: &dyn Notifier, n: &Notification) -> Result<(), NotifyError> {
    match n {
        Notification::Created { booking } => notifier.notify_booking_created(booking).await,
        Notification::Confirmed { booking } => notifier.notify_booking_confirmed(booking).await,
        Notification::Cancelled { booking, reason } => {
            notifier.notify_booking_cancelled(booking, reason).await
        }
        Notification::Expired { booking } => notifier.notify_booking_expired(booking).await,
        Notification::Paid { booking }
        | Notification::Completed { booking }
        | Notification::Reopened { booking } => notifier.notify_status_changed(booking).await,
    }
}

/// Sending half of the notification queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue. If the dispatcher is gone the notification is dropped and logged.
    pub fn push(&self, n: Notification) {
        if let Err(mpsc::error::SendError(n)) = self.tx.send(n) {
            tracing::warn!(
                "dispatcher stopped, dropping {} notification for booking {}",
                n.kind(),
                n.booking().id
            );
        }
    }
}

/// Drain the outbox until every sender is dropped.
pub async fn run_dispatcher(mut rx: mpsc::UnboundedReceiver<Notification>, notifier: Arc<dyn Notifier>) {
    while let Some(n) = rx.recv().await {
        let kind = n.kind();
        match deliver(notifier.as_ref(), &n).await {
            Ok(()) => {
                metrics::counter!(crate::observability::NOTIFICATIONS_SENT_TOTAL, "kind" => kind)
                    .increment(1);
            }
            Err(e) => {
                metrics::counter!(crate::observability::NOTIFICATIONS_FAILED_TOTAL, "kind" => kind)
                    .increment(1);
                tracing::warn!("{kind} notification for booking {} failed: {e}", n.booking().id);
            }
        }
    }
    tracing::debug!("notification dispatcher stopped");
}

/// Writes each notification to the log as JSON. The daemon's default notifier.
pub struct LogNotifier;

impl LogNotifier {
    fn emit(&self, n: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(n).map_err(|e| NotifyError(e.to_string()))?;
        tracing::info!(target: "studiobook::notify", "{payload}");
        Ok(())
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_booking_created(&self, booking: &Booking) -> Result<(), NotifyError> {
        self.emit(&Notification::Created { booking: booking.clone() })
    }

    async fn notify_booking_confirmed(&self, booking: &Booking) -> Result<(), NotifyError> {
        self.emit(&Notification::Confirmed { booking: booking.clone() })
    }

    async fn notify_booking_cancelled(&self, booking: &Booking, reason: &str) -> Result<(), NotifyError> {
        self.emit(&Notification::Cancelled {
            booking: booking.clone(),
            reason: reason.to_string(),
        })
    }

    async fn notify_booking_expired(&self, booking: &Booking) -> Result<(), NotifyError> {
        self.emit(&Notification::Expired { booking: booking.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::{NaiveDate, NaiveTime, Utc};
    use std::sync::Mutex;
    use ulid::Ulid;

    fn booking() -> Booking {
        let now = Utc::now();
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            studio_id: Ulid::new(),
            booking_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            span: Span::new(
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            ),
            duration_hours: 2,
            total_price: 200_000,
            deposit: None,
            status: BookingStatus::Pending,
            admin_notes: None,
            cancellation_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Records calls; fails every cancellation.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify_booking_created(&self, b: &Booking) -> Result<(), NotifyError> {
            self.calls.lock().unwrap().push(format!("created {}", b.id));
            Ok(())
        }
        async fn notify_booking_confirmed(&self, b: &Booking) -> Result<(), NotifyError> {
            self.calls.lock().unwrap().push(format!("confirmed {}", b.id));
            Ok(())
        }
        async fn notify_booking_cancelled(&self, _b: &Booking, reason: &str) -> Result<(), NotifyError> {
            self.calls.lock().unwrap().push(format!("cancelled {reason}"));
            Err(NotifyError("smtp down".into()))
        }
    }

    #[tokio::test]
    async fn dispatcher_delivers_in_order_and_survives_failures() {
        let (outbox, rx) = Outbox::channel();
        let recorder = Arc::new(Recorder::default());
        let task = tokio::spawn(run_dispatcher(rx, recorder.clone()));

        let b = booking();
        outbox.push(Notification::Created { booking: b.clone() });
        outbox.push(Notification::Cancelled { booking: b.clone(), reason: "rain".into() });
        outbox.push(Notification::Confirmed { booking: b.clone() });
        outbox.push(Notification::Expired { booking: b.clone() });
        drop(outbox);
        task.await.unwrap();

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                format!("created {}", b.id),
                "cancelled rain".to_string(),
                format!("confirmed {}", b.id),
            ]
        );
    }

    #[tokio::test]
    async fn push_after_dispatcher_stops_is_dropped() {
        let (outbox, rx) = Outbox::channel();
        drop(rx);
        outbox.push(Notification::Created { booking: booking() });
    }

    #[test]
    fn payload_is_tagged_json() {
        let n = Notification::Cancelled { booking: booking(), reason: "sick".into() };
        let v: serde_json::Value = serde_json::to_value(&n).unwrap();
        assert_eq!(v["kind"], "cancelled");
        assert_eq!(v["reason"], "sick");
        assert_eq!(v["booking"]["status"], "pending");
    }

    #[tokio::test]
    async fn log_notifier_accepts_everything() {
        let b = booking();
        let n = LogNotifier;
        for note in [
            Notification::Created { booking: b.clone() },
            Notification::Paid { booking: b.clone() },
            Notification::Cancelled { booking: b.clone(), reason: "x".into() },
        ] {
            deliver(&n, &note).await.unwrap();
        }
    }
}
