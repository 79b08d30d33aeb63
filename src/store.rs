use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::journal::Journal;
use crate::model::*;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: Ulid },
    #[error("stale write to booking {id}: expected version {expected}, stored {stored}")]
    VersionMismatch { id: Ulid, expected: u64, stored: u64 },
    #[error("journal error: {0}")]
    Journal(#[from] std::io::Error),
}

/// Storage collaborator consumed by the engine.
///
/// `update_booking`, `cancel_booking` and `settle_payment` are compare-and-set
/// on `Booking::version`: they fail with `VersionMismatch` if the stored
/// booking changed since it was read, and return the stored copy with the
/// version bumped.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_studio(&self, id: Ulid) -> Result<Option<Studio>, StoreError>;
    async fn save_studio(&self, studio: Studio) -> Result<(), StoreError>;
    async fn list_studios(&self) -> Result<Vec<Studio>, StoreError>;

    async fn create_booking(&self, booking: Booking) -> Result<(), StoreError>;
    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError>;
    /// Bookings still holding their slot (not cancelled/expired), ordered by start time.
    async fn list_bookings_for_studio_on_date(
        &self,
        studio_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, StoreError>;
    async fn update_booking(&self, booking: Booking) -> Result<Booking, StoreError>;
    /// Pending bookings whose deposit deadline is at or before `now`.
    async fn list_expired_pending_bookings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError>;
    /// Newest first.
    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError>;

    /// Update the booking and record its cancellation together. Fails with
    /// `AlreadyExists` while the stored booking is cancelled; a reopened
    /// booking's cancellation is replaced by the next one.
    /// Cancel `booking`, record its cancellation and persist the verdicts on
    /// its still-pending payments, in one commit.
    async fn cancel_booking(
        &self,
        booking: Booking,
        cancellation: Cancellation,
        rejected: Vec<Payment>,
    ) -> Result<Booking, StoreError>;
    /// Move a cancelled or expired booking back to pending, voiding its
    /// unpaid refund if there is one, in one commit.
    async fn reopen_booking(
        &self,
        booking: Booking,
        voided: Option<Cancellation>,
    ) -> Result<Booking, StoreError>;
    async fn get_cancellation(&self, booking_id: Ulid) -> Result<Option<Cancellation>, StoreError>;
    async fn update_cancellation(&self, cancellation: Cancellation) -> Result<(), StoreError>;

    async fn create_payment(&self, payment: Payment) -> Result<(), StoreError>;
    async fn get_payment(&self, id: Ulid) -> Result<Option<Payment>, StoreError>;
    /// Oldest first; `None` lists every payment.
    async fn list_payments(&self, status: Option<PaymentStatus>) -> Result<Vec<Payment>, StoreError>;
    /// Oldest first.
    async fn list_payments_for_booking(&self, booking_id: Ulid) -> Result<Vec<Payment>, StoreError>;
    /// Record a payment verdict, optionally together with the booking it moves.
    async fn settle_payment(
        &self,
        payment: Payment,
        booking: Option<Booking>,
    ) -> Result<Option<Booking>, StoreError>;
}

/// DashMap-backed repository. With a journal attached, every mutation is
/// durably appended before it becomes visible, and `open` replays it.
pub struct InMemoryStore {
    studios: DashMap<Ulid, Studio>,
    bookings: DashMap<Ulid, Booking>,
    /// (studio, date) → booking ids, including cancelled ones.
    slot_index: DashMap<(Ulid, NaiveDate), Vec<Ulid>>,
    payments: DashMap<Ulid, Payment>,
    payments_by_booking: DashMap<Ulid, Vec<Ulid>>,
    /// Keyed by booking id.
    cancellations: DashMap<Ulid, Cancellation>,
    /// Serializes writers; holds the journal when durable.
    writer: Mutex<Option<Journal>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            studios: DashMap::new(),
            bookings: DashMap::new(),
            slot_index: DashMap::new(),
            payments: DashMap::new(),
            payments_by_booking: DashMap::new(),
            cancellations: DashMap::new(),
            writer: Mutex::new(None),
        }
    }

    /// Open a journal-backed store, replaying whatever the journal holds.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let events = Journal::replay(path)?;
        let journal = Journal::open(path)?;
        let mut store = Self::new();
        for event in &events {
            store.apply_event(event);
        }
        tracing::info!(
            "replayed {} journal records from {} ({} bookings)",
            events.len(),
            path.display(),
            store.bookings.len()
        );
        store.writer = Mutex::new(Some(journal));
        Ok(store)
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.writer
            .lock()
            .await
            .as_ref()
            .map_or(0, Journal::appends_since_rewrite)
    }

    /// Rewrite the journal as one record per live entity. No-op without a journal.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().await;
        let Some(journal) = writer.as_mut() else {
            return Ok(());
        };
        let mut snapshot: Vec<Event> = Vec::new();
        snapshot.extend(self.studios.iter().map(|e| Event::StudioSaved(e.value().clone())));
        snapshot.extend(self.bookings.iter().map(|e| Event::BookingCreated(e.value().clone())));
        snapshot.extend(self.payments.iter().map(|e| Event::PaymentCreated(e.value().clone())));
        snapshot.extend(
            self.cancellations
                .iter()
                .map(|e| Event::CancellationCreated(e.value().clone())),
        );
        journal.rewrite(&snapshot)?;
        tracing::info!("compacted journal {} to {} records", journal.path().display(), snapshot.len());
        Ok(())
    }

    /// Journal (if any), then apply. Caller holds the writer lock.
    fn commit(&self, journal: &mut Option<Journal>, events: &[Event]) -> Result<(), StoreError> {
        if let Some(journal) = journal.as_mut() {
            let start = std::time::Instant::now();
            journal.append_batch(events)?;
            metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
                .record(start.elapsed().as_secs_f64());
        }
        for event in events {
            self.apply_event(event);
        }
        Ok(())
    }

    fn apply_event(&self, event: &Event) {
        match event {
            Event::StudioSaved(studio) => {
                self.studios.insert(studio.id, studio.clone());
            }
            Event::BookingCreated(booking) => {
                let mut ids = self
                    .slot_index
                    .entry((booking.studio_id, booking.booking_date))
                    .or_default();
                if !ids.contains(&booking.id) {
                    ids.push(booking.id);
                }
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingUpdated(booking) => {
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::PaymentCreated(payment) => {
                let mut ids = self.payments_by_booking.entry(payment.booking_id).or_default();
                if !ids.contains(&payment.id) {
                    ids.push(payment.id);
                }
                self.payments.insert(payment.id, payment.clone());
            }
            Event::PaymentUpdated(payment) => {
                self.payments.insert(payment.id, payment.clone());
            }
            Event::CancellationCreated(c) | Event::CancellationUpdated(c) => {
                self.cancellations.insert(c.booking_id, c.clone());
            }
        }
    }

    /// Compare-and-set check; returns the booking with its next version.
    fn next_version(&self, mut booking: Booking) -> Result<Booking, StoreError> {
        let stored = self
            .bookings
            .get(&booking.id)
            .map(|b| b.version)
            .ok_or(StoreError::NotFound { entity: "booking", id: booking.id })?;
        if stored != booking.version {
            return Err(StoreError::VersionMismatch {
                id: booking.id,
                expected: booking.version,
                stored,
            });
        }
        booking.version += 1;
        Ok(booking)
    }
}

#[async_trait]
impl Repository for InMemoryStore {
    async fn find_studio(&self, id: Ulid) -> Result<Option<Studio>, StoreError> {
        Ok(self.studios.get(&id).map(|e| e.value().clone()))
    }

    async fn save_studio(&self, studio: Studio) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().await;
        self.commit(&mut writer, &[Event::StudioSaved(studio)])
    }

    async fn list_studios(&self) -> Result<Vec<Studio>, StoreError> {
        let mut studios: Vec<Studio> = self.studios.iter().map(|e| e.value().clone()).collect();
        studios.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(studios)
    }

    async fn create_booking(&self, booking: Booking) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().await;
        if self.bookings.contains_key(&booking.id) {
            return Err(StoreError::AlreadyExists { entity: "booking", id: booking.id });
        }
        self.commit(&mut writer, &[Event::BookingCreated(booking)])
    }

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&id).map(|e| e.value().clone()))
    }

    async fn list_bookings_for_studio_on_date(
        &self,
        studio_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, StoreError> {
        let ids = self
            .slot_index
            .get(&(studio_id, date))
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut bookings: Vec<Booking> = ids
            .iter()
            .filter_map(|id| self.bookings.get(id).map(|e| e.value().clone()))
            .filter(|b| b.status.holds_slot())
            .collect();
        bookings.sort_by_key(|b| b.span.start);
        Ok(bookings)
    }

    async fn update_booking(&self, booking: Booking) -> Result<Booking, StoreError> {
        let mut writer = self.writer.lock().await;
        let booking = self.next_version(booking)?;
        self.commit(&mut writer, &[Event::BookingUpdated(booking.clone())])?;
        Ok(booking)
    }

    async fn list_expired_pending_bookings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .bookings
            .iter()
            .filter(|e| e.value().deposit_overdue(now))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(bookings)
    }

    async fn cancel_booking(
        &self,
        booking: Booking,
        cancellation: Cancellation,
        rejected: Vec<Payment>,
    ) -> Result<Booking, StoreError> {
        let mut writer = self.writer.lock().await;
        let already_cancelled = self
            .bookings
            .get(&booking.id)
            .is_some_and(|b| b.status == BookingStatus::Cancelled);
        if already_cancelled {
            return Err(StoreError::AlreadyExists { entity: "cancellation", id: booking.id });
        }
        if let Some(p) = rejected.iter().find(|p| !self.payments.contains_key(&p.id)) {
            return Err(StoreError::NotFound { entity: "payment", id: p.id });
        }
        let booking = self.next_version(booking)?;
        let mut events = vec![
            Event::BookingUpdated(booking.clone()),
            Event::CancellationCreated(cancellation),
        ];
        events.extend(rejected.into_iter().map(Event::PaymentUpdated));
        self.commit(&mut writer, &events)?;
        Ok(booking)
    }

    async fn reopen_booking(
        &self,
        booking: Booking,
        voided: Option<Cancellation>,
    ) -> Result<Booking, StoreError> {
        let mut writer = self.writer.lock().await;
        if let Some(c) = &voided
            && !self.cancellations.contains_key(&c.booking_id)
        {
            return Err(StoreError::NotFound { entity: "cancellation", id: c.booking_id });
        }
        let booking = self.next_version(booking)?;
        let mut events = vec![Event::BookingUpdated(booking.clone())];
        events.extend(voided.map(Event::CancellationUpdated));
        self.commit(&mut writer, &events)?;
        Ok(booking)
    }

    async fn get_cancellation(&self, booking_id: Ulid) -> Result<Option<Cancellation>, StoreError> {
        Ok(self.cancellations.get(&booking_id).map(|e| e.value().clone()))
    }

    async fn update_cancellation(&self, cancellation: Cancellation) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().await;
        if !self.cancellations.contains_key(&cancellation.booking_id) {
            return Err(StoreError::NotFound {
                entity: "cancellation",
                id: cancellation.booking_id,
            });
        }
        self.commit(&mut writer, &[Event::CancellationUpdated(cancellation)])
    }

    async fn create_payment(&self, payment: Payment) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().await;
        if self.payments.contains_key(&payment.id) {
            return Err(StoreError::AlreadyExists { entity: "payment", id: payment.id });
        }
        self.commit(&mut writer, &[Event::PaymentCreated(payment)])
    }

    async fn get_payment(&self, id: Ulid) -> Result<Option<Payment>, StoreError> {
        Ok(self.payments.get(&id).map(|e| e.value().clone()))
    }

    async fn list_payments(&self, status: Option<PaymentStatus>) -> Result<Vec<Payment>, StoreError> {
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|e| status.is_none_or(|s| e.value().status == s))
            .map(|e| e.value().clone())
            .collect();
        payments.sort_by_key(|p| (p.created_at, p.id));
        Ok(payments)
    }

    async fn list_payments_for_booking(&self, booking_id: Ulid) -> Result<Vec<Payment>, StoreError> {
        let ids = self
            .payments_by_booking
            .get(&booking_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut payments: Vec<Payment> = ids
            .iter()
            .filter_map(|id| self.payments.get(id).map(|e| e.value().clone()))
            .collect();
        payments.sort_by_key(|p| (p.created_at, p.id));
        Ok(payments)
    }

    async fn settle_payment(
        &self,
        payment: Payment,
        booking: Option<Booking>,
    ) -> Result<Option<Booking>, StoreError> {
        let mut writer = self.writer.lock().await;
        if !self.payments.contains_key(&payment.id) {
            return Err(StoreError::NotFound { entity: "payment", id: payment.id });
        }
        let booking = booking.map(|b| self.next_version(b)).transpose()?;
        let mut events = vec![Event::PaymentUpdated(payment)];
        if let Some(b) = &booking {
            events.push(Event::BookingUpdated(b.clone()));
        }
        self.commit(&mut writer, &events)?;
        Ok(booking)
    }
}
