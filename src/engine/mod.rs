mod availability;
mod conflict;
mod error;
pub mod lifecycle;
mod mutations;
pub mod pricing;
mod queries;
pub mod validate;

pub use availability::{build_availability, free_within, merge_overlapping, subtract_intervals};
pub use conflict::check_no_conflict;
pub use error::EngineError;
pub use mutations::{NewStudio, PaymentProof, Verdict};
pub use pricing::{compute_price, Quote};
pub use validate::BookingRequest;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::clock::Clock;
use crate::notify::{Notification, Outbox};
use crate::policy::BookingPolicy;
use crate::store::Repository;

type LockTable<K> = DashMap<K, Arc<Mutex<()>>>;

/// The booking engine. All reads and writes go through the repository; the
/// engine owns only the locks that serialize conflicting writers.
pub struct Engine {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
    outbox: Outbox,
    /// (studio, date) → lock held across check-then-insert.
    slot_locks: LockTable<(Ulid, NaiveDate)>,
    /// booking id → lock held across read-check-update.
    booking_locks: LockTable<Ulid>,
}

impl Engine {
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
        outbox: Outbox,
    ) -> Self {
        Self {
            repo,
            clock,
            policy,
            outbox,
            slot_locks: DashMap::new(),
            booking_locks: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    /// Serialize everything that decides occupancy of one studio-day.
    async fn lock_slot(&self, studio_id: Ulid, date: NaiveDate) -> OwnedMutexGuard<()> {
        let lock = self
            .slot_locks
            .entry((studio_id, date))
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Serialize status changes of one booking. Always taken before a slot lock.
    async fn lock_booking(&self, booking_id: Ulid) -> OwnedMutexGuard<()> {
        let lock = self
            .booking_locks
            .entry(booking_id)
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Drop lock entries nobody holds or waits on. Called by the sweeper.
    pub fn prune_locks(&self) -> usize {
        let before = self.slot_locks.len() + self.booking_locks.len();
        self.slot_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.booking_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.slot_locks.len() + self.booking_locks.len())
    }

    fn notify(&self, n: Notification) {
        self.outbox.push(n);
    }
}

/// Run `fut` and record its latency under `op`.
async fn timed<T>(
    op: &'static str,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    let started = Instant::now();
    let result = fut.await;
    crate::observability::record_operation(op, result.is_ok(), started);
    result
}
