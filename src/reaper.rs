use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::store::InMemoryStore;

/// Background task that periodically expires overdue pending bookings.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

/// One sweep. Errors are logged; the next tick retries.
pub async fn sweep_once(engine: &Engine) -> usize {
    let expired = match engine.expire_overdue().await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("expiry sweep failed: {e}");
            0
        }
    };
    let pruned = engine.prune_locks();
    if pruned > 0 {
        tracing::debug!("pruned {pruned} idle locks");
    }
    expired
}

/// Background task that rewrites the journal once it grows past `threshold` appends.
pub async fn run_compactor(store: Arc<InMemoryStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

pub async fn compact_if_needed(store: &InMemoryStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted journal after {appends} appends");
            true
        }
        Err(e) => {
            tracing::error!("journal compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::{BookingRequest, NewStudio};
    use crate::model::*;
    use crate::notify::Outbox;
    use crate::policy::BookingPolicy;
    use crate::store::Repository;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn test_journal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("studiobook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_expires_overdue_bookings() {
        let clock = Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap(),
        ));
        let (outbox, _rx) = Outbox::channel();
        let engine = Engine::new(
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            BookingPolicy::default(),
            outbox,
        );
        let admin = Actor::Admin(Ulid::new());
        let studio = engine
            .register_studio(
                &admin,
                NewStudio {
                    name: "Room 2".into(),
                    description: String::new(),
                    location: "Bitung".into(),
                    price_per_hour: 50_000,
                    operating_hours: "10:00-20:00".into(),
                    facilities: vec![],
                },
            )
            .await
            .unwrap();
        let booking = engine
            .create_booking(
                &Actor::Customer(Ulid::new()),
                BookingRequest {
                    studio_id: studio.id,
                    booking_date: "2026-10-21".into(),
                    start_time: "10:00".into(),
                    end_time: "12:00".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(sweep_once(&engine).await, 0);
        clock.advance(chrono::Duration::hours(25));
        assert_eq!(sweep_once(&engine).await, 1);
        assert_eq!(sweep_once(&engine).await, 0);
        let expired = engine.get_booking(&admin, booking.id).await.unwrap();
        assert_eq!(expired.status, BookingStatus::Expired);
    }

    #[tokio::test]
    async fn compactor_respects_threshold() {
        let path = test_journal_path("compactor.journal");
        let store = InMemoryStore::open(&path).unwrap();
        let now = chrono::Utc::now();
        for i in 0..3 {
            store
                .save_studio(Studio {
                    id: Ulid::new(),
                    name: format!("Studio {i}"),
                    description: String::new(),
                    location: "Tomohon".into(),
                    price_per_hour: 75_000,
                    operating_hours: "08:00-23:00".into(),
                    facilities: vec![],
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();
        }
        assert!(!compact_if_needed(&store, 10).await);
        assert!(compact_if_needed(&store, 3).await);
        assert_eq!(store.appends_since_compact().await, 0);
    }
}
