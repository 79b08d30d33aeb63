use std::net::SocketAddr;

// ── RED metrics (operation-driven) ──────────────────────────────

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "studiobook_bookings_created_total";

/// Counter: create/reopen attempts rejected because the slot was taken.
pub const SLOT_CONFLICTS_TOTAL: &str = "studiobook_slot_conflicts_total";

/// Counter: committed status transitions. Labels: from, to.
pub const TRANSITIONS_TOTAL: &str = "studiobook_transitions_total";

/// Counter: bookings moved to expired by the sweep.
pub const BOOKINGS_EXPIRED_TOTAL: &str = "studiobook_bookings_expired_total";

/// Histogram: engine operation latency in seconds. Labels: op, status.
pub const OPERATION_DURATION_SECONDS: &str = "studiobook_operation_duration_seconds";

// ── Collaborator health ─────────────────────────────────────────

/// Counter: notifications delivered. Labels: kind.
pub const NOTIFICATIONS_SENT_TOTAL: &str = "studiobook_notifications_sent_total";

/// Counter: notification delivery failures. Labels: kind.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "studiobook_notifications_failed_total";

/// Counter: repository failures surfaced as infrastructure errors. Labels: op.
pub const STORAGE_ERRORS_TOTAL: &str = "studiobook_storage_errors_total";

/// Histogram: journal append+fsync duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "studiobook_journal_flush_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Record the latency of one engine operation.
pub fn record_operation(op: &'static str, ok: bool, started: std::time::Instant) {
    let status = if ok { "ok" } else { "error" };
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op, "status" => status)
        .record(started.elapsed().as_secs_f64());
}
