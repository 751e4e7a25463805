use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reserve attempts. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "slotguard_reservations_total";

/// Counter: confirm calls that moved a booking to confirmed. Labels: projected.
pub const CONFIRMATIONS_TOTAL: &str = "slotguard_confirmations_total";

/// Counter: cancel calls that moved a booking to cancelled.
pub const CANCELLATIONS_TOTAL: &str = "slotguard_cancellations_total";

/// Histogram: operator command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "slotguard_command_duration_seconds";

/// Counter: inbound notifications dropped as repeats.
pub const DEDUP_HITS_TOTAL: &str = "slotguard_dedup_hits_total";

// ── External calendar ───────────────────────────────────────────

/// Counter: availability checks that fell back to local rows only.
pub const CALENDAR_READ_FAILURES_TOTAL: &str = "slotguard_calendar_read_failures_total";

/// Counter: failed projections or removals. Labels: op.
pub const SYNC_FAILURES_TOTAL: &str = "slotguard_sync_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: lapsed holds rewritten to cancelled by the sweeper.
pub const HOLDS_SWEPT_TOTAL: &str = "slotguard_holds_swept_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotguard_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotguard_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Label for a reserve result.
pub fn reserve_outcome<T>(result: &Result<T, crate::error::BookingError>) -> &'static str {
    match result {
        Ok(_) => "reserved",
        Err(e) if e.is_slot_taken() => "unavailable",
        Err(_) => "rejected",
    }
}
