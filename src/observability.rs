use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomdesk_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomdesk_query_duration_seconds";

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings confirmed. Labels: room.
pub const BOOKINGS_CREATED_TOTAL: &str = "roomdesk_bookings_created_total";

/// Counter: create requests refused. Labels: kind.
pub const BOOKINGS_REJECTED_TOTAL: &str = "roomdesk_bookings_rejected_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "roomdesk_bookings_cancelled_total";

/// Counter: cancel requests refused. Labels: kind.
pub const CANCELLATIONS_REJECTED_TOTAL: &str = "roomdesk_cancellations_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomdesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomdesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomdesk_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomdesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomdesk_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomdesk_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectRooms => "select_rooms",
        Command::SelectBookings { id: None } => "select_bookings",
        Command::SelectBookings { id: Some(_) } => "select_booking",
        Command::InsertBooking { .. } => "insert_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectRoomUsage { .. } => "select_room_usage",
    }
}
