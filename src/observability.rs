use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "parkpredict_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "parkpredict_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "parkpredict_bookings_created_total";
pub const BOOKINGS_CANCELLED_TOTAL: &str = "parkpredict_bookings_cancelled_total";
pub const BOOKING_CONFLICTS_TOTAL: &str = "parkpredict_booking_conflicts_total";

/// Gauge: bookings currently held in the store.
pub const BOOKINGS_ACTIVE: &str = "parkpredict_bookings_active";

pub const OVERSTAYS_SIMULATED_TOTAL: &str = "parkpredict_overstays_simulated_total";

/// Counter: arrivals resolved. Labels: flow.
pub const ARRIVALS_TOTAL: &str = "parkpredict_arrivals_total";

/// Counter: predictor calls. Labels: outcome (ok, error, timeout).
pub const PREDICTOR_CALLS_TOTAL: &str = "parkpredict_predictor_calls_total";

/// Histogram: predictor round trip in seconds, including timeouts.
pub const PREDICTOR_DURATION_SECONDS: &str = "parkpredict_predictor_duration_seconds";

pub const NOTIFICATIONS_SENT_TOTAL: &str = "parkpredict_notifications_sent_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "parkpredict_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "parkpredict_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "parkpredict_connections_rejected_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBooking { .. } => "insert_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectLots { .. } => "select_lots",
        Command::SelectArrival { .. } => "select_arrival",
        Command::SelectSpotStatus { .. } => "select_spot_status",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectHealth => "select_health",
    }
}
