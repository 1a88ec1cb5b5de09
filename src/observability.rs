use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "availd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "availd_query_duration_seconds";

/// Counter: admin commands. Labels: action, status.
pub const ADMIN_COMMANDS_TOTAL: &str = "availd_admin_commands_total";

/// Histogram: availability resolution latency in seconds, booking read included.
pub const RESOLVE_DURATION_SECONDS: &str = "availd_resolve_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "availd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "availd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "availd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "availd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "availd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "availd_wal_flush_batch_size";

/// Counter: retried store operations. Labels: store.
pub const STORE_RETRIES_TOTAL: &str = "availd_store_retries_total";

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
        Command::InsertBlockedDay { .. } => "insert_blocked_day",
        Command::DeleteBlockedDay { .. } => "delete_blocked_day",
        Command::InsertBlockedTimes { .. } => "insert_blocked_times",
        Command::DeleteBlockedTimes { .. } => "delete_blocked_times",
        Command::InsertRecurringBlock { .. } => "insert_recurring_block",
        Command::DeleteRecurringBlock { .. } => "delete_recurring_block",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBlockedDays { .. } => "select_blocked_days",
        Command::SelectBlockedTimes { .. } => "select_blocked_times",
        Command::SelectRecurringBlocks => "select_recurring_blocks",
        Command::SelectSlots { .. } => "select_slots",
        Command::AdminCommand { .. } => "admin_command",
    }
}
