use std::net::SocketAddr;

use crate::engine::EngineError;
use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "fleetbook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "fleetbook_query_duration_seconds";

/// Counter: assignment attempts. Labels: outcome.
pub const ASSIGNMENTS_TOTAL: &str = "fleetbook_assignments_total";

/// Counter: availability lookups. Labels: scope.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "fleetbook_availability_queries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "fleetbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "fleetbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "fleetbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetbook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
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
        Command::InsertVehicleType { .. } => "insert_vehicle_type",
        Command::UpdateVehicleProfile { .. } => "update_vehicle_profile",
        Command::ToggleVehicleType { .. } => "toggle_vehicle_type",
        Command::DeleteVehicleType { .. } => "delete_vehicle_type",
        Command::SelectVehicleTypes { .. } => "select_vehicle_types",
        Command::SelectVehicleTypesByCategory { .. } => "select_vehicle_types_by_category",
        Command::UpsertCategory { .. } => "upsert_category",
        Command::SetCategoryAvailability { .. } => "set_category_availability",
        Command::InsertUnit { .. } => "insert_unit",
        Command::SetUnitAvailability { .. } => "set_unit_availability",
        Command::DeleteUnit { .. } => "delete_unit",
        Command::InsertBlackout { .. } => "insert_blackout",
        Command::InsertUnavailability { .. } => "insert_unavailability",
        Command::DeleteUnavailability { .. } => "delete_unavailability",
        Command::SelectUnavailability { .. } => "select_unavailability",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::InsertAssignment { .. } => "insert_assignment",
        Command::InsertPaymentEvent { .. } => "insert_payment_event",
        Command::SelectAvailableUnits { .. } => "select_available_units",
        Command::SelectAvailableVehicleTypes { .. } => "select_available_vehicle_types",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectUnavailableDates { .. } => "select_unavailable_dates",
        Command::SelectCalendarPeriods { .. } => "select_calendar_periods",
        Command::InsertRating { .. } => "insert_rating",
        Command::SelectRatings { .. } => "select_ratings",
    }
}

/// Outcome label for a failed assignment.
pub fn assignment_outcome(err: &EngineError) -> &'static str {
    match err {
        EngineError::Unavailable(_) | EngineError::NoFreeUnit(_) => "unavailable",
        EngineError::AlreadyAssigned { .. } | EngineError::Conflict(_) => "conflict",
        EngineError::NotFound(_) => "not_found",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn assignment_outcomes() {
        assert_eq!(assignment_outcome(&EngineError::NoFreeUnit(Ulid::nil())), "unavailable");
        assert_eq!(
            assignment_outcome(&EngineError::AlreadyAssigned {
                reservation_id: Ulid::nil(),
                plate: "123TUN456".into(),
            }),
            "conflict"
        );
        assert_eq!(assignment_outcome(&EngineError::not_found("plate", "x")), "not_found");
        assert_eq!(assignment_outcome(&EngineError::WalError("disk".into())), "error");
    }

    #[test]
    fn no_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
