use crate::model::*;

use super::availability::{BusySource, busy_intervals, merge_overlapping};

/// Reserved beats unavailable beats available.
pub fn day_status(fleet: &FleetState, unit: &Unit, day: Span) -> DayStatus {
    let mut status = DayStatus::Available;
    for busy in busy_intervals(fleet, unit, day) {
        match busy.source {
            BusySource::Reservation(_) => return DayStatus::Reserved,
            BusySource::Unavailability(_) | BusySource::Blackout(_) => {
                status = DayStatus::Unavailable;
            }
        }
    }
    status
}

/// Reservations and unavailable periods of `unit` overlapping `window`.
/// The system blackout an assignment leaves behind is reported through its
/// reservation only.
fn unit_periods(fleet: &FleetState, unit: &Unit, window: Span) -> (Vec<ReservedPeriod>, Vec<Span>) {
    let mut reservations = Vec::new();
    let mut system = Vec::new();
    let mut other = Vec::new();
    for busy in busy_intervals(fleet, unit, window) {
        match busy.source {
            BusySource::Reservation(reservation_id) => reservations.push(ReservedPeriod {
                reservation_id,
                span: busy.span,
            }),
            BusySource::Blackout(BlackoutSource::System) => system.push(busy.span),
            BusySource::Unavailability(_) | BusySource::Blackout(BlackoutSource::Manual) => {
                other.push(busy.span);
            }
        }
    }
    // Left over from an assignment whose reservation is gone: still blocks the unit.
    other.extend(
        system
            .into_iter()
            .filter(|s| !reservations.iter().any(|r| r.span == *s)),
    );
    reservations.sort_by_key(|r| (r.span.start, r.reservation_id));
    other.sort_by_key(|s| (s.start, s.end));
    (reservations, merge_overlapping(&other))
}

/// One row per unit, one column per entry of `days`. Soft-removed units are
/// listed too; the grid reports dates, not fleet membership.
pub fn project_fleet(fleet: &FleetState, days: &[Span]) -> VehicleTypeCalendar {
    let vt = &fleet.vehicle_type;
    let window = match (days.first(), days.last()) {
        (Some(first), Some(last)) => Some(Span::new(first.start, last.end)),
        _ => None,
    };
    let units = vt
        .units
        .iter()
        .map(|unit| {
            let (reservations, unavailable) = window
                .map(|w| unit_periods(fleet, unit, w))
                .unwrap_or_default();
            UnitCalendar {
                plate: unit.plate.clone(),
                days: days.iter().map(|d| day_status(fleet, unit, *d)).collect(),
                reservations,
                unavailable,
            }
        })
        .collect();
    VehicleTypeCalendar {
        vehicle_type_id: vt.id,
        title: vt.profile.title.clone(),
        units,
    }
}
