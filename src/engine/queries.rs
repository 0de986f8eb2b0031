use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::observability::AVAILABILITY_QUERIES_TOTAL;
use crate::time::{days_covered, month_days};

use super::availability::{available_units, busy_spans, resolve_vehicle_type};
use super::calendar::project_fleet;
use super::conflict::validate_query_window;
use super::{Engine, EngineError, SharedFleetState};

impl Engine {
    /// Partitions in id order (creation order for ULIDs).
    fn fleets_in_order(&self) -> Vec<SharedFleetState> {
        let mut entries: Vec<(Ulid, SharedFleetState)> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, s)| s).collect()
    }

    pub async fn get_vehicle_type(&self, id: Ulid) -> Result<VehicleType, EngineError> {
        let shared = self.require_fleet(&id)?;
        let guard = shared.read().await;
        Ok(guard.vehicle_type.clone())
    }

    pub async fn list_vehicle_types(&self, filter: &VehicleTypeFilter) -> Vec<VehicleType> {
        let mut out = Vec::new();
        for shared in self.fleets_in_order() {
            let guard = shared.read().await;
            if filter.matches(&guard.vehicle_type) {
                out.push(guard.vehicle_type.clone());
            }
        }
        out
    }

    /// Every type offering `category`, with its resolved price. Ignores units.
    pub async fn vehicle_types_by_category(&self, category: CategoryKind) -> Vec<PricedVehicleType> {
        let mut out = Vec::new();
        for shared in self.fleets_in_order() {
            let guard = shared.read().await;
            let vt = &guard.vehicle_type;
            if vt.offers(category) {
                out.push(PricedVehicleType {
                    vehicle_type: vt.clone(),
                    price: vt.category_price(category).unwrap_or(0),
                });
            }
        }
        out
    }

    /// Plates of `vehicle_type_id` free for the whole of `query`. Empty is not an error.
    pub async fn list_available_units(
        &self,
        vehicle_type_id: Ulid,
        query: Span,
    ) -> Result<Vec<String>, EngineError> {
        validate_query_window(&query)?;
        metrics::counter!(AVAILABILITY_QUERIES_TOTAL, "scope" => "units").increment(1);
        let shared = self.require_fleet(&vehicle_type_id)?;
        let guard = shared.read().await;
        Ok(available_units(&guard, query))
    }

    /// Types that offer `category` and have at least one free unit for `query`.
    pub async fn list_available_vehicle_types(
        &self,
        category: CategoryKind,
        query: Span,
    ) -> Result<Vec<AvailableVehicleType>, EngineError> {
        validate_query_window(&query)?;
        metrics::counter!(AVAILABILITY_QUERIES_TOTAL, "scope" => "vehicle_types").increment(1);
        let mut out = Vec::new();
        for shared in self.fleets_in_order() {
            let guard = shared.read().await;
            if let Some(summary) = resolve_vehicle_type(&guard, category, query) {
                out.push(summary);
            }
        }
        Ok(out)
    }

    /// Day-by-day status grid for every unit of every type. Read-only.
    pub async fn project_month(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<VehicleTypeCalendar>, EngineError> {
        let days = month_days(year, month)
            .ok_or_else(|| EngineError::Validation(format!("invalid month {year}-{month}")))?;
        let mut out = Vec::new();
        for shared in self.fleets_in_order() {
            let guard = shared.read().await;
            out.push(project_fleet(&guard, &days));
        }
        Ok(out)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let type_id = self
            .get_fleet_for_entity(&id)
            .ok_or_else(|| EngineError::not_found("reservation", id))?;
        let shared = self.require_fleet(&type_id)?;
        let guard = shared.read().await;
        guard
            .reservation(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", id))
    }

    /// Reservations of one category across the fleet, newest first.
    pub async fn list_reservations(&self, category: Option<CategoryKind>) -> Vec<Reservation> {
        let mut out = Vec::new();
        for shared in self.fleets_in_order() {
            let guard = shared.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| category.is_none_or(|c| r.category == c))
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    /// Every calendar day touched by any reservation of the type, ascending.
    pub async fn unavailable_dates(&self, vehicle_type_id: Ulid) -> Result<Vec<NaiveDate>, EngineError> {
        let shared = self.require_fleet(&vehicle_type_id)?;
        let guard = shared.read().await;
        let days: BTreeSet<NaiveDate> = guard
            .reservations
            .iter()
            .flat_map(|r| days_covered(&r.span))
            .collect();
        Ok(days.into_iter().collect())
    }

    pub async fn list_unavailability(
        &self,
        vehicle_type_id: Ulid,
    ) -> Result<Vec<UnavailabilityRecord>, EngineError> {
        let shared = self.require_fleet(&vehicle_type_id)?;
        let guard = shared.read().await;
        Ok(guard.unavailability.clone())
    }

    /// Merged busy spans of one unit within `query`.
    pub async fn unit_busy_spans(
        &self,
        vehicle_type_id: Ulid,
        plate: &str,
        query: Span,
    ) -> Result<Vec<Span>, EngineError> {
        validate_query_window(&query)?;
        let shared = self.require_fleet(&vehicle_type_id)?;
        let guard = shared.read().await;
        let unit = guard
            .vehicle_type
            .unit(plate)
            .ok_or_else(|| EngineError::not_found("plate", plate))?;
        Ok(busy_spans(&guard, unit, query))
    }
}
