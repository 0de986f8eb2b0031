use ulid::Ulid;

use crate::model::*;

// ── Busy intervals ───────────────────────────────────────────────

/// Where a busy interval came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusySource {
    /// A reservation assigned to the unit.
    Reservation(Ulid),
    /// A standalone unavailability record.
    Unavailability(Ulid),
    /// An embedded blackout on the unit.
    Blackout(BlackoutSource),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyInterval {
    pub span: Span,
    pub source: BusySource,
}

/// Every interval during which `plate` of this fleet is busy and that
/// overlaps `query`, drawn from all three backing providers:
/// assigned reservations, unavailability records, embedded blackouts.
pub fn busy_intervals<'a>(
    fleet: &'a FleetState,
    unit: &'a Unit,
    query: Span,
) -> impl Iterator<Item = BusyInterval> + 'a {
    let type_id = fleet.id();

    let reservations = fleet
        .reservations
        .iter()
        .filter(move |r| r.is_assigned_to(type_id, &unit.plate) && r.span.overlaps(&query))
        .map(|r| BusyInterval {
            span: r.span,
            source: BusySource::Reservation(r.id),
        });

    let records = fleet
        .unavailability
        .iter()
        .filter(move |u| u.plate == unit.plate && u.span.overlaps(&query))
        .map(|u| BusyInterval {
            span: u.span,
            source: BusySource::Unavailability(u.id),
        });

    let blackouts = unit.overlapping(query).map(|b| BusyInterval {
        span: b.span,
        source: BusySource::Blackout(b.source),
    });

    reservations.chain(records).chain(blackouts)
}

/// True iff any of the three sources overlaps `query`.
pub fn is_busy(fleet: &FleetState, unit: &Unit, query: Span) -> bool {
    busy_intervals(fleet, unit, query).next().is_some()
}

/// Busy intervals of one unit inside `query`, sorted and merged.
pub fn busy_spans(fleet: &FleetState, unit: &Unit, query: Span) -> Vec<Span> {
    let mut spans: Vec<Span> = busy_intervals(fleet, unit, query).map(|b| b.span).collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Merge sorted overlapping intervals. Closed spans that only touch at an
/// instant share that instant and merge too.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

// ── Resolution ───────────────────────────────────────────────────

/// Plates of in-fleet units with no busy interval overlapping `query`, in fleet order.
pub fn available_units(fleet: &FleetState, query: Span) -> Vec<String> {
    fleet
        .vehicle_type
        .units
        .iter()
        .filter(|u| u.available && !is_busy(fleet, u, query))
        .map(|u| u.plate.clone())
        .collect()
}

/// Deterministic pick for auto-assignment: first free unit in fleet order.
pub fn first_free_unit(fleet: &FleetState, query: Span) -> Option<&Unit> {
    fleet
        .vehicle_type
        .units
        .iter()
        .find(|u| u.available && !is_busy(fleet, u, query))
}

/// Summary for one vehicle type, or None when it does not offer `category`
/// or has no free unit.
pub fn resolve_vehicle_type(
    fleet: &FleetState,
    category: CategoryKind,
    query: Span,
) -> Option<AvailableVehicleType> {
    let vt = &fleet.vehicle_type;
    if !vt.offers(category) {
        return None;
    }
    let plates = available_units(fleet, query);
    if plates.is_empty() {
        return None;
    }
    Some(AvailableVehicleType {
        vehicle_type_id: vt.id,
        title: vt.profile.title.clone(),
        category,
        price: vt.category_price(category).unwrap_or(0),
        plates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_instant;

    fn day(s: &str) -> Ms {
        parse_instant(s).unwrap()
    }

    fn span(a: &str, b: &str) -> Span {
        Span::new(day(a), day(b))
    }

    fn fleet(plates: &[&str]) -> FleetState {
        FleetState::new(VehicleType {
            id: Ulid::new(),
            profile: VehicleProfile {
                title: "Peugeot 208".into(),
                ..Default::default()
            },
            available: true,
            legacy: None,
            categories: vec![RentalCategory {
                kind: CategoryKind::ShortTerm,
                price: 90_000,
                available: true,
            }],
            units: plates.iter().map(|p| Unit::new(p.to_string(), true)).collect(),
            ratings: Vec::new(),
            created_at: 0,
        })
    }

    fn assigned_reservation(fleet: &FleetState, plate: &str, span: Span) -> Reservation {
        Reservation {
            id: Ulid::new(),
            vehicle_type_id: fleet.id(),
            customer: Customer::default(),
            category: CategoryKind::ShortTerm,
            span,
            total_price: 0,
            pickup_location: String::new(),
            dropoff_location: String::new(),
            child_seat: false,
            flight_number: None,
            payment: Payment {
                kind: PaymentType::Onsite,
                percentage: 100,
                paid_amount: 0,
                processing_amount: None,
                status: PaymentStatus::Pending,
            },
            assignment: Some(Assignment {
                unit: UnitRef {
                    vehicle_type_id: fleet.id(),
                    plate: plate.into(),
                },
                assigned_at: 0,
            }),
            created_at: 0,
        }
    }

    fn blackout(fleet: &mut FleetState, plate: &str, span: Span) {
        fleet
            .vehicle_type
            .unit_mut(plate)
            .unwrap()
            .insert_blackout(BlackoutPeriod {
                span,
                source: BlackoutSource::Manual,
            });
    }

    #[test]
    fn embedded_blackout_excludes_unit() {
        let mut f = fleet(&["A1", "B2"]);
        blackout(&mut f, "A1", span("2024-06-10", "2024-06-15"));
        assert_eq!(available_units(&f, span("2024-06-12", "2024-06-13")), vec!["B2"]);
    }

    #[test]
    fn unavailability_record_excludes_unit() {
        let mut f = fleet(&["A1", "B2"]);
        f.unavailability.push(UnavailabilityRecord {
            id: Ulid::new(),
            vehicle_type_id: f.id(),
            plate: "B2".into(),
            span: span("2024-06-12", "2024-06-13"),
        });
        assert_eq!(available_units(&f, span("2024-06-12", "2024-06-13")), vec!["A1"]);
    }

    #[test]
    fn assigned_reservation_excludes_unit() {
        let mut f = fleet(&["A1", "B2"]);
        let r = assigned_reservation(&f, "A1", span("2024-06-12", "2024-06-13"));
        f.reservations.push(r);
        assert_eq!(available_units(&f, span("2024-06-12", "2024-06-13")), vec!["B2"]);
    }

    #[test]
    fn unassigned_reservation_does_not_block() {
        let mut f = fleet(&["A1"]);
        let mut r = assigned_reservation(&f, "A1", span("2024-06-12", "2024-06-13"));
        r.assignment = None;
        f.reservations.push(r);
        assert_eq!(available_units(&f, span("2024-06-12", "2024-06-13")), vec!["A1"]);
    }

    #[test]
    fn soft_removed_unit_never_listed() {
        let mut f = fleet(&["A1", "B2"]);
        f.vehicle_type.unit_mut("A1").unwrap().available = false;
        assert_eq!(available_units(&f, span("2030-01-01", "2030-01-02")), vec!["B2"]);
    }

    #[test]
    fn exact_day_adjacency_is_a_conflict() {
        let mut f = fleet(&["U"]);
        blackout(&mut f, "U", span("2024-06-01", "2024-06-05"));
        assert!(available_units(&f, span("2024-06-05", "2024-06-10")).is_empty());
        assert_eq!(available_units(&f, span("2024-06-06", "2024-06-10")), vec!["U"]);
    }

    #[test]
    fn requery_is_stable() {
        let mut f = fleet(&["A1", "B2", "C3"]);
        blackout(&mut f, "B2", span("2024-06-01", "2024-06-30"));
        let q = span("2024-06-10", "2024-06-12");
        assert_eq!(available_units(&f, q), available_units(&f, q));
    }

    #[test]
    fn empty_fleet_has_no_capacity() {
        let f = fleet(&[]);
        assert!(available_units(&f, span("2024-06-01", "2024-06-02")).is_empty());
        assert!(resolve_vehicle_type(&f, CategoryKind::ShortTerm, span("2024-06-01", "2024-06-02")).is_none());
    }

    #[test]
    fn busy_intervals_report_each_source() {
        let mut f = fleet(&["A1"]);
        let q = span("2024-06-01", "2024-06-30");
        blackout(&mut f, "A1", span("2024-06-01", "2024-06-02"));
        let rec_id = Ulid::new();
        f.unavailability.push(UnavailabilityRecord {
            id: rec_id,
            vehicle_type_id: f.id(),
            plate: "A1".into(),
            span: span("2024-06-10", "2024-06-11"),
        });
        let r = assigned_reservation(&f, "A1", span("2024-06-20", "2024-06-22"));
        let res_id = r.id;
        f.reservations.push(r);

        let unit = f.vehicle_type.unit("A1").unwrap();
        let sources: Vec<BusySource> = busy_intervals(&f, unit, q).map(|b| b.source).collect();
        assert_eq!(
            sources,
            vec![
                BusySource::Reservation(res_id),
                BusySource::Unavailability(rec_id),
                BusySource::Blackout(BlackoutSource::Manual),
            ]
        );
    }

    #[test]
    fn busy_spans_merge_overlapping_sources() {
        let mut f = fleet(&["A1"]);
        blackout(&mut f, "A1", span("2024-06-01", "2024-06-05"));
        f.unavailability.push(UnavailabilityRecord {
            id: Ulid::new(),
            vehicle_type_id: f.id(),
            plate: "A1".into(),
            span: span("2024-06-04", "2024-06-08"),
        });
        let unit = f.vehicle_type.unit("A1").unwrap();
        let merged = busy_spans(&f, unit, span("2024-05-01", "2024-07-01"));
        assert_eq!(merged, vec![span("2024-06-01", "2024-06-08")]);
    }

    #[test]
    fn resolve_uses_legacy_price_fallback() {
        let mut f = fleet(&["A1", "B2"]);
        f.vehicle_type.categories.clear();
        f.vehicle_type.legacy = Some(LegacyPricing {
            category: CategoryKind::ShortTerm,
            price: 80_000,
        });
        let summary =
            resolve_vehicle_type(&f, CategoryKind::ShortTerm, span("2024-06-01", "2024-06-02")).unwrap();
        assert_eq!(summary.price, 80_000);
        assert_eq!(summary.available_unit_count(), 2);
        assert!(resolve_vehicle_type(&f, CategoryKind::LongTerm, span("2024-06-01", "2024-06-02")).is_none());
    }

    #[test]
    fn first_free_unit_follows_fleet_order() {
        let mut f = fleet(&["A1", "B2", "C3"]);
        blackout(&mut f, "A1", span("2024-06-01", "2024-06-05"));
        let q = span("2024-06-03", "2024-06-04");
        assert_eq!(first_free_unit(&f, q).unwrap().plate, "B2");
    }
}
