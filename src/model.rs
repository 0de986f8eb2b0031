use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

/// Money in millimes (1 DT = 1000 millimes).
pub type Millimes = i64;

/// `a` and `b` overlap iff `a.start <= b.end && a.end >= b.start`.
/// Both ends are inclusive: a range ending on the instant another starts conflicts with it.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start <= b_end && a_end >= b_start
}

/// Closed interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Callers validate `start <= end` before building spans from user input.
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }
}

// ── Categories ───────────────────────────────────────────────────

/// Rental duration class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CategoryKind {
    LongTerm,
    ShortTerm,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::LongTerm => "longueduree",
            CategoryKind::ShortTerm => "courteduree",
        }
    }
}

impl fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "longueduree" | "long-term" | "long_term" => Ok(CategoryKind::LongTerm),
            "courteduree" | "short-term" | "short_term" => Ok(CategoryKind::ShortTerm),
            other => Err(format!("invalid category: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalCategory {
    pub kind: CategoryKind,
    pub price: Millimes,
    pub available: bool,
}

/// Pre-list pricing kept only so old records keep resolving a price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyPricing {
    pub category: CategoryKind,
    pub price: Millimes,
}

// ── Fleet ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlackoutSource {
    /// Entered by an operator.
    Manual,
    /// Written by an assignment commit.
    System,
}

impl BlackoutSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlackoutSource::Manual => "manual",
            BlackoutSource::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutPeriod {
    pub span: Span,
    pub source: BlackoutSource,
}

/// One physical, plated car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub plate: String,
    /// Soft fleet-removal switch, independent of dates.
    pub available: bool,
    /// Sorted by `span.start`.
    pub blackouts: Vec<BlackoutPeriod>,
}

impl Unit {
    pub fn new(plate: String, available: bool) -> Self {
        Self {
            plate,
            available,
            blackouts: Vec::new(),
        }
    }

    /// Insert a blackout maintaining sort order by span.start.
    pub fn insert_blackout(&mut self, period: BlackoutPeriod) {
        let pos = self
            .blackouts
            .partition_point(|b| b.span.start <= period.span.start);
        self.blackouts.insert(pos, period);
    }

    /// Blackouts overlapping the query. Skips everything starting after `query.end`.
    pub fn overlapping(&self, query: Span) -> impl Iterator<Item = &BlackoutPeriod> {
        let right_bound = self
            .blackouts
            .partition_point(|b| b.span.start <= query.end);
        self.blackouts[..right_bound]
            .iter()
            .filter(move |b| b.span.end >= query.start)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub title: String,
    pub description: String,
    pub car_type: String,
    pub gear: String,
    pub fuel: String,
    pub doors: u8,
    pub seats: u8,
    /// Security deposit.
    pub guarantee: Millimes,
    pub air_conditioning: bool,
    pub is_new: bool,
}

/// A model of car offered for rent. Owns its units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleType {
    pub id: Ulid,
    pub profile: VehicleProfile,
    /// Vehicle-type-level status, consulted only by the legacy category match.
    pub available: bool,
    pub legacy: Option<LegacyPricing>,
    pub categories: Vec<RentalCategory>,
    pub units: Vec<Unit>,
    pub ratings: Vec<Rating>,
    pub created_at: Ms,
}

impl VehicleType {
    /// Mean score, 0 when unrated.
    pub fn average_rating(&self) -> f64 {
        if self.ratings.is_empty() {
            return 0.0;
        }
        let sum: u32 = self.ratings.iter().map(|r| u32::from(r.score)).sum();
        f64::from(sum) / self.ratings.len() as f64
    }

    /// Offered either through an available category entry or through the legacy pair.
    pub fn offers(&self, kind: CategoryKind) -> bool {
        self.categories.iter().any(|c| c.kind == kind && c.available)
            || (self.available && self.legacy.as_ref().is_some_and(|l| l.category == kind))
    }

    /// Category price, falling back to the legacy price when the entry is absent.
    pub fn category_price(&self, kind: CategoryKind) -> Option<Millimes> {
        self.categories
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.price)
            .or_else(|| self.legacy.as_ref().map(|l| l.price))
    }

    /// Re-adding a kind updates it in place.
    pub fn upsert_category(&mut self, category: RentalCategory) {
        match self.categories.iter_mut().find(|c| c.kind == category.kind) {
            Some(existing) => {
                existing.price = category.price;
                existing.available = category.available;
            }
            None => self.categories.push(category),
        }
    }

    /// Returns false when the kind is not offered at all.
    pub fn set_category_availability(&mut self, kind: CategoryKind, available: bool) -> bool {
        match self.categories.iter_mut().find(|c| c.kind == kind) {
            Some(c) => {
                c.available = available;
                true
            }
            None => false,
        }
    }

    pub fn unit(&self, plate: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.plate == plate)
    }

    pub fn unit_mut(&mut self, plate: &str) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| u.plate == plate)
    }
}

/// A customer review of a vehicle type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub full_name: String,
    /// 1 to 5.
    pub score: u8,
    pub comment: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RatingDraft {
    pub full_name: String,
    pub score: u8,
    pub comment: String,
}

/// Input for creating a vehicle type. Either `categories` or the legacy
/// `category` + `price` pair must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleTypeDraft {
    pub profile: VehicleProfile,
    pub available: bool,
    pub category: Option<CategoryKind>,
    pub price: Option<Millimes>,
    pub categories: Vec<RentalCategory>,
    pub units: Vec<UnitDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDraft {
    pub plate: String,
    pub available: bool,
}

/// Operator-entered block stored apart from the unit's embedded blackouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailabilityRecord {
    pub id: Ulid,
    pub vehicle_type_id: Ulid,
    pub plate: String,
    pub span: Span,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub whatsapp: String,
    pub address: String,
    pub city: String,
    pub age: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentType {
    Online,
    Onsite,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Online => "online",
            PaymentType::Onsite => "onsite",
        }
    }
}

impl FromStr for PaymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "online" => Ok(PaymentType::Online),
            "onsite" => Ok(PaymentType::Onsite),
            other => Err(format!("invalid payment type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    PartiallyPaid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::PartiallyPaid => "partially_paid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub kind: PaymentType,
    /// One of 30, 50, 100.
    pub percentage: u8,
    pub paid_amount: Millimes,
    /// Amount sent to the gateway and not yet confirmed.
    pub processing_amount: Option<Millimes>,
    pub status: PaymentStatus,
}

/// Composite reference to one unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    pub vehicle_type_id: Ulid,
    pub plate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub unit: UnitRef,
    pub assigned_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub vehicle_type_id: Ulid,
    pub customer: Customer,
    pub category: CategoryKind,
    pub span: Span,
    pub total_price: Millimes,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub child_seat: bool,
    pub flight_number: Option<String>,
    pub payment: Payment,
    pub assignment: Option<Assignment>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn assigned_plate(&self) -> Option<&str> {
        self.assignment.as_ref().map(|a| a.unit.plate.as_str())
    }

    pub fn is_assigned_to(&self, vehicle_type_id: Ulid, plate: &str) -> bool {
        self.assignment
            .as_ref()
            .is_some_and(|a| a.unit.vehicle_type_id == vehicle_type_id && a.unit.plate == plate)
    }
}

/// Input for creating a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    pub id: Ulid,
    pub vehicle_type_id: Ulid,
    pub customer: Customer,
    pub category: CategoryKind,
    pub span: Span,
    pub total_price: Millimes,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub child_seat: bool,
    pub flight_number: Option<String>,
    pub payment_type: PaymentType,
    /// Defaults to 100.
    pub payment_percentage: Option<u8>,
}

// ── Partition state ──────────────────────────────────────────────

/// Everything that can make a unit of one vehicle type busy, behind one lock:
/// the vehicle type with its units, the reservations against it, and the
/// standalone unavailability records for its plates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetState {
    pub vehicle_type: VehicleType,
    pub reservations: Vec<Reservation>,
    pub unavailability: Vec<UnavailabilityRecord>,
}

impl FleetState {
    pub fn new(vehicle_type: VehicleType) -> Self {
        Self {
            vehicle_type,
            reservations: Vec::new(),
            unavailability: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.vehicle_type.id
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn has_assignments_on(&self, plate: &str) -> bool {
        let id = self.id();
        self.reservations.iter().any(|r| r.is_assigned_to(id, plate))
    }
}

/// WAL record format. One event per committed state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleTypeCreated {
        vehicle_type: VehicleType,
    },
    VehicleProfileUpdated {
        id: Ulid,
        profile: VehicleProfile,
    },
    VehicleStatusSet {
        id: Ulid,
        available: bool,
    },
    VehicleTypeDeleted {
        id: Ulid,
    },
    CategoryUpserted {
        vehicle_type_id: Ulid,
        category: RentalCategory,
    },
    CategoryAvailabilitySet {
        vehicle_type_id: Ulid,
        kind: CategoryKind,
        available: bool,
    },
    UnitAdded {
        vehicle_type_id: Ulid,
        unit: Unit,
    },
    UnitAvailabilitySet {
        vehicle_type_id: Ulid,
        plate: String,
        available: bool,
    },
    UnitRemoved {
        vehicle_type_id: Ulid,
        plate: String,
    },
    BlackoutAdded {
        vehicle_type_id: Ulid,
        plate: String,
        period: BlackoutPeriod,
    },
    UnavailabilityRecorded {
        record: UnavailabilityRecord,
    },
    UnavailabilityRemoved {
        id: Ulid,
        vehicle_type_id: Ulid,
    },
    /// An assignment carried by the reservation is committed with it.
    ReservationCreated {
        reservation: Reservation,
    },
    /// Binds the unit and appends its system blackout in one record.
    UnitAssigned {
        reservation_id: Ulid,
        unit: UnitRef,
        span: Span,
        assigned_at: Ms,
    },
    PaymentUpdated {
        reservation_id: Ulid,
        vehicle_type_id: Ulid,
        payment: Payment,
    },
    RatingAdded {
        vehicle_type_id: Ulid,
        rating: Rating,
    },
    /// Compaction snapshot of one partition.
    FleetRestored {
        fleet: FleetState,
    },
}

impl Event {
    pub fn vehicle_type_id(&self) -> Ulid {
        match self {
            Event::VehicleTypeCreated { vehicle_type } => vehicle_type.id,
            Event::VehicleProfileUpdated { id, .. }
            | Event::VehicleStatusSet { id, .. }
            | Event::VehicleTypeDeleted { id } => *id,
            Event::CategoryUpserted { vehicle_type_id, .. }
            | Event::CategoryAvailabilitySet { vehicle_type_id, .. }
            | Event::UnitAdded { vehicle_type_id, .. }
            | Event::UnitAvailabilitySet { vehicle_type_id, .. }
            | Event::UnitRemoved { vehicle_type_id, .. }
            | Event::BlackoutAdded { vehicle_type_id, .. }
            | Event::UnavailabilityRemoved { vehicle_type_id, .. }
            | Event::PaymentUpdated { vehicle_type_id, .. }
            | Event::RatingAdded { vehicle_type_id, .. } => *vehicle_type_id,
            Event::UnavailabilityRecorded { record } => record.vehicle_type_id,
            Event::ReservationCreated { reservation } => reservation.vehicle_type_id,
            Event::UnitAssigned { unit, .. } => unit.vehicle_type_id,
            Event::FleetRestored { fleet } => fleet.id(),
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A vehicle type with at least one free unit for a requested window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableVehicleType {
    pub vehicle_type_id: Ulid,
    pub title: String,
    pub category: CategoryKind,
    pub price: Millimes,
    pub plates: Vec<String>,
}

impl AvailableVehicleType {
    pub fn available_unit_count(&self) -> usize {
        self.plates.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedVehicleType {
    pub vehicle_type: VehicleType,
    pub price: Millimes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    Reserved,
    Unavailable,
    Available,
}

impl DayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayStatus::Reserved => "reserved",
            DayStatus::Unavailable => "unavailable",
            DayStatus::Available => "available",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedPeriod {
    pub reservation_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCalendar {
    pub plate: String,
    /// One entry per day of the month, day 1 first.
    pub days: Vec<DayStatus>,
    /// Assigned reservations overlapping the month, by start.
    pub reservations: Vec<ReservedPeriod>,
    /// Records and manual blackouts overlapping the month, merged. Spans are
    /// not clipped to the month.
    pub unavailable: Vec<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleTypeCalendar {
    pub vehicle_type_id: Ulid,
    pub title: String,
    pub units: Vec<UnitCalendar>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleTypeFilter {
    pub seats: Option<u8>,
    pub car_type: Option<String>,
}

impl VehicleTypeFilter {
    pub fn matches(&self, vt: &VehicleType) -> bool {
        self.seats.is_none_or(|s| vt.profile.seats == s)
            && self
                .car_type
                .as_ref()
                .is_none_or(|t| &vt.profile.car_type == t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vehicle_type() -> VehicleType {
        VehicleType {
            id: Ulid::new(),
            profile: VehicleProfile::default(),
            available: true,
            legacy: None,
            categories: Vec::new(),
            units: Vec::new(),
            ratings: Vec::new(),
            created_at: 0,
        }
    }

    fn blackout(start: Ms, end: Ms) -> BlackoutPeriod {
        BlackoutPeriod {
            span: Span::new(start, end),
            source: BlackoutSource::Manual,
        }
    }

    #[test]
    fn span_overlap_is_inclusive() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        let d = Span::new(201, 300);
        assert!(a.overlaps(&b));
        assert!(a.overlaps(&c)); // touching endpoints conflict
        assert!(!a.overlaps(&d));
    }

    #[test]
    fn span_contains_instant_both_ends() {
        let s = Span::new(100, 200);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(200));
        assert!(!s.contains_instant(201));
        assert_eq!(s.duration_ms(), 100);
    }

    #[test]
    fn zero_width_spans_overlap_when_equal() {
        let a = Span::new(500, 500);
        assert!(a.overlaps(&a));
        assert!(!a.overlaps(&Span::new(501, 501)));
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(a0 in -1_000i64..1_000, al in 0i64..500, b0 in -1_000i64..1_000, bl in 0i64..500) {
            let a = Span::new(a0, a0 + al);
            let b = Span::new(b0, b0 + bl);
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }

        #[test]
        fn overlap_matches_shared_instant(a0 in 0i64..200, al in 0i64..50, b0 in 0i64..200, bl in 0i64..50) {
            let a = Span::new(a0, a0 + al);
            let b = Span::new(b0, b0 + bl);
            let shared = (a0..=a0 + al).any(|t| b.contains_instant(t));
            prop_assert_eq!(a.overlaps(&b), shared);
        }
    }

    #[test]
    fn category_kind_parses_both_spellings() {
        assert_eq!("courteduree".parse::<CategoryKind>(), Ok(CategoryKind::ShortTerm));
        assert_eq!("long-term".parse::<CategoryKind>(), Ok(CategoryKind::LongTerm));
        assert!("weekly".parse::<CategoryKind>().is_err());
        assert_eq!(CategoryKind::LongTerm.to_string(), "longueduree");
    }

    #[test]
    fn upsert_category_updates_in_place() {
        let mut vt = vehicle_type();
        vt.upsert_category(RentalCategory {
            kind: CategoryKind::ShortTerm,
            price: 80_000,
            available: true,
        });
        vt.upsert_category(RentalCategory {
            kind: CategoryKind::ShortTerm,
            price: 95_000,
            available: false,
        });
        assert_eq!(vt.categories.len(), 1);
        assert_eq!(vt.categories[0].price, 95_000);
        assert!(!vt.categories[0].available);
    }

    #[test]
    fn category_price_falls_back_to_legacy() {
        let mut vt = vehicle_type();
        vt.legacy = Some(LegacyPricing {
            category: CategoryKind::ShortTerm,
            price: 80_000,
        });
        assert!(vt.offers(CategoryKind::ShortTerm));
        assert!(!vt.offers(CategoryKind::LongTerm));
        assert_eq!(vt.category_price(CategoryKind::ShortTerm), Some(80_000));

        vt.available = false;
        assert!(!vt.offers(CategoryKind::ShortTerm));
    }

    #[test]
    fn unavailable_category_entry_is_not_offered() {
        let mut vt = vehicle_type();
        vt.upsert_category(RentalCategory {
            kind: CategoryKind::LongTerm,
            price: 1_000_000,
            available: false,
        });
        assert!(!vt.offers(CategoryKind::LongTerm));
        assert_eq!(vt.category_price(CategoryKind::LongTerm), Some(1_000_000));
        assert!(!vt.set_category_availability(CategoryKind::ShortTerm, true));
        assert!(vt.set_category_availability(CategoryKind::LongTerm, true));
        assert!(vt.offers(CategoryKind::LongTerm));
    }

    #[test]
    fn blackouts_stay_sorted() {
        let mut unit = Unit::new("123TUN456".into(), true);
        unit.insert_blackout(blackout(300, 400));
        unit.insert_blackout(blackout(100, 200));
        unit.insert_blackout(blackout(200, 300));
        let starts: Vec<Ms> = unit.blackouts.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_blackouts_skip_past_and_future() {
        let mut unit = Unit::new("123TUN456".into(), true);
        unit.insert_blackout(blackout(0, 99));
        unit.insert_blackout(blackout(450, 600));
        unit.insert_blackout(blackout(1000, 1100));
        let hits: Vec<_> = unit.overlapping(Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_blackouts_touching_endpoint_included() {
        let mut unit = Unit::new("123TUN456".into(), true);
        unit.insert_blackout(blackout(100, 200));
        assert_eq!(unit.overlapping(Span::new(200, 300)).count(), 1);
        assert_eq!(unit.overlapping(Span::new(0, 100)).count(), 1);
        assert_eq!(unit.overlapping(Span::new(201, 300)).count(), 0);
    }

    #[test]
    fn filter_matches_seats_and_type() {
        let mut vt = vehicle_type();
        vt.profile.seats = 5;
        vt.profile.car_type = "SUV".into();
        assert!(VehicleTypeFilter::default().matches(&vt));
        assert!(VehicleTypeFilter { seats: Some(5), car_type: Some("SUV".into()) }.matches(&vt));
        assert!(!VehicleTypeFilter { seats: Some(4), car_type: None }.matches(&vt));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::UnitAssigned {
            reservation_id: Ulid::new(),
            unit: UnitRef {
                vehicle_type_id: Ulid::new(),
                plate: "123TUN456".into(),
            },
            span: Span::new(1000, 2000),
            assigned_at: 3000,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
