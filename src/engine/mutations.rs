use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{ASSIGNMENTS_TOTAL, assignment_outcome};
use crate::time::now_ms;

use super::availability::first_free_unit;
use super::conflict::*;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Vehicle types ────────────────────────────────────────

    pub async fn create_vehicle_type(
        &self,
        id: Ulid,
        draft: VehicleTypeDraft,
    ) -> Result<VehicleType, EngineError> {
        validate_profile(&draft.profile)?;
        let (categories, legacy) = normalize_categories(&draft)?;
        validate_unit_drafts(&draft.units)?;

        let _structure = self.structure.read().await;
        if self.state.len() >= MAX_VEHICLE_TYPES {
            return Err(EngineError::LimitExceeded("too many vehicle types"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(format!("vehicle type {id}")));
        }

        let mut claimed: Vec<&str> = Vec::with_capacity(draft.units.len());
        for unit in &draft.units {
            if let Err(e) = self.claim_plate(&unit.plate, id) {
                for plate in claimed {
                    self.release_plate(plate, id);
                }
                return Err(e);
            }
            claimed.push(&unit.plate);
        }

        let vehicle_type = VehicleType {
            id,
            profile: draft.profile,
            available: draft.available,
            legacy,
            categories,
            units: draft
                .units
                .iter()
                .map(|u| Unit::new(u.plate.clone(), u.available))
                .collect(),
            ratings: Vec::new(),
            created_at: now_ms(),
        };
        let event = Event::VehicleTypeCreated {
            vehicle_type: vehicle_type.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            for plate in claimed {
                self.release_plate(plate, id);
            }
            return Err(e);
        }
        self.install_fleet(FleetState::new(vehicle_type.clone()));
        info!(%id, units = vehicle_type.units.len(), "vehicle type created");
        Ok(vehicle_type)
    }

    /// Removes the type with its units, unavailability records and reservations.
    pub async fn delete_vehicle_type(&self, id: Ulid) -> Result<(), EngineError> {
        let _structure = self.structure.read().await;
        let guard = self.write_fleet(&id).await?;
        self.wal_append(&Event::VehicleTypeDeleted { id }).await?;
        self.state.remove(&id);
        self.unindex_fleet(&guard);
        info!(%id, reservations = guard.reservations.len(), "vehicle type deleted");
        Ok(())
    }

    pub async fn update_vehicle_profile(
        &self,
        id: Ulid,
        profile: VehicleProfile,
    ) -> Result<(), EngineError> {
        validate_profile(&profile)?;
        let mut guard = self.write_fleet(&id).await?;
        let event = Event::VehicleProfileUpdated { id, profile };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Flips the vehicle-type-level status. Returns the new value.
    pub async fn toggle_vehicle_type_status(&self, id: Ulid) -> Result<bool, EngineError> {
        let mut guard = self.write_fleet(&id).await?;
        let available = !guard.vehicle_type.available;
        let event = Event::VehicleStatusSet { id, available };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(available)
    }

    // ── Categories ───────────────────────────────────────────

    pub async fn upsert_category(
        &self,
        vehicle_type_id: Ulid,
        category: RentalCategory,
    ) -> Result<(), EngineError> {
        validate_price(category.price)?;
        let mut guard = self.write_fleet(&vehicle_type_id).await?;
        let event = Event::CategoryUpserted {
            vehicle_type_id,
            category,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Returns false, writing nothing, when the type does not offer `kind`.
    pub async fn set_category_availability(
        &self,
        vehicle_type_id: Ulid,
        kind: CategoryKind,
        available: bool,
    ) -> Result<bool, EngineError> {
        let mut guard = self.write_fleet(&vehicle_type_id).await?;
        if !guard.vehicle_type.categories.iter().any(|c| c.kind == kind) {
            return Ok(false);
        }
        let event = Event::CategoryAvailabilitySet {
            vehicle_type_id,
            kind,
            available,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    // ── Ratings ──────────────────────────────────────────────

    /// Appends a customer rating. Returns the type with its new average.
    pub async fn add_rating(
        &self,
        vehicle_type_id: Ulid,
        draft: RatingDraft,
    ) -> Result<VehicleType, EngineError> {
        validate_rating(&draft)?;
        let mut guard = self.write_fleet(&vehicle_type_id).await?;
        if guard.vehicle_type.ratings.len() >= MAX_RATINGS_PER_VEHICLE_TYPE {
            return Err(EngineError::LimitExceeded("too many ratings"));
        }
        let event = Event::RatingAdded {
            vehicle_type_id,
            rating: Rating {
                full_name: draft.full_name,
                score: draft.score,
                comment: draft.comment,
                created_at: now_ms(),
            },
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.vehicle_type.clone())
    }

    // ── Units ────────────────────────────────────────────────

    pub async fn add_unit(&self, vehicle_type_id: Ulid, unit: UnitDraft) -> Result<(), EngineError> {
        validate_plate(&unit.plate)?;
        let mut guard = self.write_fleet(&vehicle_type_id).await?;
        if guard.vehicle_type.units.len() >= MAX_UNITS_PER_VEHICLE_TYPE {
            return Err(EngineError::LimitExceeded("too many units"));
        }
        self.claim_plate(&unit.plate, vehicle_type_id)?;
        let event = Event::UnitAdded {
            vehicle_type_id,
            unit: Unit::new(unit.plate.clone(), unit.available),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.release_plate(&unit.plate, vehicle_type_id);
            return Err(e);
        }
        Ok(())
    }

    pub async fn set_unit_availability(
        &self,
        vehicle_type_id: Ulid,
        plate: &str,
        available: bool,
    ) -> Result<(), EngineError> {
        let mut guard = self.write_fleet(&vehicle_type_id).await?;
        if guard.vehicle_type.unit(plate).is_none() {
            return Err(EngineError::not_found("plate", plate));
        }
        let event = Event::UnitAvailabilitySet {
            vehicle_type_id,
            plate: plate.to_string(),
            available,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Rejected while any reservation still points at the unit. Its
    /// unavailability records go with it.
    pub async fn remove_unit(&self, vehicle_type_id: Ulid, plate: &str) -> Result<(), EngineError> {
        let mut guard = self.write_fleet(&vehicle_type_id).await?;
        if guard.vehicle_type.unit(plate).is_none() {
            return Err(EngineError::not_found("plate", plate));
        }
        if guard.has_assignments_on(plate) {
            return Err(EngineError::Conflict(format!(
                "plate {plate} is assigned to existing reservations"
            )));
        }
        let event = Event::UnitRemoved {
            vehicle_type_id,
            plate: plate.to_string(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Operator-entered embedded blackout.
    pub async fn add_blackout(
        &self,
        vehicle_type_id: Ulid,
        plate: &str,
        span: Span,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        let mut guard = self.write_fleet(&vehicle_type_id).await?;
        let unit = guard
            .vehicle_type
            .unit(plate)
            .ok_or_else(|| EngineError::not_found("plate", plate))?;
        if unit.blackouts.len() >= MAX_BLACKOUTS_PER_UNIT {
            return Err(EngineError::LimitExceeded("too many blackouts on unit"));
        }
        let event = Event::BlackoutAdded {
            vehicle_type_id,
            plate: plate.to_string(),
            period: BlackoutPeriod {
                span,
                source: BlackoutSource::Manual,
            },
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Unavailability records ───────────────────────────────

    pub async fn record_unavailability(
        &self,
        id: Ulid,
        vehicle_type_id: Ulid,
        plate: &str,
        span: Span,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        self.claim_entity(id, vehicle_type_id, "record")?;
        let result = self
            .insert_unavailability(id, vehicle_type_id, plate, span)
            .await;
        if result.is_err() {
            self.release_entity(id, vehicle_type_id);
        }
        result
    }

    async fn insert_unavailability(
        &self,
        id: Ulid,
        vehicle_type_id: Ulid,
        plate: &str,
        span: Span,
    ) -> Result<(), EngineError> {
        let mut guard = self.write_fleet(&vehicle_type_id).await?;
        if guard.vehicle_type.unit(plate).is_none() {
            return Err(EngineError::not_found("plate", plate));
        }
        if guard.unavailability.len() >= MAX_UNAVAILABILITY_PER_VEHICLE_TYPE {
            return Err(EngineError::LimitExceeded("too many unavailability records"));
        }
        let event = Event::UnavailabilityRecorded {
            record: UnavailabilityRecord {
                id,
                vehicle_type_id,
                plate: plate.to_string(),
                span,
            },
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_unavailability(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (vehicle_type_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.unavailability.iter().any(|r| r.id == id) {
            return Err(EngineError::not_found("unavailability record", id));
        }
        let event = Event::UnavailabilityRemoved {
            id,
            vehicle_type_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(vehicle_type_id)
    }

    // ── Reservations & assignment ────────────────────────────

    /// Creates a `pending` reservation. With `plate`, the unit is checked and
    /// bound in the same commit.
    pub async fn create_reservation(
        &self,
        draft: ReservationDraft,
        plate: Option<&str>,
    ) -> Result<Reservation, EngineError> {
        validate_span(&draft.span)?;
        validate_price(draft.total_price)?;
        let percentage = draft.payment_percentage.unwrap_or(100);
        validate_percentage(percentage)?;
        validate_text("pickup_location", &draft.pickup_location)?;
        validate_text("dropoff_location", &draft.dropoff_location)?;
        validate_text("email", &draft.customer.email)?;

        let (id, owner) = (draft.id, draft.vehicle_type_id);
        self.claim_entity(id, owner, "reservation")?;
        let result = self.insert_reservation(draft, percentage, plate).await;
        if result.is_err() {
            self.release_entity(id, owner);
        }
        result
    }

    async fn insert_reservation(
        &self,
        draft: ReservationDraft,
        percentage: u8,
        plate: Option<&str>,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.write_fleet(&draft.vehicle_type_id).await?;
        if !guard.vehicle_type.offers(draft.category) {
            return Err(EngineError::Validation(format!(
                "vehicle type {} does not offer category {}",
                draft.vehicle_type_id, draft.category
            )));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_VEHICLE_TYPE {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }

        let now = now_ms();
        let assignment = match plate {
            Some(plate) => {
                if let Err(e) = check_unit_free(&guard, plate, draft.span) {
                    record_assignment(&e);
                    return Err(e);
                }
                Some(Assignment {
                    unit: UnitRef {
                        vehicle_type_id: draft.vehicle_type_id,
                        plate: plate.to_string(),
                    },
                    assigned_at: now,
                })
            }
            None => None,
        };

        let reservation = Reservation {
            id: draft.id,
            vehicle_type_id: draft.vehicle_type_id,
            customer: draft.customer,
            category: draft.category,
            span: draft.span,
            total_price: draft.total_price,
            pickup_location: draft.pickup_location,
            dropoff_location: draft.dropoff_location,
            child_seat: draft.child_seat,
            flight_number: draft.flight_number,
            payment: Payment::new(draft.payment_type, percentage),
            assignment,
            created_at: now,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        if let Some(plate) = reservation.assigned_plate() {
            metrics::counter!(ASSIGNMENTS_TOTAL, "outcome" => "committed").increment(1);
            info!(reservation = %reservation.id, %plate, "unit assigned at creation");
        }
        Ok(reservation)
    }

    /// Bind `plate` to the reservation. The busy check and both writes
    /// (reservation binding, system blackout) happen under the partition's
    /// write lock as one WAL record, so two overlapping assignments of one
    /// plate cannot both commit.
    pub async fn assign(&self, reservation_id: Ulid, plate: &str) -> Result<Reservation, EngineError> {
        let result = self.assign_inner(reservation_id, Some(plate)).await;
        if let Err(e) = &result {
            record_assignment(e);
        }
        result
    }

    /// Like `assign`, choosing the first free unit in fleet order.
    pub async fn auto_assign(&self, reservation_id: Ulid) -> Result<Reservation, EngineError> {
        let result = self.assign_inner(reservation_id, None).await;
        if let Err(e) = &result {
            record_assignment(e);
        }
        result
    }

    async fn assign_inner(
        &self,
        reservation_id: Ulid,
        plate: Option<&str>,
    ) -> Result<Reservation, EngineError> {
        let (vehicle_type_id, mut guard) = self.resolve_entity_write(&reservation_id).await?;
        let reservation = guard
            .reservation(reservation_id)
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))?;
        if let Some(existing) = reservation.assigned_plate() {
            return Err(EngineError::AlreadyAssigned {
                reservation_id,
                plate: existing.to_string(),
            });
        }
        let span = reservation.span;

        let plate = match plate {
            Some(plate) => {
                check_unit_free(&guard, plate, span)?;
                plate.to_string()
            }
            None => first_free_unit(&guard, span)
                .map(|u| u.plate.clone())
                .ok_or(EngineError::NoFreeUnit(vehicle_type_id))?,
        };

        let event = Event::UnitAssigned {
            reservation_id,
            unit: UnitRef {
                vehicle_type_id,
                plate: plate.clone(),
            },
            span,
            assigned_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(ASSIGNMENTS_TOTAL, "outcome" => "committed").increment(1);
        info!(reservation = %reservation_id, %plate, "unit assigned");

        guard
            .reservation(reservation_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))
    }

    // ── Payments ─────────────────────────────────────────────

    /// Record the amount about to be sent to the gateway. Online reservations
    /// that are not fully paid only. Returns the reservation and the amount.
    pub async fn begin_payment(
        &self,
        reservation_id: Ulid,
    ) -> Result<(Reservation, Millimes), EngineError> {
        let (vehicle_type_id, mut guard) = self.resolve_entity_write(&reservation_id).await?;
        let reservation = guard
            .reservation(reservation_id)
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))?;
        if reservation.payment.kind != PaymentType::Online {
            return Err(EngineError::Validation(
                "only online reservations are paid through the gateway".into(),
            ));
        }
        if reservation.payment.status == PaymentStatus::Paid {
            return Err(EngineError::Conflict(format!(
                "reservation {reservation_id} is already paid"
            )));
        }
        let amount = reservation.payment.amount_due(reservation.total_price);
        let mut payment = reservation.payment.clone();
        payment.processing_amount = Some(amount);

        let event = Event::PaymentUpdated {
            reservation_id,
            vehicle_type_id,
            payment,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .reservation(reservation_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))?;
        Ok((updated, amount))
    }

    pub async fn record_payment_success(
        &self,
        reservation_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        self.update_payment(reservation_id, |payment, total| payment.settle(total))
            .await
    }

    pub async fn record_payment_failure(
        &self,
        reservation_id: Ulid,
    ) -> Result<Reservation, EngineError> {
        self.update_payment(reservation_id, |payment, _| payment.fail())
            .await
    }

    async fn update_payment(
        &self,
        reservation_id: Ulid,
        transition: impl FnOnce(&mut Payment, Millimes),
    ) -> Result<Reservation, EngineError> {
        let (vehicle_type_id, mut guard) = self.resolve_entity_write(&reservation_id).await?;
        let reservation = guard
            .reservation(reservation_id)
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))?;
        let mut payment = reservation.payment.clone();
        transition(&mut payment, reservation.total_price);

        let event = Event::PaymentUpdated {
            reservation_id,
            vehicle_type_id,
            payment,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .reservation(reservation_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as one snapshot event per vehicle type. Holds the
    /// structure lock and every partition's read lock until the swap is done,
    /// so no event can land between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _structure = self.structure.write().await;
        let partitions: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(partitions.len());
        for shared in partitions {
            guards.push(shared.read_owned().await);
        }
        let events: Vec<Event> = guards
            .iter()
            .map(|g| Event::FleetRestored {
                fleet: (**g).clone(),
            })
            .collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| {
                warn!("WAL compaction failed: {e}");
                EngineError::WalError(e.to_string())
            })?;
        info!(vehicle_types = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn record_assignment(err: &EngineError) {
    metrics::counter!(ASSIGNMENTS_TOTAL, "outcome" => assignment_outcome(err)).increment(1);
}
