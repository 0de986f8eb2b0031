mod availability;
mod calendar;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{
    BusyInterval, BusySource, available_units, busy_intervals, busy_spans, first_free_unit,
    is_busy, merge_overlapping, resolve_vehicle_type,
};
pub use calendar::{day_status, project_fleet};
pub use error::{EngineError, ErrorKind};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

/// One partition per vehicle type. Everything an assignment must re-check
/// lives behind this single lock.
pub type SharedFleetState = Arc<RwLock<FleetState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Takes the first append, drains whatever else is already
/// queued, and commits the whole batch with one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so no half-written batch leaks into the next one.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub state: DashMap<Ulid, SharedFleetState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Global plate index: plate → owning vehicle type.
    pub(super) plates: DashMap<String, Ulid>,
    /// Reservation and unavailability-record ids → owning vehicle type.
    pub(super) entities: DashMap<Ulid, Ulid>,
    /// Creating or deleting a partition takes this for reading; compaction
    /// takes it for writing so the partition set holds still while it snapshots.
    /// Lock order: `structure` before any partition lock.
    pub(super) structure: RwLock<()>,
}

/// Apply an in-partition event. Caller holds the partition lock.
fn apply_to_fleet(
    fleet: &mut FleetState,
    event: &Event,
    plates: &DashMap<String, Ulid>,
    entities: &DashMap<Ulid, Ulid>,
) {
    let type_id = fleet.id();
    match event {
        Event::VehicleProfileUpdated { profile, .. } => {
            fleet.vehicle_type.profile = profile.clone();
        }
        Event::VehicleStatusSet { available, .. } => {
            fleet.vehicle_type.available = *available;
        }
        Event::CategoryUpserted { category, .. } => {
            fleet.vehicle_type.upsert_category(category.clone());
        }
        Event::CategoryAvailabilitySet { kind, available, .. } => {
            fleet.vehicle_type.set_category_availability(*kind, *available);
        }
        Event::UnitAdded { unit, .. } => {
            plates.insert(unit.plate.clone(), type_id);
            fleet.vehicle_type.units.push(unit.clone());
        }
        Event::UnitAvailabilitySet { plate, available, .. } => {
            if let Some(unit) = fleet.vehicle_type.unit_mut(plate) {
                unit.available = *available;
            }
        }
        Event::UnitRemoved { plate, .. } => {
            fleet.vehicle_type.units.retain(|u| &u.plate != plate);
            fleet.unavailability.retain(|r| {
                let keep = &r.plate != plate;
                if !keep {
                    entities.remove(&r.id);
                }
                keep
            });
            plates.remove(plate);
        }
        Event::BlackoutAdded { plate, period, .. } => {
            if let Some(unit) = fleet.vehicle_type.unit_mut(plate) {
                unit.insert_blackout(*period);
            }
        }
        Event::UnavailabilityRecorded { record } => {
            entities.insert(record.id, type_id);
            fleet.unavailability.push(record.clone());
        }
        Event::UnavailabilityRemoved { id, .. } => {
            fleet.unavailability.retain(|r| r.id != *id);
            entities.remove(id);
        }
        Event::ReservationCreated { reservation } => {
            entities.insert(reservation.id, type_id);
            if let Some(assignment) = &reservation.assignment
                && let Some(unit) = fleet.vehicle_type.unit_mut(&assignment.unit.plate)
            {
                unit.insert_blackout(BlackoutPeriod {
                    span: reservation.span,
                    source: BlackoutSource::System,
                });
            }
            fleet.reservations.push(reservation.clone());
        }
        Event::UnitAssigned {
            reservation_id,
            unit,
            span,
            assigned_at,
        } => {
            if let Some(r) = fleet.reservation_mut(*reservation_id) {
                r.assignment = Some(Assignment {
                    unit: unit.clone(),
                    assigned_at: *assigned_at,
                });
            }
            if let Some(u) = fleet.vehicle_type.unit_mut(&unit.plate) {
                u.insert_blackout(BlackoutPeriod {
                    span: *span,
                    source: BlackoutSource::System,
                });
            }
        }
        Event::PaymentUpdated {
            reservation_id,
            payment,
            ..
        } => {
            if let Some(r) = fleet.reservation_mut(*reservation_id) {
                r.payment = payment.clone();
            }
        }
        Event::RatingAdded { rating, .. } => {
            fleet.vehicle_type.ratings.push(rating.clone());
        }
        // Partition creation, deletion and snapshots are handled at the map level.
        Event::VehicleTypeCreated { .. }
        | Event::VehicleTypeDeleted { .. }
        | Event::FleetRestored { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            plates: DashMap::new(),
            entities: DashMap::new(),
            structure: RwLock::new(()),
        };

        for event in &events {
            engine.replay_event(event);
        }
        info!(
            events = events.len(),
            vehicle_types = engine.state.len(),
            "replayed WAL from {}",
            wal_path.display()
        );
        Ok(engine)
    }

    /// Nobody else holds these Arcs during replay, so `try_write` always succeeds.
    /// Blocking lock calls are off limits here: `new` may run inside a runtime.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::VehicleTypeCreated { vehicle_type } => {
                self.install_fleet(FleetState::new(vehicle_type.clone()));
            }
            Event::FleetRestored { fleet } => {
                self.install_fleet(fleet.clone());
            }
            Event::VehicleTypeDeleted { id } => {
                if let Some((_, shared)) = self.state.remove(id)
                    && let Ok(fleet) = shared.try_read()
                {
                    self.unindex_fleet(&fleet);
                }
            }
            other => {
                let Some(shared) = self.get_fleet(&other.vehicle_type_id()) else {
                    return;
                };
                if let Ok(mut guard) = shared.try_write() {
                    apply_to_fleet(&mut guard, other, &self.plates, &self.entities);
                }
            }
        }
    }

    fn index_fleet(&self, fleet: &FleetState) {
        let id = fleet.id();
        for unit in &fleet.vehicle_type.units {
            self.plates.insert(unit.plate.clone(), id);
        }
        for r in &fleet.reservations {
            self.entities.insert(r.id, id);
        }
        for u in &fleet.unavailability {
            self.entities.insert(u.id, id);
        }
    }

    pub(super) fn unindex_fleet(&self, fleet: &FleetState) {
        let id = fleet.id();
        self.plates.retain(|_, owner| *owner != id);
        for r in &fleet.reservations {
            self.entities.remove(&r.id);
        }
        for u in &fleet.unavailability {
            self.entities.remove(&u.id);
        }
    }

    pub(super) fn install_fleet(&self, fleet: FleetState) {
        self.index_fleet(&fleet);
        self.state.insert(fleet.id(), Arc::new(RwLock::new(fleet)));
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_fleet(&self, id: &Ulid) -> Option<SharedFleetState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub(super) fn require_fleet(&self, id: &Ulid) -> Result<SharedFleetState, EngineError> {
        self.get_fleet(id)
            .ok_or_else(|| EngineError::not_found("vehicle type", id))
    }

    pub fn get_fleet_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entities.get(entity_id).map(|e| *e.value())
    }

    /// Reserve `plate` in the global index for `owner`. Fails if any fleet
    /// already holds it. Callers release the claim if their commit fails.
    pub(super) fn claim_plate(&self, plate: &str, owner: Ulid) -> Result<(), EngineError> {
        match self.plates.entry(plate.to_string()) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(format!("plate {plate}"))),
            Entry::Vacant(slot) => {
                slot.insert(owner);
                Ok(())
            }
        }
    }

    pub(super) fn release_plate(&self, plate: &str, owner: Ulid) {
        self.plates.remove_if(plate, |_, o| *o == owner);
    }

    /// Reserve a client-supplied reservation or record id for `owner` before
    /// its commit. Same contract as `claim_plate`.
    pub(super) fn claim_entity(&self, id: Ulid, owner: Ulid, what: &str) -> Result<(), EngineError> {
        match self.entities.entry(id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(format!("{what} {id}"))),
            Entry::Vacant(slot) => {
                slot.insert(owner);
                Ok(())
            }
        }
    }

    pub(super) fn release_entity(&self, id: Ulid, owner: Ulid) {
        self.entities.remove_if(&id, |_, o| *o == owner);
    }

    /// WAL-append then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        fleet: &mut FleetState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_fleet(fleet, event, &self.plates, &self.entities);
        Ok(())
    }

    /// Take a partition's write lock. A partition deleted while we waited
    /// is reported as missing.
    pub(super) async fn write_fleet(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<FleetState>, EngineError> {
        let shared = self.require_fleet(id)?;
        let guard = shared.clone().write_owned().await;
        match self.state.get(id) {
            Some(current) if Arc::ptr_eq(current.value(), &shared) => Ok(guard),
            _ => Err(EngineError::not_found("vehicle type", id)),
        }
    }

    /// Lookup entity → vehicle type, then take that partition's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<FleetState>), EngineError> {
        let type_id = self
            .get_fleet_for_entity(entity_id)
            .ok_or_else(|| EngineError::not_found("record", entity_id))?;
        let guard = self.write_fleet(&type_id).await?;
        Ok((type_id, guard))
    }
}
