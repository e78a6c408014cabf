mod availability;
mod catalog;
mod compact;
mod conflict;
mod error;
mod lifecycle;
mod queries;
mod timeline;

pub use availability::{find_conflict, is_available, Conflict, RoomState};
pub use error::EngineError;
pub use timeline::StatusTimeline;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// committed together with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            pending = Some(other);
                            break;
                        }
                    }
                }
                commit_batch(&mut wal, batch);
                if let Some(cmd) = pending {
                    run_command(&mut wal, cmd);
                }
            }
            other => run_command(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so nothing half-buffered leaks into the next batch.
    let flushed = wal.flush_sync();
    let result = appended.and(flushed);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        error!("journal commit of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn run_command(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

/// Rooms whose state an event touches, in the order they should be notified.
fn event_room_ids(event: &Event) -> Vec<Ulid> {
    match event {
        Event::RoomAdded { room } | Event::RoomUpdated { room } => vec![room.id],
        Event::RoomRemoved { id } => vec![*id],
        Event::StatusRecorded { status } => vec![status.room_id],
        Event::ReservationModified {
            previous_room_id,
            reservation,
            ..
        } if *previous_room_id != reservation.room_id => {
            vec![*previous_room_id, reservation.room_id]
        }
        other => other
            .reservation()
            .map(|r| vec![r.room_id])
            .unwrap_or_default(),
    }
}

pub(crate) fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The hotel engine: rooms with their status timelines and reservations,
/// the guest directory, and the journal that makes them durable.
///
/// Each room's state sits behind its own lock. Lifecycle operations hold the
/// write lock of every room they touch from the availability check through
/// the journal append, so no two overlapping bookings can both pass the check.
pub struct Engine {
    rooms: DashMap<Ulid, SharedRoomState>,
    guests: DashMap<Ulid, Guest>,
    room_numbers: DashMap<String, Ulid>,
    guest_emails: DashMap<String, Ulid>,
    guest_identities: DashMap<Identification, Ulid>,
    /// Reservation id → room currently holding it.
    reservation_rooms: DashMap<Ulid, Ulid>,
    reservation_numbers: DashMap<String, Ulid>,
    /// Shared by operations that rely on guest/room identity, exclusive for
    /// writers of it. Always taken before any room lock.
    directory: RwLock<()>,
    next_seq: AtomicU64,
    replayed: u64,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, Arc::new(SystemClock))
    }

    /// Replay the journal at `wal_path` and start its writer task. Must be
    /// called inside a tokio runtime.
    pub fn with_clock(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let (events, valid_len) = Wal::replay(&wal_path)?;
        let dropped = Wal::truncate_tail(&wal_path, valid_len)?;
        if dropped > 0 {
            warn!("journal had {dropped} unreadable trailing bytes, truncated to {valid_len}");
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            guests: DashMap::new(),
            room_numbers: DashMap::new(),
            guest_emails: DashMap::new(),
            guest_identities: DashMap::new(),
            reservation_rooms: DashMap::new(),
            reservation_numbers: DashMap::new(),
            directory: RwLock::new(()),
            next_seq: AtomicU64::new(1),
            replayed: events.len() as u64,
            wal_tx,
            notify,
            clock,
        };

        // Rebuild room states unlocked, then publish them.
        let mut rooms: HashMap<Ulid, RoomState> = HashMap::new();
        for event in &events {
            match event {
                Event::RoomAdded { room } => {
                    engine.room_numbers.insert(room.number.clone(), room.id);
                    rooms.insert(room.id, RoomState::new(room.clone()));
                }
                Event::RoomRemoved { id } => {
                    if let Some(mut rs) = rooms.remove(id) {
                        engine.apply_to_room(&mut rs, event);
                    }
                }
                Event::GuestRegistered { .. }
                | Event::GuestUpdated { .. }
                | Event::GuestRemoved { .. } => engine.apply_guest_event(event),
                other => {
                    for room_id in event_room_ids(other) {
                        if let Some(rs) = rooms.get_mut(&room_id) {
                            engine.apply_to_room(rs, other);
                        }
                    }
                }
            }
        }
        for (id, rs) in rooms {
            engine.rooms.insert(id, Arc::new(RwLock::new(rs)));
        }

        metrics::gauge!(observability::ROOMS_TOTAL).set(engine.rooms.len() as f64);
        if !events.is_empty() {
            info!(
                "replayed {} journal events: {} rooms, {} guests, {} reservations",
                events.len(),
                engine.rooms.len(),
                engine.guests.len(),
                engine.reservation_rooms.len()
            );
        }
        Ok(engine)
    }

    /// Number of journal records read at startup.
    pub fn replayed_events(&self) -> u64 {
        self.replayed
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    // ── Journal ──────────────────────────────────────────

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Cancelled)?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Journal a room-scoped event, then apply it to every locked room it
    /// touches and notify subscribers. Nothing is applied if the append fails.
    async fn commit(&self, event: &Event, rooms: &mut [&mut RoomState]) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        for rs in rooms.iter_mut() {
            self.apply_to_room(rs, event);
        }
        self.after_commit(event);
        Ok(())
    }

    /// Journal and apply a directory event (new room, guest changes).
    async fn commit_directory(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        match event {
            Event::RoomAdded { room } => {
                self.room_numbers.insert(room.number.clone(), room.id);
                self.rooms
                    .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                metrics::gauge!(observability::ROOMS_TOTAL).set(self.rooms.len() as f64);
            }
            other => self.apply_guest_event(other),
        }
        self.after_commit(event);
        Ok(())
    }

    fn after_commit(&self, event: &Event) {
        metrics::counter!(observability::JOURNAL_EVENTS_TOTAL, "event" => event.label())
            .increment(1);
        self.notify.publish(&event_room_ids(event), event);
    }

    // ── State application (shared by live commits and replay) ──

    fn apply_to_room(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::RoomUpdated { room } => {
                if rs.room.number != room.number {
                    self.room_numbers.remove(&rs.room.number);
                    self.room_numbers.insert(room.number.clone(), room.id);
                }
                rs.room = room.clone();
            }
            Event::RoomRemoved { id } => {
                self.room_numbers.remove_if(&rs.room.number, |_, owner| owner == id);
                for reservation in rs.reservations.drain(..) {
                    self.reservation_rooms.remove(&reservation.id);
                    self.reservation_numbers.remove(&reservation.number);
                }
                self.rooms.remove(id);
                metrics::gauge!(observability::ROOMS_TOTAL).set(self.rooms.len() as f64);
            }
            Event::ReservationModified {
                previous_room_id,
                reservation,
                ..
            } if rs.room.id != reservation.room_id => {
                if rs.room.id == *previous_room_id {
                    rs.remove_reservation(reservation.id);
                }
            }
            other => {
                if let Some(reservation) = other.reservation() {
                    self.reservation_rooms.insert(reservation.id, reservation.room_id);
                    self.reservation_numbers
                        .insert(reservation.number.clone(), reservation.id);
                    rs.upsert_reservation(reservation.clone());
                }
                if let Some(status) = other.status_event() {
                    self.next_seq.fetch_max(status.seq + 1, Ordering::SeqCst);
                    rs.timeline.record(status.clone());
                }
            }
        }
    }

    fn apply_guest_event(&self, event: &Event) {
        match event {
            Event::GuestRegistered { guest } | Event::GuestUpdated { guest } => {
                if let Some(old) = self.guests.get(&guest.id).map(|g| g.clone()) {
                    self.unindex_guest(&old);
                }
                if let Some(email) = &guest.email {
                    self.guest_emails.insert(email_key(email), guest.id);
                }
                self.guest_identities
                    .insert(guest.identification.clone(), guest.id);
                self.guests.insert(guest.id, guest.clone());
            }
            Event::GuestRemoved { id } => {
                if let Some((_, old)) = self.guests.remove(id) {
                    self.unindex_guest(&old);
                }
            }
            _ => {}
        }
    }

    fn unindex_guest(&self, guest: &Guest) {
        if let Some(email) = &guest.email {
            self.guest_emails
                .remove_if(&email_key(email), |_, id| *id == guest.id);
        }
        self.guest_identities
            .remove_if(&guest.identification, |_, id| *id == guest.id);
    }

    // ── Helpers ──────────────────────────────────────────

    /// A status event with the next sequence number. Call while holding the
    /// room's write lock so sequence order matches commit order per room.
    fn stamp_status(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        status: RoomStatus,
        note: String,
        actor: Option<String>,
    ) -> StatusEvent {
        StatusEvent {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            room_id,
            date,
            status,
            note: Some(note),
            actor,
        }
    }

    fn room_cell(&self, room_id: &Ulid) -> Result<SharedRoomState, EngineError> {
        self.rooms
            .get(room_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*room_id))
    }

    /// Snapshot of room cells, so no map shard is held across an await.
    fn room_cells(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    fn reservation_room(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_rooms.get(reservation_id).map(|e| *e.value())
    }

    /// Write-lock the room holding a reservation. Follows the reservation if a
    /// concurrent modification moves it while we wait for the lock.
    async fn lock_reservation(
        &self,
        reservation_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        loop {
            let room_id = self
                .reservation_room(&reservation_id)
                .ok_or(EngineError::NotFound(reservation_id))?;
            let guard = self.room_cell(&room_id)?.write_owned().await;
            if guard.reservation(reservation_id).is_some() {
                return Ok(guard);
            }
            if self.reservation_room(&reservation_id) == Some(room_id) {
                return Err(EngineError::NotFound(reservation_id));
            }
        }
    }
}
