use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::RoomState;
use super::conflict::{
    ensure_available, ensure_timeline_capacity, validate_guest_count, validate_stay, validate_text,
};
use super::{Engine, EngineError};

const PRICE_OVERFLOW: EngineError = EngineError::LimitExceeded("stay price overflows");

/// Rooms locked for a modification: the one currently holding the reservation
/// and, when it moves, the target.
struct MoveLocks {
    current: OwnedRwLockWriteGuard<RoomState>,
    target: Option<OwnedRwLockWriteGuard<RoomState>>,
}

impl MoveLocks {
    fn target(&self) -> &RoomState {
        self.target.as_deref().unwrap_or(&*self.current)
    }
}

impl Engine {
    /// Book a room. The availability check and the journal write happen under
    /// the room's write lock, so concurrent overlapping requests cannot both
    /// succeed.
    pub async fn create_reservation(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        validate_stay(req.check_in, req.check_out)?;
        validate_text(req.notes.as_deref(), MAX_NOTE_LEN, "notes too long")?;

        let _directory = self.directory.read().await;
        if !self.guests.contains_key(&req.guest_id) {
            return Err(EngineError::NotFound(req.guest_id));
        }
        let cell = self.room_cell(&req.room_id)?;
        let mut guard = cell.write().await;
        validate_guest_count(req.guest_count, guard.room.capacity)?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }
        ensure_timeline_capacity(&guard)?;

        ensure_available(&guard, req.check_in, req.check_out, None)?;

        let stay = Stay::new(req.check_in, req.check_out);
        let total_price = guard.room.price_for(&stay).ok_or(PRICE_OVERFLOW)?;
        let now = self.clock.now();
        let number = self.fresh_reservation_number(now);
        let reservation = Reservation {
            id: Ulid::new(),
            number: number.clone(),
            room_id: req.room_id,
            guest_id: req.guest_id,
            check_in: req.check_in,
            check_out: req.check_out,
            actual_check_in: None,
            actual_check_out: None,
            total_price,
            deposit: None,
            paid: false,
            status: ReservationStatus::Confirmed,
            guest_count: req.guest_count,
            notes: req.notes,
            created_at: now,
            created_by: req.actor.clone(),
            modified_at: None,
            modified_by: None,
        };
        let status = self.stamp_status(
            req.room_id,
            req.check_in,
            RoomStatus::Reserved,
            format!("Reserved via reservation #{number}"),
            req.actor,
        );
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
            status,
        };
        self.commit(&event, &mut [&mut *guard]).await?;

        info!(
            reservation = %reservation.number,
            room = %guard.room.number,
            check_in = %reservation.check_in,
            check_out = %reservation.check_out,
            total = %reservation.total_price,
            "reservation created"
        );
        Ok(reservation)
    }

    /// Change room, dates, guest count, or notes. When room or dates change,
    /// the new target is re-checked (ignoring this reservation) and the price
    /// recomputed from scratch. A Reserved status event is recorded at the
    /// resulting check-in date either way; earlier events stay in the history.
    pub async fn modify_reservation(
        &self,
        id: Ulid,
        change: ReservationChange,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        validate_stay(change.check_in, change.check_out)?;
        validate_text(change.notes.as_deref(), MAX_NOTE_LEN, "notes too long")?;

        let _directory = self.directory.read().await;
        let mut locks = self.lock_for_move(id, change.room_id).await?;
        let current = locks
            .current
            .reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        let mut updated = current.clone();
        if let Some(count) = change.guest_count {
            updated.guest_count = count;
        }
        let target = locks.target();
        validate_guest_count(updated.guest_count, target.room.capacity)?;
        ensure_timeline_capacity(target)?;

        let relocating = current.room_id != change.room_id
            || current.check_in != change.check_in
            || current.check_out != change.check_out;
        if relocating {
            if locks.target.is_some() && target.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
                return Err(EngineError::LimitExceeded("too many reservations on room"));
            }
            ensure_available(target, change.check_in, change.check_out, Some(id))?;
            updated.room_id = change.room_id;
            updated.check_in = change.check_in;
            updated.check_out = change.check_out;
            updated.total_price = target.room.price_for(&updated.stay()).ok_or(PRICE_OVERFLOW)?;
        }
        if let Some(notes) = change.notes {
            updated.notes = Some(notes);
        }
        updated.touch(self.clock.now(), actor.clone());

        let status = self.stamp_status(
            updated.room_id,
            updated.check_in,
            RoomStatus::Reserved,
            format!("Reserved via updated reservation #{}", updated.number),
            actor,
        );
        let event = Event::ReservationModified {
            previous_room_id: current.room_id,
            reservation: updated.clone(),
            status,
        };
        match locks.target.as_mut() {
            Some(target) => {
                self.commit(&event, &mut [&mut *locks.current, &mut **target])
                    .await?
            }
            None => self.commit(&event, &mut [&mut *locks.current]).await?,
        }

        info!(
            reservation = %updated.number,
            relocated = relocating,
            check_in = %updated.check_in,
            check_out = %updated.check_out,
            total = %updated.total_price,
            "reservation modified"
        );
        Ok(updated)
    }

    /// Cancel from any state. Records the room as Available from today.
    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let mut reservation = guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        ensure_timeline_capacity(&guard)?;
        let previous = reservation.status;

        reservation.status = ReservationStatus::Cancelled;
        reservation.touch(self.clock.now(), actor.clone());
        let status = self.stamp_status(
            reservation.room_id,
            self.clock.today(),
            RoomStatus::Available,
            format!("Reservation #{} cancelled", reservation.number),
            actor,
        );
        let event = Event::ReservationCancelled {
            reservation: reservation.clone(),
            status,
        };
        self.commit(&event, &mut [&mut *guard]).await?;

        info!(reservation = %reservation.number, from = %previous, "reservation cancelled");
        Ok(reservation)
    }

    /// Confirmed → CheckedIn; the room is Occupied from `actual_date`.
    pub async fn check_in(
        &self,
        id: Ulid,
        actual_date: NaiveDate,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let mut reservation = self.expect_status(&guard, id, ReservationStatus::Confirmed, "check in")?;
        ensure_timeline_capacity(&guard)?;

        reservation.status = ReservationStatus::CheckedIn;
        reservation.actual_check_in = Some(actual_date);
        reservation.touch(self.clock.now(), actor.clone());
        let status = self.stamp_status(
            reservation.room_id,
            actual_date,
            RoomStatus::Occupied,
            format!("Guest checked in for reservation #{}", reservation.number),
            actor,
        );
        let event = Event::GuestCheckedIn {
            reservation: reservation.clone(),
            status,
        };
        self.commit(&event, &mut [&mut *guard]).await?;

        info!(reservation = %reservation.number, room = %guard.room.number, date = %actual_date, "guest checked in");
        Ok(reservation)
    }

    /// CheckedIn → CheckedOut; the room needs cleaning from `actual_date`.
    pub async fn check_out(
        &self,
        id: Ulid,
        actual_date: NaiveDate,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let mut reservation = self.expect_status(&guard, id, ReservationStatus::CheckedIn, "check out")?;
        ensure_timeline_capacity(&guard)?;

        reservation.status = ReservationStatus::CheckedOut;
        reservation.actual_check_out = Some(actual_date);
        reservation.touch(self.clock.now(), actor.clone());
        let status = self.stamp_status(
            reservation.room_id,
            actual_date,
            RoomStatus::CleaningInProgress,
            format!("Guest checked out from reservation #{}", reservation.number),
            actor,
        );
        let event = Event::GuestCheckedOut {
            reservation: reservation.clone(),
            status,
        };
        self.commit(&event, &mut [&mut *guard]).await?;

        info!(reservation = %reservation.number, room = %guard.room.number, date = %actual_date, "guest checked out");
        Ok(reservation)
    }

    /// Push out the check-out date of an in-house guest. Only the added nights
    /// `[old_check_out + 1, new_check_out]` are re-checked; the room is
    /// already Occupied so no status event is written.
    pub async fn extend_stay(
        &self,
        id: Ulid,
        new_check_out: NaiveDate,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let mut reservation = self.expect_status(&guard, id, ReservationStatus::CheckedIn, "extend")?;

        let old_check_out = reservation.check_out;
        if new_check_out <= old_check_out {
            return Err(EngineError::Validation("new check-out must be after the current check-out"));
        }
        validate_stay(reservation.check_in, new_check_out)?;
        ensure_available(&guard, next_day(old_check_out), new_check_out, Some(id))?;

        let additional_nights = (new_check_out - old_check_out).num_days();
        let charge = guard
            .room
            .base_price
            .checked_mul(Decimal::from(additional_nights))
            .ok_or(PRICE_OVERFLOW)?;
        reservation.total_price = reservation
            .total_price
            .checked_add(charge)
            .ok_or(PRICE_OVERFLOW)?;
        reservation.check_out = new_check_out;
        reservation.touch(self.clock.now(), actor);
        let event = Event::StayExtended {
            reservation: reservation.clone(),
        };
        self.commit(&event, &mut [&mut *guard]).await?;

        info!(
            reservation = %reservation.number,
            nights = additional_nights,
            %charge,
            check_out = %new_check_out,
            "stay extended"
        );
        Ok(reservation)
    }

    /// Record a payment. Covering the total settles the reservation and
    /// stores the total as the captured amount; anything less is kept as a
    /// partial deposit.
    pub async fn mark_paid(
        &self,
        id: Ulid,
        amount: Money,
        actor: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.lock_reservation(id).await?;
        let mut reservation = guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        if amount >= reservation.total_price {
            reservation.paid = true;
            reservation.deposit = Some(reservation.total_price);
        } else {
            reservation.deposit = Some(amount);
        }
        reservation.touch(self.clock.now(), actor);
        let event = Event::PaymentRecorded {
            reservation: reservation.clone(),
        };
        self.commit(&event, &mut [&mut *guard]).await?;

        info!(reservation = %reservation.number, %amount, paid = reservation.paid, "payment recorded");
        Ok(reservation)
    }

    /// Manual status change (maintenance, housekeeping). Appends to the
    /// timeline; earlier entries are never altered.
    pub async fn record_status(
        &self,
        room_id: Ulid,
        status: RoomStatus,
        date: NaiveDate,
        note: Option<String>,
        actor: Option<String>,
    ) -> Result<StatusEvent, EngineError> {
        validate_text(note.as_deref(), MAX_NOTE_LEN, "note too long")?;
        let _directory = self.directory.read().await;
        let cell = self.room_cell(&room_id)?;
        let mut guard = cell.write().await;
        ensure_timeline_capacity(&guard)?;

        let mut event = self.stamp_status(room_id, date, status, String::new(), actor);
        event.note = note;
        let record = Event::StatusRecorded {
            status: event.clone(),
        };
        self.commit(&record, &mut [&mut *guard]).await?;

        info!(room = %guard.room.number, %status, %date, "room status recorded");
        Ok(event)
    }

    // ── Helpers ──────────────────────────────────────────

    /// Clone the reservation if it is in `required` state, else report an
    /// invalid transition without touching anything.
    fn expect_status(
        &self,
        rs: &RoomState,
        id: Ulid,
        required: ReservationStatus,
        action: &'static str,
    ) -> Result<Reservation, EngineError> {
        let reservation = rs.reservation(id).ok_or(EngineError::NotFound(id))?;
        if reservation.status != required {
            return Err(EngineError::InvalidTransition {
                reservation_id: id,
                status: reservation.status,
                action,
            });
        }
        Ok(reservation.clone())
    }

    fn fresh_reservation_number(&self, now: DateTime<Utc>) -> String {
        loop {
            let number = reservation_number(now, Ulid::new());
            if !self.reservation_numbers.contains_key(&number) {
                return number;
            }
        }
    }

    /// Lock the reservation's current room and, if different, the target room,
    /// in ascending id order. Retries if the reservation moves while waiting.
    async fn lock_for_move(&self, id: Ulid, target_room: Ulid) -> Result<MoveLocks, EngineError> {
        let target_cell = self.room_cell(&target_room)?;
        loop {
            let current_room = self
                .reservation_room(&id)
                .ok_or(EngineError::NotFound(id))?;
            let locks = if current_room == target_room {
                MoveLocks {
                    current: target_cell.clone().write_owned().await,
                    target: None,
                }
            } else {
                let current_cell = self.room_cell(&current_room)?;
                if current_room < target_room {
                    let current = current_cell.write_owned().await;
                    let target = target_cell.clone().write_owned().await;
                    MoveLocks { current, target: Some(target) }
                } else {
                    let target = target_cell.clone().write_owned().await;
                    let current = current_cell.write_owned().await;
                    MoveLocks { current, target: Some(target) }
                }
            };
            if locks.current.reservation(id).is_some() {
                return Ok(locks);
            }
            if self.reservation_room(&id) == Some(current_room) {
                return Err(EngineError::NotFound(id));
            }
        }
    }
}
