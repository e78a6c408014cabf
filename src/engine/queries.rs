use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::*;

use super::availability::{is_available, RoomState};
use super::conflict::validate_window;
use super::{email_key, Engine, EngineError};

fn by_number(rooms: &mut [Room]) {
    rooms.sort_by(|a, b| a.number.cmp(&b.number));
}

fn by_check_in(reservations: &mut [Reservation]) {
    reservations.sort_by(|a, b| (a.check_in, &a.number).cmp(&(b.check_in, &b.number)));
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

impl Engine {
    /// Read every room under its own read lock and keep what `f` returns.
    async fn scan_rooms<T>(&self, mut f: impl FnMut(&RoomState) -> Option<T>) -> Vec<T> {
        let mut out = Vec::new();
        for cell in self.room_cells() {
            let guard = cell.read().await;
            if let Some(item) = f(&guard) {
                out.push(item);
            }
        }
        out
    }

    async fn scan_reservations(&self, mut keep: impl FnMut(&Reservation) -> bool) -> Vec<Reservation> {
        let mut out = Vec::new();
        for cell in self.room_cells() {
            let guard = cell.read().await;
            out.extend(guard.reservations.iter().filter(|r| keep(r)).cloned());
        }
        by_check_in(&mut out);
        out
    }

    // ── Status timeline ──────────────────────────────────

    /// Effective status of a room on `date`. Available when nothing was
    /// ever recorded on or before it.
    pub async fn status_as_of(&self, room_id: Ulid, date: NaiveDate) -> Result<RoomStatus, EngineError> {
        let cell = self.room_cell(&room_id)?;
        let guard = cell.read().await;
        Ok(guard.timeline.status_as_of(date))
    }

    pub async fn status_history(&self, room_id: Ulid) -> Result<Vec<StatusEvent>, EngineError> {
        let cell = self.room_cell(&room_id)?;
        let guard = cell.read().await;
        Ok(guard.timeline.events().to_vec())
    }

    // ── Availability ─────────────────────────────────────

    pub async fn is_room_available(
        &self,
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<bool, EngineError> {
        validate_window(from, to)?;
        let cell = self.room_cell(&room_id)?;
        let guard = cell.read().await;
        Ok(is_available(&guard, from, to))
    }

    /// Rooms bookable for the whole of `[from, to]`, by room number.
    pub async fn available_rooms(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Room>, EngineError> {
        validate_window(from, to)?;
        let mut rooms = self
            .scan_rooms(|rs| is_available(rs, from, to).then(|| rs.room.clone()))
            .await;
        by_number(&mut rooms);
        Ok(rooms)
    }

    pub async fn rooms_by_status(&self, date: NaiveDate, status: RoomStatus) -> Vec<Room> {
        let mut rooms = self
            .scan_rooms(|rs| (rs.timeline.status_as_of(date) == status).then(|| rs.room.clone()))
            .await;
        by_number(&mut rooms);
        rooms
    }

    /// Count of rooms per effective status on `date`. Statuses no room is in
    /// are absent.
    pub async fn room_status_summary(&self, date: NaiveDate) -> BTreeMap<RoomStatus, usize> {
        let mut summary = BTreeMap::new();
        for status in self.scan_rooms(|rs| Some(rs.timeline.status_as_of(date))).await {
            *summary.entry(status).or_insert(0) += 1;
        }
        summary
    }

    /// Settled revenue: checked-out, paid reservations whose actual
    /// check-out falls in `[start, end]`.
    pub async fn revenue_for_period(&self, start: NaiveDate, end: NaiveDate) -> Result<Money, EngineError> {
        validate_window(start, end)?;
        let totals = self
            .scan_reservations(|r| {
                r.status == ReservationStatus::CheckedOut
                    && r.paid
                    && r.actual_check_out.is_some_and(|d| start <= d && d <= end)
            })
            .await;
        totals
            .iter()
            .try_fold(Decimal::ZERO, |sum, r| sum.checked_add(r.total_price))
            .ok_or(EngineError::LimitExceeded("revenue total overflows"))
    }

    // ── Rooms ────────────────────────────────────────────

    pub async fn get_room(&self, room_id: Ulid) -> Option<Room> {
        let cell = self.room_cell(&room_id).ok()?;
        let guard = cell.read().await;
        Some(guard.room.clone())
    }

    pub async fn room_by_number(&self, number: &str) -> Option<Room> {
        let id = *self.room_numbers.get(number.trim())?;
        self.get_room(id).await
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = self.scan_rooms(|rs| Some(rs.room.clone())).await;
        by_number(&mut rooms);
        rooms
    }

    pub async fn rooms_by_type(&self, room_type: RoomType) -> Vec<Room> {
        let mut rooms = self
            .scan_rooms(|rs| (rs.room.room_type == room_type).then(|| rs.room.clone()))
            .await;
        by_number(&mut rooms);
        rooms
    }

    /// Case-insensitive match on number, description, or type name.
    pub async fn search_rooms(&self, term: &str) -> Vec<Room> {
        let needle = term.trim().to_lowercase();
        let mut rooms = self
            .scan_rooms(|rs| {
                let room = &rs.room;
                let hit = needle.is_empty()
                    || contains_ci(&room.number, &needle)
                    || contains_ci(room.room_type.name(), &needle)
                    || room
                        .description
                        .as_deref()
                        .is_some_and(|d| contains_ci(d, &needle));
                hit.then(|| room.clone())
            })
            .await;
        by_number(&mut rooms);
        rooms
    }

    // ── Guests ───────────────────────────────────────────

    pub fn get_guest(&self, id: Ulid) -> Option<Guest> {
        self.guests.get(&id).map(|g| g.clone())
    }

    pub fn guest_by_email(&self, email: &str) -> Option<Guest> {
        let id = *self.guest_emails.get(&email_key(email))?;
        self.get_guest(id)
    }

    pub fn guest_by_identification(&self, identification: &Identification) -> Option<Guest> {
        let key = Identification {
            kind: identification.kind.trim().to_string(),
            number: identification.number.trim().to_string(),
        };
        let id = *self.guest_identities.get(&key)?;
        self.get_guest(id)
    }

    /// All guests ordered by last name, then first name.
    pub fn list_guests(&self) -> Vec<Guest> {
        let mut guests: Vec<Guest> = self.guests.iter().map(|g| g.value().clone()).collect();
        guests.sort_by(|a, b| {
            (&a.last_name, &a.first_name, a.id).cmp(&(&b.last_name, &b.first_name, b.id))
        });
        guests
    }

    /// Case-insensitive match on name, email, phone, or identification number.
    pub fn search_guests(&self, term: &str) -> Vec<Guest> {
        let needle = term.trim().to_lowercase();
        self.list_guests()
            .into_iter()
            .filter(|g| {
                needle.is_empty()
                    || contains_ci(&g.full_name(), &needle)
                    || g.email.as_deref().is_some_and(|e| contains_ci(e, &needle))
                    || g.phone.as_deref().is_some_and(|p| contains_ci(p, &needle))
                    || contains_ci(&g.identification.number, &needle)
            })
            .collect()
    }

    // ── Reservations ─────────────────────────────────────

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        // The index may briefly point at the old room during a move; the
        // retry picks up the new location.
        for _ in 0..2 {
            let room_id = self.reservation_room(&id)?;
            let cell = self.room_cell(&room_id).ok()?;
            let guard = cell.read().await;
            if let Some(r) = guard.reservation(id) {
                return Some(r.clone());
            }
        }
        None
    }

    pub async fn reservation_by_number(&self, number: &str) -> Option<Reservation> {
        let id = *self.reservation_numbers.get(number.trim())?;
        self.get_reservation(id).await
    }

    pub async fn reservations_by_room(&self, room_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let cell = self.room_cell(&room_id)?;
        let guard = cell.read().await;
        Ok(guard.reservations.clone())
    }

    pub async fn reservations_by_guest(&self, guest_id: Ulid) -> Vec<Reservation> {
        self.scan_reservations(|r| r.guest_id == guest_id).await
    }

    pub async fn reservations_by_status(&self, status: ReservationStatus) -> Vec<Reservation> {
        self.scan_reservations(|r| r.status == status).await
    }

    /// Reservations overlapping `[start, end]` inclusively, ignoring
    /// cancelled and no-show ones.
    pub async fn reservations_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        validate_window(start, end)?;
        Ok(self
            .scan_reservations(|r| {
                !matches!(r.status, ReservationStatus::Cancelled | ReservationStatus::NoShow)
                    && r.stay().overlaps_inclusive(start, end)
            })
            .await)
    }

    /// Confirmed arrivals due on `date`.
    pub async fn check_ins_for_date(&self, date: NaiveDate) -> Vec<Reservation> {
        self.scan_reservations(|r| r.status == ReservationStatus::Confirmed && r.check_in == date)
            .await
    }

    /// In-house guests due to leave on `date`.
    pub async fn check_outs_for_date(&self, date: NaiveDate) -> Vec<Reservation> {
        self.scan_reservations(|r| r.status == ReservationStatus::CheckedIn && r.check_out == date)
            .await
    }

    pub async fn list_reservations(&self) -> Vec<Reservation> {
        self.scan_reservations(|_| true).await
    }
}
