use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::timeline::StatusTimeline;

/// A room's mutable state: its catalog entry, status timeline, and reservations.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub timeline: StatusTimeline,
    /// All reservations on this room, cancelled included, sorted by `check_in`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            timeline: StatusTimeline::new(),
            reservations: Vec::new(),
        }
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Replace by id, or insert, keeping `check_in` order.
    pub fn upsert_reservation(&mut self, reservation: Reservation) {
        self.remove_reservation(reservation.id);
        let pos = self
            .reservations
            .partition_point(|r| r.check_in <= reservation.check_in);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations (any status) whose stay overlaps `[from, to]` inclusively.
    pub fn overlapping(&self, from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = &Reservation> {
        // Everything past right_bound checks in after `to`.
        let right_bound = self.reservations.partition_point(|r| r.check_in <= to);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.check_out >= from)
    }
}

/// Why a window is unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// A maintenance or cleaning event lands inside the window.
    Blocked { seq: u64, status: RoomStatus, date: NaiveDate },
    /// A non-cancelled reservation overlaps the window.
    Booked { reservation_id: Ulid },
}

/// First reason `[from, to]` cannot be booked on this room, if any.
///
/// 1. Any maintenance/cleaning event dated inside the window vetoes it.
/// 2. Any non-cancelled reservation with `check_in <= to && check_out >= from`
///    conflicts, so a stay ending on `from` blocks it.
///
/// `exclude` skips one reservation, used when re-checking a reservation's own
/// new dates.
pub fn find_conflict(
    rs: &RoomState,
    from: NaiveDate,
    to: NaiveDate,
    exclude: Option<Ulid>,
) -> Option<Conflict> {
    if let Some(e) = rs.timeline.blocked_within(from, to) {
        return Some(Conflict::Blocked {
            seq: e.seq,
            status: e.status,
            date: e.date,
        });
    }
    rs.overlapping(from, to)
        .find(|r| r.holds_room() && Some(r.id) != exclude)
        .map(|r| Conflict::Booked { reservation_id: r.id })
}

pub fn is_available(rs: &RoomState, from: NaiveDate, to: NaiveDate) -> bool {
    find_conflict(rs, from, to, None).is_none()
}
