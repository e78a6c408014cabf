use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;

use super::availability::{find_conflict, Conflict, RoomState};
use super::EngineError;

/// A bookable stay: check-out strictly after check-in, bounded length.
pub(crate) fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<(), EngineError> {
    if check_out <= check_in {
        return Err(EngineError::Validation("check-out must be after check-in"));
    }
    if (check_out - check_in).num_days() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// A query window `[from, to]`; single-day windows are allowed.
pub(crate) fn validate_window(from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
    if to < from {
        return Err(EngineError::Validation("window end precedes its start"));
    }
    if (to - from).num_days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Room can take one more status event.
pub(crate) fn ensure_timeline_capacity(rs: &RoomState) -> Result<(), EngineError> {
    if rs.timeline.len() >= MAX_STATUS_EVENTS_PER_ROOM {
        return Err(EngineError::LimitExceeded("too many status events on room"));
    }
    Ok(())
}

pub(crate) fn validate_text(
    text: Option<&str>,
    max: usize,
    msg: &'static str,
) -> Result<(), EngineError> {
    match text {
        Some(t) if t.len() > max => Err(EngineError::LimitExceeded(msg)),
        _ => Ok(()),
    }
}

pub(crate) fn validate_guest_count(count: u32, capacity: u32) -> Result<(), EngineError> {
    if count == 0 {
        return Err(EngineError::Validation("guest count must be at least 1"));
    }
    if count > MAX_GUEST_COUNT {
        return Err(EngineError::LimitExceeded("guest count too large"));
    }
    if count > capacity {
        return Err(EngineError::Validation("guest count exceeds room capacity"));
    }
    Ok(())
}

/// Fail with `RoomUnavailable` unless `[from, to]` is free on this room.
/// Caller holds the room's write lock through the subsequent commit.
pub(crate) fn ensure_available(
    rs: &RoomState,
    from: NaiveDate,
    to: NaiveDate,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(rs, from, to, exclude) {
        None => Ok(()),
        Some(conflict) => {
            match conflict {
                Conflict::Blocked { seq, status, date } => {
                    debug!(room = %rs.room.number, %from, %to, seq, %status, %date, "window blocked by status event")
                }
                Conflict::Booked { reservation_id } => {
                    debug!(room = %rs.room.number, %from, %to, %reservation_id, "window overlaps reservation")
                }
            }
            Err(EngineError::RoomUnavailable {
                room_id: rs.room.id,
                from,
                to,
            })
        }
    }
}
