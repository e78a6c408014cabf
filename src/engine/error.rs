use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::ReservationStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    RoomUnavailable {
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    /// Lifecycle operation not permitted from the reservation's current state.
    /// Nothing was changed.
    InvalidTransition {
        reservation_id: Ulid,
        status: ReservationStatus,
        action: &'static str,
    },
    DuplicateIdentity(String),
    Validation(&'static str),
    LimitExceeded(&'static str),
    /// The journal writer went away before acknowledging; nothing was applied.
    Cancelled,
    WalError(String),
}

impl EngineError {
    /// Stable label for protocol responses and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::RoomUnavailable { .. } => "room_unavailable",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::DuplicateIdentity(_) => "duplicate_identity",
            EngineError::Validation(_) => "validation",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Cancelled => "cancelled",
            EngineError::WalError(_) => "wal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::RoomUnavailable { room_id, from, to } => {
                write!(f, "room {room_id} is not available from {from} to {to}")
            }
            EngineError::InvalidTransition {
                reservation_id,
                status,
                action,
            } => write!(
                f,
                "cannot {action} reservation {reservation_id} in state {status}"
            ),
            EngineError::DuplicateIdentity(what) => write!(f, "already exists: {what}"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Cancelled => write!(f, "operation cancelled before commit"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
