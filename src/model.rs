use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Money amounts. Prices are per night, totals per stay.
pub type Money = Decimal;

/// Inclusive pair of calendar dates `[from, to]` used for availability windows
/// and stay intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self { check_in, check_out }
    }

    /// Calendar-day difference between check-out and check-in.
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// Inclusive on both ends: a stay ending on the day another begins conflicts.
    pub fn overlaps_inclusive(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.check_in <= to && self.check_out >= from
    }
}

/// Operational state of a room from an event's effective date onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Occupied,
    Reserved,
    UnderMaintenance,
    CleaningInProgress,
}

impl RoomStatus {
    pub const ALL: [RoomStatus; 5] = [
        RoomStatus::Available,
        RoomStatus::Occupied,
        RoomStatus::Reserved,
        RoomStatus::UnderMaintenance,
        RoomStatus::CleaningInProgress,
    ];

    /// Statuses that veto any booking window they land in.
    pub fn blocks_booking(self) -> bool {
        matches!(self, RoomStatus::UnderMaintenance | RoomStatus::CleaningInProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Available => "Available",
            RoomStatus::Occupied => "Occupied",
            RoomStatus::Reserved => "Reserved",
            RoomStatus::UnderMaintenance => "UnderMaintenance",
            RoomStatus::CleaningInProgress => "CleaningInProgress",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown room status: {s}"))
    }
}

/// Reservation lifecycle state.
///
/// Driven transitions: `Confirmed -> CheckedIn -> CheckedOut`, and any state
/// `-> Cancelled`. `Pending` and `NoShow` are recognised but no engine
/// operation moves a reservation into them; they only arrive through data
/// written by other tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::Confirmed => "Confirmed",
            ReservationStatus::CheckedIn => "CheckedIn",
            ReservationStatus::CheckedOut => "CheckedOut",
            ReservationStatus::Cancelled => "Cancelled",
            ReservationStatus::NoShow => "NoShow",
        }
    }

    /// Guest is expected or in house.
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Confirmed | ReservationStatus::CheckedIn)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomType {
    Single,
    Double,
    Twin,
    Suite,
    Deluxe,
    Presidential,
}

impl RoomType {
    pub fn name(self) -> &'static str {
        match self {
            RoomType::Single => "Single Room",
            RoomType::Double => "Double Room",
            RoomType::Twin => "Twin Room",
            RoomType::Suite => "Suite",
            RoomType::Deluxe => "Deluxe Room",
            RoomType::Presidential => "Presidential Suite",
        }
    }

    /// Rack rate used when a room is added without an explicit price.
    pub fn default_base_price(self) -> Money {
        match self {
            RoomType::Single => Decimal::new(9999, 2),
            RoomType::Double | RoomType::Twin => Decimal::new(14999, 2),
            RoomType::Suite => Decimal::new(29999, 2),
            RoomType::Deluxe => Decimal::new(19999, 2),
            RoomType::Presidential => Decimal::new(49999, 2),
        }
    }

    pub fn max_capacity(self) -> u32 {
        match self {
            RoomType::Single => 1,
            RoomType::Double | RoomType::Twin | RoomType::Deluxe => 2,
            RoomType::Suite => 4,
            RoomType::Presidential => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amenities {
    pub wifi: bool,
    pub minibar: bool,
    pub balcony: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub number: String,
    pub floor: i32,
    pub room_type: RoomType,
    pub base_price: Money,
    pub capacity: u32,
    #[serde(default)]
    pub amenities: Amenities,
    #[serde(default)]
    pub description: Option<String>,
}

impl Room {
    /// `base_price × nights` for the given stay, `None` on overflow.
    pub fn price_for(&self, stay: &Stay) -> Option<Money> {
        self.base_price.checked_mul(Decimal::from(stay.nights()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identification {
    pub kind: String,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub identification: Identification,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Guest {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// One entry of a room's status timeline. `seq` orders events that share an
/// effective date: the higher sequence is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub seq: u64,
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub status: RoomStatus,
    pub note: Option<String>,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub number: String,
    pub room_id: Ulid,
    pub guest_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub actual_check_in: Option<NaiveDate>,
    pub actual_check_out: Option<NaiveDate>,
    pub total_price: Money,
    pub deposit: Option<Money>,
    pub paid: bool,
    pub status: ReservationStatus,
    pub guest_count: u32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub modified_by: Option<String>,
}

impl Reservation {
    pub fn stay(&self) -> Stay {
        Stay::new(self.check_in, self.check_out)
    }

    pub fn nights(&self) -> i64 {
        self.stay().nights()
    }

    /// Cancelled reservations no longer hold the room.
    pub fn holds_room(&self) -> bool {
        self.status != ReservationStatus::Cancelled
    }

    pub(crate) fn touch(&mut self, at: DateTime<Utc>, actor: Option<String>) {
        self.modified_at = Some(at);
        self.modified_by = actor;
    }
}

/// Human-readable reference: `RES-YYYYMMDD-XXXXXXXX`, the suffix taken from the
/// random half of a fresh ULID.
pub fn reservation_number(created: DateTime<Utc>, entropy: Ulid) -> String {
    let suffix = (entropy.random() & 0xFFFF_FFFF) as u32;
    format!("RES-{}-{suffix:08X}", created.format("%Y%m%d"))
}

/// The day after `date`, saturating at the calendar's end.
pub fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(date)
}

/// Journal record. Each lifecycle event carries the full post-state of the
/// reservation plus the status event it derives, so both land in one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomAdded {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    /// The room and its history are dropped; only cancelled reservations
    /// can still be on it.
    RoomRemoved {
        id: Ulid,
    },
    GuestRegistered {
        guest: Guest,
    },
    GuestUpdated {
        guest: Guest,
    },
    GuestRemoved {
        id: Ulid,
    },
    StatusRecorded {
        status: StatusEvent,
    },
    ReservationCreated {
        reservation: Reservation,
        status: StatusEvent,
    },
    ReservationModified {
        previous_room_id: Ulid,
        reservation: Reservation,
        status: StatusEvent,
    },
    ReservationCancelled {
        reservation: Reservation,
        status: StatusEvent,
    },
    GuestCheckedIn {
        reservation: Reservation,
        status: StatusEvent,
    },
    GuestCheckedOut {
        reservation: Reservation,
        status: StatusEvent,
    },
    StayExtended {
        reservation: Reservation,
    },
    PaymentRecorded {
        reservation: Reservation,
    },
    /// Compaction output: a reservation restored as-is, with no side effects.
    ReservationRestored {
        reservation: Reservation,
    },
}

impl Event {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Event::RoomAdded { .. } => "room_added",
            Event::RoomUpdated { .. } => "room_updated",
            Event::RoomRemoved { .. } => "room_removed",
            Event::GuestRegistered { .. } => "guest_registered",
            Event::GuestUpdated { .. } => "guest_updated",
            Event::GuestRemoved { .. } => "guest_removed",
            Event::StatusRecorded { .. } => "status_recorded",
            Event::ReservationCreated { .. } => "reservation_created",
            Event::ReservationModified { .. } => "reservation_modified",
            Event::ReservationCancelled { .. } => "reservation_cancelled",
            Event::GuestCheckedIn { .. } => "checked_in",
            Event::GuestCheckedOut { .. } => "checked_out",
            Event::StayExtended { .. } => "stay_extended",
            Event::PaymentRecorded { .. } => "payment_recorded",
            Event::ReservationRestored { .. } => "reservation_restored",
        }
    }

    /// Status event derived by this record, if any.
    pub fn status_event(&self) -> Option<&StatusEvent> {
        match self {
            Event::StatusRecorded { status }
            | Event::ReservationCreated { status, .. }
            | Event::ReservationModified { status, .. }
            | Event::ReservationCancelled { status, .. }
            | Event::GuestCheckedIn { status, .. }
            | Event::GuestCheckedOut { status, .. } => Some(status),
            _ => None,
        }
    }

    pub fn reservation(&self) -> Option<&Reservation> {
        match self {
            Event::ReservationCreated { reservation, .. }
            | Event::ReservationModified { reservation, .. }
            | Event::ReservationCancelled { reservation, .. }
            | Event::GuestCheckedIn { reservation, .. }
            | Event::GuestCheckedOut { reservation, .. }
            | Event::StayExtended { reservation }
            | Event::PaymentRecorded { reservation }
            | Event::ReservationRestored { reservation } => Some(reservation),
            _ => None,
        }
    }
}

// ── Input types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRoom {
    pub number: String,
    #[serde(default)]
    pub floor: i32,
    pub room_type: RoomType,
    /// Defaults to the room type's rack rate.
    #[serde(default)]
    pub base_price: Option<Money>,
    /// Defaults to the room type's max capacity.
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub amenities: Amenities,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGuest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub identification: Identification,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReservation {
    pub room_id: Ulid,
    pub guest_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest_count: u32,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

/// Target state for `modify_reservation`. Room and dates are always given;
/// guest count and notes are kept when `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationChange {
    pub room_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[serde(default)]
    pub guest_count: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}
