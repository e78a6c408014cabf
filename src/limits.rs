//! Hard caps on input sizes. Exceeding one yields `EngineError::LimitExceeded`.

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_GUESTS: usize = 1_000_000;
pub const MAX_ROOM_NUMBER_LEN: usize = 16;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_NOTE_LEN: usize = 1024;
pub const MAX_STAY_NIGHTS: i64 = 365;
pub const MAX_GUEST_COUNT: u32 = 64;
/// Highest nightly rate, in whole currency units.
pub const MAX_BASE_PRICE: i64 = 1_000_000;
/// Widest date range accepted by availability, revenue, and range queries.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3_660;
pub const MAX_STATUS_EVENTS_PER_ROOM: usize = 100_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;
/// Longest accepted protocol line in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
/// Largest journal record accepted on write or replay.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;
