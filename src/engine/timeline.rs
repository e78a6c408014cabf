use chrono::NaiveDate;

use crate::model::{RoomStatus, StatusEvent};

/// Append-only status history of one room, kept sorted by `(date, seq)`.
///
/// A room with no event on or before a date is `Available` on that date.
#[derive(Debug, Clone, Default)]
pub struct StatusTimeline {
    events: Vec<StatusEvent>,
}

impl StatusTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping `(date, seq)` order. Earlier events are never touched.
    pub fn record(&mut self, event: StatusEvent) {
        let key = (event.date, event.seq);
        let pos = self.events.partition_point(|e| (e.date, e.seq) <= key);
        self.events.insert(pos, event);
    }

    /// The authoritative event for `date`: latest effective date not after
    /// `date`, highest sequence among ties.
    pub fn effective_on(&self, date: NaiveDate) -> Option<&StatusEvent> {
        let idx = self.events.partition_point(|e| e.date <= date);
        idx.checked_sub(1).map(|i| &self.events[i])
    }

    pub fn status_as_of(&self, date: NaiveDate) -> RoomStatus {
        self.effective_on(date)
            .map_or(RoomStatus::Available, |e| e.status)
    }

    /// Events whose effective date falls in `[from, to]`.
    pub fn within(&self, from: NaiveDate, to: NaiveDate) -> &[StatusEvent] {
        let lo = self.events.partition_point(|e| e.date < from);
        let hi = self.events.partition_point(|e| e.date <= to);
        if lo >= hi { &[] } else { &self.events[lo..hi] }
    }

    /// First maintenance or cleaning event landing in `[from, to]`.
    pub fn blocked_within(&self, from: NaiveDate, to: NaiveDate) -> Option<&StatusEvent> {
        self.within(from, to)
            .iter()
            .find(|e| e.status.blocks_booking())
    }

    pub fn events(&self) -> &[StatusEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn ev(seq: u64, date: NaiveDate, status: RoomStatus) -> StatusEvent {
        StatusEvent {
            seq,
            room_id: Ulid::nil(),
            date,
            status,
            note: None,
            actor: None,
        }
    }

    #[test]
    fn empty_history_is_available() {
        let t = StatusTimeline::new();
        assert_eq!(t.status_as_of(d(1, 1)), RoomStatus::Available);
        assert_eq!(t.status_as_of(NaiveDate::MAX), RoomStatus::Available);
        assert!(t.effective_on(d(6, 1)).is_none());
    }

    #[test]
    fn latest_event_at_or_before_wins() {
        let mut t = StatusTimeline::new();
        t.record(ev(1, d(1, 10), RoomStatus::Reserved));
        t.record(ev(2, d(1, 12), RoomStatus::Occupied));
        t.record(ev(3, d(1, 15), RoomStatus::CleaningInProgress));

        assert_eq!(t.status_as_of(d(1, 9)), RoomStatus::Available);
        assert_eq!(t.status_as_of(d(1, 10)), RoomStatus::Reserved);
        assert_eq!(t.status_as_of(d(1, 11)), RoomStatus::Reserved);
        assert_eq!(t.status_as_of(d(1, 14)), RoomStatus::Occupied);
        assert_eq!(t.status_as_of(d(1, 15)), RoomStatus::CleaningInProgress);
        assert_eq!(t.status_as_of(d(12, 31)), RoomStatus::CleaningInProgress);
    }

    #[test]
    fn insertion_out_of_date_order() {
        let mut t = StatusTimeline::new();
        t.record(ev(1, d(3, 1), RoomStatus::Occupied));
        t.record(ev(2, d(1, 1), RoomStatus::UnderMaintenance)); // backdated
        assert_eq!(t.status_as_of(d(2, 1)), RoomStatus::UnderMaintenance);
        assert_eq!(t.status_as_of(d(3, 1)), RoomStatus::Occupied);
        let dates: Vec<_> = t.events().iter().map(|e| e.date).collect();
        assert_eq!(dates, vec![d(1, 1), d(3, 1)]);
    }

    #[test]
    fn same_date_highest_sequence_wins() {
        let mut t = StatusTimeline::new();
        t.record(ev(5, d(1, 10), RoomStatus::Reserved));
        t.record(ev(9, d(1, 10), RoomStatus::Available));
        assert_eq!(t.status_as_of(d(1, 10)), RoomStatus::Available);

        // A replayed lower sequence does not override.
        t.record(ev(7, d(1, 10), RoomStatus::Occupied));
        assert_eq!(t.status_as_of(d(1, 10)), RoomStatus::Available);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn within_is_inclusive() {
        let mut t = StatusTimeline::new();
        t.record(ev(1, d(1, 5), RoomStatus::Reserved));
        t.record(ev(2, d(1, 10), RoomStatus::UnderMaintenance));
        t.record(ev(3, d(1, 20), RoomStatus::Available));

        assert_eq!(t.within(d(1, 10), d(1, 20)).len(), 2);
        assert_eq!(t.within(d(1, 6), d(1, 9)).len(), 0);
        assert!(t.within(d(1, 20), d(1, 1)).is_empty()); // inverted window
    }

    #[test]
    fn blocked_within_only_maintenance_or_cleaning() {
        let mut t = StatusTimeline::new();
        t.record(ev(1, d(1, 5), RoomStatus::Reserved));
        t.record(ev(2, d(1, 6), RoomStatus::Occupied));
        assert!(t.blocked_within(d(1, 1), d(1, 31)).is_none());

        t.record(ev(3, d(1, 15), RoomStatus::CleaningInProgress));
        assert_eq!(t.blocked_within(d(1, 1), d(1, 31)).map(|e| e.seq), Some(3));
        assert!(t.blocked_within(d(1, 16), d(1, 31)).is_none());
        assert!(t.blocked_within(d(1, 15), d(1, 15)).is_some());
    }
}
