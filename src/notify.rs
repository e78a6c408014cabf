use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Push side of the engine: committed events fanned out per room, plus a
/// house-wide feed. Lagging receivers lose old events, never block writers.
pub struct NotifyHub {
    rooms: DashMap<Ulid, broadcast::Sender<Event>>,
    house: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            house: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Events touching one room. Creates the channel on first use.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Every committed event.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.house.subscribe()
    }

    /// Deliver to each listed room's channel and to the house feed.
    /// No-op when nobody listens.
    pub fn publish(&self, room_ids: &[Ulid], event: &Event) {
        for room_id in room_ids {
            if let Some(sender) = self.rooms.get(room_id) {
                let _ = sender.send(event.clone());
            }
        }
        let _ = self.house.send(event.clone());
    }
}
