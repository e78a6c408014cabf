use tokio::sync::oneshot;
use tracing::info;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Rewrite the journal with just enough events to rebuild current state:
    /// every room, every guest, each room's full status history (sequence
    /// numbers kept), and each reservation as it stands now.
    ///
    /// Holds the directory exclusively and every room's read lock, so no
    /// commit lands between the snapshot and the swap. Returns the number of
    /// events written.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _directory = self.directory.write().await;

        let mut cells: Vec<_> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        cells.sort_by_key(|(id, _)| *id);
        let mut guards = Vec::with_capacity(cells.len());
        for (_, cell) in &cells {
            guards.push(cell.read().await);
        }

        let mut events: Vec<Event> = guards
            .iter()
            .map(|rs| Event::RoomAdded {
                room: rs.room.clone(),
            })
            .collect();

        let mut guests: Vec<Guest> = self.guests.iter().map(|g| g.value().clone()).collect();
        guests.sort_by_key(|g| g.id);
        events.extend(guests.into_iter().map(|guest| Event::GuestRegistered { guest }));

        for rs in &guards {
            events.extend(rs.timeline.events().iter().map(|status| Event::StatusRecorded {
                status: status.clone(),
            }));
        }
        for rs in &guards {
            events.extend(rs.reservations.iter().map(|reservation| {
                Event::ReservationRestored {
                    reservation: reservation.clone(),
                }
            }));
        }

        let written = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Cancelled)?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        info!("journal compacted to {written} events");
        Ok(written)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
