use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_text;
use super::{email_key, Engine, EngineError};

fn validate_room(number: &str, base_price: Money, capacity: u32) -> Result<(), EngineError> {
    if number.trim().is_empty() {
        return Err(EngineError::Validation("room number must not be empty"));
    }
    if number.len() > MAX_ROOM_NUMBER_LEN {
        return Err(EngineError::LimitExceeded("room number too long"));
    }
    if base_price <= Decimal::ZERO {
        return Err(EngineError::Validation("base price must be positive"));
    }
    if base_price > Decimal::from(MAX_BASE_PRICE) {
        return Err(EngineError::LimitExceeded("base price too large"));
    }
    if capacity == 0 {
        return Err(EngineError::Validation("capacity must be at least 1"));
    }
    if capacity > MAX_GUEST_COUNT {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    Ok(())
}

fn validate_guest(
    first_name: &str,
    last_name: &str,
    identification: &Identification,
    notes: Option<&str>,
) -> Result<(), EngineError> {
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(EngineError::Validation("guest name must not be empty"));
    }
    if first_name.len() > MAX_NAME_LEN || last_name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    if identification.number.trim().is_empty() {
        return Err(EngineError::Validation("identification number must not be empty"));
    }
    validate_text(Some(identification.number.as_str()), MAX_NAME_LEN, "identification too long")?;
    validate_text(notes, MAX_NOTE_LEN, "notes too long")
}

fn normalize_identification(identification: Identification) -> Identification {
    Identification {
        kind: identification.kind.trim().to_string(),
        number: identification.number.trim().to_string(),
    }
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────

    /// Register a room. Price and capacity default from the room type.
    pub async fn add_room(&self, new: NewRoom) -> Result<Room, EngineError> {
        let number = new.number.trim().to_string();
        let base_price = new
            .base_price
            .unwrap_or_else(|| new.room_type.default_base_price());
        let capacity = new.capacity.unwrap_or_else(|| new.room_type.max_capacity());
        validate_room(&number, base_price, capacity)?;
        validate_text(new.description.as_deref(), MAX_NOTE_LEN, "description too long")?;

        let _directory = self.directory.write().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.room_numbers.contains_key(&number) {
            return Err(EngineError::DuplicateIdentity(format!("room number {number}")));
        }

        let room = Room {
            id: Ulid::new(),
            number,
            floor: new.floor,
            room_type: new.room_type,
            base_price,
            capacity,
            amenities: new.amenities,
            description: new.description,
        };
        self.commit_directory(&Event::RoomAdded { room: room.clone() })
            .await?;

        info!(room = %room.number, room_type = room.room_type.name(), price = %room.base_price, "room added");
        Ok(room)
    }

    /// Replace a room's catalog entry. The id is the key; everything else may
    /// change. Existing reservations keep their agreed price.
    pub async fn update_room(&self, room: Room) -> Result<Room, EngineError> {
        let room = Room {
            number: room.number.trim().to_string(),
            ..room
        };
        validate_room(&room.number, room.base_price, room.capacity)?;
        validate_text(room.description.as_deref(), MAX_NOTE_LEN, "description too long")?;

        let _directory = self.directory.write().await;
        let cell = self.room_cell(&room.id)?;
        if let Some(owner) = self.room_numbers.get(&room.number)
            && *owner != room.id
        {
            return Err(EngineError::DuplicateIdentity(format!("room number {}", room.number)));
        }

        let mut guard = cell.write().await;
        let event = Event::RoomUpdated { room: room.clone() };
        self.commit(&event, &mut [&mut *guard]).await?;

        info!(room = %room.number, "room updated");
        Ok(room)
    }

    /// Drop a room together with its status history. Refused while any
    /// reservation other than a cancelled one is on it; cancelled ones go
    /// with the room.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _directory = self.directory.write().await;
        let cell = self.room_cell(&id)?;
        let mut guard = cell.write().await;
        if guard.reservations.iter().any(|r| r.holds_room()) {
            return Err(EngineError::Validation("room has reservations"));
        }

        let number = guard.room.number.clone();
        self.commit(&Event::RoomRemoved { id }, &mut [&mut *guard])
            .await?;

        info!(room = %number, "room deleted");
        Ok(())
    }

    // ── Guests ───────────────────────────────────────────

    pub async fn register_guest(&self, new: NewGuest) -> Result<Guest, EngineError> {
        let identification = normalize_identification(new.identification);
        validate_guest(&new.first_name, &new.last_name, &identification, new.notes.as_deref())?;
        let email = new.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());

        let _directory = self.directory.write().await;
        if self.guests.len() >= MAX_GUESTS {
            return Err(EngineError::LimitExceeded("too many guests"));
        }
        self.check_guest_identity(None, email.as_deref(), &identification)?;

        let guest = Guest {
            id: Ulid::new(),
            first_name: new.first_name.trim().to_string(),
            last_name: new.last_name.trim().to_string(),
            email,
            phone: new.phone,
            address: new.address,
            identification,
            date_of_birth: new.date_of_birth,
            notes: new.notes,
        };
        self.commit_directory(&Event::GuestRegistered {
            guest: guest.clone(),
        })
        .await?;

        info!(guest = %guest.id, name = %guest.full_name(), "guest registered");
        Ok(guest)
    }

    pub async fn update_guest(&self, guest: Guest) -> Result<Guest, EngineError> {
        let guest = Guest {
            identification: normalize_identification(guest.identification),
            email: guest.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()),
            ..guest
        };
        validate_guest(
            &guest.first_name,
            &guest.last_name,
            &guest.identification,
            guest.notes.as_deref(),
        )?;

        let _directory = self.directory.write().await;
        if !self.guests.contains_key(&guest.id) {
            return Err(EngineError::NotFound(guest.id));
        }
        self.check_guest_identity(Some(guest.id), guest.email.as_deref(), &guest.identification)?;

        self.commit_directory(&Event::GuestUpdated {
            guest: guest.clone(),
        })
        .await?;

        info!(guest = %guest.id, "guest updated");
        Ok(guest)
    }

    /// Remove a guest with no upcoming or in-house stay. Past reservations
    /// keep referring to the removed id.
    pub async fn remove_guest(&self, id: Ulid) -> Result<(), EngineError> {
        let _directory = self.directory.write().await;
        if !self.guests.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        for cell in self.room_cells() {
            let guard = cell.read().await;
            if guard
                .reservations
                .iter()
                .any(|r| r.guest_id == id && r.status.is_active())
            {
                return Err(EngineError::Validation("guest has active reservations"));
            }
        }

        self.commit_directory(&Event::GuestRemoved { id }).await?;
        info!(guest = %id, "guest removed");
        Ok(())
    }

    /// Email (case-insensitive) and identification must not belong to
    /// another guest. Caller holds the directory write lock.
    fn check_guest_identity(
        &self,
        this: Option<Ulid>,
        email: Option<&str>,
        identification: &Identification,
    ) -> Result<(), EngineError> {
        if let Some(email) = email
            && let Some(owner) = self.guest_emails.get(&email_key(email))
            && Some(*owner) != this
        {
            return Err(EngineError::DuplicateIdentity(format!("email {email}")));
        }
        if let Some(owner) = self.guest_identities.get(identification)
            && Some(*owner) != this
        {
            return Err(EngineError::DuplicateIdentity(format!(
                "identification {} {}",
                identification.kind, identification.number
            )));
        }
        Ok(())
    }
}
