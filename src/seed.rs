use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::info;

use crate::limits::MAX_ROOM_ID_LEN;
use crate::model::Room;
use crate::store::{Store, StoreError};

/// The built-in catalog used when no rooms file is configured.
pub fn default_rooms() -> Vec<Room> {
    [
        ("101", "Cabin 1", dec!(500), 4),
        ("102", "Cabin 2", dec!(600), 6),
        ("103", "Conference Room A", dec!(800), 10),
        ("104", "Conference Room B", dec!(1000), 15),
        ("105", "Meeting Pod", dec!(300), 2),
    ]
    .into_iter()
    .map(|(id, name, rate, capacity)| Room {
        id: id.into(),
        name: name.into(),
        base_hourly_rate: rate,
        capacity,
    })
    .collect()
}

#[derive(Debug)]
pub enum SeedError {
    Io(std::io::Error),
    Json(serde_json::Error),
    InvalidRoom { id: String, reason: String },
    Store(StoreError),
}

impl std::fmt::Display for SeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedError::Io(e) => write!(f, "reading rooms file: {e}"),
            SeedError::Json(e) => write!(f, "parsing rooms file: {e}"),
            SeedError::InvalidRoom { id, reason } => write!(f, "invalid room {id:?}: {reason}"),
            SeedError::Store(e) => write!(f, "seeding rooms: {e}"),
        }
    }
}

impl std::error::Error for SeedError {}

impl From<StoreError> for SeedError {
    fn from(e: StoreError) -> Self {
        SeedError::Store(e)
    }
}

/// Rates may be written as JSON numbers or strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RateText {
    Number(serde_json::Number),
    Text(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomEntry {
    id: String,
    name: String,
    #[serde(alias = "base_hourly_rate")]
    base_hourly_rate: RateText,
    capacity: u32,
}

/// Parse a JSON array of rooms.
pub fn parse_rooms(json: &str) -> Result<Vec<Room>, SeedError> {
    let entries: Vec<RoomEntry> = serde_json::from_str(json).map_err(SeedError::Json)?;
    entries
        .into_iter()
        .map(|e| {
            let text = match e.base_hourly_rate {
                RateText::Number(n) => n.to_string(),
                RateText::Text(s) => s,
            };
            let rate = Decimal::from_str(text.trim()).map_err(|err| SeedError::InvalidRoom {
                id: e.id.clone(),
                reason: format!("bad hourly rate {text:?}: {err}"),
            })?;
            Ok(Room {
                id: e.id,
                name: e.name,
                base_hourly_rate: rate,
                capacity: e.capacity,
            })
        })
        .collect()
}

pub fn load_rooms(path: &Path) -> Result<Vec<Room>, SeedError> {
    let json = std::fs::read_to_string(path).map_err(SeedError::Io)?;
    parse_rooms(&json)
}

fn validate(room: &Room) -> Result<(), SeedError> {
    let invalid = |reason: &str| SeedError::InvalidRoom {
        id: room.id.clone(),
        reason: reason.into(),
    };
    if room.id.trim().is_empty() || room.id.trim() != room.id {
        return Err(invalid("id must be non-empty without surrounding spaces"));
    }
    if room.id.len() > MAX_ROOM_ID_LEN {
        return Err(invalid("id too long"));
    }
    if room.name.trim().is_empty() {
        return Err(invalid("name is required"));
    }
    if room.base_hourly_rate <= Decimal::ZERO {
        return Err(invalid("hourly rate must be positive"));
    }
    if room.capacity == 0 {
        return Err(invalid("capacity must be positive"));
    }
    Ok(())
}

/// Insert `rooms` into an empty store. A store that already has rooms is
/// left alone. Returns how many rooms were inserted.
pub async fn seed_rooms(store: &dyn Store, rooms: Vec<Room>) -> Result<usize, SeedError> {
    if !store.list_rooms().await?.is_empty() {
        return Ok(0);
    }
    let mut seen = HashSet::new();
    for room in &rooms {
        validate(room)?;
        if !seen.insert(room.id.as_str()) {
            return Err(SeedError::InvalidRoom {
                id: room.id.clone(),
                reason: "id appears more than once".into(),
            });
        }
    }
    let count = rooms.len();
    for room in rooms {
        store.insert_room(room).await?;
    }
    info!(rooms = count, "seeded room catalog");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn builtin_catalog() {
        let rooms = default_rooms();
        assert_eq!(rooms.len(), 5);
        assert_eq!(rooms[0].id, "101");
        assert_eq!(rooms[2].name, "Conference Room A");
        assert_eq!(rooms[3].base_hourly_rate, dec!(1000));
        assert_eq!(rooms[4].capacity, 2);
        assert!(rooms.iter().all(|r| validate(r).is_ok()));
    }

    #[test]
    fn parse_numbers_and_strings() {
        let rooms = parse_rooms(
            r#"[
                {"id": "201", "name": "Loft", "baseHourlyRate": 812.5, "capacity": 8},
                {"id": "202", "name": "Nook", "base_hourly_rate": "0.10", "capacity": 1}
            ]"#,
        )
        .unwrap();
        assert_eq!(rooms[0].base_hourly_rate, dec!(812.5));
        assert_eq!(rooms[1].base_hourly_rate.to_string(), "0.10");
        assert_eq!(rooms[1].capacity, 1);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(parse_rooms("{}"), Err(SeedError::Json(_))));
        assert!(matches!(
            parse_rooms(r#"[{"id": "1", "name": "x", "baseHourlyRate": "cheap", "capacity": 1}]"#),
            Err(SeedError::InvalidRoom { .. })
        ));
    }

    #[tokio::test]
    async fn seeds_empty_store_once() {
        let store = InMemoryStore::new();
        assert_eq!(seed_rooms(&store, default_rooms()).await.unwrap(), 5);
        assert_eq!(seed_rooms(&store, default_rooms()).await.unwrap(), 0);
        assert_eq!(store.room_count(), 5);
    }

    #[tokio::test]
    async fn rejects_invalid_rooms_before_inserting() {
        let store = InMemoryStore::new();
        let mut rooms = default_rooms();
        rooms[3].base_hourly_rate = Decimal::ZERO;
        let err = seed_rooms(&store, rooms).await.unwrap_err();
        assert!(matches!(err, SeedError::InvalidRoom { ref id, .. } if id == "104"));
        assert_eq!(store.room_count(), 0);
    }

    #[tokio::test]
    async fn rejects_duplicate_ids_before_inserting() {
        let store = InMemoryStore::new();
        let mut rooms = default_rooms();
        rooms[2].id = "101".into();
        let err = seed_rooms(&store, rooms).await.unwrap_err();
        assert!(matches!(err, SeedError::InvalidRoom { ref id, .. } if id == "101"));
        assert_eq!(store.room_count(), 0);

        // Nothing was half-seeded, so a corrected catalog still goes in.
        assert_eq!(seed_rooms(&store, default_rooms()).await.unwrap(), 5);
    }
}
