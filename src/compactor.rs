use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::JournaledStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact the log once `threshold` appends have piled up since the last
/// compaction. Returns whether it compacted.
pub async fn compact_if_needed(store: &JournaledStore, threshold: u64) -> bool {
    let pending = store.appends_since_compact().await;
    if pending < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted after {pending} appends");
            true
        }
        Err(e) => {
            warn!("compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps the booking log short.
pub async fn run_compactor(store: Arc<JournaledStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::Store;
    use crate::wal::Wal;
    use rust_decimal_macros::dec;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomdesk_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = JournaledStore::open(&path).unwrap();
        store
            .insert_room(Room {
                id: "101".into(),
                name: "Cabin 1".into(),
                base_hourly_rate: dec!(500),
                capacity: 4,
            })
            .await
            .unwrap();

        let mut ids = Vec::new();
        for i in 0..4 {
            let id = store.next_booking_id().await.unwrap();
            store
                .insert_booking(Booking {
                    id,
                    room_id: "101".into(),
                    user_name: format!("user{i}"),
                    span: Span::new(i * 1000, i * 1000 + 500),
                    total_price: dec!(500.00),
                    status: BookingStatus::Confirmed,
                    created_at: 0,
                    cancelled_at: None,
                })
                .await
                .unwrap();
            ids.push(id);
        }
        for id in &ids {
            store
                .update_booking_status(*id, BookingStatus::Confirmed, BookingStatus::Cancelled, Some(1))
                .await
                .unwrap();
        }
        // 1 room + 4 creates + 4 status changes.
        assert!(!compact_if_needed(&store, 100).await);
        assert_eq!(Wal::replay(&path).unwrap().len(), 9);

        assert!(compact_if_needed(&store, 9).await);
        assert_eq!(Wal::replay(&path).unwrap().len(), 5);
        assert_eq!(store.appends_since_compact().await, 0);
    }
}
