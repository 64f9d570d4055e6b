use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{error, info, warn};

use crate::model::*;
use crate::wal::Wal;

use super::memory::InMemoryStore;
use super::{Store, StoreError};

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    #[cfg(test)]
    FailNextAppend,
}

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        // Every caller in the batch is told it failed, so none of its frames
        // may survive: cut the file back to the last commit.
        warn!("booking log batch of {} failed: {e}", batch.len());
        if let Err(e) = wal.rollback() {
            error!("booking log rollback failed, retrying on next append: {e}");
        }
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        #[cfg(test)]
        WalCommand::FailNextAppend => wal.fail_append_after(0),
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// In-memory store made durable by a write-ahead log.
///
/// Every mutation is applied to memory first (so duplicate ids and status
/// races are decided synchronously), then appended to the log. If the append
/// fails the memory change is rolled back and the caller gets a retryable
/// `StoreError::Io`.
pub struct JournaledStore {
    memory: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    path: PathBuf,
    /// Writers hold it shared; compaction holds it exclusively so the
    /// snapshot and the log swap see the same state.
    compaction_gate: RwLock<()>,
}

impl JournaledStore {
    /// Replay the log at `path` and start its writer task.
    /// Must be called from within a Tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (events, valid_len) = Wal::recover(path)?;
        let memory = InMemoryStore::new();
        for event in &events {
            memory.apply_event(event);
        }
        info!(
            path = %path.display(),
            events = events.len(),
            rooms = memory.room_count(),
            bookings = memory.booking_count(),
            "replayed booking log"
        );

        let wal = Wal::open_truncated(path, valid_len)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            memory,
            wal_tx,
            path: path.to_path_buf(),
            compaction_gate: RwLock::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn wal_append(&self, event: Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))?
            .map_err(StoreError::from)
    }

    /// Rewrite the log as one event per room and per booking.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.compaction_gate.write().await;
        let events = self.memory.snapshot();
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Io("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("WAL writer dropped response".into()))??;
        info!(path = %self.path.display(), events = count, "compacted booking log");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
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

#[async_trait]
impl Store for JournaledStore {
    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError> {
        self.memory.get_room(id).await
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        self.memory.list_rooms().await
    }

    async fn insert_room(&self, room: Room) -> Result<(), StoreError> {
        let _shared = self.compaction_gate.read().await;
        let id = room.id.clone();
        self.memory.add_room(room.clone())?;
        if let Err(e) = self.wal_append(Event::RoomAdded { room }).await {
            self.memory.remove_room(&id);
            return Err(e);
        }
        Ok(())
    }

    async fn next_booking_id(&self) -> Result<BookingId, StoreError> {
        self.memory.next_booking_id().await
    }

    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError> {
        let _shared = self.compaction_gate.read().await;
        let id = booking.id;
        self.memory.add_booking(booking.clone())?;
        if let Err(e) = self.wal_append(Event::BookingCreated { booking }).await {
            self.memory.remove_booking(&id);
            return Err(e);
        }
        Ok(())
    }

    async fn find_booking_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        self.memory.find_booking_by_id(id).await
    }

    async fn find_confirmed_bookings(&self, room_id: &str) -> Result<Vec<Booking>, StoreError> {
        self.memory.find_confirmed_bookings(room_id).await
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        self.memory.list_bookings().await
    }

    async fn update_booking_status(
        &self,
        id: BookingId,
        expected: BookingStatus,
        new: BookingStatus,
        cancelled_at: Option<Ms>,
    ) -> Result<u64, StoreError> {
        let _shared = self.compaction_gate.read().await;
        let Some(before) = self.memory.transition(&id, expected, new, cancelled_at) else {
            return Ok(0);
        };
        let event = Event::BookingStatusChanged {
            id,
            status: new,
            cancelled_at,
        };
        if let Err(e) = self.wal_append(event).await {
            self.memory.restore(before);
            return Err(e);
        }
        Ok(1)
    }
}
