mod conflict;
mod error;
mod mutations;
mod pricing;
mod queries;
mod schedule;

pub use conflict::{find_conflict, overlaps};
pub use error::{EngineError, ErrorKind};
pub use pricing::{price, round_money, slots, Slot};
pub use schedule::{RateSchedule, PEAK_MULTIPLIER};

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::Ms;
use crate::store::{Store, StoreError};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of "now" for validation and cancellation.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: Ms) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.0.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.0.load(Ordering::SeqCst)
    }
}

/// Booking lifecycle over a [`Store`].
///
/// Creates on the same room are serialized by a per-room mutex held from the
/// conflict read through the insert. Creates on different rooms never wait on
/// each other. Cancels rely on the store's compare-and-swap instead.
pub struct Engine {
    pub(super) store: Arc<dyn Store>,
    pub(super) schedule: RateSchedule,
    pub(super) clock: Arc<dyn Clock>,
    store_timeout: Duration,
    /// One entry per room that has seen a create; bounded by the room count.
    room_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, schedule: RateSchedule) -> Self {
        Self {
            store,
            schedule,
            clock: Arc::new(SystemClock),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            room_locks: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn schedule(&self) -> &RateSchedule {
        &self.schedule
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Bound a store call by the configured timeout.
    pub(super) async fn store_call<T, F>(&self, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::Store(StoreError::Timeout(self.store_timeout))),
        }
    }

    pub(super) async fn lock_room(&self, room_id: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so no shard lock is held across the await.
        let lock = self.room_locks.entry(room_id.to_string()).or_default().clone();
        lock.lock_owned().await
    }
}
