//! Latest-readings board: the display-side broadcaster
//!
//! Keeps the most recent reading of each kind for polling observers and fans
//! every publish out to live subscribers.
//!
//! # Example
//!
//! ```
//! use sensorlink::LatestReadings;
//! use sensorlink_core_interface::{Reading, ReadingBroadcaster, ReadingKind};
//!
//! let board = LatestReadings::new();
//! let reading = Reading::new(ReadingKind::Location, &b"{}"[..]).unwrap();
//! board.publish(&reading);
//!
//! assert_eq!(board.latest(ReadingKind::Location), Some(reading));
//! assert_eq!(board.publish_count(), 1);
//! ```

use sensorlink_core_interface::{Reading, ReadingBroadcaster, ReadingKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Default number of updates a live subscriber may lag behind
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// One publish, as seen by a live subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingUpdate {
    /// Publish sequence number, starting at 1
    pub sequence: u64,
    pub kind: ReadingKind,
    pub reading: Reading,
}

/// Thread-safe store of the latest reading per kind
///
/// Publishing never blocks on subscribers; a subscriber that falls more than
/// its capacity behind skips the oldest updates.
#[derive(Debug)]
pub struct LatestReadings {
    latest: RwLock<HashMap<ReadingKind, Reading>>,
    published: AtomicU64,
    updates: broadcast::Sender<ReadingUpdate>,
}

impl LatestReadings {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            latest: RwLock::new(HashMap::new()),
            published: AtomicU64::new(0),
            updates,
        }
    }

    /// Most recent reading of `kind`
    pub fn latest(&self, kind: ReadingKind) -> Option<Reading> {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned()
    }

    /// Most recent reading of every kind seen so far, in `ReadingKind` order
    pub fn snapshot(&self) -> Vec<Reading> {
        let latest = self.latest.read().unwrap_or_else(|e| e.into_inner());
        ReadingKind::ALL
            .iter()
            .filter_map(|kind| latest.get(kind).cloned())
            .collect()
    }

    /// Total publishes since creation
    pub fn publish_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Receive every subsequent publish
    pub fn subscribe(&self) -> broadcast::Receiver<ReadingUpdate> {
        self.updates.subscribe()
    }

    /// Forget all stored readings
    pub fn clear(&self) {
        self.latest
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Default for LatestReadings {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingBroadcaster for LatestReadings {
    fn publish(&self, reading: &Reading) {
        self.latest
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reading.kind(), reading.clone());
        let sequence = self.published.fetch_add(1, Ordering::SeqCst) + 1;

        // No subscribers is fine
        let _ = self.updates.send(ReadingUpdate {
            sequence,
            kind: reading.kind(),
            reading: reading.clone(),
        });
    }
}
