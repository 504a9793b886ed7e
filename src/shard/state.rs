//! Shard state tracking
//!
//! Lifecycle phase and counters for every locally owned shard.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Lifecycle phase of a shard connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardPhase {
    /// Constructed and registered, not yet opened
    Created,
    /// `open()` called, no traffic seen yet
    Opening,
    /// Connection delivering events
    Open,
    /// `open()` returned, graceful close in progress
    Closing,
    /// Connection finished
    Closed,
}

impl ShardPhase {
    /// Returns true while the connection can carry traffic
    pub fn is_open(&self) -> bool {
        matches!(self, ShardPhase::Open)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ShardPhase::Closed)
    }
}

/// State for a single shard
#[derive(Debug)]
pub struct ShardStateEntry {
    pub phase: ShardPhase,
    pub events_received: AtomicU64,
    pub events_forwarded: AtomicU64,
    pub forward_failures: AtomicU64,
    pub commands_delivered: AtomicU64,
}

impl Default for ShardStateEntry {
    fn default() -> Self {
        Self {
            phase: ShardPhase::Created,
            events_received: AtomicU64::new(0),
            events_forwarded: AtomicU64::new(0),
            forward_failures: AtomicU64::new(0),
            commands_delivered: AtomicU64::new(0),
        }
    }
}

/// Shared state across all shards owned by this process
#[derive(Debug, Clone)]
pub struct ShardState {
    inner: Arc<ShardStateInner>,
}

#[derive(Debug)]
struct ShardStateInner {
    server_index: u32,
    shards: DashMap<u32, ShardStateEntry>,
    running: AtomicUsize,
}

impl ShardState {
    pub fn new(server_index: u32) -> Self {
        Self {
            inner: Arc::new(ShardStateInner {
                server_index,
                shards: DashMap::new(),
                running: AtomicUsize::new(0),
            }),
        }
    }

    pub fn server_index(&self) -> u32 {
        self.inner.server_index
    }

    /// Start tracking a shard in the `Created` phase
    pub fn register(&self, shard_id: u32) {
        self.inner.shards.insert(shard_id, ShardStateEntry::default());
    }

    /// Update shard phase
    pub fn set_phase(&self, shard_id: u32, phase: ShardPhase) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.phase = phase;
        }
    }

    /// Increment event received counter; the first event marks the shard open
    pub fn record_event(&self, shard_id: u32) {
        let opened = match self.inner.shards.get(&shard_id) {
            Some(entry) => {
                entry.events_received.fetch_add(1, Ordering::Relaxed);
                entry.phase == ShardPhase::Opening
            }
            None => false,
        };

        if opened {
            self.set_phase(shard_id, ShardPhase::Open);
        }
    }

    /// Increment event forwarded counter
    pub fn record_forward(&self, shard_id: u32) {
        if let Some(entry) = self.inner.shards.get(&shard_id) {
            entry.events_forwarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Increment forward failure counter
    pub fn record_forward_failure(&self, shard_id: u32) {
        if let Some(entry) = self.inner.shards.get(&shard_id) {
            entry.forward_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Increment delivered command counter
    pub fn record_delivery(&self, shard_id: u32) {
        if let Some(entry) = self.inner.shards.get(&shard_id) {
            entry.commands_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get phase for a specific shard
    pub fn phase(&self, shard_id: u32) -> Option<ShardPhase> {
        self.inner.shards.get(&shard_id).map(|e| e.phase)
    }

    pub fn events_received(&self, shard_id: u32) -> u64 {
        self.inner
            .shards
            .get(&shard_id)
            .map_or(0, |e| e.events_received.load(Ordering::Relaxed))
    }

    pub fn commands_delivered(&self, shard_id: u32) -> u64 {
        self.inner
            .shards
            .get(&shard_id)
            .map_or(0, |e| e.commands_delivered.load(Ordering::Relaxed))
    }

    /// Get total events received across all shards
    pub fn total_events_received(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|e| e.events_received.load(Ordering::Relaxed))
            .sum()
    }

    /// Get total events forwarded across all shards
    pub fn total_events_forwarded(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|e| e.events_forwarded.load(Ordering::Relaxed))
            .sum()
    }

    /// Get total failed forwards across all shards
    pub fn total_forward_failures(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|e| e.forward_failures.load(Ordering::Relaxed))
            .sum()
    }

    /// Get count of open shards
    pub fn open_shards(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter(|e| e.phase.is_open())
            .count()
    }

    /// Get count of registered shards
    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// Mark a shard task as started, returning the new running count
    pub fn shard_started(&self) -> usize {
        self.inner.running.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark a shard task as exited, returning the new running count
    pub fn shard_stopped(&self) -> usize {
        self.inner.running.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Shard tasks currently running in this process
    pub fn running_shards(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Check if process is ready (at least one shard open)
    pub fn is_ready(&self) -> bool {
        self.open_shards() > 0
    }
}
