//! In-memory log aggregator backed by a fixed-size ring buffer
//!
//! Entries are written into a pre-allocated slot array at a wrapping cursor.
//! Once the buffer is full each new entry overwrites the oldest slot. When a
//! maximum age is configured, one background sweeper task evicts expired
//! entries by emptying their slots in place; readers skip empty slots.

use crate::clock::{system_clock, Clock};
use crate::error::AggregatorError;
use crate::events::{EventData, Timestamp};
use crate::worker::Worker;
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Minimum spacing between sweeps triggered by inserts
const SWEEP_DEBOUNCE: Duration = Duration::from_secs(1);

/// Severity of a log entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parse a level name, accepting `warning` as an alias for `warn`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured log line held by the aggregator
///
/// `timestamp` and `id` may be left empty by producers; the aggregator fills
/// them in on [`MemoryAggregator::add`], so entries read back always carry both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "EventData::is_empty")]
    pub metadata: EventData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            level,
            message: message.into(),
            source: String::new(),
            metadata: EventData::new(),
            id: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_metadata(mut self, metadata: EventData) -> Self {
        self.metadata = metadata;
        self
    }

    fn stamped_at(&self) -> Timestamp {
        self.timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Aggregator counters
///
/// `total_entries` counts every `add` ever made. `current_entries` is the
/// number of live slots. `dropped_entries` counts age evictions only;
/// overwrites of live slots on wraparound are counted separately in
/// `overwritten_entries`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatorStats {
    pub total_entries: u64,
    pub dropped_entries: u64,
    pub overwritten_entries: u64,
    pub current_entries: u64,
    pub oldest_entry: Option<Timestamp>,
    pub newest_entry: Option<Timestamp>,
    pub start_time: Timestamp,
}

/// Read-only view of aggregator counters, consumed by health checks
pub trait AggregatorStatsSource: Send + Sync {
    fn aggregator_stats(&self) -> AggregatorStats;
}

impl AggregatorStatsSource for AggregatorStats {
    fn aggregator_stats(&self) -> AggregatorStats {
        self.clone()
    }
}

/// Sizing and eviction settings for [`MemoryAggregator`]
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Number of slots in the ring
    pub max_entries: usize,
    /// Entries older than this are evicted; `None` disables age eviction
    pub max_age: Option<Duration>,
    /// Period of the background sweep
    pub sweep_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_age: None,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Ring {
    slots: Vec<Option<LogEntry>>,
    /// Next slot to write
    index: usize,
    /// Adds since creation or the last clear
    count: u64,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            index: 0,
            count: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn filled(&self) -> usize {
        self.count.min(self.capacity() as u64) as usize
    }

    fn newest_first(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        let cap = self.capacity();
        let newest = (self.index + cap - 1) % cap;
        (0..self.filled()).filter_map(move |step| self.slots[(newest + cap - step) % cap].as_ref())
    }

    fn oldest_first(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        let cap = self.capacity();
        let start = if self.count < cap as u64 { 0 } else { self.index };
        (0..self.filled()).filter_map(move |step| self.slots[(start + step) % cap].as_ref())
    }

    fn oldest_live(&self) -> Option<Timestamp> {
        self.oldest_first().next().map(LogEntry::stamped_at)
    }
}

/// Thread-safe, fixed-capacity log store
pub struct MemoryAggregator {
    max_entries: usize,
    max_age: Option<chrono::Duration>,
    sweep_interval: Duration,
    clock: Arc<dyn Clock>,

    ring: RwLock<Ring>,
    stats: RwLock<AggregatorStats>,

    sweep_signal: Notify,
    sweeper: Mutex<Option<Worker>>,
}

impl fmt::Debug for MemoryAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAggregator")
            .field("max_entries", &self.max_entries)
            .field("max_age", &self.max_age)
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

impl MemoryAggregator {
    /// Create an aggregator reading time from the system clock
    ///
    /// # Examples
    ///
    /// ```
    /// use sboxagent::aggregator::{AggregatorConfig, LogEntry, LogLevel, MemoryAggregator};
    ///
    /// let aggregator = MemoryAggregator::new(AggregatorConfig::default());
    /// aggregator.add(LogEntry::new(LogLevel::Info, "proxy restarted"));
    /// assert_eq!(aggregator.search("proxy", 10).len(), 1);
    /// ```
    pub fn new(config: AggregatorConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: AggregatorConfig, clock: Arc<dyn Clock>) -> Self {
        let max_entries = config.max_entries.max(1);
        let max_age = config
            .max_age
            .filter(|age| !age.is_zero())
            .map(|age| chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX));
        let start_time = clock.now();

        Self {
            max_entries,
            max_age,
            sweep_interval: config.sweep_interval.max(Duration::from_millis(10)),
            clock,
            ring: RwLock::new(Ring::new(max_entries)),
            stats: RwLock::new(AggregatorStats {
                total_entries: 0,
                dropped_entries: 0,
                overwritten_entries: 0,
                current_entries: 0,
                oldest_entry: None,
                newest_entry: None,
                start_time,
            }),
            sweep_signal: Notify::new(),
            sweeper: Mutex::new(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Start the background sweeper
    ///
    /// Only needed when a maximum age is configured; without one the sweeper
    /// idles until stopped.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken) -> Result<(), AggregatorError> {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return Err(AggregatorError::AlreadyRunning);
        }

        let aggregator = Arc::clone(self);
        *sweeper = Some(Worker::spawn(parent, move |token| async move {
            aggregator.run_sweeper(token).await;
        }));

        info!(
            "Memory aggregator started: capacity={}, max_age={:?}, sweep_interval={:?}",
            self.max_entries, self.max_age, self.sweep_interval
        );
        Ok(())
    }

    /// Stop the background sweeper and wait for it to exit
    pub async fn stop(&self) {
        let worker = self.sweeper.lock().take();
        if let Some(worker) = worker {
            info!("Memory aggregator stopping");
            worker.shutdown("aggregator sweeper").await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Append an entry, overwriting the oldest slot once the ring is full
    pub fn add(&self, mut entry: LogEntry) {
        let timestamp = *entry.timestamp.get_or_insert_with(|| self.clock.now());
        if entry.id.as_deref().map_or(true, str::is_empty) {
            entry.id = Some(generate_log_id(timestamp));
        }

        {
            let mut ring = self.ring.write();
            let slot = ring.index;
            let capacity = ring.capacity();
            let replaced = ring.slots[slot].replace(entry);
            ring.index = (slot + 1) % capacity;
            ring.count += 1;

            let mut stats = self.stats.write();
            stats.total_entries += 1;
            if replaced.is_some() {
                stats.overwritten_entries += 1;
                // The overwritten slot held the oldest entry; its successor
                // is the new oldest unless a sweep emptied it.
                stats.oldest_entry = match &ring.slots[ring.index] {
                    Some(next) => Some(next.stamped_at()),
                    None => ring.oldest_live(),
                };
            } else {
                stats.current_entries += 1;
                if stats.oldest_entry.is_none() {
                    stats.oldest_entry = Some(timestamp);
                }
            }
            stats.newest_entry = Some(timestamp);
        }

        if self.max_age.is_some() {
            self.sweep_signal.notify_one();
        }
    }

    /// Newest-first walk with optional filters
    ///
    /// A `limit` of zero means "up to capacity". `level == None` matches all
    /// levels and `since == None` applies no lower time bound.
    pub fn get_entries(
        &self,
        limit: usize,
        level: Option<LogLevel>,
        since: Option<Timestamp>,
    ) -> Vec<LogEntry> {
        let limit = self.effective_limit(limit);
        let ring = self.ring.read();
        ring.newest_first()
            .filter(|entry| level.map_or(true, |level| entry.level == level))
            .filter(|entry| since.map_or(true, |since| entry.stamped_at() >= since))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_entries_by_level(&self, level: LogLevel, limit: usize) -> Vec<LogEntry> {
        self.get_entries(limit, Some(level), None)
    }

    pub fn get_recent_entries(&self, limit: usize) -> Vec<LogEntry> {
        self.get_entries(limit, None, None)
    }

    pub fn get_entries_since(&self, since: Timestamp, limit: usize) -> Vec<LogEntry> {
        self.get_entries(limit, None, Some(since))
    }

    /// Per-level tally over all live entries
    pub fn get_level_counts(&self) -> HashMap<LogLevel, usize> {
        let ring = self.ring.read();
        let mut counts = HashMap::new();
        for entry in ring.oldest_first() {
            *counts.entry(entry.level).or_insert(0) += 1;
        }
        counts
    }

    /// Newest-first, case-sensitive substring search over messages
    pub fn search(&self, query: &str, limit: usize) -> Vec<LogEntry> {
        if query.is_empty() {
            return self.get_recent_entries(limit);
        }

        let limit = self.effective_limit(limit);
        let ring = self.ring.read();
        ring.newest_first()
            .filter(|entry| entry.message.contains(query))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_stats(&self) -> AggregatorStats {
        self.stats.read().clone()
    }

    /// Empty every slot and reset cursor, lifetime count and live stats
    ///
    /// `total_entries` and `dropped_entries` keep counting across clears.
    pub fn clear(&self) {
        let mut ring = self.ring.write();
        ring.slots.iter_mut().for_each(|slot| *slot = None);
        ring.index = 0;
        ring.count = 0;

        let mut stats = self.stats.write();
        stats.current_entries = 0;
        stats.oldest_entry = None;
        stats.newest_entry = None;
        drop(stats);
        drop(ring);

        info!("Memory aggregator cleared");
    }

    /// Evict entries older than the configured maximum age
    ///
    /// Returns the number of evicted entries. A no-op when age eviction is
    /// disabled.
    pub fn sweep_expired(&self) -> usize {
        let Some(max_age) = self.max_age else {
            return 0;
        };
        let Some(cutoff) = self.clock.now().checked_sub_signed(max_age) else {
            return 0;
        };

        let mut ring = self.ring.write();
        let mut dropped = 0usize;
        for slot in ring.slots.iter_mut() {
            if slot.as_ref().is_some_and(|entry| entry.stamped_at() < cutoff) {
                *slot = None;
                dropped += 1;
            }
        }

        if dropped > 0 {
            let oldest = ring.oldest_live();
            let mut stats = self.stats.write();
            stats.dropped_entries += dropped as u64;
            stats.current_entries = stats.current_entries.saturating_sub(dropped as u64);
            stats.oldest_entry = oldest;
            drop(stats);
            drop(ring);

            debug!("Evicted {} log entries older than {}", dropped, cutoff);
        }

        dropped
    }

    async fn run_sweeper(&self, token: CancellationToken) {
        if self.max_age.is_none() {
            debug!("Age eviction disabled, sweeper idle");
            token.cancelled().await;
            return;
        }

        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.sweep_signal.notified() => {
                    // Coalesce bursts of inserts into one sweep
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(SWEEP_DEBOUNCE) => {}
                    }
                }
            }
            self.sweep_expired();
        }

        debug!("Aggregator sweeper stopped");
    }

    fn effective_limit(&self, limit: usize) -> usize {
        if limit == 0 {
            self.max_entries
        } else {
            limit
        }
    }
}

impl AggregatorStatsSource for MemoryAggregator {
    fn aggregator_stats(&self) -> AggregatorStats {
        self.get_stats()
    }
}

fn generate_log_id(timestamp: Timestamp) -> String {
    timestamp.format("%Y%m%d-%H%M%S%.9f").to_string()
}
