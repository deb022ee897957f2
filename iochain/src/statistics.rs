//! Traffic counters and throughput snapshots kept for sessions and services.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Per-second rates computed from counter deltas.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Throughput {
    /// Bytes read per second.
    pub read_bytes: f64,
    /// Bytes written per second.
    pub written_bytes: f64,
    /// Messages read per second.
    pub read_messages: f64,
    /// Messages written per second.
    pub written_messages: f64,
}

impl Throughput {
    fn max(self, other: Throughput) -> Throughput {
        Throughput {
            read_bytes: self.read_bytes.max(other.read_bytes),
            written_bytes: self.written_bytes.max(other.written_bytes),
            read_messages: self.read_messages.max(other.read_messages),
            written_messages: self.written_messages.max(other.written_messages),
        }
    }
}

#[derive(Debug, Default)]
struct ThroughputState {
    last_calculation_time: u64,
    last_read_bytes: u64,
    last_written_bytes: u64,
    last_read_messages: u64,
    last_written_messages: u64,
    current: Throughput,
    largest: Throughput,
}

/// Cumulative I/O counters, last-activity timestamps, the scheduled-write
/// backlog and a lazily refreshed throughput snapshot.
///
/// Counters are atomics because transports and application threads update
/// them concurrently. All times are milliseconds since the Unix epoch.
#[derive(Debug)]
pub struct TrafficStatistics {
    read_bytes: AtomicU64,
    written_bytes: AtomicU64,
    read_messages: AtomicU64,
    written_messages: AtomicU64,

    last_read_time: AtomicU64,
    last_write_time: AtomicU64,

    scheduled_write_bytes: AtomicI64,
    scheduled_write_messages: AtomicI64,

    throughput: Mutex<ThroughputState>,
}

impl TrafficStatistics {
    /// Creates zeroed statistics whose activity clocks start at `now`.
    pub fn new(now: u64) -> Self {
        Self {
            read_bytes: AtomicU64::new(0),
            written_bytes: AtomicU64::new(0),
            read_messages: AtomicU64::new(0),
            written_messages: AtomicU64::new(0),
            last_read_time: AtomicU64::new(now),
            last_write_time: AtomicU64::new(now),
            scheduled_write_bytes: AtomicI64::new(0),
            scheduled_write_messages: AtomicI64::new(0),
            throughput: Mutex::new(ThroughputState {
                last_calculation_time: now,
                ..Default::default()
            }),
        }
    }

    /// Total bytes read.
    pub fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::SeqCst)
    }

    /// Total bytes written.
    pub fn written_bytes(&self) -> u64 {
        self.written_bytes.load(Ordering::SeqCst)
    }

    /// Total messages read.
    pub fn read_messages(&self) -> u64 {
        self.read_messages.load(Ordering::SeqCst)
    }

    /// Total messages written.
    pub fn written_messages(&self) -> u64 {
        self.written_messages.load(Ordering::SeqCst)
    }

    /// Time of the last read.
    pub fn last_read_time(&self) -> u64 {
        self.last_read_time.load(Ordering::SeqCst)
    }

    /// Time of the last write.
    pub fn last_write_time(&self) -> u64 {
        self.last_write_time.load(Ordering::SeqCst)
    }

    /// The later of the last read and last write.
    pub fn last_io_time(&self) -> u64 {
        self.last_read_time().max(self.last_write_time())
    }

    /// Bytes accepted for writing but not yet confirmed written.
    pub fn scheduled_write_bytes(&self) -> i64 {
        self.scheduled_write_bytes.load(Ordering::SeqCst)
    }

    /// Messages accepted for writing but not yet confirmed written.
    pub fn scheduled_write_messages(&self) -> i64 {
        self.scheduled_write_messages.load(Ordering::SeqCst)
    }

    pub(crate) fn record_read_bytes(&self, increment: u64, now: u64) {
        self.read_bytes.fetch_add(increment, Ordering::SeqCst);
        self.last_read_time.store(now, Ordering::SeqCst);
    }

    pub(crate) fn record_read_message(&self, now: u64) {
        self.read_messages.fetch_add(1, Ordering::SeqCst);
        self.last_read_time.store(now, Ordering::SeqCst);
    }

    pub(crate) fn record_written_bytes(&self, increment: u64, now: u64) {
        self.written_bytes.fetch_add(increment, Ordering::SeqCst);
        self.last_write_time.store(now, Ordering::SeqCst);
    }

    pub(crate) fn record_written_message(&self, now: u64) {
        self.written_messages.fetch_add(1, Ordering::SeqCst);
        self.last_write_time.store(now, Ordering::SeqCst);
    }

    pub(crate) fn add_scheduled_write_bytes(&self, delta: i64) {
        self.scheduled_write_bytes.fetch_add(delta, Ordering::SeqCst);
    }

    pub(crate) fn add_scheduled_write_messages(&self, delta: i64) {
        self.scheduled_write_messages.fetch_add(delta, Ordering::SeqCst);
    }

    /// Zeroes the backlog and returns what it held.
    pub(crate) fn take_scheduled_writes(&self) -> (i64, i64) {
        (
            self.scheduled_write_bytes.swap(0, Ordering::SeqCst),
            self.scheduled_write_messages.swap(0, Ordering::SeqCst),
        )
    }

    /// Recomputes the throughput snapshot.
    ///
    /// Nothing happens unless `force` is set or at least `interval_millis`
    /// elapsed since the previous calculation. An interval of zero disables
    /// periodic recalculation. Returns whether a new snapshot was taken.
    pub fn update_throughput(&self, now: u64, interval_millis: u64, force: bool) -> bool {
        let mut state = self.throughput.lock().unwrap();
        let elapsed = now.saturating_sub(state.last_calculation_time);
        if (interval_millis == 0 || elapsed < interval_millis) && !force {
            return false;
        }
        if elapsed == 0 {
            return false;
        }

        let read_bytes = self.read_bytes();
        let written_bytes = self.written_bytes();
        let read_messages = self.read_messages();
        let written_messages = self.written_messages();

        let per_second = |current: u64, last: u64| {
            current.saturating_sub(last) as f64 * 1000.0 / elapsed as f64
        };
        let current = Throughput {
            read_bytes: per_second(read_bytes, state.last_read_bytes),
            written_bytes: per_second(written_bytes, state.last_written_bytes),
            read_messages: per_second(read_messages, state.last_read_messages),
            written_messages: per_second(written_messages, state.last_written_messages),
        };

        state.current = current;
        state.largest = state.largest.max(current);
        state.last_read_bytes = read_bytes;
        state.last_written_bytes = written_bytes;
        state.last_read_messages = read_messages;
        state.last_written_messages = written_messages;
        state.last_calculation_time = now;
        true
    }

    /// The most recent throughput snapshot.
    pub fn throughput(&self) -> Throughput {
        self.throughput.lock().unwrap().current
    }

    /// Historical per-field maxima of all snapshots. Never reset.
    pub fn largest_throughput(&self) -> Throughput {
        self.throughput.lock().unwrap().largest
    }

    /// Time of the most recent throughput calculation.
    pub fn last_throughput_calculation_time(&self) -> u64 {
        self.throughput.lock().unwrap().last_calculation_time
    }

    /// Restarts the activity clocks and the throughput window at `now`.
    pub(crate) fn reset_activity(&self, now: u64) {
        self.last_read_time.store(now, Ordering::SeqCst);
        self.last_write_time.store(now, Ordering::SeqCst);
        self.throughput.lock().unwrap().last_calculation_time = now;
    }

    pub(crate) fn reset_throughput(&self) {
        self.throughput.lock().unwrap().current = Throughput::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_respects_interval() {
        let stats = TrafficStatistics::new(1_000);
        stats.record_read_bytes(3_000, 1_500);

        assert!(!stats.update_throughput(2_000, 3_000, false));
        assert_eq!(stats.throughput(), Throughput::default());

        assert!(stats.update_throughput(4_000, 3_000, false));
        assert_eq!(stats.throughput().read_bytes, 1_000.0);
        assert_eq!(stats.last_throughput_calculation_time(), 4_000);
    }

    #[test]
    fn largest_throughput_is_monotonic() {
        let stats = TrafficStatistics::new(0);
        stats.record_written_bytes(5_000, 500);
        stats.update_throughput(1_000, 1_000, false);
        assert_eq!(stats.largest_throughput().written_bytes, 5_000.0);

        stats.record_written_bytes(1_000, 1_500);
        stats.update_throughput(2_000, 1_000, false);
        assert_eq!(stats.throughput().written_bytes, 1_000.0);
        assert_eq!(stats.largest_throughput().written_bytes, 5_000.0);

        stats.reset_throughput();
        assert_eq!(stats.throughput(), Throughput::default());
        assert_eq!(stats.largest_throughput().written_bytes, 5_000.0);
    }

    #[test]
    fn forced_update_ignores_interval() {
        let stats = TrafficStatistics::new(0);
        stats.record_read_message(10);
        assert!(stats.update_throughput(500, 0, true));
        assert_eq!(stats.throughput().read_messages, 2.0);
    }
}
