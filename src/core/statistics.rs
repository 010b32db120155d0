//! Lookup statistics.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;

use crate::common::{Id, LookupKind};

const MAX_CACHED_LOOKUPS: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Counters of a single lookup, for observability only.
pub struct LookupStatistics {
    /// Requests sent.
    pub requests: usize,
    /// Responses received, including responses that didn't carry anything useful.
    pub replies: usize,
    /// Requests that timed out.
    pub timeouts: usize,
    /// Timeouts of contacts that were picked from the routing table.
    pub route_table_timeouts: usize,
    /// Depth of the lookup at termination.
    pub hops: u32,
    /// Wall clock time from start to termination.
    pub elapsed: Duration,
    /// Sum of the round trip times of all replies.
    pub round_trip_time: Duration,
}

impl LookupStatistics {
    pub(crate) fn add_request(&mut self) {
        self.requests += 1;
    }

    pub(crate) fn add_reply(&mut self, round_trip_time: Duration) {
        self.replies += 1;
        self.round_trip_time = self.round_trip_time.saturating_add(round_trip_time);
    }

    pub(crate) fn add_timeout(&mut self, route_table: bool) {
        self.timeouts += 1;
        if route_table {
            self.route_table_timeouts += 1;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CompletedLookup {
    kind: LookupKind,
    found: bool,
    statistics: LookupStatistics,
}

/// Aggregated statistics of recently completed lookups.
#[derive(Debug)]
pub struct DhtStatistics {
    completed: usize,
    hops_sum: u64,
    elapsed_sum: Duration,
    values_found: usize,
    value_lookups: usize,
    /// Most recent lookups by target.
    cached_lookups: LruCache<Id, CompletedLookup>,
}

impl DhtStatistics {
    pub fn new() -> Self {
        DhtStatistics {
            completed: 0,
            hops_sum: 0,
            elapsed_sum: Duration::ZERO,
            values_found: 0,
            value_lookups: 0,
            cached_lookups: LruCache::new(
                NonZeroUsize::new(MAX_CACHED_LOOKUPS).unwrap_or(NonZeroUsize::MIN),
            ),
        }
    }

    /// Record a finished lookup, evicting the least recently completed one
    /// from the averages if at capacity.
    pub fn record(&mut self, target: Id, kind: LookupKind, found: bool, statistics: LookupStatistics) {
        let completed = CompletedLookup {
            kind,
            found,
            statistics,
        };

        if let Some((_, old)) = self.cached_lookups.push(target, completed) {
            self.decrement(&old);
        }

        self.completed += 1;
        self.hops_sum += statistics.hops as u64;
        self.elapsed_sum = self.elapsed_sum.saturating_add(statistics.elapsed);

        if kind.is_value_lookup() {
            self.value_lookups += 1;
            if found {
                self.values_found += 1;
            }
        }
    }

    /// Number of lookups the averages are computed over.
    pub fn samples(&self) -> usize {
        self.completed
    }

    pub fn average_hops(&self) -> f64 {
        if self.completed == 0 {
            return 0.0;
        }

        self.hops_sum as f64 / self.completed as f64
    }

    pub fn average_elapsed(&self) -> Duration {
        match u32::try_from(self.completed) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(count) => self.elapsed_sum / count,
        }
    }

    /// Share of value lookups that found at least one value.
    pub fn value_success_rate(&self) -> f64 {
        if self.value_lookups == 0 {
            return 0.0;
        }

        self.values_found as f64 / self.value_lookups as f64
    }

    /// Statistics of the most recent lookup for this target, if still cached.
    pub fn get(&mut self, target: &Id) -> Option<LookupStatistics> {
        self.cached_lookups.get(target).map(|lookup| lookup.statistics)
    }

    fn decrement(&mut self, old: &CompletedLookup) {
        self.completed -= 1;
        self.hops_sum -= old.statistics.hops as u64;
        self.elapsed_sum = self.elapsed_sum.saturating_sub(old.statistics.elapsed);

        if old.kind.is_value_lookup() {
            self.value_lookups -= 1;
            if old.found {
                self.values_found -= 1;
            }
        }
    }
}

impl Default for DhtStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statistics(hops: u32, elapsed_ms: u64) -> LookupStatistics {
        LookupStatistics {
            hops,
            elapsed: Duration::from_millis(elapsed_ms),
            ..Default::default()
        }
    }

    #[test]
    fn empty_averages_are_zero() {
        let stats = DhtStatistics::new();

        assert_eq!(stats.samples(), 0);
        assert_eq!(stats.average_hops(), 0.0);
        assert_eq!(stats.average_elapsed(), Duration::ZERO);
        assert_eq!(stats.value_success_rate(), 0.0);
    }

    #[test]
    fn averages() {
        let mut stats = DhtStatistics::new();

        stats.record(Id::random(), LookupKind::Node, false, statistics(2, 100));
        stats.record(Id::random(), LookupKind::Value, true, statistics(4, 300));
        stats.record(Id::random(), LookupKind::Value, false, statistics(6, 200));

        assert_eq!(stats.samples(), 3);
        assert_eq!(stats.average_hops(), 4.0);
        assert_eq!(stats.average_elapsed(), Duration::from_millis(200));
        assert_eq!(stats.value_success_rate(), 0.5);
    }

    #[test]
    fn same_target_replaces_previous_sample() {
        let mut stats = DhtStatistics::new();
        let target = Id::random();

        stats.record(target, LookupKind::Node, false, statistics(10, 100));
        stats.record(target, LookupKind::Node, false, statistics(2, 100));

        assert_eq!(stats.samples(), 1);
        assert_eq!(stats.average_hops(), 2.0);
        assert_eq!(stats.get(&target).map(|s| s.hops), Some(2));
    }

    #[test]
    fn evicts_least_recent_at_capacity() {
        let mut stats = DhtStatistics::new();

        for _ in 0..MAX_CACHED_LOOKUPS + 10 {
            stats.record(Id::random(), LookupKind::Node, false, statistics(1, 1));
        }

        assert_eq!(stats.samples(), MAX_CACHED_LOOKUPS);
    }

    #[test]
    fn reply_and_timeout_counters() {
        let mut stats = LookupStatistics::default();

        stats.add_request();
        stats.add_reply(Duration::from_millis(20));
        stats.add_reply(Duration::from_millis(30));
        stats.add_timeout(true);
        stats.add_timeout(false);

        assert_eq!(stats.requests, 1);
        assert_eq!(stats.replies, 2);
        assert_eq!(stats.round_trip_time, Duration::from_millis(50));
        assert_eq!(stats.timeouts, 2);
        assert_eq!(stats.route_table_timeouts, 1);
    }
}
