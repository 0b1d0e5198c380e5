// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Thread-safe minute-bucketed histogram aggregation.
//!
//! High-frequency updates land in the current minute's bin, which holds one
//! t-digest per worker shard so concurrent updates rarely contend. The first
//! updater observing a new minute rolls the current bin onto the prior-bin
//! list under a short mutex; flushing drains the prior bins into per-minute
//! distributions ready for [`crate::WavefrontSender::send_distribution`].

use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use wavefront_tdigest::TDigest;

use crate::MutexExt;

/// Compression of the per-shard digests (1 / delta).
const ACCURACY: f64 = 100.0;

/// A worker's data that has not been reported for more than `MAX_BINS`
/// minutes is evicted, oldest minute first. Histograms are expected to be
/// reported at least once every 10 minutes.
const MAX_BINS: usize = 10;

/// Number of digest shards per minute bin. Workers map to shards by thread
/// identity, so same-minute updates from different threads rarely share a
/// lock.
const SHARD_COUNT: usize = 16;

/// Millisecond clock, injectable for tests.
pub type ClockMillis = Arc<dyn Fn() -> i64 + Send + Sync>;

fn current_clock_millis() -> i64 {
    std::time::SystemTime::UNIX_EPOCH
        .elapsed()
        .map_or(0, |d| d.as_millis() as i64)
}

fn worker_shard_index() -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

/// A per-minute histogram distribution: the timestamp at the start of the
/// minute and the accumulated centroids.
#[derive(Clone, Debug)]
pub struct Distribution {
    /// Milliseconds since the epoch, truncated to the minute.
    pub timestamp: i64,
    /// `(mean, count)` pairs with counts coerced to integers.
    pub centroids: Vec<(f64, i64)>,
}

/// Point-in-time statistics over everything the histogram currently holds.
pub struct Snapshot {
    digest: TDigest,
}

impl Snapshot {
    /// Number of recorded values.
    pub fn count(&self) -> u64 {
        self.digest.count() as u64
    }

    /// Sum of the recorded values.
    pub fn sum(&self) -> f64 {
        self.digest.sum()
    }

    /// Smallest recorded value, `None` when empty.
    pub fn min(&self) -> Option<f64> {
        self.digest.min()
    }

    /// Largest recorded value, `None` when empty.
    pub fn max(&self) -> Option<f64> {
        self.digest.max()
    }

    /// Mean of the recorded values, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        self.digest.mean()
    }

    /// Estimated value at `quantile` in `[0, 1]`, `None` when empty.
    pub fn value(&mut self, quantile: f64) -> Option<f64> {
        self.digest.percentile(quantile)
    }
}

struct MinuteBin {
    minute_millis: i64,
    shards: Vec<Mutex<TDigest>>,
}

impl MinuteBin {
    fn new(minute_millis: i64) -> Self {
        Self {
            minute_millis,
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(TDigest::new(ACCURACY)))
                .collect(),
        }
    }

    fn shard(&self) -> &Mutex<TDigest> {
        &self.shards[worker_shard_index()]
    }
}

struct BinState {
    current: Arc<MinuteBin>,
    prior: Vec<Arc<MinuteBin>>,
}

/// Wavefront implementation of a histogram.
///
/// Values accumulate into per-minute t-digests; a reporter calls
/// [`flush_distributions`](Self::flush_distributions) periodically and
/// forwards the result through
/// [`send_distribution`](crate::WavefrontSender::send_distribution). Only
/// completed minutes flush; the current minute keeps accumulating until it
/// rolls over. Data left unflushed for more than ten minutes is evicted
/// oldest-first, so a stalled reporter loses history rather than growing
/// without bound.
pub struct WavefrontHistogram {
    clock: ClockMillis,
    state: Mutex<BinState>,
}

impl Default for WavefrontHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl WavefrontHistogram {
    /// Construct a histogram using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(current_clock_millis))
    }

    /// Construct a histogram with an injected millisecond clock.
    pub fn with_clock(clock: ClockMillis) -> Self {
        let minute = Self::minute_millis(&clock);
        Self {
            clock,
            state: Mutex::new(BinState {
                current: Arc::new(MinuteBin::new(minute)),
                prior: Vec::new(),
            }),
        }
    }

    fn minute_millis(clock: &ClockMillis) -> i64 {
        clock() / 60_000 * 60_000
    }

    /// Current minute bin, rolling the previous one onto the prior list when
    /// the minute has turned. The critical section is O(1).
    fn current_bin(&self) -> Arc<MinuteBin> {
        let minute = Self::minute_millis(&self.clock);
        let mut state = self.state.lock_or_panic();
        if state.current.minute_millis != minute {
            if state.prior.len() >= MAX_BINS {
                state.prior.remove(0);
            }
            let rolled = std::mem::replace(&mut state.current, Arc::new(MinuteBin::new(minute)));
            state.prior.push(rolled);
        }
        state.current.clone()
    }

    /// Add one value to the distribution.
    ///
    /// Lock contention is limited to the rollover check plus the caller's
    /// own digest shard, so concurrent updaters on different threads rarely
    /// wait on each other.
    pub fn update(&self, value: f64) {
        let bin = self.current_bin();
        bin.shard().lock_or_panic().update(value);
    }

    /// Bulk-update with a set of centroids: `means[i]` is recorded with
    /// weight `counts[i]`. When the slices differ in length the shorter one
    /// wins and the excess entries are ignored.
    pub fn bulk_update(&self, means: &[f64], counts: &[i64]) {
        let bin = self.current_bin();
        let mut digest = bin.shard().lock_or_panic();
        for (mean, count) in means.iter().zip(counts) {
            digest.update_with_count(*mean, *count as f64);
        }
    }

    /// Drain every minute bin prior to the current one into distributions.
    ///
    /// Draining clears the aggregated bins, so data is never flushed twice.
    /// One distribution is emitted per non-empty digest shard, each stamped
    /// with its bin's minute; the receiver aggregates same-minute
    /// distributions, so splitting a minute across shards loses nothing.
    pub fn flush_distributions(&self) -> Vec<Distribution> {
        self.current_bin();
        let drained = {
            let mut state = self.state.lock_or_panic();
            std::mem::take(&mut state.prior)
        };
        let mut distributions = Vec::new();
        for bin in drained {
            for shard in &bin.shards {
                let mut digest = std::mem::take(&mut *shard.lock_or_panic());
                if digest.is_empty() {
                    continue;
                }
                let centroids = digest
                    .centroids()
                    .iter()
                    .map(|c| (c.mean, c.count as i64))
                    .collect();
                distributions.push(Distribution {
                    timestamp: bin.minute_millis,
                    centroids,
                });
            }
        }
        distributions
    }

    /// Combine every digest across the prior bins and the current bin.
    ///
    /// The combination copies digest state rather than draining it, so a
    /// snapshot never affects what a later flush reports.
    pub fn snapshot(&self) -> Snapshot {
        self.current_bin();
        let bins = {
            let state = self.state.lock_or_panic();
            let mut bins = state.prior.clone();
            bins.push(state.current.clone());
            bins
        };
        let mut combined = TDigest::new(ACCURACY);
        for bin in bins {
            for shard in &bin.shards {
                combined.merge(&shard.lock_or_panic());
            }
        }
        Snapshot { digest: combined }
    }

    /// Standard deviation of the recorded values, 0 when empty.
    ///
    /// Computed from centroid weights and means against the combined mean,
    /// so the estimate carries the digest's compression error.
    pub fn std_dev(&self) -> f64 {
        let mut digest = self.snapshot().digest;
        let Some(mean) = digest.mean() else {
            return 0.0;
        };
        let mut count = 0.0;
        let mut variance_sum = 0.0;
        for centroid in digest.centroids() {
            count += centroid.count;
            variance_sum += centroid.count * (centroid.mean - mean) * (centroid.mean - mean);
        }
        if count == 0.0 {
            0.0
        } else {
            (variance_sum / count).sqrt()
        }
    }

    /// Number of recorded values.
    pub fn count(&self) -> u64 {
        self.snapshot().count()
    }

    /// Sum of the recorded values.
    pub fn sum(&self) -> f64 {
        self.snapshot().sum()
    }

    /// Mean of the recorded values, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        self.snapshot().mean()
    }

    /// Smallest recorded value, `None` when empty.
    pub fn min(&self) -> Option<f64> {
        self.snapshot().min()
    }

    /// Largest recorded value, `None` when empty.
    pub fn max(&self) -> Option<f64> {
        self.snapshot().max()
    }
}
