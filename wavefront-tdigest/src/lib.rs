// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A minimal merging t-digest.
//!
//! Incoming points accumulate in a small buffer which is clustered into the
//! centroid list whenever it overflows, bounding each centroid's weight by
//! the scale-function limit `4 * W * q * (1 - q) / compression`. The default
//! compression of 100 corresponds to `delta = 1/100` and gives high accuracy
//! near the tails.
//!
//! Only finite values and positive counts are accepted.

/// A cluster of observed values: its weighted mean and total weight.
///
/// Counts are kept as floats internally; consumers needing integral counts
/// (the histogram line protocol does) truncate at the boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub mean: f64,
    pub count: f64,
}

/// The default compression (1 / delta).
pub const DEFAULT_COMPRESSION: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct TDigest {
    compression: f64,
    centroids: Vec<Centroid>,
    buffer: Vec<Centroid>,
    count: f64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for TDigest {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION)
    }
}

impl TDigest {
    /// Create an empty digest with the given compression (1 / delta).
    /// Compressions below 1 are clamped up.
    pub fn new(compression: f64) -> Self {
        Self {
            compression: if compression < 1.0 { 1.0 } else { compression },
            centroids: Vec::new(),
            buffer: Vec::new(),
            count: 0.0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Add a single observation.
    pub fn update(&mut self, value: f64) {
        self.update_with_count(value, 1.0);
    }

    /// Add a pre-aggregated observation with the given weight. Non-finite
    /// values and non-positive weights are ignored.
    pub fn update_with_count(&mut self, mean: f64, count: f64) {
        if !mean.is_finite() || !count.is_finite() || count <= 0.0 {
            return;
        }
        self.buffer.push(Centroid { mean, count });
        self.count += count;
        self.sum += mean * count;
        if mean < self.min {
            self.min = mean;
        }
        if mean > self.max {
            self.max = mean;
        }
        if self.buffer.len() >= self.buffer_limit() {
            self.compress();
        }
    }

    /// Fold another digest into this one.
    pub fn merge(&mut self, other: &TDigest) {
        for centroid in other.centroids.iter().chain(other.buffer.iter()) {
            self.update_with_count(centroid.mean, centroid.count);
        }
    }

    /// Total weight of all observations.
    pub fn count(&self) -> f64 {
        self.count
    }

    /// Sum of all observations (weighted).
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Smallest observation, `None` when empty.
    pub fn min(&self) -> Option<f64> {
        if self.is_empty() {
            None
        } else {
            Some(self.min)
        }
    }

    /// Largest observation, `None` when empty.
    pub fn max(&self) -> Option<f64> {
        if self.is_empty() {
            None
        } else {
            Some(self.max)
        }
    }

    /// Weighted mean of all observations, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            None
        } else {
            Some(self.sum / self.count)
        }
    }

    /// True when the digest holds no observations.
    pub fn is_empty(&self) -> bool {
        self.count == 0.0
    }

    /// The clustered centroid list, sorted by mean.
    pub fn centroids(&mut self) -> &[Centroid] {
        self.compress();
        &self.centroids
    }

    /// Estimate the value at quantile `q` in `[0, 1]`, `None` when empty.
    /// Out-of-range quantiles are clamped rather than rejected.
    pub fn percentile(&mut self, q: f64) -> Option<f64> {
        self.compress();
        if self.is_empty() {
            return None;
        }
        let q = q.clamp(0.0, 1.0);
        let target = q * self.count;

        // Cumulative weight up to each centroid's midpoint; interpolate
        // between neighbouring midpoints, anchored at min and max.
        let mut cumulative = 0.0;
        let mut prev_midpoint = 0.0;
        let mut prev_mean = self.min;
        for centroid in &self.centroids {
            let midpoint = cumulative + centroid.count / 2.0;
            if target <= midpoint {
                let span = midpoint - prev_midpoint;
                if span <= 0.0 {
                    return Some(centroid.mean);
                }
                let fraction = (target - prev_midpoint) / span;
                return Some(prev_mean + fraction * (centroid.mean - prev_mean));
            }
            cumulative += centroid.count;
            prev_midpoint = midpoint;
            prev_mean = centroid.mean;
        }
        // Tail: interpolate from the last centroid's midpoint to max.
        let span = self.count - prev_midpoint;
        if span <= 0.0 {
            return Some(self.max);
        }
        let fraction = (target - prev_midpoint) / span;
        Some(prev_mean + fraction * (self.max - prev_mean))
    }

    /// Mean over the quantile window `[lo, hi]`, `None` when the window is
    /// empty. Centroid weights straddling the window edges are clipped.
    pub fn trimmed_mean(&mut self, lo: f64, hi: f64) -> Option<f64> {
        self.compress();
        if self.is_empty() || hi <= lo {
            return None;
        }
        let lo_weight = lo.clamp(0.0, 1.0) * self.count;
        let hi_weight = hi.clamp(0.0, 1.0) * self.count;

        let mut cumulative: f64 = 0.0;
        let mut weight = 0.0;
        let mut weighted_sum = 0.0;
        for centroid in &self.centroids {
            let left = cumulative.max(lo_weight);
            let right = (cumulative + centroid.count).min(hi_weight);
            if right > left {
                weight += right - left;
                weighted_sum += (right - left) * centroid.mean;
            }
            cumulative += centroid.count;
        }
        if weight == 0.0 {
            None
        } else {
            Some(weighted_sum / weight)
        }
    }

    fn buffer_limit(&self) -> usize {
        (10.0 * self.compression) as usize
    }

    /// Cluster the buffer into the centroid list.
    ///
    /// Pending points and existing centroids are merged in one sorted pass;
    /// neighbours combine while the merged weight stays under the scale
    /// function's limit at that quantile, which keeps centroids small near
    /// the tails and lets them grow towards the median.
    fn compress(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut pending: Vec<Centroid> = std::mem::take(&mut self.buffer);
        pending.append(&mut self.centroids);
        pending.sort_by(|a, b| a.mean.total_cmp(&b.mean));

        let total: f64 = pending.iter().map(|c| c.count).sum();
        let mut merged: Vec<Centroid> = Vec::new();
        let mut weight_so_far = 0.0;
        let mut current: Option<Centroid> = None;
        for centroid in pending {
            let Some(mut acc) = current.take() else {
                current = Some(centroid);
                continue;
            };
            let proposed = acc.count + centroid.count;
            let q = (weight_so_far + proposed / 2.0) / total;
            let limit = 4.0 * total * q * (1.0 - q) / self.compression;
            if proposed <= limit {
                acc.mean = (acc.mean * acc.count + centroid.mean * centroid.count) / proposed;
                acc.count = proposed;
                current = Some(acc);
            } else {
                weight_so_far += acc.count;
                merged.push(acc);
                current = Some(centroid);
            }
        }
        if let Some(acc) = current {
            merged.push(acc);
        }
        self.centroids = merged;
    }
}
