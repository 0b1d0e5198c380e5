// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Granularity of a reported histogram distribution.
///
/// The ordering (minute, hour, day) is the order granularity identifiers are
/// emitted in when a distribution is reported at several granularities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HistogramGranularity {
    /// Aggregated server-side into per-minute buckets.
    Minute,
    /// Aggregated server-side into per-hour buckets.
    Hour,
    /// Aggregated server-side into per-day buckets.
    Day,
}

impl HistogramGranularity {
    /// The line-protocol identifier for this granularity.
    pub fn identifier(self) -> &'static str {
        match self {
            HistogramGranularity::Minute => "!M",
            HistogramGranularity::Hour => "!H",
            HistogramGranularity::Day => "!D",
        }
    }
}
