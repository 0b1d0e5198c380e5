// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Internal SDK metrics: counters, delta counters and callable gauges,
//! reported periodically through the sender's own pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wavefront_common::worker::Worker;

use crate::client::LineSink;
use crate::MutexExt;

/// Default period of the internal metrics reporter.
pub(crate) const REPORTING_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) fn unix_timestamp_now() -> i64 {
    std::time::SystemTime::UNIX_EPOCH
        .elapsed()
        .map_or(0, |d| d.as_secs() as i64)
}

/// A monotonic counter shared between the pipeline and the registry.
#[derive(Debug, Default)]
pub struct SdkCounter {
    count: AtomicI64,
}

impl SdkCounter {
    /// Increase the counter by one.
    pub fn inc(&self) {
        self.inc_by(1);
    }

    /// Increase the counter by `n`.
    pub fn inc_by(&self, n: i64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    /// Decrease the counter by `n`. Used by delta counters after a report to
    /// subtract exactly the reported amount.
    pub fn dec_by(&self, n: i64) {
        self.count.fetch_sub(n, Ordering::Relaxed);
    }

    /// Current value of the counter.
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Reset the counter.
    pub fn clear(&self) {
        self.count.store(0, Ordering::Relaxed);
    }
}

type GaugeSupplier = dyn Fn() -> Option<f64> + Send + Sync;

#[derive(Clone)]
enum SdkMetric {
    Counter(Arc<SdkCounter>),
    DeltaCounter(Arc<SdkCounter>),
    Gauge(Arc<GaugeSupplier>),
}

struct RegistryInner {
    sink: Option<LineSink>,
    source: Option<String>,
    tags: HashMap<String, String>,
    /// Metric name prefix including its trailing dot, or empty.
    prefix: String,
    metrics: Mutex<HashMap<String, SdkMetric>>,
}

/// Registry of the SDK's own diagnostic metrics.
///
/// Reports flow back through the same sender whose pipeline they describe,
/// so full-buffer errors here are logged and swallowed instead of surfacing.
/// A registry created without a sink registers metrics but never reports.
#[derive(Clone)]
pub struct SdkMetricsRegistry {
    inner: Arc<RegistryInner>,
}

impl SdkMetricsRegistry {
    pub(crate) fn new(
        sink: Option<LineSink>,
        source: Option<String>,
        tags: HashMap<String, String>,
        prefix: &str,
    ) -> Self {
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}.")
        };
        Self {
            inner: Arc::new(RegistryInner {
                sink,
                source,
                tags,
                prefix,
                metrics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get or create a counter. Reported as `<prefix>.<name>.count`.
    pub fn new_counter(&self, name: &str) -> Arc<SdkCounter> {
        self.counter_entry(name, false)
    }

    /// Get or create a delta counter. Reported as a delta metric and
    /// decremented by the reported amount afterwards.
    pub fn new_delta_counter(&self, name: &str) -> Arc<SdkCounter> {
        self.counter_entry(name, true)
    }

    fn counter_entry(&self, name: &str, delta: bool) -> Arc<SdkCounter> {
        let mut metrics = self.inner.metrics.lock_or_panic();
        if let Some(SdkMetric::Counter(counter) | SdkMetric::DeltaCounter(counter)) =
            metrics.get(name)
        {
            return counter.clone();
        }
        let counter = Arc::new(SdkCounter::default());
        let metric = if delta {
            SdkMetric::DeltaCounter(counter.clone())
        } else {
            SdkMetric::Counter(counter.clone())
        };
        metrics.insert(name.to_owned(), metric);
        counter
    }

    /// Register a gauge backed by a supplier. A supplier returning `None` is
    /// skipped at report time.
    pub fn new_gauge(
        &self,
        name: &str,
        supplier: impl Fn() -> Option<f64> + Send + Sync + 'static,
    ) {
        let mut metrics = self.inner.metrics.lock_or_panic();
        metrics
            .entry(name.to_owned())
            .or_insert_with(|| SdkMetric::Gauge(Arc::new(supplier)));
    }

    /// Report every registered metric once. Iterates a snapshot of the
    /// metric map so registration during a report never deadlocks.
    ///
    /// Gauges emit their supplier's current value (a `None` supplier result
    /// skips the gauge this round); counters emit their running total under
    /// `<name>.count`; delta counters emit the accumulated delta and then
    /// subtract exactly what was reported, so increments landing during the
    /// report survive into the next one. A delta that fails to enqueue is
    /// not subtracted and is retried wholesale next round.
    pub(crate) fn report(&self, deadline: Option<Instant>) {
        let Some(sink) = &self.inner.sink else {
            return;
        };
        let timestamp = unix_timestamp_now();
        let snapshot: Vec<(String, SdkMetric)> = {
            let metrics = self.inner.metrics.lock_or_panic();
            metrics
                .iter()
                .map(|(name, metric)| (name.clone(), metric.clone()))
                .collect()
        };
        let source = self.inner.source.as_deref();
        for (key, metric) in snapshot {
            if deadline.is_some_and(|d| Instant::now() > d) {
                break;
            }
            let name = format!("{}{}", self.inner.prefix, key);
            let result = match metric {
                SdkMetric::Gauge(supplier) => match supplier() {
                    Some(value) => sink.send_metric(
                        &name,
                        value,
                        Some(timestamp),
                        source,
                        &self.inner.tags,
                    ),
                    None => Ok(()),
                },
                SdkMetric::Counter(counter) => sink.send_metric(
                    &format!("{name}.count"),
                    counter.count() as f64,
                    Some(timestamp),
                    source,
                    &self.inner.tags,
                ),
                SdkMetric::DeltaCounter(counter) => {
                    let delta = counter.count();
                    let result = sink.send_delta_counter(
                        &format!("{name}.count"),
                        delta as f64,
                        source,
                        &self.inner.tags,
                        Some(timestamp),
                    );
                    if result.is_ok() {
                        counter.dec_by(delta);
                    }
                    result
                }
            };
            if let Err(err) = result {
                warn!(metric = name.as_str(), error = %err, "unable to send internal SDK metric");
            }
        }
    }

    /// Report one final time, bounded by `timeout`.
    ///
    /// The deadline is checked between metrics, so a slow gauge supplier
    /// can overrun it by one invocation but never stall a close
    /// indefinitely.
    pub(crate) fn close(&self, timeout: Duration) {
        self.report(Some(Instant::now() + timeout));
    }
}

/// Background worker emitting the registry on a fixed interval.
pub(crate) struct RegistryReporter {
    registry: SdkMetricsRegistry,
    interval: Duration,
    cancel: CancellationToken,
}

impl RegistryReporter {
    pub(crate) fn new(
        registry: SdkMetricsRegistry,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            interval,
            cancel,
        }
    }
}

impl Worker for RegistryReporter {
    async fn run(&mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.interval) => self.registry.report(None),
            }
        }
    }
}
