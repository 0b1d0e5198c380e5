// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;
use wavefront_common::constants::{DELTA_PREFIX, DELTA_PREFIX_2};
use wavefront_common::{HistogramGranularity, SdkError, SpanLog};

/// Capability interface implemented by every sender variant (direct, proxy,
/// multi). The multi-sender holds a collection of this trait and forwards
/// each call sequentially.
///
/// The enqueueing `send_*` methods serialize eagerly and hand the line to a
/// background flush, so they return before anything touches the network.
/// Their errors (`InvalidArgument`, `QueueFull`) concern only the call at
/// hand; transport failures surface later through
/// [`failure_count`](Self::failure_count) and the internal metrics.
pub trait WavefrontSender: Send + Sync {
    /// Enqueue one metric point.
    ///
    /// Format: `<metricName> <metricValue> [<timestamp>] source=<source>
    /// [pointTags]`. A blank `source` falls back to the client's default
    /// source, a `None` timestamp lets the receiver assign one.
    ///
    /// Example: `"new-york.power.usage" 42422.0 1493773500
    /// source="localhost" "datacenter"="dc1"`
    fn send_metric(
        &self,
        name: &str,
        value: f64,
        timestamp: Option<i64>,
        source: &str,
        tags: &HashMap<String, String>,
    ) -> Result<(), SdkError>;

    /// Enqueue one delta-counter increment.
    ///
    /// The name is prefixed with the delta marker unless already carrying
    /// one; non-positive values are not emitted.
    fn send_delta_counter(
        &self,
        name: &str,
        value: f64,
        source: &str,
        tags: &HashMap<String, String>,
        timestamp: Option<i64>,
    ) -> Result<(), SdkError> {
        if value <= 0.0 {
            return Ok(());
        }
        self.send_metric(&delta_counter_name(name), value, timestamp, source, tags)
    }

    /// Enqueue one histogram distribution, one line per granularity.
    ///
    /// Format: `{!M|!H|!D} [<timestamp>] #<count> <mean> [centroids...]
    /// <histogramName> source=<source> [pointTags]`.
    ///
    /// Example: `!M 1493773500 #20 30.0 #10 5.1 "request.latency"
    /// source="appServer1" "region"="us-west"`
    fn send_distribution(
        &self,
        name: &str,
        centroids: &[(f64, i64)],
        granularities: &BTreeSet<HistogramGranularity>,
        timestamp: Option<i64>,
        source: &str,
        tags: &HashMap<String, String>,
    ) -> Result<(), SdkError>;

    /// Enqueue one tracing span, plus its span-log envelope when `span_logs`
    /// is non-empty.
    ///
    /// Format: `<spanName> source=<source> traceId=<uuid> spanId=<uuid>
    /// [parent=<uuid>] [followsFrom=<uuid>] [spanTags] <startMs>
    /// <durationMs>`. Duplicate tags keep their first occurrence; span logs
    /// add a `"_spanLogs"="true"` tag so the receiver knows to wait for the
    /// envelope.
    ///
    /// Example: `"getAllUsers" source="localhost"
    /// traceId=7b3bf470-9456-11e8-9eb6-529269fb1459
    /// spanId=0313bafe-9457-11e8-9eb6-529269fb1459
    /// "application"="Wavefront" 1493773500 343500`
    #[allow(clippy::too_many_arguments)]
    fn send_span(
        &self,
        name: &str,
        start_millis: i64,
        duration_millis: i64,
        source: &str,
        trace_id: Uuid,
        span_id: Uuid,
        parents: &[Uuid],
        follows_from: &[Uuid],
        tags: &[(String, String)],
        span_logs: &[SpanLog],
    ) -> Result<(), SdkError>;

    /// Enqueue one event. `end_millis` defaults to `start_millis + 1`, the
    /// conventional shape of an instantaneous event.
    ///
    /// The wire form depends on the transport: direct ingestion posts a
    /// JSON body to the event API, the proxy receives an `@Event` line.
    fn send_event(
        &self,
        name: &str,
        start_millis: i64,
        end_millis: Option<i64>,
        source: &str,
        tags: &[String],
        annotations: &HashMap<String, String>,
    ) -> Result<(), SdkError>;

    /// Send pre-serialized metric lines immediately, bypassing the buffer.
    ///
    /// The `*_now` variants exist for callers that manage their own
    /// batching and serialization; lines are passed through verbatim, so
    /// they must already be in wire format.
    fn send_metric_now(&self, metrics: &[String]);

    /// Send pre-serialized distribution lines immediately.
    fn send_distribution_now(&self, distributions: &[String]);

    /// Send pre-serialized span lines immediately.
    fn send_span_now(&self, spans: &[String]);

    /// Send pre-serialized span-log envelopes immediately.
    fn send_span_log_now(&self, span_logs: &[String]);

    /// Send pre-serialized events immediately.
    fn send_event_now(&self, events: &[String]);

    /// Drain all buffers once, synchronously.
    fn flush_now(&self);

    /// Flush once, stop the background workers and release the transports.
    /// Idempotent.
    fn close(&self);

    /// Number of failed transport operations since the sender was created.
    ///
    /// Monotonic: unlike the internal delta counters, this total never
    /// shrinks when the registry reports.
    fn failure_count(&self) -> u64;
}

/// Prefix a metric name with the delta marker unless one is already present.
pub(crate) fn delta_counter_name(name: &str) -> String {
    if name.starts_with(DELTA_PREFIX) || name.starts_with(DELTA_PREFIX_2) {
        name.to_owned()
    } else {
        format!("{DELTA_PREFIX}{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_names_are_prefixed_once() {
        assert_eq!(delta_counter_name("request.count"), "\u{2206}request.count");
        assert_eq!(
            delta_counter_name("\u{2206}request.count"),
            "\u{2206}request.count"
        );
        assert_eq!(
            delta_counter_name("\u{0394}request.count"),
            "\u{0394}request.count"
        );
    }
}
