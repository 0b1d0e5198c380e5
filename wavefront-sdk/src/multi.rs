// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fan-out sender forwarding every call to a set of wrapped clients.
//!
//! The factory returns this wrapper when more than one endpoint is
//! configured, so application code holds one [`WavefrontSender`] regardless
//! of how many backends receive the data. Each wrapped client keeps its own
//! buffers, transport and failure accounting; the fan-out adds no
//! buffering of its own.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use uuid::Uuid;
use wavefront_common::{HistogramGranularity, SdkError, SpanLog};

use crate::sender::WavefrontSender;

/// Sender fanning out to multiple clients sequentially.
///
/// Every wrapped sender sees every call; the first error encountered is
/// surfaced after all senders have been attempted, so one full or
/// misbehaving backend never starves the others of data. Failure counts
/// aggregate across the wrapped senders, and `flush_now`/`close` drive each
/// one in registration order.
#[derive(Default)]
pub struct WavefrontMultiSender {
    senders: Vec<Arc<dyn WavefrontSender>>,
}

impl WavefrontMultiSender {
    /// An empty fan-out set. Sends succeed trivially until a sender is
    /// added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sender to the fan-out set. Senders are invoked in the order
    /// they were added.
    pub fn with_sender(&mut self, sender: Arc<dyn WavefrontSender>) {
        self.senders.push(sender);
    }

    /// Apply `send` to every wrapped sender, remembering the first error.
    fn fan_out(
        &self,
        mut send: impl FnMut(&dyn WavefrontSender) -> Result<(), SdkError>,
    ) -> Result<(), SdkError> {
        let mut first_error = None;
        for sender in &self.senders {
            if let Err(err) = send(sender.as_ref()) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl WavefrontSender for WavefrontMultiSender {
    fn send_metric(
        &self,
        name: &str,
        value: f64,
        timestamp: Option<i64>,
        source: &str,
        tags: &HashMap<String, String>,
    ) -> Result<(), SdkError> {
        self.fan_out(|sender| sender.send_metric(name, value, timestamp, source, tags))
    }

    fn send_distribution(
        &self,
        name: &str,
        centroids: &[(f64, i64)],
        granularities: &BTreeSet<HistogramGranularity>,
        timestamp: Option<i64>,
        source: &str,
        tags: &HashMap<String, String>,
    ) -> Result<(), SdkError> {
        self.fan_out(|sender| {
            sender.send_distribution(name, centroids, granularities, timestamp, source, tags)
        })
    }

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
    ) -> Result<(), SdkError> {
        self.fan_out(|sender| {
            sender.send_span(
                name,
                start_millis,
                duration_millis,
                source,
                trace_id,
                span_id,
                parents,
                follows_from,
                tags,
                span_logs,
            )
        })
    }

    fn send_event(
        &self,
        name: &str,
        start_millis: i64,
        end_millis: Option<i64>,
        source: &str,
        tags: &[String],
        annotations: &HashMap<String, String>,
    ) -> Result<(), SdkError> {
        self.fan_out(|sender| {
            sender.send_event(name, start_millis, end_millis, source, tags, annotations)
        })
    }

    fn send_metric_now(&self, metrics: &[String]) {
        for sender in &self.senders {
            sender.send_metric_now(metrics);
        }
    }

    fn send_distribution_now(&self, distributions: &[String]) {
        for sender in &self.senders {
            sender.send_distribution_now(distributions);
        }
    }

    fn send_span_now(&self, spans: &[String]) {
        for sender in &self.senders {
            sender.send_span_now(spans);
        }
    }

    fn send_span_log_now(&self, span_logs: &[String]) {
        for sender in &self.senders {
            sender.send_span_log_now(span_logs);
        }
    }

    fn send_event_now(&self, events: &[String]) {
        for sender in &self.senders {
            sender.send_event_now(events);
        }
    }

    fn flush_now(&self) {
        for sender in &self.senders {
            sender.flush_now();
        }
    }

    fn close(&self) {
        for sender in &self.senders {
            sender.close();
        }
    }

    fn failure_count(&self) -> u64 {
        self.senders.iter().map(|sender| sender.failure_count()).sum()
    }
}
