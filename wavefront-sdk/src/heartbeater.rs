// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Periodic emission of the well-known `~component.heartbeat` gauge, once
//! per component tag set plus once per registered custom tag set.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wavefront_common::constants::{
    APPLICATION_TAG_KEY, CLUSTER_TAG_KEY, COMPONENT_TAG_KEY, HEART_BEAT_METRIC, NULL_TAG_VAL,
    SERVICE_TAG_KEY, SHARD_TAG_KEY,
};
use wavefront_common::worker::Worker;
use wavefront_common::SdkError;

use crate::application_tags::ApplicationTags;
use crate::registry::unix_timestamp_now;
use crate::sender::WavefrontSender;
use crate::MutexExt;

const REPORTING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Service that periodically reports component heartbeats.
///
/// One heartbeat goes out per component with the application, cluster,
/// service, shard and component tags (`none` substituting an absent cluster
/// or shard), and one per custom tag set registered since the last report.
/// Custom tag sets are one-shot: each report drains them.
pub struct HeartbeaterService {
    custom_tags: Arc<Mutex<Vec<HashMap<String, String>>>>,
    cancel: CancellationToken,
    // Dropping the runtime stops the worker thread once cancelled.
    _runtime: tokio::runtime::Runtime,
}

impl HeartbeaterService {
    /// Start heartbeating through `sender`, one beat per component.
    pub fn new(
        sender: Arc<dyn WavefrontSender>,
        application_tags: &ApplicationTags,
        components: &[&str],
        source: impl Into<String>,
    ) -> Result<Self, SdkError> {
        let component_tag_sets = components
            .iter()
            .map(|component| component_tags(application_tags, component))
            .collect();
        let custom_tags = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| SdkError::Configuration(e.to_string()))?;

        let mut worker = HeartbeatWorker {
            sender,
            source: source.into(),
            component_tag_sets,
            custom_tags: custom_tags.clone(),
            interval: REPORTING_INTERVAL,
            cancel: cancel.clone(),
        };
        runtime.spawn(async move { worker.run().await });

        Ok(Self {
            custom_tags,
            cancel,
            _runtime: runtime,
        })
    }

    /// Register a custom tag set to be reported with the next heartbeat.
    ///
    /// Each registered set beats exactly once and is then forgotten;
    /// register it again to keep it alive. Re-registering a set already
    /// pending is a no-op, so callers may submit on every request without
    /// multiplying beats.
    pub fn report_custom_tags(&self, tags: HashMap<String, String>) {
        let mut sets = self.custom_tags.lock_or_panic();
        if !sets.contains(&tags) {
            sets.push(tags);
        }
    }

    /// Stop the heartbeat timer.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// The tag set identifying one component's heartbeat: the application
/// identity (with `none` standing in for an absent cluster or shard), the
/// component name, and any custom tags carried by the application.
fn component_tags(application_tags: &ApplicationTags, component: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    tags.insert(
        APPLICATION_TAG_KEY.to_owned(),
        application_tags.application().to_owned(),
    );
    tags.insert(
        CLUSTER_TAG_KEY.to_owned(),
        application_tags.cluster().unwrap_or(NULL_TAG_VAL).to_owned(),
    );
    tags.insert(
        SERVICE_TAG_KEY.to_owned(),
        application_tags.service().to_owned(),
    );
    tags.insert(
        SHARD_TAG_KEY.to_owned(),
        application_tags.shard().unwrap_or(NULL_TAG_VAL).to_owned(),
    );
    tags.insert(COMPONENT_TAG_KEY.to_owned(), component.to_owned());
    for (key, value) in application_tags.custom_tags() {
        tags.insert(key.clone(), value.clone());
    }
    tags
}

/// The loop behind [`HeartbeaterService`]: beats once per component tag
/// set, then once per drained custom tag set.
struct HeartbeatWorker {
    sender: Arc<dyn WavefrontSender>,
    source: String,
    component_tag_sets: Vec<HashMap<String, String>>,
    custom_tags: Arc<Mutex<Vec<HashMap<String, String>>>>,
    interval: Duration,
    cancel: CancellationToken,
}

impl HeartbeatWorker {
    fn report(&self) {
        let timestamp = unix_timestamp_now();
        for tags in &self.component_tag_sets {
            self.beat(timestamp, tags);
        }
        let drained: Vec<_> = {
            let mut sets = self.custom_tags.lock_or_panic();
            sets.drain(..).collect()
        };
        for tags in &drained {
            self.beat(timestamp, tags);
        }
    }

    fn beat(&self, timestamp: i64, tags: &HashMap<String, String>) {
        if let Err(err) =
            self.sender
                .send_metric(HEART_BEAT_METRIC, 1.0, Some(timestamp), &self.source, tags)
        {
            warn!(error = %err, "cannot report heartbeat metric");
        }
    }
}

impl Worker for HeartbeatWorker {
    async fn run(&mut self) {
        // First beat goes out immediately; later ones on every interval.
        self.report();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.interval) => self.report(),
            }
        }
    }
}
