// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wire-contract constants shared by both transports.

/// Format name for metric points on the direct-ingestion API.
pub const METRIC_FORMAT: &str = "wavefront";

/// Format name for histogram distributions.
pub const HISTOGRAM_FORMAT: &str = "histogram";

/// Format name for tracing spans.
pub const TRACING_SPAN_FORMAT: &str = "trace";

/// Format name for span logs.
pub const SPAN_LOG_FORMAT: &str = "spanLogs";

/// Format name for events.
pub const EVENT_FORMAT: &str = "event";

/// Direct-ingestion report endpoint.
pub const REPORT_ENDPOINT: &str = "/report";

/// Direct-ingestion event endpoint.
pub const EVENT_ENDPOINT: &str = "/api/v2/event";

/// ∆: INCREMENT, marks a delta counter.
pub const DELTA_PREFIX: char = '\u{2206}';

/// Δ: GREEK CAPITAL LETTER DELTA, the alternate delta-counter marker.
pub const DELTA_PREFIX_2: char = '\u{0394}';

/// Well-known heartbeat metric name.
pub const HEART_BEAT_METRIC: &str = "~component.heartbeat";

/// Internal source used for internal and aggregated metrics.
pub const WAVEFRONT_PROVIDED_SOURCE: &str = "wavefront-provided";

/// Value substituted for optional undefined tags.
pub const NULL_TAG_VAL: &str = "none";

/// Tag key for defining an application.
pub const APPLICATION_TAG_KEY: &str = "application";

/// Tag key for defining a cluster.
pub const CLUSTER_TAG_KEY: &str = "cluster";

/// Tag key for defining a service.
pub const SERVICE_TAG_KEY: &str = "service";

/// Tag key for defining a shard.
pub const SHARD_TAG_KEY: &str = "shard";

/// Tag key for defining a component.
pub const COMPONENT_TAG_KEY: &str = "component";

/// Name prefix for the SDK's internal diagnostic metrics. The platform tag is
/// part of the wire contract consumed by server-side analytics; do not change.
pub const SDK_METRIC_PREFIX: &str = "~sdk.python";

/// Tag key marking spans that carry span logs.
pub const SPAN_LOG_KEY: &str = "_spanLogs";

/// Status recorded when a report failed before any HTTP response arrived.
pub const NO_HTTP_RESPONSE: i32 = -1;
