// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Line-protocol and JSON serializers for each telemetry type.
//!
//! These are pure functions: they validate their input, render the exact wire
//! form, and never touch any transport. Receiver compatibility requires
//! byte-exact output, so every formatting decision here is part of the wire
//! contract.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::constants::SPAN_LOG_KEY;
use crate::error::SdkError;
use crate::granularity::HistogramGranularity;
use crate::sanitize::{is_blank, sanitize_name, sanitize_value};
use crate::span_log::SpanLog;

/// Render a metric value. Integral values must keep a decimal point
/// (`42422.0`, not `42422`).
fn format_value(value: f64) -> String {
    format!("{value:?}")
}

/// Tags rendered in a deterministic order regardless of map iteration.
fn sorted_tags(tags: &HashMap<String, String>) -> Vec<(&str, &str)> {
    let mut pairs: Vec<(&str, &str)> = tags
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    pairs.sort_unstable();
    pairs
}

/// Serialize a metric point to line format.
///
/// `<name> <value> [<timestamp>] source=<source> [<key>=<value> ...]\n`
///
/// Example: `"new-york.power.usage" 42422.0 1533531013 source="localhost"
/// "datacenter"="dc1"`
///
/// Tags render in key order so the same point always produces the same
/// line. `default_source` replaces a blank `source`.
///
/// # Errors
/// `InvalidArgument` when the name, a tag key or a tag value is blank.
pub fn metric_line(
    name: &str,
    value: f64,
    timestamp: Option<i64>,
    source: &str,
    tags: &HashMap<String, String>,
    default_source: &str,
) -> Result<String, SdkError> {
    if is_blank(name) {
        return Err(SdkError::InvalidArgument(
            "metric name cannot be blank".to_owned(),
        ));
    }
    let source = if is_blank(source) { default_source } else { source };

    let mut line = String::new();
    line.push_str(&sanitize_name(name));
    line.push(' ');
    line.push_str(&format_value(value));
    if let Some(ts) = timestamp {
        line.push(' ');
        line.push_str(&ts.to_string());
    }
    line.push_str(" source=");
    line.push_str(&sanitize_value(source));
    for (key, val) in sorted_tags(tags) {
        if is_blank(key) {
            return Err(SdkError::InvalidArgument(
                "metric point tag key cannot be blank".to_owned(),
            ));
        }
        if is_blank(val) {
            return Err(SdkError::InvalidArgument(
                "metric point tag value cannot be blank".to_owned(),
            ));
        }
        line.push(' ');
        line.push_str(&sanitize_name(key));
        line.push('=');
        line.push_str(&sanitize_value(val));
    }
    line.push('\n');
    Ok(line)
}

/// Serialize a histogram distribution to line format, one line per
/// granularity.
///
/// `{!M|!H|!D} [<timestamp>] #<count> <mean> [...] <name> source=<source>
/// [<key>=<value> ...]\n`
///
/// Example: `!M 1533531013 #20 30.0 #10 5.1 "request.latency"
/// source="appServer1" "region"="us-west"`
///
/// Granularities render in minute, hour, day order; centroids keep the
/// order given by the caller.
///
/// # Errors
/// `InvalidArgument` when the name, a tag key or a tag value is blank, the
/// centroid list is empty, or no granularity was requested.
pub fn histogram_line(
    name: &str,
    centroids: &[(f64, i64)],
    granularities: &BTreeSet<HistogramGranularity>,
    timestamp: Option<i64>,
    source: &str,
    tags: &HashMap<String, String>,
    default_source: &str,
) -> Result<String, SdkError> {
    if is_blank(name) {
        return Err(SdkError::InvalidArgument(
            "histogram name cannot be blank".to_owned(),
        ));
    }
    if granularities.is_empty() {
        return Err(SdkError::InvalidArgument(
            "histogram granularities cannot be empty".to_owned(),
        ));
    }
    if centroids.is_empty() {
        return Err(SdkError::InvalidArgument(
            "a distribution should have at least one centroid".to_owned(),
        ));
    }
    let source = if is_blank(source) { default_source } else { source };

    let mut tag_part = String::new();
    for (key, val) in sorted_tags(tags) {
        if is_blank(key) {
            return Err(SdkError::InvalidArgument(
                "histogram tag key cannot be blank".to_owned(),
            ));
        }
        if is_blank(val) {
            return Err(SdkError::InvalidArgument(
                "histogram tag value cannot be blank".to_owned(),
            ));
        }
        tag_part.push(' ');
        tag_part.push_str(&sanitize_name(key));
        tag_part.push('=');
        tag_part.push_str(&sanitize_value(val));
    }

    let mut out = String::new();
    for granularity in granularities {
        let mut line = String::new();
        line.push_str(granularity.identifier());
        if let Some(ts) = timestamp {
            line.push(' ');
            line.push_str(&ts.to_string());
        }
        for (mean, count) in centroids {
            line.push_str(" #");
            line.push_str(&count.to_string());
            line.push(' ');
            line.push_str(&format_value(*mean));
        }
        line.push(' ');
        line.push_str(&sanitize_name(name));
        line.push_str(" source=");
        line.push_str(&sanitize_value(source));
        line.push_str(&tag_part);
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&line);
    }
    out.push('\n');
    Ok(out)
}

/// Serialize a tracing span to line format.
///
/// `<name> source=<source> traceId=<uuid> spanId=<uuid> [parent=<uuid> ...]
/// [followsFrom=<uuid> ...] [<key>=<value> ...] <startMs> <durationMs>\n`
///
/// Duplicate `(key, value)` tags keep only their first occurrence. When span
/// logs are present a synthetic `"_spanLogs"="true"` tag is appended before
/// de-duplication. Unlike metric names, the span name is treated as a
/// value: it is quoted and escaped rather than character-restricted.
///
/// # Errors
/// `InvalidArgument` when the name, a tag key or a tag value is blank.
pub fn span_line(
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
    default_source: &str,
) -> Result<String, SdkError> {
    if is_blank(name) {
        return Err(SdkError::InvalidArgument(
            "span name cannot be blank".to_owned(),
        ));
    }
    let source = if is_blank(source) { default_source } else { source };

    let mut line = String::new();
    line.push_str(&sanitize_value(name));
    line.push_str(" source=");
    line.push_str(&sanitize_value(source));
    line.push_str(" traceId=");
    line.push_str(&trace_id.to_string());
    line.push_str(" spanId=");
    line.push_str(&span_id.to_string());
    for parent in parents {
        line.push_str(" parent=");
        line.push_str(&parent.to_string());
    }
    for follows in follows_from {
        line.push_str(" followsFrom=");
        line.push_str(&follows.to_string());
    }

    let span_log_tag = (SPAN_LOG_KEY.to_owned(), "true".to_owned());
    let synthetic = if span_logs.is_empty() {
        None
    } else {
        Some(&span_log_tag)
    };
    let mut seen = HashSet::new();
    for (key, val) in tags.iter().chain(synthetic) {
        if is_blank(key) {
            return Err(SdkError::InvalidArgument(
                "span tag key cannot be blank".to_owned(),
            ));
        }
        if is_blank(val) {
            return Err(SdkError::InvalidArgument(
                "span tag value cannot be blank".to_owned(),
            ));
        }
        let mut rendered = sanitize_name(key);
        rendered.push('=');
        rendered.push_str(&sanitize_value(val));
        if seen.insert(rendered.clone()) {
            line.push(' ');
            line.push_str(&rendered);
        }
    }
    line.push(' ');
    line.push_str(&start_millis.to_string());
    line.push(' ');
    line.push_str(&duration_millis.to_string());
    line.push('\n');
    Ok(line)
}

#[derive(Serialize)]
struct SpanLogEnvelope<'a> {
    #[serde(rename = "traceId")]
    trace_id: String,
    #[serde(rename = "spanId")]
    span_id: String,
    logs: &'a [SpanLog],
    span: &'a str,
    #[serde(rename = "_scrambler", skip_serializing_if = "Option::is_none")]
    scrambler: Option<&'a str>,
}

/// Serialize span logs to the JSON envelope format.
///
/// The envelope embeds the full span line (including its trailing newline)
/// under the `span` key so the receiver can correlate logs with the span.
///
/// # Errors
/// `InvalidArgument` when the envelope cannot be rendered as JSON.
pub fn span_log_line(
    trace_id: Uuid,
    span_id: Uuid,
    span_logs: &[SpanLog],
    span_line: &str,
    scrambler: Option<&str>,
) -> Result<String, SdkError> {
    let envelope = SpanLogEnvelope {
        trace_id: trace_id.to_string(),
        span_id: span_id.to_string(),
        logs: span_logs,
        span: span_line,
        scrambler,
    };
    let mut out = serde_json::to_string(&envelope)
        .map_err(|e| SdkError::InvalidArgument(format!("span log is not serializable: {e}")))?;
    out.push('\n');
    Ok(out)
}

#[derive(Serialize)]
struct EventEnvelope<'a> {
    name: &'a str,
    annotations: std::collections::BTreeMap<&'a str, &'a str>,
    hosts: [&'a str; 1],
    #[serde(rename = "startTime")]
    start_time: i64,
    #[serde(rename = "endTime")]
    end_time: i64,
    tags: &'a [String],
}

/// Shared validation for both event forms: resolve the source and sort the
/// annotations so the rendered output is deterministic.
fn validate_event<'a>(
    name: &str,
    source: &'a str,
    tags: &[String],
    annotations: &'a HashMap<String, String>,
    default_source: &'a str,
) -> Result<(&'a str, std::collections::BTreeMap<&'a str, &'a str>), SdkError> {
    if is_blank(name) {
        return Err(SdkError::InvalidArgument(
            "event name cannot be blank".to_owned(),
        ));
    }
    for tag in tags {
        if is_blank(tag) {
            return Err(SdkError::InvalidArgument(
                "event tag cannot be blank".to_owned(),
            ));
        }
    }
    let mut sorted = std::collections::BTreeMap::new();
    for (key, val) in annotations {
        if is_blank(key) {
            return Err(SdkError::InvalidArgument(
                "event annotation key cannot be blank".to_owned(),
            ));
        }
        if is_blank(val) {
            return Err(SdkError::InvalidArgument(
                "event annotation value cannot be blank".to_owned(),
            ));
        }
        sorted.insert(key.as_str(), val.as_str());
    }
    let source = if is_blank(source) { default_source } else { source };
    Ok((source, sorted))
}

/// Serialize an event to the JSON body used by direct ingestion.
///
/// `endTime` defaults to `startTime + 1` when absent, and `hosts` carries
/// the single resolved source.
///
/// # Errors
/// `InvalidArgument` when the name, a tag, or an annotation key or value
/// is blank.
pub fn event_json(
    name: &str,
    start_millis: i64,
    end_millis: Option<i64>,
    source: &str,
    tags: &[String],
    annotations: &HashMap<String, String>,
    default_source: &str,
) -> Result<String, SdkError> {
    let (source, annotations) = validate_event(name, source, tags, annotations, default_source)?;
    let envelope = EventEnvelope {
        name,
        annotations,
        hosts: [source],
        start_time: start_millis,
        end_time: end_millis.unwrap_or(start_millis + 1),
        tags,
    };
    serde_json::to_string(&envelope)
        .map_err(|e| SdkError::InvalidArgument(format!("event is not serializable: {e}")))
}

/// Serialize an event to the line format used by proxy ingestion.
///
/// `@Event <startMs> <endMs> "<name>" key="value" ... host="<source>"
/// tag="<t>" ...\n`
///
/// Annotation keys render bare (the proxy parses them as identifiers);
/// their values, the name, the host and the tags are quoted and escaped.
/// Annotations render in key order.
///
/// # Errors
/// `InvalidArgument` on the same blank inputs as [`event_json`].
pub fn event_line(
    name: &str,
    start_millis: i64,
    end_millis: Option<i64>,
    source: &str,
    tags: &[String],
    annotations: &HashMap<String, String>,
    default_source: &str,
) -> Result<String, SdkError> {
    let (source, annotations) = validate_event(name, source, tags, annotations, default_source)?;

    let mut line = String::from("@Event ");
    line.push_str(&start_millis.to_string());
    line.push(' ');
    line.push_str(&end_millis.unwrap_or(start_millis + 1).to_string());
    line.push(' ');
    line.push_str(&sanitize_value(name));
    for (key, val) in annotations {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&sanitize_value(val));
    }
    line.push_str(" host=");
    line.push_str(&sanitize_value(source));
    for tag in tags {
        line.push_str(" tag=");
        line.push_str(&sanitize_value(tag));
    }
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn all_granularities() -> BTreeSet<HistogramGranularity> {
        [
            HistogramGranularity::Minute,
            HistogramGranularity::Hour,
            HistogramGranularity::Day,
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn metric_line_with_timestamp_and_tags() {
        let line = metric_line(
            "new-york.power.usage",
            42422.0,
            Some(1493773500),
            "localhost",
            &tags(&[("datacenter", "dc1")]),
            "defaultSource",
        )
        .unwrap();
        assert_eq!(
            line,
            "\"new-york.power.usage\" 42422.0 1493773500 source=\"localhost\" \"datacenter\"=\"dc1\"\n"
        );
    }

    #[test]
    fn metric_line_without_timestamp() {
        let line = metric_line(
            "new-york.power.usage",
            42422.0,
            None,
            "localhost",
            &HashMap::new(),
            "defaultSource",
        )
        .unwrap();
        assert_eq!(line, "\"new-york.power.usage\" 42422.0 source=\"localhost\"\n");
    }

    #[test]
    fn metric_line_substitutes_default_source() {
        let line = metric_line("cpu.load", 0.5, None, "  ", &HashMap::new(), "host-1").unwrap();
        assert_eq!(line, "\"cpu.load\" 0.5 source=\"host-1\"\n");
    }

    #[test]
    fn metric_line_keeps_fractional_values() {
        let line = metric_line("cpu.load", 1.5, None, "h", &HashMap::new(), "d").unwrap();
        assert!(line.contains(" 1.5 "));
    }

    #[test]
    fn metric_line_rejects_blank_inputs() {
        assert!(matches!(
            metric_line("", 1.0, None, "s", &HashMap::new(), "d"),
            Err(SdkError::InvalidArgument(_))
        ));
        assert!(matches!(
            metric_line("m", 1.0, None, "s", &tags(&[(" ", "v")]), "d"),
            Err(SdkError::InvalidArgument(_))
        ));
        assert!(matches!(
            metric_line("m", 1.0, None, "s", &tags(&[("k", " ")]), "d"),
            Err(SdkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn histogram_line_renders_each_granularity() {
        let line = histogram_line(
            "request.latency",
            &[(30.0, 20), (5.1, 10)],
            &all_granularities(),
            Some(1493773500),
            "appServer1",
            &tags(&[("region", "us-west")]),
            "defaultSource",
        )
        .unwrap();
        assert_eq!(
            line,
            concat!(
                "!M 1493773500 #20 30.0 #10 5.1 \"request.latency\" source=\"appServer1\" \"region\"=\"us-west\"\n",
                "!H 1493773500 #20 30.0 #10 5.1 \"request.latency\" source=\"appServer1\" \"region\"=\"us-west\"\n",
                "!D 1493773500 #20 30.0 #10 5.1 \"request.latency\" source=\"appServer1\" \"region\"=\"us-west\"\n",
            )
        );
    }

    #[test]
    fn histogram_line_without_timestamp() {
        let granularities: BTreeSet<_> = [HistogramGranularity::Minute].into_iter().collect();
        let line = histogram_line(
            "request.latency",
            &[(30.0, 20)],
            &granularities,
            None,
            "appServer1",
            &HashMap::new(),
            "defaultSource",
        )
        .unwrap();
        assert_eq!(line, "!M #20 30.0 \"request.latency\" source=\"appServer1\"\n");
    }

    #[test]
    fn histogram_line_rejects_empty_centroids_and_granularities() {
        assert!(matches!(
            histogram_line(
                "h",
                &[],
                &all_granularities(),
                None,
                "s",
                &HashMap::new(),
                "d"
            ),
            Err(SdkError::InvalidArgument(_))
        ));
        assert!(matches!(
            histogram_line(
                "h",
                &[(1.0, 1)],
                &BTreeSet::new(),
                None,
                "s",
                &HashMap::new(),
                "d"
            ),
            Err(SdkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn span_line_with_parent_and_tags() {
        let trace_id = Uuid::parse_str("7b3bf470-9456-11e8-9eb6-529269fb1459").unwrap();
        let span_id = Uuid::parse_str("0313bafe-9457-11e8-9eb6-529269fb1459").unwrap();
        let parent = Uuid::parse_str("2f64e538-9457-11e8-9eb6-529269fb1459").unwrap();
        let follows = Uuid::parse_str("5f64e538-9457-11e8-9eb6-529269fb1459").unwrap();
        let line = span_line(
            "getAllUsers",
            1493773500,
            343500,
            "localhost",
            trace_id,
            span_id,
            &[parent],
            &[follows],
            &[
                ("application".to_owned(), "Wavefront".to_owned()),
                ("http.method".to_owned(), "GET".to_owned()),
            ],
            &[],
            "defaultSource",
        )
        .unwrap();
        assert_eq!(
            line,
            "\"getAllUsers\" source=\"localhost\" \
             traceId=7b3bf470-9456-11e8-9eb6-529269fb1459 \
             spanId=0313bafe-9457-11e8-9eb6-529269fb1459 \
             parent=2f64e538-9457-11e8-9eb6-529269fb1459 \
             followsFrom=5f64e538-9457-11e8-9eb6-529269fb1459 \
             \"application\"=\"Wavefront\" \"http.method\"=\"GET\" 1493773500 343500\n"
        );
    }

    #[test]
    fn span_line_without_parents_or_tags() {
        let trace_id = Uuid::parse_str("7b3bf470-9456-11e8-9eb6-529269fb1459").unwrap();
        let span_id = Uuid::parse_str("0313bafe-9457-11e8-9eb6-529269fb1459").unwrap();
        let line = span_line(
            "getAllUsers",
            1493773500,
            343500,
            "localhost",
            trace_id,
            span_id,
            &[],
            &[],
            &[],
            &[],
            "defaultSource",
        )
        .unwrap();
        assert_eq!(
            line,
            "\"getAllUsers\" source=\"localhost\" \
             traceId=7b3bf470-9456-11e8-9eb6-529269fb1459 \
             spanId=0313bafe-9457-11e8-9eb6-529269fb1459 1493773500 343500\n"
        );
    }

    #[test]
    fn span_line_drops_duplicate_tags() {
        let trace_id = Uuid::new_v4();
        let span_id = Uuid::new_v4();
        let line = span_line(
            "getAllUsers",
            0,
            1,
            "localhost",
            trace_id,
            span_id,
            &[],
            &[],
            &[
                ("application".to_owned(), "Wavefront".to_owned()),
                ("application".to_owned(), "Wavefront".to_owned()),
            ],
            &[],
            "defaultSource",
        )
        .unwrap();
        assert_eq!(line.matches("\"application\"=\"Wavefront\"").count(), 1);
    }

    #[test]
    fn span_line_appends_span_log_tag() {
        let logs = vec![SpanLog::new(1635123789456000, BTreeMap::new())];
        let line = span_line(
            "getAllUsers",
            0,
            1,
            "localhost",
            Uuid::new_v4(),
            Uuid::new_v4(),
            &[],
            &[],
            &[],
            &logs,
            "defaultSource",
        )
        .unwrap();
        assert!(line.contains(" \"_spanLogs\"=\"true\" "));
    }

    #[test]
    fn span_line_rejects_blank_tag_key() {
        let result = span_line(
            "name",
            0,
            1,
            "s",
            Uuid::new_v4(),
            Uuid::new_v4(),
            &[],
            &[],
            &[(" ".to_owned(), "v".to_owned())],
            &[],
            "d",
        );
        assert!(matches!(result, Err(SdkError::InvalidArgument(_))));
    }

    #[test]
    fn span_log_envelope_embeds_span_line() {
        let trace_id = Uuid::parse_str("7b3bf470-9456-11e8-9eb6-529269fb1459").unwrap();
        let span_id = Uuid::parse_str("0313bafe-9457-11e8-9eb6-529269fb1459").unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("FooLogKey".to_owned(), "FooLogValue".to_owned());
        let logs = vec![SpanLog::new(1635123789456000, fields)];
        let span = "\"getAllUsers\" source=\"localhost\" 0 1\n";
        let line = span_log_line(trace_id, span_id, &logs, span, None).unwrap();
        assert_eq!(
            line,
            "{\"traceId\":\"7b3bf470-9456-11e8-9eb6-529269fb1459\",\
             \"spanId\":\"0313bafe-9457-11e8-9eb6-529269fb1459\",\
             \"logs\":[{\"timestamp\":1635123789456000,\
             \"fields\":{\"FooLogKey\":\"FooLogValue\"}}],\
             \"span\":\"\\\"getAllUsers\\\" source=\\\"localhost\\\" 0 1\\n\"}\n"
        );
    }

    #[test]
    fn span_log_envelope_carries_the_scrambler() {
        let line = span_log_line(
            Uuid::parse_str("7b3bf470-9456-11e8-9eb6-529269fb1459").unwrap(),
            Uuid::parse_str("0313bafe-9457-11e8-9eb6-529269fb1459").unwrap(),
            &[],
            "\"s\" source=\"h\" 0 1\n",
            Some("a1b2c3"),
        )
        .unwrap();
        assert!(line.contains("\"_scrambler\":\"a1b2c3\""));
        assert!(line.ends_with("}\n"));
    }

    #[test]
    fn event_json_defaults_end_time() {
        let body = event_json(
            "event-restart",
            1590678089,
            None,
            "localhost",
            &[],
            &HashMap::new(),
            "defaultSource",
        )
        .unwrap();
        assert_eq!(
            body,
            "{\"name\":\"event-restart\",\"annotations\":{},\"hosts\":[\"localhost\"],\
             \"startTime\":1590678089,\"endTime\":1590678090,\"tags\":[]}"
        );
    }

    #[test]
    fn event_json_with_annotations_and_tags() {
        let body = event_json(
            "event-backup",
            1590678089,
            Some(1590679089),
            "localhost",
            &["env:test".to_owned()],
            &tags(&[("severity", "severe")]),
            "defaultSource",
        )
        .unwrap();
        assert_eq!(
            body,
            "{\"name\":\"event-backup\",\"annotations\":{\"severity\":\"severe\"},\
             \"hosts\":[\"localhost\"],\"startTime\":1590678089,\"endTime\":1590679089,\
             \"tags\":[\"env:test\"]}"
        );
    }

    #[test]
    fn event_line_renders_proxy_form() {
        let line = event_line(
            "event-backup",
            1590678089,
            Some(1590679089),
            "localhost",
            &["test".to_owned()],
            &tags(&[("severity", "severe")]),
            "defaultSource",
        )
        .unwrap();
        assert_eq!(
            line,
            "@Event 1590678089 1590679089 \"event-backup\" severity=\"severe\" \
             host=\"localhost\" tag=\"test\"\n"
        );
    }

    #[test]
    fn event_rejects_blank_annotation_value() {
        let result = event_json(
            "event",
            0,
            None,
            "s",
            &[],
            &tags(&[("severity", " ")]),
            "d",
        );
        assert!(matches!(result, Err(SdkError::InvalidArgument(_))));
    }
}
