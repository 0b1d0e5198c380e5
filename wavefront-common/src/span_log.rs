// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::Serialize;

/// A single span log entry: a microsecond timestamp and a set of string
/// fields, rendered verbatim into the span-log envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpanLog {
    /// Timestamp of the log entry in microseconds since the epoch.
    pub timestamp: i64,
    /// Log fields. A sorted map keeps the rendered JSON deterministic.
    pub fields: BTreeMap<String, String>,
}

impl SpanLog {
    /// Construct a span log entry.
    pub fn new(timestamp: i64, fields: BTreeMap<String, String>) -> Self {
        Self { timestamp, fields }
    }
}
