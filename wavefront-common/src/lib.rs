// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared building blocks for the Wavefront ingestion SDK.
//!
//! This crate holds everything both transports agree on: the line-protocol
//! serializers and their input sanitization, the wire-contract constants, the
//! SDK-wide error taxonomy, and small infrastructure helpers (gzip framing,
//! the background `Worker` trait) used by the sender crate.

pub mod compression;
pub mod constants;
pub mod error;
pub mod granularity;
pub mod sanitize;
pub mod serialization;
pub mod span_log;
pub mod worker;

pub use error::SdkError;
pub use granularity::HistogramGranularity;
pub use span_log::SpanLog;
