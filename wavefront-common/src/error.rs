// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the Wavefront ingestion SDK.

use thiserror::Error;

/// Errors surfaced by the SDK.
#[derive(Debug, Error)]
pub enum SdkError {
    /// A serializer rejected its input (blank name, blank tag key or value,
    /// empty centroid list, empty granularity set).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A bounded buffer refused an enqueue because it is at capacity. The
    /// payload carries the data family whose buffer overflowed.
    #[error("{0} buffer is full")]
    QueueFull(&'static str),

    /// A TCP or HTTP transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Token acquisition against CSP failed.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The client was misconfigured (unknown endpoint scheme, duplicate
    /// endpoint, missing OAuth secret).
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_display() {
        let err = SdkError::InvalidArgument("metric name cannot be blank".to_owned());
        assert_eq!(err.to_string(), "invalid argument: metric name cannot be blank");
    }

    #[test]
    fn queue_full_display() {
        let err = SdkError::QueueFull("points");
        assert_eq!(err.to_string(), "points buffer is full");
    }

    #[test]
    fn transport_display() {
        let err = SdkError::Transport("connection refused".to_owned());
        assert_eq!(err.to_string(), "transport error: connection refused");
    }

    #[test]
    fn configuration_display() {
        let err = SdkError::Configuration("unknown scheme 'ftp'".to_owned());
        assert_eq!(err.to_string(), "invalid configuration: unknown scheme 'ftp'");
    }
}
