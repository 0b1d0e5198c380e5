// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

/// A background loop owned by a sender.
///
/// Every periodic job in the SDK is a `Worker`: the flush loop draining the
/// per-family buffers, the internal-metrics reporter, the CSP pre-expiry
/// token refresher and the heartbeater. A sender spawns its workers onto its
/// own runtime and stops them through a shared cancellation token, so
/// `run` futures must be cancel-safe at their `select!` points: a worker
/// cancelled between ticks leaves queued telemetry intact for the closing
/// flush.
pub trait Worker {
    /// Loop until cancelled. Does not return under normal operation.
    fn run(&mut self) -> impl std::future::Future<Output = ()> + Send;
}
