// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client library for sending metrics, histogram distributions, tracing
//! spans and events to a Wavefront-compatible backend.
//!
//! Two transports are supported, selected by the endpoint URL given to the
//! [`factory::WavefrontClientFactory`]:
//!
//! - **Proxy ingestion** (`proxy://host:port`): line protocol over long-lived
//!   TCP connections, one per data family.
//! - **Direct ingestion** (`https://[token@]host`): gzip-compressed batches
//!   over HTTPS with bearer-token authentication, where the token is either
//!   static or minted by the CSP token service ([`auth`]).
//!
//! Every client runs an asynchronous pipeline: `send_*` calls serialize the
//! payload, push the resulting line onto a bounded per-family buffer and
//! return immediately; a background flush worker drains the buffers in
//! batches on a fixed interval. Internal SDK metrics describing the pipeline
//! are reported through the same pipeline by the [`registry`].

pub mod application_tags;
pub mod auth;
pub mod client;
pub mod direct;
pub mod factory;
pub mod heartbeater;
pub mod histogram;
pub mod multi;
pub mod proxy;
pub mod registry;

mod queue;
mod sender;

pub use client::{WavefrontClient, WavefrontClientBuilder};
pub use factory::WavefrontClientFactory;
pub use multi::WavefrontMultiSender;
pub use sender::WavefrontSender;

/// Extension trait for `Mutex` acquiring a lock and panicking if the lock is
/// poisoned. A poisoned lock means another thread panicked while holding it,
/// at which point the guarded state cannot be trusted.
pub(crate) trait MutexExt<T> {
    fn lock_or_panic(&self) -> std::sync::MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for std::sync::Mutex<T> {
    #[allow(clippy::unwrap_used)]
    fn lock_or_panic(&self) -> std::sync::MutexGuard<'_, T> {
        self.lock().unwrap()
    }
}
