// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Line-protocol transport towards a Wavefront proxy: one reconnecting TCP
//! connection per data family.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use wavefront_common::SdkError;

use crate::client::DataFamily;
use crate::registry::{SdkCounter, SdkMetricsRegistry};

/// Per-family TCP ports of a Wavefront proxy. A family without a port is
/// discarded by the client.
///
/// Proxies conventionally listen for each data format on its own port, so
/// the client opens one connection per configured family rather than
/// multiplexing formats over a single stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyPorts {
    /// Port accepting metric lines, conventionally 2878.
    pub metrics: Option<u16>,
    /// Port accepting histogram distribution lines.
    pub distribution: Option<u16>,
    /// Port accepting span and span-log lines.
    pub tracing: Option<u16>,
    /// Port accepting event lines.
    pub event: Option<u16>,
}

impl ProxyPorts {
    /// All families multiplexed over a single port.
    pub fn all(port: u16) -> Self {
        Self {
            metrics: Some(port),
            distribution: Some(port),
            tracing: Some(port),
            event: Some(port),
        }
    }
}

/// A reconnecting TCP connection to one `(host, port)` proxy listener.
///
/// Sends are serialized on the connection lock. An I/O failure drops the
/// socket and retries exactly once on a fresh connection before counting a
/// failure and surfacing a transport error.
#[derive(Debug)]
pub struct ProxyConnectionHandler {
    addr: String,
    timeout: Option<Duration>,
    stream: Mutex<Option<TcpStream>>,
    failures: AtomicU64,
    errors: Arc<SdkCounter>,
}

impl ProxyConnectionHandler {
    pub(crate) fn new(
        host: &str,
        port: u16,
        timeout: Option<Duration>,
        errors: Arc<SdkCounter>,
    ) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            timeout,
            stream: Mutex::new(None),
            failures: AtomicU64::new(0),
            errors,
        }
    }

    /// Number of terminally-failed sends on this connection.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    async fn connect(&self) -> io::Result<TcpStream> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, TcpStream::connect(&self.addr))
                .await
                .map_err(|_| {
                    io::Error::new(io::ErrorKind::TimedOut, "proxy connect timed out")
                })?,
            None => TcpStream::connect(&self.addr).await,
        }
    }

    /// One attempt: lazy-connect, write the line, drop the socket on error.
    async fn try_send(&self, line: &str) -> io::Result<()> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let result = match guard.as_mut() {
            Some(stream) => stream.write_all(line.as_bytes()).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no proxy connection",
            )),
        };
        if result.is_err() {
            *guard = None;
        }
        result
    }

    /// Send one line, reconnecting and retrying exactly once on failure.
    ///
    /// A TCP write can fail long after the proxy went away (the failure
    /// often surfaces on the write following the dead one), so the single
    /// retry on a fresh connection covers the common proxy-restart case
    /// without hiding a proxy that is actually down.
    ///
    /// # Errors
    /// `Transport` when the retry also fails; the failure counter and the
    /// family's error counter have been incremented by then.
    pub async fn send_data(&self, line: &str) -> Result<(), SdkError> {
        if self.try_send(line).await.is_ok() {
            return Ok(());
        }
        match self.try_send(line).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.errors.inc();
                Err(SdkError::Transport(format!(
                    "proxy send to {} failed: {err}",
                    self.addr
                )))
            }
        }
    }

    /// Close the connection if one is open.
    pub async fn close(&self) {
        let mut guard = self.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            let _ = stream.shutdown().await;
        }
    }
}

/// The proxy-side transport: one handler per configured data family. Span
/// logs travel over the tracing connection.
#[derive(Debug)]
pub(crate) struct ProxyTransport {
    metrics: Option<ProxyConnectionHandler>,
    distributions: Option<ProxyConnectionHandler>,
    tracing: Option<ProxyConnectionHandler>,
    events: Option<ProxyConnectionHandler>,
}

impl ProxyTransport {
    pub(crate) fn new(
        host: &str,
        ports: ProxyPorts,
        timeout: Option<Duration>,
        registry: &SdkMetricsRegistry,
    ) -> Self {
        let handler = |port: Option<u16>, label: &str| {
            port.map(|port| {
                ProxyConnectionHandler::new(
                    host,
                    port,
                    timeout,
                    registry.new_delta_counter(&format!("errors.{label}")),
                )
            })
        };
        Self {
            metrics: handler(ports.metrics, "metricHandler"),
            distributions: handler(ports.distribution, "histogramHandler"),
            tracing: handler(ports.tracing, "tracingHandler"),
            events: handler(ports.event, "eventHandler"),
        }
    }

    /// The connection carrying this family, `None` when no port was
    /// configured for it.
    pub(crate) fn handler(&self, family: DataFamily) -> Option<&ProxyConnectionHandler> {
        match family {
            DataFamily::Points => self.metrics.as_ref(),
            DataFamily::Histograms => self.distributions.as_ref(),
            DataFamily::Spans | DataFamily::SpanLogs => self.tracing.as_ref(),
            DataFamily::Events => self.events.as_ref(),
        }
    }

    pub(crate) fn failure_count(&self) -> u64 {
        [
            self.metrics.as_ref(),
            self.distributions.as_ref(),
            self.tracing.as_ref(),
            self.events.as_ref(),
        ]
        .into_iter()
        .flatten()
        .map(ProxyConnectionHandler::failure_count)
        .sum()
    }

    pub(crate) async fn close(&self) {
        for handler in [
            self.metrics.as_ref(),
            self.distributions.as_ref(),
            self.tracing.as_ref(),
            self.events.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            handler.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn test_handler(port: u16) -> ProxyConnectionHandler {
        ProxyConnectionHandler::new(
            "127.0.0.1",
            port,
            Some(Duration::from_secs(1)),
            Arc::new(SdkCounter::default()),
        )
    }

    #[tokio::test]
    async fn sends_lines_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            socket.read_to_string(&mut received).await.unwrap();
            received
        });

        let handler = test_handler(port);
        handler
            .send_data("\"cpu.load\" 1.0 source=\"host\"\n")
            .await
            .unwrap();
        handler
            .send_data("\"cpu.load\" 2.0 source=\"host\"\n")
            .await
            .unwrap();
        handler.close().await;

        let received = server.await.unwrap();
        assert_eq!(
            received,
            "\"cpu.load\" 1.0 source=\"host\"\n\"cpu.load\" 2.0 source=\"host\"\n"
        );
        assert_eq!(handler.failure_count(), 0);
    }

    #[tokio::test]
    async fn counts_failures_when_unreachable() {
        // Bind and drop a listener so the port is closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let errors = Arc::new(SdkCounter::default());
        let handler = ProxyConnectionHandler::new(
            "127.0.0.1",
            port,
            Some(Duration::from_secs(1)),
            errors.clone(),
        );
        let result = handler.send_data("line\n").await;
        assert!(matches!(result, Err(SdkError::Transport(_))));
        assert_eq!(handler.failure_count(), 1);
        assert_eq!(errors.count(), 1);
    }

    #[tokio::test]
    async fn reconnects_after_the_server_restarts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handler = test_handler(port);
        let (socket, _) = tokio::join!(listener.accept(), handler.send_data("one\n"))
            .0
            .unwrap();
        // Sever the first connection server-side.
        drop(socket);
        drop(listener);
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();

        // The write may take a couple of sends to observe the reset; the
        // handler reconnects by itself and failures stay transient.
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            socket.read_to_string(&mut received).await.unwrap();
            received
        });
        for _ in 0..20 {
            let _ = handler.send_data("two\n").await;
            tokio::task::yield_now().await;
        }
        handler.close().await;
        let received = server.await.unwrap();
        assert!(received.contains("two\n"));
    }
}
