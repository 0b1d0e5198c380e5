// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The queued ingestion client shared by both transports.
//!
//! `send_*` calls serialize their payload and push the line onto a bounded
//! per-family buffer; a background worker drains the buffers in batches on a
//! fixed interval and hands them to the transport. Per-family counters
//! (`valid`, `invalid`, `dropped`, `report.errors`, `report.<status>`) and
//! buffer gauges are kept in the internal metrics registry, which reports
//! them through this same pipeline.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use url::Url;
use uuid::Uuid;
use wavefront_common::constants::{
    EVENT_FORMAT, HISTOGRAM_FORMAT, METRIC_FORMAT, SDK_METRIC_PREFIX, SPAN_LOG_FORMAT,
    TRACING_SPAN_FORMAT,
};
use wavefront_common::serialization::{
    event_json, event_line, histogram_line, metric_line, span_line, span_log_line,
};
use wavefront_common::worker::Worker;
use wavefront_common::{HistogramGranularity, SdkError, SpanLog};

use crate::auth::{CspCredentials, CspRefreshWorker, CspTokenService, DEFAULT_CSP_BASE_URL};
use crate::direct::{Auth, DirectReporter};
use crate::proxy::{ProxyPorts, ProxyTransport};
use crate::queue::BoundedBuffer;
use crate::registry::{RegistryReporter, SdkCounter, SdkMetricsRegistry, REPORTING_INTERVAL};
use crate::sender::{delta_counter_name, WavefrontSender};

const DEFAULT_MAX_QUEUE_SIZE: usize = 50_000;
const DEFAULT_BATCH_SIZE: usize = 10_000;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// The data families the pipeline keeps separate buffers and counters for.
///
/// Each family owns one bounded buffer, one set of internal counters and,
/// on the proxy transport, one TCP connection. Families flush independently:
/// a backlog of spans never delays metric delivery, and ordering is only
/// guaranteed within a family, never across families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DataFamily {
    Points,
    Histograms,
    Spans,
    SpanLogs,
    Events,
}

impl DataFamily {
    pub(crate) const ALL: [DataFamily; 5] = [
        DataFamily::Points,
        DataFamily::Histograms,
        DataFamily::Spans,
        DataFamily::SpanLogs,
        DataFamily::Events,
    ];

    /// Format selector on the direct-ingestion report endpoint.
    pub(crate) fn format(self) -> &'static str {
        match self {
            DataFamily::Points => METRIC_FORMAT,
            DataFamily::Histograms => HISTOGRAM_FORMAT,
            DataFamily::Spans => TRACING_SPAN_FORMAT,
            DataFamily::SpanLogs => SPAN_LOG_FORMAT,
            DataFamily::Events => EVENT_FORMAT,
        }
    }

    /// Prefix of this family's internal metrics.
    pub(crate) fn prefix(self) -> &'static str {
        match self {
            DataFamily::Points => "points",
            DataFamily::Histograms => "histograms",
            DataFamily::Spans => "spans",
            DataFamily::SpanLogs => "span_logs",
            DataFamily::Events => "events",
        }
    }

    /// Families whose batches may not exceed a fixed size regardless of the
    /// configured batch size. Events go one per request on direct ingestion.
    pub(crate) fn batch_size_override(self) -> Option<usize> {
        match self {
            DataFamily::Events => Some(1),
            _ => None,
        }
    }
}

/// Counters every family exposes through the registry.
///
/// Registered as delta counters under `<family>.<name>`, so each report
/// carries the change since the previous one. Together they account for
/// every line handed to a `send_*` call: serialized lines are `valid` or
/// `invalid`, accepted lines that later overflow a buffer or meet a
/// terminal HTTP status are `dropped`, and lines addressed to a proxy
/// family without a configured port are `discarded`.
pub(crate) struct FamilyCounters {
    /// Lines that serialized successfully.
    pub(crate) valid: Arc<SdkCounter>,
    /// Send calls rejected by the serializer.
    pub(crate) invalid: Arc<SdkCounter>,
    /// Lines lost to a full buffer or a terminal report status.
    pub(crate) dropped: Arc<SdkCounter>,
    /// Lines for a proxy family with no port configured.
    pub(crate) discarded: Arc<SdkCounter>,
    /// Report attempts that failed and left their lines eligible for retry.
    pub(crate) report_errors: Arc<SdkCounter>,
}

impl FamilyCounters {
    fn new(registry: &SdkMetricsRegistry, prefix: &str) -> Self {
        Self {
            valid: registry.new_delta_counter(&format!("{prefix}.valid")),
            invalid: registry.new_delta_counter(&format!("{prefix}.invalid")),
            dropped: registry.new_delta_counter(&format!("{prefix}.dropped")),
            discarded: registry.new_delta_counter(&format!("{prefix}.discarded")),
            report_errors: registry.new_delta_counter(&format!("{prefix}.report.errors")),
        }
    }
}

/// One family's buffer and accounting, shared by the producer facade and
/// the flush worker.
pub(crate) struct FamilyPipeline {
    pub(crate) family: DataFamily,
    pub(crate) queue: Arc<BoundedBuffer>,
    pub(crate) counters: FamilyCounters,
}

/// Where flushed batches go: gzip POSTs to the direct-ingestion API, or
/// line writes over per-family TCP connections to a proxy.
pub(crate) enum Transport {
    Direct(DirectReporter),
    Proxy(ProxyTransport),
}

impl Transport {
    /// Whether this transport can carry the family at all. Direct ingestion
    /// accepts everything; a proxy accepts only families with a configured
    /// port.
    fn accepts(&self, family: DataFamily) -> bool {
        match self {
            Transport::Direct(_) => true,
            Transport::Proxy(proxy) => proxy.handler(family).is_some(),
        }
    }

    fn failure_count(&self) -> u64 {
        match self {
            Transport::Direct(reporter) => reporter.failure_count(),
            Transport::Proxy(proxy) => proxy.failure_count(),
        }
    }

    async fn close(&self) {
        if let Transport::Proxy(proxy) = self {
            proxy.close().await;
        }
    }
}

/// The per-family buffers, the transport, and the batch/report machinery.
/// Shared between the client facade and the flush worker.
pub(crate) struct Pipeline {
    pub(crate) families: [FamilyPipeline; 5],
    pub(crate) transport: Transport,
    batch_size: usize,
    registry: SdkMetricsRegistry,
}

impl Pipeline {
    pub(crate) fn family(&self, family: DataFamily) -> &FamilyPipeline {
        &self.families[family as usize]
    }

    /// Flush every family once, in the fixed family order.
    pub(crate) async fn flush_all(&self) {
        for family in &self.families {
            self.flush_family(family).await;
        }
    }

    /// Drain up to the currently-queued count and send it in batches.
    ///
    /// The drain takes a snapshot of the buffer: producers enqueueing while
    /// a flush is in flight are picked up by the next tick rather than
    /// extending this one. Batches are capped by the configured batch size,
    /// or by the family's own override (events go one per request).
    async fn flush_family(&self, family: &FamilyPipeline) {
        let mut lines = family.queue.drain_snapshot();
        if lines.is_empty() {
            return;
        }
        let batch_size = family
            .family
            .batch_size_override()
            .unwrap_or(self.batch_size)
            .max(1);
        while !lines.is_empty() {
            let tail = lines.split_off(batch_size.min(lines.len()));
            let chunk = std::mem::replace(&mut lines, tail);
            self.report_chunk(family, chunk).await;
        }
    }

    /// Hand one batch to the transport and apply its outcome to the
    /// family's counters and, on retryable direct failures, its buffer.
    pub(crate) async fn report_chunk(&self, family: &FamilyPipeline, chunk: Vec<String>) {
        if chunk.is_empty() {
            return;
        }
        match &self.transport {
            Transport::Direct(reporter) => self.report_direct(reporter, family, chunk).await,
            Transport::Proxy(proxy) => self.report_proxy(proxy, family, chunk).await,
        }
    }

    /// Report one batch over direct ingestion and classify the status.
    ///
    /// - 2xx: done; only the `report.<status>` counter moves.
    /// - 401: the token is bad, retrying cannot help; the batch is dropped.
    /// - 403: the account lacks the ingestion entitlement; the batch is
    ///   dropped. The metric format gets its own wording since direct data
    ///   ingestion is a separately-enabled capability.
    /// - Anything else (including the `-1` no-response sentinel): the batch
    ///   is requeued for the next flush; whatever no longer fits the buffer
    ///   is dropped.
    async fn report_direct(
        &self,
        reporter: &DirectReporter,
        family: &FamilyPipeline,
        chunk: Vec<String>,
    ) {
        let status = match family.family {
            // Events are never batched: the chunk holds exactly one.
            DataFamily::Events => match chunk.first() {
                Some(event) => reporter.report_event(event).await,
                None => return,
            },
            _ => reporter.report(family.family.format(), &chunk.concat()).await,
        };
        if status >= 0 {
            self.registry
                .new_delta_counter(&format!("{}.report.{}", family.family.prefix(), status))
                .inc();
        }
        if (200..300).contains(&status) {
            return;
        }
        match status {
            401 => {
                error!(
                    family = family.family.prefix(),
                    "error sending data via direct ingestion: unauthorized - please verify the \
                     API token"
                );
                family.counters.dropped.inc_by(chunk.len() as i64);
            }
            403 => {
                if family.family == DataFamily::Points {
                    error!(
                        "error sending data via direct ingestion: forbidden - please verify that \
                         direct data ingestion is enabled for your account"
                    );
                } else {
                    error!(
                        data_format = family.family.format(),
                        "error sending data via direct ingestion: forbidden - please verify that \
                         your account is enabled for this ingestion format"
                    );
                }
                family.counters.dropped.inc_by(chunk.len() as i64);
            }
            _ => {
                // Recoverable: requeue and try again on a later flush.
                family.counters.report_errors.inc();
                let overflow = family.queue.requeue(chunk);
                if overflow > 0 {
                    family.counters.dropped.inc_by(overflow as i64);
                }
            }
        }
    }

    /// Write one batch line-by-line to the family's proxy connection.
    ///
    /// The handler already retried once on a fresh connection before
    /// surfacing an error, so a failed line is not requeued; it counts
    /// against `report.errors` and `dropped` and the flush moves on.
    async fn report_proxy(
        &self,
        proxy: &ProxyTransport,
        family: &FamilyPipeline,
        chunk: Vec<String>,
    ) {
        let Some(handler) = proxy.handler(family.family) else {
            family.counters.discarded.inc_by(chunk.len() as i64);
            warn!(
                family = family.family.prefix(),
                "cannot send data to the proxy: no port configured for this family"
            );
            return;
        };
        for line in chunk {
            if let Err(err) = handler.send_data(&line).await {
                warn!(error = %err, family = family.family.prefix(), "failed to send data to the proxy");
                family.counters.report_errors.inc();
                family.counters.dropped.inc();
            }
        }
    }
}

/// Background worker draining the buffers on every flush interval. The
/// closing flush is `close()`'s job, so cancellation just stops the timer.
pub(crate) struct FlushWorker {
    pipeline: Arc<Pipeline>,
    interval: Duration,
    cancel: CancellationToken,
}

impl FlushWorker {
    pub(crate) fn new(
        pipeline: Arc<Pipeline>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            interval,
            cancel,
        }
    }
}

impl Worker for FlushWorker {
    /// Flush every family each time the interval elapses.
    ///
    /// Cancellation wins the race against the timer, so a close never waits
    /// for a full interval; the buffers it leaves behind are drained by the
    /// closing flush.
    async fn run(&mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.interval) => {
                    self.pipeline.flush_all().await;
                }
            }
        }
    }
}

/// Where the internal metrics registry writes its own reports: straight into
/// the points buffer, bypassing the per-family accounting so self-metrics
/// never inflate it.
///
/// The sink shares the buffer with caller traffic, so its pushes compete
/// for the same bounded capacity; a full buffer surfaces as `QueueFull`,
/// which the registry logs and swallows.
#[derive(Clone)]
pub(crate) struct LineSink {
    queue: Arc<BoundedBuffer>,
    default_source: String,
}

impl LineSink {
    pub(crate) fn new(queue: Arc<BoundedBuffer>, default_source: String) -> Self {
        Self {
            queue,
            default_source,
        }
    }

    /// Serialize one internal metric and push it onto the points buffer.
    ///
    /// # Errors
    /// `InvalidArgument` when the line fails to serialize, `QueueFull` when
    /// the shared buffer is at capacity.
    pub(crate) fn send_metric(
        &self,
        name: &str,
        value: f64,
        timestamp: Option<i64>,
        source: Option<&str>,
        tags: &HashMap<String, String>,
    ) -> Result<(), SdkError> {
        let line = metric_line(
            name,
            value,
            timestamp,
            source.unwrap_or(""),
            tags,
            &self.default_source,
        )?;
        if self.queue.try_push(line) {
            Ok(())
        } else {
            Err(SdkError::QueueFull("points"))
        }
    }

    /// Push one internal delta-counter increment, prefixing the delta
    /// marker and skipping non-positive values like the public sender does.
    pub(crate) fn send_delta_counter(
        &self,
        name: &str,
        value: f64,
        source: Option<&str>,
        tags: &HashMap<String, String>,
        timestamp: Option<i64>,
    ) -> Result<(), SdkError> {
        if value <= 0.0 {
            return Ok(());
        }
        self.send_metric(&delta_counter_name(name), value, timestamp, source, tags)
    }
}

/// Numeric rendering of a semantic version for the internal `version` gauge,
/// e.g. `"1.6.3"` becomes `1.0603`.
fn sem_ver_value(version: &str) -> f64 {
    let mut parts = version.split('.');
    let mut component = |scale: f64| {
        parts
            .next()
            .and_then(|part| part.parse::<f64>().ok())
            .unwrap_or(0.0)
            * scale
    };
    component(1.0) + component(0.01) + component(0.0001)
}

/// Builder for [`WavefrontClient`].
///
/// The server address decides nothing by itself: configuring
/// [`proxy_ports`](Self::proxy_ports) selects the proxy (TCP line protocol)
/// transport, otherwise the client reports via direct ingestion.
///
/// Direct-ingestion authentication comes from one of three places, checked
/// in this order:
///
/// - [`csp_app_id`](Self::csp_app_id) + [`csp_app_secret`](Self::csp_app_secret):
///   OAuth2 client-credentials grant against CSP.
/// - [`csp_api_token`](Self::csp_api_token): a long-lived CSP API token
///   exchanged for short-lived access tokens.
/// - [`token`](Self::token): a static Wavefront API token used as-is.
///
/// With CSP configured the client runs a refresh worker that re-fetches the
/// access token shortly before it expires.
#[derive(Debug)]
pub struct WavefrontClientBuilder {
    server: String,
    token: Option<String>,
    max_queue_size: usize,
    batch_size: usize,
    flush_interval: Duration,
    enable_internal_metrics: bool,
    csp_base_url: Option<String>,
    csp_api_token: Option<String>,
    csp_app_id: Option<String>,
    csp_app_secret: Option<String>,
    csp_org_id: Option<String>,
    proxy_ports: Option<ProxyPorts>,
    socket_timeout: Option<Duration>,
}

impl WavefrontClientBuilder {
    fn new(server: String) -> Self {
        Self {
            server,
            token: None,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            enable_internal_metrics: true,
            csp_base_url: None,
            csp_api_token: None,
            csp_app_id: None,
            csp_app_secret: None,
            csp_org_id: None,
            proxy_ports: None,
            socket_timeout: None,
        }
    }

    /// Static API token with direct-ingestion permission.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Bound on each per-family buffer. 50 000 by default.
    ///
    /// A full buffer refuses new lines rather than blocking the producer;
    /// the refused line is counted as dropped and the send call returns
    /// `QueueFull`.
    pub fn max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Amount of data sent per report call. 10 000 by default; events are
    /// always sent one per call on direct ingestion.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Period of the background flush. 5 seconds by default.
    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// When disabled the internal metrics registry still tracks counters but
    /// never reports them. Enabled by default.
    pub fn enable_internal_metrics(mut self, enable: bool) -> Self {
        self.enable_internal_metrics = enable;
        self
    }

    /// CSP console base URL. Defaults to the public console.
    pub fn csp_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.csp_base_url = Some(base_url.into());
        self
    }

    /// Authenticate by exchanging a long-lived CSP API token.
    pub fn csp_api_token(mut self, api_token: impl Into<String>) -> Self {
        self.csp_api_token = Some(api_token.into());
        self
    }

    /// Authenticate with CSP OAuth2 client credentials.
    pub fn csp_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.csp_app_id = Some(app_id.into());
        self
    }

    /// Secret for [`csp_app_id`](Self::csp_app_id).
    pub fn csp_app_secret(mut self, app_secret: impl Into<String>) -> Self {
        self.csp_app_secret = Some(app_secret.into());
        self
    }

    /// Organization scoping the client-credentials grant.
    pub fn csp_org_id(mut self, org_id: impl Into<String>) -> Self {
        self.csp_org_id = Some(org_id.into());
        self
    }

    /// Send via a Wavefront proxy on these per-family TCP ports instead of
    /// direct ingestion.
    pub fn proxy_ports(mut self, ports: ProxyPorts) -> Self {
        self.proxy_ports = Some(ports);
        self
    }

    /// Connect timeout for the proxy sockets.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Resolve the configured CSP settings into a grant, if any.
    ///
    /// Client credentials win over an API token when both are configured,
    /// matching the precedence the CSP console documents. An app id without
    /// its secret is a configuration error rather than a silent fallback.
    fn csp_credentials(&self) -> Result<Option<CspCredentials>, SdkError> {
        let base_url = self
            .csp_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_CSP_BASE_URL.to_owned());
        match (&self.csp_app_id, &self.csp_app_secret, &self.csp_api_token) {
            (Some(app_id), Some(app_secret), _) => Ok(Some(CspCredentials::ClientCredentials {
                base_url,
                client_id: app_id.clone(),
                client_secret: app_secret.clone(),
                org_id: self.csp_org_id.clone(),
            })),
            (Some(_), None, _) => Err(SdkError::Configuration(
                "csp_app_secret is required when csp_app_id is set".to_owned(),
            )),
            (None, _, Some(api_token)) => Ok(Some(CspCredentials::ApiToken {
                base_url,
                api_token: api_token.clone(),
            })),
            _ => Ok(None),
        }
    }

    /// Build the client and start its background workers.
    ///
    /// The client owns a single-worker runtime carrying the flush loop, the
    /// internal-metrics reporter (unless disabled) and, with CSP
    /// credentials, the token refresh loop.
    ///
    /// # Errors
    /// `Configuration` when the runtime cannot start, the proxy server URL
    /// has no host, the CSP settings are incomplete, or the HTTP client
    /// cannot be constructed.
    pub fn build(self) -> Result<WavefrontClient, SdkError> {
        let default_source = hostname::get()
            .ok()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "unknown".to_owned());

        let runtime = Arc::new(
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .map_err(|e| SdkError::Configuration(e.to_string()))?,
        );

        let queues: Vec<Arc<BoundedBuffer>> = DataFamily::ALL
            .iter()
            .map(|_| Arc::new(BoundedBuffer::new(self.max_queue_size)))
            .collect();

        let ingestion_type = if self.proxy_ports.is_some() {
            "proxy"
        } else {
            "direct"
        };
        let sink = self.enable_internal_metrics.then(|| {
            LineSink::new(
                queues[DataFamily::Points as usize].clone(),
                default_source.clone(),
            )
        });
        let registry = SdkMetricsRegistry::new(
            sink,
            None,
            HashMap::new(),
            &format!("{SDK_METRIC_PREFIX}.core.sender.{ingestion_type}"),
        );
        let version = sem_ver_value(env!("CARGO_PKG_VERSION"));
        registry.new_gauge("version", move || Some(version));

        let families = DataFamily::ALL.map(|family| {
            let prefix = family.prefix();
            let queue = queues[family as usize].clone();
            let size_queue = queue.clone();
            registry.new_gauge(&format!("{prefix}.queue.size"), move || {
                Some(size_queue.len() as f64)
            });
            let capacity_queue = queue.clone();
            registry.new_gauge(&format!("{prefix}.queue.remaining_capacity"), move || {
                Some(capacity_queue.remaining_capacity() as f64)
            });
            FamilyPipeline {
                family,
                queue,
                counters: FamilyCounters::new(&registry, prefix),
            }
        });

        let cancel = CancellationToken::new();
        let csp_credentials = self.csp_credentials()?;
        let mut csp_service = None;
        let transport = match self.proxy_ports {
            Some(ports) => {
                let parsed = Url::parse(&self.server)
                    .map_err(|e| SdkError::Configuration(format!("invalid server URL: {e}")))?;
                let host = parsed
                    .host_str()
                    .ok_or_else(|| {
                        SdkError::Configuration("proxy server URL has no host".to_owned())
                    })?
                    .to_owned();
                Transport::Proxy(ProxyTransport::new(
                    &host,
                    ports,
                    self.socket_timeout,
                    &registry,
                ))
            }
            None => {
                let auth = match csp_credentials {
                    Some(credentials) => {
                        let service = Arc::new(CspTokenService::new(credentials)?);
                        csp_service = Some(service.clone());
                        Auth::Csp(service)
                    }
                    None => match &self.token {
                        Some(token) => Auth::Token(token.clone()),
                        None => Auth::None,
                    },
                };
                Transport::Direct(DirectReporter::new(&self.server, auth)?)
            }
        };

        let pipeline = Arc::new(Pipeline {
            families,
            transport,
            batch_size: self.batch_size.max(1),
            registry: registry.clone(),
        });

        let mut flush_worker =
            FlushWorker::new(pipeline.clone(), self.flush_interval, cancel.clone());
        runtime.spawn(async move { flush_worker.run().await });
        if self.enable_internal_metrics {
            let mut reporter =
                RegistryReporter::new(registry.clone(), REPORTING_INTERVAL, cancel.clone());
            runtime.spawn(async move { reporter.run().await });
        }
        if let Some(service) = csp_service {
            let mut refresher = CspRefreshWorker::new(service, cancel.clone());
            runtime.spawn(async move { refresher.run().await });
        }

        Ok(WavefrontClient {
            server: self.server,
            default_source,
            pipeline,
            registry,
            runtime,
            cancel,
            closed: AtomicBool::new(false),
        })
    }
}

/// Wavefront data ingestion client.
///
/// Send methods are non-blocking: they serialize, enqueue and return. The
/// facade is synchronous; `flush_now`, the `*_now` variants and `close`
/// block on the client's own runtime and must not be called from within an
/// async context.
///
/// Error propagation is split by where the failure happens. Serialization
/// and full-buffer failures surface from the `send_*` call that caused
/// them; transport failures happen later, on the flush worker, and are
/// visible only through [`failure_count`](WavefrontSender::failure_count),
/// the internal metrics and the log.
pub struct WavefrontClient {
    server: String,
    default_source: String,
    pipeline: Arc<Pipeline>,
    registry: SdkMetricsRegistry,
    runtime: Arc<Runtime>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl WavefrontClient {
    /// Start building a client for `server`, e.g.
    /// `https://cluster.wavefront.com` or `http://proxy.local:2878`.
    pub fn builder(server: impl Into<String>) -> WavefrontClientBuilder {
        WavefrontClientBuilder::new(server.into())
    }

    /// The resolved server address this client reports to.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// The source substituted when a send call passes a blank one.
    pub fn default_source(&self) -> &str {
        &self.default_source
    }

    /// The internal metrics registry of this client.
    pub fn registry(&self) -> &SdkMetricsRegistry {
        &self.registry
    }

    /// Push one serialized line onto its family's buffer.
    ///
    /// A family the transport cannot carry (a proxy without that port) is
    /// counted as discarded and reported as success, matching the proxy
    /// client's tolerance for partially-configured deployments.
    ///
    /// # Errors
    /// `QueueFull` when the buffer is at capacity; the line is dropped and
    /// counted.
    fn enqueue(&self, family: DataFamily, line: String) -> Result<(), SdkError> {
        let pipeline = self.pipeline.family(family);
        if !self.pipeline.transport.accepts(family) {
            pipeline.counters.discarded.inc();
            warn!(
                family = family.prefix(),
                "cannot send data to the proxy: please configure a port for this family"
            );
            return Ok(());
        }
        if pipeline.queue.try_push(line) {
            Ok(())
        } else {
            pipeline.counters.dropped.inc();
            Err(SdkError::QueueFull(family.prefix()))
        }
    }

    /// Send pre-serialized lines through the transport immediately,
    /// bypassing the buffers but keeping the batch-size chunking and the
    /// report accounting.
    fn send_batch_now(&self, family: DataFamily, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let pipeline = self.pipeline.family(family);
        let batch_size = family
            .batch_size_override()
            .unwrap_or(self.pipeline.batch_size)
            .max(1);
        self.runtime.block_on(async {
            for chunk in lines.chunks(batch_size) {
                self.pipeline.report_chunk(pipeline, chunk.to_vec()).await;
            }
        });
    }
}

impl WavefrontSender for WavefrontClient {
    fn send_metric(
        &self,
        name: &str,
        value: f64,
        timestamp: Option<i64>,
        source: &str,
        tags: &HashMap<String, String>,
    ) -> Result<(), SdkError> {
        let family = self.pipeline.family(DataFamily::Points);
        let line = match metric_line(name, value, timestamp, source, tags, &self.default_source) {
            Ok(line) => {
                family.counters.valid.inc();
                line
            }
            Err(err) => {
                family.counters.invalid.inc();
                return Err(err);
            }
        };
        self.enqueue(DataFamily::Points, line)
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
        let family = self.pipeline.family(DataFamily::Histograms);
        let line = match histogram_line(
            name,
            centroids,
            granularities,
            timestamp,
            source,
            tags,
            &self.default_source,
        ) {
            Ok(line) => {
                family.counters.valid.inc();
                line
            }
            Err(err) => {
                family.counters.invalid.inc();
                return Err(err);
            }
        };
        self.enqueue(DataFamily::Histograms, line)
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
        let family = self.pipeline.family(DataFamily::Spans);
        let line = match span_line(
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
            &self.default_source,
        ) {
            Ok(line) => {
                family.counters.valid.inc();
                line
            }
            Err(err) => {
                family.counters.invalid.inc();
                return Err(err);
            }
        };
        self.enqueue(DataFamily::Spans, line.clone())?;

        if span_logs.is_empty() {
            return Ok(());
        }
        let log_family = self.pipeline.family(DataFamily::SpanLogs);
        let log_line = match span_log_line(trace_id, span_id, span_logs, &line, None) {
            Ok(log_line) => {
                log_family.counters.valid.inc();
                log_line
            }
            Err(err) => {
                log_family.counters.invalid.inc();
                return Err(err);
            }
        };
        self.enqueue(DataFamily::SpanLogs, log_line)
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
        let family = self.pipeline.family(DataFamily::Events);
        let serialized = match &self.pipeline.transport {
            Transport::Direct(_) => event_json(
                name,
                start_millis,
                end_millis,
                source,
                tags,
                annotations,
                &self.default_source,
            ),
            Transport::Proxy(_) => event_line(
                name,
                start_millis,
                end_millis,
                source,
                tags,
                annotations,
                &self.default_source,
            ),
        };
        let line = match serialized {
            Ok(line) => {
                family.counters.valid.inc();
                line
            }
            Err(err) => {
                family.counters.invalid.inc();
                return Err(err);
            }
        };
        self.enqueue(DataFamily::Events, line)
    }

    fn send_metric_now(&self, metrics: &[String]) {
        self.send_batch_now(DataFamily::Points, metrics);
    }

    fn send_distribution_now(&self, distributions: &[String]) {
        self.send_batch_now(DataFamily::Histograms, distributions);
    }

    fn send_span_now(&self, spans: &[String]) {
        self.send_batch_now(DataFamily::Spans, spans);
    }

    fn send_span_log_now(&self, span_logs: &[String]) {
        self.send_batch_now(DataFamily::SpanLogs, span_logs);
    }

    fn send_event_now(&self, events: &[String]) {
        self.send_batch_now(DataFamily::Events, events);
    }

    fn flush_now(&self) {
        self.runtime.block_on(self.pipeline.flush_all());
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.runtime.block_on(self.pipeline.flush_all());
        self.cancel.cancel();
        self.registry.close(Duration::from_secs(1));
        self.runtime.block_on(self.pipeline.transport.close());
    }

    fn failure_count(&self) -> u64 {
        self.pipeline.transport.failure_count()
    }
}
