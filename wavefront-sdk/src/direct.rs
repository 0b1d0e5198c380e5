// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Direct-ingestion transport: gzip-compressed batches over HTTPS with
//! bearer-token authentication.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::error;
use wavefront_common::compression::gzip_compress;
use wavefront_common::constants::{EVENT_ENDPOINT, NO_HTTP_RESPONSE, REPORT_ENDPOINT};
use wavefront_common::SdkError;

use crate::auth::CspTokenService;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Where the bearer token for direct ingestion comes from.
pub(crate) enum Auth {
    /// No Authorization header. Only useful against unauthenticated test
    /// endpoints.
    None,
    /// A static API token.
    Token(String),
    /// Short-lived tokens minted by the CSP token service.
    Csp(Arc<CspTokenService>),
}

/// HTTPS reporter for the direct-ingestion API.
///
/// One connection-pooling client is reused across all requests. Reports
/// return the HTTP status code; transport failures (no response at all)
/// return the `-1` sentinel. Retry classification is left to the pipeline.
pub(crate) struct DirectReporter {
    http: reqwest::Client,
    server: String,
    auth: Auth,
    failures: AtomicU64,
}

impl DirectReporter {
    pub(crate) fn new(server: &str, auth: Auth) -> Result<Self, SdkError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| SdkError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            server: server.trim_end_matches('/').to_owned(),
            auth,
            failures: AtomicU64::new(0),
        })
    }

    /// Number of reports that did not complete with a 2xx status.
    pub(crate) fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    async fn bearer(&self) -> Option<String> {
        match &self.auth {
            Auth::None => None,
            Auth::Token(token) => Some(token.clone()),
            Auth::Csp(service) => service.access_token().await,
        }
    }

    /// POST one gzip-compressed batch of lines to `/report?f=<format>`.
    ///
    /// The body is the `\n`-joined batch compressed as a single gzip
    /// member; the server identifies the payload type from the `f` query
    /// parameter, not from the body. Returns the HTTP status, or the `-1`
    /// sentinel when compression or the request itself failed.
    pub(crate) async fn report(&self, format: &str, lines: &str) -> i32 {
        let body = match gzip_compress(lines.as_bytes()) {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, "failed to compress report payload");
                self.failures.fetch_add(1, Ordering::Relaxed);
                return NO_HTTP_RESPONSE;
            }
        };
        let mut request = self
            .http
            .post(format!("{}{}", self.server, REPORT_ENDPOINT))
            .query(&[("f", format)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_ENCODING, "gzip")
            .body(body);
        if let Some(token) = self.bearer().await {
            request = request.bearer_auth(token);
        }
        self.dispatch(request, format).await
    }

    /// POST one event, JSON body, to `/api/v2/event`. Events are never
    /// batched on direct ingestion.
    pub(crate) async fn report_event(&self, event: &str) -> i32 {
        let mut request = self
            .http
            .post(format!("{}{}", self.server, EVENT_ENDPOINT))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(event.to_owned());
        if let Some(token) = self.bearer().await {
            request = request.bearer_auth(token);
        }
        self.dispatch(request, "event").await
    }

    /// Send one request and fold the outcome into a status code, counting
    /// everything that is not a 2xx as a failure.
    async fn dispatch(&self, request: reqwest::RequestBuilder, format: &str) -> i32 {
        match request.send().await {
            Ok(response) => {
                let status = i32::from(response.status().as_u16());
                if !(200..300).contains(&status) {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                }
                status
            }
            Err(err) => {
                error!(error = %err, data_format = format, "report request failed");
                self.failures.fetch_add(1, Ordering::Relaxed);
                NO_HTTP_RESPONSE
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::io::Read;

    #[tokio::test]
    async fn report_posts_gzip_with_bearer() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/report")
                    .query_param("f", "wavefront")
                    .header("content-type", "application/octet-stream")
                    .header("content-encoding", "gzip")
                    .header("authorization", "Bearer test-token");
                then.status(202);
            })
            .await;

        let reporter =
            DirectReporter::new(&server.base_url(), Auth::Token("test-token".to_owned())).unwrap();
        let status = reporter
            .report("wavefront", "\"cpu.load\" 1.0 source=\"host\"\n")
            .await;

        assert_eq!(status, 202);
        assert_eq!(reporter.failure_count(), 0);
        mock.assert_async().await;
    }

    const GZIP_TEST_LINES: &str =
        "\"cpu.load\" 1.0 source=\"host\"\n\"cpu.load\" 2.0 source=\"host\"\n";

    fn matches_gzip_test_lines(req: &HttpMockRequest) -> bool {
        let Some(body) = req.body.as_ref() else {
            return false;
        };
        let mut decoder = flate2::read::GzDecoder::new(body.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).is_ok()
            && decompressed == GZIP_TEST_LINES.as_bytes()
    }

    #[tokio::test]
    async fn report_body_is_gzip_compressed_lines() {
        let server = MockServer::start_async().await;
        let lines = GZIP_TEST_LINES;
        let mock = server
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/report")
                    .matches(matches_gzip_test_lines);
                then.status(200);
            })
            .await;

        let reporter = DirectReporter::new(&server.base_url(), Auth::None).unwrap();
        assert_eq!(reporter.report("wavefront", lines).await, 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn report_event_posts_json() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v2/event")
                    .header("content-type", "application/json")
                    .body("{\"name\":\"deploy\"}");
                then.status(200);
            })
            .await;

        let reporter = DirectReporter::new(&server.base_url(), Auth::None).unwrap();
        assert_eq!(reporter.report_event("{\"name\":\"deploy\"}").await, 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failures_count_http_errors_and_network_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/report");
                then.status(503);
            })
            .await;

        let reporter = DirectReporter::new(&server.base_url(), Auth::None).unwrap();
        assert_eq!(reporter.report("wavefront", "line\n").await, 503);
        assert_eq!(reporter.failure_count(), 1);

        let unreachable = DirectReporter::new("http://127.0.0.1:1", Auth::None).unwrap();
        assert_eq!(
            unreachable.report("wavefront", "line\n").await,
            NO_HTTP_RESPONSE
        );
        assert_eq!(unreachable.failure_count(), 1);
    }
}
