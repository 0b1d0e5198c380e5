// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cloud Services Platform (CSP) token service.
//!
//! Exchanges either a long-lived API token or OAuth2 client credentials for
//! short-lived access tokens, keeps the current token cached, and schedules
//! a refresh shortly before expiry. A failed refresh is logged; the cached
//! token keeps serving until its own expiry and the next read triggers
//! another attempt.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wavefront_common::worker::Worker;
use wavefront_common::SdkError;

/// CSP console used when no base URL is configured.
pub const DEFAULT_CSP_BASE_URL: &str = "https://console.cloud.vmware.com";

const CSP_API_TOKEN_AUTH_PATH: &str = "/csp/gateway/am/api/auth/api-tokens/authorize";
const CSP_OAUTH_AUTH_PATH: &str = "/csp/gateway/am/api/auth/authorize";
const CSP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to hold off before reauthenticating after a failed refresh.
const CSP_RETRY_INTERVAL: Duration = Duration::from_secs(60);

const CSP_SCOPE_ERROR: &str = "the CSP response did not contain any scope matching 'aoa:*', \
    'aoa/*', 'aoa:directDataIngestion' or 'ALL_PERMISSIONS', which is required for direct data \
    ingestion";

/// The grant used to obtain access tokens.
///
/// Both flavours POST form-encoded bodies to the CSP gateway and receive
/// the same authorize response; they differ in the path and in how the
/// caller proves its identity.
#[derive(Clone, Debug)]
pub enum CspCredentials {
    /// Exchange a long-lived API token for short-lived access tokens. The
    /// token travels in the form body.
    ApiToken {
        base_url: String,
        api_token: String,
    },
    /// OAuth2 client-credentials grant for a server-to-server app. The id
    /// and secret travel as HTTP Basic authorization; the optional org id
    /// scopes the grant to one CSP organization.
    ClientCredentials {
        base_url: String,
        client_id: String,
        client_secret: String,
        org_id: Option<String>,
    },
}

impl CspCredentials {
    /// Full authorization URL, collapsing a trailing `/` on the base URL.
    fn auth_url(&self) -> String {
        let (base, path) = match self {
            CspCredentials::ApiToken { base_url, .. } => (base_url, CSP_API_TOKEN_AUTH_PATH),
            CspCredentials::ClientCredentials { base_url, .. } => (base_url, CSP_OAUTH_AUTH_PATH),
        };
        format!("{}{}", base.trim_end_matches('/'), path)
    }
}

/// Successful response from the CSP authorize endpoints.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthorizeResponse {
    /// The minted bearer token.
    pub access_token: String,
    /// Seconds until the token expires, from the moment of issue.
    #[serde(default)]
    pub expires_in: i64,
    /// Whitespace-separated permission tokens granted with the token.
    #[serde(default)]
    pub scope: String,
}

impl AuthorizeResponse {
    /// Whether some granted scope permits direct data ingestion.
    ///
    /// Scopes come prefixed with service paths, so each token is matched by
    /// suffix. A missing scope is logged rather than treated as fatal: the
    /// server makes the final call when the token is presented.
    pub fn has_direct_ingest_scope(&self) -> bool {
        const VALID_SCOPES: [&str; 4] =
            ["aoa:directDataIngestion", "aoa:*", "aoa/*", "ALL_PERMISSIONS"];
        self.scope
            .split_whitespace()
            .any(|scope| VALID_SCOPES.iter().any(|valid| scope.ends_with(valid)))
    }
}

/// Seconds after receipt at which the next refresh is scheduled.
///
/// Tokens expiring within ten minutes refresh 30 seconds early, longer-lived
/// tokens three minutes early.
pub fn refresh_offset_secs(expires_in: i64) -> i64 {
    if expires_in < 600 {
        expires_in - 30
    } else {
        expires_in - 180
    }
}

#[derive(Debug, Default)]
struct TokenState {
    access_token: Option<String>,
    expires_at: Option<Instant>,
    refresh_at: Option<Instant>,
}

/// Service that mints and caches CSP access tokens.
///
/// Reads are served from the cache while the token is within its lifetime.
/// A background refresh worker re-fetches at the scheduled pre-expiry
/// instant so steady-state reads never pay an HTTP round trip; if the
/// worker falls behind or fails, the first expired read refreshes inline.
#[derive(Debug)]
pub struct CspTokenService {
    credentials: CspCredentials,
    http: reqwest::Client,
    state: Mutex<TokenState>,
}

impl CspTokenService {
    pub fn new(credentials: CspCredentials) -> Result<Self, SdkError> {
        let http = reqwest::Client::builder()
            .timeout(CSP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SdkError::Configuration(e.to_string()))?;
        Ok(Self {
            credentials,
            http,
            state: Mutex::new(TokenState::default()),
        })
    }

    /// The cached access token, refreshing synchronously when missing or
    /// expired. Returns `None` when no token could be obtained; the caller
    /// may retry on its next request.
    pub async fn access_token(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        let expired = match state.expires_at {
            Some(at) => Instant::now() >= at,
            None => true,
        };
        if state.access_token.is_none() || expired {
            self.refresh_locked(&mut state).await;
        }
        state.access_token.clone()
    }

    /// Refresh now. Returns whether a token was obtained.
    pub(crate) async fn refresh(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    /// Delay until the scheduled pre-expiry refresh. `None` before the first
    /// successful fetch.
    pub(crate) async fn next_refresh_delay(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        state
            .refresh_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fetch a new token and install it with its expiry and refresh
    /// instants. On failure the previous state is left untouched, so a
    /// still-valid token keeps serving while CSP is unreachable.
    async fn refresh_locked(&self, state: &mut TokenState) -> bool {
        match self.authorize().await {
            Ok(response) => {
                if !response.has_direct_ingest_scope() {
                    error!("{}", CSP_SCOPE_ERROR);
                }
                let now = Instant::now();
                let offset = refresh_offset_secs(response.expires_in).max(0);
                state.expires_at =
                    Some(now + Duration::from_secs(response.expires_in.max(0) as u64));
                state.refresh_at = Some(now + Duration::from_secs(offset as u64));
                info!(
                    expires_in = response.expires_in,
                    "CSP authentication succeeded"
                );
                state.access_token = Some(response.access_token);
                true
            }
            Err(err) => {
                error!(error = %err, "CSP authentication failed");
                false
            }
        }
    }

    /// One authorization round trip shaped by the configured grant.
    ///
    /// # Errors
    /// `Authentication` when the request fails to complete, the status is
    /// not 2xx, or the body does not parse as an authorize response.
    async fn authorize(&self) -> Result<AuthorizeResponse, SdkError> {
        let mut request = self.http.post(self.credentials.auth_url());
        match &self.credentials {
            CspCredentials::ApiToken { api_token, .. } => {
                request = request.form(&[("api_token", api_token.as_str())]);
            }
            CspCredentials::ClientCredentials {
                client_id,
                client_secret,
                org_id,
                ..
            } => {
                let basic = BASE64.encode(format!("{client_id}:{client_secret}"));
                request = request.header(reqwest::header::AUTHORIZATION, format!("Basic {basic}"));
                let mut form = vec![("grant_type", "client_credentials")];
                if let Some(org_id) = org_id {
                    form.push(("orgId", org_id.as_str()));
                }
                request = request.form(&form);
            }
        }
        let response = request
            .send()
            .await
            .map_err(|e| SdkError::Authentication(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SdkError::Authentication(format!(
                "CSP authorization returned status {status}: {body}"
            )));
        }
        response
            .json::<AuthorizeResponse>()
            .await
            .map_err(|e| SdkError::Authentication(format!("invalid CSP response: {e}")))
    }
}

/// Background worker refreshing the token at the scheduled pre-expiry
/// instant.
pub(crate) struct CspRefreshWorker {
    service: std::sync::Arc<CspTokenService>,
    cancel: CancellationToken,
}

impl CspRefreshWorker {
    pub(crate) fn new(service: std::sync::Arc<CspTokenService>, cancel: CancellationToken) -> Self {
        Self { service, cancel }
    }
}

impl Worker for CspRefreshWorker {
    /// Sleep until the scheduled pre-expiry instant, refresh, repeat.
    ///
    /// Before the first successful fetch there is no schedule, so the loop
    /// fetches immediately. A failed refresh backs off for a fixed interval
    /// instead of hammering the gateway, and cancellation interrupts both
    /// the schedule sleep and the backoff.
    async fn run(&mut self) {
        loop {
            let delay = self
                .service
                .next_refresh_delay()
                .await
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {
                    if !self.service.refresh().await {
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = sleep(CSP_RETRY_INTERVAL) => {}
                        }
                    }
                }
            }
        }
    }
}
