// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Endpoint resolution and client composition.

use std::sync::Arc;

use url::Url;
use wavefront_common::SdkError;

use crate::client::{WavefrontClient, WavefrontClientBuilder};
use crate::multi::WavefrontMultiSender;
use crate::proxy::ProxyPorts;
use crate::sender::WavefrontSender;

/// Resolve an endpoint URL into `(server, token)`.
///
/// - `https://[token@]host[:port]` selects direct ingestion; the userinfo is
///   consumed as the API token (absent when CSP authentication is used).
/// - `proxy://host:port` and `http://host:port` select proxy ingestion with
///   no token.
///
/// Any other scheme is a configuration error.
pub fn server_info_from_endpoint(url: &str) -> Result<(String, Option<String>), SdkError> {
    let parsed = Url::parse(url)
        .map_err(|e| SdkError::Configuration(format!("invalid endpoint URL '{url}': {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| SdkError::Configuration(format!("endpoint URL '{url}' has no host")))?;
    match parsed.scheme() {
        "https" => {
            let server = match parsed.port() {
                Some(port) => format!("https://{host}:{port}"),
                None => format!("https://{host}"),
            };
            let token = match parsed.username() {
                "" => None,
                token => Some(token.to_owned()),
            };
            Ok((server, token))
        }
        "proxy" | "http" => {
            let port = parsed.port().ok_or_else(|| {
                SdkError::Configuration(format!("proxy endpoint '{url}' requires a port"))
            })?;
            Ok((format!("http://{host}:{port}"), None))
        }
        scheme => Err(SdkError::Configuration(format!(
            "unknown scheme '{scheme}' specified while attempting to create a client"
        ))),
    }
}

/// Factory creating proxy or direct ingestion clients from endpoint URLs and
/// composing them into a single sender.
///
/// Clients are keyed by their resolved server address, so the same backend
/// spelled two ways (`proxy://` vs `http://`) still registers once. With
/// several endpoints configured, [`get_client`](Self::get_client) wraps
/// them in a fan-out sender so callers hold a single handle regardless of
/// how many backends receive the data.
#[derive(Default)]
pub struct WavefrontClientFactory {
    clients: Vec<Arc<WavefrontClient>>,
}

impl WavefrontClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client for `url` with default settings.
    ///
    /// # Errors
    /// `Configuration` when the URL does not parse, carries an unknown
    /// scheme, or resolves to an already-registered server.
    pub fn add_client(&mut self, url: &str) -> Result<(), SdkError> {
        self.add_client_with(url, |builder| builder)
    }

    /// Create a client for `url`, letting `configure` adjust the builder
    /// (queue sizes, flush interval, CSP credentials, proxy ports).
    ///
    /// The hook runs after the factory has applied what the URL implies
    /// (the token from the userinfo, the proxy port for every family), so
    /// it can override either.
    ///
    /// # Errors
    /// As [`add_client`](Self::add_client), plus whatever the configured
    /// builder fails with.
    pub fn add_client_with(
        &mut self,
        url: &str,
        configure: impl FnOnce(WavefrontClientBuilder) -> WavefrontClientBuilder,
    ) -> Result<(), SdkError> {
        let (server, token) = server_info_from_endpoint(url)?;
        if self.clients.iter().any(|client| client.server() == server) {
            return Err(SdkError::Configuration(format!(
                "client with endpoint {server} already exists"
            )));
        }
        let mut builder = WavefrontClient::builder(&server);
        if let Some(token) = token {
            builder = builder.token(token);
        }
        if let Some(port) = server
            .strip_prefix("http://")
            .and_then(|_| Url::parse(&server).ok())
            .and_then(|parsed| parsed.port())
        {
            // Proxy endpoint: line protocol over TCP, every family on the
            // advertised port unless the configure hook overrides them.
            builder = builder.proxy_ports(ProxyPorts::all(port));
        }
        let builder = configure(builder);
        self.clients.push(Arc::new(builder.build()?));
        Ok(())
    }

    /// The composed sender: `None` without clients, the sole client as-is,
    /// or a multi-sender fanning out to every client.
    pub fn get_client(&self) -> Option<Arc<dyn WavefrontSender>> {
        match self.clients.as_slice() {
            [] => None,
            [client] => Some(client.clone()),
            clients => {
                let mut multi = WavefrontMultiSender::new();
                for client in clients {
                    multi.with_sender(client.clone());
                }
                Some(Arc::new(multi))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_endpoint_with_token() {
        let (server, token) = server_info_from_endpoint("https://abc123@cluster.example.com").unwrap();
        assert_eq!(server, "https://cluster.example.com");
        assert_eq!(token.as_deref(), Some("abc123"));
    }

    #[test]
    fn https_endpoint_without_token() {
        let (server, token) = server_info_from_endpoint("https://cluster.example.com").unwrap();
        assert_eq!(server, "https://cluster.example.com");
        assert!(token.is_none());
    }

    #[test]
    fn https_endpoint_keeps_port() {
        let (server, _) = server_info_from_endpoint("https://tok@cluster.example.com:8443").unwrap();
        assert_eq!(server, "https://cluster.example.com:8443");
    }

    #[test]
    fn proxy_endpoint_resolves_to_http() {
        let (server, token) = server_info_from_endpoint("proxy://10.0.0.1:2878").unwrap();
        assert_eq!(server, "http://10.0.0.1:2878");
        assert!(token.is_none());
    }

    #[test]
    fn http_endpoint_is_a_proxy() {
        let (server, token) = server_info_from_endpoint("http://proxy.local:2878").unwrap();
        assert_eq!(server, "http://proxy.local:2878");
        assert!(token.is_none());
    }

    #[test]
    fn unknown_scheme_is_refused() {
        let result = server_info_from_endpoint("ftp://host:21");
        assert!(matches!(result, Err(SdkError::Configuration(_))));
    }

    #[test]
    fn factory_refuses_duplicate_servers() {
        let mut factory = WavefrontClientFactory::new();
        factory.add_client("proxy://127.0.0.1:2878").unwrap();
        // Same resolved server through a different scheme spelling.
        let duplicate = factory.add_client("http://127.0.0.1:2878");
        assert!(matches!(duplicate, Err(SdkError::Configuration(_))));
    }

    #[test]
    fn factory_composition() {
        let factory = WavefrontClientFactory::new();
        assert!(factory.get_client().is_none());

        let mut factory = WavefrontClientFactory::new();
        factory.add_client("proxy://127.0.0.1:2878").unwrap();
        let sole = factory.get_client().unwrap();
        factory.add_client("proxy://127.0.0.2:2878").unwrap();
        let multi = factory.get_client().unwrap();
        // Both composed senders are usable; closing releases their workers.
        sole.close();
        multi.close();
    }
}
