//! HTTP/2 transport to the gateway.
//!
//! One `reqwest::Client` is shared by every send; it multiplexes requests
//! over a small pool of HTTP/2 connections negotiated via ALPN.

use std::time::Duration;

use reqwest::{Client, Url};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::ApnsConfig;
use crate::credentials::CredentialProvider;
use crate::error::{ApnsError, Result};
use crate::request::{ApnsHeader, ApnsRequest};

const HTTP2_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Status, `apns-id` and body of a gateway reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub apns_id: Option<String>,
    pub body: Option<String>,
}

/// Pooled HTTP/2 client bound to one gateway
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    base_url: Url,
}

impl Transport {
    pub fn new(config: &ApnsConfig, credentials: &CredentialProvider) -> Result<Self> {
        let mut builder = Client::builder()
            .use_native_tls()
            .pool_max_idle_per_host(config.connection_pool_size)
            .timeout(config.request_timeout)
            .http2_keep_alive_interval(HTTP2_KEEP_ALIVE_INTERVAL)
            .http2_keep_alive_while_idle(true)
            .http2_adaptive_window(true);

        if let Some(identity) = credentials.client_identity() {
            builder = builder.identity(identity.to_identity()?);
        }

        let client = builder.build().map_err(|e| {
            ApnsError::Configuration(format!("failed to build APNs HTTP client: {e}"))
        })?;

        Ok(Self {
            client,
            base_url: config.gateway_url()?,
        })
    }

    /// Wrap an existing client, e.g. one preconfigured by the caller.
    pub fn from_client(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Send a request and wait for the gateway's reply.
    pub async fn send(&self, request: ApnsRequest) -> Result<GatewayResponse> {
        let ApnsRequest {
            method,
            url,
            headers,
            body,
        } = request;

        debug!(%url, "Sending APNs request");
        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let apns_id = response
            .headers()
            .get(ApnsHeader::Id.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(GatewayResponse {
            status,
            apns_id,
            body: if body.is_empty() { None } else { Some(body) },
        })
    }

    /// Start a send without waiting for it.
    ///
    /// Dropping the returned handle cancels the request and releases its
    /// stream on the shared connection.
    pub fn send_pending(&self, request: ApnsRequest) -> PendingResponse {
        let transport = self.clone();
        PendingResponse {
            handle: tokio::spawn(async move { transport.send(request).await }),
        }
    }
}

/// In-flight request started by [`Transport::send_pending`]
#[derive(Debug)]
pub struct PendingResponse {
    handle: JoinHandle<Result<GatewayResponse>>,
}

impl PendingResponse {
    pub async fn wait(mut self) -> Result<GatewayResponse> {
        match (&mut self.handle).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                Err(ApnsError::Transport("request was cancelled".to_string()))
            }
            Err(e) => Err(ApnsError::Transport(format!("send task failed: {e}"))),
        }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
