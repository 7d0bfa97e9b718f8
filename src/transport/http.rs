//! HTTP transport against the interactive simulation backend.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};
use url::Url;

use crate::config::{ClientConfig, FallbackPolicy};
use crate::error::{PlaygroundResult, TransportError};
use crate::ids::SimulationId;

use super::mock::{mock_decision_response, mock_start_response};
use super::polling::PollingChannel;
use super::realtime::{connect_with_fallback, Channel, ChannelKind, ChannelOpener, RealtimeConnection};
use super::sse::SseChannel;
use super::websocket::WebSocketChannel;
use super::{DecisionRequest, EventHandler, SimulationApi, SimulationResponse, StartRequest};

/// REST + realtime client for the backend.
///
/// Cheap to clone; clones share the underlying connection pools.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    inner: Arc<HttpOpener>,
}

/// Shared state; also opens realtime channels.
#[derive(Debug)]
struct HttpOpener {
    config: ClientConfig,
    /// REST calls and polls (total request timeout applies).
    client: reqwest::Client,
    /// Long-lived SSE bodies (connect timeout only).
    stream_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport from a validated config.
    pub fn new(config: ClientConfig) -> PlaygroundResult<Self> {
        config.validate()?;
        // wss sockets go through rustls; keep any provider installed earlier.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(TransportError::from)?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            inner: Arc::new(HttpOpener {
                config,
                client,
                stream_client,
            }),
        })
    }

    /// Create a transport configured from the environment.
    pub fn from_env() -> PlaygroundResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// The config this transport was built from.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    async fn post_json<T: Serialize + Sync>(&self, url: Url, body: &T) -> PlaygroundResult<SimulationResponse> {
        let resp = self
            .inner
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                code: status.as_u16(),
                endpoint: url.path().to_string(),
            }
            .into());
        }

        let body = resp.json::<SimulationResponse>().await.map_err(TransportError::from)?;
        Ok(body)
    }

    /// Apply the fallback policy to a REST result.
    fn with_fallback(
        &self,
        operation: &str,
        result: PlaygroundResult<SimulationResponse>,
        mock: fn() -> SimulationResponse,
    ) -> PlaygroundResult<SimulationResponse> {
        match result {
            Err(err) if err.is_transport() && self.inner.config.fallback == FallbackPolicy::Mock => {
                warn!(operation, error = %err, "backend unavailable, substituting mock response");
                Ok(mock())
            }
            other => other,
        }
    }
}

#[async_trait]
impl SimulationApi for HttpTransport {
    async fn start_simulation(&self, request: &StartRequest) -> PlaygroundResult<SimulationResponse> {
        let url = self.inner.config.start_url()?;
        debug!(industry = %request.industry, solution = %request.solution_id, scenario = %request.scenario_id, "starting simulation");
        let result = self.post_json(url, request).await;
        self.with_fallback("start", result, mock_start_response)
    }

    async fn make_decision(&self, request: &DecisionRequest) -> PlaygroundResult<SimulationResponse> {
        let url = self.inner.config.decision_url()?;
        debug!(simulation_id = %request.simulation_id, decision = %request.decision_id, "submitting decision");
        let result = self.post_json(url, request).await;
        self.with_fallback("decision", result, mock_decision_response)
    }

    async fn connect_realtime(
        &self,
        simulation_id: &SimulationId,
        on_event: EventHandler,
    ) -> PlaygroundResult<RealtimeConnection> {
        let opener: Arc<dyn ChannelOpener> = self.inner.clone();
        connect_with_fallback(opener, simulation_id, on_event).await
    }
}

impl HttpOpener {
    async fn open_websocket(&self, simulation_id: &SimulationId) -> PlaygroundResult<Box<dyn Channel>> {
        let url = self.config.websocket_url(simulation_id)?;
        let connect = tokio::time::timeout(self.config.connect_timeout, connect_async(url.as_str()));
        let (socket, _response) = connect
            .await
            .map_err(|_| TransportError::ConnectionFailed {
                message: format!("websocket connect to {url} timed out"),
            })?
            .map_err(|e| TransportError::ConnectionFailed {
                message: format!("websocket connect to {url}: {e}"),
            })?;
        Ok(Box::new(WebSocketChannel::new(socket)))
    }

    async fn open_sse(&self, simulation_id: &SimulationId) -> PlaygroundResult<Box<dyn Channel>> {
        let url = self.config.stream_url(simulation_id)?;
        let request = self
            .stream_client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .send();
        let resp = tokio::time::timeout(self.config.connect_timeout, request)
            .await
            .map_err(|_| TransportError::ConnectionFailed {
                message: format!("sse connect to {url} timed out"),
            })?
            .map_err(TransportError::from)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                code: status.as_u16(),
                endpoint: url.path().to_string(),
            }
            .into());
        }

        let is_event_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        if !is_event_stream {
            return Err(TransportError::ConnectionFailed {
                message: format!("{url} did not answer with text/event-stream"),
            }
            .into());
        }

        Ok(Box::new(SseChannel::new(Box::pin(resp.bytes_stream()))))
    }

    fn open_polling(&self, simulation_id: &SimulationId) -> PlaygroundResult<Box<dyn Channel>> {
        let url = self.config.status_url(simulation_id)?;
        Ok(Box::new(PollingChannel::new(
            self.client.clone(),
            url,
            self.config.poll_interval,
        )))
    }
}

#[async_trait]
impl ChannelOpener for HttpOpener {
    async fn open(&self, kind: ChannelKind, simulation_id: &SimulationId) -> PlaygroundResult<Box<dyn Channel>> {
        match kind {
            ChannelKind::WebSocket => self.open_websocket(simulation_id).await,
            ChannelKind::ServerSentEvents => self.open_sse(simulation_id).await,
            ChannelKind::Polling => self.open_polling(simulation_id),
        }
    }
}
