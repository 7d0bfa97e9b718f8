//! Transport client for the interactive simulation backend.
//!
//! `SimulationApi` is the seam the state machine consumes: two REST calls plus
//! a realtime subscription. `HttpTransport` talks to the real backend;
//! `MockTransport` serves canned data for offline demos and tests.
//!
//! Realtime delivery tries three channels in order (WebSocket, server-sent
//! events, polling). Each is an interchangeable `Channel`; see `realtime`.

/// REST calls and channel opening against the HTTP backend.
pub mod http;
/// Canned responses and the offline transport.
pub mod mock;
/// Polling channel.
pub mod polling;
/// Channel selection, fallback supervisor and connection handle.
pub mod realtime;
/// Server-sent events channel and decoder.
pub mod sse;
/// WebSocket channel.
pub mod websocket;

pub use http::HttpTransport;
pub use mock::{mock_decision_response, mock_start_response, MockTransport, ScriptedChannel};
pub use polling::PollingChannel;
pub use realtime::{connect_with_fallback, Channel, ChannelKind, ChannelOpener, RealtimeConnection};
pub use sse::{SseChannel, SseDecoder};
pub use websocket::WebSocketChannel;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PlaygroundResult;
use crate::event::{PipelineStepUpdate, StreamEvent};
use crate::ids::{DecisionId, ScenarioId, SimulationId};

/// Callback invoked for every decoded stream event, in arrival order.
pub type EventHandler = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Body of `POST /api/interactive/start`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub industry: String,
    pub solution_id: String,
    pub scenario_id: ScenarioId,
}

/// Body of `POST /api/interactive/decision`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub simulation_id: SimulationId,
    pub decision_id: DecisionId,
    pub decision_data: Value,
}

/// Where a `SimulationResponse` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSource {
    /// Returned by the backend.
    #[default]
    Backend,
    /// Substituted locally because the backend was unreachable.
    Mock,
}

/// Response shape shared by the start and decision endpoints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResponse {
    /// Whether the backend accepted the request.
    pub success: bool,
    /// Backend-issued simulation id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_id: Option<SimulationId>,
    /// Pipeline steps already reported by the backend.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline_updates: Vec<PipelineStepUpdate>,
    /// Metrics to merge into the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,
    /// Visualization payload echoed to the view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Value>,
    /// Backend error message when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Not part of the wire format.
    #[serde(skip)]
    pub source: ResponseSource,
}

impl SimulationResponse {
    /// Indices of pipeline steps reported as completed, sorted and deduplicated.
    #[must_use]
    pub fn completed_steps(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .pipeline_updates
            .iter()
            .filter(|u| u.is_completed())
            .map(|u| u.index)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Returns true if this response was substituted locally.
    #[must_use]
    pub fn is_mock(&self) -> bool {
        self.source == ResponseSource::Mock
    }
}

/// Backend operations consumed by the simulation state machine.
#[async_trait]
pub trait SimulationApi: Send + Sync {
    /// Start a simulation for a scenario.
    async fn start_simulation(&self, request: &StartRequest) -> PlaygroundResult<SimulationResponse>;

    /// Submit a decision for a running simulation.
    async fn make_decision(&self, request: &DecisionRequest) -> PlaygroundResult<SimulationResponse>;

    /// Open the realtime channel for a simulation.
    ///
    /// Exactly one channel is active on the returned connection; it is
    /// released when the connection is closed or dropped.
    async fn connect_realtime(
        &self,
        simulation_id: &SimulationId,
        on_event: EventHandler,
    ) -> PlaygroundResult<RealtimeConnection>;
}
