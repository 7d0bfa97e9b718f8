//! Canned responses and an offline transport.
//!
//! The HTTP transport substitutes `mock_start_response` and
//! `mock_decision_response` when the backend is unreachable and the fallback
//! policy allows it. `MockTransport` serves the same data without any network,
//! plus a scripted realtime stream, for demos and tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::debug;

use crate::error::{PlaygroundResult, TransportError};
use crate::event::{PipelineStepUpdate, StepStatus, StreamEvent, StreamEventKind};
use crate::ids::SimulationId;

use super::realtime::{connect_with_fallback, Channel, ChannelKind, ChannelOpener, RealtimeConnection};
use super::{DecisionRequest, EventHandler, ResponseSource, SimulationApi, SimulationResponse, StartRequest};

fn step(index: usize, status: StepStatus) -> PipelineStepUpdate {
    PipelineStepUpdate {
        index,
        status,
        label: None,
        progress: None,
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Canned response for `start_simulation`.
///
/// Carries no simulation id; the session generates one.
#[must_use]
pub fn mock_start_response() -> SimulationResponse {
    SimulationResponse {
        success: true,
        simulation_id: None,
        pipeline_updates: vec![
            step(0, StepStatus::Completed),
            step(1, StepStatus::Completed),
            step(2, StepStatus::InProgress),
            step(3, StepStatus::Pending),
        ],
        metrics: Some(object(json!({
            "accuracy": 0.94,
            "processingTime": "1.2s",
            "confidence": 0.89,
        }))),
        visualization: Some(json!({
            "type": "network",
            "nodes": [
                {"id": "ingest", "status": "completed"},
                {"id": "features", "status": "completed"},
                {"id": "score", "status": "in_progress"},
                {"id": "act", "status": "pending"},
            ],
            "edges": [["ingest", "features"], ["features", "score"], ["score", "act"]],
        })),
        error: None,
        source: ResponseSource::Mock,
    }
}

/// Canned response for `make_decision`.
#[must_use]
pub fn mock_decision_response() -> SimulationResponse {
    SimulationResponse {
        success: true,
        metrics: Some(object(json!({
            "impactScore": 0.87,
            "costSavings": 125_000,
            "efficiency": 0.23,
        }))),
        source: ResponseSource::Mock,
        ..SimulationResponse::default()
    }
}

/// Realtime channel that replays a fixed list of events on an interval.
#[derive(Debug)]
pub struct ScriptedChannel {
    kind: ChannelKind,
    events: VecDeque<StreamEvent>,
    ticker: Interval,
    closed: bool,
}

impl ScriptedChannel {
    /// Replay `events` one per `period`, reporting as a polling channel.
    #[must_use]
    pub fn new(events: Vec<StreamEvent>, period: Duration) -> Self {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            kind: ChannelKind::Polling,
            events: events.into(),
            ticker,
            closed: false,
        }
    }

    /// Report a different channel kind.
    #[must_use]
    pub fn with_kind(mut self, kind: ChannelKind) -> Self {
        self.kind = kind;
        self
    }

    /// Events not yet delivered.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn next_event(&mut self) -> Option<PlaygroundResult<StreamEvent>> {
        if self.closed || self.events.is_empty() {
            return None;
        }
        self.ticker.tick().await;
        self.events.pop_front().map(|mut event| {
            event.timestamp = chrono::Utc::now();
            Ok(event)
        })
    }

    async fn close(&mut self) {
        self.closed = true;
        self.events.clear();
    }
}

/// Network-free `SimulationApi`.
///
/// REST calls return the canned responses. The realtime stream refuses
/// WebSocket and SSE, then replays a scripted run over a polling-kind channel:
/// one `pipeline_update` per step, a metric and a visualization update, then
/// `complete`.
#[derive(Debug, Clone)]
pub struct MockTransport {
    steps: usize,
    interval: Duration,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            steps: 5,
            interval: Duration::from_millis(250),
        }
    }
}

impl MockTransport {
    /// Five steps, a quarter second apart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pipeline steps the scripted stream walks through.
    #[must_use]
    pub const fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    /// Delay between scripted events.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The events a scripted run delivers, in order.
    #[must_use]
    pub fn script(&self) -> Vec<StreamEvent> {
        let mut events: Vec<StreamEvent> = (0..self.steps)
            .map(|index| {
                StreamEvent::now(StreamEventKind::PipelineUpdate {
                    steps: vec![PipelineStepUpdate::completed(index)],
                })
            })
            .collect();

        let midpoint = events.len() / 2;
        events.insert(
            midpoint,
            StreamEvent::now(StreamEventKind::MetricUpdate {
                metrics: object(json!({"accuracy": 0.96, "confidence": 0.91})),
            }),
        );
        events.push(StreamEvent::now(StreamEventKind::VisualizationUpdate {
            data: json!({"type": "network", "highlight": "act"}),
        }));
        events.push(StreamEvent::now(StreamEventKind::Complete {
            metrics: object(json!({"impactScore": 0.87, "efficiency": 0.23})),
        }));
        events
    }
}

#[async_trait]
impl SimulationApi for MockTransport {
    async fn start_simulation(&self, request: &StartRequest) -> PlaygroundResult<SimulationResponse> {
        debug!(industry = %request.industry, solution = %request.solution_id, scenario = %request.scenario_id, "mock start");
        Ok(mock_start_response())
    }

    async fn make_decision(&self, request: &DecisionRequest) -> PlaygroundResult<SimulationResponse> {
        debug!(simulation_id = %request.simulation_id, decision = %request.decision_id, "mock decision");
        Ok(mock_decision_response())
    }

    async fn connect_realtime(
        &self,
        simulation_id: &SimulationId,
        on_event: EventHandler,
    ) -> PlaygroundResult<RealtimeConnection> {
        let opener: Arc<dyn ChannelOpener> = Arc::new(OfflineOpener {
            events: self.script(),
            interval: self.interval,
        });
        connect_with_fallback(opener, simulation_id, on_event).await
    }
}

struct OfflineOpener {
    events: Vec<StreamEvent>,
    interval: Duration,
}

#[async_trait]
impl ChannelOpener for OfflineOpener {
    async fn open(&self, kind: ChannelKind, _simulation_id: &SimulationId) -> PlaygroundResult<Box<dyn Channel>> {
        match kind {
            ChannelKind::Polling => Ok(Box::new(ScriptedChannel::new(self.events.clone(), self.interval))),
            other => Err(TransportError::ConnectionFailed {
                message: format!("{other} unavailable offline"),
            }
            .into()),
        }
    }
}
