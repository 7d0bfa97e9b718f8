//! The simulation state machine.
//!
//! A `SimulationSession` owns one `SimulationState` and at most one realtime
//! connection. Operations take `&self` and may overlap; the state lock is
//! never held across an await. Every asynchronous completion and every stream
//! event carries the session generation it was issued under, and is dropped if
//! the generation has moved on (scenario re-selection, `reset`, `shutdown`).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::catalog::SolutionConfig;
use crate::error::SessionError;
use crate::event::StreamEvent;
use crate::ids::{DecisionId, ScenarioId, SimulationId};
use crate::phase::Phase;
use crate::state::{DecisionOutcome, EventEffect, SimulationState};
use crate::transport::{ChannelKind, DecisionRequest, EventHandler, RealtimeConnection, SimulationApi, StartRequest};
use crate::views::Intent;

/// Handle to one guided simulation.
///
/// Cheap to clone; clones share the same state. Dropping the last handle
/// closes the realtime connection.
#[derive(Clone)]
pub struct SimulationSession {
    shared: Arc<Shared>,
}

struct Shared {
    api: Arc<dyn SimulationApi>,
    industry: String,
    solution_id: String,
    core: Mutex<Core>,
    updates: watch::Sender<SimulationState>,
}

#[derive(Default)]
struct Core {
    state: SimulationState,
    generation: u64,
    channel: Option<RealtimeConnection>,
}

impl Core {
    fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
    }
}

impl std::fmt::Debug for SimulationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.shared.lock();
        f.debug_struct("SimulationSession")
            .field("industry", &self.shared.industry)
            .field("solution_id", &self.shared.solution_id)
            .field("generation", &core.generation)
            .field("phase", &core.state.phase)
            .field("channel", &core.channel.as_ref().map(RealtimeConnection::kind))
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, core: &Core) {
        self.updates.send_replace(core.state.clone());
    }

    /// Apply `f` to the state and publish the result.
    fn update<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        let mut core = self.lock();
        let out = f(&mut core);
        self.publish(&core);
        out
    }

    /// Apply `f` only if `generation` is still current.
    fn update_if_current(&self, generation: u64, f: impl FnOnce(&mut Core)) -> bool {
        let mut core = self.lock();
        if core.generation != generation {
            debug!(issued = generation, current = core.generation, "dropping stale result");
            return false;
        }
        f(&mut core);
        self.publish(&core);
        true
    }

    fn on_stream_event(&self, generation: u64, event: &StreamEvent) {
        self.update_if_current(generation, |core| {
            if core.state.apply_event(event) == EventEffect::Completed {
                debug!("simulation complete");
                core.teardown();
                core.state.phase = Phase::Impact;
            }
        });
    }
}

impl SimulationSession {
    /// Create a session for one industry/solution pair.
    #[must_use]
    pub fn new(api: Arc<dyn SimulationApi>, industry: impl Into<String>, solution_id: impl Into<String>) -> Self {
        let (updates, _) = watch::channel(SimulationState::default());
        Self {
            shared: Arc::new(Shared {
                api,
                industry: industry.into(),
                solution_id: solution_id.into(),
                core: Mutex::new(Core::default()),
                updates,
            }),
        }
    }

    /// Create a session for a catalog entry.
    #[must_use]
    pub fn for_solution(api: Arc<dyn SimulationApi>, config: &SolutionConfig) -> Self {
        Self::new(api, &config.metadata.industry, &config.metadata.solution_id)
    }

    /// Industry key this session runs under.
    #[must_use]
    pub fn industry(&self) -> &str {
        &self.shared.industry
    }

    /// Solution this session runs.
    #[must_use]
    pub fn solution_id(&self) -> &str {
        &self.shared.solution_id
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> SimulationState {
        self.shared.lock().state.clone()
    }

    /// Receive a fresh snapshot after every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SimulationState> {
        self.shared.updates.subscribe()
    }

    /// Kind of the open realtime channel, if any.
    #[must_use]
    pub fn active_channel(&self) -> Option<ChannelKind> {
        self.shared.lock().channel.as_ref().map(RealtimeConnection::kind)
    }

    /// Jump to `phase`. Transitions are not validated.
    pub fn go_to_phase(&self, phase: Phase) {
        self.shared.update(|core| {
            core.state.phase = phase;
            core.state.error = None;
        });
    }

    /// Select a scenario and start the simulation.
    ///
    /// The selection, phase change and `loading` flag are visible before the
    /// first await. `industry` and `solution_id` default to the session's own.
    pub async fn select_scenario(&self, scenario_id: ScenarioId, industry: Option<&str>, solution_id: Option<&str>) {
        let request = StartRequest {
            industry: industry.unwrap_or(&self.shared.industry).to_string(),
            solution_id: solution_id.unwrap_or(&self.shared.solution_id).to_string(),
            scenario_id: scenario_id.clone(),
        };

        let generation = self.shared.update(|core| {
            core.generation += 1;
            core.teardown();
            core.state.selected_scenario = Some(scenario_id);
            core.state.phase = Phase::Simulation;
            core.state.loading = true;
            core.state.error = None;
            core.generation
        });

        let result = self.shared.api.start_simulation(&request).await;

        let mut started = None;
        self.shared.update_if_current(generation, |core| {
            let state = &mut core.state;
            state.loading = false;
            match result {
                Ok(resp) if resp.success => {
                    if resp.is_mock() {
                        warn!(scenario = %request.scenario_id, "simulation running on mock data");
                    }
                    let id = resp.simulation_id.clone().unwrap_or_else(SimulationId::generate);
                    state.simulation_id = Some(id.clone());
                    state.pipeline_progress = resp.completed_steps();
                    if let Some(metrics) = &resp.metrics {
                        state.merge_metrics(metrics);
                    }
                    if let Some(visualization) = resp.visualization {
                        state.visualization_data = Some(visualization);
                    }
                    started = Some(id);
                }
                Ok(resp) => {
                    let message = resp.error.unwrap_or_else(|| "backend declined the scenario".to_string());
                    state.error = Some(SessionError::ScenarioRejected { message }.to_string());
                }
                Err(err) => {
                    warn!(scenario = %request.scenario_id, error = %err, "failed to start simulation");
                    state.error = Some(err.to_string());
                }
            }
        });

        if let Some(simulation_id) = started {
            self.open_realtime(generation, simulation_id).await;
        }
    }

    async fn open_realtime(&self, generation: u64, simulation_id: SimulationId) {
        let handler = event_handler(Arc::downgrade(&self.shared), generation);
        let result = self.shared.api.connect_realtime(&simulation_id, handler).await;

        let mut core = self.shared.lock();
        if core.generation != generation {
            debug!(simulation_id = %simulation_id, "session moved on, closing new realtime connection");
            if let Ok(connection) = result {
                connection.close();
            }
            return;
        }
        match result {
            Ok(connection) => {
                debug!(simulation_id = %simulation_id, kind = %connection.kind(), "realtime connected");
                if core.state.phase == Phase::Impact {
                    connection.close();
                    return;
                }
                if let Some(previous) = core.channel.replace(connection) {
                    previous.close();
                }
            }
            Err(err) => {
                warn!(simulation_id = %simulation_id, error = %err, "realtime connection failed");
                core.state.error = Some(err.to_string());
                self.shared.publish(&core);
            }
        }
    }

    /// Record a decision and submit it to the backend.
    ///
    /// A later decision with the same id replaces the earlier one. Without an
    /// active simulation the decision is only recorded locally.
    pub async fn make_decision(&self, decision_id: DecisionId, outcome: impl Into<String>, data: Option<Value>) {
        let outcome = outcome.into();
        let decision_data = decision_payload(&outcome, data.as_ref());
        let mut recorded = DecisionOutcome::new(outcome);
        if let Some(data) = data {
            recorded = recorded.with_data(data);
        }

        let (generation, simulation_id) = self.shared.update(|core| {
            core.state.record_decision(decision_id.clone(), recorded);
            if core.state.simulation_id.is_some() {
                core.state.loading = true;
            }
            (core.generation, core.state.simulation_id.clone())
        });

        let Some(simulation_id) = simulation_id else {
            warn!(decision = %decision_id, error = %SessionError::NoActiveSimulation, "decision recorded locally only");
            return;
        };

        let request = DecisionRequest {
            simulation_id,
            decision_id,
            decision_data,
        };
        let result = self.shared.api.make_decision(&request).await;

        self.shared.update_if_current(generation, |core| {
            let state = &mut core.state;
            state.loading = false;
            match result {
                Ok(resp) if resp.success => {
                    if let Some(metrics) = &resp.metrics {
                        state.merge_metrics(metrics);
                    }
                }
                Ok(resp) => {
                    let message = resp.error.unwrap_or_else(|| "backend declined the decision".to_string());
                    state.error = Some(SessionError::DecisionRejected { message }.to_string());
                }
                Err(err) => {
                    warn!(decision = %request.decision_id, error = %err, "failed to submit decision");
                    state.error = Some(err.to_string());
                }
            }
        });
    }

    /// Overwrite the completed-step list.
    pub fn update_pipeline_progress(&self, mut indices: Vec<usize>) {
        indices.sort_unstable();
        indices.dedup();
        self.shared.update(|core| core.state.pipeline_progress = indices);
    }

    /// Close the realtime connection and move to `Impact`.
    pub fn complete_simulation(&self) {
        self.shared.update(|core| {
            core.teardown();
            core.state.phase = Phase::Impact;
        });
    }

    /// Close the realtime connection and restore the initial state.
    ///
    /// Results of calls still in flight are ignored when they arrive.
    pub fn reset(&self) {
        self.shared.update(|core| {
            core.generation += 1;
            core.teardown();
            core.state = SimulationState::default();
        });
    }

    /// Close the realtime connection and ignore any result still in flight.
    /// The state is left as is.
    pub fn shutdown(&self) {
        let mut core = self.shared.lock();
        core.generation += 1;
        core.teardown();
    }

    /// Route a view intent to the matching operation.
    pub async fn dispatch(&self, intent: Intent) {
        match intent {
            Intent::Start => self.go_to_phase(Phase::Scenario),
            Intent::SelectScenario(scenario_id) => self.select_scenario(scenario_id, None, None).await,
            Intent::Decide { decision_id, outcome } => self.make_decision(decision_id, outcome, None).await,
            Intent::Complete => self.complete_simulation(),
            Intent::Replay => self.reset(),
        }
    }
}

fn event_handler(shared: Weak<Shared>, generation: u64) -> EventHandler {
    Arc::new(move |event: StreamEvent| {
        if let Some(shared) = shared.upgrade() {
            shared.on_stream_event(generation, &event);
        }
    })
}

/// `{"outcome": ..}` plus the caller's fields; non-object data goes under `data`.
fn decision_payload(outcome: &str, data: Option<&Value>) -> Value {
    let mut payload = Map::new();
    payload.insert("outcome".to_string(), Value::String(outcome.to_string()));
    match data {
        Some(Value::Object(fields)) => {
            for (key, value) in fields {
                payload.insert(key.clone(), value.clone());
            }
        }
        Some(other) => {
            payload.insert("data".to_string(), other.clone());
        }
        None => {}
    }
    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;

    use crate::transport::MockTransport;

    fn session() -> SimulationSession {
        let api = MockTransport::new().with_steps(3).with_interval(Duration::from_millis(5));
        SimulationSession::new(Arc::new(api), "fintech", "fraud-detection")
    }

    #[test]
    fn decision_payload_merges_object_fields() {
        let payload = decision_payload("blocked", Some(&json!({"threshold": 0.7})));
        assert_eq!(payload, json!({"outcome": "blocked", "threshold": 0.7}));

        let payload = decision_payload("blocked", Some(&json!(3)));
        assert_eq!(payload, json!({"outcome": "blocked", "data": 3}));

        assert_eq!(decision_payload("approved", None), json!({"outcome": "approved"}));
    }

    #[tokio::test]
    async fn go_to_phase_is_unguarded_and_clears_error() {
        let session = session();
        session.shared.update(|core| core.state.error = Some("boom".to_string()));
        session.go_to_phase(Phase::Impact);
        let state = session.state();
        assert_eq!(state.phase, Phase::Impact);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn decision_without_simulation_is_recorded_locally() {
        let session = session();
        session.make_decision(DecisionId::from("approve"), "approved", None).await;
        let state = session.state();
        assert_eq!(state.decision(&DecisionId::from("approve")).unwrap().outcome, "approved");
        assert!(!state.loading);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn mock_run_reaches_impact_and_closes_channel() {
        let session = session();
        let mut updates = session.subscribe();
        session.select_scenario(ScenarioId::from("balanced"), None, None).await;

        let state = session.state();
        assert!(state.simulation_id.is_some());
        // The scripted stream may already be delivering.
        assert!(state.pipeline_progress.starts_with(&[0, 1]));

        tokio::time::timeout(Duration::from_secs(2), updates.wait_for(|s| s.phase == Phase::Impact))
            .await
            .unwrap()
            .unwrap();
        let state = session.state();
        assert_eq!(state.pipeline_progress, vec![0, 1, 2]);
        assert_eq!(state.metrics["impactScore"], json!(0.87));
        assert!(session.active_channel().is_none());
    }

    #[tokio::test]
    async fn dispatch_routes_intents() {
        let session = session();
        session.dispatch(Intent::Start).await;
        assert_eq!(session.state().phase, Phase::Scenario);

        session.dispatch(Intent::Complete).await;
        assert_eq!(session.state().phase, Phase::Impact);

        session.dispatch(Intent::Replay).await;
        assert!(session.state().is_initial());
    }
}
