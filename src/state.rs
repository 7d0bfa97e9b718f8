//! Simulation state and the stream-event reducer.
//!
//! `SimulationState` is a plain value: the session owns one behind a lock and
//! publishes snapshots. All mutation by stream events goes through
//! [`SimulationState::apply_event`], which only touches the fields its event
//! kind is about.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::{PipelineStepUpdate, StreamEvent, StreamEventKind};
use crate::ids::{DecisionId, ScenarioId, SimulationId};
use crate::phase::Phase;

/// Outcome recorded for a decision.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub outcome: String,
    /// Extra data sent along with the decision, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DecisionOutcome {
    /// Outcome without attached data.
    #[must_use]
    pub fn new(outcome: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            data: None,
        }
    }

    /// Attach the data sent along with the decision.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// What applying a stream event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventEffect {
    /// State was updated; the simulation continues.
    Applied,
    /// The backend reported completion.
    Completed,
}

/// Progress of one guided simulation.
///
/// `Default` is the initial state: phase `Brief`, everything else empty.
///
/// # Examples
///
/// ```
/// use playground_sim::{Phase, SimulationState};
///
/// let state = SimulationState::default();
/// assert_eq!(state.phase, Phase::Brief);
/// assert!(!state.loading);
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationState {
    pub phase: Phase,
    pub selected_scenario: Option<ScenarioId>,
    pub decisions: HashMap<DecisionId, DecisionOutcome>,
    /// Completed step indices, ascending, no duplicates.
    pub pipeline_progress: Vec<usize>,
    pub simulation_id: Option<SimulationId>,
    pub loading: bool,
    pub error: Option<String>,
    pub metrics: Map<String, Value>,
    pub visualization_data: Option<Value>,
}

impl SimulationState {
    /// The initial state.
    #[must_use]
    pub fn initial() -> Self {
        Self::default()
    }

    /// Returns true if the state equals the initial state.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        *self == Self::default()
    }

    /// Returns true if the pipeline step at `index` has completed.
    #[must_use]
    pub fn is_step_completed(&self, index: usize) -> bool {
        self.pipeline_progress.binary_search(&index).is_ok()
    }

    /// The outcome recorded for a decision, if any.
    #[must_use]
    pub fn decision(&self, id: &DecisionId) -> Option<&DecisionOutcome> {
        self.decisions.get(id)
    }

    /// Record a decision; a later decision with the same id replaces it.
    pub fn record_decision(&mut self, id: DecisionId, outcome: DecisionOutcome) {
        self.decisions.insert(id, outcome);
    }

    /// Merge the completed steps from `updates` into `pipeline_progress`.
    pub fn merge_completed_steps(&mut self, updates: &[PipelineStepUpdate]) {
        let before = self.pipeline_progress.len();
        self.pipeline_progress
            .extend(updates.iter().filter(|u| u.is_completed()).map(|u| u.index));
        if self.pipeline_progress.len() != before {
            self.pipeline_progress.sort_unstable();
            self.pipeline_progress.dedup();
        }
    }

    /// Merge metrics; incoming keys overwrite existing ones.
    pub fn merge_metrics(&mut self, metrics: &Map<String, Value>) {
        for (key, value) in metrics {
            self.metrics.insert(key.clone(), value.clone());
        }
    }

    /// Apply one stream event.
    pub fn apply_event(&mut self, event: &StreamEvent) -> EventEffect {
        match &event.kind {
            StreamEventKind::PipelineUpdate { steps } => {
                self.merge_completed_steps(steps);
            }
            StreamEventKind::MetricUpdate { metrics } => {
                self.merge_metrics(metrics);
            }
            StreamEventKind::VisualizationUpdate { data } => {
                self.visualization_data = Some(data.clone());
            }
            StreamEventKind::Error { message } => {
                self.error = Some(message.clone());
                self.loading = false;
            }
            StreamEventKind::Complete { metrics } => {
                self.merge_metrics(metrics);
                self.loading = false;
                return EventEffect::Completed;
            }
        }
        EventEffect::Applied
    }
}
