//! Phase view models.
//!
//! Views are pure functions of `(&SimulationState, &SolutionConfig)`. They do
//! no I/O; user actions come back out as [`Intent`]s for the session to
//! dispatch.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::catalog::{Decision, ImpactMetric, Scenario, SolutionConfig, VisualizationKind};
use crate::error::ValidationError;
use crate::ids::{DecisionId, ScenarioId, SimulationId};
use crate::phase::Phase;
use crate::state::SimulationState;

/// A user action emitted by a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Leave the brief and pick a scenario.
    Start,
    /// Pick a scenario and start the simulation.
    SelectScenario(ScenarioId),
    /// Choose a decision in the running simulation.
    Decide {
        /// Decision id from the selected scenario.
        decision_id: DecisionId,
        /// Outcome label recorded for it.
        outcome: String,
    },
    /// Finish the simulation and show its impact.
    Complete,
    /// Start over from the brief.
    Replay,
}

impl Intent {
    /// Decide using the outcome the catalog gives `decision`.
    #[must_use]
    pub fn decide(decision: &Decision) -> Self {
        Self::Decide {
            decision_id: decision.id.clone(),
            outcome: decision.outcome.clone(),
        }
    }

    /// Check the intent refers to things that exist in `config`.
    ///
    /// # Errors
    ///
    /// `UnknownScenario` for a scenario the solution does not offer,
    /// `MissingField` when deciding without a selected scenario, and
    /// `UnknownDecision` for a decision the selected scenario does not offer.
    pub fn validate(&self, state: &SimulationState, config: &SolutionConfig) -> Result<(), ValidationError> {
        match self {
            Self::SelectScenario(id) => {
                config.scenario(id).ok_or_else(|| ValidationError::UnknownScenario {
                    scenario_id: id.to_string(),
                })?;
            }
            Self::Decide { decision_id, .. } => {
                let scenario_id = state.selected_scenario.as_ref().ok_or_else(|| ValidationError::MissingField {
                    field: "selected_scenario".to_string(),
                })?;
                let scenario = config.scenario(scenario_id).ok_or_else(|| ValidationError::UnknownScenario {
                    scenario_id: scenario_id.to_string(),
                })?;
                scenario.decision(decision_id).ok_or_else(|| ValidationError::UnknownDecision {
                    scenario_id: scenario_id.to_string(),
                    decision_id: decision_id.to_string(),
                })?;
            }
            Self::Start | Self::Complete | Self::Replay => {}
        }
        Ok(())
    }
}

/// Brief phase: the business story.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BriefView {
    pub title: String,
    pub tagline: String,
    pub business_story: String,
    pub pipeline: Vec<String>,
    pub scenario_count: usize,
}

/// One selectable scenario.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioCard {
    pub id: ScenarioId,
    pub label: String,
    pub description: String,
    pub recommended: bool,
    pub visualization: VisualizationKind,
    pub decision_count: usize,
    pub selected: bool,
}

impl ScenarioCard {
    fn new(scenario: &Scenario, selected: Option<&ScenarioId>) -> Self {
        Self {
            id: scenario.id.clone(),
            label: scenario.label.clone(),
            description: scenario.description.clone(),
            recommended: scenario.recommended,
            visualization: scenario.visualization,
            decision_count: scenario.decisions.len(),
            selected: selected == Some(&scenario.id),
        }
    }
}

/// Scenario phase: the list to pick from.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioView {
    pub scenarios: Vec<ScenarioCard>,
    pub recommended: Option<ScenarioId>,
}

/// A decision in the simulation phase.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionItem {
    pub id: DecisionId,
    pub label: String,
    pub outcome: String,
    pub description: String,
    pub chosen: bool,
}

/// A pipeline step in the simulation phase.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineItem {
    pub index: usize,
    pub label: String,
    pub completed: bool,
}

/// Simulation phase: live pipeline, decisions and metrics.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationView {
    pub scenario: Option<ScenarioCard>,
    pub simulation_id: Option<SimulationId>,
    pub decisions: Vec<DecisionItem>,
    pub pipeline: Vec<PipelineItem>,
    pub loading: bool,
    pub error: Option<String>,
    pub metrics: Map<String, Value>,
    pub visualization: Option<Value>,
}

impl SimulationView {
    /// Fraction of pipeline steps completed, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        if self.pipeline.is_empty() {
            return 0.0;
        }
        let done = self.pipeline.iter().filter(|p| p.completed).count();
        done as f64 / self.pipeline.len() as f64
    }

    /// Returns true once every pipeline step has completed.
    #[must_use]
    pub fn is_pipeline_complete(&self) -> bool {
        !self.pipeline.is_empty() && self.pipeline.iter().all(|p| p.completed)
    }
}

/// A headline metric row in the impact phase.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub key: String,
    pub label: String,
    pub value: f64,
    pub unit: String,
    pub delta: Option<f64>,
}

impl MetricRow {
    fn new(key: &str, metric: &ImpactMetric) -> Self {
        Self {
            key: key.to_string(),
            label: metric.label.clone(),
            value: metric.value,
            unit: metric.unit.clone(),
            delta: metric.delta,
        }
    }
}

/// Impact phase: results.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactView {
    pub headline: String,
    pub highlights: Vec<String>,
    pub metrics: Vec<MetricRow>,
    /// Metrics reported by the backend during the run.
    pub live_metrics: Map<String, Value>,
    /// `(decision, outcome)` pairs, sorted by decision id.
    pub decisions: Vec<(DecisionId, String)>,
}

/// The view for the current phase.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseView {
    Brief(BriefView),
    Scenario(ScenarioView),
    Simulation(SimulationView),
    Impact(ImpactView),
}

impl PhaseView {
    /// Build the view for `state.phase`.
    #[must_use]
    pub fn build(state: &SimulationState, config: &SolutionConfig) -> Self {
        match state.phase {
            Phase::Brief => Self::Brief(brief(config)),
            Phase::Scenario => Self::Scenario(scenarios(state, config)),
            Phase::Simulation => Self::Simulation(simulation(state, config)),
            Phase::Impact => Self::Impact(impact(state, config)),
        }
    }

    /// Phase this view renders.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Brief(_) => Phase::Brief,
            Self::Scenario(_) => Phase::Scenario,
            Self::Simulation(_) => Phase::Simulation,
            Self::Impact(_) => Phase::Impact,
        }
    }
}

fn brief(config: &SolutionConfig) -> BriefView {
    BriefView {
        title: config.metadata.title.clone(),
        tagline: config.metadata.tagline.clone(),
        business_story: config.business_story.clone(),
        pipeline: config.pipeline.iter().map(|step| step.label.clone()).collect(),
        scenario_count: config.scenarios.len(),
    }
}

fn scenarios(state: &SimulationState, config: &SolutionConfig) -> ScenarioView {
    let selected = state.selected_scenario.as_ref();
    ScenarioView {
        scenarios: config.scenarios.iter().map(|s| ScenarioCard::new(s, selected)).collect(),
        recommended: config.recommended_scenario().map(|s| s.id.clone()),
    }
}

fn simulation(state: &SimulationState, config: &SolutionConfig) -> SimulationView {
    let scenario = state.selected_scenario.as_ref().and_then(|id| config.scenario(id));

    let decisions = scenario
        .map(|s| {
            s.decisions
                .iter()
                .map(|d| DecisionItem {
                    id: d.id.clone(),
                    label: d.label.clone(),
                    outcome: d.outcome.clone(),
                    description: d.description.clone(),
                    chosen: state.decisions.contains_key(&d.id),
                })
                .collect()
        })
        .unwrap_or_default();

    let pipeline = config
        .pipeline
        .iter()
        .enumerate()
        .map(|(index, step)| PipelineItem {
            index,
            label: step.label.clone(),
            completed: state.is_step_completed(index),
        })
        .collect();

    SimulationView {
        scenario: scenario.map(|s| ScenarioCard::new(s, state.selected_scenario.as_ref())),
        simulation_id: state.simulation_id.clone(),
        decisions,
        pipeline,
        loading: state.loading,
        error: state.error.clone(),
        metrics: state.metrics.clone(),
        visualization: state.visualization_data.clone(),
    }
}

fn impact(state: &SimulationState, config: &SolutionConfig) -> ImpactView {
    let mut decisions: Vec<(DecisionId, String)> = state
        .decisions
        .iter()
        .map(|(id, outcome)| (id.clone(), outcome.outcome.clone()))
        .collect();
    decisions.sort();

    ImpactView {
        headline: config.impact_summary.headline.clone(),
        highlights: config.impact_summary.highlights.clone(),
        metrics: config
            .impact_metrics
            .iter()
            .map(|(key, metric)| MetricRow::new(key, metric))
            .collect(),
        live_metrics: state.metrics.clone(),
        decisions,
    }
}

/// Sub-state of the decision list in the simulation phase.
///
/// Once a decision is picked the panel is locked until the backend call for
/// it has resolved and the caller acknowledges it.
///
/// # Examples
///
/// ```
/// use playground_sim::{DecisionId, DecisionPanel};
///
/// let mut panel = DecisionPanel::default();
/// panel.select(DecisionId::from("block")).unwrap();
/// assert!(panel.select(DecisionId::from("review")).is_err());
/// panel.acknowledge();
/// assert_eq!(panel.decided(), Some(&DecisionId::from("block")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DecisionPanel {
    /// Nothing chosen yet.
    #[default]
    Idle,
    /// Waiting on the backend for this decision.
    Processing(DecisionId),
    /// The backend acknowledged this decision.
    Done(DecisionId),
}

impl DecisionPanel {
    /// Lock the panel on `decision`.
    ///
    /// # Errors
    ///
    /// `DecisionLocked` unless the panel is idle.
    pub fn select(&mut self, decision: DecisionId) -> Result<(), ValidationError> {
        match self {
            Self::Idle => {
                *self = Self::Processing(decision);
                Ok(())
            }
            Self::Processing(pending) | Self::Done(pending) => Err(ValidationError::DecisionLocked {
                pending: pending.to_string(),
            }),
        }
    }

    /// Mark the pending decision as resolved. No effect unless processing.
    pub fn acknowledge(&mut self) {
        if let Self::Processing(decision) = self {
            *self = Self::Done(decision.clone());
        }
    }

    /// Return to idle.
    pub fn reset(&mut self) {
        *self = Self::Idle;
    }

    /// Returns true unless the panel is idle.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Decision waiting on the backend, if any.
    #[must_use]
    pub const fn pending(&self) -> Option<&DecisionId> {
        match self {
            Self::Processing(decision) => Some(decision),
            _ => None,
        }
    }

    /// Acknowledged decision, if any.
    #[must_use]
    pub const fn decided(&self) -> Option<&DecisionId> {
        match self {
            Self::Done(decision) => Some(decision),
            _ => None,
        }
    }
}
