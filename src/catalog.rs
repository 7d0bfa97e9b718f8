//! Static solution catalog.
//!
//! Each `SolutionConfig` describes one industry/solution walkthrough: the
//! business story, the scenarios a visitor can pick, and the pipeline steps the
//! backend reports progress on. Configs are immutable and keyed by
//! `"{industry}/{solution_id}"`.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{PlaygroundResult, ValidationError};
use crate::ids::{DecisionId, ScenarioId};

/// Bundled catalog shipped with the crate.
const BUNDLED_SOLUTIONS: &str = include_str!("../data/solutions.json");

/// Descriptive metadata for a solution.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionMetadata {
    pub industry: String,
    pub solution_id: String,
    pub title: String,
    #[serde(default)]
    pub tagline: String,
}

/// Closing summary shown in the impact phase.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactSummary {
    pub headline: String,
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// How the simulation phase visualizes a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationKind {
    /// Geographic map.
    Map,
    /// Node/edge graph.
    Graph,
    /// Entity network (e.g. fraud rings).
    Network,
    /// Time series chart.
    Chart,
    /// Event timeline.
    Timeline,
}

/// A choice offered to the visitor during the simulation phase.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub label: String,
    pub outcome: String,
    #[serde(default)]
    pub description: String,
}

/// A named branch of a simulation.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: ScenarioId,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recommended: bool,
    pub visualization: VisualizationKind,
    #[serde(default)]
    pub decisions: Vec<Decision>,
}

impl Scenario {
    /// Look up a decision by id.
    #[must_use]
    pub fn decision(&self, id: &DecisionId) -> Option<&Decision> {
        self.decisions.iter().find(|d| &d.id == id)
    }
}

/// A labeled stage of the backend-simulated AI process.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// A headline number for the impact phase.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactMetric {
    pub label: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    /// Change relative to the baseline, in the same unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
}

/// Full static configuration of one walkthrough.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionConfig {
    pub metadata: SolutionMetadata,
    pub business_story: String,
    pub impact_summary: ImpactSummary,
    pub scenarios: Vec<Scenario>,
    pub pipeline: Vec<PipelineStep>,
    #[serde(default)]
    pub impact_metrics: BTreeMap<String, ImpactMetric>,
}

impl SolutionConfig {
    /// Registry key (`"{industry}/{solution_id}"`).
    #[must_use]
    pub fn key(&self) -> String {
        solution_key(&self.metadata.industry, &self.metadata.solution_id)
    }

    /// Look up a scenario by id.
    #[must_use]
    pub fn scenario(&self, id: &ScenarioId) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| &s.id == id)
    }

    /// The first scenario flagged as recommended.
    #[must_use]
    pub fn recommended_scenario(&self) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.recommended)
    }
}

/// Registry key for an industry/solution pair.
#[must_use]
pub fn solution_key(industry: &str, solution_id: &str) -> String {
    format!("{industry}/{solution_id}")
}

/// Lookup-by-key registry of solution configs.
#[derive(Debug, Clone, Default)]
pub struct SolutionRegistry {
    solutions: HashMap<String, SolutionConfig>,
}

impl SolutionRegistry {
    /// Parse the catalog bundled with the crate.
    pub fn bundled() -> PlaygroundResult<Self> {
        Self::from_json(BUNDLED_SOLUTIONS)
    }

    /// Parse a catalog from a JSON object of `key -> SolutionConfig`.
    ///
    /// # Errors
    ///
    /// Fails if the JSON is malformed or a key does not match the metadata of
    /// the config it points to.
    pub fn from_json(json: &str) -> PlaygroundResult<Self> {
        let solutions: HashMap<String, SolutionConfig> =
            serde_json::from_str(json).map_err(|e| ValidationError::InvalidCatalog {
                reason: e.to_string(),
            })?;

        if let Some((key, config)) = solutions.iter().find(|(key, config)| **key != config.key()) {
            return Err(ValidationError::InvalidCatalog {
                reason: format!("entry '{key}' describes '{}'", config.key()),
            }
            .into());
        }

        Ok(Self { solutions })
    }

    /// Register or replace a config under its own key.
    pub fn insert(&mut self, config: SolutionConfig) {
        self.solutions.insert(config.key(), config);
    }

    /// Look up a config. Misses return `None`.
    #[must_use]
    pub fn get(&self, industry: &str, solution_id: &str) -> Option<&SolutionConfig> {
        self.solutions.get(&solution_key(industry, solution_id))
    }

    /// Look up a config, turning a miss into a validation error.
    pub fn require(&self, industry: &str, solution_id: &str) -> Result<&SolutionConfig, ValidationError> {
        self.get(industry, solution_id)
            .ok_or_else(|| ValidationError::UnknownSolution {
                key: solution_key(industry, solution_id),
            })
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.solutions.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Number of solutions across all industries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    /// True when no solution is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }
}
