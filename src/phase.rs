//! The four stages of the guided simulation flow.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A stage of the guided flow.
///
/// Variants are declared in flow order, so `Ord` follows the forward
/// progression `Brief < Scenario < Simulation < Impact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Business story and solution overview.
    #[default]
    Brief,
    /// Scenario selection.
    Scenario,
    /// Live pipeline with decisions.
    Simulation,
    /// Results and impact metrics.
    Impact,
}

impl Phase {
    /// All phases in flow order.
    pub const ALL: [Self; 4] = [Self::Brief, Self::Scenario, Self::Simulation, Self::Impact];

    /// The phase that follows this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Brief => Some(Self::Scenario),
            Self::Scenario => Some(Self::Simulation),
            Self::Simulation => Some(Self::Impact),
            Self::Impact => None,
        }
    }

    /// Wire/display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Brief => "brief",
            Self::Scenario => "scenario",
            Self::Simulation => "simulation",
            Self::Impact => "impact",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::UnknownPhase {
                value: s.to_string(),
            })
    }
}
