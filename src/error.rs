//! Error types for the playground simulation crate.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. Session operations absorb these into
//! `SimulationState::error`; nothing panics into the view layer.

use thiserror::Error;

/// Validation errors raised on inputs and inbound payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown phase '{value}'")]
    UnknownPhase {
        value: String,
    },

    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl {
        url: String,
        reason: String,
    },

    #[error("No solution registered for '{key}'")]
    UnknownSolution {
        key: String,
    },

    #[error("Invalid solution catalog: {reason}")]
    InvalidCatalog {
        reason: String,
    },

    #[error("Unknown scenario '{scenario_id}'")]
    UnknownScenario {
        scenario_id: String,
    },

    #[error("Scenario '{scenario_id}' offers no decision '{decision_id}'")]
    UnknownDecision {
        scenario_id: String,
        decision_id: String,
    },

    #[error("Decision '{pending}' is still being processed")]
    DecisionLocked {
        pending: String,
    },

    #[error("Malformed '{event_type}' payload: {reason}")]
    MalformedEvent {
        event_type: String,
        reason: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },
}

/// Transport errors for REST calls and realtime channels.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("HTTP {code} from {endpoint}")]
    HttpStatus {
        code: u16,
        endpoint: String,
    },

    #[error("Failed to deserialize response: {message}")]
    Deserialization {
        message: String,
    },

    #[error("Realtime channel closed: {reason}")]
    ChannelClosed {
        reason: String,
    },
}

/// Errors produced by the simulation state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No active simulation")]
    NoActiveSimulation,

    #[error("Scenario rejected by backend: {message}")]
    ScenarioRejected {
        message: String,
    },

    #[error("Decision rejected by backend: {message}")]
    DecisionRejected {
        message: String,
    },
}

/// Top-level error type for the crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaygroundError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl PlaygroundError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is a session error.
    #[must_use]
    pub const fn is_session(&self) -> bool {
        matches!(self, Self::Session(_))
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => match e {
                TransportError::ConnectionFailed { .. } | TransportError::ChannelClosed { .. } => true,
                TransportError::HttpStatus { code, .. } => *code >= 500,
                TransportError::Deserialization { .. } => false,
            },
            Self::Validation(_) | Self::Session(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::HttpStatus {
                code: status.as_u16(),
                endpoint: err.url().map_or_else(String::new, ToString::to_string),
            };
        }
        if err.is_decode() {
            return Self::Deserialization {
                message: err.to_string(),
            };
        }
        Self::ConnectionFailed {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for PlaygroundError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.into())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization {
            message: err.to_string(),
        }
    }
}

/// Result type alias for crate operations.
pub type PlaygroundResult<T> = Result<T, PlaygroundError>;
