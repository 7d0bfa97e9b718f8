//! # playground-sim - Guided AI Simulation Engine
//!
//! Drives the AI playground's interactive simulations: a visitor reads a
//! business brief, picks a scenario, watches a backend-simulated AI pipeline
//! progress while making decisions, and lands on an impact summary.
//!
//! ## Core Concepts
//!
//! - **Phase**: `Brief → Scenario → Simulation → Impact`
//! - **SolutionConfig**: static catalog entry describing one walkthrough
//! - **SimulationSession**: the state machine, owning the state and the single
//!   realtime connection
//! - **StreamEvent**: typed realtime update, delivered over WebSocket, SSE or
//!   polling (tried in that order)
//! - **PhaseView**: pure view model of the current phase
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use playground_sim::{HttpTransport, ScenarioId, SimulationSession, SolutionRegistry};
//!
//! # async fn run() -> playground_sim::PlaygroundResult<()> {
//! let registry = SolutionRegistry::bundled()?;
//! let config = registry.require("fintech", "fraud-detection")?;
//!
//! let session = SimulationSession::for_solution(Arc::new(HttpTransport::from_env()?), config);
//! session.select_scenario(ScenarioId::from("aggressive"), None, None).await;
//!
//! let mut updates = session.subscribe();
//! while updates.changed().await.is_ok() {
//!     println!("{:?}", updates.borrow().pipeline_progress);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod phase;

// Transport
pub mod transport;

// State machine and views
pub mod session;
pub mod state;
pub mod views;

// Re-export primary types at crate root for convenience
pub use catalog::{
    solution_key, Decision, ImpactMetric, ImpactSummary, PipelineStep, Scenario, SolutionConfig,
    SolutionMetadata, SolutionRegistry, VisualizationKind,
};
pub use config::{ClientConfig, FallbackPolicy};
pub use error::{PlaygroundError, PlaygroundResult, SessionError, TransportError, ValidationError};
pub use event::{PipelineStepUpdate, StepStatus, StreamEvent, StreamEventKind};
pub use ids::{DecisionId, ScenarioId, SimulationId};
pub use phase::Phase;
pub use session::SimulationSession;
pub use state::{DecisionOutcome, EventEffect, SimulationState};
pub use transport::{
    ChannelKind, DecisionRequest, EventHandler, HttpTransport, MockTransport, RealtimeConnection,
    ResponseSource, SimulationApi, SimulationResponse, StartRequest,
};
pub use views::{
    BriefView, DecisionPanel, ImpactView, Intent, PhaseView, ScenarioView, SimulationView,
};
