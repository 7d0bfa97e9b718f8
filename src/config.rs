//! Client configuration.
//!
//! The backend base URL is resolved from the environment and defaults to a
//! local development address. Everything else has a fixed default that can be
//! overridden with the `with_*` builders.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ValidationError;
use crate::ids::SimulationId;

/// Primary environment variable holding the backend base URL.
pub const BASE_URL_ENV: &str = "PLAYGROUND_API_URL";

/// Secondary environment variable, shared with the web frontend.
pub const BASE_URL_ENV_FALLBACK: &str = "NEXT_PUBLIC_API_URL";

/// Base URL used when no environment variable is set.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Interval between status polls when polling is the active channel.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// What to do when a REST call fails at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Substitute a canned mock response so a disconnected demo keeps working.
    ///
    /// Substituted responses are tagged `ResponseSource::Mock`.
    #[default]
    Mock,
    /// Surface the failure to the caller.
    Strict,
}

/// Configuration for `HttpTransport`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL (`http` or `https`).
    pub base_url: Url,
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// Per-request timeout for REST calls and polls.
    pub request_timeout: Duration,
    /// Timeout for establishing a WebSocket or SSE channel.
    pub connect_timeout: Duration,
    /// REST failure handling.
    pub fallback: FallbackPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
            fallback: FallbackPolicy::Mock,
        }
    }
}

fn default_base_url() -> Url {
    match Url::parse(DEFAULT_BASE_URL) {
        Ok(url) => url,
        Err(_) => unreachable!("DEFAULT_BASE_URL is a valid URL"),
    }
}

impl ClientConfig {
    /// Build a config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidBaseUrl` if the variable is set to
    /// something that is not an http(s) URL.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = [BASE_URL_ENV, BASE_URL_ENV_FALLBACK]
            .into_iter()
            .filter_map(|key| lookup(key))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty());

        let config = Self::default();
        match raw {
            Some(url) => config.with_base_url(&url),
            None => Ok(config),
        }
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, url: &str) -> Result<Self, ValidationError> {
        self.base_url = parse_base_url(url)?;
        Ok(self)
    }

    /// Override the polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the REST request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the realtime connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set what happens when the backend is unreachable.
    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Validate intervals and timeouts.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval.is_zero() {
            return Err(ValidationError::MissingField {
                field: "poll_interval".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ValidationError::MissingField {
                field: "request_timeout".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(ValidationError::MissingField {
                field: "connect_timeout".to_string(),
            });
        }
        Ok(())
    }

    /// Absolute URL of a REST path (`path` starts with `/`).
    pub fn endpoint(&self, path: &str) -> Result<Url, ValidationError> {
        let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|e| ValidationError::InvalidBaseUrl {
            url: joined,
            reason: e.to_string(),
        })
    }

    /// `path` followed by the id as a single percent-encoded segment.
    fn simulation_endpoint(&self, path: &str, id: &SimulationId) -> Result<Url, ValidationError> {
        let mut url = self.endpoint(path)?;
        url.path_segments_mut()
            .map_err(|()| ValidationError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: "base cannot carry a path".to_string(),
            })?
            .push(id.as_str());
        Ok(url)
    }

    /// `POST` target for starting a simulation.
    pub fn start_url(&self) -> Result<Url, ValidationError> {
        self.endpoint("/api/interactive/start")
    }

    /// `POST` target for submitting a decision.
    pub fn decision_url(&self) -> Result<Url, ValidationError> {
        self.endpoint("/api/interactive/decision")
    }

    /// Server-push stream for a simulation.
    pub fn stream_url(&self, id: &SimulationId) -> Result<Url, ValidationError> {
        self.simulation_endpoint("/api/interactive/stream", id)
    }

    /// Polling status endpoint for a simulation.
    pub fn status_url(&self, id: &SimulationId) -> Result<Url, ValidationError> {
        self.simulation_endpoint("/api/interactive/status", id)
    }

    /// WebSocket endpoint for a simulation (`http -> ws`, `https -> wss`).
    pub fn websocket_url(&self, id: &SimulationId) -> Result<Url, ValidationError> {
        let mut url = self.simulation_endpoint("/ws/interactive", id)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| ValidationError::InvalidBaseUrl {
            url: self.base_url.to_string(),
            reason: format!("cannot switch scheme to {scheme}"),
        })?;
        Ok(url)
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ValidationError> {
    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ValidationError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}
