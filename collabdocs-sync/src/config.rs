//! Session configuration: endpoints and every timer the client runs.

use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Environment variable overriding [`SessionConfig::server_url`].
pub const WS_URL_ENV: &str = "COLLABDOCS_WS_URL";
/// Environment variable overriding [`SessionConfig::api_url`].
pub const API_URL_ENV: &str = "COLLABDOCS_API_URL";

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint (document id and name are appended as query params)
    pub server_url: Url,
    /// Base URL of the document/comment REST API
    pub api_url: Url,
    /// First reconnect step; attempt `n` waits `base * 2^n`
    pub backoff_base: Duration,
    /// Upper bound on any reconnect delay
    pub backoff_cap: Duration,
    /// How long an outage must last before the caller is told we are reconnecting
    pub soft_failure_after: Duration,
    /// Quiet period after the last local change before typing flips to false
    pub typing_idle: Duration,
    /// Full-state snapshot period while connected
    pub snapshot_interval: Duration,
    /// A collaborator is visible while its last presence is younger than this
    pub presence_liveness: Duration,
    /// A collaborator shows as typing while its last typing=true is younger than this
    pub typing_freshness: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: Url::parse("ws://127.0.0.1:8080/ws").expect("static url"),
            api_url: Url::parse("http://127.0.0.1:8080/api").expect("static url"),
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(10_000),
            soft_failure_after: Duration::from_millis(5000),
            typing_idle: Duration::from_millis(1200),
            snapshot_interval: Duration::from_millis(5000),
            presence_liveness: Duration::from_millis(7000),
            typing_freshness: Duration::from_millis(1800),
        }
    }
}

impl SessionConfig {
    /// Defaults, with endpoints overridden from the environment when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(WS_URL_ENV) {
            config.server_url = parse_url(WS_URL_ENV, &raw)?;
        }
        if let Ok(raw) = std::env::var(API_URL_ENV) {
            config.api_url = parse_url(API_URL_ENV, &raw)?;
        }
        Ok(config)
    }

    /// Set the WebSocket endpoint.
    pub fn with_server_url(mut self, url: Url) -> Self {
        self.server_url = url;
        self
    }

    /// Reconnect policy derived from this config.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.backoff_cap)
    }
}

fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
        var,
        value: raw.to_string(),
        source,
    })
}

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// `min(base * 2^attempt, cap)`, saturating for absurd attempt counts.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}
