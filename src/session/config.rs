use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;

/// Per-session timing and limits, derived from [`Config`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Length of each audio chunk; the capture loop ticks at this rate
    pub audio_interval: Duration,

    /// Attendance poll cadence
    pub tracking_interval: Duration,

    /// End-condition check cadence
    pub watch_interval: Duration,

    /// Consecutive empty checks needed to confirm an empty session
    pub empty_confirmations: u32,

    /// Minimum span of those checks
    pub empty_window: Duration,

    /// Consecutive failed ticks before a loop asks for a diagnostic capture
    pub failure_escalation: u32,

    pub join_timeout: Duration,
    pub join_attempts: u32,
    pub join_retry_backoff: Duration,

    /// How long sub-loops get to stop before they are aborted
    pub drain_timeout: Duration,

    /// Shortest sample that still counts as valid audio
    pub min_chunk: Duration,
    pub validate_format: bool,
    pub placeholder_sample_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            audio_interval: Duration::from_secs(cfg.timing.audio_interval_secs),
            tracking_interval: Duration::from_secs(cfg.timing.tracking_interval_secs),
            watch_interval: Duration::from_secs(cfg.timing.watch_interval_secs),
            empty_confirmations: cfg.timing.empty_confirmations,
            empty_window: Duration::from_secs(cfg.timing.empty_window_secs),
            failure_escalation: cfg.timing.failure_escalation,
            join_timeout: Duration::from_secs(cfg.sessions.join_timeout_secs),
            join_attempts: cfg.sessions.join_attempts.max(1),
            join_retry_backoff: Duration::from_millis(cfg.sessions.join_retry_backoff_ms),
            drain_timeout: Duration::from_secs(cfg.sessions.drain_timeout_secs),
            min_chunk: Duration::from_secs_f64(cfg.audio.min_chunk_secs.max(0.0)),
            validate_format: cfg.audio.validate_format,
            placeholder_sample_rate: cfg.audio.placeholder_sample_rate.max(1),
        }
    }
}
