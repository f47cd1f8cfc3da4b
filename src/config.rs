use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from an optional file and `ATTENDANT__*`
/// environment overrides. Every key has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub sessions: SessionsConfig,
    pub pool: PoolConfig,
    pub timing: TimingConfig,
    pub audio: AudioConfig,
    pub identity: IdentityConfig,
    pub storage: StorageConfig,
    pub nats: NatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "meeting-attendant".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Hard ceiling on sessions executing at once
    pub max_concurrent: usize,
    /// Waiting queue bound (0 = unbounded)
    pub max_queued: usize,
    /// Queue instead of rejecting when the slot pool is exhausted
    pub queue_on_exhausted: bool,
    pub join_timeout_secs: u64,
    pub join_attempts: u32,
    pub join_retry_backoff_ms: u64,
    pub drain_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_queued: 0,
            queue_on_exhausted: false,
            join_timeout_secs: 30,
            join_attempts: 3,
            join_retry_backoff_ms: 2000,
            drain_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_slots: usize,
    /// Slot preferred when the caller names none
    pub primary_slot: String,
    /// Slots registered up front, in addition to the primary
    pub slots: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_slots: 5,
            primary_slot: "main".to_string(),
            slots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub audio_interval_secs: u64,
    pub tracking_interval_secs: u64,
    pub watch_interval_secs: u64,
    /// Consecutive "empty" watcher checks required before ending
    pub empty_confirmations: u32,
    /// Minimum span those checks must cover
    pub empty_window_secs: u64,
    /// Consecutive failed ticks before a loop requests a diagnostic capture
    pub failure_escalation: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            audio_interval_secs: 30,
            tracking_interval_secs: 30,
            watch_interval_secs: 5,
            empty_confirmations: 3,
            empty_window_secs: 15,
            failure_escalation: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub min_chunk_secs: f64,
    pub validate_format: bool,
    pub placeholder_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            min_chunk_secs: 1.0,
            validate_format: true,
            placeholder_sample_rate: 16000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Names the session's own presence shows up under
    pub display_names: Vec<String>,
    /// Substrings in a raw observed name that mark the observer itself
    pub self_markers: Vec<String>,
    /// Observed names that are never attendees
    pub ignored_names: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            display_names: vec!["Meeting Bot".to_string()],
            self_markers: vec!["(you)".to_string()],
            ignored_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: Option<String>,
    pub subject_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: None,
            subject_prefix: "meetings".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("ATTENDANT").separator("__"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sessions.max_concurrent == 0 {
            bail!("sessions.max_concurrent must be at least 1");
        }
        if self.sessions.join_attempts == 0 {
            bail!("sessions.join_attempts must be at least 1");
        }
        if self.pool.max_slots == 0 {
            bail!("pool.max_slots must be at least 1");
        }
        if self.pool.primary_slot.trim().is_empty() {
            bail!("pool.primary_slot must not be empty");
        }
        let t = &self.timing;
        if t.audio_interval_secs == 0 || t.tracking_interval_secs == 0 || t.watch_interval_secs == 0 {
            bail!("timing intervals must be non-zero");
        }
        if t.empty_confirmations == 0 {
            bail!("timing.empty_confirmations must be at least 1");
        }
        if self.audio.min_chunk_secs < 0.0 {
            bail!("audio.min_chunk_secs must not be negative");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.timing.audio_interval_secs, 30);
        assert_eq!(cfg.timing.watch_interval_secs, 5);
        assert_eq!(cfg.timing.empty_confirmations, 3);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = Config::load("/nonexistent/meeting-attendant").unwrap();
        assert_eq!(cfg.sessions.max_concurrent, 10);
        assert_eq!(cfg.pool.primary_slot, "main");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut cfg = Config::default();
        cfg.timing.watch_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
