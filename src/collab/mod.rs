//! Collaborator contracts consumed by the orchestrator
//!
//! Browser control, vendor UI parsing, audio capture and persistence live
//! behind these traits. Implementations return `anyhow::Result`; a returned
//! error is treated as transient unless the contract says otherwise.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::session::{AudioChunkRecord, Role};
use crate::summary::SessionSummary;

/// Reference to a diagnostic artifact (e.g. a screenshot) held by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef(pub String);

/// Where a stored chunk ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef(pub String);

/// Result of one join attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// Unrecoverable refusal (denied entry, invalid meeting). Not retried.
    Rejected(String),
}

/// One attendee as seen by a single attendance poll
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttendeeObservation {
    pub raw_name: String,
    /// Collaborator believes this entry is the session's own presence
    pub bot_hint: bool,
    pub role_hint: Option<Role>,
    pub speaking: bool,
}

impl AttendeeObservation {
    pub fn named(raw_name: impl Into<String>) -> Self {
        Self {
            raw_name: raw_name.into(),
            ..Self::default()
        }
    }
}

/// Audio returned for one interval
#[derive(Debug, Clone)]
pub struct AudioSample {
    pub bytes: Vec<u8>,
    pub valid: bool,
}

#[async_trait::async_trait]
pub trait JoinCollaborator: Send + Sync {
    async fn join(&self, slot: &str, meeting_ref: &str) -> Result<JoinOutcome>;

    /// Whether the remote side reports the meeting as over
    async fn check_ended(&self, slot: &str) -> Result<bool>;

    async fn leave(&self, slot: &str) -> Result<()>;

    async fn diagnostic_capture(&self, slot: &str) -> Result<ArtifactRef>;
}

#[async_trait::async_trait]
pub trait AttendanceCollaborator: Send + Sync {
    async fn poll(&self, slot: &str) -> Result<Vec<AttendeeObservation>>;
}

#[async_trait::async_trait]
pub trait AudioCollaborator: Send + Sync {
    async fn sample(
        &self,
        slot: &str,
        interval_start: DateTime<Utc>,
        interval_end: DateTime<Utc>,
    ) -> Result<AudioSample>;
}

#[async_trait::async_trait]
pub trait StorageCollaborator: Send + Sync {
    async fn store_chunk(
        &self,
        session_id: &str,
        chunk: &AudioChunkRecord,
        bytes: &[u8],
    ) -> Result<StorageRef>;

    async fn store_summary(&self, session_id: &str, summary: &SessionSummary) -> Result<()>;
}

/// The set of collaborators a session runs against
#[derive(Clone)]
pub struct Collaborators {
    pub join: Arc<dyn JoinCollaborator>,
    pub attendance: Arc<dyn AttendanceCollaborator>,
    pub audio: Arc<dyn AudioCollaborator>,
    pub storage: Arc<dyn StorageCollaborator>,
}
