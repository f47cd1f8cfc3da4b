use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::collab::{ArtifactRef, StorageRef};
use crate::error::{OrchestratorError, Result};

static TEAMS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https://teams\.microsoft\.com/\S+$").expect("valid teams url pattern")
});
static GMEET_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https://meet\.google\.com/\S+$").expect("valid meet url pattern")
});

/// Lifecycle of one session. `Ended` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Joining,
    InSession,
    Ending,
    Ended,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Joining => "joining",
            Self::InSession => "in_session",
            Self::Ending => "ending",
            Self::Ended => "ended",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Created, Joining) | (Joining, InSession) | (InSession, Ending) | (Ending, Ended) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Teams,
    Gmeet,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Teams => "teams",
            Self::Gmeet => "gmeet",
        }
    }

    /// Whether `meeting_ref` looks like a join link for this platform
    pub fn accepts(&self, meeting_ref: &str) -> bool {
        match self {
            Self::Teams => TEAMS_URL.is_match(meeting_ref),
            Self::Gmeet => GMEET_URL.is_match(meeting_ref),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    #[default]
    Guest,
}

/// Why a session left `in_session`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The join collaborator reported the meeting over
    HostEnded,
    /// Nobody but ourselves was present for the whole confirmation window
    EmptySession,
    Shutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostEnded => "host_ended",
            Self::EmptySession => "empty_session",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to attend one meeting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Caller's identifier for the meeting
    pub meeting_id: String,
    /// Join link
    pub meeting_ref: String,
    pub platform: Platform,
    #[serde(default)]
    pub preferred_slot: Option<String>,
}

impl JoinRequest {
    pub fn new(meeting_id: impl Into<String>, meeting_ref: impl Into<String>, platform: Platform) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            meeting_ref: meeting_ref.into(),
            platform,
            preferred_slot: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.meeting_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("meeting_id is empty".to_string()));
        }
        if !self.platform.accepts(self.meeting_ref.trim()) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "'{}' is not a {} meeting link",
                self.meeting_ref, self.platform
            )));
        }
        if matches!(&self.preferred_slot, Some(s) if s.trim().is_empty()) {
            return Err(OrchestratorError::InvalidRequest("preferred_slot is empty".to_string()));
        }
        Ok(())
    }
}

/// One attendee as of the latest tracking poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub display_name: String,
    pub original_name: String,
    /// This is the session's own automated presence
    pub is_self: bool,
    pub role: Role,
    pub speaking: bool,
    pub first_seen: DateTime<Utc>,
    /// None while still present
    pub last_seen: Option<DateTime<Utc>>,
}

/// One fixed-duration audio sample in the session ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunkRecord {
    pub sequence: u64,
    pub interval_start: DateTime<Utc>,
    pub interval_end: DateTime<Utc>,
    pub storage_ref: Option<StorageRef>,
    pub byte_size: usize,
    pub valid: bool,
}

impl AudioChunkRecord {
    pub fn duration(&self) -> Duration {
        self.interval_end - self.interval_start
    }
}

/// One meeting attendance attempt. Snapshots handed to callers are clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub meeting_id: String,
    pub meeting_ref: String,
    pub platform: Platform,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub in_session_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub slot: Option<String>,
    pub chunk_counter: u64,
    /// Keyed by normalized name
    pub participants: BTreeMap<String, ParticipantRecord>,
    pub chunks: Vec<AudioChunkRecord>,
    pub end_reason: Option<EndReason>,
    pub error: Option<String>,
    /// Artifact captured for the failure that decided the session's fate
    pub diagnostic: Option<ArtifactRef>,
    /// Every artifact captured during the session
    pub diagnostics: Vec<ArtifactRef>,
}

impl Session {
    pub fn new(request: &JoinRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            meeting_id: request.meeting_id.trim().to_string(),
            meeting_ref: request.meeting_ref.trim().to_string(),
            platform: request.platform,
            status: SessionStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            in_session_at: None,
            ended_at: None,
            slot: None,
            chunk_counter: 0,
            participants: BTreeMap::new(),
            chunks: Vec::new(),
            end_reason: None,
            error: None,
            diagnostic: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        match next {
            SessionStatus::Joining => self.started_at = Some(now),
            SessionStatus::InSession => self.in_session_at = Some(now),
            SessionStatus::Ended | SessionStatus::Failed => self.ended_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn valid_chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.valid).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JoinRequest {
        JoinRequest::new("standup", "https://meet.google.com/abc-defg-hij", Platform::Gmeet)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut session = Session::new(&request());
        for next in [
            SessionStatus::Joining,
            SessionStatus::InSession,
            SessionStatus::Ending,
            SessionStatus::Ended,
        ] {
            session.transition(next).unwrap();
        }
        assert_eq!(session.status, SessionStatus::Ended);
        assert!(session.started_at.is_some());
        assert!(session.in_session_at.is_some());
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut session = Session::new(&request());
        session.transition(SessionStatus::Failed).unwrap();
        assert!(session.transition(SessionStatus::Failed).is_err());
        assert!(session.transition(SessionStatus::Joining).is_err());
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut session = Session::new(&request());
        assert!(session.transition(SessionStatus::InSession).is_err());
        session.transition(SessionStatus::Joining).unwrap();
        assert!(session.transition(SessionStatus::Ended).is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SessionStatus::InSession).unwrap();
        assert_eq!(json, "\"in_session\"");
    }

    #[test]
    fn test_request_validation() {
        assert!(request().validate().is_ok());

        let wrong_platform =
            JoinRequest::new("standup", "https://meet.google.com/abc-defg-hij", Platform::Teams);
        assert!(matches!(
            wrong_platform.validate(),
            Err(OrchestratorError::InvalidRequest(_))
        ));

        let no_id = JoinRequest::new("  ", "https://meet.google.com/abc", Platform::Gmeet);
        assert!(no_id.validate().is_err());

        let teams = JoinRequest::new(
            "sync",
            "https://teams.microsoft.com/l/meetup-join/19%3ameeting",
            Platform::Teams,
        );
        assert!(teams.validate().is_ok());
    }
}
