use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{EndReason, Platform, SessionStatus};
use crate::summary::SessionSummary;

/// Lifecycle events published for each session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionQueued {
        session_id: String,
        meeting_id: String,
        platform: Platform,
        timestamp: DateTime<Utc>,
    },
    SessionJoined {
        session_id: String,
        meeting_id: String,
        platform: Platform,
        slot: String,
        timestamp: DateTime<Utc>,
    },
    ParticipantsUpdated {
        session_id: String,
        poll: u64,
        present: usize,
        real_present: usize,
        timestamp: DateTime<Utc>,
    },
    ChunkRecorded {
        session_id: String,
        sequence: u64,
        valid: bool,
        byte_size: usize,
        timestamp: DateTime<Utc>,
    },
    SessionEnded {
        session_id: String,
        status: SessionStatus,
        reason: Option<EndReason>,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    MeetingSummary {
        session_id: String,
        summary: Box<SessionSummary>,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionQueued { .. } => "session_queued",
            Self::SessionJoined { .. } => "session_joined",
            Self::ParticipantsUpdated { .. } => "participants_updated",
            Self::ChunkRecorded { .. } => "chunk_recorded",
            Self::SessionEnded { .. } => "session_ended",
            Self::MeetingSummary { .. } => "meeting_summary",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionQueued { session_id, .. }
            | Self::SessionJoined { session_id, .. }
            | Self::ParticipantsUpdated { session_id, .. }
            | Self::ChunkRecorded { session_id, .. }
            | Self::SessionEnded { session_id, .. }
            | Self::MeetingSummary { session_id, .. } => session_id,
        }
    }
}
