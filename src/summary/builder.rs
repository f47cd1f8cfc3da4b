use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::attendance::IdentityPolicy;
use crate::collab::ArtifactRef;
use crate::error::{OrchestratorError, Result};
use crate::session::{EndReason, Platform, Role, Session, SessionStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub name: String,
    pub original_name: String,
    pub is_self: bool,
    pub role: Role,
    pub first_seen: DateTime<Utc>,
    /// Session end for anyone still present at the end
    pub last_seen: Option<DateTime<Utc>>,
    pub present_secs: Option<i64>,
}

/// Terminal record of one session. Never mutated after it is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub meeting_id: String,
    pub meeting_ref: String,
    pub platform: Platform,
    pub status: SessionStatus,
    pub end_reason: Option<EndReason>,
    pub error: Option<String>,
    pub diagnostic: Option<ArtifactRef>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: i64,
    /// Everyone seen, ourselves included and flagged
    pub participants: Vec<ParticipantSummary>,
    /// Names of everyone except ourselves
    pub real_participants: Vec<String>,
    pub real_participant_count: usize,
    pub total_chunks: usize,
    pub valid_chunk_count: usize,
    pub valid_audio_secs: f64,
}

/// Builds [`SessionSummary`] from terminal session state
#[derive(Debug, Clone)]
pub struct SummaryBuilder {
    policy: Arc<IdentityPolicy>,
}

impl SummaryBuilder {
    pub fn new(policy: Arc<IdentityPolicy>) -> Self {
        Self { policy }
    }

    /// Pure function of `session`; the same state always yields the same summary.
    pub fn build(&self, session: &Session) -> Result<SessionSummary> {
        if !session.status.is_terminal() {
            return Err(OrchestratorError::NotTerminal {
                session_id: session.id.clone(),
                status: session.status.to_string(),
            });
        }

        let participants: Vec<ParticipantSummary> = session
            .participants
            .values()
            .map(|record| {
                let last_seen = record.last_seen.or(session.ended_at);
                ParticipantSummary {
                    name: record.display_name.clone(),
                    original_name: record.original_name.clone(),
                    is_self: record.is_self
                        || self.policy.is_self(&record.original_name, &record.display_name, false),
                    role: record.role,
                    first_seen: record.first_seen,
                    last_seen,
                    present_secs: last_seen.map(|end| (end - record.first_seen).num_seconds().max(0)),
                }
            })
            .collect();

        let real_participants: Vec<String> = participants
            .iter()
            .filter(|p| !p.is_self)
            .map(|p| p.name.clone())
            .collect();

        let valid_ms: i64 = session
            .chunks
            .iter()
            .filter(|c| c.valid)
            .map(|c| c.duration().num_milliseconds())
            .sum();

        let duration_secs = match (session.started_at, session.ended_at) {
            (Some(start), Some(end)) => (end - start).num_seconds().max(0),
            _ => 0,
        };

        let summary = SessionSummary {
            session_id: session.id.clone(),
            meeting_id: session.meeting_id.clone(),
            meeting_ref: session.meeting_ref.clone(),
            platform: session.platform,
            status: session.status,
            end_reason: session.end_reason,
            error: session.error.clone(),
            diagnostic: session.diagnostic.clone(),
            created_at: session.created_at,
            started_at: session.started_at,
            ended_at: session.ended_at,
            duration_secs,
            real_participant_count: real_participants.len(),
            real_participants,
            participants,
            total_chunks: session.chunks.len(),
            valid_chunk_count: session.valid_chunk_count(),
            valid_audio_secs: valid_ms as f64 / 1000.0,
        };

        debug!(
            session_id = %summary.session_id,
            real_participants = summary.real_participant_count,
            valid_chunks = summary.valid_chunk_count,
            "Summary built"
        );

        Ok(summary)
    }
}
