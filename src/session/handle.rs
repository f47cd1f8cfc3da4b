use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::info;

use super::model::{AudioChunkRecord, EndReason, Session, SessionStatus};
use crate::attendance::{reconcile, Attendee, PresenceReport};
use crate::collab::ArtifactRef;
use crate::error::Result;

/// Shared, synchronized access to one session's state. Sub-loops only
/// mutate the session through these accessors.
#[derive(Clone)]
pub struct SessionHandle {
    id: Arc<str>,
    inner: Arc<Mutex<Session>>,
    status_tx: Arc<watch::Sender<SessionStatus>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        let (status_tx, _) = watch::channel(session.status);
        Self {
            id: Arc::from(session.id.as_str()),
            inner: Arc::new(Mutex::new(session)),
            status_tx: Arc::new(status_tx),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest committed status, readable without taking the session lock
    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub async fn snapshot(&self) -> Session {
        self.inner.lock().await.clone()
    }

    pub async fn transition(&self, next: SessionStatus) -> Result<()> {
        let mut session = self.inner.lock().await;
        let from = session.status;
        session.transition(next)?;
        self.status_tx.send_replace(next);
        info!(session_id = %self.id, from = %from, to = %next, "Session transition");
        Ok(())
    }

    /// created -> joining, recording the leased slot
    pub async fn begin_joining(&self, slot: &str) -> Result<()> {
        let mut session = self.inner.lock().await;
        session.transition(SessionStatus::Joining)?;
        session.slot = Some(slot.to_string());
        self.status_tx.send_replace(SessionStatus::Joining);
        info!(session_id = %self.id, slot, "Session joining");
        Ok(())
    }

    /// in_session -> ending. Only the first request wins; later ones return false.
    pub async fn request_ending(&self, reason: EndReason) -> bool {
        let mut session = self.inner.lock().await;
        if session.status != SessionStatus::InSession {
            return false;
        }
        if session.transition(SessionStatus::Ending).is_err() {
            return false;
        }
        session.end_reason = Some(reason);
        self.status_tx.send_replace(SessionStatus::Ending);
        info!(session_id = %self.id, reason = %reason, "Session ending");
        true
    }

    /// Move to a terminal state. Falls back to `failed` when `status` is not
    /// reachable; a session that is already terminal is left alone.
    pub async fn finish(&self, status: SessionStatus) -> SessionStatus {
        let mut session = self.inner.lock().await;
        if session.status.is_terminal() {
            return session.status;
        }
        if session.transition(status).is_err() {
            let reason = format!("cannot finish as {} from {}", status, session.status);
            session.error.get_or_insert(reason);
            // Failed is reachable from every non-terminal state
            let _ = session.transition(SessionStatus::Failed);
        }
        let final_status = session.status;
        self.status_tx.send_replace(final_status);
        info!(session_id = %self.id, status = %final_status, "Session finished");
        final_status
    }

    pub async fn set_error(&self, error: impl Into<String>) {
        self.inner.lock().await.error = Some(error.into());
    }

    pub async fn attach_diagnostic(&self, artifact: ArtifactRef, primary: bool) {
        let mut session = self.inner.lock().await;
        if primary && session.diagnostic.is_none() {
            session.diagnostic = Some(artifact.clone());
        }
        session.diagnostics.push(artifact);
    }

    pub async fn in_session_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.in_session_at
    }

    /// Hand out the next chunk sequence number. Each number is issued once.
    pub async fn reserve_chunk_sequence(&self) -> u64 {
        let mut session = self.inner.lock().await;
        let seq = session.chunk_counter;
        session.chunk_counter += 1;
        seq
    }

    pub async fn append_chunk(&self, chunk: AudioChunkRecord) {
        let mut session = self.inner.lock().await;
        session.chunks.push(chunk);
        session.chunks.sort_by_key(|c| c.sequence);
    }

    pub async fn reconcile_participants(
        &self,
        attendees: &[Attendee],
        poll: u64,
        now: DateTime<Utc>,
    ) -> PresenceReport {
        let mut session = self.inner.lock().await;
        reconcile(&mut session.participants, attendees, poll, now)
    }
}
