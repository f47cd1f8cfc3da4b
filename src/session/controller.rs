use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::SessionConfig;
use super::context::{LoopContext, LoopExit};
use super::handle::SessionHandle;
use super::model::{EndReason, SessionStatus};
use super::watcher::run_termination_watcher;
use crate::attendance::{run_tracking_loop, IdentityPolicy};
use crate::audio::run_capture_loop;
use crate::collab::{Collaborators, JoinOutcome};
use crate::error::{OrchestratorError, Result};
use crate::events::{EventSink, SessionEvent};
use crate::pool::{SlotLease, SlotPool};
use crate::summary::{SessionSummary, SummaryBuilder};

/// Drives one session from `created` to a terminal state on a leased slot.
pub(crate) struct SessionController {
    pub session: SessionHandle,
    pub lease: Option<SlotLease>,
    pub pool: SlotPool,
    pub config: Arc<SessionConfig>,
    pub collaborators: Collaborators,
    pub events: Arc<dyn EventSink>,
    pub policy: Arc<IdentityPolicy>,
    /// Process-wide shutdown
    pub shutdown: CancellationToken,
}

impl SessionController {
    /// Run the session to completion. The slot is released before the
    /// summary is built, whatever the outcome.
    pub async fn run(mut self) -> Result<SessionSummary> {
        let outcome = self.attend().await;

        let status = match &outcome {
            Ok(()) => SessionStatus::Ended,
            Err(e) => {
                error!(session_id = self.session.id(), error = %e, "Session failed");
                self.session.set_error(e.to_string()).await;
                SessionStatus::Failed
            }
        };

        if let Some(lease) = self.lease.take() {
            lease.release();
        }

        conclude(
            &self.session,
            status,
            &self.policy,
            &self.collaborators,
            self.events.as_ref(),
        )
        .await
    }

    async fn attend(&self) -> Result<()> {
        let slot = match &self.lease {
            Some(lease) => lease.name().to_string(),
            None => return Err(OrchestratorError::InvalidRequest("no slot leased".to_string())),
        };

        self.session.begin_joining(&slot).await?;
        self.join(&slot).await?;
        self.session.transition(SessionStatus::InSession).await?;

        let snapshot = self.session.snapshot().await;
        self.emit(SessionEvent::SessionJoined {
            session_id: snapshot.id.clone(),
            meeting_id: snapshot.meeting_id.clone(),
            platform: snapshot.platform,
            slot: slot.clone(),
            timestamp: Utc::now(),
        })
        .await;

        let supervised = self.supervise_loops(&slot).await;

        if let Err(e) = self.collaborators.join.leave(&slot).await {
            warn!(session_id = self.session.id(), slot = %slot, error = %e, "Failed to leave meeting");
        }

        supervised
    }

    /// Validate the slot, then join with a per-attempt timeout. Rejections
    /// are final; errors and timeouts are retried after a backoff.
    async fn join(&self, slot: &str) -> Result<()> {
        let Some(lease) = &self.lease else {
            return Err(OrchestratorError::InvalidRequest("no slot leased".to_string()));
        };
        if let Err(e) = self.pool.validate(lease).await {
            self.capture_diagnostic(slot).await;
            return Err(OrchestratorError::JoinFailed(e.to_string()));
        }

        let meeting_ref = self.session.snapshot().await.meeting_ref;
        let attempts = self.config.join_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            info!(session_id = self.session.id(), slot, attempt, "Joining meeting");

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(OrchestratorError::JoinFailed(
                        "shutdown requested while joining".to_string(),
                    ));
                }
                result = timeout(
                    self.config.join_timeout,
                    self.collaborators.join.join(slot, &meeting_ref),
                ) => result,
            };

            match result {
                Ok(Ok(JoinOutcome::Joined)) => {
                    info!(session_id = self.session.id(), slot, attempt, "Joined meeting");
                    return Ok(());
                }
                Ok(Ok(JoinOutcome::Rejected(reason))) => {
                    self.capture_diagnostic(slot).await;
                    return Err(OrchestratorError::JoinFailed(format!("rejected: {}", reason)));
                }
                Ok(Err(e)) => {
                    warn!(session_id = self.session.id(), attempt, error = %e, "Join attempt failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(
                        session_id = self.session.id(),
                        attempt,
                        timeout_secs = self.config.join_timeout.as_secs(),
                        "Join attempt timed out"
                    );
                    last_error = format!("timed out after {}s", self.config.join_timeout.as_secs());
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        return Err(OrchestratorError::JoinFailed(
                            "shutdown requested while joining".to_string(),
                        ));
                    }
                    _ = time::sleep(self.config.join_retry_backoff) => {}
                }
            }
        }

        self.capture_diagnostic(slot).await;
        Err(OrchestratorError::JoinFailed(format!(
            "gave up after {} attempts: {}",
            attempts, last_error
        )))
    }

    /// Run the three sub-loops until one of them confirms an end condition,
    /// one of them fails, or shutdown is requested. Then cancel and drain.
    async fn supervise_loops(&self, slot: &str) -> Result<()> {
        let cancel = CancellationToken::new();
        let ctx = LoopContext {
            session: self.session.clone(),
            slot: slot.to_string(),
            config: self.config.clone(),
            collaborators: self.collaborators.clone(),
            events: self.events.clone(),
            policy: self.policy.clone(),
            cancel: cancel.clone(),
        };
        let (presence_tx, presence_rx) = watch::channel(None);

        let mut loops = JoinSet::new();
        loops.spawn(run_capture_loop(ctx.clone()));
        loops.spawn(run_tracking_loop(ctx.clone(), presence_tx));
        loops.spawn(run_termination_watcher(ctx, presence_rx));

        let mut outcome = Ok(());
        tokio::select! {
            joined = loops.join_next() => match joined {
                Some(Ok(LoopExit::EndRequested(reason))) => {
                    info!(session_id = self.session.id(), reason = %reason, "Ending session");
                }
                Some(Ok(LoopExit::Stopped(kind))) => {
                    error!(session_id = self.session.id(), loop_kind = %kind, "Sub-loop stopped on its own");
                    outcome = Err(OrchestratorError::LoopFailed(format!("{} loop stopped unexpectedly", kind)));
                }
                Some(Err(e)) => {
                    error!(session_id = self.session.id(), error = %e, "Sub-loop task failed");
                    let detail = if e.is_panic() { "task panicked" } else { "task cancelled" };
                    outcome = Err(OrchestratorError::LoopFailed(detail.to_string()));
                }
                None => {
                    outcome = Err(OrchestratorError::LoopFailed("no sub-loops running".to_string()));
                }
            },
            _ = self.shutdown.cancelled() => {
                self.session.request_ending(EndReason::Shutdown).await;
            }
        }

        if outcome.is_err() {
            self.capture_diagnostic(slot).await;
        }

        cancel.cancel();
        let drained = timeout(self.config.drain_timeout, async {
            while let Some(joined) = loops.join_next().await {
                match joined {
                    Ok(exit) => log_exit(self.session.id(), exit),
                    Err(e) => warn!(session_id = self.session.id(), error = %e, "Sub-loop task failed while draining"),
                }
            }
        })
        .await;

        if drained.is_err() {
            error!(
                session_id = self.session.id(),
                remaining = loops.len(),
                "Sub-loops did not stop in time, aborting"
            );
            loops.abort_all();
            while loops.join_next().await.is_some() {}
            if outcome.is_ok() {
                self.capture_diagnostic(slot).await;
            }
            return Err(OrchestratorError::DrainTimeout {
                secs: self.config.drain_timeout.as_secs(),
            });
        }

        outcome
    }

    async fn capture_diagnostic(&self, slot: &str) {
        match self.collaborators.join.diagnostic_capture(slot).await {
            Ok(artifact) => {
                info!(session_id = self.session.id(), artifact = %artifact.0, "Diagnostic captured");
                self.session.attach_diagnostic(artifact, true).await;
            }
            Err(e) => warn!(session_id = self.session.id(), error = %e, "Diagnostic capture failed"),
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.publish(&event).await {
            warn!(session_id = self.session.id(), event = event.kind(), error = %e, "Failed to publish event");
        }
    }
}

/// Move the session to its terminal state, build and store its summary,
/// then publish the closing events.
pub(crate) async fn conclude(
    session: &SessionHandle,
    status: SessionStatus,
    policy: &Arc<IdentityPolicy>,
    collaborators: &Collaborators,
    events: &dyn EventSink,
) -> Result<SessionSummary> {
    let final_status = session.finish(status).await;
    let snapshot = session.snapshot().await;
    let summary = SummaryBuilder::new(policy.clone()).build(&snapshot)?;

    if let Err(e) = collaborators
        .storage
        .store_summary(&summary.session_id, &summary)
        .await
    {
        warn!(session_id = session.id(), error = %e, "Failed to store summary");
    }

    let closing = [
        SessionEvent::SessionEnded {
            session_id: summary.session_id.clone(),
            status: final_status,
            reason: summary.end_reason,
            error: summary.error.clone(),
            timestamp: Utc::now(),
        },
        SessionEvent::MeetingSummary {
            session_id: summary.session_id.clone(),
            summary: Box::new(summary.clone()),
        },
    ];
    for event in &closing {
        if let Err(e) = events.publish(event).await {
            warn!(session_id = session.id(), event = event.kind(), error = %e, "Failed to publish event");
        }
    }

    info!(
        session_id = %summary.session_id,
        status = %final_status,
        duration_secs = summary.duration_secs,
        real_participants = summary.real_participant_count,
        valid_chunks = summary.valid_chunk_count,
        "Session complete"
    );

    Ok(summary)
}

fn log_exit(session_id: &str, exit: LoopExit) {
    match exit {
        LoopExit::Stopped(kind) => info!(session_id, loop_kind = %kind, "Sub-loop stopped"),
        LoopExit::EndRequested(reason) => info!(session_id, reason = %reason, "Watcher exited"),
    }
}
