use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::config::SessionConfig;
use super::handle::SessionHandle;
use super::model::EndReason;
use crate::attendance::IdentityPolicy;
use crate::collab::Collaborators;
use crate::events::{EventSink, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Capture,
    Tracking,
    Watcher,
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Capture => "capture",
            Self::Tracking => "tracking",
            Self::Watcher => "watcher",
        })
    }
}

/// How a sub-loop task finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Observed cancellation
    Stopped(LoopKind),
    /// The watcher confirmed an end condition
    EndRequested(EndReason),
}

/// Everything a sub-loop needs, cloned into each task
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub session: SessionHandle,
    pub slot: String,
    pub config: Arc<SessionConfig>,
    pub collaborators: Collaborators,
    pub events: Arc<dyn EventSink>,
    pub policy: Arc<IdentityPolicy>,
    pub cancel: CancellationToken,
}

impl LoopContext {
    pub async fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.publish(&event).await {
            warn!(session_id = self.session.id(), event = event.kind(), error = %e, "Failed to publish event");
        }
    }

    /// Ask for a diagnostic capture after repeated failures in `kind`
    pub async fn escalate(&self, kind: LoopKind) {
        match self.collaborators.join.diagnostic_capture(&self.slot).await {
            Ok(artifact) => {
                warn!(
                    session_id = self.session.id(),
                    loop_kind = %kind,
                    artifact = %artifact.0,
                    "Repeated sub-loop failures, diagnostic captured"
                );
                self.session.attach_diagnostic(artifact, false).await;
            }
            Err(e) => {
                warn!(session_id = self.session.id(), loop_kind = %kind, error = %e, "Diagnostic capture failed");
            }
        }
    }
}

/// Counts consecutive failed ticks; signals once per streak at the threshold
#[derive(Debug, Clone)]
pub(crate) struct FailureStreak {
    threshold: u32,
    count: u32,
}

impl FailureStreak {
    pub fn new(threshold: u32) -> Self {
        Self { threshold, count: 0 }
    }

    /// Record a failure; true exactly when the streak reaches the threshold
    pub fn failed(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.threshold > 0 && self.count == self.threshold
    }

    pub fn succeeded(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_streak_signals_once() {
        let mut streak = FailureStreak::new(3);
        assert!(!streak.failed());
        assert!(!streak.failed());
        assert!(streak.failed());
        assert!(!streak.failed());

        streak.succeeded();
        assert!(!streak.failed());
        assert!(!streak.failed());
        assert!(streak.failed());
    }

    #[test]
    fn test_zero_threshold_never_escalates() {
        let mut streak = FailureStreak::new(0);
        for _ in 0..10 {
            assert!(!streak.failed());
        }
    }
}
