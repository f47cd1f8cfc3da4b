use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::context::{FailureStreak, LoopContext, LoopExit, LoopKind};
use super::model::EndReason;
use crate::attendance::PresenceReport;

/// Debounce for the "effectively empty" signal: it must hold for `required`
/// consecutive attendance polls that together span at least `window`.
#[derive(Debug, Clone)]
pub struct EmptyDebounce {
    required: u32,
    window: Duration,
    streak: u32,
    since: Option<Instant>,
    last_poll: Option<u64>,
    confirmed: bool,
}

impl EmptyDebounce {
    pub fn new(required: u32, window: Duration) -> Self {
        Self {
            required: required.max(1),
            window,
            streak: 0,
            since: None,
            last_poll: None,
            confirmed: false,
        }
    }

    /// Feed the outcome of attendance poll `poll`. A poll already seen is
    /// ignored, so a report re-read between polls counts once.
    pub fn observe_poll(&mut self, poll: u64, empty: bool, now: Instant) -> bool {
        if self.last_poll == Some(poll) {
            return false;
        }
        self.last_poll = Some(poll);
        self.observe(empty, now)
    }

    /// Feed one check. Returns true exactly once, on the confirming check.
    pub fn observe(&mut self, empty: bool, now: Instant) -> bool {
        if self.confirmed {
            return false;
        }
        if !empty {
            self.streak = 0;
            self.since = None;
            return false;
        }

        self.streak += 1;
        let since = *self.since.get_or_insert(now);
        if self.streak >= self.required && now.duration_since(since) >= self.window {
            self.confirmed = true;
            return true;
        }
        false
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}

/// Check both end conditions every `watch_interval`: an explicit end signal
/// from the join collaborator, and a debounced empty session. Requests the
/// `in_session -> ending` transition once, then exits.
pub(crate) async fn run_termination_watcher(
    ctx: LoopContext,
    presence: watch::Receiver<Option<PresenceReport>>,
) -> LoopExit {
    let period = ctx.config.watch_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut debounce = EmptyDebounce::new(ctx.config.empty_confirmations, ctx.config.empty_window);
    let mut failures = FailureStreak::new(ctx.config.failure_escalation);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return LoopExit::Stopped(LoopKind::Watcher),
            _ = ticker.tick() => {}
        }

        let mut reason = match ctx.collaborators.join.check_ended(&ctx.slot).await {
            Ok(true) => Some(EndReason::HostEnded),
            Ok(false) => {
                failures.succeeded();
                None
            }
            Err(e) => {
                warn!(session_id = ctx.session.id(), error = %e, "End check failed");
                if failures.failed() {
                    ctx.escalate(LoopKind::Watcher).await;
                }
                None
            }
        };

        // No report yet counts as not empty
        let latest = presence
            .borrow()
            .as_ref()
            .map(|report| (report.poll, report.empty));
        if let (None, Some((poll, empty))) = (reason, latest) {
            if debounce.observe_poll(poll, empty, Instant::now()) {
                reason = Some(EndReason::EmptySession);
            } else if empty {
                debug!(
                    session_id = ctx.session.id(),
                    streak = debounce.streak(),
                    "Session looks empty, waiting for confirmation"
                );
            }
        }

        if let Some(reason) = reason {
            if ctx.session.request_ending(reason).await {
                info!(session_id = ctx.session.id(), reason = %reason, "End condition confirmed");
            }
            return LoopExit::EndRequested(reason);
        }
    }
}
