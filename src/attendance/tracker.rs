use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::events::SessionEvent;
use crate::session::context::{FailureStreak, LoopContext, LoopExit, LoopKind};
use crate::session::{ParticipantRecord, Role};

/// A validated observation, ready to merge into participant history
#[derive(Debug, Clone, PartialEq)]
pub struct Attendee {
    pub key: String,
    pub display_name: String,
    pub original_name: String,
    pub is_self: bool,
    pub role: Option<Role>,
    pub speaking: bool,
}

/// What one attendance poll found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceReport {
    pub poll: u64,
    pub polled_at: DateTime<Utc>,
    /// Distinct identities currently present, ourselves included
    pub present: usize,
    /// Present identities that are not ourselves
    pub real_present: usize,
    /// No one but ourselves is present
    pub empty: bool,
}

/// Merge one poll into the participant history.
///
/// New identities open with `first_seen = now`; identities missing from the
/// poll close with `last_seen = now` (once); identities still present reopen
/// and get their speaking and role flags refreshed.
pub fn reconcile(
    history: &mut BTreeMap<String, ParticipantRecord>,
    attendees: &[Attendee],
    poll: u64,
    now: DateTime<Utc>,
) -> PresenceReport {
    let mut present = HashSet::new();

    for attendee in attendees {
        present.insert(attendee.key.as_str());
        history
            .entry(attendee.key.clone())
            .and_modify(|record| {
                record.last_seen = None;
                record.speaking = attendee.speaking;
                record.is_self |= attendee.is_self;
                record.original_name = attendee.original_name.clone();
                if let Some(role) = attendee.role {
                    record.role = role;
                }
            })
            .or_insert_with(|| ParticipantRecord {
                display_name: attendee.display_name.clone(),
                original_name: attendee.original_name.clone(),
                is_self: attendee.is_self,
                role: attendee.role.unwrap_or_default(),
                speaking: attendee.speaking,
                first_seen: now,
                last_seen: None,
            });
    }

    for (key, record) in history.iter_mut() {
        if !present.contains(key.as_str()) && record.last_seen.is_none() {
            record.last_seen = Some(now);
            record.speaking = false;
        }
    }

    let real_present = present
        .iter()
        .filter(|key| history.get(**key).map(|r| !r.is_self).unwrap_or(false))
        .count();

    PresenceReport {
        poll,
        polled_at: now,
        present: present.len(),
        real_present,
        empty: real_present == 0,
    }
}

/// Poll attendance every `tracking_interval` and publish the latest presence
/// report for the termination watcher. Never ends the session itself.
pub(crate) async fn run_tracking_loop(
    ctx: LoopContext,
    presence: watch::Sender<Option<PresenceReport>>,
) -> LoopExit {
    let mut ticker = time::interval(ctx.config.tracking_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = FailureStreak::new(ctx.config.failure_escalation);
    let mut poll = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let observations = match ctx.collaborators.attendance.poll(&ctx.slot).await {
            Ok(observations) => {
                failures.succeeded();
                observations
            }
            Err(e) => {
                warn!(session_id = ctx.session.id(), error = %e, "Attendance poll failed");
                if failures.failed() {
                    ctx.escalate(LoopKind::Tracking).await;
                }
                continue;
            }
        };

        let attendees: Vec<Attendee> = observations
            .iter()
            .filter_map(|obs| match ctx.policy.attendee(obs) {
                Ok(attendee) => Some(attendee),
                Err(e) => {
                    debug!(session_id = ctx.session.id(), error = %e, "Skipping observation");
                    None
                }
            })
            .collect();

        poll += 1;
        let report = ctx
            .session
            .reconcile_participants(&attendees, poll, Utc::now())
            .await;

        debug!(
            session_id = ctx.session.id(),
            poll,
            present = report.present,
            real_present = report.real_present,
            "Attendance reconciled"
        );

        presence.send_replace(Some(report.clone()));
        ctx.emit(SessionEvent::ParticipantsUpdated {
            session_id: ctx.session.id().to_string(),
            poll,
            present: report.present,
            real_present: report.real_present,
            timestamp: report.polled_at,
        })
        .await;
    }

    LoopExit::Stopped(LoopKind::Tracking)
}
