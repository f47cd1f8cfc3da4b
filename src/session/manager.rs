use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::controller::{conclude, SessionController};
use super::handle::SessionHandle;
use super::model::{JoinRequest, Session, SessionStatus};
use crate::attendance::IdentityPolicy;
use crate::collab::Collaborators;
use crate::config::{Config, SessionsConfig};
use crate::error::{OrchestratorError, Result};
use crate::events::{EventSink, SessionEvent};
use crate::pool::{SlotLease, SlotPool};
use crate::summary::SessionSummary;

struct Entry {
    handle: SessionHandle,
    meeting_ref: String,
    summary: Option<SessionSummary>,
    done: watch::Sender<bool>,
}

struct Queued {
    handle: SessionHandle,
    preferred_slot: Option<String>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, Entry>,
    /// Submission order, oldest first
    order: Vec<String>,
    queue: VecDeque<Queued>,
    running: usize,
    closed: bool,
}

impl Registry {
    fn live_for(&self, meeting_ref: &str) -> Option<&str> {
        self.sessions
            .iter()
            .find(|(_, e)| e.meeting_ref == meeting_ref && !e.handle.status().is_terminal())
            .map(|(id, _)| id.as_str())
    }
}

enum Dispatch {
    Launch(SessionHandle, SlotLease),
    Reject(SessionHandle, OrchestratorError),
}

struct ManagerInner {
    limits: SessionsConfig,
    config: Arc<SessionConfig>,
    pool: SlotPool,
    collaborators: Collaborators,
    events: Arc<dyn EventSink>,
    policy: Arc<IdentityPolicy>,
    registry: Mutex<Registry>,
    shutdown: CancellationToken,
}

/// Admission control and routing for sessions.
///
/// At most `sessions.max_concurrent` sessions execute at once; the rest wait
/// in a FIFO queue and start in arrival order as capacity frees up.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(
        config: &Config,
        pool: SlotPool,
        collaborators: Collaborators,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                limits: config.sessions.clone(),
                config: Arc::new(SessionConfig::from(config)),
                pool,
                collaborators,
                events,
                policy: Arc::new(IdentityPolicy::new(&config.identity)),
                registry: Mutex::new(Registry::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pool(&self) -> &SlotPool {
        &self.inner.pool
    }

    /// Accept a request and return its session id. The session starts right
    /// away when under the ceiling, otherwise it waits in the queue.
    pub async fn submit(&self, request: JoinRequest) -> Result<String> {
        request.validate()?;
        let session = Session::new(&request);
        let session_id = session.id.clone();
        let handle = SessionHandle::new(session);
        let meeting_ref = request.meeting_ref.trim().to_string();

        let lease = {
            let mut registry = self.registry();
            if registry.closed {
                return Err(OrchestratorError::InvalidRequest(
                    "manager is shutting down".to_string(),
                ));
            }
            if let Some(existing) = registry.live_for(&meeting_ref) {
                return Err(OrchestratorError::Duplicate {
                    session_id: existing.to_string(),
                });
            }

            let has_capacity =
                registry.running < self.inner.limits.max_concurrent && registry.queue.is_empty();
            let lease = if has_capacity {
                match self
                    .inner
                    .pool
                    .acquire(&session_id, request.preferred_slot.as_deref())
                {
                    Ok(lease) => Some(lease),
                    Err(OrchestratorError::Exhausted { .. })
                        if self.inner.limits.queue_on_exhausted =>
                    {
                        None
                    }
                    Err(e) => return Err(e),
                }
            } else {
                None
            };

            if lease.is_some() {
                registry.running += 1;
            } else {
                let max_queued = self.inner.limits.max_queued;
                if max_queued > 0 && registry.queue.len() >= max_queued {
                    return Err(OrchestratorError::QueueFull(max_queued));
                }
                registry.queue.push_back(Queued {
                    handle: handle.clone(),
                    preferred_slot: request.preferred_slot.clone(),
                });
            }

            let (done, _) = watch::channel(false);
            registry.sessions.insert(
                session_id.clone(),
                Entry {
                    handle: handle.clone(),
                    meeting_ref,
                    summary: None,
                    done,
                },
            );
            registry.order.push(session_id.clone());
            lease
        };

        match lease {
            Some(lease) => {
                info!(session_id = %session_id, slot = lease.name(), "Session admitted");
                self.launch(handle, lease);
            }
            None => {
                info!(session_id = %session_id, "Session queued");
                let event = SessionEvent::SessionQueued {
                    session_id: session_id.clone(),
                    meeting_id: request.meeting_id.trim().to_string(),
                    platform: request.platform,
                    timestamp: Utc::now(),
                };
                if let Err(e) = self.inner.events.publish(&event).await {
                    warn!(session_id = %session_id, error = %e, "Failed to publish event");
                }
            }
        }

        Ok(session_id)
    }

    /// Read-only copy of one session
    pub async fn status(&self, session_id: &str) -> Result<Session> {
        let handle = self.handle(session_id)?;
        Ok(handle.snapshot().await)
    }

    /// Every known session in submission order
    pub async fn list(&self) -> Vec<Session> {
        let handles: Vec<SessionHandle> = {
            let registry = self.registry();
            registry
                .order
                .iter()
                .filter_map(|id| registry.sessions.get(id))
                .map(|e| e.handle.clone())
                .collect()
        };

        join_all(handles.iter().map(|h| h.snapshot())).await
    }

    /// Sessions that have not reached a terminal state, queued ones included
    pub async fn list_active(&self) -> Vec<Session> {
        self.list()
            .await
            .into_iter()
            .filter(|s| !s.status.is_terminal())
            .collect()
    }

    /// Number of sessions currently executing
    pub fn running(&self) -> usize {
        self.registry().running
    }

    pub fn queued(&self) -> usize {
        self.registry().queue.len()
    }

    /// Resolve once the session is terminal and its summary is recorded
    pub async fn wait(&self, session_id: &str) -> Result<Session> {
        let (handle, done) = {
            let registry = self.registry();
            let entry = registry
                .sessions
                .get(session_id)
                .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;
            (entry.handle.clone(), entry.done.subscribe())
        };

        wait_done(done).await;
        Ok(handle.snapshot().await)
    }

    /// Summary of a finished session
    pub fn summary(&self, session_id: &str) -> Result<SessionSummary> {
        let registry = self.registry();
        let entry = registry
            .sessions
            .get(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;
        entry
            .summary
            .clone()
            .ok_or_else(|| OrchestratorError::NotTerminal {
                session_id: session_id.to_string(),
                status: entry.handle.status().to_string(),
            })
    }

    /// Stop accepting work, fail queued sessions, end every running session
    /// with reason `shutdown` and wait for all of them to finish.
    pub async fn shutdown(&self) {
        let (queued, pending) = {
            let mut registry = self.registry();
            registry.closed = true;
            let queued: Vec<SessionHandle> = registry.queue.drain(..).map(|q| q.handle).collect();
            let pending: Vec<watch::Receiver<bool>> =
                registry.sessions.values().map(|e| e.done.subscribe()).collect();
            (queued, pending)
        };

        info!(queued = queued.len(), "Shutting down session manager");

        for handle in queued {
            self.reject(
                handle,
                OrchestratorError::InvalidRequest("shut down before start".to_string()),
            )
            .await;
        }

        self.inner.shutdown.cancel();

        join_all(pending.into_iter().map(wait_done)).await;

        if let Err(e) = self.inner.events.flush().await {
            warn!(error = %e, "Failed to flush session events");
        }

        info!("Session manager stopped");
    }

    /// Return a broken slot to service and start queued sessions it can take
    pub async fn repair_slot(&self, name: &str) -> Result<()> {
        self.inner.pool.repair(name)?;
        info!(slot = name, "Slot repaired");
        self.dispatch_queued().await;
        Ok(())
    }

    /// Drop a finished session from the registry. Its stored summary is
    /// unaffected.
    pub fn forget(&self, session_id: &str) -> Result<()> {
        let mut registry = self.registry();
        let entry = registry
            .sessions
            .get(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;
        if !*entry.done.borrow() {
            return Err(OrchestratorError::NotTerminal {
                session_id: session_id.to_string(),
                status: entry.handle.status().to_string(),
            });
        }

        registry.sessions.remove(session_id);
        registry.order.retain(|id| id != session_id);
        debug!(session_id, "Session forgotten");
        Ok(())
    }

    fn handle(&self, session_id: &str) -> Result<SessionHandle> {
        self.registry()
            .sessions
            .get(session_id)
            .map(|e| e.handle.clone())
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))
    }

    /// Run the session's controller on its own task. A panic inside the
    /// controller fails the session; the manager keeps going.
    fn launch(&self, handle: SessionHandle, lease: SlotLease) {
        let controller = SessionController {
            session: handle.clone(),
            lease: Some(lease),
            pool: self.inner.pool.clone(),
            config: self.inner.config.clone(),
            collaborators: self.inner.collaborators.clone(),
            events: self.inner.events.clone(),
            policy: self.inner.policy.clone(),
            shutdown: self.inner.shutdown.clone(),
        };

        let task = tokio::spawn(controller.run());
        let manager = self.clone();

        tokio::spawn(async move {
            let summary = match task.await {
                Ok(Ok(summary)) => Some(summary),
                Ok(Err(e)) => {
                    error!(session_id = handle.id(), error = %e, "Failed to conclude session");
                    None
                }
                Err(e) => {
                    error!(session_id = handle.id(), error = %e, "Session controller panicked");
                    handle.set_error(format!("session controller failed: {}", e)).await;
                    manager.conclude_failed(&handle).await
                }
            };
            manager.finished(handle.id(), summary, true).await;
        });
    }

    async fn conclude_failed(&self, handle: &SessionHandle) -> Option<SessionSummary> {
        match conclude(
            handle,
            SessionStatus::Failed,
            &self.inner.policy,
            &self.inner.collaborators,
            self.inner.events.as_ref(),
        )
        .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(session_id = handle.id(), error = %e, "Failed to conclude session");
                None
            }
        }
    }

    /// Fail a session that never started
    async fn reject(&self, handle: SessionHandle, reason: OrchestratorError) {
        warn!(session_id = handle.id(), error = %reason, "Queued session failed");
        handle.set_error(reason.to_string()).await;
        let summary = self.conclude_failed(&handle).await;
        self.finished(handle.id(), summary, false).await;
    }

    async fn finished(&self, session_id: &str, summary: Option<SessionSummary>, was_running: bool) {
        {
            let mut registry = self.registry();
            if was_running {
                registry.running = registry.running.saturating_sub(1);
            }
            if let Some(entry) = registry.sessions.get_mut(session_id) {
                entry.summary = summary;
                entry.done.send_replace(true);
            }
        }
        self.dispatch_queued().await;
    }

    /// Start queued sessions in arrival order while capacity and slots allow
    async fn dispatch_queued(&self) {
        loop {
            let next = {
                let mut registry = self.registry();
                if registry.closed || registry.running >= self.inner.limits.max_concurrent {
                    return;
                }
                let Some(front) = registry.queue.front() else {
                    return;
                };
                match self
                    .inner
                    .pool
                    .acquire(front.handle.id(), front.preferred_slot.as_deref())
                {
                    Ok(lease) => {
                        let Some(queued) = registry.queue.pop_front() else {
                            return;
                        };
                        registry.running += 1;
                        Dispatch::Launch(queued.handle, lease)
                    }
                    // A running session will release its slot later
                    Err(OrchestratorError::Exhausted { .. })
                        if registry.running > 0 || self.inner.limits.queue_on_exhausted =>
                    {
                        return
                    }
                    Err(e) => {
                        let Some(queued) = registry.queue.pop_front() else {
                            return;
                        };
                        Dispatch::Reject(queued.handle, e)
                    }
                }
            };

            match next {
                Dispatch::Launch(handle, lease) => {
                    debug!(session_id = handle.id(), slot = lease.name(), "Dispatching queued session");
                    self.launch(handle, lease);
                }
                Dispatch::Reject(handle, e) => {
                    warn!(session_id = handle.id(), error = %e, "Queued session failed");
                    handle.set_error(e.to_string()).await;
                    let summary = self.conclude_failed(&handle).await;
                    let mut registry = self.registry();
                    if let Some(entry) = registry.sessions.get_mut(handle.id()) {
                        entry.summary = summary;
                        entry.done.send_replace(true);
                    }
                }
            }
        }
    }
}

async fn wait_done(mut done: watch::Receiver<bool>) {
    while !*done.borrow_and_update() {
        if done.changed().await.is_err() {
            break;
        }
    }
}
