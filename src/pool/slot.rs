use anyhow::Result as AnyResult;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::config::PoolConfig;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Free,
    Leased,
    /// Failed validation; excluded from acquisition until repaired or removed
    Broken,
}

/// One named, exclusive execution context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub state: SlotState,
    pub owner: Option<String>,
}

/// Counters and per-state totals for the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub free: usize,
    pub leased: usize,
    pub broken: usize,
    pub acquired: u64,
    pub released: u64,
}

/// External check that a slot is still usable (e.g. still signed in)
#[async_trait::async_trait]
pub trait SlotValidator: Send + Sync {
    async fn validate(&self, slot: &str) -> AnyResult<()>;
}

struct PoolInner {
    slots: Vec<Slot>,
    max_slots: usize,
    primary: String,
    acquired: u64,
    released: u64,
}

impl PoolInner {
    fn find(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    fn is_free(&self, name: &str) -> bool {
        self.find(name)
            .map(|i| self.slots[i].state == SlotState::Free)
            .unwrap_or(false)
    }

    fn can_grow(&self) -> bool {
        self.slots.len() < self.max_slots
    }

    fn next_generated_name(&self) -> String {
        let mut n = self.slots.len();
        loop {
            let candidate = format!("{}-{}", self.primary, n);
            if self.find(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    fn lease(&mut self, name: &str, session_id: &str) {
        let idx = match self.find(name) {
            Some(idx) => idx,
            None => {
                self.slots.push(Slot {
                    name: name.to_string(),
                    state: SlotState::Free,
                    owner: None,
                });
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[idx];
        slot.state = SlotState::Leased;
        slot.owner = Some(session_id.to_string());
        self.acquired += 1;
    }

    fn release(&mut self, name: &str, session_id: &str) {
        let Some(idx) = self.find(name) else {
            warn!(slot = name, session_id, "Released slot is no longer registered");
            self.released += 1;
            return;
        };
        let slot = &mut self.slots[idx];
        if slot.owner.as_deref() != Some(session_id) {
            warn!(slot = name, session_id, owner = ?slot.owner, "Release by non-owner ignored");
            return;
        }
        slot.owner = None;
        if slot.state == SlotState::Leased {
            slot.state = SlotState::Free;
        }
        self.released += 1;
    }
}

/// Fixed-ceiling registry of slots; every operation runs inside one critical section.
#[derive(Clone)]
pub struct SlotPool {
    inner: Arc<Mutex<PoolInner>>,
    validator: Option<Arc<dyn SlotValidator>>,
}

impl SlotPool {
    pub fn new(config: &PoolConfig) -> Self {
        let mut slots = Vec::new();
        let names = std::iter::once(&config.primary_slot).chain(config.slots.iter());
        for name in names {
            if slots.len() >= config.max_slots {
                break;
            }
            if slots.iter().any(|s: &Slot| &s.name == name) {
                continue;
            }
            slots.push(Slot {
                name: name.clone(),
                state: SlotState::Free,
                owner: None,
            });
        }

        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                slots,
                max_slots: config.max_slots,
                primary: config.primary_slot.clone(),
                acquired: 0,
                released: 0,
            })),
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn SlotValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lease a slot: the preferred one if free, else the primary, else any
    /// free slot, else a newly allocated one while under the ceiling.
    pub fn acquire(&self, session_id: &str, preferred: Option<&str>) -> Result<SlotLease> {
        let mut inner = self.lock();

        if let Some(held) = inner
            .slots
            .iter()
            .find(|s| s.owner.as_deref() == Some(session_id))
        {
            return Err(OrchestratorError::InvalidRequest(format!(
                "session {} already holds slot {}",
                session_id, held.name
            )));
        }

        let primary = inner.primary.clone();
        let chosen = match preferred {
            Some(name) if inner.is_free(name) => Some(name.to_string()),
            Some(name) if inner.find(name).is_none() && inner.can_grow() => Some(name.to_string()),
            _ => None,
        }
        .or_else(|| inner.is_free(&primary).then(|| primary.clone()))
        .or_else(|| (inner.find(&primary).is_none() && inner.can_grow()).then(|| primary.clone()))
        .or_else(|| {
            inner
                .slots
                .iter()
                .find(|s| s.state == SlotState::Free)
                .map(|s| s.name.clone())
        })
        .or_else(|| inner.can_grow().then(|| inner.next_generated_name()));

        let Some(name) = chosen else {
            let leased = inner.slots.iter().filter(|s| s.state != SlotState::Free).count();
            return Err(OrchestratorError::Exhausted {
                leased,
                max: inner.max_slots,
            });
        };

        inner.lease(&name, session_id);
        info!(slot = %name, session_id, "Slot acquired");

        Ok(SlotLease {
            pool: Arc::clone(&self.inner),
            name,
            session_id: session_id.to_string(),
            released: false,
        })
    }

    /// Ask the validator whether the leased slot is still usable. A failure
    /// marks the slot broken; it stays out of rotation after release.
    pub async fn validate(&self, lease: &SlotLease) -> Result<()> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };

        if let Err(e) = validator.validate(lease.name()).await {
            warn!(slot = lease.name(), error = %e, "Slot failed validation, marking broken");
            let mut inner = self.lock();
            if let Some(idx) = inner.find(lease.name()) {
                inner.slots[idx].state = SlotState::Broken;
            }
            return Err(OrchestratorError::ValidationFailed(format!(
                "slot {}: {:#}",
                lease.name(),
                e
            )));
        }
        Ok(())
    }

    /// Return a broken slot to service
    pub fn repair(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        let idx = inner
            .find(name)
            .ok_or_else(|| OrchestratorError::UnknownSlot(name.to_string()))?;
        let slot = &mut inner.slots[idx];
        if slot.state == SlotState::Broken {
            slot.state = if slot.owner.is_some() {
                SlotState::Leased
            } else {
                SlotState::Free
            };
            info!(slot = name, "Slot repaired");
        }
        Ok(())
    }

    /// Drop a slot that nobody holds
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        let idx = inner
            .find(name)
            .ok_or_else(|| OrchestratorError::UnknownSlot(name.to_string()))?;
        if let Some(owner) = &inner.slots[idx].owner {
            return Err(OrchestratorError::InvalidRequest(format!(
                "slot {} is held by session {}",
                name, owner
            )));
        }
        inner.slots.remove(idx);
        info!(slot = name, "Slot removed");
        Ok(())
    }

    pub fn slots(&self) -> Vec<Slot> {
        self.lock().slots.clone()
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        let count = |state: SlotState| inner.slots.iter().filter(|s| s.state == state).count();
        PoolStats {
            total: inner.slots.len(),
            free: count(SlotState::Free),
            leased: count(SlotState::Leased),
            broken: count(SlotState::Broken),
            acquired: inner.acquired,
            released: inner.released,
        }
    }
}

/// Exclusive hold on one slot. Released exactly once: explicitly via
/// [`SlotLease::release`], or on drop if that never happened.
pub struct SlotLease {
    pool: Arc<Mutex<PoolInner>>,
    name: String,
    session_id: String,
    released: bool,
}

impl SlotLease {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut inner = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        inner.release(&self.name, &self.session_id);
        info!(slot = %self.name, session_id = %self.session_id, "Slot released");
    }
}

impl std::fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotLease")
            .field("name", &self.name)
            .field("session_id", &self.session_id)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if !self.released {
            warn!(slot = %self.name, session_id = %self.session_id, "Slot lease dropped without release");
            self.release_inner();
        }
    }
}
