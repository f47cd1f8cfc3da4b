// Scripted collaborators shared by the integration tests.
//
// Every mock counts its calls so tests can assert on what the orchestrator
// asked for. Timing-sensitive tests run with tokio's paused clock.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use meeting_attendant::audio::silence_wav;
use meeting_attendant::config::Config;
use meeting_attendant::{
    ArtifactRef, AttendanceCollaborator, AttendeeObservation, AudioCollaborator, AudioSample,
    Collaborators, EventSink, JoinCollaborator, JoinOutcome, SessionEvent, SessionSummary,
    StorageCollaborator, StorageRef,
};
use meeting_attendant::session::AudioChunkRecord;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const MEET_URL: &str = "https://meet.google.com/abc-defg-hij";

pub fn meet_url(n: usize) -> String {
    format!("https://meet.google.com/room-{}", n)
}

/// Defaults with a sane test identity
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.identity.display_names = vec!["Meeting Bot".to_string()];
    cfg.identity.self_markers = vec!["(you)".to_string()];
    cfg
}

#[derive(Debug, Clone)]
pub enum JoinStep {
    Joined,
    Rejected(String),
    Error(String),
    /// Never answers
    Hang,
}

/// Join collaborator driven by a script of outcomes; joins succeed once the
/// script runs out.
#[derive(Default)]
pub struct MockJoin {
    script: Mutex<VecDeque<JoinStep>>,
    ended_all: AtomicBool,
    ended_slots: Mutex<HashSet<String>>,
    pub joins: AtomicUsize,
    pub leaves: AtomicUsize,
    pub end_checks: AtomicUsize,
    pub diagnostics: AtomicUsize,
}

impl MockJoin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(steps: Vec<JoinStep>) -> Arc<Self> {
        let mock = Self::default();
        *mock.script.lock().unwrap() = steps.into();
        Arc::new(mock)
    }

    /// Report every meeting as over
    pub fn end_all(&self) {
        self.ended_all.store(true, Ordering::SeqCst);
    }

    /// Report the meeting on `slot` as over
    pub fn end(&self, slot: &str) {
        self.ended_slots.lock().unwrap().insert(slot.to_string());
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn leaves(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    pub fn diagnostics(&self) -> usize {
        self.diagnostics.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl JoinCollaborator for MockJoin {
    async fn join(&self, slot: &str, _meeting_ref: &str) -> Result<JoinOutcome> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        self.ended_slots.lock().unwrap().remove(slot);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(JoinStep::Joined);
        match step {
            JoinStep::Joined => Ok(JoinOutcome::Joined),
            JoinStep::Rejected(reason) => Ok(JoinOutcome::Rejected(reason)),
            JoinStep::Error(msg) => Err(anyhow!(msg)),
            JoinStep::Hang => std::future::pending().await,
        }
    }

    async fn check_ended(&self, slot: &str) -> Result<bool> {
        self.end_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.ended_all.load(Ordering::SeqCst) || self.ended_slots.lock().unwrap().contains(slot))
    }

    async fn leave(&self, _slot: &str) -> Result<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn diagnostic_capture(&self, slot: &str) -> Result<ArtifactRef> {
        let n = self.diagnostics.fetch_add(1, Ordering::SeqCst);
        Ok(ArtifactRef(format!("{}-screenshot-{}.png", slot, n)))
    }
}

/// Attendance collaborator: scripted polls first, then the standing roster
pub struct MockAttendance {
    script: Mutex<VecDeque<Vec<AttendeeObservation>>>,
    roster: Mutex<Vec<AttendeeObservation>>,
    panic_on_poll: Option<usize>,
    pub polls: AtomicUsize,
}

impl MockAttendance {
    /// A human and ourselves, forever
    pub fn occupied() -> Arc<Self> {
        Self::build(vec![], vec![human("Alice"), bot()], None)
    }

    pub fn scripted(script: Vec<Vec<AttendeeObservation>>, roster: Vec<AttendeeObservation>) -> Arc<Self> {
        Self::build(script, roster, None)
    }

    /// Panics on the `n`th poll (1-based)
    pub fn panicking(n: usize) -> Arc<Self> {
        Self::build(vec![], vec![human("Alice"), bot()], Some(n))
    }

    fn build(
        script: Vec<Vec<AttendeeObservation>>,
        roster: Vec<AttendeeObservation>,
        panic_on_poll: Option<usize>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            roster: Mutex::new(roster),
            panic_on_poll,
            polls: AtomicUsize::new(0),
        })
    }

    pub fn set_roster(&self, roster: Vec<AttendeeObservation>) {
        *self.roster.lock().unwrap() = roster;
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AttendanceCollaborator for MockAttendance {
    async fn poll(&self, _slot: &str) -> Result<Vec<AttendeeObservation>> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_on_poll == Some(n) {
            panic!("attendance scraper crashed on poll {}", n);
        }
        if let Some(observations) = self.script.lock().unwrap().pop_front() {
            return Ok(observations);
        }
        Ok(self.roster.lock().unwrap().clone())
    }
}

pub fn human(name: &str) -> AttendeeObservation {
    AttendeeObservation::named(name)
}

pub fn bot() -> AttendeeObservation {
    AttendeeObservation {
        raw_name: "Meeting Bot (You)".to_string(),
        bot_hint: true,
        ..AttendeeObservation::default()
    }
}

/// Audio collaborator returning a silent WAV covering the requested interval
#[derive(Default)]
pub struct MockAudio {
    /// 1-based call numbers flagged invalid by the collaborator
    pub invalid_calls: HashSet<usize>,
    pub fail: bool,
    /// 1-based call number that never returns
    pub hang_on: Option<usize>,
    /// Mark the meeting over during this call (1-based)
    pub end_on: Option<(usize, Arc<MockJoin>)>,
    pub calls: AtomicUsize,
}

impl MockAudio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AudioCollaborator for MockAudio {
    async fn sample(
        &self,
        _slot: &str,
        interval_start: DateTime<Utc>,
        interval_end: DateTime<Utc>,
    ) -> Result<AudioSample> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, join)) = &self.end_on {
            if *at == n {
                join.end_all();
            }
        }
        if self.hang_on == Some(n) {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(anyhow!("audio device unavailable"));
        }

        let duration = (interval_end - interval_start).to_std()?;
        Ok(AudioSample {
            bytes: silence_wav(duration, 8000)?,
            valid: !self.invalid_calls.contains(&n),
        })
    }
}

/// Keeps everything in memory
#[derive(Default)]
pub struct MemoryStorage {
    pub chunks: Mutex<HashMap<String, Vec<(u64, usize)>>>,
    pub summaries: Mutex<HashMap<String, SessionSummary>>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn summary(&self, session_id: &str) -> Option<SessionSummary> {
        self.summaries.lock().unwrap().get(session_id).cloned()
    }

    pub fn chunk_count(&self, session_id: &str) -> usize {
        self.chunks
            .lock()
            .unwrap()
            .get(session_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl StorageCollaborator for MemoryStorage {
    async fn store_chunk(
        &self,
        session_id: &str,
        chunk: &AudioChunkRecord,
        bytes: &[u8],
    ) -> Result<StorageRef> {
        self.chunks
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push((chunk.sequence, bytes.len()));
        Ok(StorageRef(format!("mem://{}/{}", session_id, chunk.sequence)))
    }

    async fn store_summary(&self, session_id: &str, summary: &SessionSummary) -> Result<()> {
        self.summaries
            .lock()
            .unwrap()
            .insert(session_id.to_string(), summary.clone());
        Ok(())
    }
}

/// Records every published event
#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<SessionEvent>>,
    pub flushes: AtomicUsize,
}

impl RecordingEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn kinds_for(&self, session_id: &str) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.session_id() == session_id)
            .map(|e| e.kind())
            .collect()
    }
}

#[async_trait::async_trait]
impl EventSink for RecordingEvents {
    async fn publish(&self, event: &SessionEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The full set of mocks behind one manager
pub struct Harness {
    pub join: Arc<MockJoin>,
    pub attendance: Arc<MockAttendance>,
    pub audio: Arc<MockAudio>,
    pub storage: Arc<MemoryStorage>,
    pub events: Arc<RecordingEvents>,
}

impl Harness {
    pub fn new(join: Arc<MockJoin>, attendance: Arc<MockAttendance>, audio: Arc<MockAudio>) -> Self {
        Self {
            join,
            attendance,
            audio,
            storage: MemoryStorage::new(),
            events: RecordingEvents::new(),
        }
    }

    pub fn occupied() -> Self {
        Self::new(MockJoin::new(), MockAttendance::occupied(), MockAudio::new())
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            join: self.join.clone(),
            attendance: self.attendance.clone(),
            audio: self.audio.clone(),
            storage: self.storage.clone(),
        }
    }

    pub fn sink(&self) -> Arc<dyn EventSink> {
        self.events.clone()
    }
}
