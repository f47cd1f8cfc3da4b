pub mod attendance;
pub mod audio;
pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod pool;
pub mod session;
pub mod storage;
pub mod summary;

pub use collab::{
    ArtifactRef, AttendanceCollaborator, AttendeeObservation, AudioCollaborator, AudioSample,
    Collaborators, JoinCollaborator, JoinOutcome, StorageCollaborator, StorageRef,
};
pub use config::Config;
pub use error::{OrchestratorError, Result};
pub use events::{EventSink, LogEventSink, NatsEventSink, SessionEvent};
pub use pool::{PoolStats, SlotLease, SlotPool, SlotState, SlotValidator};
pub use session::{
    EndReason, JoinRequest, Platform, Session, SessionConfig, SessionManager, SessionStatus,
};
pub use storage::LocalStorage;
pub use summary::{ParticipantSummary, SessionSummary, SummaryBuilder};
