//! Session lifecycle
//!
//! A session moves `created -> joining -> in_session -> ending -> ended`,
//! or to `failed` from any non-terminal state. While `in_session` three
//! sub-loops run against the shared state behind [`SessionHandle`]:
//! - audio capture at a fixed interval
//! - attendance tracking
//! - the termination watcher, which decides when the session ends

mod config;
pub(crate) mod context;
mod controller;
mod handle;
mod manager;
mod model;
mod watcher;

pub use config::SessionConfig;
pub use context::{LoopExit, LoopKind};
pub use handle::SessionHandle;
pub use manager::SessionManager;
pub use model::{
    AudioChunkRecord, EndReason, JoinRequest, ParticipantRecord, Platform, Role, Session,
    SessionStatus,
};
pub use watcher::EmptyDebounce;
