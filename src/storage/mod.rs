//! Persistence for audio chunks and session summaries

mod local;

pub use local::LocalStorage;
