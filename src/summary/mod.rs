//! Terminal session summaries

mod builder;

pub use builder::{ParticipantSummary, SessionSummary, SummaryBuilder};
