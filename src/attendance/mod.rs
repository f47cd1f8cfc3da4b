//! Attendance tracking
//!
//! - Name normalization and the self-identity policy
//! - Reconciling each poll into the participant history
//! - The periodic tracking loop feeding the termination watcher

mod identity;
mod tracker;

pub use identity::{name_key, IdentityPolicy};
pub use tracker::{reconcile, Attendee, PresenceReport};

pub(crate) use tracker::run_tracking_loop;
