//! Resource pool of exclusive execution contexts ("slots")

mod slot;

pub use slot::{PoolStats, Slot, SlotLease, SlotPool, SlotState, SlotValidator};
