//! Per-job update bus.
//!
//! Either plane reports status, progress and result changes by publishing to
//! a per-job channel. A persister subscribed to every channel writes the
//! values into the job state store, so neither plane needs write access to
//! the other's state.

mod update_bus;
mod update_channel;

pub use update_bus::UpdateBus;
pub use update_channel::{UpdateChannel, UpdateMessage};
