//! The control-plane executor.
//!
//! [`Executor`] polls the control stream through the consumer group, drives
//! the control-plane nodes of each claimed graph wave by wave, and resolves
//! the job as completed, failed, or handed off to the worker plane. It keeps
//! no state across passes; everything lives in the job transport.

mod config;
mod executor;
mod pass;
mod updates;

pub use config::{
    DEFAULT_MAX_PASSES, DEFAULT_POLL_INTERVAL, ExecutorConfig, ExecutorConfigBuilder,
};
pub use executor::Executor;
pub use pass::PassOutcome;
