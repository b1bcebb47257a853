// src/engine/mod.rs

//! Configuration job engine.
//!
//! This module ties together:
//! - [`job`]: a task tree bound to one destination, with its verdict
//! - [`executor`]: the per-slot state machine that walks one job at a time,
//!   with busy and timeout retries
//! - [`distributor`]: the wait queue and executor pool, enforcing one job per
//!   destination at a time
//! - [`runtime`]: the async shell that feeds protocol events, timer expiry
//!   and submissions into the distributor from a single channel
//!
//! Everything except [`runtime`] is synchronous and free of tokio types, so
//! it can be driven step by step from tests.

use crate::transport::{ConfigEvent, TimerId};

pub mod distributor;
pub mod executor;
pub mod job;
pub mod runtime;

/// Runtime options for the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once no job is running or queued and no
    /// event is waiting in the channel.
    pub exit_when_idle: bool,
}

/// Events flowing into the runtime from the mesh stack, timers and callers.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A protocol event delivered by the mesh stack.
    Mesh(ConfigEvent),
    /// A one-shot timer armed by an executor expired.
    TimerElapsed(TimerId),
    /// A job to queue.
    Submit(job::Job),
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub use distributor::{Distributor, DistributorSettings, ScheduleMode};
pub use executor::{
    Executor, ExecutorContext, ExecutorSettings, ExecutorState, ExecutorStatus, JobProgress,
};
pub use job::{Job, JobId, RetryStats};
pub use runtime::{Runtime, RuntimeReport};
