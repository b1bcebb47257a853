// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::engine::Job;
use crate::task::TaskId;
use crate::transport::TimerId;
use crate::types::SlotId;

#[derive(Error, Debug)]
pub enum MeshconfError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cycle detected in task tree: {0}")]
    TaskCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    TaskTree(#[from] TaskTreeError),
}

/// Errors raised while linking or walking a task tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskTreeError {
    #[error("task {0:?} does not exist in this tree")]
    UnknownTask(TaskId),

    #[error("task {0:?} cannot be its own successor")]
    SelfLink(TaskId),

    #[error("task tree contains a cycle through {0:?}")]
    Cycle(TaskId),
}

/// Rejection of a configuration request by the local transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Lower layers are temporarily out of resources; worth retrying later.
    #[error("no more resources for the request")]
    NoMoreResources,

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("no outstanding request with this handle")]
    UnknownHandle,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer {0:?} is not running")]
    NotRunning(TimerId),

    #[error("timer service unavailable: {0}")]
    Unavailable(String),
}

/// Why an executor refused a job. The job is handed back untouched.
#[derive(Error, Debug)]
pub enum StartJobError {
    #[error("executor {slot} is not idle")]
    InvalidState { slot: SlotId, job: Box<Job> },

    #[error("{job} has no task to start with")]
    NotFound { job: Box<Job> },
}

impl StartJobError {
    pub fn into_job(self) -> Job {
        match self {
            StartJobError::InvalidState { job, .. } | StartJobError::NotFound { job } => *job,
        }
    }
}

/// Why the distributor refused a job. The job is handed back untouched.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("{job} has no task tree")]
    NullReference { job: Box<Job> },

    #[error("{job} rejected: {reason}")]
    InvalidArgument { job: Box<Job>, reason: String },
}

impl SubmitError {
    pub fn into_job(self) -> Job {
        match self {
            SubmitError::NullReference { job } | SubmitError::InvalidArgument { job, .. } => *job,
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            SubmitError::NullReference { job } | SubmitError::InvalidArgument { job, .. } => job,
        }
    }
}

/// Result type used by config loading and the runtime.
pub type Result<T> = std::result::Result<T, MeshconfError>;
