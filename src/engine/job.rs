// src/engine/job.rs

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::TaskTreeError;
use crate::task::{TaskId, TaskState, TaskTree};
use crate::types::{Destination, JobResult};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a job, used in logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Retries spent on a job, by cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryStats {
    /// Requests re-issued because the transport was out of resources.
    pub busy_retries: u32,
    /// Requests re-issued because no answer arrived in time.
    pub communication_retries: u32,
}

impl RetryStats {
    pub fn any(&self) -> bool {
        self.busy_retries > 0 || self.communication_retries > 0
    }
}

/// Which successor to move to when the job advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Advance {
    /// Position the cursor on the root task.
    Start,
    /// The current task succeeded.
    Success,
    /// The current task failed for good; take its fallback.
    Failure,
}

/// A tree of configuration tasks for one destination.
///
/// The cursor and the result are only ever touched by the executor running
/// the job. The result stays [`JobResult::Unknown`] until the job terminates
/// and is never changed afterwards.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    label: Option<String>,
    destination: Destination,
    tasks: TaskTree,
    current: Option<TaskId>,
    result: JobResult,
    /// Set once any task failed, even if later tasks still run.
    downgraded: bool,
    retries: RetryStats,
}

impl Job {
    pub fn new(destination: Destination, tasks: TaskTree) -> Self {
        Self {
            id: JobId::next(),
            label: None,
            destination,
            tasks,
            current: None,
            result: JobResult::Unknown,
            downgraded: false,
            retries: RetryStats::default(),
        }
    }

    /// Attach a human readable name shown in logs and reports.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn tasks(&self) -> &TaskTree {
        &self.tasks
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut TaskTree {
        &mut self.tasks
    }

    /// Task the job is currently positioned on, if it is running.
    pub fn current_task(&self) -> Option<TaskId> {
        self.current
    }

    pub fn result(&self) -> JobResult {
        self.result
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_terminal()
    }

    /// True once some task of the job failed for good.
    pub fn has_failed_task(&self) -> bool {
        self.downgraded
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retries
    }

    pub(crate) fn record_busy_retry(&mut self) {
        self.retries.busy_retries += 1;
    }

    pub(crate) fn record_communication_retry(&mut self) {
        self.retries.communication_retries += 1;
    }

    /// Move the cursor. Returns the new current task, `None` when the walk
    /// ended.
    pub(crate) fn set_next_task(
        &mut self,
        advance: Advance,
    ) -> Result<Option<TaskId>, TaskTreeError> {
        let next = match (advance, self.current) {
            (Advance::Start, _) => self.tasks.root(),
            (Advance::Success, Some(id)) => {
                self.tasks.set_state(id, TaskState::Succeeded);
                self.tasks.next_on_success(id)?
            }
            (Advance::Failure, Some(id)) => {
                self.tasks.set_state(id, TaskState::Failed);
                self.downgraded = true;
                self.tasks.next_on_failure(id)?
            }
            (_, None) => None,
        };
        if let Some(id) = next {
            self.tasks.set_state(id, TaskState::Active);
        }
        self.current = next;
        Ok(next)
    }

    /// Record the terminal verdict. A job that already terminated keeps its
    /// first verdict.
    pub(crate) fn finish(&mut self, result: JobResult) {
        self.current = None;
        if !self.result.is_terminal() {
            self.result = result;
        }
    }

    /// Verdict for a walk that ended without structural problems.
    pub(crate) fn completed_result(&self) -> JobResult {
        if self.downgraded {
            JobResult::Fail
        } else {
            JobResult::Success
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "job {} '{}' ({})", self.id, label, self.destination),
            None => write!(f, "job {} ({})", self.id, self.destination),
        }
    }
}
