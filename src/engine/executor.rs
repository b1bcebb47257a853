// src/engine/executor.rs

//! Per-slot job executor.
//!
//! An executor drives exactly one [`Job`] at a time through its task tree:
//!
//! ```text
//!            start_job                 Sent
//!   Idle ─────────────▶ TaskSet ─────────────▶ EventWait ──Done──▶ TaskSet (next task)
//!    ▲                     │  ▲                  │   │
//!    │                Busy │  └──timer (busy)────┘   │ Timeout / timer
//!    │                     ▼         RequestBusy     │ (same task, bounded)
//!    └────── finish_job ◀── fallback walk ◀── Failed / Aborted / exhausted
//! ```
//!
//! All methods are synchronous and return a [`JobProgress`]. A job handed
//! back as [`JobProgress::Finished`] has left the executor for good: the
//! executor is already Idle (and its timer stopped) when the caller sees it.

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::engine::job::{Advance, Job};
use crate::errors::{StartJobError, TimerError};
use crate::task::{EventStatus, RequestStatus};
use crate::transport::{ConfigClient, ConfigEvent, TimerId, TimerService};
use crate::types::{Destination, JobResult, RequestHandle, SlotId};

pub const DEFAULT_LOCAL_RETRY_MAX: u32 = 5;
pub const DEFAULT_COMMUNICATION_RETRY_MAX: u32 = 3;
pub const DEFAULT_BUSY_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry limits and timer durations shared by every executor of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Busy retries allowed per task.
    pub local_retry_max: u32,
    /// Timeout retries allowed per task.
    pub communication_retry_max: u32,
    pub busy_retry_interval: Duration,
    pub event_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            local_retry_max: DEFAULT_LOCAL_RETRY_MAX,
            communication_retry_max: DEFAULT_COMMUNICATION_RETRY_MAX,
            busy_retry_interval: DEFAULT_BUSY_RETRY_INTERVAL,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorState {
    #[default]
    Idle,
    /// A task was just selected; its request goes out in the same call.
    TaskSet,
    /// Request sent, waiting for its events. Event timeout armed.
    EventWait,
    /// Transport was busy. Retry timer armed.
    RequestBusy,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::TaskSet => "task set",
            ExecutorState::EventWait => "event wait",
            ExecutorState::RequestBusy => "request busy",
        };
        f.write_str(s)
    }
}

/// Snapshot of an executor for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStatus {
    pub slot: SlotId,
    pub state: ExecutorState,
    pub destination: Option<Destination>,
    pub local_retry_count: u32,
    pub communication_retry_count: u32,
}

/// What happened to the executor's job during a call.
#[derive(Debug)]
pub enum JobProgress {
    /// The executor has no job.
    Idle,
    /// The job is still in flight.
    Running,
    /// The job terminated and is handed back with its final result.
    Finished(Job),
}

impl JobProgress {
    pub fn into_finished(self) -> Option<Job> {
        match self {
            JobProgress::Finished(job) => Some(job),
            JobProgress::Idle | JobProgress::Running => None,
        }
    }
}

/// Collaborators an executor talks to while handling one call.
pub struct ExecutorContext<'a> {
    pub client: &'a mut dyn ConfigClient,
    pub timers: &'a mut dyn TimerService,
}

impl<'a> ExecutorContext<'a> {
    pub fn new(client: &'a mut dyn ConfigClient, timers: &'a mut dyn TimerService) -> Self {
        Self { client, timers }
    }
}

/// A job together with everything the executor tracks for it.
///
/// Only exists while the executor is not Idle, so a running timer or an
/// outstanding request always has a job attached.
#[derive(Debug)]
struct ActiveJob {
    job: Job,
    state: ExecutorState,
    handle: Option<RequestHandle>,
    local_retry_count: u32,
    communication_retry_count: u32,
    timer: Option<TimerId>,
}

impl ActiveJob {
    fn reset_retries(&mut self) {
        self.local_retry_count = 0;
        self.communication_retry_count = 0;
    }
}

/// Result of walking away from a failed task.
enum Flow {
    /// A fallback task is current; issue its request.
    Continue,
    Stop(JobProgress),
}

#[derive(Debug)]
pub struct Executor {
    slot: SlotId,
    settings: ExecutorSettings,
    timer_generation: u64,
    active: Option<ActiveJob>,
}

impl Executor {
    pub fn new(slot: SlotId, settings: ExecutorSettings) -> Self {
        Self {
            slot,
            settings,
            timer_generation: 0,
            active: None,
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn state(&self) -> ExecutorState {
        self.active
            .as_ref()
            .map_or(ExecutorState::Idle, |active| active.state)
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    /// Destination of the job being executed.
    pub fn destination(&self) -> Option<Destination> {
        self.active.as_ref().map(|active| active.job.destination())
    }

    pub fn job(&self) -> Option<&Job> {
        self.active.as_ref().map(|active| &active.job)
    }

    pub fn status(&self) -> ExecutorStatus {
        ExecutorStatus {
            slot: self.slot,
            state: self.state(),
            destination: self.destination(),
            local_retry_count: self.active.as_ref().map_or(0, |a| a.local_retry_count),
            communication_retry_count: self
                .active
                .as_ref()
                .map_or(0, |a| a.communication_retry_count),
        }
    }

    /// Take ownership of `job` and issue the request of its first task.
    ///
    /// The job is handed back inside the error if the executor is busy or the
    /// task tree is empty. `Ok(JobProgress::Finished(_))` means every task
    /// failed right away with no fallback left.
    pub fn start_job(
        &mut self,
        mut job: Job,
        ctx: &mut ExecutorContext<'_>,
    ) -> Result<JobProgress, StartJobError> {
        if self.active.is_some() {
            return Err(StartJobError::InvalidState {
                slot: self.slot,
                job: Box::new(job),
            });
        }

        match job.set_next_task(Advance::Start) {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => {
                return Err(StartJobError::NotFound { job: Box::new(job) });
            }
        }

        info!(
            slot = self.slot,
            job = %job.id(),
            dest = %job.destination(),
            tasks = job.tasks().len(),
            "job started"
        );

        self.active = Some(ActiveJob {
            job,
            state: ExecutorState::TaskSet,
            handle: None,
            local_retry_count: 0,
            communication_retry_count: 0,
            timer: None,
        });

        Ok(self.attempt_request(ctx))
    }

    /// Feed a protocol event. Only acted upon while waiting for events, and
    /// only if the event answers our outstanding request or is not tied to
    /// any request.
    pub fn on_event(&mut self, event: &ConfigEvent, ctx: &mut ExecutorContext<'_>) -> JobProgress {
        let slot = self.slot;
        let Some(active) = self.active.as_mut() else {
            return JobProgress::Idle;
        };
        if active.state != ExecutorState::EventWait {
            return JobProgress::Running;
        }
        if let Some(handle) = event.correlation() {
            if active.handle != Some(handle) {
                return JobProgress::Running;
            }
        }

        let dest = active.job.destination();
        let Some(task_id) = active.job.current_task() else {
            error!(slot, "waiting for events without a current task");
            return self.finish_job(ctx, JobResult::CriticalError);
        };
        let Some(task) = active.job.tasks_mut().task_mut(task_id) else {
            error!(slot, task = task_id.index(), "current task missing from tree");
            return self.finish_job(ctx, JobResult::CriticalError);
        };

        let status = task.handle_event(dest, event);
        debug!(slot, task = task_id.index(), ?status, "event handled");
        self.process_event_status(status, ctx)
    }

    /// React to the expiry of a timer armed by this executor.
    pub fn on_timer_elapsed(&mut self, timer: TimerId, ctx: &mut ExecutorContext<'_>) -> JobProgress {
        let slot = self.slot;
        let Some(active) = self.active.as_mut() else {
            debug!(slot, generation = timer.generation, "timer elapsed on idle executor; ignored");
            return JobProgress::Idle;
        };
        if active.timer != Some(timer) {
            debug!(slot, generation = timer.generation, "stale timer expiry ignored");
            return JobProgress::Running;
        }
        active.timer = None;

        match active.state {
            ExecutorState::RequestBusy => {
                debug!(slot, retry = active.local_retry_count, "busy retry timer elapsed");
                self.attempt_request(ctx)
            }
            ExecutorState::EventWait => {
                info!(
                    slot,
                    job = %active.job.id(),
                    dest = %active.job.destination(),
                    "no event before timeout"
                );
                self.process_event_status(EventStatus::Timeout, ctx)
            }
            state => {
                error!(slot, %state, "timer elapsed in a state that never arms one");
                JobProgress::Running
            }
        }
    }

    /// Drop the job without finishing it: stop the timer, cancel the
    /// outstanding request and hand the job back with its result untouched.
    pub fn abandon(&mut self, ctx: &mut ExecutorContext<'_>) -> Option<Job> {
        self.stop_timer(ctx);
        self.cancel_outstanding(ctx);
        let active = self.active.take()?;
        info!(slot = self.slot, job = %active.job.id(), "job abandoned");
        Some(active.job)
    }

    /// Issue the current task's request, walking fallbacks for as long as
    /// requests fail right away.
    fn attempt_request(&mut self, ctx: &mut ExecutorContext<'_>) -> JobProgress {
        loop {
            let slot = self.slot;
            let Some(active) = self.active.as_mut() else {
                return JobProgress::Idle;
            };
            let dest = active.job.destination();
            let Some(task_id) = active.job.current_task() else {
                error!(slot, "request attempt without a current task");
                return self.finish_job(ctx, JobResult::CriticalError);
            };
            let Some(task) = active.job.tasks_mut().task_mut(task_id) else {
                error!(slot, task = task_id.index(), "current task missing from tree");
                return self.finish_job(ctx, JobResult::CriticalError);
            };

            let status = task.send_request(&mut *ctx.client, dest);
            let task_name = task.describe();

            match status {
                RequestStatus::Sent(handle) => {
                    active.handle = Some(handle);
                    if active.local_retry_count > 0 || active.communication_retry_count > 0 {
                        info!(
                            slot,
                            job = %active.job.id(),
                            %dest,
                            task = %task_name,
                            %handle,
                            local_retry = active.local_retry_count,
                            communication_retry = active.communication_retry_count,
                            "request retried"
                        );
                    } else {
                        debug!(slot, %dest, task = %task_name, %handle, "request sent");
                    }
                    let timeout = self.settings.event_timeout;
                    self.enter(ctx, ExecutorState::EventWait);
                    if self.arm_timer(ctx, timeout).is_err() {
                        // Nothing would ever end the wait; count it as a lost answer.
                        self.cancel_outstanding(ctx);
                        return self.process_event_status(EventStatus::Timeout, ctx);
                    }
                    return JobProgress::Running;
                }
                RequestStatus::Busy if active.local_retry_count < self.settings.local_retry_max => {
                    active.local_retry_count += 1;
                    active.job.record_busy_retry();
                    debug!(
                        slot,
                        %dest,
                        task = %task_name,
                        retry = active.local_retry_count,
                        "transport busy; request retry scheduled"
                    );
                    let interval = self.settings.busy_retry_interval;
                    self.enter(ctx, ExecutorState::RequestBusy);
                    if self.arm_timer(ctx, interval).is_ok() {
                        return JobProgress::Running;
                    }
                    warn!(slot, %dest, "busy retry cannot be scheduled; task fails");
                }
                RequestStatus::Busy => {
                    warn!(slot, %dest, task = %task_name, "transport busy; local retries exhausted");
                }
                RequestStatus::Failed => {
                    warn!(slot, %dest, task = %task_name, "request rejected by transport");
                }
                RequestStatus::Aborted => {
                    warn!(slot, %dest, task = %task_name, "request aborted");
                }
            }

            match self.fail_current_task(ctx) {
                Flow::Continue => continue,
                Flow::Stop(progress) => return progress,
            }
        }
    }

    fn process_event_status(
        &mut self,
        status: EventStatus,
        ctx: &mut ExecutorContext<'_>,
    ) -> JobProgress {
        match status {
            EventStatus::Done => self.advance_after_success(ctx),
            EventStatus::InProgress => JobProgress::Running,
            EventStatus::Timeout => self.retry_after_timeout(ctx),
            EventStatus::Failed => {
                if let Some(active) = &self.active {
                    warn!(slot = self.slot, dest = %active.job.destination(), "task failed");
                }
                self.fail_and_continue(ctx)
            }
            EventStatus::Aborted => {
                self.cancel_outstanding(ctx);
                self.fail_and_continue(ctx)
            }
        }
    }

    fn advance_after_success(&mut self, ctx: &mut ExecutorContext<'_>) -> JobProgress {
        let slot = self.slot;
        let Some(active) = self.active.as_mut() else {
            return JobProgress::Idle;
        };
        active.handle = None;

        match active.job.set_next_task(Advance::Success) {
            Ok(Some(next)) => {
                active.reset_retries();
                debug!(slot, task = next.index(), "advancing to next task");
                self.enter(ctx, ExecutorState::TaskSet);
                self.attempt_request(ctx)
            }
            Ok(None) => {
                let result = active.job.completed_result();
                self.finish_job(ctx, result)
            }
            Err(e) => {
                error!(slot, error = %e, "cannot walk task tree");
                self.finish_job(ctx, JobResult::CriticalError)
            }
        }
    }

    fn retry_after_timeout(&mut self, ctx: &mut ExecutorContext<'_>) -> JobProgress {
        let slot = self.slot;
        let Some(active) = self.active.as_mut() else {
            return JobProgress::Idle;
        };

        if active.communication_retry_count < self.settings.communication_retry_max {
            active.communication_retry_count += 1;
            active.job.record_communication_retry();
            info!(
                slot,
                dest = %active.job.destination(),
                retry = active.communication_retry_count,
                "no answer; retrying request"
            );
            self.attempt_request(ctx)
        } else {
            warn!(
                slot,
                dest = %active.job.destination(),
                "no answer; communication retries exhausted"
            );
            self.fail_and_continue(ctx)
        }
    }

    fn fail_and_continue(&mut self, ctx: &mut ExecutorContext<'_>) -> JobProgress {
        match self.fail_current_task(ctx) {
            Flow::Continue => self.attempt_request(ctx),
            Flow::Stop(progress) => progress,
        }
    }

    /// Mark the current task failed and move to its fallback.
    fn fail_current_task(&mut self, ctx: &mut ExecutorContext<'_>) -> Flow {
        let slot = self.slot;
        let Some(active) = self.active.as_mut() else {
            return Flow::Stop(JobProgress::Idle);
        };
        active.handle = None;
        active.reset_retries();

        match active.job.set_next_task(Advance::Failure) {
            Ok(Some(next)) => {
                info!(slot, job = %active.job.id(), task = next.index(), "continuing with fallback task");
                self.enter(ctx, ExecutorState::TaskSet);
                Flow::Continue
            }
            Ok(None) => {
                let result = active.job.completed_result();
                Flow::Stop(self.finish_job(ctx, result))
            }
            Err(e) => {
                error!(slot, error = %e, "cannot walk task tree");
                Flow::Stop(self.finish_job(ctx, JobResult::CriticalError))
            }
        }
    }

    /// Switch state. Any running timer is stopped first.
    fn enter(&mut self, ctx: &mut ExecutorContext<'_>, state: ExecutorState) {
        self.stop_timer(ctx);

        let slot = self.slot;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.state != state {
            debug!(slot, from = %active.state, to = %state, "executor state change");
        }
        active.state = state;
    }

    /// Arm the single timer of this executor with a fresh generation.
    fn arm_timer(
        &mut self,
        ctx: &mut ExecutorContext<'_>,
        after: Duration,
    ) -> Result<(), TimerError> {
        let slot = self.slot;
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        self.timer_generation += 1;
        let timer = TimerId {
            slot,
            generation: self.timer_generation,
        };
        match ctx.timers.start_one_shot(timer, after) {
            Ok(()) => {
                active.timer = Some(timer);
                Ok(())
            }
            Err(e) => {
                error!(slot, state = %active.state, error = %e, "failed to arm timer");
                Err(e)
            }
        }
    }

    fn stop_timer(&mut self, ctx: &mut ExecutorContext<'_>) {
        let slot = self.slot;
        let Some(timer) = self.active.as_mut().and_then(|active| active.timer.take()) else {
            return;
        };
        match ctx.timers.stop(timer) {
            Ok(()) => {}
            Err(TimerError::NotRunning(_)) => {
                debug!(slot, generation = timer.generation, "timer already elapsed");
            }
            Err(e) => error!(slot, error = %e, "failed to stop timer"),
        }
    }

    fn cancel_outstanding(&mut self, ctx: &mut ExecutorContext<'_>) {
        let slot = self.slot;
        let Some(handle) = self.active.as_mut().and_then(|active| active.handle.take()) else {
            return;
        };
        match ctx.client.cancel_request(handle) {
            Ok(()) => debug!(slot, %handle, "outstanding request cancelled"),
            Err(e) => warn!(slot, %handle, error = %e, "failed to cancel outstanding request"),
        }
    }

    /// Go Idle first, then hand the job back with its verdict.
    fn finish_job(&mut self, ctx: &mut ExecutorContext<'_>, result: JobResult) -> JobProgress {
        self.stop_timer(ctx);
        let Some(active) = self.active.take() else {
            return JobProgress::Idle;
        };
        let mut job = active.job;
        job.finish(result);

        let retries = job.retry_stats();
        match job.result() {
            JobResult::Success => info!(
                slot = self.slot,
                job = %job.id(),
                dest = %job.destination(),
                busy_retries = retries.busy_retries,
                communication_retries = retries.communication_retries,
                "job finished"
            ),
            result => warn!(
                slot = self.slot,
                job = %job.id(),
                dest = %job.destination(),
                %result,
                "job finished"
            ),
        }

        JobProgress::Finished(job)
    }
}
