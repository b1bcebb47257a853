// src/engine/distributor.rs

//! Job distributor: a wait queue in front of a fixed pool of executors.
//!
//! Scheduling rules:
//! - jobs for the same destination never run at the same time and start in
//!   submission order;
//! - jobs for different destinations may overtake each other;
//! - a scheduling pass stops as soon as no executor is idle.
//!
//! Finished jobs are collected in an outbox and handed to the caller through
//! [`Distributor::drain_finished`]. Every submitted job shows up there
//! exactly once.

use std::collections::VecDeque;
use std::mem;

use tracing::{debug, error, info, warn};

use crate::engine::executor::{
    Executor, ExecutorContext, ExecutorSettings, ExecutorStatus, JobProgress,
};
use crate::engine::job::Job;
use crate::errors::SubmitError;
use crate::transport::{ConfigClient, ConfigEvent, TimerId, TimerService};
use crate::types::JobResult;

pub const DEFAULT_EXECUTOR_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributorSettings {
    /// Size of the executor pool. At least one executor is always created.
    pub executor_count: usize,
    pub executor: ExecutorSettings,
}

impl Default for DistributorSettings {
    fn default() -> Self {
        Self {
            executor_count: DEFAULT_EXECUTOR_COUNT,
            executor: ExecutorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Run a scheduling pass right away.
    Normal,
    /// Only remember that a pass is needed; [`Distributor::step`] runs it.
    Deferred,
}

#[derive(Debug)]
pub struct Distributor<C: ConfigClient, T: TimerService> {
    executors: Vec<Executor>,
    wait_queue: VecDeque<Job>,
    deferred_schedule_pending: bool,
    finished: Vec<Job>,
    client: C,
    timers: T,
}

impl<C: ConfigClient, T: TimerService> Distributor<C, T> {
    pub fn new(client: C, timers: T, settings: DistributorSettings) -> Self {
        let executors = (0..settings.executor_count.max(1))
            .map(|slot| Executor::new(slot, settings.executor))
            .collect();
        Self {
            executors,
            wait_queue: VecDeque::new(),
            deferred_schedule_pending: false,
            finished: Vec::new(),
            client,
            timers,
        }
    }

    /// Queue a job. Scheduling is deferred to the next [`step`](Self::step).
    ///
    /// Rejected jobs are handed back inside the error.
    pub fn submit_job(&mut self, job: Job) -> Result<(), SubmitError> {
        if job.tasks().is_empty() {
            return Err(SubmitError::NullReference { job: Box::new(job) });
        }
        if job.result().is_terminal() {
            let reason = format!("already finished with result {}", job.result());
            return Err(SubmitError::InvalidArgument {
                job: Box::new(job),
                reason,
            });
        }
        if let Err(e) = job.tasks().validate() {
            return Err(SubmitError::InvalidArgument {
                job: Box::new(job),
                reason: e.to_string(),
            });
        }

        debug!(job = %job.id(), dest = %job.destination(), queued = self.wait_queue.len() + 1, "job queued");
        self.wait_queue.push_back(job);
        self.schedule(ScheduleMode::Deferred);
        Ok(())
    }

    pub fn schedule(&mut self, mode: ScheduleMode) {
        match mode {
            ScheduleMode::Deferred => self.deferred_schedule_pending = true,
            ScheduleMode::Normal => self.scheduling_pass(),
        }
    }

    /// Run the deferred scheduling pass, if one was requested.
    ///
    /// Returns whether a pass ran. Meant to be called once per iteration of
    /// the host loop.
    pub fn step(&mut self) -> bool {
        if !self.deferred_schedule_pending {
            return false;
        }
        self.deferred_schedule_pending = false;
        self.scheduling_pass();
        true
    }

    /// Forward a protocol event to every executor.
    pub fn on_event(&mut self, event: &ConfigEvent) {
        let mut ctx = ExecutorContext::new(&mut self.client, &mut self.timers);
        let mut any_finished = false;
        for executor in &mut self.executors {
            if let JobProgress::Finished(job) = executor.on_event(event, &mut ctx) {
                self.finished.push(job);
                any_finished = true;
            }
        }
        if any_finished {
            self.scheduling_pass();
        }
    }

    /// Route a timer expiry to the executor that armed it.
    pub fn on_timer_elapsed(&mut self, timer: TimerId) {
        let Some(executor) = self.executors.get_mut(timer.slot) else {
            error!(slot = timer.slot, "timer elapsed for an unknown executor slot");
            return;
        };
        let mut ctx = ExecutorContext::new(&mut self.client, &mut self.timers);
        if let JobProgress::Finished(job) = executor.on_timer_elapsed(timer, &mut ctx) {
            self.finished.push(job);
            self.scheduling_pass();
        }
    }

    /// Take every job that terminated since the last call.
    pub fn drain_finished(&mut self) -> Vec<Job> {
        mem::take(&mut self.finished)
    }

    pub fn executors(&self) -> &[Executor] {
        &self.executors
    }

    pub fn executor_statuses(&self) -> Vec<ExecutorStatus> {
        self.executors.iter().map(Executor::status).collect()
    }

    pub fn queued_len(&self) -> usize {
        self.wait_queue.len()
    }

    pub fn queued_jobs(&self) -> impl Iterator<Item = &Job> + '_ {
        self.wait_queue.iter()
    }

    /// Number of executors currently running a job.
    pub fn active_len(&self) -> usize {
        self.executors.iter().filter(|e| !e.is_idle()).count()
    }

    /// Nothing running and nothing waiting.
    pub fn is_idle(&self) -> bool {
        self.wait_queue.is_empty() && self.executors.iter().all(Executor::is_idle)
    }

    pub fn has_pending_schedule(&self) -> bool {
        self.deferred_schedule_pending
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    /// Drive every executor to Idle and return all jobs that did not finish,
    /// running ones first, then the queued ones in queue order.
    ///
    /// Jobs that already finished stay available through
    /// [`drain_finished`](Self::drain_finished).
    pub fn shutdown(&mut self) -> Vec<Job> {
        let mut ctx = ExecutorContext::new(&mut self.client, &mut self.timers);
        let mut unfinished: Vec<Job> = self
            .executors
            .iter_mut()
            .filter_map(|executor| executor.abandon(&mut ctx))
            .collect();
        unfinished.extend(self.wait_queue.drain(..));
        self.deferred_schedule_pending = false;
        unfinished
    }

    /// One pass over the wait queue, head to tail.
    fn scheduling_pass(&mut self) {
        if self.wait_queue.is_empty() {
            return;
        }

        let mut pending = mem::take(&mut self.wait_queue).into_iter();
        let mut waiting = VecDeque::new();
        let mut started = 0usize;

        while let Some(job) = pending.next() {
            let dest = job.destination();
            let mut idle_slot = None;
            let mut conflict = false;
            for executor in &self.executors {
                if executor.is_idle() {
                    idle_slot.get_or_insert(executor.slot());
                } else if executor.destination() == Some(dest) {
                    conflict = true;
                }
            }

            if conflict {
                debug!(job = %job.id(), %dest, "destination busy; job stays queued");
                waiting.push_back(job);
                continue;
            }

            let Some(slot) = idle_slot else {
                waiting.push_back(job);
                waiting.extend(pending.by_ref());
                break;
            };

            let job_id = job.id();
            let mut ctx = ExecutorContext::new(&mut self.client, &mut self.timers);
            match self.executors[slot].start_job(job, &mut ctx) {
                Ok(JobProgress::Running) => started += 1,
                Ok(JobProgress::Finished(job)) => {
                    warn!(job = %job_id, slot, result = %job.result(), "job finished while starting");
                    self.finished.push(job);
                }
                Ok(JobProgress::Idle) => {}
                Err(e) => {
                    error!(job = %job_id, slot, error = %e, "executor could not start job");
                    let mut job = e.into_job();
                    job.finish(JobResult::CriticalError);
                    self.finished.push(job);
                }
            }
        }

        self.wait_queue = waiting;
        if started > 0 {
            info!(
                started,
                queued = self.wait_queue.len(),
                active = self.active_len(),
                "scheduling pass"
            );
        }
    }
}

impl<C: ConfigClient, T: TimerService> Drop for Distributor<C, T> {
    fn drop(&mut self) {
        if self.is_idle() {
            return;
        }
        let dropped = self.shutdown();
        warn!(jobs = dropped.len(), "distributor dropped with unfinished jobs");
    }
}
