// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::transport::{ConfigClient, TimerService};

use super::distributor::Distributor;
use super::job::Job;
use super::{RuntimeEvent, RuntimeOptions};

/// Jobs seen by the runtime by the time it stopped.
#[derive(Debug, Default)]
pub struct RuntimeReport {
    /// Jobs that terminated and were not forwarded to a completion channel.
    pub finished: Vec<Job>,
    /// Jobs that were running or queued when the runtime stopped.
    pub unfinished: Vec<Job>,
    /// Jobs refused by the distributor.
    pub rejected: Vec<Job>,
}

/// Drives the distributor in response to `RuntimeEvent`s.
///
/// This is a pure IO shell around [`Distributor`], which contains all the
/// scheduling and retry semantics. Protocol events, timer expiry and job
/// submissions all arrive through one channel, so the distributor is only
/// ever touched from this loop.
pub struct Runtime<C: ConfigClient, T: TimerService> {
    distributor: Distributor<C, T>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    completed_tx: Option<mpsc::UnboundedSender<Job>>,
    options: RuntimeOptions,
}

impl<C: ConfigClient, T: TimerService> fmt::Debug for Runtime<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("options", &self.options)
            .field("queued", &self.distributor.queued_len())
            .field("active", &self.distributor.active_len())
            .finish_non_exhaustive()
    }
}

impl<C: ConfigClient, T: TimerService> Runtime<C, T> {
    pub fn new(
        distributor: Distributor<C, T>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            distributor,
            event_rx,
            completed_tx: None,
            options,
        }
    }

    /// Send every finished job to `tx` as soon as it terminates instead of
    /// collecting it in the report.
    pub fn with_completion_channel(mut self, tx: mpsc::UnboundedSender<Job>) -> Self {
        self.completed_tx = Some(tx);
        self
    }

    pub fn distributor(&self) -> &Distributor<C, T> {
        &self.distributor
    }

    /// Main event loop.
    ///
    /// - Runs the deferred scheduling pass once per iteration.
    /// - Hands finished jobs to the completion channel or the report.
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them into the
    ///   distributor.
    ///
    /// On exit every executor is driven to Idle before its job is returned.
    pub async fn run(mut self) -> Result<RuntimeReport> {
        info!("meshconf runtime started");
        let mut report = RuntimeReport::default();

        loop {
            self.distributor.step();
            self.forward_finished(&mut report);

            if self.options.exit_when_idle
                && self.distributor.is_idle()
                && !self.distributor.has_pending_schedule()
                && self.event_rx.is_empty()
            {
                info!("no job running or queued; stopping runtime");
                break;
            }

            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            match event {
                RuntimeEvent::Mesh(event) => {
                    debug!(handle = ?event.correlation(), "mesh event received");
                    self.distributor.on_event(&event);
                }
                RuntimeEvent::TimerElapsed(timer) => {
                    self.distributor.on_timer_elapsed(timer);
                }
                RuntimeEvent::Submit(job) => {
                    if let Err(e) = self.distributor.submit_job(job) {
                        warn!(error = %e, "job rejected");
                        report.rejected.push(e.into_job());
                    }
                }
                RuntimeEvent::ShutdownRequested => {
                    info!("shutdown requested; stopping runtime");
                    break;
                }
            }
        }

        report.unfinished = self.distributor.shutdown();
        self.forward_finished(&mut report);

        info!(
            finished = report.finished.len(),
            unfinished = report.unfinished.len(),
            rejected = report.rejected.len(),
            "runtime exiting"
        );
        Ok(report)
    }

    fn forward_finished(&mut self, report: &mut RuntimeReport) {
        for job in self.distributor.drain_finished() {
            match &self.completed_tx {
                Some(tx) => {
                    if let Err(mpsc::error::SendError(job)) = tx.send(job) {
                        debug!(job = %job.id(), "completion receiver gone; keeping job in report");
                        report.finished.push(job);
                    }
                }
                None => report.finished.push(job),
            }
        }
    }
}
