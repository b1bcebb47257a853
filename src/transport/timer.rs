// src/transport/timer.rs

//! One-shot timers.
//!
//! Expiry is never delivered as a callback. The tokio implementation posts a
//! [`RuntimeEvent::TimerElapsed`] into the same channel that carries protocol
//! events, so the engine only ever runs on the runtime loop.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use crate::engine::RuntimeEvent;
use crate::errors::TimerError;
use crate::types::SlotId;

/// Identifies one arming of an executor's timer.
///
/// The generation changes on every arming, so an expiry that was already in
/// flight when its timer got stopped can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId {
    pub slot: SlotId,
    pub generation: u64,
}

/// Timer service used by executors.
pub trait TimerService: Send {
    /// Arm a timer that expires once after `after`.
    fn start_one_shot(&mut self, timer: TimerId, after: Duration) -> Result<(), TimerError>;

    /// Disarm a timer. Returns [`TimerError::NotRunning`] if it already
    /// expired or was never armed.
    fn stop(&mut self, timer: TimerId) -> Result<(), TimerError>;
}

/// Tokio-backed timers that report expiry through the runtime channel.
#[derive(Debug)]
pub struct TokioTimers {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    running: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioTimers {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            running: HashMap::new(),
        }
    }

    /// Number of timers that have not expired yet.
    pub fn armed(&self) -> usize {
        self.running.values().filter(|h| !h.is_finished()).count()
    }
}

impl TimerService for TokioTimers {
    fn start_one_shot(&mut self, timer: TimerId, after: Duration) -> Result<(), TimerError> {
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|e| TimerError::Unavailable(e.to_string()))?;

        self.running.retain(|_, handle| !handle.is_finished());

        let tx = self.runtime_tx.clone();
        let handle = rt.spawn(async move {
            sleep(after).await;
            debug!(slot = timer.slot, generation = timer.generation, "timer elapsed");
            let _ = tx.send(RuntimeEvent::TimerElapsed(timer)).await;
        });

        if let Some(previous) = self.running.insert(timer, handle) {
            previous.abort();
        }
        Ok(())
    }

    fn stop(&mut self, timer: TimerId) -> Result<(), TimerError> {
        match self.running.remove(&timer) {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                Ok(())
            }
            _ => Err(TimerError::NotRunning(timer)),
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, handle) in self.running.drain() {
            handle.abort();
        }
    }
}
