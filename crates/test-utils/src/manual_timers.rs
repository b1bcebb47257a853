use std::collections::BTreeMap;
use std::time::Duration;

use meshconf::errors::TimerError;
use meshconf::transport::{TimerId, TimerService};
use meshconf::types::SlotId;

/// Timer service that never fires on its own.
///
/// Tests look at what is armed and expire timers by hand, then feed the id
/// to the distributor.
#[derive(Debug, Default)]
pub struct ManualTimers {
    armed: BTreeMap<TimerId, Duration>,
    started: Vec<(TimerId, Duration)>,
    stopped: Vec<TimerId>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently armed timers.
    pub fn armed(&self) -> Vec<TimerId> {
        self.armed.keys().copied().collect()
    }

    /// The timer armed for `slot` and its duration.
    pub fn armed_for(&self, slot: SlotId) -> Option<(TimerId, Duration)> {
        self.armed
            .iter()
            .find(|(id, _)| id.slot == slot)
            .map(|(id, after)| (*id, *after))
    }

    /// Every arming so far, in order.
    pub fn started(&self) -> &[(TimerId, Duration)] {
        &self.started
    }

    pub fn stopped(&self) -> &[TimerId] {
        &self.stopped
    }

    /// Let the timer of `slot` expire. Returns the id to report.
    pub fn expire(&mut self, slot: SlotId) -> Option<TimerId> {
        let (id, _) = self.armed_for(slot)?;
        self.armed.remove(&id);
        Some(id)
    }
}

impl TimerService for ManualTimers {
    fn start_one_shot(&mut self, timer: TimerId, after: Duration) -> Result<(), TimerError> {
        self.armed.insert(timer, after);
        self.started.push((timer, after));
        Ok(())
    }

    fn stop(&mut self, timer: TimerId) -> Result<(), TimerError> {
        match self.armed.remove(&timer) {
            Some(_) => {
                self.stopped.push(timer);
                Ok(())
            }
            None => Err(TimerError::NotRunning(timer)),
        }
    }
}
