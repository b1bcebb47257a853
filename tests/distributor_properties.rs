// tests/distributor_properties.rs

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use proptest::prelude::*;
use meshconf::engine::{Distributor, DistributorSettings, ExecutorSettings, JobId};
use meshconf::transport::{ConfigEvent, EventResult};
use meshconf::types::{Destination, JobResult};
use meshconf_test_utils::builders::{appkey_add, job_with_fallback, model_bind, sequence_job};
use meshconf_test_utils::{FakeClient, ManualTimers, SendOutcome};

/// Something that happens to the distributor from the outside.
#[derive(Debug, Clone)]
enum Stimulus {
    /// Submit a job for node `addr` with `tasks` tasks, or a two-task job
    /// with a fallback.
    Submit { addr: u16, tasks: u16, fallback: bool },
    /// Make the next sends to node `addr` busy or rejected.
    Script { addr: u16, outcome: SendOutcome },
    /// Answer the outstanding request of executor `slot`.
    Answer { slot: usize, result: EventResult },
    /// Let the timer of executor `slot` elapse.
    Expire { slot: usize },
    Step,
}

fn outcome() -> impl Strategy<Value = SendOutcome> {
    prop_oneof![
        Just(SendOutcome::Accept),
        Just(SendOutcome::Busy),
        Just(SendOutcome::Reject),
    ]
}

fn event_result() -> impl Strategy<Value = EventResult> {
    prop_oneof![
        3 => Just(EventResult::Success),
        1 => Just(EventResult::Timeout),
        1 => Just(EventResult::Failed(0x02)),
    ]
}

fn stimulus() -> impl Strategy<Value = Stimulus> {
    prop_oneof![
        3 => (1..=4u16, 1..=3u16, any::<bool>())
            .prop_map(|(addr, tasks, fallback)| Stimulus::Submit { addr, tasks, fallback }),
        1 => (1..=4u16, outcome()).prop_map(|(addr, outcome)| Stimulus::Script { addr, outcome }),
        4 => (0..3usize, event_result()).prop_map(|(slot, result)| Stimulus::Answer { slot, result }),
        2 => (0..3usize).prop_map(|slot| Stimulus::Expire { slot }),
        2 => Just(Stimulus::Step),
    ]
}

fn distributor() -> Distributor<FakeClient, ManualTimers> {
    Distributor::new(
        FakeClient::new(),
        ManualTimers::new(),
        DistributorSettings {
            executor_count: 3,
            executor: ExecutorSettings {
                local_retry_max: 2,
                communication_retry_max: 1,
                busy_retry_interval: Duration::from_millis(10),
                event_timeout: Duration::from_millis(100),
            },
        },
    )
}

fn apply(d: &mut Distributor<FakeClient, ManualTimers>, stimulus: &Stimulus) -> Option<JobId> {
    match *stimulus {
        Stimulus::Submit { addr, tasks, fallback } => {
            let dest = Destination::new(0, addr);
            let job = if fallback {
                job_with_fallback(dest, model_bind(0x1000, 0), appkey_add(0))
            } else {
                sequence_job(dest, (0..tasks).map(appkey_add))
            };
            let id = job.id();
            d.submit_job(job).ok()?;
            return Some(id);
        }
        Stimulus::Script { addr, outcome } => {
            d.client_mut().script(Destination::new(0, addr), [outcome]);
        }
        Stimulus::Answer { slot, result } => {
            let dest = d.executors().get(slot).and_then(|e| e.destination());
            let handle = dest.and_then(|dest| d.client().last_handle_for(dest));
            if let Some(handle) = handle {
                d.on_event(&ConfigEvent::status(handle, result));
            }
        }
        Stimulus::Expire { slot } => {
            if let Some(timer) = d.timers_mut().expire(slot) {
                d.on_timer_elapsed(timer);
            }
        }
        Stimulus::Step => {
            d.step();
        }
    }
    None
}

fn check_invariants(d: &Distributor<FakeClient, ManualTimers>) -> Result<(), TestCaseError> {
    // No destination is served by two executors.
    let mut busy = HashSet::new();
    for dest in d.executors().iter().filter_map(|e| e.destination()) {
        prop_assert!(busy.insert(dest), "destination {dest} runs twice");
    }

    // Timers belong to running executors, one each.
    let mut per_slot: HashMap<usize, usize> = HashMap::new();
    for timer in d.timers().armed() {
        *per_slot.entry(timer.slot).or_default() += 1;
    }
    for (slot, count) in per_slot {
        prop_assert_eq!(count, 1, "slot {} has {} timers", slot, count);
        prop_assert!(!d.executors()[slot].is_idle(), "idle slot {} has a timer", slot);
    }

    // Running jobs have no verdict yet.
    for job in d.executors().iter().filter_map(|e| e.job()) {
        prop_assert_eq!(job.result(), JobResult::Unknown);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn scheduling_invariants_hold(stimuli in proptest::collection::vec(stimulus(), 1..80)) {
        let mut d = distributor();
        let mut submitted = HashSet::new();
        let mut reported = HashSet::new();

        for stimulus in &stimuli {
            if let Some(id) = apply(&mut d, stimulus) {
                submitted.insert(id);
            }
            check_invariants(&d)?;
            for job in d.drain_finished() {
                prop_assert!(job.result().is_terminal());
                prop_assert!(reported.insert(job.id()), "job {} reported twice", job.id());
            }
        }

        // Let everything run out: accept from now on and answer with success.
        d.client_mut().set_default(SendOutcome::Accept);
        for _ in 0..500 {
            if d.is_idle() {
                break;
            }
            d.step();
            for slot in 0..d.executors().len() {
                apply(&mut d, &Stimulus::Answer { slot, result: EventResult::Success });
                apply(&mut d, &Stimulus::Expire { slot });
            }
            check_invariants(&d)?;
            for job in d.drain_finished() {
                prop_assert!(reported.insert(job.id()), "job {} reported twice", job.id());
            }
        }

        prop_assert!(d.is_idle());
        prop_assert_eq!(reported, submitted);
    }
}
