// tests/executor_start.rs

use std::error::Error;
use std::time::Duration;

use meshconf::engine::{Executor, ExecutorContext, ExecutorSettings, ExecutorState, Job, JobProgress};
use meshconf::errors::StartJobError;
use meshconf::task::TaskTree;
use meshconf::types::{Destination, JobResult};
use meshconf_test_utils::builders::single_task_job;
use meshconf_test_utils::{init_tracing, FakeClient, ManualTimers};

type TestResult = Result<(), Box<dyn Error>>;

const DEST: Destination = Destination {
    netkey_index: 0,
    node_address: 0x0300,
};

fn executor() -> Executor {
    Executor::new(
        0,
        ExecutorSettings {
            local_retry_max: 2,
            communication_retry_max: 2,
            busy_retry_interval: Duration::from_millis(100),
            event_timeout: Duration::from_secs(1),
        },
    )
}

#[test]
fn busy_executor_hands_the_job_back() -> TestResult {
    init_tracing();
    let mut client = FakeClient::new();
    let mut timers = ManualTimers::new();
    let mut executor = executor();

    let first = single_task_job(DEST);
    let first_id = first.id();
    {
        let mut ctx = ExecutorContext::new(&mut client, &mut timers);
        assert!(matches!(executor.start_job(first, &mut ctx)?, JobProgress::Running));
    }
    assert_eq!(executor.state(), ExecutorState::EventWait);

    let second = single_task_job(Destination::new(0, 0x0301));
    let second_id = second.id();
    let err = {
        let mut ctx = ExecutorContext::new(&mut client, &mut timers);
        match executor.start_job(second, &mut ctx) {
            Err(e) => e,
            Ok(progress) => panic!("expected InvalidState, got {progress:?}"),
        }
    };
    assert!(matches!(err, StartJobError::InvalidState { slot: 0, .. }));

    let returned = err.into_job();
    assert_eq!(returned.id(), second_id);
    assert_eq!(returned.result(), JobResult::Unknown);
    assert_eq!(returned.current_task(), None);

    // The running job is left alone.
    assert_eq!(executor.state(), ExecutorState::EventWait);
    assert_eq!(executor.job().map(Job::id), Some(first_id));
    assert_eq!(client.sent().len(), 1);
    assert_eq!(timers.armed().len(), 1);
    Ok(())
}

#[test]
fn job_without_tasks_is_handed_back() {
    init_tracing();
    let mut client = FakeClient::new();
    let mut timers = ManualTimers::new();
    let mut executor = executor();

    let job = Job::new(DEST, TaskTree::new());
    let id = job.id();
    let err = {
        let mut ctx = ExecutorContext::new(&mut client, &mut timers);
        match executor.start_job(job, &mut ctx) {
            Err(e) => e,
            Ok(progress) => panic!("expected NotFound, got {progress:?}"),
        }
    };
    assert!(matches!(err, StartJobError::NotFound { .. }));

    let returned = err.into_job();
    assert_eq!(returned.id(), id);
    assert_eq!(returned.result(), JobResult::Unknown);

    assert!(executor.is_idle());
    assert_eq!(executor.state(), ExecutorState::Idle);
    assert!(executor.job().is_none());
    assert!(client.sent().is_empty());
    assert!(timers.started().is_empty());
}
