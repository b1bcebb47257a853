// tests/distributor_scheduling.rs

use std::error::Error;

use meshconf::engine::{
    Distributor, DistributorSettings, ExecutorSettings, ExecutorState, Job, ScheduleMode,
};
use meshconf::errors::SubmitError;
use meshconf::task::{StatusTask, TaskTree};
use meshconf::transport::{ConfigEvent, EventResult};
use meshconf::types::{Destination, JobResult};
use meshconf_test_utils::builders::{
    appkey_add, job_with_fallback, model_bind, sequence_job, single_task_job,
};
use meshconf_test_utils::{init_tracing, FakeClient, ManualTimers, SendOutcome};

type TestResult = Result<(), Box<dyn Error>>;

fn distributor(executor_count: usize) -> Distributor<FakeClient, ManualTimers> {
    Distributor::new(
        FakeClient::new(),
        ManualTimers::new(),
        DistributorSettings {
            executor_count,
            executor: ExecutorSettings::default(),
        },
    )
}

fn answer(d: &mut Distributor<FakeClient, ManualTimers>, dest: Destination, result: EventResult) {
    let handle = d
        .client()
        .last_handle_for(dest)
        .expect("a request was accepted for this destination");
    d.on_event(&ConfigEvent::status(handle, result));
}

#[test]
fn distinct_destinations_start_in_one_pass() -> TestResult {
    init_tracing();
    let mut d = distributor(4);

    for addr in 1..=4 {
        d.submit_job(single_task_job(Destination::new(0, addr)))?;
    }

    // Submission only queues.
    assert_eq!(d.active_len(), 0);
    assert_eq!(d.queued_len(), 4);
    assert!(d.client().sent().is_empty());

    assert!(d.step());

    assert_eq!(d.active_len(), 4);
    assert_eq!(d.queued_len(), 0);
    assert_eq!(d.client().sent().len(), 4);
    for status in d.executor_statuses() {
        assert_eq!(status.state, ExecutorState::EventWait);
        assert!(status.destination.is_some());
    }
    Ok(())
}

#[test]
fn same_destination_runs_serially_in_submission_order() -> TestResult {
    init_tracing();
    let mut d = distributor(4);
    let dest = Destination::new(0, 0x0010);

    let mut ids = Vec::new();
    for n in 0..3 {
        let job = sequence_job(dest, [appkey_add(n)]);
        ids.push(job.id());
        d.submit_job(job)?;
    }

    d.step();
    assert_eq!(d.active_len(), 1);
    assert_eq!(d.queued_len(), 2);

    for n in 0..3u16 {
        let last = d.client().sent().last().expect("request sent");
        assert_eq!(last.request, appkey_add(n));

        answer(&mut d, dest, EventResult::Success);

        let finished = d.drain_finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id(), ids[usize::from(n)]);
        assert_eq!(finished[0].result(), JobResult::Success);

        // The freed executor picks up the next job right away.
        let expected_active = if n < 2 { 1 } else { 0 };
        assert_eq!(d.active_len(), expected_active);
    }

    assert!(d.is_idle());
    assert_eq!(d.client().sent().len(), 3);
    Ok(())
}

#[test]
fn blocked_job_stays_queued_while_later_destination_starts() -> TestResult {
    init_tracing();
    let mut d = distributor(2);
    let a = Destination::new(0, 0x000a);
    let b = Destination::new(0, 0x000b);

    let a1 = single_task_job(a);
    let a2 = single_task_job(a);
    let a2_id = a2.id();
    d.submit_job(a1)?;
    d.submit_job(a2)?;
    d.submit_job(single_task_job(b))?;

    d.step();

    let active: Vec<_> = d.executors().iter().filter_map(|e| e.destination()).collect();
    assert_eq!(active, vec![a, b]);
    let queued: Vec<_> = d.queued_jobs().map(|j| j.id()).collect();
    assert_eq!(queued, vec![a2_id]);

    // B finishing frees an executor, but A is still busy.
    answer(&mut d, b, EventResult::Success);
    assert_eq!(d.drain_finished().len(), 1);
    assert_eq!(d.queued_len(), 1);

    answer(&mut d, a, EventResult::Success);
    assert_eq!(d.drain_finished().len(), 1);
    assert_eq!(d.queued_len(), 0);
    assert_eq!(d.executors()[0].job().map(|j| j.id()), Some(a2_id));
    Ok(())
}

#[test]
fn pass_stops_when_no_executor_is_idle() -> TestResult {
    init_tracing();
    let mut d = distributor(1);
    let dests: Vec<_> = (1..=3).map(|addr| Destination::new(0, addr)).collect();
    for dest in &dests {
        d.submit_job(single_task_job(*dest))?;
    }

    d.step();

    assert_eq!(d.active_len(), 1);
    let queued: Vec<_> = d.queued_jobs().map(|j| j.destination()).collect();
    assert_eq!(queued, dests[1..].to_vec());
    Ok(())
}

#[test]
fn step_without_pending_request_does_nothing() -> TestResult {
    init_tracing();
    let mut d = distributor(2);
    assert!(!d.step());

    d.submit_job(single_task_job(Destination::new(0, 1)))?;
    assert!(d.has_pending_schedule());
    assert!(d.step());
    assert!(!d.has_pending_schedule());

    let sent = d.client().sent().len();
    assert!(!d.step());
    assert_eq!(d.client().sent().len(), sent);
    Ok(())
}

#[test]
fn normal_schedule_runs_a_pass_immediately() -> TestResult {
    init_tracing();
    let mut d = distributor(1);
    d.submit_job(single_task_job(Destination::new(0, 1)))?;

    d.schedule(ScheduleMode::Normal);

    assert_eq!(d.active_len(), 1);
    // The deferred request is still pending; running it finds nothing to do.
    assert!(d.step());
    assert_eq!(d.client().sent().len(), 1);
    Ok(())
}

#[test]
fn submit_rejects_empty_finished_and_cyclic_jobs() -> TestResult {
    init_tracing();
    let mut d = distributor(1);
    let dest = Destination::new(0, 1);

    let empty = Job::new(dest, TaskTree::new());
    let empty_id = empty.id();
    match d.submit_job(empty) {
        Err(err @ SubmitError::NullReference { .. }) => assert_eq!(err.into_job().id(), empty_id),
        other => panic!("expected NullReference, got {other:?}"),
    }

    let mut tree = TaskTree::new();
    let first = tree.add(StatusTask::new(appkey_add(0)));
    let second = tree.add(StatusTask::new(appkey_add(1)));
    tree.set_next_on_success(first, second)?;
    tree.set_next_on_failure(second, first)?;
    assert!(matches!(
        d.submit_job(Job::new(dest, tree)),
        Err(SubmitError::InvalidArgument { .. })
    ));

    // Run a job to completion, then try to submit it again.
    d.submit_job(single_task_job(dest))?;
    d.step();
    answer(&mut d, dest, EventResult::Success);
    let done = d.drain_finished().pop().expect("job finished");
    match d.submit_job(done) {
        Err(SubmitError::InvalidArgument { job, .. }) => {
            assert_eq!(job.result(), JobResult::Success)
        }
        other => panic!("expected InvalidArgument, got {other:?}"),
    }

    assert_eq!(d.queued_len(), 0);
    Ok(())
}

#[test]
fn job_failing_while_starting_is_delivered_directly() -> TestResult {
    init_tracing();
    let mut d = distributor(1);
    let a = Destination::new(0, 0x000a);
    let b = Destination::new(0, 0x000b);
    d.client_mut().script(a, [SendOutcome::Reject, SendOutcome::Reject]);

    d.submit_job(job_with_fallback(a, model_bind(0x1000, 0), appkey_add(0)))?;
    d.submit_job(single_task_job(b))?;
    d.step();

    let finished = d.drain_finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].destination(), a);
    assert_eq!(finished[0].result(), JobResult::Fail);

    // The same pass went on with the next job on the same executor.
    assert_eq!(d.executors()[0].destination(), Some(b));
    assert_eq!(d.client().accepted_for(b).len(), 1);
    Ok(())
}

#[test]
fn every_job_is_reported_exactly_once() -> TestResult {
    init_tracing();
    let mut d = distributor(2);
    let dests: Vec<_> = (1..=3).map(|addr| Destination::new(0, addr)).collect();
    let mut ids = Vec::new();
    for dest in dests.iter().chain(dests.iter()) {
        let job = single_task_job(*dest);
        ids.push(job.id());
        d.submit_job(job)?;
    }

    let mut reported = Vec::new();
    for _ in 0..20 {
        d.step();
        let active: Vec<_> = d.executors().iter().filter_map(|e| e.destination()).collect();
        for dest in active {
            answer(&mut d, dest, EventResult::Success);
        }
        reported.extend(d.drain_finished().into_iter().map(|j| j.id()));
        if d.is_idle() {
            break;
        }
    }

    reported.sort();
    ids.sort();
    assert_eq!(reported, ids);
    Ok(())
}

#[test]
fn shutdown_drives_executors_idle_and_returns_jobs() -> TestResult {
    init_tracing();
    let mut d = distributor(1);
    let a = Destination::new(0, 0x000a);
    d.submit_job(single_task_job(a))?;
    d.submit_job(single_task_job(a))?;
    d.step();

    let (timer, _) = d.timers().armed_for(0).expect("event timeout armed");

    let unfinished = d.shutdown();

    assert_eq!(unfinished.len(), 2);
    assert!(unfinished.iter().all(|j| j.result() == JobResult::Unknown));
    assert!(d.timers().armed().is_empty());
    assert!(d.timers().stopped().contains(&timer));
    assert!(d.is_idle());
    assert!(d.drain_finished().is_empty());

    // A late expiry of the stopped timer is ignored.
    d.on_timer_elapsed(timer);
    assert!(d.drain_finished().is_empty());
    Ok(())
}
