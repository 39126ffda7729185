mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use common::{due_to_start, due_to_stop, host, t0, Harness, OffsetCalculator};
use hostsleep_id::WorkerId;
use hostsleep_reconcile::Stagger;
use hostsleep_scheduler::host::{HostKind, HostStatus, SYSTEM_ACTOR};
use hostsleep_scheduler::policy::StoredPolicy;
use hostsleep_scheduler::jobs::{HostAction, ModifySource, SPAWN_HOST_MODIFICATION_QUEUE_GROUP};
use hostsleep_scheduler::scheduler::{
    Dispatcher, RepairReason, ScheduleField, ScheduleRepairer, SleepScheduleReconciler,
    SleepSchedulerWorker, Tick, TickError, WorkerConfig, SLEEP_SCHEDULER_JOB_NAME,
};
use hostsleep_scheduler::store::{
    HostStore, LeaseStore, ServiceFlags, SleepScheduleSettings, TickStatus,
};
use rstest::rstest;
use tokio::sync::watch;

const TICK_ID: &str = "sleep-scheduler.2024-03-05.12-00-00";
const ACTION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

fn never_cancelled() -> watch::Receiver<bool> {
    // A dropped sender can never cancel.
    let (_, rx) = watch::channel(false);
    rx
}

fn worker(harness: &Harness, worker_id: WorkerId) -> SleepSchedulerWorker {
    SleepSchedulerWorker::new(
        SleepScheduleReconciler::new(harness.ctx.clone()),
        harness.store.clone(),
        harness.store.clone(),
        WorkerConfig {
            worker_id,
            interval: Duration::from_secs(60),
            lease_duration: Duration::from_secs(300),
        },
    )
}

#[tokio::test]
async fn end_to_end_repairs_missing_times_without_dispatching() {
    let mut h = host(HostStatus::Running);
    h.sleep_schedule.next_start_time = None;
    h.sleep_schedule.next_stop_time = None;
    let harness = Harness::new([h.clone()]);
    let reconciler = SleepScheduleReconciler::new(harness.ctx.clone());

    let report = reconciler
        .run_tick(&Tick::at(t0()), never_cancelled())
        .await
        .unwrap();

    let stored = harness.store.host(&h.id).await.unwrap();
    assert_eq!(
        stored.sleep_schedule.next_start_time,
        Some(t0() + TimeDelta::hours(common::START_OFFSET_HOURS))
    );
    assert_eq!(
        stored.sleep_schedule.next_stop_time,
        Some(t0() + TimeDelta::hours(common::STOP_OFFSET_HOURS))
    );

    assert_eq!(report.stop_jobs, 0);
    assert_eq!(report.start_jobs, 0);
    assert!(harness.store.submitted_jobs().await.is_empty());

    let entries: Vec<_> = report
        .repairs
        .repairs
        .iter()
        .filter(|r| r.host_id == h.id && r.reason == RepairReason::Missing)
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].changes.len(), 2);
    assert!(report.outcome().is_ok());
}

#[tokio::test]
async fn missing_time_repair_is_idempotent() {
    let mut h = host(HostStatus::Stopped);
    h.sleep_schedule.next_start_time = None;
    let harness = Harness::new([h]);
    let reconciler = SleepScheduleReconciler::new(harness.ctx.clone());
    let tick = Tick::at(t0());

    let first = reconciler.run_tick(&tick, never_cancelled()).await.unwrap();
    assert_eq!(first.repairs.hosts_repaired(), 1);
    let writes = harness.store.host_writes().await;

    let second = reconciler.run_tick(&tick, never_cancelled()).await.unwrap();
    assert!(second.repairs.repairs.is_empty());
    assert_eq!(harness.store.host_writes().await, writes);
}

#[tokio::test]
async fn repair_leaves_the_valid_field_untouched() {
    let valid_stop = t0() + TimeDelta::hours(3);
    let mut h = host(HostStatus::Running);
    h.sleep_schedule.next_start_time = None;
    h.sleep_schedule.next_stop_time = Some(valid_stop);
    let harness = Harness::new([h.clone()]);

    let report = SleepScheduleReconciler::new(harness.ctx.clone())
        .run_tick(&Tick::at(t0()), never_cancelled())
        .await
        .unwrap();

    let stored = harness.store.host(&h.id).await.unwrap();
    assert_eq!(stored.sleep_schedule.next_stop_time, Some(valid_stop));
    assert_eq!(
        stored.sleep_schedule.next_start_time,
        Some(t0() + TimeDelta::hours(common::START_OFFSET_HOURS))
    );

    assert_eq!(report.repairs.repairs.len(), 1);
    let repair = &report.repairs.repairs[0];
    assert_eq!(repair.changes.len(), 1);
    assert_eq!(repair.changes[0].field, ScheduleField::NextStart);
    assert_eq!(repair.changes[0].old, None);
}

#[rstest]
#[case::just_under(-1, false)]
#[case::exactly(0, false)]
#[case::just_over(1, true)]
#[tokio::test]
async fn timeout_threshold_is_strict(#[case] past_timeout_secs: i64, #[case] repaired: bool) {
    let mut h = host(HostStatus::Stopped);
    let age = TimeDelta::from_std(ACTION_TIMEOUT).unwrap() + TimeDelta::seconds(past_timeout_secs);
    let stuck_stop = t0() - age;
    h.sleep_schedule.next_stop_time = Some(stuck_stop);
    let harness = Harness::new([h.clone()]);

    let repairer = ScheduleRepairer::new(
        harness.ctx.hosts.clone(),
        harness.ctx.calculator.clone(),
        ACTION_TIMEOUT,
        TICK_ID,
    );
    let report = repairer.fix_exceeding_timeout(t0()).await;

    assert_eq!(report.repairs.len(), usize::from(repaired));
    let stored = harness.store.host(&h.id).await.unwrap();
    if repaired {
        assert_eq!(report.repairs[0].reason, RepairReason::ExceededTimeout);
        assert_eq!(
            stored.sleep_schedule.next_stop_time,
            Some(t0() + TimeDelta::hours(common::STOP_OFFSET_HOURS))
        );
    } else {
        assert_eq!(stored.sleep_schedule.next_stop_time, Some(stuck_stop));
    }
    // The start time was never stuck.
    assert_eq!(stored.sleep_schedule.next_start_time, h.sleep_schedule.next_start_time);
}

#[tokio::test]
async fn both_stuck_times_are_rewritten_in_one_write() {
    let mut h = host(HostStatus::Stopped);
    h.sleep_schedule.next_start_time = Some(t0() - TimeDelta::hours(2));
    h.sleep_schedule.next_stop_time = Some(t0() - TimeDelta::hours(3));
    let harness = Harness::new([h.clone()]);

    let report = ScheduleRepairer::new(
        harness.ctx.hosts.clone(),
        harness.ctx.calculator.clone(),
        ACTION_TIMEOUT,
        TICK_ID,
    )
    .fix_exceeding_timeout(t0())
    .await;

    assert!(report.failures.is_empty());
    assert_eq!(report.repairs.len(), 1);
    let repair = &report.repairs[0];
    assert_eq!(repair.reason, RepairReason::ExceededTimeout);
    assert_eq!(repair.changes.len(), 2);
    assert_eq!(harness.store.host_writes().await, 1);

    let stored = harness.store.host(&h.id).await.unwrap();
    assert_eq!(
        stored.sleep_schedule.next_start_time,
        Some(t0() + TimeDelta::hours(common::START_OFFSET_HOURS))
    );
    assert_eq!(
        stored.sleep_schedule.next_stop_time,
        Some(t0() + TimeDelta::hours(common::STOP_OFFSET_HOURS))
    );
}

#[tokio::test]
async fn unreadable_records_fail_alone() {
    let healthy = due_to_stop();
    let unreadable_stop = due_to_stop();
    let unreadable_start = due_to_start();
    let mut unreadable_missing = host(HostStatus::Running);
    unreadable_missing.sleep_schedule.next_start_time = None;
    let mut bad_policy = due_to_stop();
    bad_policy.sleep_schedule.policy =
        StoredPolicy::from_json(serde_json::json!({ "time_zone": "Mars/Olympus" }));

    let harness = Harness::new([
        healthy.clone(),
        unreadable_stop.clone(),
        unreadable_start.clone(),
        unreadable_missing.clone(),
        bad_policy.clone(),
    ]);
    for id in [unreadable_stop.id, unreadable_start.id, unreadable_missing.id] {
        harness
            .store
            .mark_unreadable(id, "unknown host status: asleep")
            .await;
    }

    let report = SleepScheduleReconciler::new(harness.ctx.clone())
        .run_tick(&Tick::at(t0()), never_cancelled())
        .await
        .unwrap();

    // A bad policy does not keep a due host from stopping.
    assert_eq!(report.stop_jobs, 2);
    assert_eq!(report.start_jobs, 0);
    let mut stopped: Vec<_> = harness
        .store
        .submitted_jobs()
        .await
        .into_iter()
        .map(|(_, job)| job.host_id)
        .collect();
    stopped.sort();
    let mut expected = vec![healthy.id, bad_policy.id];
    expected.sort();
    assert_eq!(stopped, expected);

    let mut failed: Vec<_> = report
        .failures
        .iter()
        .map(|f| (f.resource.clone(), f.context.clone()))
        .collect();
    failed.sort();
    let mut expected: Vec<_> = [unreadable_stop.id, unreadable_start.id, unreadable_missing.id]
        .iter()
        .map(|id| (Some(id.to_string()), "reading host record".to_string()))
        .collect();
    expected.sort();
    assert_eq!(failed, expected);
}

#[tokio::test]
async fn stagger_comes_from_the_tick_context() {
    let hosts: Vec<_> = (0..5).map(|_| due_to_start()).collect();
    let mut harness = Harness::new(hosts);
    harness.ctx = harness.ctx.clone().with_stagger(Stagger {
        step: Duration::from_secs(10),
        ceiling: Duration::from_secs(25),
    });

    SleepScheduleReconciler::new(harness.ctx.clone())
        .run_tick(&Tick::at(t0()), never_cancelled())
        .await
        .unwrap();

    let mut waits: Vec<_> = harness
        .store
        .submitted_jobs()
        .await
        .into_iter()
        .map(|(_, job)| job.wait_until - t0())
        .collect();
    waits.sort();
    let expected: Vec<_> = [0, 10, 20, 25, 25].map(TimeDelta::seconds).to_vec();
    assert_eq!(waits, expected);
}

#[tokio::test]
async fn stagger_is_capped_for_large_batches() {
    let hosts: Vec<_> = (0..400).map(|_| due_to_stop()).collect();
    let harness = Harness::new(hosts);

    let plan = Dispatcher::new(harness.ctx.hosts.clone(), Stagger::DEFAULT, TICK_ID)
        .make_stop_and_start_jobs(t0(), &ServiceFlags::default(), "2024-03-05.12-00-00")
        .await;

    assert_eq!(plan.stop_jobs.len(), 400);
    assert!(plan.start_jobs.is_empty());

    let waits: Vec<_> = plan.stop_jobs.iter().map(|j| j.wait_until).collect();
    let cap = t0() + TimeDelta::minutes(5);
    assert_eq!(waits[0], t0());
    for (i, pair) in waits.windows(2).enumerate() {
        assert!(pair[0] <= pair[1]);
        if i + 1 < 300 {
            assert_eq!(pair[1] - pair[0], TimeDelta::seconds(1));
        }
    }
    assert!(waits.iter().all(|w| *w <= cap));
    assert_eq!(waits[299], t0() + TimeDelta::seconds(299));
    assert_eq!(waits.iter().filter(|w| **w == cap).count(), 100);
}

#[tokio::test]
async fn disabled_flag_suspends_only_stopping() {
    let stopping = [due_to_stop(), due_to_stop()];
    let starting = [due_to_start(), due_to_start(), due_to_start()];
    let harness = Harness::new(stopping.iter().chain(starting.iter()).cloned());
    harness
        .store
        .set_flags(ServiceFlags {
            sleep_schedule_disabled: true,
        })
        .await;

    let report = SleepScheduleReconciler::new(harness.ctx.clone())
        .run_tick(&Tick::at(t0()), never_cancelled())
        .await
        .unwrap();

    assert_eq!(report.stop_jobs, 0);
    assert_eq!(report.start_jobs, starting.len());
    assert_eq!(report.jobs_enqueued, starting.len());

    let submitted = harness.store.submitted_jobs().await;
    assert!(submitted
        .iter()
        .all(|(group, job)| group == SPAWN_HOST_MODIFICATION_QUEUE_GROUP
            && job.action == HostAction::Start));
}

#[tokio::test]
async fn jobs_carry_provenance_and_tick_token() {
    let h = due_to_stop();
    let harness = Harness::new([h.clone()]);

    SleepScheduleReconciler::new(harness.ctx.clone())
        .run_tick(&Tick::at(t0()), never_cancelled())
        .await
        .unwrap();

    let submitted = harness.store.submitted_jobs().await;
    assert_eq!(submitted.len(), 1);
    let (_, job) = &submitted[0];
    assert_eq!(job.job_id, format!("spawnhost-stop.{}.2024-03-05.12-00-00", h.id));
    assert_eq!(job.host_id, h.id);
    assert_eq!(job.started_by, "alice");
    assert_eq!(job.source, ModifySource::SleepSchedule);
    assert_eq!(job.user, "sleep_schedule");
    assert_eq!(job.timestamp, "2024-03-05.12-00-00");
    assert_eq!(job.wait_until, t0());
}

#[tokio::test]
async fn exemptions_take_precedence_over_dispatch() {
    let listed = due_to_stop();
    let mut delisted = due_to_stop();
    delisted.sleep_schedule.permanently_exempt = true;
    let mut temporarily = due_to_stop();
    temporarily.sleep_schedule.temporarily_exempt_until = Some(t0() + TimeDelta::hours(1));
    let mut expired = due_to_stop();
    expired.sleep_schedule.temporarily_exempt_until = Some(t0() - TimeDelta::minutes(1));

    let harness = Harness::new([
        listed.clone(),
        delisted.clone(),
        temporarily.clone(),
        expired.clone(),
    ]);
    harness
        .store
        .set_settings(SleepScheduleSettings {
            permanently_exempt_hosts: vec![listed.id],
        })
        .await;

    let report = SleepScheduleReconciler::new(harness.ctx.clone())
        .run_tick(&Tick::at(t0()), never_cancelled())
        .await
        .unwrap();

    assert_eq!(report.exemptions.permanent_added, 1);
    assert_eq!(report.exemptions.permanent_removed, 1);
    assert_eq!(report.exemptions.temporary_cleared, 1);

    let stored = harness.store.host(&listed.id).await.unwrap();
    assert!(stored.sleep_schedule.permanently_exempt);
    let stored = harness.store.host(&delisted.id).await.unwrap();
    assert!(!stored.sleep_schedule.permanently_exempt);
    let stored = harness.store.host(&expired.id).await.unwrap();
    assert_eq!(stored.sleep_schedule.temporarily_exempt_until, None);

    let mut stopped: Vec<_> = harness
        .store
        .submitted_jobs()
        .await
        .into_iter()
        .map(|(_, job)| job.host_id)
        .collect();
    stopped.sort();
    let mut expected = vec![delisted.id, expired.id];
    expected.sort();
    assert_eq!(stopped, expected);

    // The permanently exempt host never shows up as due.
    let due = harness.store.find_due_to_stop(t0()).await.unwrap();
    assert!(due
        .hosts
        .iter()
        .all(|h| h.id != listed.id && h.id != temporarily.id));
}

#[tokio::test]
async fn unknown_exempt_host_is_ignored() {
    let harness = Harness::new([due_to_stop()]);
    harness
        .store
        .set_settings(SleepScheduleSettings {
            permanently_exempt_hosts: vec![hostsleep_id::HostId::new()],
        })
        .await;

    let report = SleepScheduleReconciler::new(harness.ctx.clone())
        .run_tick(&Tick::at(t0()), never_cancelled())
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.exemptions.permanent_added, 0);
    assert_eq!(report.stop_jobs, 1);
}

#[tokio::test]
async fn ineligible_hosts_are_left_alone() {
    let mut system = host(HostStatus::Running);
    system.started_by = SYSTEM_ACTOR.to_string();
    let mut provisioned = host(HostStatus::Running);
    provisioned.kind = HostKind::Static;
    let mut keep_off = host(HostStatus::Stopped);
    keep_off.sleep_schedule.should_keep_off = true;
    let mut expirable = host(HostStatus::Running);
    expirable.no_expiration = false;
    let terminated = host(HostStatus::Terminated);

    let mut hosts = vec![system, provisioned, keep_off, expirable, terminated];
    for h in &mut hosts {
        h.sleep_schedule.next_start_time = None;
        h.sleep_schedule.next_stop_time = Some(t0() - TimeDelta::hours(2));
    }
    let harness = Harness::new(hosts);

    let report = SleepScheduleReconciler::new(harness.ctx.clone())
        .run_tick(&Tick::at(t0()), never_cancelled())
        .await
        .unwrap();

    assert!(report.repairs.repairs.is_empty());
    assert_eq!(report.stop_jobs + report.start_jobs, 0);
    assert_eq!(harness.store.host_writes().await, 0);
}

#[tokio::test]
async fn per_host_failures_do_not_stop_other_hosts() {
    let mut write_fails = host(HostStatus::Running);
    write_fails.sleep_schedule.next_stop_time = None;
    let mut calc_fails = host(HostStatus::Running);
    calc_fails.sleep_schedule.next_stop_time = None;
    let mut healthy = host(HostStatus::Running);
    healthy.sleep_schedule.next_stop_time = None;
    let submit_fails = due_to_stop();
    let dispatched = due_to_stop();

    let harness = Harness::with_calculator(
        [
            write_fails.clone(),
            calc_fails.clone(),
            healthy.clone(),
            submit_fails.clone(),
            dispatched.clone(),
        ],
        OffsetCalculator::failing_for([calc_fails.id]),
    );
    harness.store.fail_writes_for(write_fails.id).await;
    harness.store.fail_submissions_for(submit_fails.id).await;

    let report = SleepScheduleReconciler::new(harness.ctx.clone())
        .run_tick(&Tick::at(t0()), never_cancelled())
        .await
        .unwrap();

    assert_eq!(report.repairs.repairs.len(), 1);
    assert_eq!(report.repairs.repairs[0].host_id, healthy.id);
    assert_eq!(report.stop_jobs, 2);
    assert_eq!(report.jobs_enqueued, 1);

    let resources: Vec<_> = report
        .failures
        .iter()
        .filter_map(|f| f.resource.clone())
        .collect();
    assert_eq!(resources.len(), 3);
    assert!(resources.contains(&write_fails.id.to_string()));
    assert!(resources.contains(&calc_fails.id.to_string()));
    assert!(resources.iter().any(|r| r.contains(&submit_fails.id.to_string())));

    let err = report.outcome().unwrap_err();
    assert_eq!(err.failures.len(), 3);
    assert!(err.to_string().starts_with("3 failure(s)"));
}

#[tokio::test]
async fn config_failure_aborts_the_tick() {
    let mut missing = host(HostStatus::Running);
    missing.sleep_schedule.next_stop_time = None;
    let harness = Harness::new([missing, due_to_stop()]);
    harness.store.set_settings_unavailable(true).await;

    let result = SleepScheduleReconciler::new(harness.ctx.clone())
        .run_tick(&Tick::at(t0()), never_cancelled())
        .await;

    assert!(matches!(result, Err(TickError::Config(_))));
    assert_eq!(harness.store.host_writes().await, 0);
    assert!(harness.store.submitted_jobs().await.is_empty());
}

#[tokio::test]
async fn cancellation_aborts_in_flight_phase() {
    let mut missing = host(HostStatus::Running);
    missing.sleep_schedule.next_stop_time = None;
    let harness = Harness::new([missing, due_to_stop()]);
    harness
        .store
        .set_query_delay(Some(Duration::from_secs(5)))
        .await;
    let reconciler = SleepScheduleReconciler::new(harness.ctx.clone());

    let (tx, rx) = watch::channel(false);
    let tick = Tick::at(t0());
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
    };
    let (result, ()) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(2), reconciler.run_tick(&tick, rx)),
        cancel
    );

    let result = result.expect("cancelled tick should return promptly");
    assert!(matches!(result, Err(TickError::Cancelled)));
    assert_eq!(harness.store.host_writes().await, 0);
    assert!(harness.store.submitted_jobs().await.is_empty());
}

#[tokio::test]
async fn resubmitting_a_tick_is_a_no_op() {
    let harness = Harness::new([due_to_stop(), due_to_start()]);
    let reconciler = SleepScheduleReconciler::new(harness.ctx.clone());
    let tick = Tick::at(t0());

    let first = reconciler.run_tick(&tick, never_cancelled()).await.unwrap();
    assert_eq!(first.jobs_enqueued, 2);

    let second = reconciler.run_tick(&tick, never_cancelled()).await.unwrap();
    assert_eq!(second.jobs_enqueued, 0);
    assert_eq!(second.jobs_duplicate, 2);
    assert!(second.failures.is_empty());
    assert_eq!(harness.store.submitted_jobs().await.len(), 2);
}

#[tokio::test]
async fn worker_runs_each_minute_once() {
    let harness = Harness::new([due_to_stop()]);
    let worker = worker(&harness, WorkerId::new());

    let report = worker.run_once(never_cancelled()).await.unwrap();
    assert_eq!(report.map(|r| r.tick_id), Some(TICK_ID.to_string()));
    assert_eq!(
        harness.store.tick_status(TICK_ID).await,
        Some(Some(TickStatus::Completed))
    );

    // Same minute: collapses into the tick that already ran.
    harness.clock.advance(TimeDelta::seconds(20));
    assert!(worker.run_once(never_cancelled()).await.unwrap().is_none());
    assert_eq!(harness.store.submitted_jobs().await.len(), 1);

    harness.clock.set(t0() + TimeDelta::seconds(40));
    let next = worker.run_once(never_cancelled()).await.unwrap().unwrap();
    assert_eq!(next.tick_id, "sleep-scheduler.2024-03-05.12-01-00");
}

#[tokio::test]
async fn worker_skips_while_another_holds_the_lease() {
    let harness = Harness::new([due_to_stop()]);
    let other = WorkerId::new();
    harness
        .store
        .try_acquire(SLEEP_SCHEDULER_JOB_NAME, &other, Duration::from_secs(300), t0())
        .await
        .unwrap()
        .unwrap();
    let worker = worker(&harness, WorkerId::new());

    assert!(worker.run_once(never_cancelled()).await.unwrap().is_none());
    assert_eq!(harness.store.tick_status(TICK_ID).await, None);
    assert!(harness.store.submitted_jobs().await.is_empty());

    // The other worker's lease lapses.
    harness.clock.advance(TimeDelta::minutes(6));
    assert!(worker.run_once(never_cancelled()).await.unwrap().is_some());
}

#[tokio::test]
async fn cancelled_tick_is_recorded_and_not_rerun() {
    let harness = Harness::new([due_to_stop()]);
    let worker = worker(&harness, WorkerId::new());

    let (tx, rx) = watch::channel(true);
    let result = worker.run_once(rx).await;
    assert!(matches!(result, Err(TickError::Cancelled)));
    drop(tx);

    assert_eq!(
        harness.store.tick_status(TICK_ID).await,
        Some(Some(TickStatus::Cancelled))
    );
    assert!(harness.store.submitted_jobs().await.is_empty());

    // The lease was released.
    let other = WorkerId::new();
    assert!(harness
        .store
        .try_acquire(SLEEP_SCHEDULER_JOB_NAME, &other, Duration::from_secs(300), t0())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn aborted_tick_is_recorded() {
    let harness = Harness::new([due_to_stop()]);
    harness.store.set_settings_unavailable(true).await;
    let worker = worker(&harness, WorkerId::new());

    let result = worker.run_once(never_cancelled()).await;
    assert!(matches!(result, Err(TickError::Config(_))));
    assert_eq!(
        harness.store.tick_status(TICK_ID).await,
        Some(Some(TickStatus::Aborted))
    );
}

#[tokio::test]
async fn shutdown_stops_the_worker_loop() {
    let harness = Harness::new([due_to_stop()]);
    let worker = Arc::new(worker(&harness, WorkerId::new()));

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run(rx).await }
    });

    // The first interval tick fires immediately.
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker should stop on shutdown")
        .unwrap();
    assert_eq!(
        harness.store.tick_status(TICK_ID).await,
        Some(Some(TickStatus::Completed))
    );
}
