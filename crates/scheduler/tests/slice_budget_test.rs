//! Integration tests for the budgeted execution loop.
//!
//! Slices are driven directly through `run_slice` with hand-made grants and a
//! paused Tokio clock, so every elapsed duration is exact.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hydra_scheduler::{
    BoundaryStatus, BoxError, HydrationContext, HydrationError, HydrationTask, ManualSlices,
    Priority, Scheduler, SchedulerConfig, SliceExit, SliceGrant,
};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.budget.yield_to_main = false;
    config
}

fn scheduler_with(config: SchedulerConfig, slices: Arc<ManualSlices>) -> Scheduler {
    Scheduler::builder(config).slices(slices).build().unwrap()
}

fn sleeping(id: &str, millis: u64, log: &Arc<Mutex<Vec<String>>>) -> HydrationTask {
    let log = Arc::clone(log);
    HydrationTask::new(id, move |ctx: HydrationContext| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(ctx.boundary_id().to_string());
            tokio::time::sleep(ms(millis)).await;
            Ok::<_, BoxError>(())
        }
    })
}

/// Completes on first poll, never suspending.
fn recording(id: &str, log: &Arc<Mutex<Vec<String>>>) -> HydrationTask {
    let log = Arc::clone(log);
    HydrationTask::new(id, move |ctx: HydrationContext| {
        log.lock().unwrap().push(ctx.boundary_id().to_string());
        async { Ok::<_, BoxError>(()) }
    })
}

#[tokio::test(start_paused = true)]
async fn fifo_within_priority_band() {
    let log = Arc::default();
    let scheduler = scheduler_with(config(), Arc::new(ManualSlices::new()));
    for id in ["x", "y", "z"] {
        scheduler.register(sleeping(id, 0, &log)).unwrap();
    }
    scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(*log.lock().unwrap(), vec!["x", "y", "z"]);
}

#[tokio::test(start_paused = true)]
async fn slice_stops_at_task_limit() {
    let log = Arc::default();
    let scheduler = scheduler_with(config(), Arc::new(ManualSlices::new()));
    for i in 0..6 {
        scheduler.register(sleeping(&format!("b{i}"), 0, &log)).unwrap();
    }

    let report = scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(report.tasks_run, 4);
    assert_eq!(report.exit, SliceExit::TaskLimit);
    assert_eq!(report.remaining, 2);

    let report = scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(report.tasks_run, 2);
    assert_eq!(report.exit, SliceExit::Drained);
    assert_eq!(scheduler.get_metrics().hydrated_count, 6);
}

#[tokio::test(start_paused = true)]
async fn no_task_starts_past_frame_limit_minus_idle() {
    let log = Arc::default();
    let scheduler = scheduler_with(config(), Arc::new(ManualSlices::new()));
    for i in 0..4 {
        scheduler.register(sleeping(&format!("b{i}"), 5, &log)).unwrap();
    }

    let report = scheduler.run_slice(SliceGrant::unbounded()).await;
    // 16ms frame, 4ms idle headroom.
    assert_eq!(report.budget, ms(12));
    assert_eq!(report.exit, SliceExit::BudgetExhausted);
    assert_eq!(report.tasks_run, 3);
    assert!(report.task_offsets.iter().all(|offset| *offset < report.budget));
    assert_eq!(report.remaining, 1);
}

#[tokio::test(start_paused = true)]
async fn host_deadline_shrinks_budget() {
    let log = Arc::default();
    let scheduler = scheduler_with(config(), Arc::new(ManualSlices::new()));
    scheduler.register(sleeping("a", 5, &log)).unwrap();
    scheduler.register(sleeping("b", 5, &log)).unwrap();

    let report = scheduler.run_slice(SliceGrant::with_remaining(ms(6))).await;
    assert_eq!(report.budget, ms(2));
    assert_eq!(report.tasks_run, 1);

    // Budget never exceeds the frame limit, whatever the host reports.
    let report = scheduler.run_slice(SliceGrant::with_remaining(ms(500))).await;
    assert_eq!(report.budget, ms(12));
}

#[tokio::test(start_paused = true)]
async fn timed_out_deadline_uses_full_frame() {
    let log = Arc::default();
    let scheduler = scheduler_with(config(), Arc::new(ManualSlices::new()));
    scheduler.register(sleeping("a", 0, &log)).unwrap();

    let report = scheduler.run_slice(SliceGrant::timed_out()).await;
    assert_eq!(report.budget, ms(12));
    assert_eq!(report.tasks_run, 1);
}

#[tokio::test(start_paused = true)]
async fn boundary_eligible_mid_slice_waits_for_next_slice() {
    let scheduler = scheduler_with(config(), Arc::new(ManualSlices::new()));
    let handle = scheduler.clone();
    scheduler
        .register(HydrationTask::new("parent", move |_ctx| {
            let handle = handle.clone();
            async move {
                handle.register(
                    HydrationTask::new("child", |_ctx| async { Ok::<_, BoxError>(()) })
                        .priority(Priority::Critical),
                )?;
                Ok::<_, BoxError>(())
            }
        }))
        .unwrap();

    let report = scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(report.tasks_run, 1);
    assert_eq!(report.remaining, 1);
    assert_eq!(scheduler.get_boundary_status("child"), Some(BoundaryStatus::Pending));

    scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(scheduler.get_boundary_status("child"), Some(BoundaryStatus::Hydrated));
}

#[tokio::test(start_paused = true)]
async fn timeout_marks_error_and_loop_proceeds() {
    let mut cfg = config();
    cfg.task_timeout_ms = 50;
    let scheduler = scheduler_with(cfg, Arc::new(ManualSlices::new()));
    let log = Arc::default();
    let timeouts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&timeouts);

    scheduler
        .register(
            sleeping("hang", 3_600_000, &log)
                .priority(Priority::High)
                .on_error(move |e: &HydrationError| seen.lock().unwrap().push(e.is_timeout())),
        )
        .unwrap();
    scheduler.register(sleeping("next", 1, &log)).unwrap();

    let report = scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(report.tasks_run, 1);
    assert_eq!(report.elapsed, ms(50));
    assert_eq!(scheduler.get_boundary_status("hang"), Some(BoundaryStatus::Error));
    assert_eq!(*timeouts.lock().unwrap(), vec![true]);

    scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(scheduler.get_boundary_status("next"), Some(BoundaryStatus::Hydrated));

    let snap = scheduler.get_metrics();
    assert_eq!(snap.failed_count, 1);
    assert_eq!(snap.hydrated_count, 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_wins_over_cancel_requested_mid_run() {
    let mut cfg = config();
    cfg.task_timeout_ms = 100;
    let scheduler = scheduler_with(cfg, Arc::new(ManualSlices::new()));
    let log = Arc::default();
    scheduler.register(sleeping("slow", 1_000, &log)).unwrap();

    let runner = scheduler.clone();
    let slice = tokio::spawn(async move { runner.run_slice(SliceGrant::unbounded()).await });
    tokio::time::sleep(ms(10)).await;
    assert!(scheduler.cancel("slow").unwrap());

    let report = slice.await.unwrap();
    assert_eq!(report.elapsed, ms(100));
    assert_eq!(scheduler.get_boundary_status("slow"), Some(BoundaryStatus::Error));
    let info = scheduler.boundary_info("slow").unwrap();
    assert!(info.last_error.unwrap().contains("timed out"));
    assert_eq!(scheduler.get_metrics().failed_count, 1);
}

#[tokio::test(start_paused = true)]
async fn single_completion_sets_average_and_p95() {
    let log = Arc::default();
    let scheduler = scheduler_with(config(), Arc::new(ManualSlices::new()));
    scheduler.register(sleeping("chart", 42, &log)).unwrap();

    scheduler.run_slice(SliceGrant::unbounded()).await;

    let snap = scheduler.get_metrics();
    assert_eq!(snap.average_hydration_duration, ms(42));
    assert_eq!(snap.p95_hydration_duration, ms(42));
    assert_eq!(snap.time_to_full_hydration, Some(ms(42)));
}

#[tokio::test(start_paused = true)]
async fn yield_to_main_ends_slice_on_pending_input() {
    let log = Arc::default();
    let slices = Arc::new(ManualSlices::new());
    let mut cfg = config();
    cfg.budget.yield_to_main = true;
    let scheduler = scheduler_with(cfg, slices.clone());
    for id in ["a", "b", "c"] {
        scheduler.register(sleeping(id, 0, &log)).unwrap();
    }

    slices.set_input_pending(true);
    let report = scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(report.exit, SliceExit::Yielded);
    assert_eq!(report.tasks_run, 1);

    slices.set_input_pending(false);
    let report = scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(report.tasks_run, 2);
    assert_eq!(report.exit, SliceExit::Drained);
}

#[tokio::test(start_paused = true)]
async fn yield_to_main_lets_host_work_run_between_tasks() {
    let log: Arc<Mutex<Vec<String>>> = Arc::default();
    // Built-in primitive, which never reports pending input.
    let scheduler = Scheduler::new(SchedulerConfig::default());
    assert!(scheduler.config().budget.yield_to_main);
    for id in ["a", "b"] {
        scheduler.register(recording(id, &log)).unwrap();
    }

    let host_log = Arc::clone(&log);
    let host = tokio::spawn(async move { host_log.lock().unwrap().push("host".into()) });
    let report = scheduler.run_slice(SliceGrant::unbounded()).await;
    host.await.unwrap();

    assert_eq!(report.exit, SliceExit::Drained);
    assert_eq!(*log.lock().unwrap(), vec!["a", "host", "b"]);
}

#[tokio::test(start_paused = true)]
async fn without_yield_to_main_tasks_run_back_to_back() {
    let log: Arc<Mutex<Vec<String>>> = Arc::default();
    let scheduler = Scheduler::new(config());
    for id in ["a", "b"] {
        scheduler.register(recording(id, &log)).unwrap();
    }

    let host_log = Arc::clone(&log);
    let host = tokio::spawn(async move { host_log.lock().unwrap().push("host".into()) });
    scheduler.run_slice(SliceGrant::unbounded()).await;
    host.await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "host"]);
}

#[tokio::test(start_paused = true)]
async fn slice_report_serializes_in_millis() {
    let log = Arc::default();
    let scheduler = scheduler_with(config(), Arc::new(ManualSlices::new()));
    scheduler.register(sleeping("a", 3, &log)).unwrap();

    let report = scheduler.run_slice(SliceGrant::unbounded()).await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["budget"], 12.0);
    assert_eq!(json["elapsed"], 3.0);
    assert_eq!(json["exit"], "drained");
    assert_eq!(json["task_offsets"][0], 0.0);
}
