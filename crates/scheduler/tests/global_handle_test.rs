//! The process-wide scheduler. Kept in one test since the handle is global.

use hydra_scheduler::{global, BoxError, HydrationTask, Scheduler, SchedulerConfig};

#[tokio::test(start_paused = true)]
async fn global_handle_lifecycle() {
    assert!(!global::is_initialized());

    let first = global::scheduler();
    assert!(global::is_initialized());
    first
        .register(HydrationTask::new("nav", |_ctx| async { Ok::<_, BoxError>(()) }))
        .unwrap();

    // Same instance on every call.
    let again = global::scheduler();
    assert!(again.get_boundary_status("nav").is_some());

    global::reset();
    assert!(!global::is_initialized());
    assert_eq!(first.get_metrics().total_boundaries, 0);

    // A fresh instance after reset does not see old registrations.
    let fresh = global::scheduler();
    assert!(fresh.get_boundary_status("nav").is_none());

    let mut config = SchedulerConfig::default();
    config.debug = true;
    let previous = global::install(Scheduler::new(config));
    assert!(previous.is_some());
    assert!(global::scheduler().config().debug);

    global::reset();
}
