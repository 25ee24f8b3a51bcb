//! Integration tests for the visibility admission gate, driven through
//! `ManualVisibility`.

use std::sync::Arc;

use hydra_scheduler::{
    BoundaryStatus, BoxError, ElementHandle, HydrationEvent, HydrationTask, IntersectionEntry,
    ManualSlices, ManualVisibility, MarginLength, Scheduler, SchedulerConfig, SliceGrant,
    TriggerKind,
};

fn build(config: SchedulerConfig, visibility: &ManualVisibility) -> Scheduler {
    Scheduler::builder(config)
        .slices(Arc::new(ManualSlices::new()))
        .visibility(Arc::new(visibility.clone()))
        .build()
        .unwrap()
}

fn visible(id: &str, element: &str) -> HydrationTask {
    HydrationTask::new(id, |_ctx| async { Ok::<_, BoxError>(()) })
        .trigger(TriggerKind::Visible)
        .element(element)
}

#[tokio::test(start_paused = true)]
async fn hero_waits_for_intersection() {
    let vis = ManualVisibility::new();
    let scheduler = build(SchedulerConfig::default(), &vis);
    let hero = ElementHandle::from("el-hero");
    scheduler.register(visible("hero", "el-hero")).unwrap();
    assert!(vis.is_observed(&hero));

    let report = scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(report.tasks_run, 0);
    assert_eq!(scheduler.get_boundary_status("hero"), Some(BoundaryStatus::Pending));
    assert!(!scheduler.boundary_info("hero").unwrap().eligible);

    let mut status = scheduler.watch_status("hero").unwrap();
    assert_eq!(vis.fire(&hero, IntersectionEntry::entering(0.3)), 1);
    assert!(scheduler.boundary_info("hero").unwrap().eligible);
    // trigger_once detaches the observer.
    assert!(!vis.is_observed(&hero));

    let runner = scheduler.clone();
    let slice = tokio::spawn(async move { runner.run_slice(SliceGrant::unbounded()).await });
    status.wait_for(|s| *s == BoundaryStatus::Hydrated).await.unwrap();
    assert_eq!(slice.await.unwrap().tasks_run, 1);
}

#[tokio::test(start_paused = true)]
async fn observe_options_follow_config() {
    let vis = ManualVisibility::new();
    let mut config = SchedulerConfig::default();
    config.visibility.root = Some("scroller".into());
    config.visibility.root_margin = "100px 0px".into();
    config.visibility.threshold = 0.5;
    let scheduler = build(config, &vis);
    scheduler.register(visible("gallery", "el-gallery")).unwrap();

    let options = vis.last_options().unwrap();
    assert_eq!(options.root.as_deref(), Some("scroller"));
    assert_eq!(options.root_margin.top, MarginLength::Px(100.0));
    assert_eq!(options.root_margin.left, MarginLength::Px(0.0));
    assert_eq!(options.threshold, 0.5);
}

#[tokio::test(start_paused = true)]
async fn below_threshold_does_not_admit() {
    let vis = ManualVisibility::new();
    let mut config = SchedulerConfig::default();
    config.visibility.threshold = 0.5;
    let scheduler = build(config, &vis);
    let el = ElementHandle::from("el-chart");
    scheduler.register(visible("chart", "el-chart")).unwrap();

    vis.fire(&el, IntersectionEntry::entering(0.2));
    assert!(!scheduler.boundary_info("chart").unwrap().eligible);
    assert!(vis.is_observed(&el));

    vis.fire(&el, IntersectionEntry::entering(0.5));
    assert!(scheduler.boundary_info("chart").unwrap().eligible);
}

#[tokio::test(start_paused = true)]
async fn leaving_viewport_demotes_when_not_trigger_once() {
    let vis = ManualVisibility::new();
    let mut config = SchedulerConfig::default();
    config.visibility.trigger_once = false;
    let scheduler = build(config, &vis);
    let el = ElementHandle::from("el-feed");
    scheduler.register(visible("feed", "el-feed")).unwrap();
    let mut events = scheduler.subscribe();

    vis.fire(&el, IntersectionEntry::entering(0.1));
    assert_eq!(scheduler.get_metrics().queue_size, 1);
    vis.fire(&el, IntersectionEntry::leaving());
    assert_eq!(scheduler.get_metrics().queue_size, 0);
    assert!(vis.is_observed(&el));

    let report = scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(report.tasks_run, 0);

    vis.fire(&el, IntersectionEntry::entering(1.0));
    scheduler.run_slice(SliceGrant::unbounded()).await;
    assert_eq!(scheduler.get_boundary_status("feed"), Some(BoundaryStatus::Hydrated));
    // Started boundaries stop observing.
    assert!(!vis.is_observed(&el));

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            HydrationEvent::VisibilityEnter { .. } | HydrationEvent::VisibilityExit { .. }
        ) {
            names.push(event.name());
        }
    }
    assert_eq!(names, vec!["visibility:enter", "visibility:exit", "visibility:enter"]);
}

#[tokio::test(start_paused = true)]
async fn demotion_can_be_disabled() {
    let vis = ManualVisibility::new();
    let mut config = SchedulerConfig::default();
    config.visibility.trigger_once = false;
    config.visibility.demote_on_exit = false;
    let scheduler = build(config, &vis);
    let el = ElementHandle::from("el-feed");
    scheduler.register(visible("feed", "el-feed")).unwrap();

    vis.fire(&el, IntersectionEntry::entering(0.1));
    vis.fire(&el, IntersectionEntry::leaving());
    assert_eq!(scheduler.get_metrics().queue_size, 1);
}

#[tokio::test(start_paused = true)]
async fn trigger_once_ignores_later_exit() {
    let vis = ManualVisibility::new();
    let scheduler = build(SchedulerConfig::default(), &vis);
    let el = ElementHandle::from("el-card");
    scheduler.register(visible("card", "el-card")).unwrap();

    vis.fire(&el, IntersectionEntry::entering(0.1));
    assert_eq!(vis.fire(&el, IntersectionEntry::leaving()), 0);
    assert_eq!(scheduler.get_metrics().queue_size, 1);
}

#[tokio::test(start_paused = true)]
async fn detached_element_keeps_boundary_ineligible() {
    let vis = ManualVisibility::new();
    let scheduler = build(SchedulerConfig::default(), &vis);
    let el = ElementHandle::from("el-modal");
    scheduler.register(visible("modal", "el-modal")).unwrap();

    scheduler.detach_element("modal").unwrap();
    assert!(!vis.is_observed(&el));
    assert_eq!(vis.fire(&el, IntersectionEntry::entering(1.0)), 0);
    assert_eq!(scheduler.get_boundary_status("modal"), Some(BoundaryStatus::Pending));
    assert!(!scheduler.boundary_info("modal").unwrap().eligible);

    let remounted = ElementHandle::from("el-modal-2");
    scheduler.attach_element("modal", remounted.clone()).unwrap();
    assert!(vis.is_observed(&remounted));
    vis.fire(&remounted, IntersectionEntry::entering(1.0));
    assert!(scheduler.boundary_info("modal").unwrap().eligible);
}

#[tokio::test(start_paused = true)]
async fn visible_without_element_waits_for_attach() {
    let vis = ManualVisibility::new();
    let scheduler = build(SchedulerConfig::default(), &vis);
    scheduler
        .register(
            HydrationTask::new("lazy", |_ctx| async { Ok::<_, BoxError>(()) })
                .trigger(TriggerKind::Visible),
        )
        .unwrap();
    assert_eq!(vis.observer_count(), 0);

    scheduler.attach_element("lazy", "el-lazy").unwrap();
    assert_eq!(vis.observer_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unregister_disconnects_observer() {
    let vis = ManualVisibility::new();
    let scheduler = build(SchedulerConfig::default(), &vis);
    let el = ElementHandle::from("el-ad");
    scheduler.register(visible("ad", "el-ad")).unwrap();
    assert!(vis.is_observed(&el));

    assert!(scheduler.unregister("ad"));
    assert!(!vis.is_observed(&el));
    assert_eq!(vis.fire(&el, IntersectionEntry::entering(1.0)), 0);
}
