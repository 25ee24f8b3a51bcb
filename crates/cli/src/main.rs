mod cli;
mod metrics_server;
mod page;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use hydra_scheduler::{HydrationEvent, ManualVisibility, Scheduler, SchedulerConfig};

use crate::cli::SimArgs;
use crate::metrics_server::spawn_metrics_server;
use crate::page::Page;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = SimArgs::parse();

    let config = match &args.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SchedulerConfig::from_env().context("invalid HYDRA_* environment")?,
    };

    let visibility = ManualVisibility::new();
    let scheduler = Scheduler::builder(config)
        .visibility(Arc::new(visibility.clone()))
        .build()
        .context("failed to build scheduler")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics_server = match args.metrics_port {
        Some(port) => Some(
            spawn_metrics_server(port, scheduler.clone(), shutdown_rx)
                .await
                .with_context(|| format!("failed to bind status server on port {port}"))?,
        ),
        None => None,
    };
    let logger = tokio::spawn(log_events(scheduler.subscribe()));

    let page = Page::synthetic(args.boundaries, args.viewport_height);
    let bindings = page.mount(&scheduler).context("failed to mount synthetic page")?;
    let hydration_loop = scheduler
        .start()
        .context("hydration loop is already running")?;

    page::scroll(
        &page,
        &bindings,
        &visibility,
        scheduler.observe_options(),
        args.scroll_step,
        Duration::from_millis(args.scroll_interval_ms),
    )
    .await;

    let settle = Duration::from_millis(args.settle_timeout_ms);
    if tokio::time::timeout(settle, wait_until_settled(&scheduler))
        .await
        .is_err()
    {
        warn!(timeout_ms = args.settle_timeout_ms, "Page did not settle, forcing the rest");
        scheduler.force_hydrate_all().await;
    }

    scheduler.shutdown();
    hydration_loop.await.context("hydration loop panicked")?;

    let snapshot = scheduler.get_metrics();
    let output = if args.details {
        let boundaries: Vec<_> = bindings.iter().filter_map(|b| b.info()).collect();
        serde_json::json!({ "metrics": snapshot, "boundaries": boundaries })
    } else {
        serde_json::to_value(&snapshot).context("failed to serialize metrics")?
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("failed to serialize output")?
    );

    if let Some(server) = metrics_server {
        info!("Serving status until Ctrl-C");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        shutdown_tx.send(true).ok();
        server.await.ok();
    }

    logger.abort();
    drop(bindings);
    Ok(())
}

async fn wait_until_settled(scheduler: &Scheduler) {
    loop {
        let snapshot = scheduler.get_metrics();
        if snapshot.hydrated_count + snapshot.failed_count >= snapshot.total_boundaries {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn log_events(mut events: broadcast::Receiver<HydrationEvent>) {
    loop {
        match events.recv().await {
            Ok(HydrationEvent::Failed { boundary_id, error }) => {
                warn!(boundary_id = %boundary_id, error = %error, "Boundary failed");
            }
            Ok(HydrationEvent::SliceComplete(report)) => {
                debug!(
                    tasks = report.tasks_run,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    exit = ?report.exit,
                    "Slice complete"
                );
            }
            Ok(event) => match event.boundary_id() {
                Some(id) => debug!(event = event.name(), boundary_id = %id, "Event"),
                None => debug!(event = event.name(), "Event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
