//! Read-only HTTP view of a running simulation.
//!
//! `GET /metrics` returns the current [`MetricsSnapshot`] and
//! `GET /boundaries/{id}` the [`BoundaryInfo`] of one boundary.

use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use hydra_scheduler::{BoundaryInfo, MetricsSnapshot, Scheduler};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Bind the status server and serve it in the background until `shutdown`
/// flips to `true` or its sender is dropped.
pub async fn spawn_metrics_server(
    port: u16,
    scheduler: Scheduler,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, "Status server listening");

    Ok(tokio::spawn(async move {
        let served = axum::serve(listener, router(scheduler))
            .with_graceful_shutdown(async move {
                shutdown.wait_for(|stop| *stop).await.ok();
            })
            .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "Status server failed");
        }
        tracing::info!("Status server stopped");
    }))
}

fn router(scheduler: Scheduler) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/boundaries/{id}", get(boundary_handler))
        .with_state(scheduler)
}

async fn metrics_handler(State(scheduler): State<Scheduler>) -> Json<MetricsSnapshot> {
    Json(scheduler.get_metrics())
}

async fn boundary_handler(
    State(scheduler): State<Scheduler>,
    Path(id): Path<String>,
) -> Result<Json<BoundaryInfo>, StatusCode> {
    scheduler
        .boundary_info(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use hydra_scheduler::{BoundaryStatus, BoxError, HydrationTask, SchedulerConfig};

    use super::*;

    fn scheduler_with(id: &str) -> Scheduler {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler
            .register(HydrationTask::new(id, |_ctx| async { Ok::<_, BoxError>(()) }))
            .unwrap();
        scheduler
    }

    #[tokio::test]
    async fn metrics_reflect_registrations() {
        let Json(snapshot) = metrics_handler(State(scheduler_with("nav"))).await;
        assert_eq!(snapshot.total_boundaries, 1);
        assert_eq!(snapshot.pending_count, 1);
    }

    #[tokio::test]
    async fn boundary_lookup_and_not_found() {
        let scheduler = scheduler_with("nav");

        let Json(info) = boundary_handler(State(scheduler.clone()), Path("nav".into()))
            .await
            .unwrap();
        assert_eq!(info.status, BoundaryStatus::Pending);

        let missing = boundary_handler(State(scheduler), Path("footer".into())).await;
        assert_eq!(missing.unwrap_err(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn server_stops_on_shutdown_signal() {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_metrics_server(0, scheduler_with("nav"), rx).await.unwrap();
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
