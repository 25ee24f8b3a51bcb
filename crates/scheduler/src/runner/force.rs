use std::cmp::Reverse;

use tokio::sync::watch;
use tracing::info;

use crate::error::SchedulerError;
use crate::types::{BoundaryId, BoundaryStatus};

use super::core::Scheduler;

/// Resolves when a forced run settles.
#[derive(Debug)]
pub struct HydrationHandle {
    boundary_id: BoundaryId,
    rx: watch::Receiver<BoundaryStatus>,
}

impl HydrationHandle {
    pub fn boundary_id(&self) -> &BoundaryId {
        &self.boundary_id
    }

    /// Latest observed status.
    pub fn status(&self) -> BoundaryStatus {
        *self.rx.borrow()
    }

    /// Wait until the boundary is no longer `hydrating`.
    ///
    /// Returns `None` if the boundary was unregistered first.
    pub async fn wait(mut self) -> Option<BoundaryStatus> {
        self.rx
            .wait_for(|status| *status != BoundaryStatus::Hydrating)
            .await
            .ok()
            .map(|status| *status)
    }
}

impl Scheduler {
    /// Run a boundary now, bypassing the slice budget and the visibility
    /// gate. The task timeout still applies.
    ///
    /// A terminal boundary is not re-run: the handle resolves to its current
    /// status. A boundary already hydrating is not started twice; the handle
    /// follows the existing run. Must be called within a Tokio runtime.
    pub fn force_hydrate(&self, id: &str) -> Result<HydrationHandle, SchedulerError> {
        let (boundary_id, rx, claim) = {
            let mut inner = self.shared.lock();
            let entry = inner
                .tasks
                .get(id)
                .ok_or_else(|| SchedulerError::NotFound(id.into()))?;
            let boundary_id = entry.task.id.clone();
            let rx = entry.status_tx.subscribe();
            (boundary_id, rx, inner.claim(id, true))
        };

        if let Some(claim) = claim {
            info!(boundary_id = %boundary_id, "Force-hydrating boundary");
            let this = self.clone();
            tokio::spawn(async move {
                this.execute(claim).await;
            });
        }
        Ok(HydrationHandle { boundary_id, rx })
    }

    /// Hydrate every non-terminal boundary.
    ///
    /// Pending boundaries run one after another in priority order (FIFO
    /// within a band); boundaries already hydrating finish on their own and
    /// are awaited. Returns each boundary with its settled status, `None`
    /// for those unregistered meanwhile.
    pub async fn force_hydrate_all(&self) -> Vec<(BoundaryId, Option<BoundaryStatus>)> {
        let (order, in_flight) = {
            let inner = self.shared.lock();
            let mut pending: Vec<_> = inner
                .tasks
                .values()
                .filter(|e| e.status == BoundaryStatus::Pending)
                .map(|e| (Reverse(e.task.priority), e.seq, e.task.id.clone()))
                .collect();
            pending.sort();
            let in_flight: Vec<HydrationHandle> = inner
                .tasks
                .values()
                .filter(|e| e.status == BoundaryStatus::Hydrating)
                .map(|e| HydrationHandle {
                    boundary_id: e.task.id.clone(),
                    rx: e.status_tx.subscribe(),
                })
                .collect();
            (pending, in_flight)
        };
        info!(pending = order.len(), in_flight = in_flight.len(), "Force-hydrating all boundaries");

        let mut settled = Vec::with_capacity(order.len() + in_flight.len());
        for (_, _, id) in order {
            let claim = self.shared.lock().claim(id.as_str(), true);
            let status = match claim {
                Some(claim) => self.execute(claim).await,
                // Picked up by the loop or a concurrent force in the meantime.
                None => match self.watch_status(id.as_str()) {
                    Some(rx) => {
                        HydrationHandle {
                            boundary_id: id.clone(),
                            rx,
                        }
                        .wait()
                        .await
                    }
                    None => None,
                },
            };
            settled.push((id, status));
        }
        for handle in in_flight {
            let id = handle.boundary_id.clone();
            settled.push((id, handle.wait().await));
        }
        settled
    }
}
