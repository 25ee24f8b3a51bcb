//! Per-component binding over a [`Scheduler`].
//!
//! A visual component creates one [`BoundaryBinding`] when it is constructed,
//! forwards its element handle on mount and unmount, and reads status through
//! the binding. Dropping the binding unregisters the boundary.

use hydra_scheduler::{
    global, BoundaryId, BoundaryInfo, BoundaryStatus, ElementHandle, HydrationHandle,
    HydrationTask, Interaction, Priority, Scheduler, SchedulerError,
};
use tokio::sync::watch;
use tracing::debug;

/// Registration handle owned by a single visual component.
#[derive(Debug)]
pub struct BoundaryBinding {
    scheduler: Scheduler,
    id: BoundaryId,
    status: watch::Receiver<BoundaryStatus>,
}

impl BoundaryBinding {
    /// Register `task` with `scheduler` and bind to it.
    pub fn bind(scheduler: &Scheduler, task: HydrationTask) -> Result<Self, SchedulerError> {
        let id = task.id().clone();
        scheduler.register(task)?;
        let status = scheduler
            .watch_status(&id)
            .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        debug!(boundary_id = %id, "Boundary bound");
        Ok(Self {
            scheduler: scheduler.clone(),
            id,
            status,
        })
    }

    /// Bind against the process-wide scheduler.
    pub fn bind_global(task: HydrationTask) -> Result<Self, SchedulerError> {
        Self::bind(&global::scheduler(), task)
    }

    pub fn id(&self) -> &BoundaryId {
        &self.id
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The component's element is in the tree.
    pub fn mount(&self, element: impl Into<ElementHandle>) -> Result<(), SchedulerError> {
        self.scheduler.attach_element(&self.id, element)
    }

    /// The component's element left the tree. A boundary still waiting for
    /// visibility stays pending until it is mounted again.
    pub fn unmount(&self) -> Result<(), SchedulerError> {
        self.scheduler.detach_element(&self.id)
    }

    /// Last status published for this boundary.
    pub fn status(&self) -> BoundaryStatus {
        *self.status.borrow()
    }

    pub fn is_hydrated(&self) -> bool {
        self.status() == BoundaryStatus::Hydrated
    }

    /// Wait for the next status change. `None` once the boundary has been
    /// removed from the scheduler.
    pub async fn changed(&mut self) -> Option<BoundaryStatus> {
        self.status.changed().await.ok()?;
        Some(*self.status.borrow_and_update())
    }

    /// Wait until the boundary settles as `hydrated` or `error`.
    pub async fn settled(&mut self) -> Option<BoundaryStatus> {
        self.status
            .wait_for(BoundaryStatus::is_terminal)
            .await
            .ok()
            .map(|status| *status)
    }

    /// Hydrate now, bypassing visibility and the slice budget.
    pub fn hydrate(&self) -> Result<HydrationHandle, SchedulerError> {
        self.scheduler.force_hydrate(&self.id)
    }

    pub fn set_priority(&self, priority: Priority) -> Result<(), SchedulerError> {
        self.scheduler.update_priority(&self.id, priority)
    }

    /// Forward an interaction that reached the component before it was
    /// interactive. Returns whether it was kept for replay.
    pub fn record_interaction(&self, interaction: Interaction) -> Result<bool, SchedulerError> {
        self.scheduler.record_interaction(&self.id, interaction)
    }

    pub fn cancel(&self) -> Result<bool, SchedulerError> {
        self.scheduler.cancel(&self.id)
    }

    /// Return a settled or cancelled boundary to `pending`.
    pub fn reset(&self) -> Result<(), SchedulerError> {
        self.scheduler.reset_boundary(&self.id)
    }

    pub fn info(&self) -> Option<BoundaryInfo> {
        self.scheduler.boundary_info(&self.id)
    }
}

impl Drop for BoundaryBinding {
    fn drop(&mut self) {
        if self.scheduler.unregister(&self.id) {
            debug!(boundary_id = %self.id, "Boundary unbound");
        }
    }
}
