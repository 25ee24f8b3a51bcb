//! Visibility admission gate.
//!
//! A `visible` boundary waits outside the eligible queue until its element
//! reports a qualifying intersection. The host observer talks back through a
//! [`VisibilitySink`], which holds only a weak reference so an observer that
//! outlives the scheduler is harmless.

use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::events::HydrationEvent;
use crate::host::IntersectionEntry;
use crate::runner::{Admission, Shared};
use crate::types::{BoundaryId, BoundaryStatus, ElementHandle};

/// Receives intersection changes for one boundary admission.
#[derive(Clone)]
pub struct VisibilitySink {
    shared: Weak<Shared>,
    boundary_id: BoundaryId,
    generation: u64,
}

impl VisibilitySink {
    pub fn boundary_id(&self) -> &BoundaryId {
        &self.boundary_id
    }

    /// Report an intersection change. Ignored once the scheduler is gone or
    /// the boundary has been re-admitted, removed or started.
    pub fn notify(&self, entry: IntersectionEntry) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_intersection(&self.boundary_id, self.generation, entry);
        }
    }
}

impl std::fmt::Debug for VisibilitySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilitySink")
            .field("boundary_id", &self.boundary_id)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Shared {
    /// Start observing `element` for the admission identified by `generation`.
    pub(crate) fn observe_element(
        self: &Arc<Self>,
        id: &BoundaryId,
        generation: u64,
        element: &ElementHandle,
    ) {
        let sink = VisibilitySink {
            shared: Arc::downgrade(self),
            boundary_id: id.clone(),
            generation,
        };
        let subscription = self.visibility.observe(element, &self.observe_options, sink);

        // The observer may already have reported a qualifying entry.
        let trigger_once = self.config.visibility.trigger_once;
        let leftover = {
            let mut inner = self.lock();
            match inner.tasks.get_mut(id.as_str()) {
                Some(entry)
                    if entry.generation == generation
                        && entry.status == BoundaryStatus::Pending
                        && (entry.admission == Admission::Waiting
                            || (entry.admission == Admission::Eligible && !trigger_once)) =>
                {
                    entry.subscription.replace(subscription)
                }
                _ => Some(subscription),
            }
        };
        drop(leftover);
        debug!(boundary_id = %id, element = %element, "Observing boundary element");
    }

    pub(crate) fn on_intersection(
        &self,
        id: &BoundaryId,
        generation: u64,
        change: IntersectionEntry,
    ) {
        let cfg = &self.config.visibility;
        let mut event = None;
        let mut released = None;
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let Some(entry) = inner.tasks.get_mut(id.as_str()) else {
                return;
            };
            if entry.generation != generation || entry.status != BoundaryStatus::Pending {
                return;
            }

            if change.qualifies(cfg.threshold) {
                if entry.admission == Admission::Waiting {
                    entry.admission = Admission::Eligible;
                    inner.queue.push(entry.task.id.clone(), entry.task.priority, entry.seq);
                    event = Some(HydrationEvent::VisibilityEnter {
                        boundary_id: id.clone(),
                        ratio: change.ratio,
                    });
                }
                if cfg.trigger_once {
                    released = entry.subscription.take();
                }
            } else if !change.is_intersecting
                && !cfg.trigger_once
                && cfg.demote_on_exit
                && entry.admission == Admission::Eligible
            {
                inner.queue.remove(id.as_str());
                entry.admission = Admission::Waiting;
                event = Some(HydrationEvent::VisibilityExit { boundary_id: id.clone() });
            }
        }
        drop(released);

        match event {
            Some(event @ HydrationEvent::VisibilityEnter { .. }) => {
                debug!(boundary_id = %id, ratio = change.ratio, "Boundary became visible");
                self.events.emit(event);
                self.work_ready.notify_one();
            }
            Some(event) => {
                debug!(boundary_id = %id, "Boundary left the viewport, demoted to waiting");
                self.events.emit(event);
            }
            None => {}
        }
    }

    /// Route an admission result for a visible boundary.
    pub(crate) fn observe_or_warn(
        self: &Arc<Self>,
        id: &BoundaryId,
        generation: u64,
        element: Option<ElementHandle>,
    ) {
        match element {
            Some(element) => self.observe_element(id, generation, &element),
            None => warn!(
                boundary_id = %id,
                "Visible boundary has no element bound; it stays pending until one is attached"
            ),
        }
    }
}
