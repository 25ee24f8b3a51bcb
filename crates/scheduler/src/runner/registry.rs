use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::error::SchedulerError;
use crate::events::HydrationEvent;
use crate::metrics::MetricsSnapshot;
use crate::task::HydrationTask;
use crate::types::{
    BoundaryId, BoundaryStatus, ElementHandle, Interaction, InteractionStrategy, Priority,
    TriggerKind,
};

use super::core::{Admission, Admitted, Scheduler};

/// Detailed, serializable view of one boundary.
#[derive(Debug, Clone, Serialize)]
pub struct BoundaryInfo {
    pub boundary_id: BoundaryId,
    pub status: BoundaryStatus,
    pub priority: Priority,
    pub trigger: TriggerKind,
    /// Waiting in the eligible queue.
    pub eligible: bool,
    pub element: Option<ElementHandle>,
    pub cancellable: bool,
    pub above_fold: bool,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
    #[serde(serialize_with = "crate::metrics::millis::serialize_opt")]
    pub last_duration: Option<Duration>,
    pub queued_interactions: usize,
    pub metadata: Map<String, Value>,
}

impl Scheduler {
    /// Register a boundary in `pending`.
    ///
    /// `manual`, `idle` and `immediate` boundaries are eligible at once;
    /// `visible` boundaries wait for their element to intersect. An
    /// `immediate` boundary is also force-hydrated when a runtime is present.
    pub fn register(&self, task: HydrationTask) -> Result<(), SchedulerError> {
        let trigger = task.trigger;
        let priority = task.priority;
        let (id, admitted) = {
            let mut inner = self.shared.lock();
            if inner.tasks.contains_key(task.id.as_str()) {
                return Err(SchedulerError::DuplicateBoundary(task.id.clone()));
            }
            let capacity = self.shared.config.max_queue_size;
            if inner.pending_count() >= capacity {
                return Err(SchedulerError::QueueFull { capacity });
            }
            let id = inner.insert(task);
            let admitted = inner.admit(id.as_str());
            (id, admitted)
        };

        info!(
            boundary_id = %id,
            priority = priority.as_str(),
            trigger = ?trigger,
            "Registered boundary"
        );
        self.shared.events.emit(HydrationEvent::Registered {
            boundary_id: id.clone(),
            priority,
            trigger,
        });

        match admitted {
            Some(Admitted::Observe { generation, element }) => {
                self.shared.observe_or_warn(&id, generation, element);
            }
            Some(Admitted::Queued) if trigger == TriggerKind::Immediate => {
                if tokio::runtime::Handle::try_current().is_ok() {
                    self.force_hydrate(id.as_str())?;
                } else {
                    self.shared.work_ready.notify_one();
                }
            }
            Some(Admitted::Queued) => self.shared.work_ready.notify_one(),
            None => {}
        }
        Ok(())
    }

    /// Remove a boundary. A `hydrating` boundary is flagged for cancellation
    /// and its eventual result discarded. Returns `false` if it was unknown.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = {
            let mut guard = self.shared.lock();
            let inner = &mut *guard;
            let Some(entry) = inner.tasks.remove(id) else {
                return false;
            };
            inner.queue.remove(id);
            if entry.status == BoundaryStatus::Hydrating {
                entry.cancel.cancel();
            }
            if entry.status != BoundaryStatus::Hydrated {
                inner
                    .metrics
                    .on_removed(entry.status == BoundaryStatus::Error, entry.task.above_fold);
            }
            entry
        };
        debug!(boundary_id = %id, status = %removed.status, "Unregistered boundary");
        true
    }

    /// Cooperatively cancel a boundary without removing it.
    ///
    /// A queued boundary is withdrawn and parked; a running one reverts to
    /// `pending` at its next suspension point. Returns `false` when there was
    /// nothing to cancel or the task is not cancellable.
    pub fn cancel(&self, id: &str) -> Result<bool, SchedulerError> {
        let (cancelled, released) = {
            let mut guard = self.shared.lock();
            let inner = &mut *guard;
            let entry = inner
                .tasks
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(id.into()))?;
            if !entry.task.cancellable {
                debug!(boundary_id = %id, "Boundary is not cancellable");
                return Ok(false);
            }
            match (entry.status, entry.admission) {
                (BoundaryStatus::Pending, Admission::Parked) => (false, None),
                (BoundaryStatus::Pending, _) => {
                    inner.queue.remove(id);
                    entry.admission = Admission::Parked;
                    (true, entry.subscription.take())
                }
                (BoundaryStatus::Hydrating, _) => {
                    entry.cancel.cancel();
                    return Ok(true);
                }
                _ => (false, None),
            }
        };
        drop(released);
        if cancelled {
            debug!(boundary_id = %id, "Cancelled queued boundary");
            self.shared.events.emit(HydrationEvent::Cancelled { boundary_id: id.into() });
        }
        Ok(cancelled)
    }

    /// Explicit reset back to `pending`, re-admitting through the gate.
    ///
    /// Fails with `InvalidTransition` while the boundary is `hydrating`.
    pub fn reset_boundary(&self, id: &str) -> Result<(), SchedulerError> {
        let (boundary_id, admitted) = {
            let mut guard = self.shared.lock();
            let inner = &mut *guard;
            let entry = inner
                .tasks
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(id.into()))?;
            let boundary_id = entry.task.id.clone();
            let above_fold = entry.task.above_fold;
            match entry.status {
                BoundaryStatus::Hydrating => {
                    return Err(SchedulerError::InvalidTransition {
                        id: boundary_id,
                        from: BoundaryStatus::Hydrating,
                    })
                }
                BoundaryStatus::Hydrated => inner.metrics.on_reset(true, above_fold),
                BoundaryStatus::Error => inner.metrics.on_reset(false, above_fold),
                BoundaryStatus::Pending => {}
            }
            entry.last_error = None;
            entry.interactions.clear();
            entry.set_status(BoundaryStatus::Pending);
            inner.queue.remove(id);
            (boundary_id, inner.admit(id))
        };

        debug!(boundary_id = %boundary_id, "Reset boundary to pending");
        match admitted {
            Some(Admitted::Observe { generation, element }) => {
                self.shared.observe_or_warn(&boundary_id, generation, element);
            }
            Some(Admitted::Queued) => self.shared.work_ready.notify_one(),
            None => {}
        }
        Ok(())
    }

    /// Tear everything down: cancel running tasks, clear the registry and
    /// queue, and forget all metrics including latches.
    pub fn reset(&self) {
        let drained: Vec<_> = {
            let mut guard = self.shared.lock();
            let inner = &mut *guard;
            let drained: Vec<_> = inner.tasks.drain().map(|(_, entry)| entry).collect();
            for entry in &drained {
                if entry.status == BoundaryStatus::Hydrating {
                    entry.cancel.cancel();
                }
            }
            inner.queue = Default::default();
            inner.metrics.reset();
            drained
        };
        info!(boundaries = drained.len(), "Scheduler reset");
    }

    /// Reorder a boundary for future dequeues. A running task is unaffected.
    pub fn update_priority(&self, id: &str, priority: Priority) -> Result<(), SchedulerError> {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        let entry = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.into()))?;
        entry.task.priority = priority;
        inner.queue.reprioritize(id, priority);
        debug!(boundary_id = %id, priority = priority.as_str(), "Updated boundary priority");
        Ok(())
    }

    /// Bind an element on mount. A waiting `visible` boundary starts
    /// observing it.
    pub fn attach_element(
        &self,
        id: &str,
        element: impl Into<ElementHandle>,
    ) -> Result<(), SchedulerError> {
        let element = element.into();
        let observe = {
            let mut inner = self.shared.lock();
            let entry = inner
                .tasks
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(id.into()))?;
            entry.task.element = Some(element.clone());
            let waiting = entry.task.trigger == TriggerKind::Visible
                && entry.status == BoundaryStatus::Pending
                && entry.admission == Admission::Waiting;
            waiting.then(|| (entry.task.id.clone(), entry.generation, entry.subscription.take()))
        };
        if let Some((boundary_id, generation, previous)) = observe {
            drop(previous);
            self.shared.observe_element(&boundary_id, generation, &element);
        }
        Ok(())
    }

    /// Unbind the element on unmount. The boundary keeps its state; a
    /// waiting one stays ineligible.
    pub fn detach_element(&self, id: &str) -> Result<(), SchedulerError> {
        let released = {
            let mut inner = self.shared.lock();
            let entry = inner
                .tasks
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(id.into()))?;
            entry.task.element = None;
            entry.subscription.take()
        };
        drop(released);
        debug!(boundary_id = %id, "Detached boundary element");
        Ok(())
    }

    /// Capture an interaction that arrived before the boundary was
    /// interactive. Returns whether it was kept for replay.
    pub fn record_interaction(
        &self,
        id: &str,
        interaction: Interaction,
    ) -> Result<bool, SchedulerError> {
        let strategy = self.shared.config.interaction_strategy;
        let (kept, released, wake) = {
            let mut guard = self.shared.lock();
            let inner = &mut *guard;
            let entry = inner
                .tasks
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(id.into()))?;
            if entry.status == BoundaryStatus::Hydrated {
                return Ok(false);
            }
            match strategy {
                InteractionStrategy::Discard => (false, None, false),
                InteractionStrategy::Replay => {
                    entry.push_interaction(interaction);
                    (true, None, false)
                }
                InteractionStrategy::Prioritize => {
                    entry.push_interaction(interaction);
                    entry.task.priority = Priority::Critical;
                    let mut released = None;
                    let mut wake = false;
                    if entry.status == BoundaryStatus::Pending {
                        if entry.admission == Admission::Eligible {
                            inner.queue.reprioritize(id, Priority::Critical);
                        } else {
                            released = entry.subscription.take();
                            entry.admission = Admission::Eligible;
                            inner.queue.push(entry.task.id.clone(), Priority::Critical, entry.seq);
                        }
                        wake = true;
                    }
                    (true, released, wake)
                }
            }
        };
        drop(released);
        if wake {
            debug!(boundary_id = %id, "Interaction promoted boundary to critical");
            self.shared.work_ready.notify_one();
        }
        Ok(kept)
    }

    pub fn pause(&self) {
        self.shared.lock().paused = true;
        info!("Hydration paused");
        self.shared.events.emit(HydrationEvent::Paused);
    }

    pub fn resume(&self) {
        self.shared.lock().paused = false;
        info!("Hydration resumed");
        self.shared.events.emit(HydrationEvent::Resumed);
        self.shared.work_ready.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    pub fn get_boundary_status(&self, id: &str) -> Option<BoundaryStatus> {
        self.shared.lock().tasks.get(id).map(|e| e.status)
    }

    pub fn boundary_info(&self, id: &str) -> Option<BoundaryInfo> {
        let inner = self.shared.lock();
        let entry = inner.tasks.get(id)?;
        Some(BoundaryInfo {
            boundary_id: entry.task.id.clone(),
            status: entry.status,
            priority: entry.task.priority,
            trigger: entry.task.trigger,
            eligible: inner.queue.contains(id),
            element: entry.task.element.clone(),
            cancellable: entry.task.cancellable,
            above_fold: entry.task.above_fold,
            enqueued_at: entry.enqueued_at,
            last_error: entry.last_error.as_ref().map(ToString::to_string),
            last_duration: entry.last_duration,
            queued_interactions: entry.interactions.len(),
            metadata: entry.task.metadata.clone(),
        })
    }

    /// Subscribe to one boundary's status. The receiver closes when the
    /// boundary is unregistered.
    pub fn watch_status(&self, id: &str) -> Option<watch::Receiver<BoundaryStatus>> {
        self.shared.lock().tasks.get(id).map(|e| e.status_tx.subscribe())
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let inner = self.shared.lock();
        inner.metrics.snapshot(inner.queue.len())
    }

    /// Registered boundaries, in no particular order.
    pub fn boundary_ids(&self) -> Vec<BoundaryId> {
        self.shared.lock().tasks.keys().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HydrationEvent> {
        self.shared.events.subscribe()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("Scheduler")
            .field("boundaries", &inner.tasks.len())
            .field("queued", &inner.queue.len())
            .field("paused", &inner.paused)
            .finish()
    }
}
