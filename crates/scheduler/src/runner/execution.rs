use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::HydrationError;
use crate::events::HydrationEvent;
use crate::host::SliceGrant;
use crate::task::Cooperative;
use crate::types::{BoundaryId, BoundaryStatus};

use super::core::{Admission, Claim, Scheduler};

/// Why a slice ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceExit {
    /// No eligible boundary left in the ready lane.
    Drained,
    /// `max_tasks_per_frame` tasks ran.
    TaskLimit,
    /// Elapsed time reached `budget`.
    BudgetExhausted,
    /// The host reported pending input.
    Yielded,
    Paused,
    Shutdown,
}

/// Summary of one execution slice.
#[derive(Debug, Clone, Serialize)]
pub struct SliceReport {
    pub tasks_run: usize,
    #[serde(serialize_with = "crate::metrics::millis::serialize")]
    pub elapsed: Duration,
    /// Window within which a task may start: the frame limit or the
    /// host-reported remainder, minus `min_idle_time`.
    #[serde(serialize_with = "crate::metrics::millis::serialize")]
    pub budget: Duration,
    pub exit: SliceExit,
    /// Eligible boundaries still queued after the slice.
    pub remaining: usize,
    /// Offset from the slice start at which each task started.
    #[serde(serialize_with = "crate::metrics::millis::serialize_seq")]
    pub task_offsets: Vec<Duration>,
}

/// Clears the running flag however the loop ends, including when its task
/// is aborted or its runtime shuts down.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How a single run ended.
pub(crate) enum Outcome {
    Hydrated(Duration),
    Failed(HydrationError),
    Cancelled,
}

impl Scheduler {
    /// Run the background loop until [`Scheduler::shutdown`].
    ///
    /// Each iteration waits for eligible work, asks the slice primitive for a
    /// slice and drains the queue within it.
    pub async fn run(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Hydration loop already running");
            return;
        }
        let _running = RunningGuard(&self.shared.running);
        info!(slices = self.shared.slices.name(), "Hydration loop started");

        loop {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let runnable = {
                let inner = self.shared.lock();
                !inner.paused && !inner.queue.is_empty()
            };
            if !runnable {
                tokio::select! {
                    _ = self.shared.work_ready.notified() => continue,
                    _ = self.shared.shutdown_notify.notified() => continue,
                }
            }

            let grant = tokio::select! {
                grant = self.shared.slices.request_slice() => grant,
                _ = self.shared.shutdown_notify.notified() => continue,
            };
            self.run_slice(grant).await;
        }

        info!("Hydration loop stopped");
    }

    /// Execute one slice under the budget derived from `grant`.
    ///
    /// Only boundaries eligible when the slice begins are considered; a task
    /// never starts once `budget` has elapsed.
    pub async fn run_slice(&self, grant: SliceGrant) -> SliceReport {
        let limits = &self.shared.config.budget;
        let frame = limits.frame_time_limit();
        let window = match grant.time_remaining {
            Some(remaining) if !grant.did_timeout => remaining.min(frame),
            _ => frame,
        };
        let budget = window.saturating_sub(limits.min_idle_time());

        let started = Instant::now();
        self.shared.lock().queue.begin_slice();

        let mut task_offsets = Vec::new();
        let exit = loop {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                break SliceExit::Shutdown;
            }
            if task_offsets.len() >= limits.max_tasks_per_frame {
                break SliceExit::TaskLimit;
            }
            if started.elapsed() >= budget {
                break SliceExit::BudgetExhausted;
            }
            let claim = {
                let mut inner = self.shared.lock();
                if inner.paused {
                    break SliceExit::Paused;
                }
                inner.claim_next()
            };
            let Some(claim) = claim else {
                break SliceExit::Drained;
            };

            task_offsets.push(started.elapsed());
            self.execute(claim).await;

            if limits.yield_to_main {
                tokio::task::yield_now().await;
                if self.shared.slices.should_yield() {
                    break SliceExit::Yielded;
                }
            }
        };

        let report = SliceReport {
            tasks_run: task_offsets.len(),
            elapsed: started.elapsed(),
            budget,
            exit,
            remaining: self.shared.lock().queue.len(),
            task_offsets,
        };
        if self.shared.config.debug {
            info!(
                tasks = report.tasks_run,
                elapsed_ms = report.elapsed.as_millis() as u64,
                budget_ms = report.budget.as_millis() as u64,
                exit = ?report.exit,
                remaining = report.remaining,
                "Slice complete"
            );
        } else {
            debug!(
                tasks = report.tasks_run,
                exit = ?report.exit,
                remaining = report.remaining,
                "Slice complete"
            );
        }
        self.shared.events.emit(HydrationEvent::SliceComplete(report.clone()));
        report
    }

    /// Run one claimed boundary to a settled state. Returns `None` if the
    /// boundary was unregistered while it ran.
    pub(crate) async fn execute(&self, claim: Claim) -> Option<BoundaryStatus> {
        let Claim {
            id,
            generation,
            context,
            activate,
        } = claim;
        let forced = context.is_forced();
        debug!(
            boundary_id = %id,
            priority = context.priority().as_str(),
            forced,
            "Hydrating boundary"
        );
        self.shared.events.emit(HydrationEvent::Started {
            boundary_id: id.clone(),
            forced,
        });

        let flag = context.flag().clone();
        let timeout = self.shared.config.task_timeout();
        let started = Instant::now();
        let run = async move {
            let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| activate(context))) {
                Ok(fut) => fut,
                Err(payload) => return Err(payload),
            };
            AssertUnwindSafe(Cooperative::new(fut, flag)).catch_unwind().await
        };

        // The deadline is checked first so a pending cancel never masks a timeout.
        let deadline = started + timeout;
        let outcome = tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => Outcome::Failed(HydrationError::TaskTimeout {
                boundary_id: id.clone(),
                timeout,
            }),
            result = run => match result {
                Err(payload) => Outcome::Failed(HydrationError::Panicked {
                    boundary_id: id.clone(),
                    message: panic_message(&*payload),
                }),
                Ok(None) => Outcome::Cancelled,
                Ok(Some(Ok(()))) => Outcome::Hydrated(started.elapsed()),
                Ok(Some(Err(e))) => Outcome::Failed(HydrationError::operation(id.clone(), e)),
            },
        };
        self.settle(&id, generation, outcome)
    }

    /// Apply a run's outcome to the registry and metrics in one critical
    /// section, then fire callbacks and events outside it.
    fn settle(&self, id: &BoundaryId, generation: u64, outcome: Outcome) -> Option<BoundaryStatus> {
        let mut events = Vec::new();
        let mut on_complete = None;
        let mut on_error = None;

        let status = {
            let mut guard = self.shared.lock();
            let inner = &mut *guard;
            match inner.tasks.get_mut(id.as_str()) {
                Some(entry)
                    if entry.generation == generation
                        && entry.status == BoundaryStatus::Hydrating =>
                {
                    match outcome {
                        Outcome::Hydrated(duration) => {
                            entry.last_duration = Some(duration);
                            entry.last_error = None;
                            entry.set_status(BoundaryStatus::Hydrated);
                            inner.metrics.on_hydrated(duration, entry.task.above_fold);
                            events.push(HydrationEvent::Complete {
                                boundary_id: id.clone(),
                                duration,
                            });

                            let replayed = std::mem::take(&mut entry.interactions);
                            if !replayed.is_empty() {
                                inner.metrics.on_replayed(replayed.len());
                                events.extend(replayed.into_iter().map(|interaction| {
                                    HydrationEvent::InteractionReplayed {
                                        boundary_id: id.clone(),
                                        kind: interaction.kind,
                                    }
                                }));
                            }
                            on_complete = entry.task.on_complete.clone().map(|cb| (cb, duration));
                        }
                        Outcome::Failed(error) => {
                            entry.last_error = Some(error.clone());
                            entry.set_status(BoundaryStatus::Error);
                            inner.metrics.on_failed();
                            on_error = entry.task.on_error.clone().map(|cb| (cb, error.clone()));
                            events.push(HydrationEvent::Failed {
                                boundary_id: id.clone(),
                                error,
                            });
                        }
                        Outcome::Cancelled => {
                            entry.admission = Admission::Parked;
                            entry.set_status(BoundaryStatus::Pending);
                            events.push(HydrationEvent::Cancelled { boundary_id: id.clone() });
                        }
                    }
                    Some(entry.status)
                }
                _ => {
                    events.push(HydrationEvent::Cancelled { boundary_id: id.clone() });
                    None
                }
            }
        };

        match status {
            Some(BoundaryStatus::Hydrated) => debug!(boundary_id = %id, "Boundary hydrated"),
            Some(BoundaryStatus::Error) => {
                if let Some(HydrationEvent::Failed { error, .. }) = events.first() {
                    warn!(boundary_id = %id, error = %error, "Hydration failed");
                }
            }
            Some(_) => debug!(boundary_id = %id, "Hydration cancelled, boundary parked"),
            None => debug!(boundary_id = %id, "Boundary removed while hydrating; result discarded"),
        }

        if let Some((callback, duration)) = on_complete {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(id, duration))).is_err() {
                warn!(boundary_id = %id, "Completion callback panicked");
            }
        }
        if let Some((callback, error)) = on_error {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(&error))).is_err() {
                warn!(boundary_id = %id, "Error callback panicked");
            }
        }
        for event in events {
            self.shared.events.emit(event);
        }
        status
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
