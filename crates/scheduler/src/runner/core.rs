use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{RootMargin, SchedulerConfig};
use crate::error::{HydrationError, SchedulerError};
use crate::events::EventBus;
use crate::host::{
    slices_for, NoopVisibility, ObserveOptions, SlicePrimitive, VisibilityObserver,
    VisibilitySubscription,
};
use crate::metrics::MetricsAggregator;
use crate::queue::EligibleQueue;
use crate::task::{ActivationFn, CancellationFlag, HydrationContext, HydrationTask};
use crate::types::{BoundaryId, BoundaryStatus, ElementHandle, Interaction, TriggerKind};

/// Interactions buffered per boundary before the oldest are dropped.
pub(crate) const MAX_QUEUED_INTERACTIONS: usize = 32;

/// Where a `pending` boundary sits relative to the eligible queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Visible trigger, not yet intersecting.
    Waiting,
    /// In the eligible queue.
    Eligible,
    /// Cancelled; stays out of the queue until reset or forced.
    Parked,
    /// Taken by a run.
    Claimed,
}

pub(crate) struct TaskEntry {
    pub(crate) task: HydrationTask,
    pub(crate) status: BoundaryStatus,
    pub(crate) admission: Admission,
    /// Changes on every (re)admission; stale visibility sinks and runs compare it.
    pub(crate) generation: u64,
    pub(crate) seq: u64,
    pub(crate) enqueued_at: DateTime<Utc>,
    pub(crate) cancel: CancellationFlag,
    pub(crate) status_tx: watch::Sender<BoundaryStatus>,
    pub(crate) subscription: Option<VisibilitySubscription>,
    pub(crate) interactions: Vec<Interaction>,
    pub(crate) last_error: Option<HydrationError>,
    pub(crate) last_duration: Option<Duration>,
}

impl TaskEntry {
    fn new(task: HydrationTask) -> Self {
        let (status_tx, _) = watch::channel(BoundaryStatus::Pending);
        Self {
            task,
            status: BoundaryStatus::Pending,
            admission: Admission::Waiting,
            generation: 0,
            seq: 0,
            enqueued_at: Utc::now(),
            cancel: CancellationFlag::new(),
            status_tx,
            subscription: None,
            interactions: Vec::new(),
            last_error: None,
            last_duration: None,
        }
    }

    pub(crate) fn set_status(&mut self, status: BoundaryStatus) {
        self.status = status;
        self.status_tx.send_replace(status);
    }

    pub(crate) fn push_interaction(&mut self, interaction: Interaction) {
        if self.interactions.len() == MAX_QUEUED_INTERACTIONS {
            self.interactions.remove(0);
        }
        self.interactions.push(interaction);
    }
}

/// Result of routing a boundary through the admission gate.
pub(crate) enum Admitted {
    Queued,
    /// Visible trigger: observe this element (if one is bound).
    Observe {
        generation: u64,
        element: Option<ElementHandle>,
    },
}

/// A boundary taken out of `pending` for one run.
pub(crate) struct Claim {
    pub(crate) id: BoundaryId,
    pub(crate) generation: u64,
    pub(crate) context: HydrationContext,
    pub(crate) activate: ActivationFn,
}

/// Registry, queue and metrics: everything mutated under the one lock.
pub(crate) struct Inner {
    pub(crate) tasks: HashMap<BoundaryId, TaskEntry>,
    pub(crate) queue: EligibleQueue,
    pub(crate) metrics: MetricsAggregator,
    pub(crate) paused: bool,
    next_seq: u64,
    next_generation: u64,
}

impl Inner {
    fn new(config: &SchedulerConfig) -> Self {
        Self {
            tasks: HashMap::new(),
            queue: EligibleQueue::new(),
            metrics: MetricsAggregator::new(config.collect_metrics, config.metrics_sample_rate),
            paused: false,
            next_seq: 0,
            next_generation: 0,
        }
    }

    pub(crate) fn insert(&mut self, task: HydrationTask) -> BoundaryId {
        let id = task.id.clone();
        self.metrics.on_registered(task.above_fold);
        self.tasks.insert(id.clone(), TaskEntry::new(task));
        id
    }

    /// Give a pending boundary a fresh queue position and generation, then
    /// queue it or hand back the element to observe.
    pub(crate) fn admit(&mut self, id: &str) -> Option<Admitted> {
        self.next_seq += 1;
        self.next_generation += 1;
        let (seq, generation) = (self.next_seq, self.next_generation);

        let entry = self.tasks.get_mut(id)?;
        entry.seq = seq;
        entry.generation = generation;
        entry.subscription = None;
        entry.enqueued_at = Utc::now();

        if entry.task.trigger == TriggerKind::Visible {
            entry.admission = Admission::Waiting;
            Some(Admitted::Observe {
                generation,
                element: entry.task.element.clone(),
            })
        } else {
            entry.admission = Admission::Eligible;
            self.queue.push(entry.task.id.clone(), entry.task.priority, seq);
            Some(Admitted::Queued)
        }
    }

    /// Move a `pending` boundary to `hydrating`. Returns `None` for any other
    /// state, which keeps a boundary from running twice at once.
    pub(crate) fn claim(&mut self, id: &str, forced: bool) -> Option<Claim> {
        let entry = self.tasks.get_mut(id)?;
        if entry.status != BoundaryStatus::Pending {
            return None;
        }
        self.queue.remove(id);
        entry.subscription = None;
        entry.cancel = CancellationFlag::new();
        entry.admission = Admission::Claimed;
        entry.set_status(BoundaryStatus::Hydrating);

        let context = HydrationContext::new(
            entry.task.id.clone(),
            entry.task.priority,
            forced,
            entry.cancel.clone(),
        );
        Some(Claim {
            id: entry.task.id.clone(),
            generation: entry.generation,
            context,
            activate: Arc::clone(&entry.task.activate),
        })
    }

    /// Next claimable boundary from the ready lane.
    pub(crate) fn claim_next(&mut self) -> Option<Claim> {
        while let Some(id) = self.queue.pop() {
            if let Some(claim) = self.claim(&id, false) {
                return Some(claim);
            }
        }
        None
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|e| e.status == BoundaryStatus::Pending)
            .count()
    }
}

/// State shared between handles, the loop task and visibility sinks.
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) state: Mutex<Inner>,
    pub(crate) slices: Arc<dyn SlicePrimitive>,
    pub(crate) visibility: Arc<dyn VisibilityObserver>,
    pub(crate) observe_options: ObserveOptions,
    pub(crate) events: EventBus,
    pub(crate) work_ready: Notify,
    pub(crate) shutdown: AtomicBool,
    pub(crate) shutdown_notify: Notify,
    pub(crate) running: AtomicBool,
}

impl Shared {
    /// The guard must never be held across an `.await`.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The hydration scheduler. Cheap to clone; every clone drives the same
/// registry, queue and loop.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler with the slice primitive selected by
    /// `use_idle_callback` and no visibility host.
    pub fn new(config: SchedulerConfig) -> Self {
        let slices = slices_for(&config);
        Self::from_parts(config, slices, Arc::new(NoopVisibility))
    }

    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            slices: None,
            visibility: None,
        }
    }

    fn from_parts(
        config: SchedulerConfig,
        slices: Arc<dyn SlicePrimitive>,
        visibility: Arc<dyn VisibilityObserver>,
    ) -> Self {
        let root_margin = RootMargin::parse(&config.visibility.root_margin).unwrap_or_else(|e| {
            warn!(error = %e, "Invalid root_margin, observing without a margin");
            RootMargin::default()
        });
        let observe_options = ObserveOptions {
            root: config.visibility.root.clone(),
            root_margin,
            threshold: config.visibility.threshold,
        };
        let inner = Inner::new(&config);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(inner),
                slices,
                visibility,
                observe_options,
                events: EventBus::new(),
                work_ready: Notify::new(),
                shutdown: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Options passed to the visibility host for every observation.
    pub fn observe_options(&self) -> &ObserveOptions {
        &self.shared.observe_options
    }

    /// Spawn [`Scheduler::run`] on the current Tokio runtime.
    ///
    /// Returns `None` outside a runtime or when the loop is already running.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No Tokio runtime; hydration loop not started");
                return None;
            }
        };
        if self.shared.running.load(Ordering::SeqCst) {
            return None;
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);
        let this = self.clone();
        Some(handle.spawn(async move { this.run().await }))
    }

    /// Ask the loop to stop after the current slice. Running tasks finish.
    pub fn shutdown(&self) {
        info!("Hydration loop shutdown requested");
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.shutdown_notify.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

/// Builder for schedulers with injected host primitives.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    slices: Option<Arc<dyn SlicePrimitive>>,
    visibility: Option<Arc<dyn VisibilityObserver>>,
}

impl SchedulerBuilder {
    pub fn slices(mut self, slices: Arc<dyn SlicePrimitive>) -> Self {
        self.slices = Some(slices);
        self
    }

    pub fn visibility(mut self, visibility: Arc<dyn VisibilityObserver>) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Validate the config and assemble the scheduler.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate()?;
        let slices = self.slices.unwrap_or_else(|| slices_for(&self.config));
        let visibility = self.visibility.unwrap_or_else(|| Arc::new(NoopVisibility));
        Ok(Scheduler::from_parts(self.config, slices, visibility))
    }
}
