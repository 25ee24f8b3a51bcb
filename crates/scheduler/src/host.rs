//! Host-runtime primitives the scheduler depends on.
//!
//! The execution loop asks a [`SlicePrimitive`] for each slice and the
//! admission gate asks a [`VisibilityObserver`] to watch elements. Both are
//! injected so the core runs without a rendering host; the `Manual*`
//! implementations give tests and headless hosts full control.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::{RootMargin, SchedulerConfig};
use crate::types::ElementHandle;
use crate::visibility::VisibilitySink;

/// Longest deadline an idle primitive hands out, mirroring browser idle callbacks.
pub const MAX_IDLE_DEADLINE: Duration = Duration::from_millis(50);

/// Delay between timer-fallback slices.
pub const TIMER_FALLBACK_INTERVAL: Duration = Duration::from_millis(1);

// ── Slices ───────────────────────────────────────────────────────────

/// What the host granted for one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SliceGrant {
    /// Remaining idle time reported by the primitive, if it reports any.
    pub time_remaining: Option<Duration>,
    /// The primitive fired because its own deadline passed, not because the
    /// host was idle.
    pub did_timeout: bool,
}

impl SliceGrant {
    /// No reported deadline; the loop falls back to `frame_time_limit`.
    pub fn unbounded() -> Self {
        Self {
            time_remaining: None,
            did_timeout: false,
        }
    }

    pub fn with_remaining(remaining: Duration) -> Self {
        Self {
            time_remaining: Some(remaining),
            did_timeout: false,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            time_remaining: Some(Duration::ZERO),
            did_timeout: true,
        }
    }
}

/// Schedules the next execution slice.
#[async_trait]
pub trait SlicePrimitive: Send + Sync {
    /// Resolve when the host grants the next slice.
    async fn request_slice(&self) -> SliceGrant;

    /// Whether the host has input waiting. Consulted between tasks when
    /// `budget.yield_to_main` is set.
    fn should_yield(&self) -> bool {
        false
    }

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

/// Idle-callback style primitive: grants a slice once the runtime has run
/// everything else that was ready, with a bounded deadline.
#[derive(Debug, Clone)]
pub struct IdleSlices {
    deadline: Duration,
}

impl IdleSlices {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline: deadline.min(MAX_IDLE_DEADLINE),
        }
    }
}

impl Default for IdleSlices {
    fn default() -> Self {
        Self::new(MAX_IDLE_DEADLINE)
    }
}

#[async_trait]
impl SlicePrimitive for IdleSlices {
    async fn request_slice(&self) -> SliceGrant {
        tokio::task::yield_now().await;
        SliceGrant::with_remaining(self.deadline)
    }

    fn name(&self) -> &'static str {
        "idle"
    }
}

/// Timer fallback: a fixed delay between slices and no reported deadline.
#[derive(Debug, Clone)]
pub struct TimerSlices {
    interval: Duration,
}

impl TimerSlices {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for TimerSlices {
    fn default() -> Self {
        Self::new(TIMER_FALLBACK_INTERVAL)
    }
}

#[async_trait]
impl SlicePrimitive for TimerSlices {
    async fn request_slice(&self) -> SliceGrant {
        tokio::time::sleep(self.interval).await;
        SliceGrant::unbounded()
    }

    fn name(&self) -> &'static str {
        "timer"
    }
}

/// Pick the primitive named by `use_idle_callback`.
pub fn slices_for(config: &SchedulerConfig) -> Arc<dyn SlicePrimitive> {
    if config.use_idle_callback {
        Arc::new(IdleSlices::default())
    } else {
        Arc::new(TimerSlices::default())
    }
}

/// Slices granted one at a time by the owner. `request_slice` waits until
/// [`ManualSlices::grant`] is called.
pub struct ManualSlices {
    tx: mpsc::UnboundedSender<SliceGrant>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SliceGrant>>,
    input_pending: AtomicBool,
}

impl ManualSlices {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            input_pending: AtomicBool::new(false),
        }
    }

    pub fn grant(&self, grant: SliceGrant) {
        // The receiver lives as long as `self`.
        let _ = self.tx.send(grant);
    }

    /// Simulate pending user input for `yield_to_main`.
    pub fn set_input_pending(&self, pending: bool) {
        self.input_pending.store(pending, Ordering::SeqCst);
    }
}

impl Default for ManualSlices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlicePrimitive for ManualSlices {
    async fn request_slice(&self) -> SliceGrant {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(grant) => grant,
            None => std::future::pending().await,
        }
    }

    fn should_yield(&self) -> bool {
        self.input_pending.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

// ── Visibility ───────────────────────────────────────────────────────

/// One intersection change reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntersectionEntry {
    pub is_intersecting: bool,
    /// Visible fraction of the element, `0.0 - 1.0`.
    pub ratio: f64,
}

impl IntersectionEntry {
    pub fn entering(ratio: f64) -> Self {
        Self {
            is_intersecting: true,
            ratio,
        }
    }

    pub fn leaving() -> Self {
        Self {
            is_intersecting: false,
            ratio: 0.0,
        }
    }

    pub fn qualifies(&self, threshold: f64) -> bool {
        self.is_intersecting && self.ratio >= threshold
    }
}

/// Observation options derived from the `visibility` config section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObserveOptions {
    pub root: Option<String>,
    pub root_margin: RootMargin,
    pub threshold: f64,
}

/// Stops an observation when dropped.
///
/// The disconnect closure runs while the scheduler holds its registry lock
/// and must not call back into the scheduler.
pub struct VisibilitySubscription {
    disconnect: Option<Box<dyn FnOnce() + Send>>,
}

impl VisibilitySubscription {
    pub fn new(disconnect: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disconnect: Some(Box::new(disconnect)),
        }
    }

    pub fn noop() -> Self {
        Self { disconnect: None }
    }
}

impl Drop for VisibilitySubscription {
    fn drop(&mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }
}

/// Watches elements and reports intersection changes into a sink.
pub trait VisibilityObserver: Send + Sync {
    fn observe(
        &self,
        element: &ElementHandle,
        options: &ObserveOptions,
        sink: VisibilitySink,
    ) -> VisibilitySubscription;
}

/// Host without geometry: nothing is ever reported visible.
#[derive(Debug, Clone, Default)]
pub struct NoopVisibility;

impl VisibilityObserver for NoopVisibility {
    fn observe(
        &self,
        element: &ElementHandle,
        _: &ObserveOptions,
        sink: VisibilitySink,
    ) -> VisibilitySubscription {
        tracing::debug!(
            boundary_id = %sink.boundary_id(),
            element = %element,
            "no visibility host; boundary stays waiting"
        );
        VisibilitySubscription::noop()
    }
}

#[derive(Default)]
struct ManualInner {
    next_key: u64,
    observers: HashMap<ElementHandle, Vec<(u64, VisibilitySink)>>,
    last_options: Option<ObserveOptions>,
}

/// Visibility driven by explicit [`ManualVisibility::fire`] calls.
#[derive(Clone, Default)]
pub struct ManualVisibility {
    inner: Arc<Mutex<ManualInner>>,
}

impl ManualVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an intersection change to every sink observing `element`.
    /// Returns how many sinks were notified.
    pub fn fire(&self, element: &ElementHandle, entry: IntersectionEntry) -> usize {
        let sinks: Vec<VisibilitySink> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner
                .observers
                .get(element)
                .map(|v| v.iter().map(|(_, s)| s.clone()).collect())
                .unwrap_or_default()
        };
        for sink in &sinks {
            sink.notify(entry);
        }
        sinks.len()
    }

    pub fn is_observed(&self, element: &ElementHandle) -> bool {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.observers.get(element).is_some_and(|v| !v.is_empty())
    }

    pub fn observer_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.observers.values().map(Vec::len).sum()
    }

    /// Options passed with the most recent `observe` call.
    pub fn last_options(&self) -> Option<ObserveOptions> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.last_options.clone()
    }
}

impl VisibilityObserver for ManualVisibility {
    fn observe(
        &self,
        element: &ElementHandle,
        options: &ObserveOptions,
        sink: VisibilitySink,
    ) -> VisibilitySubscription {
        let key = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.next_key += 1;
            let key = inner.next_key;
            inner.last_options = Some(options.clone());
            inner.observers.entry(element.clone()).or_default().push((key, sink));
            key
        };

        let weak = Arc::downgrade(&self.inner);
        let element = element.clone();
        VisibilitySubscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(list) = inner.observers.get_mut(&element) {
                    list.retain(|(k, _)| *k != key);
                    if list.is_empty() {
                        inner.observers.remove(&element);
                    }
                }
            }
        })
    }
}
