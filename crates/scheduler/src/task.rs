use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};

use crate::error::{BoxError, HydrationError};
use crate::types::{BoundaryId, ElementHandle, Priority, TriggerKind};

/// Future returned by an activation operation.
pub type ActivationFuture = BoxFuture<'static, Result<(), BoxError>>;

/// Caller-supplied activation. Re-invoked after an explicit reset.
pub type ActivationFn = Arc<dyn Fn(HydrationContext) -> ActivationFuture + Send + Sync>;

/// Called with the measured duration once a boundary is hydrated.
pub type CompletionCallback = Arc<dyn Fn(&BoundaryId, Duration) + Send + Sync>;

/// Called with the failure when a boundary ends in `error`.
pub type ErrorCallback = Arc<dyn Fn(&HydrationError) + Send + Sync>;

/// Shared cancellation flag, read only at suspension points.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handed to every activation run.
#[derive(Debug, Clone)]
pub struct HydrationContext {
    boundary_id: BoundaryId,
    priority: Priority,
    forced: bool,
    flag: CancellationFlag,
}

impl HydrationContext {
    pub(crate) fn new(
        boundary_id: BoundaryId,
        priority: Priority,
        forced: bool,
        flag: CancellationFlag,
    ) -> Self {
        Self {
            boundary_id,
            priority,
            forced,
            flag,
        }
    }

    pub fn boundary_id(&self) -> &BoundaryId {
        &self.boundary_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether this run bypassed the slice budget.
    pub fn is_forced(&self) -> bool {
        self.forced
    }

    /// Whether cancellation was requested. The scheduler abandons the run at
    /// the next suspension point regardless; this lets the operation stop
    /// doing work sooner.
    pub fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }

    /// An explicit suspension point. Operations that never await anything
    /// can call this to make themselves cancellable.
    pub async fn checkpoint(&self) {
        tokio::task::yield_now().await;
    }

    pub(crate) fn flag(&self) -> &CancellationFlag {
        &self.flag
    }
}

/// One boundary's pending activation: the task record handed to `register`.
pub struct HydrationTask {
    pub(crate) id: BoundaryId,
    pub(crate) priority: Priority,
    pub(crate) trigger: TriggerKind,
    pub(crate) activate: ActivationFn,
    pub(crate) element: Option<ElementHandle>,
    pub(crate) cancellable: bool,
    pub(crate) above_fold: bool,
    pub(crate) metadata: Map<String, Value>,
    pub(crate) on_complete: Option<CompletionCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl HydrationTask {
    /// Create a `normal`-priority, `idle`-triggered, cancellable task.
    pub fn new<F, Fut, E>(id: impl Into<BoundaryId>, activate: F) -> Self
    where
        F: Fn(HydrationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let activate: ActivationFn = Arc::new(move |ctx: HydrationContext| -> ActivationFuture {
            activate(ctx).map(|r| r.map_err(Into::<BoxError>::into)).boxed()
        });
        Self {
            id: id.into(),
            priority: Priority::default(),
            trigger: TriggerKind::default(),
            activate,
            element: None,
            cancellable: true,
            above_fold: false,
            metadata: Map::new(),
            on_complete: None,
            on_error: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn trigger(mut self, trigger: TriggerKind) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn element(mut self, element: impl Into<ElementHandle>) -> Self {
        self.element = Some(element.into());
        self
    }

    pub fn cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }

    pub fn above_fold(mut self, above_fold: bool) -> Self {
        self.above_fold = above_fold;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn on_complete(
        mut self,
        f: impl Fn(&BoundaryId, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&HydrationError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn id(&self) -> &BoundaryId {
        &self.id
    }

    pub fn trigger_kind(&self) -> TriggerKind {
        self.trigger
    }

    pub fn current_priority(&self) -> Priority {
        self.priority
    }
}

impl fmt::Debug for HydrationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HydrationTask")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("trigger", &self.trigger)
            .field("element", &self.element)
            .field("cancellable", &self.cancellable)
            .field("above_fold", &self.above_fold)
            .finish_non_exhaustive()
    }
}

/// Wraps an activation so the cancellation flag is checked every time the
/// operation is resumed after suspending. Resolves to `None` when cancelled.
pub(crate) struct Cooperative {
    inner: ActivationFuture,
    flag: CancellationFlag,
    resumed: bool,
}

impl Cooperative {
    pub(crate) fn new(inner: ActivationFuture, flag: CancellationFlag) -> Self {
        Self {
            inner,
            flag,
            resumed: false,
        }
    }
}

impl Future for Cooperative {
    type Output = Option<Result<(), BoxError>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.resumed && this.flag.is_cancelled() {
            return Poll::Ready(None);
        }
        this.resumed = true;
        this.inner.poll_unpin(cx).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cooperative_completes_without_cancel() {
        let fut: ActivationFuture = async { Ok(()) }.boxed();
        let out = Cooperative::new(fut, CancellationFlag::new()).await;
        assert!(matches!(out, Some(Ok(()))));
    }

    #[tokio::test]
    async fn cooperative_observes_flag_after_suspension() {
        let flag = CancellationFlag::new();
        let inner_flag = flag.clone();
        let fut: ActivationFuture = async move {
            inner_flag.cancel();
            tokio::task::yield_now().await;
            Ok(())
        }
        .boxed();
        let out = Cooperative::new(fut, flag).await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn cancel_without_suspension_is_not_observed() {
        let flag = CancellationFlag::new();
        let inner_flag = flag.clone();
        let fut: ActivationFuture = async move {
            inner_flag.cancel();
            Ok(())
        }
        .boxed();
        let out = Cooperative::new(fut, flag).await;
        assert!(matches!(out, Some(Ok(()))));
    }

    #[test]
    fn builder_defaults() {
        let task = HydrationTask::new("nav", |_ctx| async { Ok::<_, BoxError>(()) });
        assert_eq!(task.id().as_str(), "nav");
        assert_eq!(task.current_priority(), Priority::Normal);
        assert_eq!(task.trigger_kind(), TriggerKind::Idle);
        assert!(task.cancellable);
        assert!(!task.above_fold);

        let task = task
            .priority(Priority::High)
            .trigger(TriggerKind::Visible)
            .element("el-nav")
            .above_fold(true)
            .metadata("route", "/home");
        assert_eq!(task.element.as_ref().map(|e| e.as_str()), Some("el-nav"));
        assert_eq!(task.metadata["route"], "/home");
    }
}
