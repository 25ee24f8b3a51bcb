pub mod config;
pub mod error;
pub mod events;
pub mod global;
pub mod host;
pub mod metrics;
pub mod queue;
pub mod task;
pub mod types;
pub mod visibility;

mod runner;

pub use config::{BudgetConfig, MarginLength, RootMargin, SchedulerConfig, VisibilityConfig};
pub use error::{BoxError, HydrationError, SchedulerError};
pub use events::HydrationEvent;
pub use host::{
    IdleSlices, IntersectionEntry, ManualSlices, ManualVisibility, NoopVisibility, ObserveOptions,
    SliceGrant, SlicePrimitive, TimerSlices, VisibilityObserver, VisibilitySubscription,
};
pub use metrics::MetricsSnapshot;
pub use runner::{
    BoundaryInfo, HydrationHandle, Scheduler, SchedulerBuilder, SliceExit, SliceReport,
};
pub use task::{CancellationFlag, HydrationContext, HydrationTask};
pub use types::{
    BoundaryId, BoundaryStatus, ElementHandle, Interaction, InteractionStrategy, Priority,
    TriggerKind,
};
pub use visibility::VisibilitySink;
