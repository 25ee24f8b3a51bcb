//! Hydration runner: registry, budgeted execution loop and forced runs.
//!
//! Split into focused submodules:
//! - `core`: shared state, the `Scheduler` handle, builder and loop control
//! - `registry`: registration, lifecycle transitions and status queries
//! - `execution`: the slice loop and settling a single run
//! - `force`: budget-bypassing runs and their handles

mod core;
mod execution;
mod force;
mod registry;

pub use self::core::{Scheduler, SchedulerBuilder};
pub use self::execution::{SliceExit, SliceReport};
pub use self::force::HydrationHandle;
pub use self::registry::BoundaryInfo;

pub(crate) use self::core::{Admission, Shared};
