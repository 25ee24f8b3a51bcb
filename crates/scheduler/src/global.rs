//! Process-wide default scheduler.
//!
//! Most hosts want exactly one scheduler per page. [`scheduler`] constructs
//! it on first use from `HYDRA_*` environment overrides; [`install`] swaps in
//! a custom instance and [`reset`] tears the current one down so the next
//! call starts fresh.

use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::runner::Scheduler;

static GLOBAL: Mutex<Option<Scheduler>> = Mutex::new(None);

/// The shared scheduler, created and started on first use.
pub fn scheduler() -> Scheduler {
    let mut slot = GLOBAL.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = slot.as_ref() {
        return existing.clone();
    }

    let config = SchedulerConfig::from_env().unwrap_or_else(|e| {
        warn!(error = %e, "Invalid scheduler environment, using defaults");
        SchedulerConfig::default()
    });
    let created = Scheduler::new(config);
    created.start();
    info!("Global hydration scheduler initialised");
    *slot = Some(created.clone());
    created
}

/// Replace the shared scheduler. The previous one, if any, is shut down
/// and returned.
pub fn install(scheduler: Scheduler) -> Option<Scheduler> {
    let previous = GLOBAL
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(scheduler);
    if let Some(previous) = &previous {
        previous.shutdown();
    }
    previous
}

/// Shut down and clear the shared scheduler.
pub fn reset() {
    let previous = GLOBAL.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(previous) = previous {
        previous.shutdown();
        previous.reset();
        info!("Global hydration scheduler reset");
    }
}

pub fn is_initialized() -> bool {
    GLOBAL.lock().unwrap_or_else(PoisonError::into_inner).is_some()
}
