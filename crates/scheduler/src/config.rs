//! Scheduler configuration.
//!
//! Parsed from `hydra.toml` (snake_case keys) with `HYDRA_*` environment
//! variable overrides, then validated. Every field has a default so an empty
//! document is a valid configuration.

mod loading;
mod margin;
mod validation;


use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::InteractionStrategy;

pub use margin::{MarginLength, RootMargin};

// ── Top-level config ────────────────────────────────────────────────

/// Immutable per-instance scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Per-slice execution budget.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Options handed to the visibility observer.
    #[serde(default)]
    pub visibility: VisibilityConfig,

    /// Log every slice report at `info` instead of `debug`.
    #[serde(default)]
    pub debug: bool,

    /// Handling of interactions captured before hydration.
    #[serde(default)]
    pub interaction_strategy: InteractionStrategy,

    /// Drive slices from the idle primitive instead of the timer fallback.
    #[serde(default = "default_use_idle_callback")]
    pub use_idle_callback: bool,

    /// Admission ceiling over pending (eligible + waiting) boundaries.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Per-task deadline in milliseconds.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// Whether completion durations are sampled at all.
    #[serde(default = "default_collect_metrics")]
    pub collect_metrics: bool,

    /// Fraction of completions whose duration is sampled (0.0 - 1.0).
    #[serde(default = "default_metrics_sample_rate")]
    pub metrics_sample_rate: f64,
}

fn default_use_idle_callback() -> bool {
    true
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_task_timeout_ms() -> u64 {
    10_000
}

fn default_collect_metrics() -> bool {
    true
}

fn default_metrics_sample_rate() -> f64 {
    1.0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            visibility: VisibilityConfig::default(),
            debug: false,
            interaction_strategy: InteractionStrategy::default(),
            use_idle_callback: default_use_idle_callback(),
            max_queue_size: default_max_queue_size(),
            task_timeout_ms: default_task_timeout_ms(),
            collect_metrics: default_collect_metrics(),
            metrics_sample_rate: default_metrics_sample_rate(),
        }
    }
}

impl SchedulerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

// ── Section configs ─────────────────────────────────────────────────

/// Budget section: bounds on a single slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Ceiling on a slice's wall-clock length, in milliseconds.
    #[serde(default = "default_frame_time_limit_ms")]
    pub frame_time_limit_ms: u64,

    /// Hard cap on tasks started per slice.
    #[serde(default = "default_max_tasks_per_frame")]
    pub max_tasks_per_frame: usize,

    /// Headroom kept free at the end of a slice; no task starts inside it.
    #[serde(default = "default_min_idle_time_ms")]
    pub min_idle_time_ms: u64,

    /// Yield to the runtime between tasks, and end a slice early when the
    /// host reports pending input.
    #[serde(default = "default_yield_to_main")]
    pub yield_to_main: bool,
}

fn default_frame_time_limit_ms() -> u64 {
    16
}

fn default_max_tasks_per_frame() -> usize {
    4
}

fn default_min_idle_time_ms() -> u64 {
    4
}

fn default_yield_to_main() -> bool {
    true
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            frame_time_limit_ms: default_frame_time_limit_ms(),
            max_tasks_per_frame: default_max_tasks_per_frame(),
            min_idle_time_ms: default_min_idle_time_ms(),
            yield_to_main: default_yield_to_main(),
        }
    }
}

impl BudgetConfig {
    pub fn frame_time_limit(&self) -> Duration {
        Duration::from_millis(self.frame_time_limit_ms)
    }

    pub fn min_idle_time(&self) -> Duration {
        Duration::from_millis(self.min_idle_time_ms)
    }
}

/// Visibility section: forwarded to the host's intersection observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibilityConfig {
    /// Scroll container handle. `None` means the viewport.
    #[serde(default)]
    pub root: Option<String>,

    /// CSS-style margin grown around the root, e.g. `"200px 0px"`.
    #[serde(default = "default_root_margin")]
    pub root_margin: String,

    /// Minimum intersection ratio that counts as visible.
    #[serde(default)]
    pub threshold: f64,

    /// Stop observing after the first qualifying intersection.
    #[serde(default = "default_trigger_once")]
    pub trigger_once: bool,

    /// With `trigger_once = false`, move an eligible-but-unstarted boundary
    /// back to waiting when it leaves the viewport entirely.
    #[serde(default = "default_demote_on_exit")]
    pub demote_on_exit: bool,
}

fn default_root_margin() -> String {
    "200px".into()
}

fn default_trigger_once() -> bool {
    true
}

fn default_demote_on_exit() -> bool {
    true
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            root: None,
            root_margin: default_root_margin(),
            threshold: 0.0,
            trigger_once: default_trigger_once(),
            demote_on_exit: default_demote_on_exit(),
        }
    }
}
