use std::path::Path;

use crate::error::SchedulerError;
use crate::types::InteractionStrategy;

use super::SchedulerConfig;

impl SchedulerConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, SchedulerError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `HYDRA_SECTION_KEY` overrides `section.key`, top-level keys
    /// use `HYDRA_KEY`. Unparseable values are ignored.
    /// Examples:
    /// - `HYDRA_BUDGET_FRAME_TIME_LIMIT_MS` -> `budget.frame_time_limit_ms`
    /// - `HYDRA_VISIBILITY_ROOT_MARGIN` -> `visibility.root_margin`
    /// - `HYDRA_TASK_TIMEOUT_MS` -> `task_timeout_ms`
    pub(crate) fn apply_env_overrides(&mut self) {
        override_parsed("HYDRA_BUDGET_FRAME_TIME_LIMIT_MS", &mut self.budget.frame_time_limit_ms);
        override_parsed("HYDRA_BUDGET_MAX_TASKS_PER_FRAME", &mut self.budget.max_tasks_per_frame);
        override_parsed("HYDRA_BUDGET_MIN_IDLE_TIME_MS", &mut self.budget.min_idle_time_ms);
        override_parsed("HYDRA_BUDGET_YIELD_TO_MAIN", &mut self.budget.yield_to_main);

        if let Ok(v) = std::env::var("HYDRA_VISIBILITY_ROOT") {
            self.visibility.root = Some(v).filter(|s| !s.is_empty());
        }
        if let Ok(v) = std::env::var("HYDRA_VISIBILITY_ROOT_MARGIN") {
            self.visibility.root_margin = v;
        }
        override_parsed("HYDRA_VISIBILITY_THRESHOLD", &mut self.visibility.threshold);
        override_parsed("HYDRA_VISIBILITY_TRIGGER_ONCE", &mut self.visibility.trigger_once);
        override_parsed("HYDRA_VISIBILITY_DEMOTE_ON_EXIT", &mut self.visibility.demote_on_exit);

        override_parsed("HYDRA_DEBUG", &mut self.debug);
        if let Ok(v) = std::env::var("HYDRA_INTERACTION_STRATEGY") {
            match v.to_lowercase().as_str() {
                "replay" => self.interaction_strategy = InteractionStrategy::Replay,
                "discard" => self.interaction_strategy = InteractionStrategy::Discard,
                "prioritize" => self.interaction_strategy = InteractionStrategy::Prioritize,
                other => {
                    tracing::warn!(value = %other, "ignoring unknown HYDRA_INTERACTION_STRATEGY")
                }
            }
        }
        override_parsed("HYDRA_USE_IDLE_CALLBACK", &mut self.use_idle_callback);
        override_parsed("HYDRA_MAX_QUEUE_SIZE", &mut self.max_queue_size);
        override_parsed("HYDRA_TASK_TIMEOUT_MS", &mut self.task_timeout_ms);
        override_parsed("HYDRA_COLLECT_METRICS", &mut self.collect_metrics);
        override_parsed("HYDRA_METRICS_SAMPLE_RATE", &mut self.metrics_sample_rate);
    }
}

fn override_parsed<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.trim().parse::<T>() {
            *slot = parsed;
        }
    }
}
