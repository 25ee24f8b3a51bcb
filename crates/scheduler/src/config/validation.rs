use crate::error::SchedulerError;

use super::{RootMargin, SchedulerConfig};

impl SchedulerConfig {
    /// Validate the config: budget sanity, ranges, and the root margin syntax.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        self.validate_budget()?;
        self.validate_visibility()?;
        self.validate_admission()?;
        self.validate_metrics()?;
        Ok(())
    }

    /// A slice must be able to start at least one task.
    fn validate_budget(&self) -> Result<(), SchedulerError> {
        let budget = &self.budget;
        if budget.max_tasks_per_frame == 0 {
            return Err(SchedulerError::Config(
                "budget.max_tasks_per_frame must be at least 1".into(),
            ));
        }
        if budget.min_idle_time_ms >= budget.frame_time_limit_ms {
            return Err(SchedulerError::Config(format!(
                "budget.min_idle_time_ms ({}) must be below budget.frame_time_limit_ms ({})",
                budget.min_idle_time_ms, budget.frame_time_limit_ms
            )));
        }
        Ok(())
    }

    fn validate_visibility(&self) -> Result<(), SchedulerError> {
        let threshold = self.visibility.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SchedulerError::Config(format!(
                "visibility.threshold {threshold} is outside [0, 1]"
            )));
        }
        RootMargin::parse(&self.visibility.root_margin)?;
        Ok(())
    }

    fn validate_admission(&self) -> Result<(), SchedulerError> {
        if self.max_queue_size == 0 {
            return Err(SchedulerError::Config("max_queue_size must be at least 1".into()));
        }
        if self.task_timeout_ms == 0 {
            return Err(SchedulerError::Config("task_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    fn validate_metrics(&self) -> Result<(), SchedulerError> {
        let rate = self.metrics_sample_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(SchedulerError::Config(format!(
                "metrics_sample_rate {rate} is outside [0, 1]"
            )));
        }
        Ok(())
    }
}
