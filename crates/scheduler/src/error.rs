use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::types::{BoundaryId, BoundaryStatus};

/// Boxed error returned by activation operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Registry-level errors, returned synchronously to the caller.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("hydration queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("boundary not found: {0}")]
    NotFound(BoundaryId),

    #[error("boundary already registered: {0}")]
    DuplicateBoundary(BoundaryId),

    #[error("boundary {id} cannot leave state {from}")]
    InvalidTransition { id: BoundaryId, from: BoundaryStatus },

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

/// Failure of a single boundary's activation. Never reaches the loop.
#[derive(Debug, Clone, Error)]
pub enum HydrationError {
    #[error("boundary {boundary_id} timed out after {timeout:?}")]
    TaskTimeout {
        boundary_id: BoundaryId,
        timeout: Duration,
    },

    #[error("boundary {boundary_id} activation failed: {source}")]
    TaskOperation {
        boundary_id: BoundaryId,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("boundary {boundary_id} activation panicked: {message}")]
    Panicked {
        boundary_id: BoundaryId,
        message: String,
    },
}

impl HydrationError {
    pub fn boundary_id(&self) -> &BoundaryId {
        match self {
            HydrationError::TaskTimeout { boundary_id, .. }
            | HydrationError::TaskOperation { boundary_id, .. }
            | HydrationError::Panicked { boundary_id, .. } => boundary_id,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HydrationError::TaskTimeout { .. })
    }

    pub(crate) fn operation(boundary_id: BoundaryId, source: BoxError) -> Self {
        HydrationError::TaskOperation {
            boundary_id,
            source: Arc::from(source),
        }
    }
}
