use thiserror::Error;

use crate::{alerts::alert::AlertError, storage::StorageError, time::TimeError};

/// Errors returned by [`crate::alerts::AlertScheduler`] operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already initialized")]
    AlreadyInitialized,
    #[error("scheduler is shut down")]
    ShutDown,
    #[error("alert {0} is past due")]
    PastDue(String),
    #[error("alert {0} is active")]
    AlertActive(String),
    #[error("no active alert {0}")]
    NotActive(String),
    #[error("alert {0} is not scheduled")]
    NotScheduled(String),
    #[error("invalid assets for alert {0}")]
    InvalidAssets(String),
    #[error(transparent)]
    Alert(#[from] AlertError),
    #[error(transparent)]
    Time(#[from] TimeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
