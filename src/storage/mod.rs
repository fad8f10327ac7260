//! Durable storage of alerts.
//!
//! The scheduler only talks to the [`AlertStorage`] trait. Every call is made
//! while the scheduler holds its own lock, so implementations do not need to
//! order concurrent writes themselves.

mod sqlite;

use std::sync::Arc;

use mockall::automock;
use thiserror::Error;

use crate::{alerts::Alert, settings::DeviceSettings};

pub use sqlite::SqliteAlertStorage;

/// Errors raised by an [`AlertStorage`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not serialize assets: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not create the database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("database is not open")]
    NotOpen,
    #[error("database {0} does not exist")]
    MissingDatabase(String),
    #[error("alert {0} already exists")]
    AlreadyExists(String),
    #[error("alert {0} does not exist")]
    NotFound(String),
    #[error("invalid alert record: {0}")]
    InvalidRecord(String),
}

/// An alert stopped while the device was offline, waiting to be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineAlert {
    /// Storage row id.
    pub id: i64,
    pub token: String,
    /// Scheduled time of the alert, ISO-8601.
    pub scheduled_time: String,
    /// When the alert was stopped, ISO-8601.
    pub event_time: String,
}

/// Durable store of alerts and of offline-stopped alert records.
#[automock]
pub trait AlertStorage: Send + Sync {
    /// Opens an existing database.
    fn open(&self) -> Result<(), StorageError>;

    /// Creates an empty database and opens it.
    fn create_database(&self) -> Result<(), StorageError>;

    /// Stores a new alert. Fails if its token is already stored.
    fn store(&self, alert: &Alert) -> Result<(), StorageError>;

    /// Overwrites the stored alert with the same token.
    fn modify(&self, alert: &Alert) -> Result<(), StorageError>;

    /// Removes an alert. Fails if its token is not stored.
    fn erase(&self, alert: &Alert) -> Result<(), StorageError>;

    /// Removes every alert, or none of them if any removal fails.
    fn bulk_erase(&self, alerts: &[Arc<Alert>]) -> Result<(), StorageError>;

    /// Loads every stored alert, attaching `settings` to each.
    fn load(&self, settings: &Arc<DeviceSettings>) -> Result<Vec<Arc<Alert>>, StorageError>;

    /// Records an alert stopped while offline. Storing a token twice is a no-op.
    fn store_offline_alert(
        &self,
        token: &str,
        scheduled_time: &str,
        event_time: &str,
    ) -> Result<(), StorageError>;

    fn load_offline_alerts(&self) -> Result<Vec<OfflineAlert>, StorageError>;

    /// Removes an offline record. Removing an unknown token is a no-op.
    fn erase_offline(&self, token: &str, id: i64) -> Result<(), StorageError>;

    /// Removes every alert and offline record.
    fn clear_database(&self) -> Result<(), StorageError>;
}
