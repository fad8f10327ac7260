//! SQLite-backed alert storage.
//!
//! Alerts live in a single `alerts` table keyed by token. Assets and their
//! play order are kept as a JSON document in the `assets` column. Offline
//! stopped alerts live in the `offline_alerts` table.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::{
    alerts::{Alert, AlertState, AlertType, Asset, AssetConfiguration},
    settings::DeviceSettings,
    storage::{AlertStorage, OfflineAlert, StorageError},
    time::ScheduledTime,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    token               TEXT NOT NULL UNIQUE,
    type                TEXT NOT NULL,      -- ALARM, TIMER or REMINDER
    state               TEXT NOT NULL,
    scheduled_time_unix INTEGER NOT NULL,
    scheduled_time_iso  TEXT NOT NULL,
    loop_count          INTEGER NOT NULL,
    loop_pause_ms       INTEGER NOT NULL DEFAULT 0,
    background_asset    TEXT,
    original_time       TEXT,
    label               TEXT,
    assets              TEXT NOT NULL DEFAULT '{"assets":[],"play_order":[]}'
);

CREATE INDEX IF NOT EXISTS idx_alerts_scheduled_time ON alerts(scheduled_time_unix);

CREATE TABLE IF NOT EXISTS offline_alerts (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    token          TEXT NOT NULL UNIQUE,
    scheduled_time TEXT NOT NULL,
    event_time     TEXT NOT NULL
);
"#;

const SELECT_ALERTS: &str = "SELECT token, type, state, scheduled_time_iso, loop_count, \
     loop_pause_ms, background_asset, original_time, label, assets FROM alerts ORDER BY id";

/// Assets column content.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredAssets {
    assets: Vec<Asset>,
    play_order: Vec<String>,
}

/// Alert row as read from the database, before validation.
struct AlertRow {
    token: String,
    alert_type: String,
    state: String,
    scheduled_time: String,
    loop_count: i32,
    loop_pause_ms: i64,
    background_asset: Option<String>,
    original_time: Option<String>,
    label: Option<String>,
    assets: String,
}

impl AlertRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AlertRow {
            token: row.get(0)?,
            alert_type: row.get(1)?,
            state: row.get(2)?,
            scheduled_time: row.get(3)?,
            loop_count: row.get(4)?,
            loop_pause_ms: row.get(5)?,
            background_asset: row.get(6)?,
            original_time: row.get(7)?,
            label: row.get(8)?,
            assets: row.get(9)?,
        })
    }

    fn into_alert(self, settings: &Arc<DeviceSettings>) -> Result<Alert, StorageError> {
        let alert_type = AlertType::from_name(&self.alert_type)
            .ok_or_else(|| StorageError::InvalidRecord(format!("unknown type {}", self.alert_type)))?;
        let state = AlertState::from_name(&self.state)
            .ok_or_else(|| StorageError::InvalidRecord(format!("unknown state {}", self.state)))?;
        let scheduled_time = ScheduledTime::parse(&self.scheduled_time)
            .map_err(|e| StorageError::InvalidRecord(e.to_string()))?;
        let stored: StoredAssets = serde_json::from_str(&self.assets)?;

        let assets = AssetConfiguration {
            assets: stored
                .assets
                .into_iter()
                .map(|asset| (asset.id.clone(), asset))
                .collect(),
            play_order: stored.play_order,
            background_asset_id: self.background_asset,
            loop_pause: Duration::from_millis(self.loop_pause_ms.max(0) as u64),
        };

        let mut alert = Alert::new(self.token, alert_type, scheduled_time)
            .with_asset_configuration(assets)
            .with_loop_count(self.loop_count)
            .with_settings(settings.clone())
            .with_state(state);
        if let Some(label) = self.label {
            alert = alert.with_label(label);
        }
        if let Some(original_time) = self.original_time {
            alert = alert.with_original_time(original_time);
        }
        Ok(alert)
    }
}

fn serialize_assets(alert: &Alert) -> Result<(AssetConfiguration, String), StorageError> {
    let config = alert.asset_configuration();
    let mut assets: Vec<Asset> = config.assets.values().cloned().collect();
    assets.sort_by(|a, b| a.id.cmp(&b.id));
    let json = serde_json::to_string(&StoredAssets {
        assets,
        play_order: config.play_order.clone(),
    })?;
    Ok((config, json))
}

fn table_exists(connection: &Connection, table: &str) -> Result<bool, StorageError> {
    let found = connection
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn alert_exists(connection: &Connection, token: &str) -> Result<bool, StorageError> {
    let found = connection
        .query_row(
            "SELECT 1 FROM alerts WHERE token = ?1",
            params![token],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn offline_alert_exists(connection: &Connection, token: &str) -> Result<bool, StorageError> {
    let found = connection
        .query_row(
            "SELECT 1 FROM offline_alerts WHERE token = ?1",
            params![token],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

enum Location {
    File(PathBuf),
    Memory,
}

/// [`AlertStorage`] backed by a SQLite database.
///
/// The connection is opened by [`AlertStorage::open`] or
/// [`AlertStorage::create_database`]; every other call fails with
/// [`StorageError::NotOpen`] until then.
///
/// # Examples
///
/// ```
/// use alert_scheduler::storage::{AlertStorage, SqliteAlertStorage};
///
/// let storage = SqliteAlertStorage::in_memory();
/// assert!(storage.open().is_err());
/// storage.create_database().unwrap();
/// assert!(storage.load_offline_alerts().unwrap().is_empty());
/// ```
pub struct SqliteAlertStorage {
    location: Location,
    connection: Mutex<Option<Connection>>,
}

impl SqliteAlertStorage {
    /// Creates a storage for the database file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SqliteAlertStorage {
            location: Location::File(path.into()),
            connection: Mutex::new(None),
        }
    }

    /// Creates a storage living in memory, lost when dropped.
    pub fn in_memory() -> Self {
        SqliteAlertStorage {
            location: Location::Memory,
            connection: Mutex::new(None),
        }
    }

    fn describe(&self) -> String {
        match &self.location {
            Location::File(path) => path.display().to_string(),
            Location::Memory => ":memory:".to_string(),
        }
    }

    fn has_schema(connection: &Connection) -> Result<bool, StorageError> {
        Ok(table_exists(connection, "alerts")? && table_exists(connection, "offline_alerts")?)
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.connection.lock();
        let connection = guard.as_mut().ok_or(StorageError::NotOpen)?;
        f(connection)
    }

    fn open_file(path: &Path) -> Result<Connection, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Connection::open(path)?)
    }
}

impl AlertStorage for SqliteAlertStorage {
    fn open(&self) -> Result<(), StorageError> {
        let mut guard = self.connection.lock();
        if let Some(connection) = guard.as_ref() {
            if Self::has_schema(connection)? {
                debug!("alert database {} already open", self.describe());
                return Ok(());
            }
        }

        let connection = match &self.location {
            Location::File(path) => {
                if !path.exists() {
                    return Err(StorageError::MissingDatabase(self.describe()));
                }
                Connection::open(path)?
            }
            Location::Memory => Connection::open_in_memory()?,
        };
        if !Self::has_schema(&connection)? {
            return Err(StorageError::MissingDatabase(self.describe()));
        }

        info!("opened alert database {}", self.describe());
        *guard = Some(connection);
        Ok(())
    }

    fn create_database(&self) -> Result<(), StorageError> {
        let connection = match &self.location {
            Location::File(path) => Self::open_file(path)?,
            Location::Memory => Connection::open_in_memory()?,
        };
        connection.execute_batch(SCHEMA_SQL)?;

        info!("created alert database {}", self.describe());
        *self.connection.lock() = Some(connection);
        Ok(())
    }

    fn store(&self, alert: &Alert) -> Result<(), StorageError> {
        let (assets, assets_json) = serialize_assets(alert)?;
        let scheduled_time = alert.scheduled_time();

        self.with_connection(|connection| {
            if alert_exists(connection, alert.token())? {
                error!("alert {} is already stored", alert.token());
                return Err(StorageError::AlreadyExists(alert.token().to_owned()));
            }
            connection.execute(
                "INSERT INTO alerts (token, type, state, scheduled_time_unix, scheduled_time_iso, \
                 loop_count, loop_pause_ms, background_asset, original_time, label, assets) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    alert.token(),
                    alert.alert_type().as_str(),
                    alert.state().as_str(),
                    scheduled_time.unix(),
                    scheduled_time.as_iso_8601(),
                    alert.loop_count(),
                    assets.loop_pause.as_millis() as i64,
                    assets.background_asset_id,
                    alert.original_time(),
                    alert.label(),
                    assets_json,
                ],
            )?;
            debug!("stored alert {}", alert.token());
            Ok(())
        })
    }

    fn modify(&self, alert: &Alert) -> Result<(), StorageError> {
        let (assets, assets_json) = serialize_assets(alert)?;
        let scheduled_time = alert.scheduled_time();

        self.with_connection(|connection| {
            let updated = connection.execute(
                "UPDATE alerts SET state = ?2, scheduled_time_unix = ?3, scheduled_time_iso = ?4, \
                 loop_count = ?5, loop_pause_ms = ?6, background_asset = ?7, original_time = ?8, \
                 label = ?9, assets = ?10 WHERE token = ?1",
                params![
                    alert.token(),
                    alert.state().as_str(),
                    scheduled_time.unix(),
                    scheduled_time.as_iso_8601(),
                    alert.loop_count(),
                    assets.loop_pause.as_millis() as i64,
                    assets.background_asset_id,
                    alert.original_time(),
                    alert.label(),
                    assets_json,
                ],
            )?;
            if updated == 0 {
                error!("cannot modify alert {}, it is not stored", alert.token());
                return Err(StorageError::NotFound(alert.token().to_owned()));
            }
            debug!("modified alert {}", alert.token());
            Ok(())
        })
    }

    fn erase(&self, alert: &Alert) -> Result<(), StorageError> {
        self.with_connection(|connection| {
            let deleted =
                connection.execute("DELETE FROM alerts WHERE token = ?1", params![alert.token()])?;
            if deleted == 0 {
                error!("cannot erase alert {}, it is not stored", alert.token());
                return Err(StorageError::NotFound(alert.token().to_owned()));
            }
            debug!("erased alert {}", alert.token());
            Ok(())
        })
    }

    fn bulk_erase(&self, alerts: &[Arc<Alert>]) -> Result<(), StorageError> {
        if alerts.is_empty() {
            return Ok(());
        }
        self.with_connection(|connection| {
            // Dropping the transaction on an early return rolls it back
            let transaction = connection.transaction()?;
            for alert in alerts {
                let deleted = transaction
                    .execute("DELETE FROM alerts WHERE token = ?1", params![alert.token()])?;
                if deleted == 0 {
                    error!("cannot erase alert {}, it is not stored", alert.token());
                    return Err(StorageError::NotFound(alert.token().to_owned()));
                }
            }
            transaction.commit()?;
            debug!("erased {} alerts", alerts.len());
            Ok(())
        })
    }

    fn load(&self, settings: &Arc<DeviceSettings>) -> Result<Vec<Arc<Alert>>, StorageError> {
        let rows = self.with_connection(|connection| {
            let mut statement = connection.prepare(SELECT_ALERTS)?;
            let rows = statement.query_map([], AlertRow::from_row)?;
            let mut result = Vec::new();
            for row in rows {
                result.push(row?);
            }
            Ok(result)
        })?;

        let mut alerts = Vec::with_capacity(rows.len());
        for row in rows {
            let token = row.token.clone();
            match row.into_alert(settings) {
                Ok(alert) => alerts.push(Arc::new(alert)),
                Err(e) => warn!("skipping stored alert {}: {}", token, e),
            }
        }
        info!("loaded {} alerts", alerts.len());
        Ok(alerts)
    }

    fn store_offline_alert(
        &self,
        token: &str,
        scheduled_time: &str,
        event_time: &str,
    ) -> Result<(), StorageError> {
        self.with_connection(|connection| {
            if offline_alert_exists(connection, token)? {
                warn!("offline alert {} is already stored", token);
                return Ok(());
            }
            connection.execute(
                "INSERT INTO offline_alerts (token, scheduled_time, event_time) VALUES (?1, ?2, ?3)",
                params![token, scheduled_time, event_time],
            )?;
            Ok(())
        })
    }

    fn load_offline_alerts(&self) -> Result<Vec<OfflineAlert>, StorageError> {
        self.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT id, token, scheduled_time, event_time FROM offline_alerts ORDER BY id",
            )?;
            let rows = statement.query_map([], |row| {
                Ok(OfflineAlert {
                    id: row.get(0)?,
                    token: row.get(1)?,
                    scheduled_time: row.get(2)?,
                    event_time: row.get(3)?,
                })
            })?;
            let mut alerts = Vec::new();
            for row in rows {
                alerts.push(row?);
            }
            Ok(alerts)
        })
    }

    fn erase_offline(&self, token: &str, id: i64) -> Result<(), StorageError> {
        self.with_connection(|connection| {
            let deleted =
                connection.execute("DELETE FROM offline_alerts WHERE token = ?1", params![token])?;
            if deleted == 0 {
                warn!("offline alert {} (id {}) is not stored", token, id);
            }
            Ok(())
        })
    }

    fn clear_database(&self) -> Result<(), StorageError> {
        self.with_connection(|connection| {
            connection.execute_batch("DELETE FROM alerts; DELETE FROM offline_alerts;")?;
            info!("cleared alert database");
            Ok(())
        })
    }
}
