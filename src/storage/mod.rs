//! SQLite cache of derived metrics.
//!
//! One row per (entity type, entity id, day bucket). Syncing the same entity
//! twice on the same day overwrites the earlier row; a new day adds a row.

use crate::models::{EntityType, MetricSnapshot};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the metric store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Failed to serialize metrics: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt row in metric store: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metric_snapshots (
    entity_type TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    bucket      TEXT NOT NULL,
    name        TEXT NOT NULL,
    metrics     TEXT NOT NULL,
    fetched_at  TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id, bucket)
)";

const SELECT_COLUMNS: &str =
    "SELECT entity_type, entity_id, bucket, name, metrics, fetched_at FROM metric_snapshots";

/// Metric store backed by a single SQLite connection.
pub struct MetricStore {
    conn: Connection,
}

impl MetricStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
        }
        let conn = Connection::open(path)?;
        info!("Opened metric store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a snapshot or overwrite the one with the same key.
    pub fn upsert_snapshot(&self, snapshot: &MetricSnapshot) -> StoreResult<()> {
        upsert(&self.conn, snapshot)
    }

    /// Upsert many snapshots in one transaction.
    pub fn upsert_all(&mut self, snapshots: &[MetricSnapshot]) -> StoreResult<usize> {
        let tx = self.conn.transaction()?;
        for snapshot in snapshots {
            upsert(&tx, snapshot)?;
        }
        tx.commit()?;
        debug!("Upserted {} snapshots", snapshots.len());
        Ok(snapshots.len())
    }

    pub fn get_snapshot(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        bucket: &str,
    ) -> StoreResult<Option<MetricSnapshot>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE entity_type = ?1 AND entity_id = ?2 AND bucket = ?3"
        );
        let raw = self
            .conn
            .query_row(
                &sql,
                params![entity_type.as_str(), entity_id, bucket],
                RawSnapshot::from_row,
            )
            .optional()?;
        raw.map(RawSnapshot::into_snapshot).transpose()
    }

    /// Snapshots of one entity type, optionally limited to one bucket.
    pub fn list_snapshots(
        &self,
        entity_type: EntityType,
        bucket: Option<&str>,
    ) -> StoreResult<Vec<MetricSnapshot>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE entity_type = ?1 AND (?2 IS NULL OR bucket = ?2)
             ORDER BY bucket DESC, entity_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![entity_type.as_str(), bucket], RawSnapshot::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawSnapshot::into_snapshot).collect()
    }

    /// Total number of stored rows.
    pub fn count(&self) -> StoreResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM metric_snapshots", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn upsert(conn: &Connection, snapshot: &MetricSnapshot) -> StoreResult<()> {
    let metrics = serde_json::to_string(&snapshot.metrics)?;
    conn.execute(
        "INSERT INTO metric_snapshots (entity_type, entity_id, bucket, name, metrics, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(entity_type, entity_id, bucket) DO UPDATE SET
            name = excluded.name,
            metrics = excluded.metrics,
            fetched_at = excluded.fetched_at",
        params![
            snapshot.entity_type.as_str(),
            snapshot.entity_id,
            snapshot.bucket,
            snapshot.name,
            metrics,
            snapshot.fetched_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Column values before they are parsed back into typed fields.
struct RawSnapshot {
    entity_type: String,
    entity_id: String,
    bucket: String,
    name: String,
    metrics: String,
    fetched_at: String,
}

impl RawSnapshot {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_type: row.get(0)?,
            entity_id: row.get(1)?,
            bucket: row.get(2)?,
            name: row.get(3)?,
            metrics: row.get(4)?,
            fetched_at: row.get(5)?,
        })
    }

    fn into_snapshot(self) -> StoreResult<MetricSnapshot> {
        let entity_type = EntityType::parse(&self.entity_type).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown entity type '{}'", self.entity_type))
        })?;
        let fetched_at = DateTime::parse_from_rfc3339(&self.fetched_at)
            .map_err(|e| StoreError::Corrupt(format!("bad fetched_at '{}': {e}", self.fetched_at)))?
            .with_timezone(&Utc);

        Ok(MetricSnapshot {
            entity_type,
            entity_id: self.entity_id,
            bucket: self.bucket,
            name: self.name,
            metrics: serde_json::from_str(&self.metrics)?,
            fetched_at,
        })
    }
}
