//! Log record queries
//!
//! Records are written once by the consumer and only ever removed by an
//! administrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use tasktrack_common::{time, Result};

const SELECT_COLUMNS: &str =
    "SELECT id, channel, service, level, event_type, message, metadata, created_at FROM logs";

/// Stored side-channel record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    pub channel: Option<String>,
    pub service: Option<String>,
    pub level: Option<String>,
    pub event_type: Option<String>,
    pub message: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let metadata: Option<String> = row.try_get("metadata")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            channel: row.try_get("channel")?,
            service: row.try_get("service")?,
            level: row.try_get("level")?,
            event_type: row.try_get("event_type")?,
            message: row.try_get("message")?,
            metadata: metadata.map(|m| serde_json::from_str::<Value>(&m)).transpose()?,
            created_at: time::from_db(&created_at)?,
        })
    }
}

/// Record as read off the log queue
///
/// Every field is optional: whatever a publisher sent is kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewLogEntry {
    pub channel: Option<String>,
    pub service: Option<String>,
    pub level: Option<String>,
    pub event_type: Option<String>,
    pub message: Option<String>,
    pub metadata: Option<Value>,
}

pub async fn insert(db: &SqlitePool, entry: &NewLogEntry) -> Result<LogEntry> {
    let metadata = entry.metadata.as_ref().map(serde_json::to_string).transpose()?;

    let id = sqlx::query(
        r#"
        INSERT INTO logs (channel, service, level, event_type, message, metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.channel)
    .bind(&entry.service)
    .bind(&entry.level)
    .bind(&entry.event_type)
    .bind(&entry.message)
    .bind(metadata)
    .bind(time::to_db(&time::now()))
    .execute(db)
    .await?
    .last_insert_rowid();

    find_by_id(db, id).await?.ok_or_else(|| {
        tasktrack_common::Error::Internal(format!("Inserted log {} not readable", id))
    })
}

pub async fn find_by_id(db: &SqlitePool, id: i64) -> Result<Option<LogEntry>> {
    let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(db).await?;
    row.as_ref().map(LogEntry::from_row).transpose()
}

/// Every record, newest first
pub async fn list_all(db: &SqlitePool) -> Result<Vec<LogEntry>> {
    let sql = format!("{} ORDER BY created_at DESC, id DESC", SELECT_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(db).await?;
    rows.iter().map(LogEntry::from_row).collect()
}

/// Returns whether the row existed
pub async fn delete(db: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM logs WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}
