//! Notification record queries
//!
//! Unlike progress rows, notifications are mutable: they are marked read or
//! deleted by their owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use tasktrack_common::{time, Result};

const SELECT_COLUMNS: &str =
    "SELECT id, service, type, message, user_id, is_read, created_at FROM notifications";

/// Stored notification, also the payload pushed to realtime clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub service: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub user_id: Option<i64>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let created_at: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            service: row.try_get("service")?,
            kind: row.try_get("type")?,
            message: row.try_get("message")?,
            user_id: row.try_get("user_id")?,
            is_read: row.try_get("is_read")?,
            created_at: time::from_db(&created_at)?,
        })
    }
}

/// Row to insert; always stored unread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub service: String,
    pub kind: String,
    pub message: String,
    pub user_id: Option<i64>,
}

pub async fn insert(db: &SqlitePool, new: &NewNotification) -> Result<Notification> {
    let id = sqlx::query(
        r#"
        INSERT INTO notifications (service, type, message, user_id, is_read, created_at)
        VALUES (?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(&new.service)
    .bind(&new.kind)
    .bind(&new.message)
    .bind(new.user_id)
    .bind(time::to_db(&time::now()))
    .execute(db)
    .await?
    .last_insert_rowid();

    find_by_id(db, id).await?.ok_or_else(|| {
        tasktrack_common::Error::Internal(format!("Inserted notification {} not readable", id))
    })
}

pub async fn find_by_id(db: &SqlitePool, id: i64) -> Result<Option<Notification>> {
    let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(db).await?;
    row.as_ref().map(Notification::from_row).transpose()
}

/// Every notification, newest first
pub async fn list_all(db: &SqlitePool) -> Result<Vec<Notification>> {
    let sql = format!("{} ORDER BY created_at DESC, id DESC", SELECT_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(db).await?;
    rows.iter().map(Notification::from_row).collect()
}

/// Notifications of one user, newest first
pub async fn list_for_user(db: &SqlitePool, user_id: i64) -> Result<Vec<Notification>> {
    let sql = format!(
        "{} WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        SELECT_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(user_id).fetch_all(db).await?;
    rows.iter().map(Notification::from_row).collect()
}

pub async fn latest_for_user(db: &SqlitePool, user_id: i64) -> Result<Option<Notification>> {
    let sql = format!(
        "{} WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        SELECT_COLUMNS
    );
    let row = sqlx::query(&sql).bind(user_id).fetch_optional(db).await?;
    row.as_ref().map(Notification::from_row).transpose()
}

/// Returns whether the row existed
pub async fn mark_read(db: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete `id` only if it belongs to `user_id`; returns whether a row went away
pub async fn delete_owned(db: &SqlitePool, id: i64, user_id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}
