//! Progress record queries
//!
//! "Latest" ordering is `created_at DESC, id DESC` so that rows written in the
//! same millisecond still order by insertion.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};

use tasktrack_common::events::{ProgressStatus, TaskType};
use tasktrack_common::{time, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT id, task_id, task_type, group_id, user_id, user_name, dosen_name,
           created_by, assigned_to, progress, status, description, document,
           storage_key, dosen_comment, grade, created_at
    FROM progress
"#;

/// One row of a `(task_id, user_id)` progress history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub id: i64,
    pub task_id: i64,
    pub task_type: TaskType,
    pub group_id: Option<i64>,
    pub user_id: i64,
    pub user_name: Option<String>,
    pub dosen_name: Option<String>,
    /// Task author
    pub created_by: Option<i64>,
    pub assigned_to: Option<i64>,
    pub progress: i64,
    pub status: ProgressStatus,
    pub description: Option<String>,
    pub document: Option<String>,
    #[serde(skip_serializing)]
    pub storage_key: Option<String>,
    pub dosen_comment: Option<String>,
    pub grade: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ProgressRecord {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let task_type: String = row.try_get("task_type")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            task_type: task_type.parse()?,
            group_id: row.try_get("group_id")?,
            user_id: row.try_get("user_id")?,
            user_name: row.try_get("user_name")?,
            dosen_name: row.try_get("dosen_name")?,
            created_by: row.try_get("created_by")?,
            assigned_to: row.try_get("assigned_to")?,
            progress: row.try_get("progress")?,
            status: status.parse()?,
            description: row.try_get("description")?,
            document: row.try_get("document")?,
            storage_key: row.try_get("storage_key")?,
            dosen_comment: row.try_get("dosen_comment")?,
            grade: row.try_get("grade")?,
            created_at: time::from_db(&created_at)?,
        })
    }
}

/// Row to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewProgress {
    pub task_id: i64,
    pub task_type: TaskType,
    pub group_id: Option<i64>,
    pub user_id: i64,
    pub user_name: Option<String>,
    pub dosen_name: Option<String>,
    pub created_by: Option<i64>,
    pub assigned_to: Option<i64>,
    pub progress: i64,
    pub status: ProgressStatus,
    pub description: Option<String>,
    pub document: Option<String>,
    pub storage_key: Option<String>,
    pub dosen_comment: Option<String>,
    pub grade: Option<i64>,
}

impl NewProgress {
    /// Seed row for a freshly assigned task: progress 0, Pending
    pub fn seed(task_id: i64, task_type: TaskType, user_id: i64) -> Self {
        Self {
            task_id,
            task_type,
            group_id: None,
            user_id,
            user_name: None,
            dosen_name: None,
            created_by: None,
            assigned_to: Some(user_id),
            progress: 0,
            status: ProgressStatus::Pending,
            description: None,
            document: None,
            storage_key: None,
            dosen_comment: None,
            grade: None,
        }
    }
}

/// Which rows of a task a caller may delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleScope {
    All,
    AssignedTo(i64),
    CreatedBy(i64),
}

impl RoleScope {
    fn clause(&self) -> (&'static str, Option<i64>) {
        match self {
            RoleScope::All => ("", None),
            RoleScope::AssignedTo(id) => (" AND assigned_to = ?", Some(*id)),
            RoleScope::CreatedBy(id) => (" AND created_by = ?", Some(*id)),
        }
    }
}

/// Aggregate over every row of a user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressStats {
    pub total: i64,
    pub done: i64,
    pub avg: f64,
}

const INSERT_COLUMNS: &str = r#"
    INSERT INTO progress (
        task_id, task_type, group_id, user_id, user_name, dosen_name,
        created_by, assigned_to, progress, status, description, document,
        storage_key, dosen_comment, grade, created_at
    )
"#;

type ProgressQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_row<'q>(query: ProgressQuery<'q>, row: &'q NewProgress, created_at: String) -> ProgressQuery<'q> {
    query
        .bind(row.task_id)
        .bind(row.task_type.as_str())
        .bind(row.group_id)
        .bind(row.user_id)
        .bind(&row.user_name)
        .bind(&row.dosen_name)
        .bind(row.created_by)
        .bind(row.assigned_to)
        .bind(row.progress)
        .bind(row.status.as_str())
        .bind(&row.description)
        .bind(&row.document)
        .bind(&row.storage_key)
        .bind(&row.dosen_comment)
        .bind(row.grade)
        .bind(created_at)
}

async fn read_back(db: &SqlitePool, id: i64) -> Result<ProgressRecord> {
    find_by_id(db, id).await?.ok_or_else(|| {
        tasktrack_common::Error::Internal(format!("Inserted progress row {} not readable", id))
    })
}

/// Insert a row and return it as stored
pub async fn insert(db: &SqlitePool, row: &NewProgress) -> Result<ProgressRecord> {
    let sql = format!(
        "{} VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        INSERT_COLUMNS
    );
    let id = bind_row(sqlx::query(&sql), row, time::to_db(&time::now()))
        .execute(db)
        .await?
        .last_insert_rowid();

    read_back(db, id).await
}

/// Append `row` only while `expected_latest` is still the latest row of its
/// `(task_id, user_id)` pair
///
/// The check and the insert are one statement, so concurrent writers (in this
/// process or another one sharing the database) cannot both append on top of
/// the same state. Returns `None` when another row got there first.
pub async fn append_if_latest(
    db: &SqlitePool,
    row: &NewProgress,
    expected_latest: i64,
) -> Result<Option<ProgressRecord>> {
    let sql = format!(
        r#"{}
        SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
        WHERE (
            SELECT id FROM progress
            WHERE task_id = ? AND user_id = ?
            ORDER BY created_at DESC, id DESC LIMIT 1
        ) = ?"#,
        INSERT_COLUMNS
    );
    let result = bind_row(sqlx::query(&sql), row, time::to_db(&time::now()))
        .bind(row.task_id)
        .bind(row.user_id)
        .bind(expected_latest)
        .execute(db)
        .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    read_back(db, result.last_insert_rowid()).await.map(Some)
}

pub async fn find_by_id(db: &SqlitePool, id: i64) -> Result<Option<ProgressRecord>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id)
        .fetch_optional(db)
        .await?;
    row.as_ref().map(ProgressRecord::from_row).transpose()
}

/// Current state of a `(task_id, user_id)` pair
pub async fn latest_for(db: &SqlitePool, task_id: i64, user_id: i64) -> Result<Option<ProgressRecord>> {
    let row = sqlx::query(&format!(
        "{} WHERE task_id = ? AND user_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        SELECT_COLUMNS
    ))
    .bind(task_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    row.as_ref().map(ProgressRecord::from_row).transpose()
}

/// Every row of a task, newest first
pub async fn list_by_task(db: &SqlitePool, task_id: i64, task_type: TaskType) -> Result<Vec<ProgressRecord>> {
    let rows = sqlx::query(&format!(
        "{} WHERE task_id = ? AND task_type = ? ORDER BY created_at DESC, id DESC",
        SELECT_COLUMNS
    ))
    .bind(task_id)
    .bind(task_type.as_str())
    .fetch_all(db)
    .await?;
    rows.iter().map(ProgressRecord::from_row).collect()
}

/// Every row of a user, newest first
pub async fn list_by_user(db: &SqlitePool, user_id: i64) -> Result<Vec<ProgressRecord>> {
    let rows = sqlx::query(&format!(
        "{} WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        SELECT_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(db)
    .await?;
    rows.iter().map(ProgressRecord::from_row).collect()
}

/// Full history of one `(task_id, user_id)` pair, oldest first
pub async fn history(db: &SqlitePool, task_id: i64, user_id: i64) -> Result<Vec<ProgressRecord>> {
    let rows = sqlx::query(&format!(
        "{} WHERE task_id = ? AND user_id = ? ORDER BY created_at ASC, id ASC",
        SELECT_COLUMNS
    ))
    .bind(task_id)
    .bind(user_id)
    .fetch_all(db)
    .await?;
    rows.iter().map(ProgressRecord::from_row).collect()
}

async fn exists(db: &SqlitePool, task_id: i64, task_type: TaskType, scope: RoleScope) -> Result<bool> {
    let (clause, param) = scope.clause();
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM progress WHERE task_id = ? AND task_type = ?{})",
        clause
    );
    let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(task_id).bind(task_type.as_str());
    if let Some(id) = param {
        query = query.bind(id);
    }
    Ok(query.fetch_one(db).await? != 0)
}

pub async fn task_exists(db: &SqlitePool, task_id: i64, task_type: TaskType) -> Result<bool> {
    exists(db, task_id, task_type, RoleScope::All).await
}

pub async fn is_assigned(db: &SqlitePool, task_id: i64, task_type: TaskType, user_id: i64) -> Result<bool> {
    exists(db, task_id, task_type, RoleScope::AssignedTo(user_id)).await
}

pub async fn is_creator(db: &SqlitePool, task_id: i64, task_type: TaskType, user_id: i64) -> Result<bool> {
    exists(db, task_id, task_type, RoleScope::CreatedBy(user_id)).await
}

/// Document storage keys of the rows `scope` selects
pub async fn storage_keys(
    db: &SqlitePool,
    task_id: i64,
    task_type: TaskType,
    scope: RoleScope,
) -> Result<Vec<String>> {
    let (clause, param) = scope.clause();
    let sql = format!(
        "SELECT storage_key FROM progress WHERE task_id = ? AND task_type = ? AND storage_key IS NOT NULL{}",
        clause
    );
    let mut query = sqlx::query_scalar::<_, String>(&sql).bind(task_id).bind(task_type.as_str());
    if let Some(id) = param {
        query = query.bind(id);
    }
    Ok(query.fetch_all(db).await?)
}

/// Delete the rows `scope` selects; returns the number removed
pub async fn delete_by_task(db: &SqlitePool, task_id: i64, task_type: TaskType, scope: RoleScope) -> Result<u64> {
    let (clause, param) = scope.clause();
    let sql = format!("DELETE FROM progress WHERE task_id = ? AND task_type = ?{}", clause);
    let mut query = sqlx::query(&sql).bind(task_id).bind(task_type.as_str());
    if let Some(id) = param {
        query = query.bind(id);
    }
    Ok(query.execute(db).await?.rows_affected())
}

pub async fn stats_for_user(db: &SqlitePool, user_id: i64) -> Result<ProgressStats> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total,
               COALESCE(SUM(CASE WHEN status = 'Done' THEN 1 ELSE 0 END), 0) AS done,
               COALESCE(SUM(progress), 0) AS progress_sum
        FROM progress
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_one(db)
    .await?;

    let total: i64 = row.try_get("total")?;
    let done: i64 = row.try_get("done")?;
    let sum: i64 = row.try_get("progress_sum")?;

    Ok(ProgressStats {
        total,
        done,
        avg: sum as f64 / total.max(1) as f64,
    })
}
