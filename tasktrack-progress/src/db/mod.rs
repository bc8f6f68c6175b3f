//! Database access layer
//!
//! The progress table is append-only: every state change is a new row and
//! the current state of a `(task_id, user_id)` pair is its latest row.

pub mod progress;

pub use progress::{NewProgress, ProgressRecord, ProgressStats, RoleScope};

use sqlx::SqlitePool;
use tasktrack_common::Result;

/// Create the progress table and its indexes if missing
pub async fn init_schema(db: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS progress (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL,
            task_type TEXT NOT NULL CHECK (task_type IN ('Individual', 'Group')),
            group_id INTEGER,
            user_id INTEGER NOT NULL,
            user_name TEXT,
            dosen_name TEXT,
            created_by INTEGER,
            assigned_to INTEGER,
            progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
            status TEXT NOT NULL DEFAULT 'Pending',
            description TEXT,
            document TEXT,
            storage_key TEXT,
            dosen_comment TEXT,
            grade INTEGER CHECK (grade IS NULL OR grade BETWEEN 0 AND 100),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_progress_task_user ON progress (task_id, user_id, created_at)",
    )
    .execute(db)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_progress_user ON progress (user_id)")
        .execute(db)
        .await?;

    Ok(())
}
