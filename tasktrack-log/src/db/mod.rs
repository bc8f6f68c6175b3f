//! Database access layer

pub mod logs;

pub use logs::{LogEntry, NewLogEntry};

use sqlx::SqlitePool;
use tasktrack_common::Result;

/// Create the logs table if missing
pub async fn init_schema(db: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel TEXT,
            service TEXT,
            level TEXT,
            event_type TEXT,
            message TEXT,
            metadata TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_created ON logs (created_at)")
        .execute(db)
        .await?;

    Ok(())
}
