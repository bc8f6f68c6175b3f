//! Database access layer

pub mod notifications;

pub use notifications::{NewNotification, Notification};

use sqlx::SqlitePool;
use tasktrack_common::Result;

/// Create the notifications table if missing
pub async fn init_schema(db: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            service TEXT NOT NULL,
            type TEXT NOT NULL,
            message TEXT NOT NULL,
            user_id INTEGER,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(db)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications (user_id, created_at)")
        .execute(db)
        .await?;

    Ok(())
}
