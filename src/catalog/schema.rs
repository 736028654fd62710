use anyhow::{Context, Result};
use rusqlite::Connection;

const CREATE_TOPIC: &str = "CREATE TABLE IF NOT EXISTS topic (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
)";

const CREATE_IMAGE: &str = "CREATE TABLE IF NOT EXISTS image (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic_id INTEGER,
    image TEXT NOT NULL UNIQUE,
    prompt TEXT NOT NULL,
    width INTEGER,
    height INTEGER,
    seed INTEGER,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    notes TEXT,
    is_favorite INTEGER DEFAULT 0,
    FOREIGN KEY (topic_id) REFERENCES topic (id)
)";

/// Both statements are `IF NOT EXISTS`; running this on a populated catalog is a no-op.
pub(super) fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_TOPIC, []).context("create topic table")?;
    conn.execute(CREATE_IMAGE, []).context("create image table")?;
    Ok(())
}
