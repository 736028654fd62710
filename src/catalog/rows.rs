use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::model::{Image, NewImage};

pub(super) const IMAGE_COLUMNS: &str =
    "id, topic_id, image, prompt, width, height, seed, created_at, updated_at, notes, is_favorite";

pub(super) fn image_from_row(row: &Row<'_>) -> rusqlite::Result<Image> {
    Ok(Image {
        id: row.get(0)?,
        topic_id: row.get(1)?,
        image: row.get(2)?,
        prompt: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        seed: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        notes: row.get(9)?,
        is_favorite: row.get::<_, Option<i64>>(10)?.unwrap_or(0) != 0,
    })
}

pub(super) fn insert_topic(conn: &Connection, name: &str) -> Result<bool> {
    let n = conn
        .execute("INSERT OR IGNORE INTO topic (name) VALUES (?1)", [name])
        .with_context(|| format!("insert topic {}", name))?;
    Ok(n > 0)
}

pub(super) fn topic_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
    conn.query_row("SELECT id FROM topic WHERE name = ?1", [name], |row| {
        row.get(0)
    })
    .optional()
    .with_context(|| format!("look up topic {}", name))
}

pub(super) fn insert_image(conn: &Connection, image: &NewImage) -> Result<bool> {
    // COALESCE keeps the column default when the caller has no timestamp.
    let n = conn
        .execute(
            "INSERT OR IGNORE INTO image
               (topic_id, image, prompt, width, height, seed, created_at, updated_at, notes, is_favorite)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6,
               COALESCE(?7, CURRENT_TIMESTAMP), COALESCE(?8, CURRENT_TIMESTAMP), ?9, ?10)",
            params![
                image.topic_id,
                image.image,
                image.prompt,
                image.width,
                image.height,
                image.seed,
                image.created_at,
                image.updated_at,
                image.notes,
                image.is_favorite,
            ],
        )
        .with_context(|| format!("insert image {}", image.image))?;
    Ok(n > 0)
}
