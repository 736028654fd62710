//! SQLite-backed catalog of topics and images.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::model::{CatalogSummary, Image, NewImage, Page, Topic};

mod rows;
mod schema;

use self::rows::{IMAGE_COLUMNS, image_from_row, insert_image, insert_topic, topic_id};

pub struct CatalogStore {
    conn: Connection,
    path: PathBuf,
}

/// Write handle valid for the duration of [`CatalogStore::write_batch`].
pub struct CatalogWriter<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl CatalogStore {
    /// Open (creating if needed) the catalog file and make sure both tables exist.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create catalog dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open catalog {}", path.display()))?;
        let store = Self {
            conn,
            path: path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// In-memory catalog, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory catalog")?;
        let store = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn ensure_schema(&self) -> Result<()> {
        schema::ensure_schema(&self.conn)
            .with_context(|| format!("ensure schema for {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert `name` if absent and return its id in this catalog.
    pub fn ensure_topic(&self, name: &str) -> Result<i64> {
        insert_topic(&self.conn, name)?;
        topic_id(&self.conn, name)?
            .with_context(|| format!("topic {} missing after insert", name))
    }

    pub fn topic_id(&self, name: &str) -> Result<Option<i64>> {
        topic_id(&self.conn, name)
    }

    pub fn topic(&self, id: i64) -> Result<Option<Topic>> {
        self.conn
            .query_row("SELECT id, name FROM topic WHERE id = ?1", [id], |row| {
                Ok(Topic {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .optional()
            .context("query topic by id")
    }

    pub fn topics(&self) -> Result<Vec<Topic>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM topic ORDER BY id")
            .context("prepare topics query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Topic {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .context("query topics")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read topic rows")
    }

    pub fn images(&self) -> Result<Vec<Image>> {
        let sql = format!("SELECT {} FROM image ORDER BY id", IMAGE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql).context("prepare images query")?;
        let rows = stmt.query_map([], image_from_row).context("query images")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read image rows")
    }

    pub fn image_by_filename(&self, filename: &str) -> Result<Option<Image>> {
        let sql = format!("SELECT {} FROM image WHERE image = ?1", IMAGE_COLUMNS);
        self.conn
            .query_row(&sql, [filename], image_from_row)
            .optional()
            .context("query image by filename")
    }

    /// Every blob filename referenced by this catalog.
    pub fn image_filenames(&self) -> Result<std::collections::HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT image FROM image")
            .context("prepare filename query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query filenames")?;
        rows.collect::<rusqlite::Result<_>>()
            .context("read filename rows")
    }

    /// Returns `false` when a row with the same filename already exists.
    pub fn insert_image(&self, image: &NewImage) -> Result<bool> {
        insert_image(&self.conn, image)
    }

    pub fn summary(&self) -> Result<CatalogSummary> {
        let topics: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM topic", [], |row| row.get(0))
            .context("count topics")?;
        let images: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM image", [], |row| row.get(0))
            .context("count images")?;
        Ok(CatalogSummary {
            topics: topics as u64,
            images: images as u64,
        })
    }

    /// Topics ordered by name. `page` is 1-based and clamped to at least 1.
    pub fn topic_page(&self, page: u32, per_page: u32) -> Result<Page<Topic>> {
        let total = self.summary()?.topics;
        let (page, offset) = page_window(page, per_page);
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM topic ORDER BY name LIMIT ?1 OFFSET ?2")
            .context("prepare topic page query")?;
        let items = stmt
            .query_map(params![per_page, offset], |row| {
                Ok(Topic {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .context("query topic page")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read topic page")?;
        Ok(Page {
            items,
            page,
            total_pages: total_pages(total, per_page),
            total,
        })
    }

    /// Images of one topic, newest first.
    pub fn images_for_topic(&self, topic_id: i64, page: u32, per_page: u32) -> Result<Page<Image>> {
        let total: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM image WHERE topic_id = ?1",
                [topic_id],
                |row| row.get(0),
            )
            .context("count topic images")?;
        let total = total as u64;
        let (page, offset) = page_window(page, per_page);
        let sql = format!(
            "SELECT {} FROM image WHERE topic_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            IMAGE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).context("prepare image page query")?;
        let items = stmt
            .query_map(params![topic_id, per_page, offset], image_from_row)
            .context("query image page")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read image page")?;
        Ok(Page {
            items,
            page,
            total_pages: total_pages(total, per_page),
            total,
        })
    }

    /// Run `f` inside one transaction; nothing is written unless `f` succeeds.
    pub fn write_batch<T>(&mut self, f: impl FnOnce(&CatalogWriter<'_>) -> Result<T>) -> Result<T> {
        let tx = self
            .conn
            .transaction()
            .context("begin catalog transaction")?;
        let writer = CatalogWriter { tx };
        let out = f(&writer)?;
        writer
            .tx
            .commit()
            .with_context(|| format!("commit catalog {}", self.path.display()))?;
        Ok(out)
    }
}

impl CatalogWriter<'_> {
    /// Idempotent: returns `false` if the name was already present.
    pub fn insert_topic(&self, name: &str) -> Result<bool> {
        insert_topic(&self.tx, name)
    }

    pub fn topic_id(&self, name: &str) -> Result<Option<i64>> {
        topic_id(&self.tx, name)
    }

    pub fn insert_image(&self, image: &NewImage) -> Result<bool> {
        insert_image(&self.tx, image)
    }
}

fn page_window(page: u32, per_page: u32) -> (u32, i64) {
    let page = page.max(1);
    (page, i64::from(page - 1) * i64::from(per_page))
}

fn total_pages(total: u64, per_page: u32) -> u32 {
    if total == 0 || per_page == 0 {
        return 1;
    }
    total.div_ceil(u64::from(per_page)) as u32
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
