use super::*;

fn image(topic_id: i64, name: &str) -> NewImage {
    NewImage {
        topic_id,
        image: name.to_string(),
        prompt: format!("prompt for {}", name),
        ..Default::default()
    }
}

#[test]
fn schema_is_idempotent_and_file_is_created() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let path = tmp.path().join("nested").join("wallpapers.db");
    let store = CatalogStore::open(&path)?;
    store.ensure_schema()?;
    drop(store);
    let again = CatalogStore::open(&path)?;
    assert_eq!(again.summary()?, CatalogSummary::default());
    assert!(path.is_file());
    Ok(())
}

#[test]
fn ensure_topic_returns_stable_id() -> Result<()> {
    let store = CatalogStore::open_in_memory()?;
    let a = store.ensure_topic("desert")?;
    let b = store.ensure_topic("ocean")?;
    assert_ne!(a, b);
    assert_eq!(store.ensure_topic("desert")?, a);
    assert_eq!(store.topic(a)?.map(|t| t.name), Some("desert".to_string()));
    Ok(())
}

#[test]
fn insert_image_ignores_duplicate_filename() -> Result<()> {
    let store = CatalogStore::open_in_memory()?;
    let t = store.ensure_topic("desert")?;
    assert!(store.insert_image(&image(t, "a.png"))?);
    let mut dup = image(t, "a.png");
    dup.prompt = "other".to_string();
    assert!(!store.insert_image(&dup)?);

    let row = store.image_by_filename("a.png")?.context("row present")?;
    assert_eq!(row.prompt, "prompt for a.png");
    assert!(!row.is_favorite);
    assert!(row.created_at.is_some());
    Ok(())
}

#[test]
fn pages_are_counted_and_clamped() -> Result<()> {
    let store = CatalogStore::open_in_memory()?;
    for name in ["c", "a", "b"] {
        store.ensure_topic(name)?;
    }
    let first = store.topic_page(0, 2)?;
    assert_eq!(first.page, 1);
    assert_eq!(first.total, 3);
    assert_eq!(first.total_pages, 2);
    let names: Vec<_> = first.items.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);

    let second = store.topic_page(2, 2)?;
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].name, "c");
    Ok(())
}

#[test]
fn images_for_topic_newest_first() -> Result<()> {
    let store = CatalogStore::open_in_memory()?;
    let t = store.ensure_topic("desert")?;
    let other = store.ensure_topic("ocean")?;
    for (name, ts) in [("old.png", "2024-01-01 00:00:00"), ("new.png", "2025-01-01 00:00:00")] {
        let mut img = image(t, name);
        img.created_at = Some(ts.to_string());
        store.insert_image(&img)?;
    }
    store.insert_image(&image(other, "sea.png"))?;

    let page = store.images_for_topic(t, 1, 10)?;
    assert_eq!(page.total, 2);
    assert_eq!(page.total_pages, 1);
    let names: Vec<_> = page.items.iter().map(|i| i.image.as_str()).collect();
    assert_eq!(names, vec!["new.png", "old.png"]);

    let empty = store.images_for_topic(9999, 1, 10)?;
    assert_eq!(empty.total, 0);
    assert_eq!(empty.total_pages, 1);
    Ok(())
}

#[test]
fn failed_batch_writes_nothing() -> Result<()> {
    let mut store = CatalogStore::open_in_memory()?;
    let res: Result<()> = store.write_batch(|w| {
        w.insert_topic("desert")?;
        anyhow::bail!("abort");
    });
    assert!(res.is_err());
    assert!(store.topic_id("desert")?.is_none());
    Ok(())
}
