//! Set-union of two catalogs keyed by blob filename.
//!
//! Rows are only ever added to the destination. A filename already present in
//! the destination keeps the destination's row; the source copy is dropped.

use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::catalog::CatalogStore;
use crate::model::NewImage;

/// Fold every row of `source` that `destination` lacks into `destination`.
///
/// Topics are matched by name and image rows by filename, so surrogate ids of
/// the two replicas never meet. Returns the number of image rows inserted.
/// The whole merge is one destination transaction.
pub fn merge(source: &CatalogStore, destination: &mut CatalogStore) -> Result<usize> {
    let source_topics = source.topics().context("read source topics")?;
    let source_topic_names: HashMap<i64, String> = source_topics
        .iter()
        .map(|t| (t.id, t.name.clone()))
        .collect();
    let existing = destination
        .image_filenames()
        .context("read destination filenames")?;
    let source_images = source.images().context("read source images")?;
    let source_count = source_images.len();
    let candidates: Vec<_> = source_images
        .into_iter()
        .filter(|img| !existing.contains(&img.image))
        .collect();
    let already_present = source_count - candidates.len();

    let (inserted, unresolved) = destination.write_batch(|w| {
        for topic in &source_topics {
            w.insert_topic(&topic.name)?;
        }

        let mut dest_topic_ids: HashMap<&str, i64> = HashMap::new();
        let mut inserted = 0usize;
        let mut unresolved = 0usize;
        for img in &candidates {
            let Some(name) = img.topic_id.and_then(|id| source_topic_names.get(&id)) else {
                tracing::warn!(
                    image = %img.image,
                    topic_id = ?img.topic_id,
                    "data integrity: source image has no topic, skipping"
                );
                unresolved += 1;
                continue;
            };

            let dest_id = match dest_topic_ids.get(name.as_str()) {
                Some(id) => Some(*id),
                None => {
                    let id = w.topic_id(name)?;
                    if let Some(id) = id {
                        dest_topic_ids.insert(name.as_str(), id);
                    }
                    id
                }
            };
            let Some(dest_id) = dest_id else {
                tracing::warn!(
                    image = %img.image,
                    topic = %name,
                    "data integrity: topic missing in destination, skipping"
                );
                unresolved += 1;
                continue;
            };

            if w.insert_image(&NewImage::rehomed(img, dest_id))? {
                inserted += 1;
            }
        }
        Ok((inserted, unresolved))
    })?;

    tracing::info!(
        inserted,
        already_present,
        unresolved,
        "catalog merge complete"
    );
    Ok(inserted)
}
