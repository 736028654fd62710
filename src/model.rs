use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A generation topic. `name` is the identity across replicas; `id` is replica-local.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub name: String,
}

/// One generated wallpaper row.
///
/// `image` is the blob filename and the merge key. `id` and `topic_id` are
/// surrogate keys of the catalog the row was read from and mean nothing in
/// another replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub topic_id: Option<i64>,
    pub image: String,
    pub prompt: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub seed: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub notes: Option<String>,
    pub is_favorite: bool,
}

/// Insert payload for the `image` table.
///
/// Timestamps left as `None` take the column default (`CURRENT_TIMESTAMP`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewImage {
    pub topic_id: i64,
    pub image: String,
    pub prompt: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub seed: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub notes: Option<String>,
    pub is_favorite: bool,
}

impl NewImage {
    /// Carry every content column of `image` over verbatim under a different topic id.
    pub fn rehomed(image: &Image, topic_id: i64) -> Self {
        Self {
            topic_id,
            image: image.image.clone(),
            prompt: image.prompt.clone(),
            width: image.width,
            height: image.height,
            seed: image.seed,
            created_at: image.created_at.clone(),
            updated_at: image.updated_at.clone(),
            notes: image.notes.clone(),
            is_favorite: image.is_favorite,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub topics: u64,
    pub images: u64,
}

/// A page of rows plus the total row count behind it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub total_pages: u32,
    pub total: u64,
}

/// Fresh blob filename: 128 random bits in UUID text form, `.png` extension.
pub fn new_image_filename() -> Result<String> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes).map_err(|e| anyhow::anyhow!("getrandom: {:?}", e))?;
    // RFC 4122 version 4 / variant bits so the name reads as a v4 UUID.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let mut out = String::with_capacity(40);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{:02x}", b));
    }
    out.push_str(".png");
    Ok(out)
}

/// Uniform seed in `0..=1_000_000_000`.
pub fn random_seed() -> Result<i64> {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).map_err(|e| anyhow::anyhow!("getrandom: {:?}", e))?;
    Ok((u64::from_le_bytes(bytes) % 1_000_000_001) as i64)
}
