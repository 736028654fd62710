use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;

use crate::config::GeneratorConfig;
use crate::model::{new_image_filename, random_seed};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedWallpaper {
    /// Bare file name inside the blob directory.
    pub filename: String,
    pub seed: i64,
}

/// Anything that turns a prompt into a stored image file.
pub trait WallpaperSource {
    fn generate(&self, prompt: &str, width: u32, height: u32) -> Result<GeneratedWallpaper>;
}

/// Fills in an image URL template and stores the response body as a new blob.
pub struct WallpaperClient {
    client: Client,
    template: String,
    blob_dir: PathBuf,
}

impl WallpaperClient {
    pub fn new(cfg: &GeneratorConfig, blob_dir: &Path) -> Result<Self> {
        let template = cfg
            .image_url_template
            .as_deref()
            .context("IMAGE_GENERATOR_URL_TEMPLATE is not set")?;
        let client = Client::builder()
            .user_agent("wpg")
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            client,
            template: template.to_string(),
            blob_dir: blob_dir.to_path_buf(),
        })
    }
}

impl WallpaperSource for WallpaperClient {
    fn generate(&self, prompt: &str, width: u32, height: u32) -> Result<GeneratedWallpaper> {
        let seed = random_seed()?;
        let url = render_url(&self.template, prompt, width, height, seed)?;
        tracing::debug!(%url, "request wallpaper");
        let resp = self
            .client
            .get(url)
            .send()
            .context("request wallpaper")?
            .error_for_status()
            .context("wallpaper endpoint")?;
        let bytes = resp.bytes().context("read wallpaper body")?;

        fs::create_dir_all(&self.blob_dir)
            .with_context(|| format!("create dir {}", self.blob_dir.display()))?;
        let filename = new_image_filename()?;
        let path = self.blob_dir.join(&filename);
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        fs::write(&tmp, &bytes).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(GeneratedWallpaper { filename, seed })
    }
}

/// Substitute the template placeholders; the prompt goes in percent-encoded as one path segment.
pub fn render_url(
    template: &str,
    prompt: &str,
    width: u32,
    height: u32,
    seed: i64,
) -> Result<reqwest::Url> {
    let rendered = template
        .replace("{prompt}", &encode_segment(prompt)?)
        .replace("{width}", &width.to_string())
        .replace("{height}", &height.to_string())
        .replace("{seed}", &seed.to_string());
    reqwest::Url::parse(&rendered).with_context(|| format!("parse image url {}", rendered))
}

fn encode_segment(s: &str) -> Result<String> {
    let mut url = reqwest::Url::parse("http://localhost/").context("parse scratch url")?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("scratch url cannot hold a path"))?
        .clear()
        .push(s);
    Ok(url.path().trim_start_matches('/').to_string())
}
