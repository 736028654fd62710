use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Process-wide settings, built once in `main` and passed down by reference.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub catalog_file: String,
    pub blob_dir: String,
    pub archive_base_name: String,

    /// Byte ceiling for one archive part, in MiB.
    pub split_size_mb: u64,

    /// Worker threads used to upload archive parts.
    pub upload_parallelism: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            catalog_file: "wallpapers.db".to_string(),
            blob_dir: "wp".to_string(),
            archive_base_name: "wp_archive".to_string(),
            split_size_mb: 4500,
            upload_parallelism: 4,
        }
    }
}

impl DataConfig {
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(&self.catalog_file)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.backup", self.catalog_file))
    }

    pub fn blob_dir_path(&self) -> PathBuf {
        self.data_dir.join(&self.blob_dir)
    }

    /// `<archive_base_name>.tar`, the file name shared by the local bundle and
    /// (with a `.partNNN` suffix) by every remote part.
    pub fn archive_file_name(&self) -> String {
        format!("{}.{}", self.archive_base_name, crate::archive::BUNDLE_EXTENSION)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join(self.archive_file_name())
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(".sync.lock")
    }

    pub fn split_size_bytes(&self) -> u64 {
        self.split_size_mb.saturating_mul(MIB)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    pub repo_id: Option<String>,

    /// Per-request timeout; a single part upload can take many minutes.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            repo_id: None,
            timeout_secs: 3600,
        }
    }
}

impl RemoteConfig {
    pub fn require_base_url(&self) -> Result<&str> {
        self.base_url
            .as_deref()
            .context("no remote configured (set WPG_REMOTE_URL)")
    }

    pub fn require_token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .context("no remote token configured (set WPG_REMOTE_TOKEN)")
    }

    pub fn require_repo_id(&self) -> Result<&str> {
        self.repo_id
            .as_deref()
            .context("no dataset repository configured (set WPG_DATASET_REPO_ID)")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Image endpoint with `{prompt}`, `{width}`, `{height}` and `{seed}` placeholders.
    pub image_url_template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub genai_api_key: Option<String>,

    pub genai_model: String,
    pub genai_base_url: String,
    pub prompt_batch_size: usize,
    pub width: u32,
    pub height: u32,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            image_url_template: None,
            genai_api_key: None,
            genai_model: "gemini-2.5-flash".to_string(),
            genai_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            prompt_batch_size: 50,
            width: 1280,
            height: 768,
            timeout_secs: 300,
        }
    }
}

impl Config {
    /// Read the optional JSON file, then let environment variables override it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => {
                let bytes =
                    fs::read(path).with_context(|| format!("read config {}", path.display()))?;
                serde_json::from_slice::<Config>(&bytes)
                    .with_context(|| format!("parse config {}", path.display()))?
            }
            None => Config::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Overlay values from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WPG_DATA_DIR") {
            self.data.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("WPG_SPLIT_SIZE_MB") {
            self.data.split_size_mb = v
                .parse()
                .with_context(|| format!("parse WPG_SPLIT_SIZE_MB={}", v))?;
        }
        if let Some(v) = get("WPG_UPLOAD_PARALLELISM") {
            self.data.upload_parallelism = v
                .parse()
                .with_context(|| format!("parse WPG_UPLOAD_PARALLELISM={}", v))?;
        }
        if let Some(v) = get("WPG_REMOTE_URL") {
            self.remote.base_url = Some(v.trim_end_matches('/').to_string());
        }
        if let Some(v) = get("WPG_REMOTE_TOKEN") {
            self.remote.token = Some(v);
        }
        if let Some(v) = get("WPG_DATASET_REPO_ID") {
            self.remote.repo_id = Some(v);
        }
        if let Some(v) = get("WPG_REMOTE_TIMEOUT_SECS") {
            self.remote.timeout_secs = v
                .parse()
                .with_context(|| format!("parse WPG_REMOTE_TIMEOUT_SECS={}", v))?;
        }
        if let Some(v) = get("IMAGE_GENERATOR_URL_TEMPLATE") {
            self.generator.image_url_template = Some(v);
        }
        if let Some(v) = get("GOOGLE_GENAI_API_KEY") {
            self.generator.genai_api_key = Some(v);
        }
        if let Some(v) = get("GOOGLE_GENAI_MODEL") {
            self.generator.genai_model = v;
        }
        if let Some(v) = get("GOOGLE_GENAI_BASE_URL") {
            self.generator.genai_base_url = v.trim_end_matches('/').to_string();
        }

        if self.data.split_size_mb == 0 {
            anyhow::bail!("split size must be at least 1 MiB");
        }
        if self.data.split_size_mb.checked_mul(MIB).is_none() {
            anyhow::bail!(
                "split size of {} MiB does not fit in a byte count",
                self.data.split_size_mb
            );
        }
        if self.data.upload_parallelism == 0 {
            self.data.upload_parallelism = 1;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
