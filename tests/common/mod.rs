#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use wpg::catalog::CatalogStore;
use wpg::config::DataConfig;
use wpg::model::NewImage;
use wpg::remote::{Identity, RemoteError, RemoteStore};

pub struct ServerGuard {
    pub base_url: String,
    pub token: String,
    pub data_dir: tempfile::TempDir,
    child: Child,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_store() -> Result<ServerGuard> {
    spawn_store_with(None, &[])
}

/// Spawn `wpg-store`, optionally over an existing store directory.
pub fn spawn_store_with(store_dir: Option<&Path>, extra: &[&str]) -> Result<ServerGuard> {
    let data_dir = tempfile::tempdir().context("create server tempdir")?;
    let token = "dev".to_string();
    let addr_file = data_dir.path().join("addr.txt");
    let store_dir = store_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.path().join("store"));

    let child = Command::new(env!("CARGO_BIN_EXE_wpg-store"))
        .arg("--addr")
        .arg("127.0.0.1:0")
        .arg("--addr-file")
        .arg(&addr_file)
        .arg("--data-dir")
        .arg(&store_dir)
        .arg("--dev-token")
        .arg(&token)
        .args(extra)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn wpg-store")?;

    let base_url = read_addr_file(&addr_file)?;
    wait_for_healthz(&base_url)?;

    Ok(ServerGuard {
        base_url,
        token,
        data_dir,
        child,
    })
}

fn read_addr_file(addr_file: &Path) -> Result<String> {
    let start = Instant::now();
    loop {
        if start.elapsed() > Duration::from_secs(5) {
            anyhow::bail!("addr file not written at {}", addr_file.display());
        }

        if let Ok(s) = std::fs::read_to_string(addr_file) {
            let s = s.trim();
            if !s.is_empty() {
                return Ok(format!("http://{}", s));
            }
        }
        thread::sleep(Duration::from_millis(10));
    }
}

pub fn wait_for_healthz(base_url: &str) -> Result<()> {
    let client = reqwest::blocking::Client::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > Duration::from_secs(5) {
            anyhow::bail!("server did not become healthy at {}/healthz", base_url);
        }
        match client.get(format!("{}/healthz", base_url)).send() {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => {
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

pub fn auth_header(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Data layout of one replica rooted at `dir`, with 1 MiB parts.
pub fn replica(dir: &Path) -> DataConfig {
    DataConfig {
        data_dir: dir.to_path_buf(),
        split_size_mb: 1,
        upload_parallelism: 3,
        ..DataConfig::default()
    }
}

/// Write a blob and its catalog row the way a generation run does.
pub fn add_wallpaper(data: &DataConfig, topic: &str, filename: &str, bytes: &[u8]) -> Result<()> {
    let blob_dir = data.blob_dir_path();
    std::fs::create_dir_all(&blob_dir).context("create blob dir")?;
    std::fs::write(blob_dir.join(filename), bytes).context("write blob")?;

    let catalog = CatalogStore::open(&data.catalog_path())?;
    let topic_id = catalog.ensure_topic(topic)?;
    catalog.insert_image(&NewImage {
        topic_id,
        image: filename.to_string(),
        prompt: format!("{} wallpaper", topic),
        width: Some(1280),
        height: Some(768),
        seed: Some(1),
        ..Default::default()
    })?;
    Ok(())
}

/// Deterministic, poorly compressible filler so split sizes are predictable.
pub fn filler(len: usize, seed: u8) -> Vec<u8> {
    let mut state = u32::from(seed) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

pub fn catalog_filenames(data: &DataConfig) -> Result<Vec<String>> {
    let catalog = CatalogStore::open(&data.catalog_path())?;
    let mut names: Vec<String> = catalog.image_filenames()?.into_iter().collect();
    names.sort();
    Ok(names)
}

pub fn blob_names(data: &DataConfig) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let dir = data.blob_dir_path();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in std::fs::read_dir(&dir).context("read blob dir")? {
        let entry = entry.context("read blob dir entry")?;
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Which remote call a `FaultyRemote` should break.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    None,
    AuthRejected,
    DownloadTransport,
    /// Fail the n-th (1-based) upload.
    UploadNumber(usize),
}

/// Wraps a real store and injects one failure.
pub struct FaultyRemote<S> {
    pub inner: S,
    pub fault: Fault,
    pub uploads: Mutex<Vec<String>>,
}

impl<S: RemoteStore> FaultyRemote<S> {
    pub fn new(inner: S, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl<S: RemoteStore> RemoteStore for FaultyRemote<S> {
    fn authenticate(&self) -> Result<Identity, RemoteError> {
        if self.fault == Fault::AuthRejected {
            return Err(RemoteError::Auth("token rejected".into()));
        }
        self.inner.authenticate()
    }

    fn ensure_repository(&self, repo_id: &str) -> Result<(), RemoteError> {
        self.inner.ensure_repository(repo_id)
    }

    fn download_snapshot(&self, repo_id: &str, dest: &Path) -> Result<Vec<PathBuf>, RemoteError> {
        if self.fault == Fault::DownloadTransport {
            return Err(RemoteError::Transport("connection reset".into()));
        }
        self.inner.download_snapshot(repo_id, dest)
    }

    fn list_objects(&self, repo_id: &str) -> Result<BTreeSet<String>, RemoteError> {
        self.inner.list_objects(repo_id)
    }

    fn upload_object(
        &self,
        repo_id: &str,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<(), RemoteError> {
        let n = {
            let mut uploads = self
                .uploads
                .lock()
                .map_err(|_| RemoteError::Transport("poisoned".into()))?;
            uploads.push(remote_name.to_string());
            uploads.len()
        };
        if self.fault == Fault::UploadNumber(n) {
            return Err(RemoteError::Transport(format!("upload {} dropped", remote_name)));
        }
        self.inner.upload_object(repo_id, local_path, remote_name)
    }

    fn delete_objects(&self, repo_id: &str, names: &[String]) -> Result<(), RemoteError> {
        self.inner.delete_objects(repo_id, names)
    }
}
