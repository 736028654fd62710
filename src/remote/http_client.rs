use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};

use super::{
    CONTENT_HASH_HEADER, CreateRepoRequest, DeleteObjectsRequest, Identity, ObjectEntry,
    RemoteError, RemoteStore, hash_file, validate_object_name,
};
use crate::config::RemoteConfig;

/// `RemoteStore` over the dataset store HTTP API (bearer-token auth).
pub struct HttpRemoteStore {
    base_url: reqwest::Url,
    token: String,
    client: Client,
}

impl HttpRemoteStore {
    pub fn new(remote: &RemoteConfig) -> anyhow::Result<Self> {
        let base_url = remote.require_base_url()?;
        let token = remote.require_token()?;
        Self::with_timeout(
            base_url,
            token,
            Duration::from_secs(remote.timeout_secs.max(1)),
        )
    }

    pub fn with_timeout(base_url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .with_context(|| format!("parse remote url {}", base_url))?;
        let client = Client::builder()
            .user_agent("wpg")
            .timeout(timeout)
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            base_url,
            token: token.to_string(),
            client,
        })
    }

    /// Listing with sizes and content hashes.
    pub fn list_object_entries(&self, repo_id: &str) -> Result<Vec<ObjectEntry>, RemoteError> {
        let url = self.url(&["repos", repo_id, "objects"])?;
        tracing::debug!(%url, "list objects");
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .send()
            .map_err(|e| RemoteError::transport("list objects", e))?;
        let resp = self.ensure_ok(resp, "list objects")?;
        resp.json()
            .map_err(|e| RemoteError::transport("parse object listing", e))
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Transport(format!("base url {} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn ensure_ok(&self, resp: Response, label: &str) -> Result<Response, RemoteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let detail = error_detail(resp);
        match status {
            StatusCode::UNAUTHORIZED => Err(RemoteError::Auth(format!(
                "{}: token invalid or expired ({})",
                label, detail
            ))),
            StatusCode::FORBIDDEN => Err(RemoteError::Auth(format!(
                "{}: insufficient permissions ({})",
                label, detail
            ))),
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(format!("{}: {}", label, detail))),
            _ => Err(RemoteError::Transport(format!(
                "{}: status {} ({})",
                label, status, detail
            ))),
        }
    }

    fn download_object(&self, repo_id: &str, entry: &ObjectEntry, dest: &Path) -> Result<PathBuf, RemoteError> {
        validate_object_name(&entry.name)?;
        let url = self.url(&["repos", repo_id, "objects", &entry.name])?;
        tracing::debug!(%url, size = entry.size, "download object");
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .send()
            .map_err(|e| RemoteError::transport(&format!("download {}", entry.name), e))?;
        let mut resp = self.ensure_ok(resp, &format!("download {}", entry.name))?;

        let path = dest.join(&entry.name);
        let file = File::create(&path)
            .map_err(|e| RemoteError::io(format!("create {}", path.display()), e))?;
        let mut writer = BufWriter::new(file);
        resp.copy_to(&mut writer)
            .map_err(|e| RemoteError::transport(&format!("download {}", entry.name), e))?;
        writer
            .flush()
            .map_err(|e| RemoteError::io(format!("flush {}", path.display()), e))?;

        let actual = hash_file(&path)?;
        if actual != entry.blake3 {
            let _ = fs::remove_file(&path);
            return Err(RemoteError::Transport(format!(
                "integrity check failed for {} (expected {}, got {})",
                entry.name, entry.blake3, actual
            )));
        }
        Ok(path)
    }
}

impl RemoteStore for HttpRemoteStore {
    fn authenticate(&self) -> Result<Identity, RemoteError> {
        let resp = self
            .client
            .get(self.url(&["whoami"])?)
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .send()
            .map_err(|e| RemoteError::transport("whoami", e))?;
        // A missing whoami route is a credential/endpoint problem, not an empty remote.
        let resp = self.ensure_ok(resp, "whoami").map_err(|e| match e {
            RemoteError::NotFound(msg) => RemoteError::Auth(msg),
            other => other,
        })?;
        resp.json()
            .map_err(|e| RemoteError::transport("parse whoami", e))
    }

    fn ensure_repository(&self, repo_id: &str) -> Result<(), RemoteError> {
        let resp = self
            .client
            .post(self.url(&["repos"])?)
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .json(&CreateRepoRequest {
                id: repo_id.to_string(),
            })
            .send()
            .map_err(|e| RemoteError::transport("create repo", e))?;
        match self.ensure_ok(resp, "create repo") {
            Ok(_) => Ok(()),
            Err(RemoteError::Transport(msg)) | Err(RemoteError::NotFound(msg)) => {
                Err(RemoteError::Repository(msg))
            }
            Err(other) => Err(other),
        }
    }

    fn download_snapshot(&self, repo_id: &str, dest: &Path) -> Result<Vec<PathBuf>, RemoteError> {
        let entries = self.list_object_entries(repo_id)?;
        if entries.is_empty() {
            return Err(RemoteError::NotFound(format!(
                "repository {} has no objects yet",
                repo_id
            )));
        }
        fs::create_dir_all(dest)
            .map_err(|e| RemoteError::io(format!("create {}", dest.display()), e))?;

        // The listing said the repository is not empty, so an object vanishing
        // before its GET is a failed transfer, never an empty remote.
        let mut out = Vec::with_capacity(entries.len());
        for entry in &entries {
            let path = self
                .download_object(repo_id, entry, dest)
                .map_err(|e| match e {
                    RemoteError::NotFound(msg) => RemoteError::Transport(format!(
                        "{} disappeared during download: {}",
                        entry.name, msg
                    )),
                    other => other,
                })?;
            out.push(path);
        }
        Ok(out)
    }

    fn list_objects(&self, repo_id: &str) -> Result<BTreeSet<String>, RemoteError> {
        Ok(self
            .list_object_entries(repo_id)?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    fn upload_object(
        &self,
        repo_id: &str,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<(), RemoteError> {
        validate_object_name(remote_name)?;
        let digest = hash_file(local_path)?;
        let file = File::open(local_path)
            .map_err(|e| RemoteError::io(format!("open {}", local_path.display()), e))?;
        let url = self.url(&["repos", repo_id, "objects", remote_name])?;
        tracing::debug!(%url, path = %local_path.display(), "upload object");

        let resp = self
            .client
            .put(url)
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .header(CONTENT_HASH_HEADER, digest)
            .body(file)
            .send()
            .map_err(|e| RemoteError::transport(&format!("upload {}", remote_name), e))?;
        self.ensure_ok(resp, &format!("upload {}", remote_name))?;
        Ok(())
    }

    fn delete_objects(&self, repo_id: &str, names: &[String]) -> Result<(), RemoteError> {
        if names.is_empty() {
            return Ok(());
        }
        let resp = self
            .client
            .post(self.url(&["repos", repo_id, "objects", "delete"])?)
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .json(&DeleteObjectsRequest {
                names: names.to_vec(),
            })
            .send()
            .map_err(|e| RemoteError::transport("delete objects", e))?;
        self.ensure_ok(resp, "delete objects")?;
        Ok(())
    }
}

fn error_detail(resp: Response) -> String {
    match resp.json::<serde_json::Value>() {
        Ok(v) => v
            .get("error")
            .and_then(|e| e.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| v.to_string()),
        Err(_) => "no error body".to_string(),
    }
}
