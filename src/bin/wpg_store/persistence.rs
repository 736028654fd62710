use std::path::Path as FsPath;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use super::*;

const REPO_FILE: &str = "repo.json";

pub(super) fn repo_dir(state: &AppState, repo_id: &str) -> PathBuf {
    state.data_dir.join("repos").join(repo_id)
}

pub(super) fn objects_dir(state: &AppState, repo_id: &str) -> PathBuf {
    repo_dir(state, repo_id).join("objects")
}

/// Per-object `ObjectEntry` sidecars, so listings never rehash large parts.
pub(super) fn meta_dir(state: &AppState, repo_id: &str) -> PathBuf {
    repo_dir(state, repo_id).join("meta")
}

pub(super) fn load_repos_from_disk(data_dir: &FsPath) -> Result<HashMap<String, RepoInfo>> {
    let root = data_dir.join("repos");
    let mut out = HashMap::new();
    if !root.is_dir() {
        return Ok(out);
    }
    // Ids are `name` or `owner/name`, so repo.json sits one or two levels down.
    for entry in std::fs::read_dir(&root).with_context(|| format!("read {}", root.display()))? {
        let entry = entry.with_context(|| format!("read {}", root.display()))?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        if let Some(info) = read_repo_file(&dir)? {
            out.insert(info.id.clone(), info);
            continue;
        }
        for inner in std::fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let inner = inner.with_context(|| format!("read {}", dir.display()))?;
            if inner.path().is_dir()
                && let Some(info) = read_repo_file(&inner.path())?
            {
                out.insert(info.id.clone(), info);
            }
        }
    }
    Ok(out)
}

fn read_repo_file(dir: &FsPath) -> Result<Option<RepoInfo>> {
    let path = dir.join(REPO_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
    let info = serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(info))
}

pub(super) fn persist_repo(state: &AppState, info: &RepoInfo) -> Result<()> {
    let dir = repo_dir(state, &info.id);
    std::fs::create_dir_all(dir.join("objects"))
        .with_context(|| format!("create dir {}", dir.display()))?;
    std::fs::create_dir_all(dir.join("meta"))
        .with_context(|| format!("create dir {}", dir.display()))?;
    let bytes = serde_json::to_vec_pretty(info).context("serialize repo")?;
    write_atomic_overwrite(&dir.join(REPO_FILE), &bytes)
}

pub(super) fn write_atomic_overwrite(path: &FsPath, bytes: &[u8]) -> Result<()> {
    let tmp = temp_sibling(path)?;
    std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// A fresh `.tmp.<name>.<nonce>` path next to `path`, creating the parent dir.
pub(super) fn temp_sibling(path: &FsPath) -> Result<PathBuf> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent", path.display()))?;
    std::fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no file name", path.display()))?;
    // Unique per writer so concurrent uploads of the same name never share a temp file.
    let mut nonce = [0u8; 8];
    getrandom::getrandom(&mut nonce).map_err(|e| anyhow::anyhow!("getrandom: {:?}", e))?;
    Ok(parent.join(format!(".tmp.{}.{}", name, u64::from_le_bytes(nonce))))
}

pub(super) enum Received {
    Complete { size: u64, blake3: String },
    TooLarge,
}

/// Stream a request body into `tmp`, hashing as it goes. Stops at the first
/// chunk that takes the total past `limit`.
pub(super) async fn receive_body(body: Body, tmp: &FsPath, limit: u64) -> Result<Received> {
    let mut file = tokio::fs::File::create(tmp)
        .await
        .with_context(|| format!("create {}", tmp.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut size = 0u64;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("read request body")?;
        size += chunk.len() as u64;
        if size > limit {
            return Ok(Received::TooLarge);
        }
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
    }
    file.flush()
        .await
        .with_context(|| format!("flush {}", tmp.display()))?;
    Ok(Received::Complete {
        size,
        blake3: hasher.finalize().to_hex().to_string(),
    })
}

pub(super) async fn discard(tmp: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(tmp).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %tmp.display(), error = %e, "failed to remove temp upload");
    }
}

/// Move a fully received upload into place, then record its sidecar.
pub(super) fn commit_object(
    state: &AppState,
    repo_id: &str,
    entry: &ObjectEntry,
    tmp: &FsPath,
) -> Result<()> {
    let object = objects_dir(state, repo_id).join(&entry.name);
    std::fs::rename(tmp, &object)
        .with_context(|| format!("rename {} -> {}", tmp.display(), object.display()))?;
    let meta = serde_json::to_vec(entry).context("serialize object entry")?;
    write_atomic_overwrite(&meta_dir(state, repo_id).join(format!("{}.json", entry.name)), &meta)
}

pub(super) fn list_entries(state: &AppState, repo_id: &str) -> Result<Vec<ObjectEntry>> {
    let meta = meta_dir(state, repo_id);
    let objects = objects_dir(state, repo_id);
    let mut out = Vec::new();
    if !meta.is_dir() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(&meta).with_context(|| format!("read {}", meta.display()))? {
        let entry = entry.with_context(|| format!("read {}", meta.display()))?;
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };
        if file_name.starts_with(".tmp.") || !file_name.ends_with(".json") {
            continue;
        }
        let bytes = std::fs::read(entry.path())
            .with_context(|| format!("read {}", entry.path().display()))?;
        let obj: ObjectEntry = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse {}", entry.path().display()))?;
        if objects.join(&obj.name).is_file() {
            out.push(obj);
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Remove an object and its sidecar. Returns whether the object existed.
pub(super) fn remove_object(state: &AppState, repo_id: &str, name: &str) -> Result<bool> {
    let object = objects_dir(state, repo_id).join(name);
    let existed = match std::fs::remove_file(&object) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e).with_context(|| format!("remove {}", object.display())),
    };
    let meta = meta_dir(state, repo_id).join(format!("{}.json", name));
    match std::fs::remove_file(&meta) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("remove {}", meta.display())),
    }
    Ok(existed)
}
