use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Identity, RemoteError, RemoteStore, validate_object_name};

/// `RemoteStore` backed by a local directory, one sub-directory per repository.
///
/// Useful as an offline mirror (for example a mounted network share).
#[derive(Clone, Debug)]
pub struct DirRemoteStore {
    root: PathBuf,
}

impl DirRemoteStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn repo_dir(&self, repo_id: &str) -> PathBuf {
        self.root.join(repo_id)
    }

    fn existing_repo_dir(&self, repo_id: &str) -> Result<PathBuf, RemoteError> {
        let dir = self.repo_dir(repo_id);
        if !dir.is_dir() {
            return Err(RemoteError::NotFound(format!(
                "repository {} does not exist",
                repo_id
            )));
        }
        Ok(dir)
    }
}

impl RemoteStore for DirRemoteStore {
    fn authenticate(&self) -> Result<Identity, RemoteError> {
        if !self.root.is_dir() {
            return Err(RemoteError::Auth(format!(
                "remote root {} is not accessible",
                self.root.display()
            )));
        }
        Ok(Identity {
            name: "local".to_string(),
        })
    }

    fn ensure_repository(&self, repo_id: &str) -> Result<(), RemoteError> {
        let dir = self.repo_dir(repo_id);
        fs::create_dir_all(&dir).map_err(|e| {
            RemoteError::Repository(format!("create {}: {}", dir.display(), e))
        })
    }

    fn download_snapshot(&self, repo_id: &str, dest: &Path) -> Result<Vec<PathBuf>, RemoteError> {
        let names = self.list_objects(repo_id)?;
        if names.is_empty() {
            return Err(RemoteError::NotFound(format!(
                "repository {} has no objects yet",
                repo_id
            )));
        }
        fs::create_dir_all(dest)
            .map_err(|e| RemoteError::io(format!("create {}", dest.display()), e))?;

        let src_dir = self.repo_dir(repo_id);
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let to = dest.join(&name);
            fs::copy(src_dir.join(&name), &to)
                .map_err(|e| RemoteError::io(format!("copy {} to {}", name, to.display()), e))?;
            out.push(to);
        }
        Ok(out)
    }

    fn list_objects(&self, repo_id: &str) -> Result<BTreeSet<String>, RemoteError> {
        let dir = self.existing_repo_dir(repo_id)?;
        let mut out = BTreeSet::new();
        let entries = fs::read_dir(&dir)
            .map_err(|e| RemoteError::io(format!("read dir {}", dir.display()), e))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| RemoteError::io(format!("read dir {}", dir.display()), e))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(".tmp.") {
                continue;
            }
            out.insert(name);
        }
        Ok(out)
    }

    fn upload_object(
        &self,
        repo_id: &str,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<(), RemoteError> {
        validate_object_name(remote_name)?;
        let dir = self.existing_repo_dir(repo_id)?;
        let tmp = dir.join(format!(".tmp.{}.{}", remote_name, std::process::id()));
        fs::copy(local_path, &tmp).map_err(|e| {
            RemoteError::io(format!("copy {} to {}", local_path.display(), tmp.display()), e)
        })?;
        let to = dir.join(remote_name);
        fs::rename(&tmp, &to).map_err(|e| {
            RemoteError::io(format!("rename {} -> {}", tmp.display(), to.display()), e)
        })
    }

    fn delete_objects(&self, repo_id: &str, names: &[String]) -> Result<(), RemoteError> {
        let dir = self.existing_repo_dir(repo_id)?;
        for name in names {
            validate_object_name(name)?;
            let path = dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RemoteError::io(format!("remove {}", path.display()), e)),
            }
        }
        Ok(())
    }
}
