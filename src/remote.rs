//! Remote dataset repository: the capability set the sync engine relies on.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

mod dir_store;
mod error;
mod http_client;
mod types;

pub use self::dir_store::DirRemoteStore;
pub use self::error::RemoteError;
pub use self::http_client::HttpRemoteStore;
pub use self::types::*;

/// A flat object repository addressed by repository id.
///
/// Implementations never retry; a failed call is reported once and the caller
/// decides whether to re-run the whole operation.
pub trait RemoteStore: Send + Sync {
    fn authenticate(&self) -> Result<Identity, RemoteError>;

    /// Create `repo_id` unless it already exists.
    fn ensure_repository(&self, repo_id: &str) -> Result<(), RemoteError>;

    /// Download every object of `repo_id` into `dest`.
    ///
    /// `NotFound` means the repository is missing or holds no objects yet.
    fn download_snapshot(&self, repo_id: &str, dest: &Path) -> Result<Vec<PathBuf>, RemoteError>;

    fn list_objects(&self, repo_id: &str) -> Result<BTreeSet<String>, RemoteError>;

    fn upload_object(
        &self,
        repo_id: &str,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<(), RemoteError>;

    fn delete_objects(&self, repo_id: &str, names: &[String]) -> Result<(), RemoteError>;
}

/// blake3 of a file's contents, hex-encoded, read in a streaming fashion.
pub fn hash_file(path: &Path) -> Result<String, RemoteError> {
    let file = File::open(path).map_err(|e| RemoteError::io(format!("open {}", path.display()), e))?;
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_reader(BufReader::new(file))
        .map_err(|e| RemoteError::io(format!("hash {}", path.display()), e))?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Object names are flat: no separators, no dot segments, nothing empty.
pub fn validate_object_name(name: &str) -> Result<(), RemoteError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(RemoteError::Repository(format!(
            "invalid object name {:?}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
