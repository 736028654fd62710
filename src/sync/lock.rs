use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Held for the whole of one sync run; a second run against the same data
/// directory fails to acquire it instead of interleaving with the first.
#[derive(Debug)]
pub struct SyncLock {
    path: PathBuf,
}

impl SyncLock {
    /// A lock whose recorded pid no longer runs is taken over.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        let mut file = match create_lock_file(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                let holder = holder.trim();
                match holder.parse::<u32>() {
                    Ok(pid) if !process_alive(pid) => {
                        tracing::warn!(path = %path.display(), pid, "removing lock left by a process that is gone");
                        fs::remove_file(path)
                            .with_context(|| format!("remove stale lock {}", path.display()))?;
                        create_lock_file(path)
                            .with_context(|| format!("create lock {}", path.display()))?
                    }
                    _ => anyhow::bail!(
                        "another sync is already running (lock {} held by pid {}); remove the file if that process is gone",
                        path.display(),
                        holder
                    ),
                }
            }
            Err(e) => {
                return Err(e).with_context(|| format!("create lock {}", path.display()));
            }
        };
        write!(file, "{}", std::process::id())
            .with_context(|| format!("write lock {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

fn create_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn process_alive(pid: u32) -> bool {
    let mut system = sysinfo::System::new();
    system.refresh_process(sysinfo::Pid::from_u32(pid))
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
