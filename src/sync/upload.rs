use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Context, Result};

use crate::remote::RemoteStore;

/// Upload `parts` with at most `workers` concurrent transfers.
///
/// Parts are independent objects, so their relative order does not matter.
/// The first failure stops workers from picking up further parts and is returned.
pub(super) fn upload_parts(
    remote: &dyn RemoteStore,
    repo_id: &str,
    parts: &[PathBuf],
    workers: usize,
) -> Result<Vec<String>> {
    let mut names = Vec::with_capacity(parts.len());
    for part in parts {
        let name = part
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("part path {} has no utf-8 file name", part.display()))?;
        names.push(name.to_string());
    }

    let next = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let errors: Mutex<Vec<anyhow::Error>> = Mutex::new(Vec::new());
    let total = parts.len();

    std::thread::scope(|s| {
        for _ in 0..workers.clamp(1, total.max(1)) {
            s.spawn(|| {
                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    if i >= total {
                        break;
                    }
                    let (path, name) = (&parts[i], &names[i]);
                    tracing::info!(part = %name, index = i + 1, total, "uploading part");
                    if let Err(err) = remote.upload_object(repo_id, path, name) {
                        stop.store(true, Ordering::SeqCst);
                        let err = anyhow::Error::new(err).context(format!("upload part {}", name));
                        errors
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .push(err);
                        break;
                    }
                }
            });
        }
    });

    let errors = errors.into_inner().unwrap_or_else(|p| p.into_inner());
    if let Some(err) = errors.into_iter().next() {
        return Err(err);
    }
    Ok(names)
}
