use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

/// Extension of the bundle every replica writes and the only one it can unpack.
pub const BUNDLE_EXTENSION: &str = "tar";

/// Write every regular file directly under `dir` into a tar at `archive_path`.
///
/// Entries are stored by bare file name, sorted, so unpacking into another blob
/// directory reproduces the flat layout. Returns the number of files written.
pub fn bundle_dir(dir: &Path, archive_path: &Path) -> Result<usize> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        let ty = entry
            .file_type()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        if ty.is_file() {
            files.push(entry.file_name());
        }
    }
    files.sort();

    let out = File::create(archive_path)
        .with_context(|| format!("create {}", archive_path.display()))?;
    let mut builder = tar::Builder::new(BufWriter::new(out));
    for name in &files {
        let path = dir.join(name);
        let mut file = File::open(&path).with_context(|| format!("open {}", path.display()))?;
        builder
            .append_file(name, &mut file)
            .with_context(|| format!("add {} to {}", path.display(), archive_path.display()))?;
    }
    let mut writer = builder
        .into_inner()
        .with_context(|| format!("finish {}", archive_path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flush {}", archive_path.display()))?;
    Ok(files.len())
}

/// Extract `archive_path` into `dir`, overwriting files of the same name.
///
/// Files already in `dir` that are not in the archive are left alone. Returns
/// the number of entries extracted.
pub fn unpack_into(archive_path: &Path, dir: &Path) -> Result<usize> {
    fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    let file =
        File::open(archive_path).with_context(|| format!("open {}", archive_path.display()))?;
    let mut archive = tar::Archive::new(BufReader::new(file));
    archive.set_overwrite(true);

    let mut count = 0usize;
    for entry in archive
        .entries()
        .with_context(|| format!("read entries of {}", archive_path.display()))?
    {
        let mut entry =
            entry.with_context(|| format!("read entry of {}", archive_path.display()))?;
        let unpacked = entry
            .unpack_in(dir)
            .with_context(|| format!("extract into {}", dir.display()))?;
        if unpacked {
            count += 1;
        }
    }
    Ok(count)
}
