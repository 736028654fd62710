//! Split one large bundle into `.partNNN` files and join them back.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

mod bundle;
pub use self::bundle::{BUNDLE_EXTENSION, bundle_dir, unpack_into};

/// Part numbers are three digits wide; lexicographic and numeric order agree only below this.
pub const MAX_PARTS: u64 = 999;

const PART_MARKER: &str = ".part";

/// `<path>.partNNN` for the 1-based part number `n`.
pub fn part_name(path: &Path, n: u64) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(format!("{}{:03}", PART_MARKER, n));
    PathBuf::from(s)
}

/// Numeric suffix of a part file name, or `None` if `name` is not a part.
pub fn part_index(name: &str) -> Option<u64> {
    let (_, digits) = name.rsplit_once(PART_MARKER)?;
    if digits.len() < 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Names in `names` that are parts of `archive_file_name`, sorted by part number.
pub fn select_parts<'a>(
    names: impl IntoIterator<Item = &'a str>,
    archive_file_name: &str,
) -> Result<Vec<String>> {
    let pattern = format!("{}{}*", globset::escape(archive_file_name), PART_MARKER);
    let matcher = globset::Glob::new(&pattern)
        .with_context(|| format!("invalid part glob: {}", pattern))?
        .compile_matcher();
    let mut out: Vec<(u64, String)> = names
        .into_iter()
        .filter(|n| matcher.is_match(n))
        .filter_map(|n| part_index(n).map(|i| (i, n.to_string())))
        .collect();
    out.sort();
    Ok(out.into_iter().map(|(_, n)| n).collect())
}

/// Parts named after `base_name`, keyed by the archive they split
/// (`wp_archive.tar`, `wp_archive.zip`, ...) and sorted by part number.
pub fn part_groups<'a>(
    names: impl IntoIterator<Item = &'a str>,
    base_name: &str,
) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<(u64, String)>> = BTreeMap::new();
    for name in names {
        let Some(index) = part_index(name) else {
            continue;
        };
        let Some((archive, _)) = name.rsplit_once(PART_MARKER) else {
            continue;
        };
        let belongs = archive == base_name
            || archive
                .strip_prefix(base_name)
                .is_some_and(|rest| rest.starts_with('.'));
        if belongs {
            groups
                .entry(archive.to_string())
                .or_default()
                .push((index, name.to_string()));
        }
    }
    groups
        .into_iter()
        .map(|(archive, mut parts)| {
            parts.sort();
            (archive, parts.into_iter().map(|(_, n)| n).collect())
        })
        .collect()
}

/// Names of the regular files directly inside `dir`; empty if `dir` is absent.
pub fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}

/// Part files of `archive_file_name` found directly inside `dir`, in join order.
pub fn find_parts(dir: &Path, archive_file_name: &str) -> Result<Vec<PathBuf>> {
    let names = file_names(dir)?;
    let parts = select_parts(names.iter().map(String::as_str), archive_file_name)?;
    Ok(parts.into_iter().map(|n| dir.join(n)).collect())
}

/// Cut `path` into `chunk_size`-byte parts named `path.part001`, `path.part002`, ...
///
/// The last part may be shorter; an empty file yields no parts. Parts already
/// written stay on disk if a later write fails.
pub fn split(path: &Path, chunk_size: u64) -> Result<Vec<PathBuf>> {
    if chunk_size == 0 {
        anyhow::bail!("chunk size must be positive");
    }
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    let expected = len.div_ceil(chunk_size);
    if expected > MAX_PARTS {
        anyhow::bail!(
            "{} would need {} parts of {} bytes (limit {}); raise the split size",
            path.display(),
            expected,
            chunk_size,
            MAX_PARTS
        );
    }

    let mut reader = BufReader::new(file);
    let mut parts = Vec::new();
    loop {
        let at_eof = reader
            .fill_buf()
            .with_context(|| format!("read {}", path.display()))?
            .is_empty();
        if at_eof {
            break;
        }

        let part_path = part_name(path, parts.len() as u64 + 1);
        let out = File::create(&part_path)
            .with_context(|| format!("create {}", part_path.display()))?;
        let mut writer = BufWriter::new(out);
        io::copy(&mut (&mut reader).take(chunk_size), &mut writer)
            .with_context(|| format!("write {}", part_path.display()))?;
        writer
            .flush()
            .with_context(|| format!("flush {}", part_path.display()))?;
        parts.push(part_path);
    }
    Ok(parts)
}

/// Concatenate `parts` in part-number order into `output`.
///
/// Does not check that the sequence is complete; an empty list yields an empty file.
pub fn join(parts: &[PathBuf], output: &Path) -> Result<()> {
    let mut ordered: Vec<&PathBuf> = parts.iter().collect();
    ordered.sort_by_key(|p| {
        let idx = p
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(part_index)
            .unwrap_or(u64::MAX);
        (idx, (*p).clone())
    });

    let out = File::create(output).with_context(|| format!("create {}", output.display()))?;
    let mut writer = BufWriter::new(out);
    for part in ordered {
        let mut input = File::open(part).with_context(|| format!("open {}", part.display()))?;
        io::copy(&mut input, &mut writer).with_context(|| {
            format!("append {} to {}", part.display(), output.display())
        })?;
    }
    writer
        .flush()
        .with_context(|| format!("flush {}", output.display()))?;
    Ok(())
}

/// Remove `paths`, ignoring files that are already gone.
pub fn remove_files<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Result<()> {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/archive_tests.rs"]
mod tests;
