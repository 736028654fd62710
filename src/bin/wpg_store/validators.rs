use super::*;

/// `name` or `owner/name`; each segment is ASCII alnum plus `-`, `_` and `.`.
pub(super) fn validate_repo_id(id: &str) -> Result<()> {
    if id.is_empty() {
        anyhow::bail!("repo id cannot be empty");
    }
    let segments: Vec<&str> = id.split('/').collect();
    if segments.len() > 2 {
        anyhow::bail!("repo id may contain at most one '/'");
    }
    for seg in segments {
        if seg.is_empty() || seg == "." || seg == ".." {
            anyhow::bail!("invalid repo id segment {:?}", seg);
        }
        if !seg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            anyhow::bail!("repo id must be alnum, '-', '_' or '.'");
        }
    }
    Ok(())
}

pub(super) fn validate_name(name: &str) -> Result<()> {
    validate_object_name(name).map_err(|e| anyhow::anyhow!(e))?;
    if name.starts_with(".tmp.") {
        anyhow::bail!("object names may not start with .tmp.");
    }
    Ok(())
}
