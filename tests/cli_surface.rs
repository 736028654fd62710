mod common;

use std::process::{Command, Output};

use anyhow::{Context, Result};

fn run_wpg(args: &[&str], data_dir: &std::path::Path) -> Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_wpg"))
        .args(args)
        .env("WPG_DATA_DIR", data_dir)
        .env_remove("WPG_DATASET_REPO_ID")
        .env_remove("WPG_REMOTE_URL")
        .env_remove("WPG_REMOTE_TOKEN")
        .output()
        .with_context(|| format!("run wpg {:?}", args))
}

#[test]
fn help_lists_target_and_num() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let out = run_wpg(&["--help"], tmp.path())?;
    assert!(out.status.success());
    let help = String::from_utf8_lossy(&out.stdout);
    assert!(help.contains("Usage: wpg"));
    assert!(help.contains("[TARGET]"));
    assert!(help.contains("--num"));
    assert!(help.contains("--config"));
    Ok(())
}

#[test]
fn no_argument_prints_catalog_summary() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let data = common::replica(tmp.path());
    common::add_wallpaper(&data, "desert", "a.png", b"a")?;
    common::add_wallpaper(&data, "desert", "b.png", b"b")?;
    common::add_wallpaper(&data, "ocean", "c.png", b"c")?;

    let out = run_wpg(&[], tmp.path())?;
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("2 topics, 3 images"), "{}", stdout);
    assert!(stdout.contains("desert"));
    Ok(())
}

#[test]
fn sync_without_repository_fails_before_touching_data() -> Result<()> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let data_dir = tmp.path().join("data");
    let out = run_wpg(&["sync"], &data_dir)?;
    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("WPG_DATASET_REPO_ID"), "{}", stderr);
    assert!(!data_dir.exists());
    Ok(())
}

#[test]
fn sync_command_runs_against_store() -> Result<()> {
    let server = common::spawn_store()?;
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let data = common::replica(tmp.path());
    common::add_wallpaper(&data, "desert", "a.png", b"a")?;

    let out = Command::new(env!("CARGO_BIN_EXE_wpg"))
        .args(["sync", "--json"])
        .env("WPG_DATA_DIR", tmp.path())
        .env("WPG_REMOTE_URL", &server.base_url)
        .env("WPG_REMOTE_TOKEN", &server.token)
        .env("WPG_DATASET_REPO_ID", "me/wallpapers")
        .output()
        .context("run wpg sync")?;
    assert!(
        out.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    let report: serde_json::Value =
        serde_json::from_slice(&out.stdout).context("parse sync report")?;
    assert_eq!(report["phases"].as_array().map(Vec::len), Some(9));
    assert_eq!(report["phases"][8], "DONE");
    assert_eq!(report["uploaded_parts"][0], "wp_archive.tar.part001");
    Ok(())
}
