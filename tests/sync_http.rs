mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};

use common::{add_wallpaper, blob_names, catalog_filenames, filler, replica};
use wpg::remote::{HttpRemoteStore, RemoteError, RemoteStore};
use wpg::sync::{self, SyncPhase};

const REPO: &str = "me/wallpapers";

fn client_for(server: &common::ServerGuard, token: &str) -> Result<HttpRemoteStore> {
    HttpRemoteStore::with_timeout(&server.base_url, token, Duration::from_secs(60))
}

#[test]
fn two_replicas_sync_through_the_store() -> Result<()> {
    let server = common::spawn_store()?;
    let remote = client_for(&server, &server.token)?;

    let dir_a = tempfile::tempdir().context("create replica a")?;
    let a = replica(dir_a.path());
    add_wallpaper(&a, "desert", "a1.png", &filler(700_000, 1))?;
    add_wallpaper(&a, "desert", "a2.png", &filler(700_000, 2))?;
    let first = sync::run(&a, &remote, REPO)?;
    assert!(first.remote_was_empty);
    assert_eq!(first.identity, "dev");
    assert_eq!(first.uploaded_parts.len(), 2);

    let dir_b = tempfile::tempdir().context("create replica b")?;
    let b = replica(dir_b.path());
    add_wallpaper(&b, "ocean", "b1.png", b"wave")?;
    let second = sync::run(&b, &remote, REPO)?;
    assert_eq!(second.merged_rows, 1);
    assert_eq!(second.extracted_parts, 2);
    assert_eq!(second.phases.last(), Some(&SyncPhase::Done));

    let all = vec!["a1.png", "a2.png", "b1.png"];
    assert_eq!(catalog_filenames(&b)?, all);
    assert_eq!(blob_names(&b)?, all);
    assert_eq!(
        std::fs::read(b.blob_dir_path().join("a1.png")).context("read blob")?,
        filler(700_000, 1)
    );

    sync::run(&a, &remote, REPO)?;
    assert_eq!(catalog_filenames(&a)?, all);
    assert_eq!(blob_names(&a)?, all);

    let listed = remote.list_object_entries(REPO)?;
    let names: Vec<&str> = listed.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["wallpapers.db", "wp_archive.tar.part001", "wp_archive.tar.part002"]
    );
    assert!(listed.iter().all(|e| e.blake3.len() == 64));
    Ok(())
}

#[test]
fn wrong_token_fails_in_idle_with_auth_error() -> Result<()> {
    let server = common::spawn_store()?;
    let remote = client_for(&server, "not-the-token")?;

    let dir = tempfile::tempdir().context("create replica")?;
    let data = replica(dir.path());
    add_wallpaper(&data, "desert", "a.png", b"aaa")?;

    let failure = sync::run(&data, &remote, REPO).unwrap_err();
    assert_eq!(failure.phase, SyncPhase::Idle);
    assert!(matches!(failure.remote_error(), Some(RemoteError::Auth(_))));
    assert!(!data.backup_path().exists());
    Ok(())
}

#[test]
fn missing_repository_lists_as_not_found() -> Result<()> {
    let server = common::spawn_store()?;
    let remote = client_for(&server, &server.token)?;
    let err = remote.list_objects("nobody/nothing").unwrap_err();
    assert!(err.is_not_found());

    remote.ensure_repository("nobody/nothing")?;
    remote.ensure_repository("nobody/nothing")?;
    assert!(remote.list_objects("nobody/nothing")?.is_empty());
    let dest = tempfile::tempdir().context("create dest")?;
    assert!(remote.download_snapshot("nobody/nothing", dest.path()).unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn invalid_repository_id_is_rejected() -> Result<()> {
    let server = common::spawn_store()?;
    let remote = client_for(&server, &server.token)?;
    for bad in ["a/b/c", "../up", "with space"] {
        let err = remote.ensure_repository(bad).unwrap_err();
        assert!(matches!(err, RemoteError::Repository(_)), "{}: {}", bad, err);
    }
    Ok(())
}

#[test]
fn store_rejects_hash_mismatch_and_missing_token() -> Result<()> {
    let server = common::spawn_store()?;
    let client = reqwest::blocking::Client::new();

    client
        .post(format!("{}/repos", server.base_url))
        .header(
            reqwest::header::AUTHORIZATION,
            common::auth_header(&server.token),
        )
        .json(&serde_json::json!({"id": "test"}))
        .send()
        .context("create repo")?
        .error_for_status()
        .context("create repo status")?;

    let resp = client
        .put(format!("{}/repos/test/objects/a.bin", server.base_url))
        .header(
            reqwest::header::AUTHORIZATION,
            common::auth_header(&server.token),
        )
        .header(wpg::remote::CONTENT_HASH_HEADER, "0".repeat(64))
        .body(b"abc".to_vec())
        .send()
        .context("upload with wrong hash")?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let resp = client
        .put(format!("{}/repos/test/objects/a.bin", server.base_url))
        .header(
            reqwest::header::AUTHORIZATION,
            common::auth_header(&server.token),
        )
        .body(b"abc".to_vec())
        .send()
        .context("upload without hash")?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let resp = client
        .get(format!("{}/repos/test/objects", server.base_url))
        .send()
        .context("list without token")?;
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    let resp = client
        .get(format!("{}/repos/test/objects/a.bin", server.base_url))
        .header(
            reqwest::header::AUTHORIZATION,
            common::auth_header(&server.token),
        )
        .send()
        .context("get missing object")?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    Ok(())
}

#[test]
fn oversized_object_is_refused() -> Result<()> {
    let server = common::spawn_store_with(None, &["--max-object-mib", "1"])?;
    let remote = client_for(&server, &server.token)?;
    remote.ensure_repository("big")?;

    let tmp = tempfile::tempdir().context("create tempdir")?;
    let small = tmp.path().join("small.bin");
    std::fs::write(&small, filler(1000, 9)).context("write small")?;
    remote.upload_object("big", &small, "small.bin")?;

    let large = tmp.path().join("large.bin");
    std::fs::write(&large, filler(2 * 1024 * 1024, 9)).context("write large")?;
    let err = remote.upload_object("big", &large, "large.bin").unwrap_err();
    assert!(matches!(err, RemoteError::Transport(_)), "{}", err);

    let names: Vec<String> = remote.list_objects("big")?.into_iter().collect();
    assert_eq!(names, vec!["small.bin"]);

    let objects = server.data_dir.path().join("store/repos/big/objects");
    let mut on_disk: Vec<String> = std::fs::read_dir(&objects)
        .context("read objects dir")?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().to_string()))
        .collect::<std::io::Result<_>>()
        .context("read objects entry")?;
    on_disk.sort();
    assert_eq!(on_disk, vec!["small.bin"]);
    Ok(())
}

#[test]
fn large_objects_stream_through_the_store() -> Result<()> {
    let server = common::spawn_store()?;
    let remote = client_for(&server, &server.token)?;
    remote.ensure_repository("stream")?;

    let tmp = tempfile::tempdir().context("create tempdir")?;
    let part = tmp.path().join("part.bin");
    let bytes = filler(3 * 1024 * 1024 + 17, 3);
    std::fs::write(&part, &bytes).context("write part")?;
    remote.upload_object("stream", &part, "wp_archive.tar.part001")?;

    let entries = remote.list_object_entries("stream")?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].size, bytes.len() as u64);
    assert_eq!(entries[0].blake3, blake3::hash(&bytes).to_hex().to_string());

    let resp = reqwest::blocking::Client::new()
        .get(format!(
            "{}/repos/stream/objects/wp_archive.tar.part001",
            server.base_url
        ))
        .header(
            reqwest::header::AUTHORIZATION,
            common::auth_header(&server.token),
        )
        .send()
        .context("get object")?
        .error_for_status()
        .context("get object status")?;
    assert_eq!(resp.content_length(), Some(bytes.len() as u64));
    let body = resp.bytes().context("read object body")?;
    assert!(body.as_ref() == bytes.as_slice());
    Ok(())
}

#[test]
fn objects_survive_a_store_restart() -> Result<()> {
    let server = common::spawn_store()?;
    let remote = client_for(&server, &server.token)?;
    let dir = tempfile::tempdir().context("create replica")?;
    let data = replica(dir.path());
    add_wallpaper(&data, "desert", "a.png", b"aaa")?;
    sync::run(&data, &remote, REPO)?;

    let store_dir = server.data_dir.path().join("store");
    let restarted = common::spawn_store_with(Some(&store_dir), &[])?;
    let remote = client_for(&restarted, &restarted.token)?;
    let names: Vec<String> = remote.list_objects(REPO)?.into_iter().collect();
    assert_eq!(names, vec!["wallpapers.db", "wp_archive.tar.part001"]);
    Ok(())
}

/// A store whose listing advertises a part that is already gone when it is
/// fetched, as when another replica prunes it between our list and get.
struct VanishingPartStore {
    base_url: String,
    writes: Arc<AtomicUsize>,
}

fn spawn_vanishing_part_store() -> Result<VanishingPartStore> {
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    let writes = Arc::new(AtomicUsize::new(0));
    let on_delete = writes.clone();
    let on_put = writes.clone();
    let app = Router::new()
        .route("/whoami", get(|| async { Json(serde_json::json!({"name": "dev"})) }))
        .route(
            "/repos",
            post(|| async {
                Json(serde_json::json!({
                    "id": REPO,
                    "owner": "dev",
                    "created_at": "2026-01-01T00:00:00Z",
                }))
            }),
        )
        .route(
            "/repos/:repo_id/objects",
            get(|| async {
                Json(serde_json::json!([{
                    "name": "wp_archive.tar.part001",
                    "size": 4,
                    "blake3": "0".repeat(64),
                }]))
            }),
        )
        .route(
            "/repos/:repo_id/objects/delete",
            post(move || {
                let hits = on_delete.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({"deleted": []}))
                }
            }),
        )
        .route(
            "/repos/:repo_id/objects/:name",
            get(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({"error": "object not found"})),
                )
            })
            .put(move || {
                let hits = on_put.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::CREATED
                }
            }),
        );

    let listener = std::net::TcpListener::bind("127.0.0.1:0").context("bind fake store")?;
    listener
        .set_nonblocking(true)
        .context("set fake store nonblocking")?;
    let addr = listener.local_addr().context("read fake store addr")?;
    let runtime = tokio::runtime::Runtime::new().context("build runtime")?;
    std::thread::spawn(move || {
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).expect("adopt listener");
            axum::serve(listener, app).await.expect("serve fake store");
        });
    });

    Ok(VanishingPartStore {
        base_url: format!("http://{}", addr),
        writes,
    })
}

#[test]
fn object_missing_after_listing_is_a_transport_failure() -> Result<()> {
    let store = spawn_vanishing_part_store()?;
    let remote = HttpRemoteStore::with_timeout(&store.base_url, "dev", Duration::from_secs(60))?;

    let dest = tempfile::tempdir().context("create dest")?;
    let err = remote.download_snapshot(REPO, dest.path()).unwrap_err();
    assert!(matches!(err, RemoteError::Transport(_)), "{}", err);

    let dir = tempfile::tempdir().context("create replica")?;
    let data = replica(dir.path());
    add_wallpaper(&data, "desert", "a.png", b"aaa")?;

    let failure = sync::run(&data, &remote, REPO).unwrap_err();
    assert_eq!(failure.phase, SyncPhase::Pulling);
    assert!(matches!(failure.remote_error(), Some(RemoteError::Transport(_))));
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    assert_eq!(catalog_filenames(&data)?, vec!["a.png"]);
    assert_eq!(blob_names(&data)?, vec!["a.png"]);
    assert!(!data.backup_path().exists());
    Ok(())
}
