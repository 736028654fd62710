use super::*;

pub(super) async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub(super) async fn whoami(Extension(subject): Extension<Subject>) -> Json<Identity> {
    Json(Identity { name: subject.user })
}

pub(super) async fn create_repo(
    State(state): State<Arc<AppState>>,
    Extension(subject): Extension<Subject>,
    Json(payload): Json<CreateRepoRequest>,
) -> Result<(StatusCode, Json<RepoInfo>), Response> {
    validate_repo_id(&payload.id).map_err(bad_request)?;

    let mut repos = state.repos.write().await;
    if let Some(existing) = repos.get(&payload.id) {
        return Ok((StatusCode::OK, Json(existing.clone())));
    }

    let info = RepoInfo {
        id: payload.id.clone(),
        owner: subject.user,
        created_at: now_ts(),
    };
    persist_repo(&state, &info).map_err(internal_error)?;
    tracing::info!(repo = %info.id, "repository created");
    repos.insert(info.id.clone(), info.clone());
    Ok((StatusCode::CREATED, Json(info)))
}

async fn require_repo(state: &AppState, repo_id: &str) -> Result<(), Response> {
    validate_repo_id(repo_id).map_err(bad_request)?;
    let repos = state.repos.read().await;
    if !repos.contains_key(repo_id) {
        return Err(not_found());
    }
    Ok(())
}

pub(super) async fn list_objects(
    State(state): State<Arc<AppState>>,
    Path(repo_id): Path<String>,
) -> Result<Json<Vec<ObjectEntry>>, Response> {
    require_repo(&state, &repo_id).await?;
    let entries = list_entries(&state, &repo_id).map_err(internal_error)?;
    Ok(Json(entries))
}

pub(super) async fn get_object(
    State(state): State<Arc<AppState>>,
    Path((repo_id, name)): Path<(String, String)>,
) -> Result<Response, Response> {
    require_repo(&state, &repo_id).await?;
    validate_name(&name).map_err(bad_request)?;

    let path = objects_dir(&state, &repo_id).join(&name);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => {
            return Err(internal_error(
                anyhow::Error::new(e).context(format!("open {}", path.display())),
            ));
        }
    };
    let len = file
        .metadata()
        .await
        .with_context(|| format!("stat {}", path.display()))
        .map_err(internal_error)?
        .len();
    let body = Body::from_stream(tokio_util::io::ReaderStream::new(file));
    Ok(([(header::CONTENT_LENGTH, len.to_string())], body).into_response())
}

pub(super) async fn put_object(
    State(state): State<Arc<AppState>>,
    Path((repo_id, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, Response> {
    require_repo(&state, &repo_id).await?;
    validate_name(&name).map_err(bad_request)?;

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > state.max_object_bytes) {
        return Err(payload_too_large(state.max_object_bytes));
    }

    let Some(expected) = headers
        .get(CONTENT_HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return Err(bad_request(anyhow::anyhow!(
            "missing {} header",
            CONTENT_HASH_HEADER
        )));
    };

    let tmp = temp_sibling(&objects_dir(&state, &repo_id).join(&name)).map_err(internal_error)?;
    let (size, actual) = match receive_body(body, &tmp, state.max_object_bytes).await {
        Ok(Received::Complete { size, blake3 }) => (size, blake3),
        Ok(Received::TooLarge) => {
            discard(&tmp).await;
            return Err(payload_too_large(state.max_object_bytes));
        }
        Err(err) => {
            discard(&tmp).await;
            return Err(bad_request(err));
        }
    };
    if actual != expected {
        discard(&tmp).await;
        return Err(bad_request(anyhow::anyhow!(
            "object hash mismatch (expected {}, got {})",
            expected,
            actual
        )));
    }

    let entry = ObjectEntry {
        name,
        size,
        blake3: actual,
    };
    if let Err(err) = commit_object(&state, &repo_id, &entry, &tmp) {
        discard(&tmp).await;
        return Err(internal_error(err));
    }
    tracing::info!(repo = %repo_id, object = %entry.name, size, "object stored");
    Ok(StatusCode::CREATED)
}

pub(super) async fn delete_objects(
    State(state): State<Arc<AppState>>,
    Path(repo_id): Path<String>,
    Json(payload): Json<DeleteObjectsRequest>,
) -> Result<Json<DeleteObjectsResponse>, Response> {
    require_repo(&state, &repo_id).await?;
    for name in &payload.names {
        validate_name(name).map_err(bad_request)?;
    }

    let mut deleted = Vec::new();
    for name in payload.names {
        if remove_object(&state, &repo_id, &name).map_err(internal_error)? {
            deleted.push(name);
        }
    }
    tracing::info!(repo = %repo_id, count = deleted.len(), "objects deleted");
    Ok(Json(DeleteObjectsResponse { deleted }))
}
