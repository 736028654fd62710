//! `wpg-store`: a small self-hostable dataset store speaking the API that
//! `HttpRemoteStore` expects.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Extension, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, extract::Path};
use clap::Parser;
use tokio::sync::RwLock;

use wpg::remote::{
    CONTENT_HASH_HEADER, CreateRepoRequest, DeleteObjectsRequest, DeleteObjectsResponse, Identity,
    ObjectEntry, RepoInfo, validate_object_name,
};

#[path = "wpg_store/http_error.rs"]
mod http_error;
use self::http_error::*;
#[path = "wpg_store/validators.rs"]
mod validators;
use self::validators::*;
#[path = "wpg_store/persistence.rs"]
mod persistence;
use self::persistence::*;
#[path = "wpg_store/handlers.rs"]
mod handlers;
use self::handlers::*;
#[path = "wpg_store/routes.rs"]
mod routes;
use self::routes::*;

#[derive(Clone, Debug)]
struct Subject {
    user: String,
}

struct AppState {
    data_dir: PathBuf,
    user: String,

    // Stored hash of the bearer token secret.
    token_hash: String,

    max_object_bytes: u64,
    repos: RwLock<HashMap<String, RepoInfo>>,
}

#[derive(Parser)]
#[command(name = "wpg-store")]
#[command(about = "Dataset store for wpg sync (development)", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Write bound address to this file (dev/test convenience)
    #[arg(long)]
    addr_file: Option<PathBuf>,

    /// Directory holding repositories and their objects
    #[arg(long, default_value = "./wpg-store-data")]
    data_dir: PathBuf,

    /// Development user name
    #[arg(long, default_value = "dev")]
    dev_user: String,

    /// Development bearer token
    #[arg(long, default_value = "dev")]
    dev_token: String,

    /// Largest accepted object, in MiB
    #[arg(long, default_value_t = 5000)]
    max_object_mib: u64,
}

#[tokio::main]
async fn main() {
    wpg::logging::init();
    if let Err(err) = run().await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("create data dir {}", args.data_dir.display()))?;

    let repos = load_repos_from_disk(&args.data_dir).context("load repos from disk")?;
    tracing::info!(repos = repos.len(), dir = %args.data_dir.display(), "loaded repositories");

    let max_object_bytes = args.max_object_mib.saturating_mul(1024 * 1024);
    let state = Arc::new(AppState {
        data_dir: args.data_dir.clone(),
        user: args.dev_user.clone(),
        token_hash: hash_token(&args.dev_token),
        max_object_bytes,
        repos: RwLock::new(repos),
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .merge(authed_router(state.clone()))
        .layer(DefaultBodyLimit::max(
            usize::try_from(max_object_bytes).unwrap_or(usize::MAX),
        ))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("bind {}", args.addr))?;
    let local_addr = listener.local_addr().context("read listener local addr")?;
    eprintln!("wpg-store listening on {}", local_addr);

    if let Some(addr_file) = &args.addr_file {
        std::fs::write(addr_file, local_addr.to_string())
            .with_context(|| format!("write addr file {}", addr_file.display()))?;
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

fn hash_token(secret: &str) -> String {
    blake3::hash(secret.as_bytes()).to_hex().to_string()
}

fn now_ts() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

async fn require_bearer(
    State(state): State<Arc<AppState>>,
    mut req: axum::extract::Request,
    next: Next,
) -> Response {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return unauthorized();
    };
    let Ok(value) = value.to_str() else {
        return unauthorized();
    };
    let Some(token) = value.strip_prefix("Bearer ") else {
        return unauthorized();
    };
    if hash_token(token) != state.token_hash {
        return unauthorized();
    }

    req.extensions_mut().insert(Subject {
        user: state.user.clone(),
    });
    next.run(req).await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
