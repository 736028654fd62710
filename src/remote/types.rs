//! Payloads exchanged with the dataset store HTTP API.

use serde::{Deserialize, Serialize};

/// Header carrying the blake3 hex digest of an uploaded object body.
pub const CONTENT_HASH_HEADER: &str = "x-wpg-blake3";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub name: String,
    pub size: u64,
    pub blake3: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRepoRequest {
    pub id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepoInfo {
    pub id: String,
    pub owner: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteObjectsRequest {
    pub names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteObjectsResponse {
    pub deleted: Vec<String>,
}
