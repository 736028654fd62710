//! Authenticated HTTP route registration for the dataset store.

use super::*;

pub(super) fn authed_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/whoami", get(whoami))
        .route("/repos", post(create_repo))
        .route("/repos/:repo_id/objects", get(list_objects))
        .route("/repos/:repo_id/objects/delete", post(delete_objects))
        .route(
            "/repos/:repo_id/objects/:name",
            get(get_object).put(put_object),
        )
        .layer(middleware::from_fn_with_state(state, require_bearer))
}
