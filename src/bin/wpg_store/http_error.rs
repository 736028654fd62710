use super::*;

fn error_response(status: StatusCode, msg: &str) -> Response {
    (status, Json(serde_json::json!({"error": msg}))).into_response()
}

pub(super) fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "unauthorized")
}

pub(super) fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

pub(super) fn bad_request(err: anyhow::Error) -> Response {
    error_response(StatusCode::BAD_REQUEST, &format!("{:#}", err))
}

pub(super) fn payload_too_large(limit: u64) -> Response {
    error_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        &format!("object exceeds {} bytes", limit),
    )
}

pub(super) fn internal_error(err: anyhow::Error) -> Response {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("{:#}", err))
}
