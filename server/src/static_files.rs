use std::path::Component;
use std::path::PathBuf;

use axum::body::Body;
use axum::extract::Path;
use axum::extract::State;
use axum::response::Response;
use http::StatusCode;

use crate::AppState;
use crate::error::ApiError;

/// `GET /static/{*path}` — files from the local static root.
pub(crate) async fn serve(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let relative = sanitize(&path)
        .ok_or_else(|| ApiError::InvalidInput("invalid static path".to_string()))?;
    let full = state.static_root().join(relative);
    let body = tokio::fs::read(&full)
        .await
        .map_err(|_| ApiError::NotFound(format!("static file `{path}`")))?;

    let media_type = mime_guess::from_path(&full)
        .first_or_octet_stream()
        .to_string();
    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, media_type)
        .body(Body::from(body))
        .map_err(|err| ApiError::Internal(err.to_string()))
}

/// Reject traversal: only plain path segments survive.
fn sanitize(path: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(path);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(segment) => clean.push(segment),
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        return None;
    }
    Some(clean)
}
