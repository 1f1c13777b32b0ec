use std::convert::Infallible;

use axum::body::Body;
use axum::extract::OriginalUri;
use axum::extract::Path;
use axum::extract::Request;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::response::sse::Event;
use axum::response::sse::Sse;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::HeaderMap;
use http::StatusCode;
use nanoedge_core::Reply;
use nanoedge_core::StreamEvent;
use nanoedge_core::forward;
use serde_json::Value;
use serde_json::json;
use tokio::sync::mpsc;

use crate::AppState;
use crate::auth;
use crate::error::ApiError;

/// Request bodies are buffered before forwarding; cap them.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Reply headers that must not be copied back from the child verbatim.
const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "transfer-encoding", "upgrade"];

/// Any-method handler behind `/api/v2/`. The service name is the first
/// path segment after the prefix; the child's adapter strips the whole
/// `/api/v2/<service>` prefix again on its side.
pub(crate) async fn proxy_service(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    request: Request,
) -> Result<Response, ApiError> {
    let service_name = uri
        .path()
        .strip_prefix("/api/v2/")
        .map(|rest| rest.split('/').next().unwrap_or_default().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("missing service name".to_string()))?;

    let record = state
        .store()
        .get_service(&service_name)
        .await?
        .filter(|record| record.enabled)
        .ok_or_else(|| ApiError::NotFound(format!("service `{service_name}`")))?;

    // Per-service gate: reject before the child is touched.
    if record.jwt_check {
        let secret = state.jwt_secret().await?;
        let token = auth::bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;
        auth::verify(&secret, token)?;
    }

    let service = state.services().get_or_start(&service_name).await?;

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|err| ApiError::InvalidInput(format!("unreadable body: {err}")))?;
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    let upstream = forward(
        state.client(),
        service.port(),
        parts.method,
        &path_and_query,
        parts.headers,
        body,
    )
    .await
    .map_err(|_| ApiError::ServiceUnavailable)?;

    Ok(adapt_upstream(upstream))
}

fn adapt_upstream(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// `POST /functions/v2/{function}`.
pub(crate) async fn invoke_function(
    State(state): State<AppState>,
    Path(function): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let params: Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::InvalidInput(format!("body is not valid JSON: {err}")))?
    };

    let reply = state.dispatcher().invoke(&function, params).await?;
    match reply {
        Reply::Value {
            content_type,
            value,
            console: _,
        } => value_response(&content_type, value),
        Reply::Stream { events } => Ok(sse_response(events)),
    }
}

fn value_response(content_type: &str, value: Value) -> Result<Response, ApiError> {
    let body = match (content_type, &value) {
        ("application/octet-stream", Value::String(encoded)) => Body::from(
            BASE64
                .decode(encoded)
                .map_err(|err| ApiError::Internal(format!("invalid binary payload: {err}")))?,
        ),
        (_, Value::String(text)) => Body::from(text.clone()),
        _ => Body::from(value.to_string()),
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(body)
        .map_err(|err| ApiError::Internal(err.to_string()))
}

/// Adapt stream events into `data: <json>` frames with the `[DONE]`
/// terminator. Progress frames go out in generation order; dropping the
/// response (client disconnect) drops the receiver, which tears the child
/// down.
fn sse_response(mut events: mpsc::Receiver<StreamEvent>) -> Response {
    let stream = async_stream::stream! {
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Progress(value) => {
                    yield Ok::<Event, Infallible>(Event::default().data(value.to_string()));
                }
                StreamEvent::Console { .. } => {
                    // Console output is logged by the dispatcher; it is not
                    // part of the SSE contract.
                }
                StreamEvent::Done(result) => {
                    let tail = result.map(|value| value.to_string()).unwrap_or_default();
                    yield Ok(Event::default().data(format!("[DONE]{tail}")));
                    break;
                }
                StreamEvent::Failed { message } => {
                    yield Ok(Event::default().data(json!({"error": message}).to_string()));
                    break;
                }
            }
        }
    };
    Sse::new(stream).into_response()
}
