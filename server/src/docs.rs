use axum::extract::Path;
use axum::extract::State;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::Value;
use serde_json::json;

use crate::AppState;
use crate::error::ApiError;

const OPENAPI_SPEC: &str = include_str!("assets/openapi.json");

/// `GET /openapi.json` — the runtime's own API description.
pub(crate) async fn openapi_spec() -> Response {
    (
        [(http::header::CONTENT_TYPE, "application/json")],
        OPENAPI_SPEC,
    )
        .into_response()
}

/// `GET /docs` — swagger UI over the runtime spec.
pub(crate) async fn swagger_ui() -> Html<String> {
    Html(swagger_page("/openapi.json"))
}

/// `GET /api/docs/{service}` — swagger UI over one service's stored schema.
pub(crate) async fn service_docs(Path(service): Path<String>) -> Html<String> {
    Html(swagger_page(&format!("/api/docs/openapi/{service}")))
}

/// `GET /api/docs/openapi/{service}` — the service's stored OpenAPI JSON,
/// with a `servers` entry pointing at its proxy prefix when absent.
pub(crate) async fn service_openapi(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<axum::Json<Value>, ApiError> {
    let record = state
        .store()
        .get_service(&service)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("service `{service}`")))?;
    let mut schema = record
        .schema
        .ok_or_else(|| ApiError::NotFound(format!("schema for service `{service}`")))?;

    if let Some(object) = schema.as_object_mut()
        && !object.contains_key("servers")
    {
        let url = format!(
            "http://127.0.0.1:{}/api/v2/{service}",
            state.main_port()
        );
        object.insert("servers".to_string(), json!([{ "url": url }]));
    }
    Ok(axum::Json(schema))
}

fn swagger_page(spec_url: &str) -> String {
    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>NanoEdgeRT API</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {{
      SwaggerUIBundle({{ url: "{spec_url}", dom_id: "#swagger-ui" }});
    }};
  </script>
</body>
</html>
"##
    )
}
