use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use nanoedge_protocol::Permissions;
use nanoedge_state::CreateFunctionParams;
use nanoedge_state::CreateServiceParams;
use nanoedge_state::CreateTaskParams;
use nanoedge_state::UpdateFunctionParams;
use nanoedge_state::UpdateServiceParams;
use nanoedge_state::UpdateTaskParams;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

/// CRUD surface under `/admin-api/v2`; the admin JWT gate is layered on by
/// the caller.
pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/services", get(list_services).post(create_service))
        .route(
            "/services/{name}",
            get(get_service).put(update_service).delete(delete_service),
        )
        .route("/functions", get(list_functions).post(create_function))
        .route(
            "/functions/{name}",
            get(get_function)
                .put(update_function)
                .delete(delete_function),
        )
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/tasks/{id}/queue", get(list_task_queue).post(enqueue_task))
        .route("/queue/{id}/traces", get(list_queue_traces))
        .route("/config", get(list_config))
        .route("/config/{key}", get(get_config).put(set_config))
}

// ── services ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateServiceBody {
    name: String,
    code: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    jwt_check: bool,
    #[serde(default)]
    permissions: Permissions,
    #[serde(default)]
    schema: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct UpdateServiceBody {
    code: Option<String>,
    enabled: Option<bool>,
    jwt_check: Option<bool>,
    permissions: Option<Permissions>,
    schema: Option<Value>,
}

fn default_true() -> bool {
    true
}

async fn list_services(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let records = state.store().list_services().await?;
    let mut listed = Vec::with_capacity(records.len());
    for record in records {
        let status = state
            .services()
            .status_of(&record.name)
            .await
            .map(|status| json!(status))
            .unwrap_or_else(|| json!("stopped"));
        let mut entry = serde_json::to_value(&record)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        if let Some(object) = entry.as_object_mut() {
            object.insert("status".to_string(), status);
        }
        listed.push(entry);
    }
    Ok(Json(Value::Array(listed)))
}

async fn create_service(
    State(state): State<AppState>,
    Json(body): Json<CreateServiceBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.name.is_empty() || body.code.is_empty() {
        return Err(ApiError::InvalidInput(
            "`name` and `code` are required".to_string(),
        ));
    }
    let record = state
        .store()
        .create_service(&CreateServiceParams {
            name: body.name,
            code: body.code,
            enabled: body.enabled,
            jwt_check: body.jwt_check,
            permissions: body.permissions,
            schema: body.schema,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!(record))))
}

async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store()
        .get_service(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("service `{name}`")))?;
    Ok(Json(json!(record)))
}

async fn update_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<UpdateServiceBody>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store()
        .update_service(
            &name,
            &UpdateServiceParams {
                code: body.code,
                enabled: body.enabled,
                jwt_check: body.jwt_check,
                permissions: body.permissions,
                schema: body.schema,
            },
        )
        .await?;
    Ok(Json(json!(record)))
}

async fn delete_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    // Tear down the running child (and its port) before the record goes.
    state.services().stop(&name).await?;
    state.store().delete_service(&name).await?;
    Ok(Json(json!({ "deleted": name })))
}

// ── functions ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateFunctionBody {
    name: String,
    code: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    permissions: Permissions,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UpdateFunctionBody {
    code: Option<String>,
    enabled: Option<bool>,
    permissions: Option<Permissions>,
    description: Option<String>,
}

async fn list_functions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let records = state.store().list_functions().await?;
    Ok(Json(json!(records)))
}

async fn create_function(
    State(state): State<AppState>,
    Json(body): Json<CreateFunctionBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.name.is_empty() || body.code.is_empty() {
        return Err(ApiError::InvalidInput(
            "`name` and `code` are required".to_string(),
        ));
    }
    let record = state
        .store()
        .create_function(&CreateFunctionParams {
            name: body.name,
            code: body.code,
            enabled: body.enabled,
            permissions: body.permissions,
            description: body.description,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!(record))))
}

async fn get_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store()
        .get_function(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("function `{name}`")))?;
    Ok(Json(json!(record)))
}

async fn update_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<UpdateFunctionBody>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store()
        .update_function(
            &name,
            &UpdateFunctionParams {
                code: body.code,
                enabled: body.enabled,
                permissions: body.permissions,
                description: body.description,
            },
        )
        .await?;
    Ok(Json(json!(record)))
}

async fn delete_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store().delete_function(&name).await?;
    Ok(Json(json!({ "deleted": name })))
}

// ── tasks ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateTaskBody {
    name: String,
    code: String,
    #[serde(default)]
    retry_count: u32,
    #[serde(default = "default_retry_delay", alias = "retry_delay_ms")]
    retry_delay: u64,
    #[serde(default)]
    permissions: Permissions,
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Debug, Deserialize, Default)]
struct UpdateTaskBody {
    retry_count: Option<u32>,
    #[serde(alias = "retry_delay_ms")]
    retry_delay: Option<u64>,
}

fn default_retry_delay() -> u64 {
    1_000
}

async fn list_tasks(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let records = state.store().list_tasks().await?;
    Ok(Json(json!(records)))
}

/// Creating a task also creates its bound function, atomically, under the
/// task's name.
async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.name.is_empty() || body.code.is_empty() {
        return Err(ApiError::InvalidInput(
            "`name` and `code` are required".to_string(),
        ));
    }
    let record = state
        .store()
        .create_task(
            &CreateTaskParams {
                name: body.name.clone(),
                retry_count: body.retry_count,
                retry_delay_ms: body.retry_delay,
            },
            &CreateFunctionParams {
                name: body.name,
                code: body.code,
                enabled: body.enabled,
                permissions: body.permissions,
                description: None,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(json!(record))))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store()
        .get_task(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task `{id}`")))?;
    Ok(Json(json!(record)))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTaskBody>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store()
        .update_task(
            id,
            &UpdateTaskParams {
                retry_count: body.retry_count,
                retry_delay_ms: body.retry_delay,
            },
        )
        .await?;
    Ok(Json(json!(record)))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state.store().delete_task(id).await?;
    Ok(Json(json!({ "deleted": id })))
}

// ── queue ────────────────────────────────────────────────────────────────

/// `POST /tasks/{id}/queue` — enqueue one invocation of the task's bound
/// function with the request body as its params.
async fn enqueue_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: bytes::Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let task = state
        .store()
        .get_task(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task `{id}`")))?;
    let params: Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::InvalidInput(format!("params are not valid JSON: {err}")))?
    };
    let entry = state
        .store()
        .create_queue_entry(
            task.id,
            &params.to_string(),
            task.retry_count,
            task.retry_delay_ms,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(json!(entry))))
}

async fn list_task_queue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let entries = state.store().list_queue_for_task(id).await?;
    Ok(Json(json!(entries)))
}

async fn list_queue_traces(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let traces = state.store().list_traces(id).await?;
    Ok(Json(json!(traces)))
}

// ── config ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ConfigBody {
    value: String,
}

async fn list_config(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let entries = state.store().list_config().await?;
    Ok(Json(json!(entries)))
}

async fn get_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let value = state
        .store()
        .get_config(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("config key `{key}`")))?;
    Ok(Json(json!({ "key": key, "value": value })))
}

async fn set_config(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ConfigBody>,
) -> Result<Json<Value>, ApiError> {
    state.store().set_config(&key, &body.value).await?;
    Ok(Json(json!({ "key": key, "value": body.value })))
}
