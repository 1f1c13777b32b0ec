use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde_json::Value;
use serde_json::json;

use crate::AppState;

/// `GET /health` and `GET /status`.
pub(crate) async fn health(State(state): State<AppState>) -> Json<Value> {
    let now = Utc::now();
    let uptime_ms = (now - state.started_at).num_milliseconds().max(0);
    let services = state.services().summaries().await;
    Json(json!({
        "status": "ok",
        "startTime": state.started_at.to_rfc3339(),
        "currentTime": now.to_rfc3339(),
        "upTime": {
            "ms": uptime_ms,
            "sec": uptime_ms / 1000,
            "human": human_duration(uptime_ms),
        },
        "services": services,
    }))
}

fn human_duration(ms: i64) -> String {
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
