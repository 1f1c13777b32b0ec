use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::StoreError;
use crate::model::epoch_to_datetime;

/// Append-only event kinds recorded against a queue row. Per queue id the
/// first event is `start` and the last is `end` or `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceEventKind {
    Start,
    Stream,
    End,
    Failed,
    Log,
    Warning,
    Error,
    Trace,
}

impl TraceEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            TraceEventKind::Start => "start",
            TraceEventKind::Stream => "stream",
            TraceEventKind::End => "end",
            TraceEventKind::Failed => "failed",
            TraceEventKind::Log => "log",
            TraceEventKind::Warning => "warning",
            TraceEventKind::Error => "error",
            TraceEventKind::Trace => "trace",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "start" => Ok(Self::Start),
            "stream" => Ok(Self::Stream),
            "end" => Ok(Self::End),
            "failed" => Ok(Self::Failed),
            "log" => Ok(Self::Log),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "trace" => Ok(Self::Trace),
            _ => Err(StoreError::corrupt(
                "trace",
                format!("unknown event `{value}`"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    pub id: i64,
    pub queue_id: Uuid,
    pub event: TraceEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TraceRow {
    pub(crate) id: i64,
    pub(crate) queue_id: String,
    pub(crate) event: String,
    pub(crate) data: Option<String>,
    pub(crate) created_at: i64,
}

impl TryFrom<TraceRow> for TraceEvent {
    type Error = StoreError;

    fn try_from(row: TraceRow) -> Result<Self, Self::Error> {
        let data = row
            .data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| StoreError::corrupt("trace", err))?;
        Ok(TraceEvent {
            id: row.id,
            queue_id: Uuid::parse_str(&row.queue_id)
                .map_err(|err| StoreError::corrupt("trace", err))?,
            event: TraceEventKind::parse(&row.event)?,
            data,
            created_at: epoch_to_datetime("trace", row.created_at)?,
        })
    }
}
