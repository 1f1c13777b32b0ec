use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::StoreError;
use crate::model::epoch_to_datetime;

/// Lifecycle of a queue row. Transitions are strictly
/// `queued → running → {completed, failed}`; a retry stays in `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Running => "running",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(StoreError::corrupt(
                "queue",
                format!("unknown status `{value}`"),
            )),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

/// One queued invocation of a task's bound function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub params: String,
    pub status: QueueStatus,
    pub remaining_retries: u32,
    pub retry_delay_ms: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The slice of a queue row the executor needs while it owns the claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedQueueEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub params: String,
    pub remaining_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct QueueRow {
    pub(crate) id: String,
    pub(crate) task_id: String,
    pub(crate) params: String,
    pub(crate) status: String,
    pub(crate) remaining_retries: i64,
    pub(crate) retry_delay_ms: i64,
    pub(crate) created_at: i64,
    pub(crate) updated_at: i64,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = StoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(QueueEntry {
            id: Uuid::parse_str(&row.id).map_err(|err| StoreError::corrupt("queue", err))?,
            task_id: Uuid::parse_str(&row.task_id)
                .map_err(|err| StoreError::corrupt("queue", err))?,
            params: row.params,
            status: QueueStatus::parse(&row.status)?,
            remaining_retries: u32::try_from(row.remaining_retries).map_err(|_| {
                StoreError::corrupt(
                    "queue",
                    format!("remaining_retries {}", row.remaining_retries),
                )
            })?,
            retry_delay_ms: u64::try_from(row.retry_delay_ms).map_err(|_| {
                StoreError::corrupt("queue", format!("retry_delay_ms {}", row.retry_delay_ms))
            })?,
            created_at: epoch_to_datetime("queue", row.created_at)?,
            updated_at: epoch_to_datetime("queue", row.updated_at)?,
        })
    }
}

impl TryFrom<QueueRow> for ClaimedQueueEntry {
    type Error = StoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let entry = QueueEntry::try_from(row)?;
        Ok(ClaimedQueueEntry {
            id: entry.id,
            task_id: entry.task_id,
            params: entry.params,
            remaining_retries: entry.remaining_retries,
            retry_delay_ms: entry.retry_delay_ms,
        })
    }
}
