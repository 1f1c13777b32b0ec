use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::StoreError;
use crate::model::epoch_to_datetime;

/// A durable, retry-capable invocation template bound to a function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub name: String,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub bound_function_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTaskParams {
    pub name: String,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTaskParams {
    pub retry_count: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl UpdateTaskParams {
    pub fn is_empty(&self) -> bool {
        self.retry_count.is_none() && self.retry_delay_ms.is_none()
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) retry_count: i64,
    pub(crate) retry_delay_ms: i64,
    pub(crate) bound_function_name: String,
    pub(crate) created_at: i64,
    pub(crate) updated_at: i64,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id).map_err(|err| StoreError::corrupt("task", err))?;
        let retry_count = u32::try_from(row.retry_count)
            .map_err(|_| StoreError::corrupt("task", format!("retry_count {}", row.retry_count)))?;
        let retry_delay_ms = u64::try_from(row.retry_delay_ms).map_err(|_| {
            StoreError::corrupt("task", format!("retry_delay_ms {}", row.retry_delay_ms))
        })?;
        Ok(TaskRecord {
            id,
            name: row.name,
            retry_count,
            retry_delay_ms,
            bound_function_name: row.bound_function_name,
            created_at: epoch_to_datetime("task", row.created_at)?,
            updated_at: epoch_to_datetime("task", row.updated_at)?,
        })
    }
}
