use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::Store;
use crate::StoreError;
use crate::TraceEvent;
use crate::TraceEventKind;
use crate::model::TraceRow;

impl Store {
    pub async fn append_trace(
        &self,
        queue_id: Uuid,
        event: TraceEventKind,
        data: Option<&Value>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;
        insert_trace(&mut tx, queue_id, event, data).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Trace events for a queue row, in append order.
    pub async fn list_traces(&self, queue_id: Uuid) -> Result<Vec<TraceEvent>, StoreError> {
        let rows = sqlx::query_as::<_, TraceRow>(
            r#"
SELECT id, queue_id, event, data, created_at
FROM trace_events
WHERE queue_id = ?
ORDER BY id
            "#,
        )
        .bind(queue_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(TraceEvent::try_from).collect()
    }
}

pub(crate) async fn insert_trace(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    queue_id: Uuid,
    event: TraceEventKind,
    data: Option<&Value>,
) -> Result<(), StoreError> {
    let now = Utc::now().timestamp();
    let data = data
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| StoreError::corrupt("trace", err))?;
    sqlx::query(
        r#"
INSERT INTO trace_events (queue_id, event, data, created_at)
VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(queue_id.to_string())
    .bind(event.as_str())
    .bind(data)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
