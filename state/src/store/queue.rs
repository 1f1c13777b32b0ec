use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::Store;
use crate::ClaimedQueueEntry;
use crate::QueueEntry;
use crate::QueueStatus;
use crate::StoreError;
use crate::TraceEventKind;
use crate::model::QueueRow;
use crate::store::traces::insert_trace;

const QUEUE_COLUMNS: &str = r#"
SELECT
    id,
    task_id,
    params,
    status,
    remaining_retries,
    retry_delay_ms,
    created_at,
    updated_at
FROM task_queue
"#;

impl Store {
    pub async fn create_queue_entry(
        &self,
        task_id: Uuid,
        params: &str,
        remaining_retries: u32,
        retry_delay_ms: u64,
    ) -> Result<QueueEntry, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
INSERT INTO task_queue (id, task_id, params, status, remaining_retries, retry_delay_ms, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(task_id.to_string())
        .bind(params)
        .bind(QueueStatus::Queued.as_str())
        .bind(i64::from(remaining_retries))
        .bind(i64::try_from(retry_delay_ms).unwrap_or(i64::MAX))
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_queue_entry(id)
            .await?
            .ok_or_else(|| StoreError::not_found("queue entry", id.to_string()))
    }

    /// Move every `queued` row to `running` and return the claimed rows.
    ///
    /// The single UPDATE makes the claim atomic: a row can only be claimed
    /// once, so at most one worker owns it while it is `running`. This is
    /// the coarse single-executor claim; horizontal scale would need a
    /// LIMIT + skip-locked variant.
    pub async fn claim_queued(&self) -> Result<Vec<ClaimedQueueEntry>, StoreError> {
        let now = Utc::now().timestamp();
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"
UPDATE task_queue
SET status = ?, updated_at = ?
WHERE status = ?
RETURNING id, task_id, params, status, remaining_retries, retry_delay_ms, created_at, updated_at
            "#,
        )
        .bind(QueueStatus::Running.as_str())
        .bind(now)
        .bind(QueueStatus::Queued.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(ClaimedQueueEntry::try_from).collect()
    }

    /// Consume one retry. Returns the retries left after the decrement.
    pub async fn decrement_queue_retries(&self, id: Uuid) -> Result<u32, StoreError> {
        let now = Utc::now().timestamp();
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
UPDATE task_queue
SET remaining_retries = remaining_retries - 1, updated_at = ?
WHERE id = ? AND remaining_retries > 0
RETURNING remaining_retries
            "#,
        )
        .bind(now)
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?;
        let (remaining,) =
            row.ok_or_else(|| StoreError::not_found("queue entry", id.to_string()))?;
        Ok(u32::try_from(remaining).unwrap_or(0))
    }

    /// Record the terminal `end` trace event and flip the row to
    /// `completed` in one transaction, so a terminal status always has its
    /// terminal event on disk.
    pub async fn mark_queue_completed(
        &self,
        id: Uuid,
        result: Option<&Value>,
    ) -> Result<(), StoreError> {
        self.finish_queue_entry(id, QueueStatus::Completed, TraceEventKind::End, result)
            .await
    }

    /// Record the terminal `failed` trace event and flip the row to
    /// `failed` in one transaction.
    pub async fn mark_queue_failed(&self, id: Uuid, error: &Value) -> Result<(), StoreError> {
        self.finish_queue_entry(id, QueueStatus::Failed, TraceEventKind::Failed, Some(error))
            .await
    }

    async fn finish_queue_entry(
        &self,
        id: Uuid,
        status: QueueStatus,
        event: TraceEventKind,
        data: Option<&Value>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool().begin().await?;
        insert_trace(&mut tx, id, event, data).await?;
        let result = sqlx::query(
            r#"
UPDATE task_queue
SET status = ?, updated_at = ?
WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(id.to_string())
        .bind(QueueStatus::Running.as_str())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("queue entry", id.to_string()));
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_queue_entry(&self, id: Uuid) -> Result<Option<QueueEntry>, StoreError> {
        let row = sqlx::query_as::<_, QueueRow>(&format!("{QUEUE_COLUMNS} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(QueueEntry::try_from).transpose()
    }

    pub async fn list_queue_for_task(&self, task_id: Uuid) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query_as::<_, QueueRow>(&format!(
            "{QUEUE_COLUMNS} WHERE task_id = ? ORDER BY created_at, id"
        ))
        .bind(task_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(QueueEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CreateFunctionParams;
    use crate::CreateTaskParams;
    use nanoedge_protocol::Permissions;
    use pretty_assertions::assert_eq;

    async fn store_with_task(store: &Store) -> anyhow::Result<Uuid> {
        let task = store
            .create_task(
                &CreateTaskParams {
                    name: "t".to_string(),
                    retry_count: 1,
                    retry_delay_ms: 10,
                },
                &CreateFunctionParams {
                    name: "t".to_string(),
                    code: "export default () => 1;".to_string(),
                    enabled: true,
                    permissions: Permissions::default(),
                    description: None,
                },
            )
            .await?;
        Ok(task.id)
    }

    #[tokio::test]
    async fn claim_moves_queued_rows_to_running_once() -> anyhow::Result<()> {
        let store = Store::open_in_memory().await?;
        let task_id = store_with_task(&store).await?;
        let entry = store.create_queue_entry(task_id, "{}", 1, 10).await?;

        let claimed = store.claim_queued().await?;
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, entry.id);

        // A second sweep finds nothing left to claim.
        assert_eq!(store.claim_queued().await?.len(), 0);
        let running = store.get_queue_entry(entry.id).await?;
        assert_eq!(running.map(|e| e.status), Some(QueueStatus::Running));
        Ok(())
    }

    #[tokio::test]
    async fn terminal_states_are_never_reentered() -> anyhow::Result<()> {
        let store = Store::open_in_memory().await?;
        let task_id = store_with_task(&store).await?;
        let entry = store.create_queue_entry(task_id, "{}", 0, 10).await?;
        store.claim_queued().await?;
        store.mark_queue_completed(entry.id, None).await?;

        let err = store
            .mark_queue_failed(entry.id, &serde_json::json!("boom"))
            .await;
        assert!(matches!(err, Err(StoreError::NotFound { .. })));
        let done = store.get_queue_entry(entry.id).await?;
        assert_eq!(done.map(|e| e.status), Some(QueueStatus::Completed));
        Ok(())
    }

    #[tokio::test]
    async fn failed_row_has_start_then_failed_trace() -> anyhow::Result<()> {
        let store = Store::open_in_memory().await?;
        let task_id = store_with_task(&store).await?;
        let entry = store.create_queue_entry(task_id, "{}", 0, 10).await?;
        store.claim_queued().await?;
        store
            .append_trace(entry.id, TraceEventKind::Start, Some(&serde_json::json!("{}")))
            .await?;
        store
            .mark_queue_failed(entry.id, &serde_json::json!("boom"))
            .await?;

        let events: Vec<_> = store
            .list_traces(entry.id)
            .await?
            .into_iter()
            .map(|t| t.event)
            .collect();
        assert_eq!(events, vec![TraceEventKind::Start, TraceEventKind::Failed]);
        Ok(())
    }

    #[tokio::test]
    async fn decrement_consumes_retries_monotonically() -> anyhow::Result<()> {
        let store = Store::open_in_memory().await?;
        let task_id = store_with_task(&store).await?;
        let entry = store.create_queue_entry(task_id, "{}", 2, 10).await?;
        assert_eq!(store.decrement_queue_retries(entry.id).await?, 1);
        assert_eq!(store.decrement_queue_retries(entry.id).await?, 0);
        let err = store.decrement_queue_retries(entry.id).await;
        assert!(matches!(err, Err(StoreError::NotFound { .. })));
        Ok(())
    }
}
