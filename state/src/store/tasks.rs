use chrono::Utc;
use uuid::Uuid;

use super::Store;
use crate::CreateFunctionParams;
use crate::CreateTaskParams;
use crate::StoreError;
use crate::TaskRecord;
use crate::UpdateTaskParams;
use crate::model::TaskRow;
use crate::store::functions::insert_function;

const TASK_COLUMNS: &str = r#"
SELECT
    id,
    name,
    retry_count,
    retry_delay_ms,
    bound_function_name,
    created_at,
    updated_at
FROM tasks
"#;

impl Store {
    /// Create a task and its bound function atomically. The function record
    /// shares the task's name; a duplicate of either aborts the whole
    /// transaction.
    pub async fn create_task(
        &self,
        params: &CreateTaskParams,
        function: &CreateFunctionParams,
    ) -> Result<TaskRecord, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now().timestamp();
        let mut tx = self.pool().begin().await?;
        insert_function(&mut tx, function).await?;
        sqlx::query(
            r#"
INSERT INTO tasks (id, name, retry_count, retry_delay_ms, bound_function_name, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(params.name.as_str())
        .bind(i64::from(params.retry_count))
        .bind(i64::try_from(params.retry_delay_ms).unwrap_or(i64::MAX))
        .bind(function.name.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|err| StoreError::on_insert("task", &params.name, err))?;
        tx.commit().await?;

        self.get_task(id)
            .await?
            .ok_or_else(|| StoreError::not_found("task", id.to_string()))
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<TaskRecord>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!("{TASK_COLUMNS} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(TaskRecord::try_from).transpose()
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!("{TASK_COLUMNS} ORDER BY name"))
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(TaskRecord::try_from).collect()
    }

    pub async fn update_task(
        &self,
        id: Uuid,
        params: &UpdateTaskParams,
    ) -> Result<TaskRecord, StoreError> {
        if params.is_empty() {
            return self
                .get_task(id)
                .await?
                .ok_or_else(|| StoreError::not_found("task", id.to_string()));
        }

        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
UPDATE tasks
SET
    retry_count = COALESCE(?, retry_count),
    retry_delay_ms = COALESCE(?, retry_delay_ms),
    updated_at = ?
WHERE id = ?
            "#,
        )
        .bind(params.retry_count.map(i64::from))
        .bind(
            params
                .retry_delay_ms
                .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
        )
        .bind(now)
        .bind(id.to_string())
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("task", id.to_string()));
        }

        self.get_task(id)
            .await?
            .ok_or_else(|| StoreError::not_found("task", id.to_string()))
    }

    /// Delete a task together with the function that was created for it.
    pub async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool().begin().await?;
        let bound: Option<(String,)> =
            sqlx::query_as("SELECT bound_function_name FROM tasks WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        let Some((function_name,)) = bound else {
            return Ok(false);
        };
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM functions WHERE name = ?")
            .bind(function_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }
}
