use chrono::Utc;

use super::Store;
use crate::CreateFunctionParams;
use crate::FunctionRecord;
use crate::StoreError;
use crate::UpdateFunctionParams;
use crate::model::FunctionRow;

const FUNCTION_COLUMNS: &str = r#"
SELECT
    name,
    code,
    enabled,
    permissions,
    description,
    created_at,
    updated_at
FROM functions
"#;

impl Store {
    pub async fn create_function(
        &self,
        params: &CreateFunctionParams,
    ) -> Result<FunctionRecord, StoreError> {
        let mut tx = self.pool().begin().await?;
        insert_function(&mut tx, params).await?;
        tx.commit().await?;
        self.get_function(&params.name)
            .await?
            .ok_or_else(|| StoreError::not_found("function", &params.name))
    }

    pub async fn get_function(&self, name: &str) -> Result<Option<FunctionRecord>, StoreError> {
        let row = sqlx::query_as::<_, FunctionRow>(&format!("{FUNCTION_COLUMNS} WHERE name = ?"))
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        row.map(FunctionRecord::try_from).transpose()
    }

    pub async fn list_functions(&self) -> Result<Vec<FunctionRecord>, StoreError> {
        let rows = sqlx::query_as::<_, FunctionRow>(&format!("{FUNCTION_COLUMNS} ORDER BY name"))
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(FunctionRecord::try_from).collect()
    }

    pub async fn update_function(
        &self,
        name: &str,
        params: &UpdateFunctionParams,
    ) -> Result<FunctionRecord, StoreError> {
        if params.is_empty() {
            return self
                .get_function(name)
                .await?
                .ok_or_else(|| StoreError::not_found("function", name));
        }

        let now = Utc::now().timestamp();
        let permissions = params
            .permissions
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| StoreError::corrupt("function", err))?;
        let result = sqlx::query(
            r#"
UPDATE functions
SET
    code = COALESCE(?, code),
    enabled = COALESCE(?, enabled),
    permissions = COALESCE(?, permissions),
    description = COALESCE(?, description),
    updated_at = ?
WHERE name = ?
            "#,
        )
        .bind(params.code.as_deref())
        .bind(params.enabled.map(i64::from))
        .bind(permissions)
        .bind(params.description.as_deref())
        .bind(now)
        .bind(name)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("function", name));
        }

        self.get_function(name)
            .await?
            .ok_or_else(|| StoreError::not_found("function", name))
    }

    pub async fn delete_function(&self, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM functions WHERE name = ?")
            .bind(name)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub(crate) async fn insert_function(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    params: &CreateFunctionParams,
) -> Result<(), StoreError> {
    let now = Utc::now().timestamp();
    let permissions = serde_json::to_string(&params.permissions)
        .map_err(|err| StoreError::corrupt("function", err))?;
    sqlx::query(
        r#"
INSERT INTO functions (name, code, enabled, permissions, description, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(params.name.as_str())
    .bind(params.code.as_str())
    .bind(i64::from(params.enabled))
    .bind(permissions)
    .bind(params.description.as_deref())
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|err| StoreError::on_insert("function", &params.name, err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanoedge_protocol::Permissions;
    use pretty_assertions::assert_eq;

    fn echo_params() -> CreateFunctionParams {
        CreateFunctionParams {
            name: "echo".to_string(),
            code: "export default (x) => x;".to_string(),
            enabled: true,
            permissions: Permissions::default(),
            description: Some("echoes its input".to_string()),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() -> anyhow::Result<()> {
        let store = Store::open_in_memory().await?;
        let created = store.create_function(&echo_params()).await?;
        assert_eq!(store.get_function("echo").await?, Some(created));
        Ok(())
    }

    #[tokio::test]
    async fn update_missing_function_is_not_found() -> anyhow::Result<()> {
        let store = Store::open_in_memory().await?;
        let err = store
            .update_function(
                "ghost",
                &UpdateFunctionParams {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(err, Err(StoreError::NotFound { .. })));
        Ok(())
    }
}
