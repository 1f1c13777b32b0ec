use chrono::Utc;

use super::Store;
use crate::CreateServiceParams;
use crate::ServiceRecord;
use crate::StoreError;
use crate::UpdateServiceParams;
use crate::model::ServiceRow;

const SERVICE_COLUMNS: &str = r#"
SELECT
    name,
    code,
    enabled,
    jwt_check,
    permissions,
    schema,
    allocated_port,
    created_at,
    updated_at
FROM services
"#;

impl Store {
    pub async fn create_service(
        &self,
        params: &CreateServiceParams,
    ) -> Result<ServiceRecord, StoreError> {
        let now = Utc::now().timestamp();
        let permissions = serde_json::to_string(&params.permissions)
            .map_err(|err| StoreError::corrupt("service", err))?;
        let schema = params
            .schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| StoreError::corrupt("service", err))?;
        sqlx::query(
            r#"
INSERT INTO services (name, code, enabled, jwt_check, permissions, schema, allocated_port, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(params.name.as_str())
        .bind(params.code.as_str())
        .bind(i64::from(params.enabled))
        .bind(i64::from(params.jwt_check))
        .bind(permissions)
        .bind(schema)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|err| StoreError::on_insert("service", &params.name, err))?;

        self.get_service(&params.name)
            .await?
            .ok_or_else(|| StoreError::not_found("service", &params.name))
    }

    pub async fn get_service(&self, name: &str) -> Result<Option<ServiceRecord>, StoreError> {
        let row = sqlx::query_as::<_, ServiceRow>(&format!("{SERVICE_COLUMNS} WHERE name = ?"))
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        row.map(ServiceRecord::try_from).transpose()
    }

    pub async fn list_services(&self) -> Result<Vec<ServiceRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ServiceRow>(&format!("{SERVICE_COLUMNS} ORDER BY name"))
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(ServiceRecord::try_from).collect()
    }

    pub async fn update_service(
        &self,
        name: &str,
        params: &UpdateServiceParams,
    ) -> Result<ServiceRecord, StoreError> {
        if params.is_empty() {
            return self
                .get_service(name)
                .await?
                .ok_or_else(|| StoreError::not_found("service", name));
        }

        let now = Utc::now().timestamp();
        let permissions = params
            .permissions
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| StoreError::corrupt("service", err))?;
        let schema = params
            .schema
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| StoreError::corrupt("service", err))?;
        let result = sqlx::query(
            r#"
UPDATE services
SET
    code = COALESCE(?, code),
    enabled = COALESCE(?, enabled),
    jwt_check = COALESCE(?, jwt_check),
    permissions = COALESCE(?, permissions),
    schema = COALESCE(?, schema),
    updated_at = ?
WHERE name = ?
            "#,
        )
        .bind(params.code.as_deref())
        .bind(params.enabled.map(i64::from))
        .bind(params.jwt_check.map(i64::from))
        .bind(permissions)
        .bind(schema)
        .bind(now)
        .bind(name)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("service", name));
        }

        self.get_service(name)
            .await?
            .ok_or_else(|| StoreError::not_found("service", name))
    }

    /// Delete a service and free its port reservation in one transaction.
    /// Returns `false` when no such service existed.
    pub async fn delete_service(&self, name: &str) -> Result<bool, StoreError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"
UPDATE ports
SET service_name = NULL, allocated_at = NULL, released_at = ?
WHERE service_name = ?
            "#,
        )
        .bind(now)
        .bind(name)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM services WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
