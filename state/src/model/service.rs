use chrono::DateTime;
use chrono::Utc;
use nanoedge_protocol::Permissions;
use serde::Serialize;
use serde_json::Value;

use crate::StoreError;
use crate::model::epoch_to_datetime;

/// A deployed service: long-lived HTTP handler code reached through the
/// `/api/v2/<name>/` reverse-proxy prefix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRecord {
    pub name: String,
    pub code: String,
    pub enabled: bool,
    pub jwt_check: bool,
    pub permissions: Permissions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocated_port: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateServiceParams {
    pub name: String,
    pub code: String,
    pub enabled: bool,
    pub jwt_check: bool,
    pub permissions: Permissions,
    pub schema: Option<Value>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateServiceParams {
    pub code: Option<String>,
    pub enabled: Option<bool>,
    pub jwt_check: Option<bool>,
    pub permissions: Option<Permissions>,
    pub schema: Option<Value>,
}

impl UpdateServiceParams {
    pub fn is_empty(&self) -> bool {
        self.code.is_none()
            && self.enabled.is_none()
            && self.jwt_check.is_none()
            && self.permissions.is_none()
            && self.schema.is_none()
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ServiceRow {
    pub(crate) name: String,
    pub(crate) code: String,
    pub(crate) enabled: i64,
    pub(crate) jwt_check: i64,
    pub(crate) permissions: String,
    pub(crate) schema: Option<String>,
    pub(crate) allocated_port: Option<i64>,
    pub(crate) created_at: i64,
    pub(crate) updated_at: i64,
}

impl TryFrom<ServiceRow> for ServiceRecord {
    type Error = StoreError;

    fn try_from(row: ServiceRow) -> Result<Self, Self::Error> {
        let permissions: Permissions = serde_json::from_str(&row.permissions)
            .map_err(|err| StoreError::corrupt("service", err))?;
        let schema = row
            .schema
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| StoreError::corrupt("service", err))?;
        let allocated_port = row
            .allocated_port
            .map(|port| {
                u16::try_from(port)
                    .map_err(|_| StoreError::corrupt("service", format!("port {port}")))
            })
            .transpose()?;
        Ok(ServiceRecord {
            name: row.name,
            code: row.code,
            enabled: row.enabled != 0,
            jwt_check: row.jwt_check != 0,
            permissions,
            schema,
            allocated_port,
            created_at: epoch_to_datetime("service", row.created_at)?,
            updated_at: epoch_to_datetime("service", row.updated_at)?,
        })
    }
}
