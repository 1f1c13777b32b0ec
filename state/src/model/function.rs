use chrono::DateTime;
use chrono::Utc;
use nanoedge_protocol::Permissions;
use serde::Serialize;

use crate::StoreError;
use crate::model::epoch_to_datetime;

/// A deployed function: per-invocation code spawned fresh for each call to
/// `/functions/v2/<name>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionRecord {
    pub name: String,
    pub code: String,
    pub enabled: bool,
    pub permissions: Permissions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateFunctionParams {
    pub name: String,
    pub code: String,
    pub enabled: bool,
    pub permissions: Permissions,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateFunctionParams {
    pub code: Option<String>,
    pub enabled: Option<bool>,
    pub permissions: Option<Permissions>,
    pub description: Option<String>,
}

impl UpdateFunctionParams {
    pub fn is_empty(&self) -> bool {
        self.code.is_none()
            && self.enabled.is_none()
            && self.permissions.is_none()
            && self.description.is_none()
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FunctionRow {
    pub(crate) name: String,
    pub(crate) code: String,
    pub(crate) enabled: i64,
    pub(crate) permissions: String,
    pub(crate) description: Option<String>,
    pub(crate) created_at: i64,
    pub(crate) updated_at: i64,
}

impl TryFrom<FunctionRow> for FunctionRecord {
    type Error = StoreError;

    fn try_from(row: FunctionRow) -> Result<Self, Self::Error> {
        let permissions = serde_json::from_str(&row.permissions)
            .map_err(|err| StoreError::corrupt("function", err))?;
        Ok(FunctionRecord {
            name: row.name,
            code: row.code,
            enabled: row.enabled != 0,
            permissions,
            description: row.description,
            created_at: epoch_to_datetime("function", row.created_at)?,
            updated_at: epoch_to_datetime("function", row.updated_at)?,
        })
    }
}
