use std::collections::BTreeMap;

use super::Store;
use crate::StoreError;
use crate::config;

impl Store {
    pub async fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO config (key, value) VALUES (?, ?)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_config(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM config ORDER BY key")
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// `[available_port_start, available_port_end]`, falling back to the
    /// defaults when unset or unparseable.
    pub async fn port_range(&self) -> Result<(u16, u16), StoreError> {
        let start = self
            .parsed_config(config::AVAILABLE_PORT_START)
            .await?
            .unwrap_or(config::DEFAULT_PORT_START);
        let end = self
            .parsed_config(config::AVAILABLE_PORT_END)
            .await?
            .unwrap_or(config::DEFAULT_PORT_END);
        Ok((start, end))
    }

    pub async fn main_port(&self) -> Result<u16, StoreError> {
        Ok(self
            .parsed_config(config::MAIN_PORT)
            .await?
            .unwrap_or(config::DEFAULT_MAIN_PORT))
    }

    pub async fn function_timeout_ms(&self) -> Result<u64, StoreError> {
        Ok(self
            .parsed_config(config::FUNCTION_EXECUTION_TIMEOUT_MS)
            .await?
            .unwrap_or(config::DEFAULT_FUNCTION_TIMEOUT_MS))
    }

    pub async fn jwt_secret(&self) -> Result<Option<String>, StoreError> {
        self.get_config(config::JWT_SECRET).await
    }

    async fn parsed_config<T: std::str::FromStr>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        Ok(self.get_config(key).await?.and_then(|v| v.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn defaults_apply_when_unset() -> anyhow::Result<()> {
        let store = Store::open_in_memory().await?;
        assert_eq!(store.port_range().await?, (8001, 8999));
        assert_eq!(store.main_port().await?, 8000);
        assert_eq!(store.function_timeout_ms().await?, 30_000);
        assert_eq!(store.jwt_secret().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn set_overrides_and_upserts() -> anyhow::Result<()> {
        let store = Store::open_in_memory().await?;
        store.set_config("main_port", "9000").await?;
        store.set_config("main_port", "9100").await?;
        assert_eq!(store.main_port().await?, 9100);
        Ok(())
    }
}
