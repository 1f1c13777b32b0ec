use chrono::Utc;

use super::Store;
use crate::PortError;
use crate::StoreError;

impl Store {
    /// Make the reservation table cover exactly `[start, end]`. Rows are
    /// inserted for missing ports; free rows outside the range are dropped.
    /// Allocated rows outside the range are left alone until released.
    pub async fn ensure_port_range(&self, start: u16, end: u16) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;
        for port in start..=end {
            sqlx::query("INSERT OR IGNORE INTO ports (port) VALUES (?)")
                .bind(i64::from(port))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            r#"
DELETE FROM ports
WHERE (port < ? OR port > ?) AND service_name IS NULL
            "#,
        )
        .bind(i64::from(start))
        .bind(i64::from(end))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Reserve the lowest free port for `service_name`.
    ///
    /// The SELECT-lowest and the claim are one UPDATE statement, so two
    /// concurrent allocations can never pick the same row; the surrounding
    /// transaction keeps the `services.allocated_port` mirror in step.
    pub async fn allocate_port(&self, service_name: &str) -> Result<u16, PortError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool().begin().await?;
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
UPDATE ports
SET service_name = ?, allocated_at = ?, released_at = NULL
WHERE port = (
    SELECT MIN(port) FROM ports
    WHERE service_name IS NULL OR released_at IS NOT NULL
)
RETURNING port
            "#,
        )
        .bind(service_name)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((port,)) = row else {
            return Err(PortError::Exhausted);
        };
        sqlx::query("UPDATE services SET allocated_port = ? WHERE name = ?")
            .bind(port)
            .bind(service_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(u16::try_from(port).unwrap_or_default())
    }

    /// Return the service's port to the free pool.
    pub async fn release_port(&self, service_name: &str) -> Result<u16, PortError> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool().begin().await?;
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
UPDATE ports
SET service_name = NULL, allocated_at = NULL, released_at = ?
WHERE service_name = ?
RETURNING port
            "#,
        )
        .bind(now)
        .bind(service_name)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((port,)) = row else {
            return Err(PortError::NotAllocated(service_name.to_string()));
        };
        sqlx::query("UPDATE services SET allocated_port = NULL WHERE name = ?")
            .bind(service_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(u16::try_from(port).unwrap_or_default())
    }

    pub async fn port_for_service(&self, service_name: &str) -> Result<Option<u16>, PortError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT port FROM ports WHERE service_name = ?")
            .bind(service_name)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(port,)| u16::try_from(port).unwrap_or_default()))
    }

    pub async fn count_ports(&self) -> Result<u64, PortError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ports")
            .fetch_one(self.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CreateServiceParams;
    use nanoedge_protocol::Permissions;
    use pretty_assertions::assert_eq;

    async fn seeded(names: &[&str]) -> anyhow::Result<Store> {
        let store = Store::open_in_memory().await?;
        store.ensure_port_range(9001, 9004).await?;
        for name in names {
            store
                .create_service(&CreateServiceParams {
                    name: (*name).to_string(),
                    code: "export default () => {};".to_string(),
                    enabled: true,
                    jwt_check: false,
                    permissions: Permissions::default(),
                    schema: None,
                })
                .await?;
        }
        Ok(store)
    }

    #[tokio::test]
    async fn allocates_lowest_port_first() -> anyhow::Result<()> {
        let store = seeded(&["a", "b"]).await?;
        assert_eq!(store.allocate_port("a").await?, 9001);
        assert_eq!(store.allocate_port("b").await?, 9002);
        Ok(())
    }

    #[tokio::test]
    async fn allocation_mirrors_into_service_record() -> anyhow::Result<()> {
        let store = seeded(&["a"]).await?;
        let port = store.allocate_port("a").await?;
        let service = store.get_service("a").await?;
        assert_eq!(service.and_then(|s| s.allocated_port), Some(port));
        assert_eq!(store.port_for_service("a").await?, Some(port));
        Ok(())
    }

    #[tokio::test]
    async fn released_port_is_reused_lowest_first() -> anyhow::Result<()> {
        let store = seeded(&["a", "b"]).await?;
        let first = store.allocate_port("a").await?;
        store.release_port("a").await?;
        // The freshly released port is the lowest free one again.
        assert_eq!(store.allocate_port("b").await?, first);
        Ok(())
    }

    #[tokio::test]
    async fn release_without_allocation_warns() -> anyhow::Result<()> {
        let store = seeded(&["a"]).await?;
        let err = store.release_port("a").await;
        assert!(matches!(err, Err(PortError::NotAllocated(_))));
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_range_is_reported() -> anyhow::Result<()> {
        let store = seeded(&["a", "b", "c", "d", "e"]).await?;
        for name in ["a", "b", "c", "d"] {
            store.allocate_port(name).await?;
        }
        let err = store.allocate_port("e").await;
        assert!(matches!(err, Err(PortError::Exhausted)));
        Ok(())
    }

    #[tokio::test]
    async fn range_is_seeded_exactly_once() -> anyhow::Result<()> {
        let store = seeded(&[]).await?;
        store.ensure_port_range(9001, 9004).await?;
        assert_eq!(store.count_ports().await?, 4);
        Ok(())
    }
}
