use sqlx::{sqlite::SqliteRow, Row};

use autoxloo_core::domain::appointment::DeliveryId;
use autoxloo_core::domain::tool::IdempotencyKey;

use super::{parse_timestamp, DeliveryRecord, DeliveryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlDeliveryRepository {
    pool: DbPool,
}

impl SqlDeliveryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DeliveryRepository for SqlDeliveryRepository {
    async fn find_by_business_key(
        &self,
        business_key: &IdempotencyKey,
    ) -> Result<Option<DeliveryRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, business_key, recipient, details, sent_at
             FROM confirmation_delivery
             WHERE business_key = ?",
        )
        .bind(&business_key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(delivery_from_row).transpose()
    }

    async fn save(&self, delivery: DeliveryRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO confirmation_delivery (id, business_key, recipient, details, sent_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&delivery.id.0)
        .bind(&delivery.business_key.0)
        .bind(&delivery.recipient)
        .bind(&delivery.details)
        .bind(delivery.sent_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn delivery_from_row(row: SqliteRow) -> Result<DeliveryRecord, RepositoryError> {
    Ok(DeliveryRecord {
        id: DeliveryId(row.try_get("id")?),
        business_key: IdempotencyKey(row.try_get("business_key")?),
        recipient: row.try_get("recipient")?,
        details: row.try_get("details")?,
        sent_at: parse_timestamp("sent_at", row.try_get("sent_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use autoxloo_core::domain::appointment::DeliveryId;
    use autoxloo_core::domain::tool::IdempotencyKey;

    use super::SqlDeliveryRepository;
    use crate::connect_with_settings;
    use crate::migrations;
    use crate::repositories::{DeliveryRecord, DeliveryRepository};

    #[tokio::test]
    async fn sql_delivery_repo_round_trip() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        let repo = SqlDeliveryRepository::new(pool.clone());

        let delivery = DeliveryRecord {
            id: DeliveryId("MSG-0A1B2C3D".to_string()),
            business_key: IdempotencyKey("send_confirmation:abc".to_string()),
            recipient: "jordan@example.com".to_string(),
            details: "Test drive TD-1A2B3C4D on Saturday Oct 17, 10:00 AM".to_string(),
            sent_at: DateTime::parse_from_rfc3339("2026-10-15T12:00:00Z")
                .expect("valid rfc3339")
                .with_timezone(&Utc),
        };

        repo.save(delivery.clone()).await.expect("save delivery");
        repo.save(delivery.clone()).await.expect("duplicate save is a no-op");

        assert_eq!(
            repo.find_by_business_key(&delivery.business_key).await.expect("find delivery"),
            Some(delivery)
        );

        pool.close().await;
    }
}
