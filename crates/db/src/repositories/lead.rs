use sqlx::{sqlite::SqliteRow, Row};

use autoxloo_core::domain::appointment::{LeadFields, LeadId};
use autoxloo_core::domain::tool::IdempotencyKey;

use super::{parse_timestamp, LeadRecord, LeadRepository, RepositoryError};
use crate::DbPool;

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find_by_business_key(
        &self,
        business_key: &IdempotencyKey,
    ) -> Result<Option<LeadRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                business_key,
                customer_name,
                contact,
                interest,
                budget,
                timeline,
                trade_in,
                created_at
             FROM lead
             WHERE business_key = ?",
        )
        .bind(&business_key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(lead_from_row).transpose()
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM lead").fetch_one(&self.pool).await?;
        let count: i64 = row.try_get("count")?;
        u64::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("negative lead count: {count}")))
    }

    async fn save(&self, lead: LeadRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO lead (
                id,
                business_key,
                customer_name,
                contact,
                interest,
                budget,
                timeline,
                trade_in,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                customer_name = excluded.customer_name,
                contact = excluded.contact,
                interest = excluded.interest,
                budget = excluded.budget,
                timeline = excluded.timeline,
                trade_in = excluded.trade_in",
        )
        .bind(&lead.id.0)
        .bind(&lead.business_key.0)
        .bind(lead.fields.customer_name.as_deref())
        .bind(lead.fields.contact.as_deref())
        .bind(&lead.fields.interest)
        .bind(lead.fields.budget.as_deref())
        .bind(lead.fields.timeline.as_deref())
        .bind(lead.fields.trade_in)
        .bind(lead.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn lead_from_row(row: SqliteRow) -> Result<LeadRecord, RepositoryError> {
    Ok(LeadRecord {
        id: LeadId(row.try_get("id")?),
        business_key: IdempotencyKey(row.try_get("business_key")?),
        fields: LeadFields {
            customer_name: row.try_get("customer_name")?,
            contact: row.try_get("contact")?,
            interest: row.try_get("interest")?,
            budget: row.try_get("budget")?,
            timeline: row.try_get("timeline")?,
            trade_in: row.try_get("trade_in")?,
        },
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use autoxloo_core::domain::appointment::{LeadFields, LeadId};
    use autoxloo_core::domain::tool::IdempotencyKey;

    use super::SqlLeadRepository;
    use crate::connect_with_settings;
    use crate::migrations;
    use crate::repositories::{LeadRecord, LeadRepository};

    #[tokio::test]
    async fn sql_lead_repo_round_trip_and_count() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        let repo = SqlLeadRepository::new(pool.clone());

        assert_eq!(repo.count().await.expect("count"), 0);

        let lead = LeadRecord {
            id: LeadId("LEAD-1001".to_string()),
            business_key: IdempotencyKey("create_lead:abc".to_string()),
            fields: LeadFields {
                customer_name: Some("Jordan".to_string()),
                contact: Some("jordan@example.com".to_string()),
                interest: "2024 Toyota RAV4".to_string(),
                budget: Some("$35,000".to_string()),
                timeline: Some("this month".to_string()),
                trade_in: Some(false),
            },
            created_at: DateTime::parse_from_rfc3339("2026-10-15T12:00:00Z")
                .expect("valid rfc3339")
                .with_timezone(&Utc),
        };

        repo.save(lead.clone()).await.expect("save lead");

        assert_eq!(repo.count().await.expect("count"), 1);
        assert_eq!(
            repo.find_by_business_key(&lead.business_key).await.expect("find lead"),
            Some(lead)
        );
        assert!(repo
            .find_by_business_key(&IdempotencyKey("create_lead:other".to_string()))
            .await
            .expect("find missing")
            .is_none());

        pool.close().await;
    }
}
