use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use autoxloo_core::domain::appointment::{ConfirmationCode, HoldId, SlotId, SlotStatus};
use autoxloo_core::domain::tool::IdempotencyKey;
use autoxloo_core::domain::vehicle::StockNumber;

use super::{parse_timestamp, RepositoryError, ReservationRepository, SlotReservation};
use crate::DbPool;

const SELECT_RESERVATION: &str = "SELECT
        slot_id,
        slot_start,
        slot_end,
        stock_number,
        hold_id,
        hold_key,
        status,
        confirmation_code,
        created_at,
        updated_at
     FROM slot_reservation";

pub struct SqlReservationRepository {
    pool: DbPool,
}

impl SqlReservationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReservationRepository for SqlReservationRepository {
    async fn find_by_slot(
        &self,
        slot_id: &SlotId,
    ) -> Result<Option<SlotReservation>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_RESERVATION} WHERE slot_id = ?"))
            .bind(&slot_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(reservation_from_row).transpose()
    }

    async fn find_by_hold(
        &self,
        hold_id: &HoldId,
    ) -> Result<Option<SlotReservation>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_RESERVATION} WHERE hold_id = ?"))
            .bind(&hold_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(reservation_from_row).transpose()
    }

    async fn find_by_hold_key(
        &self,
        hold_key: &IdempotencyKey,
    ) -> Result<Option<SlotReservation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_RESERVATION} WHERE hold_key = ? ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(&hold_key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(reservation_from_row).transpose()
    }

    async fn list_starting_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SlotReservation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_RESERVATION} WHERE slot_start >= ? AND slot_start < ? ORDER BY slot_start ASC"
        ))
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(reservation_from_row).collect()
    }

    async fn save(&self, reservation: SlotReservation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO slot_reservation (
                slot_id,
                slot_start,
                slot_end,
                stock_number,
                hold_id,
                hold_key,
                status,
                confirmation_code,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(slot_id) DO UPDATE SET
                slot_start = excluded.slot_start,
                slot_end = excluded.slot_end,
                stock_number = excluded.stock_number,
                hold_id = excluded.hold_id,
                hold_key = excluded.hold_key,
                status = excluded.status,
                confirmation_code = excluded.confirmation_code,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
        )
        .bind(&reservation.slot_id.0)
        .bind(reservation.slot_start.to_rfc3339())
        .bind(reservation.slot_end.to_rfc3339())
        .bind(&reservation.stock_number.0)
        .bind(&reservation.hold_id.0)
        .bind(&reservation.hold_key.0)
        .bind(reservation.status.as_str())
        .bind(reservation.confirmation_code.as_ref().map(|code| code.0.as_str()))
        .bind(reservation.created_at.to_rfc3339())
        .bind(reservation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn reservation_from_row(row: SqliteRow) -> Result<SlotReservation, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = SlotStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown reservation status `{status_raw}`"))
    })?;

    Ok(SlotReservation {
        slot_id: SlotId(row.try_get("slot_id")?),
        slot_start: parse_timestamp("slot_start", row.try_get("slot_start")?)?,
        slot_end: parse_timestamp("slot_end", row.try_get("slot_end")?)?,
        stock_number: StockNumber(row.try_get("stock_number")?),
        hold_id: HoldId(row.try_get("hold_id")?),
        hold_key: IdempotencyKey(row.try_get("hold_key")?),
        status,
        confirmation_code: row
            .try_get::<Option<String>, _>("confirmation_code")?
            .map(ConfirmationCode),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use autoxloo_core::domain::appointment::{ConfirmationCode, HoldId, SlotId, SlotStatus};
    use autoxloo_core::domain::tool::IdempotencyKey;
    use autoxloo_core::domain::vehicle::StockNumber;

    use super::SqlReservationRepository;
    use crate::migrations;
    use crate::repositories::{ReservationRepository, SlotReservation};
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn sql_reservation_repo_round_trip_and_upsert() {
        let pool = setup_pool().await;
        let repo = SqlReservationRepository::new(pool.clone());
        let reservation = sample_reservation("2026-10-17T10:00:00Z");

        repo.save(reservation.clone()).await.expect("save reservation");
        assert_eq!(
            repo.find_by_slot(&reservation.slot_id).await.expect("find by slot"),
            Some(reservation.clone())
        );
        assert_eq!(
            repo.find_by_hold(&reservation.hold_id).await.expect("find by hold"),
            Some(reservation.clone())
        );
        assert_eq!(
            repo.find_by_hold_key(&reservation.hold_key).await.expect("find by hold key"),
            Some(reservation.clone())
        );

        let mut booked = reservation.clone();
        booked.status = SlotStatus::Booked;
        booked.confirmation_code = Some(ConfirmationCode("TD-1A2B3C4D".to_string()));
        booked.updated_at = reservation.updated_at + Duration::minutes(1);
        repo.save(booked.clone()).await.expect("update reservation");

        assert_eq!(repo.find_by_slot(&booked.slot_id).await.expect("find booked"), Some(booked));

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_reservation_repo_lists_by_start_window() {
        let pool = setup_pool().await;
        let repo = SqlReservationRepository::new(pool.clone());

        for start in ["2026-10-17T09:00:00Z", "2026-10-17T13:00:00Z", "2026-10-19T09:00:00Z"] {
            repo.save(sample_reservation(start)).await.expect("save reservation");
        }

        let (start, end) = (parse_ts("2026-10-17T00:00:00Z"), parse_ts("2026-10-18T00:00:00Z"));
        let saturday = repo.list_starting_between(start, end).await.expect("list reservations");

        let slots: Vec<_> =
            saturday.iter().map(|reservation| reservation.slot_id.0.as_str()).collect();
        assert_eq!(slots, vec!["SLOT-202610170900", "SLOT-202610171300"]);

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_reservation(start: &str) -> SlotReservation {
        let slot_start = parse_ts(start);
        let slot_id = SlotId::for_start(slot_start);
        SlotReservation {
            hold_id: HoldId(format!("HOLD-{}", slot_id.0)),
            hold_key: IdempotencyKey(format!("hold_slot:{}", slot_id.0)),
            slot_id,
            slot_start,
            slot_end: slot_start + Duration::hours(1),
            stock_number: StockNumber("AX10000".to_string()),
            status: SlotStatus::Held,
            confirmation_code: None,
            created_at: parse_ts("2026-10-15T12:00:00Z"),
            updated_at: parse_ts("2026-10-15T12:00:00Z"),
        }
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
