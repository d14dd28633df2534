use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use autoxloo_core::domain::appointment::{
    ConfirmationCode, DeliveryId, HoldId, LeadFields, LeadId, SlotId, SlotStatus,
};
use autoxloo_core::domain::tool::IdempotencyKey;
use autoxloo_core::domain::vehicle::StockNumber;
use autoxloo_core::ports::ServiceError;

pub mod delivery;
pub mod lead;
pub mod memory;
pub mod reservation;

pub use delivery::SqlDeliveryRepository;
pub use lead::SqlLeadRepository;
pub use memory::{
    InMemoryDeliveryRepository, InMemoryLeadRepository, InMemoryReservationRepository,
};
pub use reservation::SqlReservationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for ServiceError {
    fn from(error: RepositoryError) -> Self {
        ServiceError::Unavailable(error.to_string())
    }
}

/// A held or booked calendar slot. Slots without a row are available.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotReservation {
    pub slot_id: SlotId,
    pub slot_start: DateTime<Utc>,
    pub slot_end: DateTime<Utc>,
    pub stock_number: StockNumber,
    pub hold_id: HoldId,
    pub hold_key: IdempotencyKey,
    pub status: SlotStatus,
    pub confirmation_code: Option<ConfirmationCode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeadRecord {
    pub id: LeadId,
    pub business_key: IdempotencyKey,
    pub fields: LeadFields,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub id: DeliveryId,
    pub business_key: IdempotencyKey,
    pub recipient: String,
    pub details: String,
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn find_by_slot(&self, slot_id: &SlotId)
        -> Result<Option<SlotReservation>, RepositoryError>;

    async fn find_by_hold(&self, hold_id: &HoldId)
        -> Result<Option<SlotReservation>, RepositoryError>;

    async fn find_by_hold_key(
        &self,
        hold_key: &IdempotencyKey,
    ) -> Result<Option<SlotReservation>, RepositoryError>;

    /// Reservations whose slot starts inside `[start, end)`, earliest first.
    async fn list_starting_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SlotReservation>, RepositoryError>;

    /// Upserts by slot id.
    async fn save(&self, reservation: SlotReservation) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find_by_business_key(
        &self,
        business_key: &IdempotencyKey,
    ) -> Result<Option<LeadRecord>, RepositoryError>;

    async fn count(&self) -> Result<u64, RepositoryError>;

    async fn save(&self, lead: LeadRecord) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn find_by_business_key(
        &self,
        business_key: &IdempotencyKey,
    ) -> Result<Option<DeliveryRecord>, RepositoryError>;

    async fn save(&self, delivery: DeliveryRecord) -> Result<(), RepositoryError>;
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
