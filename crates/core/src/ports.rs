//! Contracts for the external collaborators the engine consumes.
//!
//! The engine never talks to a calendar, CRM, mailer, vector store or catalog
//! directly; it goes through these traits so every provider can be swapped
//! (hosted, local SQLite-backed, or a test fake) without touching routing or
//! agent logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::appointment::{
    AppointmentSlot, ConfirmationCode, DeliveryId, HoldId, LeadFields, LeadId, SlotId, TimeWindow,
};
use crate::domain::tool::{IdempotencyKey, ToolFailure, ToolFailureKind};
use crate::domain::vehicle::{StockNumber, VehicleRecord};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("service call timed out")]
    Timeout,
    #[error("request rejected: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ServiceError {
    pub fn failure_kind(&self) -> ToolFailureKind {
        match self {
            Self::Unavailable(_) => ToolFailureKind::Transient,
            Self::Timeout => ToolFailureKind::Timeout,
            Self::Validation(_) => ToolFailureKind::Validation,
            Self::Conflict(_) => ToolFailureKind::Conflict,
        }
    }
}

impl From<ServiceError> for ToolFailure {
    fn from(error: ServiceError) -> Self {
        ToolFailure::new(error.failure_kind(), error.to_string())
    }
}

#[async_trait]
pub trait CalendarService: Send + Sync {
    async fn check_availability(
        &self,
        window: &TimeWindow,
    ) -> Result<Vec<AppointmentSlot>, ServiceError>;

    /// Idempotent per `business_key`: the same key returns the same hold.
    async fn hold_slot(
        &self,
        slot_id: &SlotId,
        stock_number: &StockNumber,
        business_key: &IdempotencyKey,
    ) -> Result<HoldId, ServiceError>;

    async fn confirm_booking(
        &self,
        hold_id: &HoldId,
        business_key: &IdempotencyKey,
    ) -> Result<ConfirmationCode, ServiceError>;
}

#[async_trait]
pub trait CrmService: Send + Sync {
    async fn create_lead(
        &self,
        lead: &LeadFields,
        business_key: &IdempotencyKey,
    ) -> Result<LeadId, ServiceError>;
}

#[async_trait]
pub trait EmailService: Send + Sync {
    async fn send_confirmation(
        &self,
        recipient: &str,
        details: &str,
        business_key: &IdempotencyKey,
    ) -> Result<DeliveryId, ServiceError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: StockNumber,
    /// Smaller is closer.
    pub distance: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn nearest(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Neighbor>, ServiceError>;
}

#[async_trait]
pub trait VehicleCatalog: Send + Sync {
    async fn get(&self, stock_number: &StockNumber) -> Result<Option<VehicleRecord>, ServiceError>;
    async fn all(&self) -> Result<Vec<VehicleRecord>, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::ServiceError;
    use crate::domain::tool::{ToolFailure, ToolFailureKind};

    #[test]
    fn service_errors_map_to_failure_kinds() {
        let transient: ToolFailure = ServiceError::Unavailable("503".to_string()).into();
        assert_eq!(transient.kind, ToolFailureKind::Transient);

        let conflict: ToolFailure = ServiceError::Conflict("slot taken".to_string()).into();
        assert_eq!(conflict.kind, ToolFailureKind::Conflict);
        assert!(conflict.message.contains("slot taken"));

        assert_eq!(ServiceError::Timeout.failure_kind(), ToolFailureKind::Timeout);
        assert_eq!(
            ServiceError::Validation("bad".to_string()).failure_kind(),
            ToolFailureKind::Validation
        );
    }
}
