use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use autoxloo_core::domain::appointment::{HoldId, SlotId};
use autoxloo_core::domain::tool::IdempotencyKey;

use super::{
    DeliveryRecord, DeliveryRepository, LeadRecord, LeadRepository, RepositoryError,
    ReservationRepository, SlotReservation,
};

#[derive(Default)]
pub struct InMemoryReservationRepository {
    reservations: RwLock<HashMap<String, SlotReservation>>,
}

#[async_trait::async_trait]
impl ReservationRepository for InMemoryReservationRepository {
    async fn find_by_slot(
        &self,
        slot_id: &SlotId,
    ) -> Result<Option<SlotReservation>, RepositoryError> {
        let reservations = self.reservations.read().await;
        Ok(reservations.get(&slot_id.0).cloned())
    }

    async fn find_by_hold(
        &self,
        hold_id: &HoldId,
    ) -> Result<Option<SlotReservation>, RepositoryError> {
        let reservations = self.reservations.read().await;
        Ok(reservations.values().find(|reservation| &reservation.hold_id == hold_id).cloned())
    }

    async fn find_by_hold_key(
        &self,
        hold_key: &IdempotencyKey,
    ) -> Result<Option<SlotReservation>, RepositoryError> {
        let reservations = self.reservations.read().await;
        Ok(reservations
            .values()
            .filter(|reservation| &reservation.hold_key == hold_key)
            .max_by_key(|reservation| reservation.updated_at)
            .cloned())
    }

    async fn list_starting_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SlotReservation>, RepositoryError> {
        let reservations = self.reservations.read().await;
        let mut matching: Vec<SlotReservation> = reservations
            .values()
            .filter(|reservation| reservation.slot_start >= start && reservation.slot_start < end)
            .cloned()
            .collect();
        matching.sort_by_key(|reservation| reservation.slot_start);
        Ok(matching)
    }

    async fn save(&self, reservation: SlotReservation) -> Result<(), RepositoryError> {
        let mut reservations = self.reservations.write().await;
        reservations.insert(reservation.slot_id.0.clone(), reservation);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryLeadRepository {
    leads: RwLock<HashMap<String, LeadRecord>>,
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryLeadRepository {
    async fn find_by_business_key(
        &self,
        business_key: &IdempotencyKey,
    ) -> Result<Option<LeadRecord>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads.values().find(|lead| &lead.business_key == business_key).cloned())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.leads.read().await.len() as u64)
    }

    async fn save(&self, lead: LeadRecord) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        leads.insert(lead.id.0.clone(), lead);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDeliveryRepository {
    deliveries: RwLock<HashMap<String, DeliveryRecord>>,
}

impl InMemoryDeliveryRepository {
    pub async fn all(&self) -> Vec<DeliveryRecord> {
        self.deliveries.read().await.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl DeliveryRepository for InMemoryDeliveryRepository {
    async fn find_by_business_key(
        &self,
        business_key: &IdempotencyKey,
    ) -> Result<Option<DeliveryRecord>, RepositoryError> {
        let deliveries = self.deliveries.read().await;
        Ok(deliveries.get(&business_key.0).cloned())
    }

    async fn save(&self, delivery: DeliveryRecord) -> Result<(), RepositoryError> {
        let mut deliveries = self.deliveries.write().await;
        deliveries.entry(delivery.business_key.0.clone()).or_insert(delivery);
        Ok(())
    }
}
