use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use autoxloo_core::domain::appointment::{LeadFields, LeadId};
use autoxloo_core::domain::tool::IdempotencyKey;
use autoxloo_core::ports::{CrmService, ServiceError};
use autoxloo_core::Clock;

use crate::repositories::{LeadRecord, LeadRepository};

const LEAD_NUMBER_OFFSET: u64 = 1001;

/// Lead intake that numbers leads sequentially: `LEAD-1001`, `LEAD-1002`, ...
pub struct LocalCrm {
    leads: Arc<dyn LeadRepository>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl LocalCrm {
    pub fn new(leads: Arc<dyn LeadRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { leads, clock, write_lock: Mutex::new(()) }
    }
}

#[async_trait]
impl CrmService for LocalCrm {
    async fn create_lead(
        &self,
        lead: &LeadFields,
        business_key: &IdempotencyKey,
    ) -> Result<LeadId, ServiceError> {
        if lead.interest.trim().is_empty() {
            return Err(ServiceError::Validation("lead interest is required".to_string()));
        }

        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.leads.find_by_business_key(business_key).await? {
            return Ok(existing.id);
        }

        let id = LeadId(format!("LEAD-{}", self.leads.count().await? + LEAD_NUMBER_OFFSET));
        self.leads
            .save(LeadRecord {
                id: id.clone(),
                business_key: business_key.clone(),
                fields: lead.clone(),
                created_at: self.clock.now(),
            })
            .await?;

        info!(
            event_name = "crm.lead_created",
            lead_id = %id.0,
            interest = %lead.interest,
            has_contact = lead.contact.is_some(),
            "lead created"
        );
        Ok(id)
    }
}
