use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use autoxloo_core::domain::appointment::DeliveryId;
use autoxloo_core::domain::tool::IdempotencyKey;
use autoxloo_core::ports::{EmailService, ServiceError};
use autoxloo_core::Clock;

use super::short_reference;
use crate::repositories::{DeliveryRecord, DeliveryRepository};

/// Records confirmation emails in the delivery log instead of relaying them.
pub struct LocalEmail {
    deliveries: Arc<dyn DeliveryRepository>,
    clock: Arc<dyn Clock>,
}

impl LocalEmail {
    pub fn new(deliveries: Arc<dyn DeliveryRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { deliveries, clock }
    }
}

fn is_plausible_address(recipient: &str) -> bool {
    match recipient.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !recipient.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[async_trait]
impl EmailService for LocalEmail {
    async fn send_confirmation(
        &self,
        recipient: &str,
        details: &str,
        business_key: &IdempotencyKey,
    ) -> Result<DeliveryId, ServiceError> {
        let recipient = recipient.trim();
        if !is_plausible_address(recipient) {
            return Err(ServiceError::Validation(format!(
                "`{recipient}` is not a valid email address"
            )));
        }

        if let Some(existing) = self.deliveries.find_by_business_key(business_key).await? {
            return Ok(existing.id);
        }

        let id = DeliveryId(short_reference("MSG"));
        self.deliveries
            .save(DeliveryRecord {
                id: id.clone(),
                business_key: business_key.clone(),
                recipient: recipient.to_string(),
                details: details.to_string(),
                sent_at: self.clock.now(),
            })
            .await?;

        info!(
            event_name = "email.confirmation_sent",
            delivery_id = %id.0,
            recipient = %recipient,
            "confirmation email recorded"
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use autoxloo_core::domain::tool::IdempotencyKey;
    use autoxloo_core::ports::{EmailService, ServiceError};
    use autoxloo_core::FixedClock;

    use super::{is_plausible_address, LocalEmail};
    use crate::repositories::{DeliveryRepository, InMemoryDeliveryRepository};

    fn email(repo: &Arc<InMemoryDeliveryRepository>) -> LocalEmail {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).single().expect("valid time");
        let deliveries: Arc<dyn DeliveryRepository> = repo.clone();
        LocalEmail::new(deliveries, Arc::new(FixedClock(now)))
    }

    #[test]
    fn address_check_requires_local_part_and_domain() {
        assert!(is_plausible_address("jordan@example.com"));
        assert!(!is_plausible_address("jordan"));
        assert!(!is_plausible_address("@example.com"));
        assert!(!is_plausible_address("jordan@localhost"));
        assert!(!is_plausible_address("jor dan@example.com"));
    }

    #[tokio::test]
    async fn delivery_is_recorded_once_per_key() {
        let repo = Arc::new(InMemoryDeliveryRepository::default());
        let email = email(&repo);
        let key = IdempotencyKey("confirm:a".to_string());

        let first = email
            .send_confirmation("jordan@example.com", "Test drive TD-1A2B3C4D", &key)
            .await
            .expect("send");
        let replay = email
            .send_confirmation("jordan@example.com", "Test drive TD-1A2B3C4D", &key)
            .await
            .expect("resend");

        assert_eq!(first, replay);
        assert!(first.0.starts_with("MSG-"));
        assert_eq!(repo.all().await.len(), 1);
    }

    #[tokio::test]
    async fn malformed_recipient_is_rejected() {
        let repo = Arc::new(InMemoryDeliveryRepository::default());
        let result = email(&repo)
            .send_confirmation("not-an-email", "details", &IdempotencyKey("k".to_string()))
            .await;

        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert!(repo.all().await.is_empty());
    }
}
