//! Local collaborators backed by the repositories in this crate.
//!
//! These implement the calendar, CRM and email ports for a single dealership
//! running without hosted providers. Every write is idempotent per business
//! key so the tool executor can retry safely.

use uuid::Uuid;

pub mod calendar;
pub mod crm;
pub mod email;

pub use calendar::{DealershipHours, LocalCalendar};
pub use crm::LocalCrm;
pub use email::LocalEmail;

/// `PREFIX-` followed by eight uppercase hex characters.
pub(crate) fn short_reference(prefix: &str) -> String {
    let simple = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
    format!("{prefix}-{}", &simple[..8])
}
