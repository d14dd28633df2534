use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::domain::appointment::{
    AppointmentSlot, ConfirmationCode, DeliveryId, HoldId, LeadFields, LeadId, SlotId, TimeWindow,
};
use crate::domain::conversation::ConversationId;
use crate::domain::vehicle::StockNumber;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    CheckAvailability,
    HoldSlot,
    ConfirmBooking,
    CreateLead,
    SendConfirmation,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckAvailability => "check_availability",
            Self::HoldSlot => "hold_slot",
            Self::ConfirmBooking => "confirm_booking",
            Self::CreateLead => "create_lead",
            Self::SendConfirmation => "send_confirmation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "check_availability" => Some(Self::CheckAvailability),
            "hold_slot" => Some(Self::HoldSlot),
            "confirm_booking" => Some(Self::ConfirmBooking),
            "create_lead" => Some(Self::CreateLead),
            "send_confirmation" => Some(Self::SendConfirmation),
            _ => None,
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool request with its strongly-typed arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolInvocation {
    CheckAvailability { window: TimeWindow },
    HoldSlot { slot_id: SlotId, stock_number: StockNumber },
    ConfirmBooking { hold_id: HoldId },
    CreateLead { lead: LeadFields },
    SendConfirmation { recipient: String, details: String },
}

impl ToolInvocation {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::CheckAvailability { .. } => ToolKind::CheckAvailability,
            Self::HoldSlot { .. } => ToolKind::HoldSlot,
            Self::ConfirmBooking { .. } => ToolKind::ConfirmBooking,
            Self::CreateLead { .. } => ToolKind::CreateLead,
            Self::SendConfirmation { .. } => ToolKind::SendConfirmation,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "output", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    Slots(Vec<AppointmentSlot>),
    Hold(HoldId),
    Booking(ConfirmationCode),
    Lead(LeadId),
    Delivery(DeliveryId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// Unavailable or 5xx-equivalent; retried.
    Transient,
    /// The per-call deadline elapsed; retried.
    Timeout,
    /// Rejected arguments; never retried.
    Validation,
    /// The external state disagrees (slot taken, hold expired); never retried.
    Conflict,
}

impl ToolFailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{} failure: {message}", .kind.as_str())]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
}

impl ToolFailure {
    pub fn new(kind: ToolFailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

pub type ToolResult = Result<ToolOutput, ToolFailure>;

/// Deterministic key guarding at-most-once tool effects.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn derive(conversation_id: &ConversationId, tool: ToolKind, business_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(conversation_id.0.as_bytes());
        hasher.update([0x1f]);
        hasher.update(tool.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(business_key.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(format!("{}:{}", tool.as_str(), &digest[..32]))
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: ToolKind,
    pub input: ToolInvocation,
    pub idempotency_key: IdempotencyKey,
    pub result: ToolResult,
    pub attempts: u32,
    /// Served from the idempotency cache without touching the service.
    pub replayed: bool,
}

impl ToolCall {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn output(&self) -> Option<&ToolOutput> {
        self.result.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&ToolFailure> {
        self.result.as_ref().err()
    }

    pub fn action_record(&self) -> ActionRecord {
        let mut details = json!({
            "status": if self.succeeded() { "succeeded" } else { "failed" },
            "attempts": self.attempts,
            "replayed": self.replayed,
            "idempotency_key": self.idempotency_key.0,
        });

        if let Value::Object(map) = &mut details {
            match &self.input {
                ToolInvocation::CheckAvailability { window } => {
                    map.insert("window_start".to_string(), json!(window.start));
                    map.insert("window_end".to_string(), json!(window.end));
                }
                ToolInvocation::HoldSlot { slot_id, stock_number } => {
                    map.insert("slot_id".to_string(), json!(slot_id.0));
                    map.insert("stock_number".to_string(), json!(stock_number.0));
                }
                ToolInvocation::ConfirmBooking { hold_id } => {
                    map.insert("hold_id".to_string(), json!(hold_id.0));
                }
                ToolInvocation::CreateLead { lead } => {
                    map.insert("interest".to_string(), json!(lead.interest));
                }
                ToolInvocation::SendConfirmation { recipient, .. } => {
                    map.insert("recipient".to_string(), json!(recipient));
                }
            }

            match &self.result {
                Ok(ToolOutput::Slots(slots)) => {
                    let open = slots.iter().filter(|slot| slot.is_available()).count();
                    map.insert("available_slots".to_string(), json!(open));
                }
                Ok(ToolOutput::Hold(hold_id)) => {
                    map.insert("hold_id".to_string(), json!(hold_id.0));
                }
                Ok(ToolOutput::Booking(code)) => {
                    map.insert("confirmation_code".to_string(), json!(code.0));
                }
                Ok(ToolOutput::Lead(lead_id)) => {
                    map.insert("lead_id".to_string(), json!(lead_id.0));
                }
                Ok(ToolOutput::Delivery(delivery_id)) => {
                    map.insert("delivery_id".to_string(), json!(delivery_id.0));
                }
                Err(failure) => {
                    map.insert("failure_kind".to_string(), json!(failure.kind.as_str()));
                    map.insert("error".to_string(), json!(failure.message));
                }
            }
        }

        ActionRecord { kind: self.tool.as_str().to_string(), details }
    }
}

/// UI-facing `{type, details}` entry for one tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub details: Value,
}
