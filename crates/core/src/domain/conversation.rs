use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::appointment::{AppointmentSlot, ConfirmationCode, HoldId, LeadId};
use crate::domain::routing::AgentKind;
use crate::domain::vehicle::{StockNumber, VehicleCategory};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub stock_number: StockNumber,
    pub slot: AppointmentSlot,
    pub hold_id: HoldId,
    pub confirmation_code: ConfirmationCode,
    /// Business key the hold and confirm ran under.
    pub booking_key: String,
}

/// A single observation an agent wants remembered across turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fact", content = "value", rename_all = "snake_case")]
pub enum Fact {
    Budget(u32),
    Timeline(String),
    TradeIn(bool),
    PreferredCategory(VehicleCategory),
    ShownVehicles(Vec<StockNumber>),
    FocusVehicle(StockNumber),
    Contact(String),
    CustomerName(String),
    ProposedSlots(Vec<AppointmentSlot>),
    Booked(BookingRecord),
    LeadLogged(LeadId),
    AwaitingReply(AgentKind),
}

/// Facts accumulated across turns; distinct from the immutable message log.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScratchContext {
    pub budget: Option<u32>,
    pub timeline: Option<String>,
    pub trade_in: Option<bool>,
    pub preferred_category: Option<VehicleCategory>,
    pub last_shown: Vec<StockNumber>,
    pub focus_vehicle: Option<StockNumber>,
    pub contact: Option<String>,
    pub customer_name: Option<String>,
    pub proposed_slots: Vec<AppointmentSlot>,
    pub bookings: Vec<BookingRecord>,
    pub lead_id: Option<LeadId>,
    /// Agent whose question the next user message most likely answers.
    pub awaiting_reply_from: Option<AgentKind>,
}

impl ScratchContext {
    pub fn apply(&mut self, fact: Fact) {
        match fact {
            Fact::Budget(budget) => self.budget = Some(budget),
            Fact::Timeline(timeline) => self.timeline = Some(timeline),
            Fact::TradeIn(trade_in) => self.trade_in = Some(trade_in),
            Fact::PreferredCategory(category) => self.preferred_category = Some(category),
            Fact::ShownVehicles(stock_numbers) => self.last_shown = stock_numbers,
            Fact::FocusVehicle(stock_number) => self.focus_vehicle = Some(stock_number),
            Fact::Contact(contact) => self.contact = Some(contact),
            Fact::CustomerName(name) => self.customer_name = Some(name),
            Fact::ProposedSlots(slots) => self.proposed_slots = slots,
            Fact::Booked(booking) => {
                self.proposed_slots.clear();
                let known = self
                    .bookings
                    .iter()
                    .any(|existing| existing.confirmation_code == booking.confirmation_code);
                if !known {
                    self.bookings.push(booking);
                }
            }
            Fact::LeadLogged(lead_id) => self.lead_id = Some(lead_id),
            Fact::AwaitingReply(agent) => self.awaiting_reply_from = Some(agent),
        }
    }

    /// Applies one turn's facts. "Awaiting reply" only survives a single turn.
    pub fn apply_turn(&mut self, facts: impl IntoIterator<Item = Fact>) {
        self.awaiting_reply_from = None;
        for fact in facts {
            self.apply(fact);
        }
    }

    pub fn booking_for(
        &self,
        stock_number: &StockNumber,
        slot_start: DateTime<Utc>,
    ) -> Option<&BookingRecord> {
        self.bookings.iter().find(|booking| {
            &booking.stock_number == stock_number && booking.slot.start == slot_start
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    messages: Vec<Message>,
    pub scratch: ScratchContext,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: ConversationId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            messages: Vec::new(),
            scratch: ScratchContext::default(),
            created_at: now,
            last_active_at: now,
        }
    }

    /// Messages are append-only; there is no way to edit or remove one.
    pub fn append(&mut self, role: MessageRole, content: impl Into<String>, now: DateTime<Utc>) {
        self.messages.push(Message { role, content: content.into(), timestamp: now });
        self.last_active_at = now;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Up to `limit` messages preceding the newest one.
    pub fn prior_messages(&self, limit: usize) -> &[Message] {
        let prior = self.messages.len().saturating_sub(1);
        let start = prior.saturating_sub(limit);
        &self.messages[start..prior]
    }

    pub fn has_unanswered_user_message(&self) -> bool {
        matches!(self.messages.last(), Some(message) if message.role == MessageRole::User)
    }

    pub fn user_turns(&self) -> usize {
        self.messages.iter().filter(|message| message.role == MessageRole::User).count()
    }
}
