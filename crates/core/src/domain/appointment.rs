use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

const SLOT_ID_PREFIX: &str = "SLOT-";
const SLOT_ID_FORMAT: &str = "%Y%m%d%H%M";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub String);

impl SlotId {
    /// Slot ids are derived from the start time: `SLOT-202610171000`.
    pub fn for_start(start: DateTime<Utc>) -> Self {
        Self(format!("{SLOT_ID_PREFIX}{}", start.format(SLOT_ID_FORMAT)))
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        let raw = self.0.strip_prefix(SLOT_ID_PREFIX)?;
        NaiveDateTime::parse_from_str(raw, SLOT_ID_FORMAT).ok().map(|naive| naive.and_utc())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmationCode(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Held,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Held => "held",
            Self::Booked => "booked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "available" => Some(Self::Available),
            "held" => Some(Self::Held),
            "booked" => Some(Self::Booked),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentSlot {
    pub id: SlotId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: SlotStatus,
}

impl AppointmentSlot {
    pub fn is_available(&self) -> bool {
        self.status == SlotStatus::Available
    }

    /// "Saturday Oct 17, 10:00 AM"
    pub fn label(&self) -> String {
        self.start.format("%A %b %-d, %-I:%M %p").to_string()
    }
}

/// Half-open `[start, end)` range handed to the calendar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Qualification summary passed to the CRM.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadFields {
    pub customer_name: Option<String>,
    pub contact: Option<String>,
    pub interest: String,
    pub budget: Option<String>,
    pub timeline: Option<String>,
    pub trade_in: Option<bool>,
}
