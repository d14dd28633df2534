use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use tokio::sync::Mutex;
use tracing::info;

use autoxloo_core::domain::appointment::{
    AppointmentSlot, ConfirmationCode, HoldId, SlotId, SlotStatus, TimeWindow,
};
use autoxloo_core::domain::tool::IdempotencyKey;
use autoxloo_core::domain::vehicle::StockNumber;
use autoxloo_core::ports::{CalendarService, ServiceError};
use autoxloo_core::Clock;

use super::short_reference;
use crate::repositories::{ReservationRepository, SlotReservation};

/// Opening days and hourly slot grid for the showroom. Times are dealership
/// wall-clock values carried in `Utc`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DealershipHours {
    pub open_days: Vec<Weekday>,
    pub first_slot_hour: u32,
    pub last_slot_hour: u32,
    pub slot_length: Duration,
    pub hold_ttl: Duration,
    pub max_window: Duration,
}

impl Default for DealershipHours {
    fn default() -> Self {
        Self {
            open_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
            ],
            first_slot_hour: 9,
            last_slot_hour: 17,
            slot_length: Duration::hours(1),
            hold_ttl: Duration::minutes(15),
            max_window: Duration::days(31),
        }
    }
}

impl DealershipHours {
    pub fn is_open_on(&self, day: Weekday) -> bool {
        self.open_days.contains(&day)
    }

    pub fn is_slot_start(&self, start: DateTime<Utc>) -> bool {
        self.is_open_on(start.weekday())
            && (self.first_slot_hour..=self.last_slot_hour).contains(&start.hour())
            && start.minute() == 0
            && start.second() == 0
            && start.nanosecond() == 0
    }

    /// Every slot start inside `window`, earliest first.
    pub fn slot_starts(&self, window: &TimeWindow) -> Vec<DateTime<Utc>> {
        let mut starts = Vec::new();
        let mut day = window.start.date_naive();
        let last_day = window.end.date_naive();

        while day <= last_day {
            if self.is_open_on(day.weekday()) {
                for hour in self.first_slot_hour..=self.last_slot_hour {
                    if let Some(naive) = day.and_hms_opt(hour, 0, 0) {
                        let start = naive.and_utc();
                        if window.contains(start) {
                            starts.push(start);
                        }
                    }
                }
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        starts
    }
}

/// Calendar backed by the slot reservation repository. A slot with no row, or
/// whose hold has lapsed, is available.
pub struct LocalCalendar {
    reservations: Arc<dyn ReservationRepository>,
    clock: Arc<dyn Clock>,
    hours: DealershipHours,
    write_lock: Mutex<()>,
}

impl LocalCalendar {
    pub fn new(reservations: Arc<dyn ReservationRepository>, clock: Arc<dyn Clock>) -> Self {
        Self::with_hours(reservations, clock, DealershipHours::default())
    }

    pub fn with_hours(
        reservations: Arc<dyn ReservationRepository>,
        clock: Arc<dyn Clock>,
        hours: DealershipHours,
    ) -> Self {
        Self { reservations, clock, hours, write_lock: Mutex::new(()) }
    }

    pub fn hours(&self) -> &DealershipHours {
        &self.hours
    }

    fn effective_status(&self, reservation: &SlotReservation, now: DateTime<Utc>) -> SlotStatus {
        match reservation.status {
            SlotStatus::Booked => SlotStatus::Booked,
            SlotStatus::Held if reservation.updated_at + self.hours.hold_ttl > now => {
                SlotStatus::Held
            }
            _ => SlotStatus::Available,
        }
    }
}

#[async_trait]
impl CalendarService for LocalCalendar {
    async fn check_availability(
        &self,
        window: &TimeWindow,
    ) -> Result<Vec<AppointmentSlot>, ServiceError> {
        if window.is_empty() {
            return Err(ServiceError::Validation("availability window is empty".to_string()));
        }
        if window.end - window.start > self.hours.max_window {
            return Err(ServiceError::Validation(format!(
                "availability window exceeds {} days",
                self.hours.max_window.num_days()
            )));
        }

        let now = self.clock.now();
        let reservations =
            self.reservations.list_starting_between(window.start, window.end).await?;
        let by_slot: HashMap<&str, &SlotReservation> = reservations
            .iter()
            .map(|reservation| (reservation.slot_id.0.as_str(), reservation))
            .collect();

        let slots = self
            .hours
            .slot_starts(window)
            .into_iter()
            .filter(|start| *start >= now)
            .map(|start| {
                let id = SlotId::for_start(start);
                let status = by_slot
                    .get(id.0.as_str())
                    .map(|reservation| self.effective_status(reservation, now))
                    .unwrap_or(SlotStatus::Available);
                AppointmentSlot { id, start, end: start + self.hours.slot_length, status }
            })
            .collect();

        Ok(slots)
    }

    async fn hold_slot(
        &self,
        slot_id: &SlotId,
        stock_number: &StockNumber,
        business_key: &IdempotencyKey,
    ) -> Result<HoldId, ServiceError> {
        let start = slot_id
            .start()
            .filter(|start| self.hours.is_slot_start(*start))
            .ok_or_else(|| ServiceError::Validation(format!("unknown slot `{}`", slot_id.0)))?;
        let now = self.clock.now();
        if start < now {
            return Err(ServiceError::Validation(format!("slot `{}` is in the past", slot_id.0)));
        }

        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.reservations.find_by_hold_key(business_key).await? {
            if existing.slot_id == *slot_id
                && self.effective_status(&existing, now) != SlotStatus::Available
            {
                return Ok(existing.hold_id);
            }
        }

        if let Some(current) = self.reservations.find_by_slot(slot_id).await? {
            let status = self.effective_status(&current, now);
            if status != SlotStatus::Available {
                return Err(ServiceError::Conflict(format!(
                    "slot `{}` is already {}",
                    slot_id.0,
                    status.as_str()
                )));
            }
        }

        let hold_id = HoldId(short_reference("HOLD"));
        self.reservations
            .save(SlotReservation {
                slot_id: slot_id.clone(),
                slot_start: start,
                slot_end: start + self.hours.slot_length,
                stock_number: stock_number.clone(),
                hold_id: hold_id.clone(),
                hold_key: business_key.clone(),
                status: SlotStatus::Held,
                confirmation_code: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!(
            event_name = "calendar.slot_held",
            slot_id = %slot_id.0,
            hold_id = %hold_id.0,
            stock_number = %stock_number.0,
            "slot held"
        );
        Ok(hold_id)
    }

    async fn confirm_booking(
        &self,
        hold_id: &HoldId,
        business_key: &IdempotencyKey,
    ) -> Result<ConfirmationCode, ServiceError> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();

        let Some(mut reservation) = self.reservations.find_by_hold(hold_id).await? else {
            return Err(ServiceError::Validation(format!("unknown hold `{}`", hold_id.0)));
        };

        if reservation.status == SlotStatus::Booked {
            return reservation.confirmation_code.ok_or_else(|| {
                ServiceError::Unavailable(format!(
                    "booking for hold `{}` has no confirmation code",
                    hold_id.0
                ))
            });
        }
        if self.effective_status(&reservation, now) == SlotStatus::Available {
            return Err(ServiceError::Conflict(format!("hold `{}` has expired", hold_id.0)));
        }

        let code = ConfirmationCode(short_reference("TD"));
        reservation.status = SlotStatus::Booked;
        reservation.confirmation_code = Some(code.clone());
        reservation.updated_at = now;
        let slot_id = reservation.slot_id.clone();
        self.reservations.save(reservation).await?;

        info!(
            event_name = "calendar.booking_confirmed",
            slot_id = %slot_id.0,
            hold_id = %hold_id.0,
            confirmation_code = %code.0,
            business_key = %business_key.0,
            "booking confirmed"
        );
        Ok(code)
    }
}
