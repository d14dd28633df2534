use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::info;

use autoxloo_core::domain::appointment::{
    AppointmentSlot, ConfirmationCode, HoldId, SlotStatus, TimeWindow,
};
use autoxloo_core::domain::conversation::{BookingRecord, Fact};
use autoxloo_core::domain::routing::AgentKind;
use autoxloo_core::domain::tool::{
    IdempotencyKey, ToolCall, ToolFailureKind, ToolInvocation, ToolKind, ToolOutput,
};
use autoxloo_core::domain::vehicle::{StockNumber, VehicleRecord};
use autoxloo_core::executor::ToolExecutor;
use autoxloo_core::ports::VehicleCatalog;

use super::{Agent, AgentError, AgentResult, TurnContext};
use crate::extraction::{PartOfDay, TimeReference};
use crate::llm::NarrativePolisher;

pub const DEALERSHIP_LOCATION: &str = "AutoXloo Premium Dealership, 123 Main Street";

const ALTERNATIVES: usize = 3;
/// Days of calendar searched from the requested day.
const SEARCH_DAYS: i64 = 3;
const OPENING_HOUR: u32 = 9;

const WHICH_VEHICLE_QUESTION: &str = "Which vehicle would you like to test drive? Share a stock \
                                      number or tell me what you're looking for.";
const WHEN_QUESTION: &str =
    "When would you like to come in? We're open Monday to Saturday, 9 AM to 6 PM.";
const CALENDAR_DOWN: &str = "I couldn't reach our scheduling system just now, so nothing has \
                             been booked. Please try again in a moment.";

pub struct SchedulerAgent {
    executor: ToolExecutor,
    catalog: Arc<dyn VehicleCatalog>,
    polisher: NarrativePolisher,
}

/// Outcome of one hold-then-confirm pass.
enum Attempt {
    Booked { hold_id: HoldId, code: ConfirmationCode },
    /// A hold recorded on an earlier turn lapsed before it was confirmed.
    LapsedHold,
    Conflict,
    Failed,
}

enum VehicleResolution {
    Found(VehicleRecord),
    UnknownStock(StockNumber),
    Missing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Exact(DateTime<Utc>),
    Day { date: NaiveDate, part: Option<PartOfDay> },
}

impl Target {
    fn date(&self) -> NaiveDate {
        match self {
            Self::Exact(start) => start.date_naive(),
            Self::Day { date, .. } => *date,
        }
    }

    /// Instant alternatives are measured against.
    fn anchor(&self) -> DateTime<Utc> {
        match self {
            Self::Exact(start) => *start,
            Self::Day { date, part } => {
                let hour = part.map(|part| part.hours().0).unwrap_or(OPENING_HOUR);
                date.and_hms_opt(hour, 0, 0).unwrap_or_default().and_utc()
            }
        }
    }

    fn part(&self) -> Option<PartOfDay> {
        match self {
            Self::Exact(_) => None,
            Self::Day { part, .. } => *part,
        }
    }
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format("%A %b %-d, %-I:%M %p").to_string()
}

/// "option 1 (Saturday Oct 17, 9:00 AM), option 2 (...) or option 3 (...)"
fn options_phrase(slots: &[AppointmentSlot]) -> String {
    let options: Vec<String> = slots
        .iter()
        .enumerate()
        .map(|(index, slot)| format!("option {} ({})", index + 1, slot.label()))
        .collect();
    match options.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} or {last}", rest.join(", ")),
        Some((last, _)) => last.clone(),
        None => String::new(),
    }
}

fn resolve_target(context: &TurnContext<'_>) -> Option<Target> {
    let signals = context.signals;
    let scratch = context.scratch;

    if let Some(choice) = signals.option_choice {
        let proposed = choice.checked_sub(1).and_then(|index| scratch.proposed_slots.get(index));
        if let Some(slot) = proposed {
            return Some(Target::Exact(slot.start));
        }
    }

    let today = context.now.date_naive();
    let day = signals.day.map(|day| day.resolve(today));
    match (day, signals.time) {
        (None, None) => None,
        (day, Some(TimeReference::At(time))) => {
            let mut start = day.unwrap_or(today).and_time(time).and_utc();
            if day.is_none() && start <= context.now {
                start += Duration::days(1);
            }
            Some(Target::Exact(start))
        }
        (day, Some(TimeReference::Part(part))) => {
            Some(Target::Day { date: day.unwrap_or(today), part: Some(part) })
        }
        (Some(date), None) => Some(Target::Day { date, part: None }),
    }
}

impl SchedulerAgent {
    pub fn new(
        executor: ToolExecutor,
        catalog: Arc<dyn VehicleCatalog>,
        polisher: NarrativePolisher,
    ) -> Self {
        Self { executor, catalog, polisher }
    }

    /// Stock number in the message, then this turn's top research pick, then
    /// the vehicle the conversation last focused on.
    async fn resolve_vehicle(
        &self,
        context: &TurnContext<'_>,
    ) -> Result<VehicleResolution, AgentError> {
        let collaborator =
            |source| AgentError::Collaborator { agent: AgentKind::Scheduler, source };

        if let Some(stock_number) = &context.signals.stock_number {
            return Ok(match self.catalog.get(stock_number).await.map_err(collaborator)? {
                Some(vehicle) => VehicleResolution::Found(vehicle),
                None => VehicleResolution::UnknownStock(stock_number.clone()),
            });
        }

        if let Some(vehicle) = context
            .prior_result(AgentKind::Research)
            .and_then(|result| result.vehicles.first())
        {
            return Ok(VehicleResolution::Found(vehicle.clone()));
        }

        if let Some(stock_number) = &context.scratch.focus_vehicle {
            if let Some(vehicle) = self.catalog.get(stock_number).await.map_err(collaborator)? {
                return Ok(VehicleResolution::Found(vehicle));
            }
        }

        Ok(VehicleResolution::Missing)
    }

    fn key(context: &TurnContext<'_>, tool: ToolKind, business_key: &str) -> IdempotencyKey {
        IdempotencyKey::derive(context.conversation_id, tool, business_key)
    }

    fn booking_key(stock_number: &StockNumber, slot: &AppointmentSlot) -> String {
        format!("{}|{}", stock_number, slot.id.0)
    }

    fn confirmation_sentence(vehicle: &VehicleRecord, booking: &BookingRecord) -> String {
        format!(
            "Your test drive of the {} is confirmed for {} at {} (confirmation code {}).",
            vehicle.display_name(),
            booking.slot.label(),
            DEALERSHIP_LOCATION,
            booking.confirmation_code.0
        )
    }

    /// Re-issues hold and confirm under the original keys; the executor
    /// answers from its idempotency cache without a new booking.
    async fn replay_booking(
        &self,
        context: &TurnContext<'_>,
        vehicle: &VehicleRecord,
        mut booking: BookingRecord,
        mut facts: Vec<Fact>,
    ) -> AgentResult {
        let business_key = booking.booking_key.clone();
        let hold = self
            .executor
            .invoke(
                ToolInvocation::HoldSlot {
                    slot_id: booking.slot.id.clone(),
                    stock_number: vehicle.stock_number.clone(),
                },
                Self::key(context, ToolKind::HoldSlot, &business_key),
            )
            .await;
        let confirm = self
            .executor
            .invoke(
                ToolInvocation::ConfirmBooking { hold_id: booking.hold_id.clone() },
                Self::key(context, ToolKind::ConfirmBooking, &business_key),
            )
            .await;
        if let Some(ToolOutput::Booking(code)) = confirm.output() {
            booking.confirmation_code = code.clone();
        }

        let narrative = format!(
            "You're already booked. {}",
            Self::confirmation_sentence(vehicle, &booking)
        );
        facts.push(Fact::Booked(booking));

        let mut result = AgentResult::new(AgentKind::Scheduler, narrative);
        result.vehicles.push(vehicle.clone());
        result.tool_calls = vec![hold, confirm];
        result.facts = facts;
        result.complete = true;
        result
    }

    async fn attempt_booking(
        &self,
        context: &TurnContext<'_>,
        vehicle: &VehicleRecord,
        slot: &AppointmentSlot,
        business_key: &str,
        tool_calls: &mut Vec<ToolCall>,
    ) -> Attempt {
        let is_conflict =
            |call: &ToolCall| call.failure().is_some_and(|f| f.kind == ToolFailureKind::Conflict);

        let hold = self
            .executor
            .invoke(
                ToolInvocation::HoldSlot {
                    slot_id: slot.id.clone(),
                    stock_number: vehicle.stock_number.clone(),
                },
                Self::key(context, ToolKind::HoldSlot, business_key),
            )
            .await;
        let hold_id = match hold.output() {
            Some(ToolOutput::Hold(hold_id)) => hold_id.clone(),
            _ => {
                let conflict = is_conflict(&hold);
                tool_calls.push(hold);
                return if conflict { Attempt::Conflict } else { Attempt::Failed };
            }
        };
        let hold_replayed = hold.replayed;
        tool_calls.push(hold);

        let confirm = self
            .executor
            .invoke(
                ToolInvocation::ConfirmBooking { hold_id: hold_id.clone() },
                Self::key(context, ToolKind::ConfirmBooking, business_key),
            )
            .await;
        let attempt = match confirm.output() {
            Some(ToolOutput::Booking(code)) => Attempt::Booked { hold_id, code: code.clone() },
            _ if is_conflict(&confirm) && hold_replayed => Attempt::LapsedHold,
            _ if is_conflict(&confirm) => Attempt::Conflict,
            _ => Attempt::Failed,
        };
        tool_calls.push(confirm);
        attempt
    }

    #[allow(clippy::too_many_arguments)]
    async fn book(
        &self,
        context: &TurnContext<'_>,
        vehicle: &VehicleRecord,
        slot: AppointmentSlot,
        target: Target,
        slots: &[AppointmentSlot],
        mut tool_calls: Vec<ToolCall>,
        mut facts: Vec<Fact>,
    ) -> AgentResult {
        let mut business_key = Self::booking_key(&vehicle.stock_number, &slot);
        let mut attempt =
            self.attempt_booking(context, vehicle, &slot, &business_key, &mut tool_calls).await;

        // The cached hold from an earlier turn is gone; take a fresh one once.
        if matches!(attempt, Attempt::LapsedHold) {
            info!(
                event_name = "scheduler.hold_lapsed",
                conversation_id = %context.conversation_id,
                slot_id = %slot.id.0,
                "recorded hold lapsed before confirmation, holding again"
            );
            business_key = format!("{business_key}|turn-{}", context.turn);
            attempt =
                self.attempt_booking(context, vehicle, &slot, &business_key, &mut tool_calls).await;
        }

        let (hold_id, confirmation_code) = match attempt {
            Attempt::Booked { hold_id, code } => (hold_id, code),
            Attempt::Failed => {
                return self.after_failed_booking(
                    context, vehicle, target, slots, slot, false, tool_calls, facts,
                );
            }
            Attempt::Conflict | Attempt::LapsedHold => {
                return self.after_failed_booking(
                    context, vehicle, target, slots, slot, true, tool_calls, facts,
                );
            }
        };

        let booking = BookingRecord {
            stock_number: vehicle.stock_number.clone(),
            slot: AppointmentSlot { status: SlotStatus::Booked, ..slot },
            hold_id,
            confirmation_code,
            booking_key: business_key,
        };
        let mut narrative = Self::confirmation_sentence(vehicle, &booking);

        let recipient =
            context.signals.email.clone().or_else(|| context.scratch.contact.clone());
        match recipient {
            Some(recipient) => {
                let details = format!(
                    "Test drive of the {} on {} at {}. Confirmation code {}.",
                    vehicle.display_name(),
                    booking.slot.label(),
                    DEALERSHIP_LOCATION,
                    booking.confirmation_code.0
                );
                let email = self
                    .executor
                    .invoke(
                        ToolInvocation::SendConfirmation { recipient: recipient.clone(), details },
                        Self::key(
                            context,
                            ToolKind::SendConfirmation,
                            &format!("{}|{recipient}", booking.confirmation_code.0),
                        ),
                    )
                    .await;
                if email.succeeded() {
                    narrative
                        .push_str(&format!(" A confirmation email is on its way to {recipient}."));
                } else {
                    narrative.push_str(
                        " I couldn't send the confirmation email, but your booking is confirmed.",
                    );
                }
                tool_calls.push(email);
            }
            None => narrative
                .push_str(" Share an email address if you'd like the confirmation sent to you."),
        }

        facts.push(Fact::Booked(booking));

        let mut result =
            AgentResult::new(AgentKind::Scheduler, self.polisher.polish(narrative).await);
        result.vehicles.push(vehicle.clone());
        result.tool_calls = tool_calls;
        result.facts = facts;
        result.complete = true;
        result
    }

    /// A conflicting hold or confirm means someone else got the slot first:
    /// offer the next-best times instead. Anything else is an outage.
    #[allow(clippy::too_many_arguments)]
    fn after_failed_booking(
        &self,
        context: &TurnContext<'_>,
        vehicle: &VehicleRecord,
        target: Target,
        slots: &[AppointmentSlot],
        lost: AppointmentSlot,
        conflict: bool,
        tool_calls: Vec<ToolCall>,
        facts: Vec<Fact>,
    ) -> AgentResult {
        if conflict {
            let remaining: Vec<AppointmentSlot> =
                slots.iter().filter(|slot| slot.id != lost.id).cloned().collect();
            return propose(vehicle, target, &remaining, context.now, tool_calls, facts);
        }
        let mut result = AgentResult::new(AgentKind::Scheduler, CALENDAR_DOWN);
        result.vehicles.push(vehicle.clone());
        result.tool_calls = tool_calls;
        result.facts = facts;
        result
    }
}

/// Up to three open slots nearest the request, same day and part of day first.
fn propose(
    vehicle: &VehicleRecord,
    target: Target,
    slots: &[AppointmentSlot],
    now: DateTime<Utc>,
    tool_calls: Vec<ToolCall>,
    mut facts: Vec<Fact>,
) -> AgentResult {
    let anchor = target.anchor();
    let mut open: Vec<AppointmentSlot> =
        slots.iter().filter(|slot| slot.is_available() && slot.start > now).cloned().collect();
    open.sort_by_key(|slot| {
        let other_day = slot.start.date_naive() != target.date();
        let other_part = target
            .part()
            .is_some_and(|part| !part.contains(slot.start.time()));
        (other_day, other_part, (slot.start - anchor).num_minutes().abs(), slot.start)
    });
    open.truncate(ALTERNATIVES);

    let narrative = if open.is_empty() {
        format!(
            "I don't see any open test-drive times for the {} around then. Is there another day \
             that works for you?",
            vehicle.display_name()
        )
    } else {
        let lead = match target {
            Target::Exact(start) => format!(
                "{} isn't open for the {}, but I can offer {}.",
                format_instant(start),
                vehicle.display_name(),
                options_phrase(&open)
            ),
            Target::Day { .. } => format!(
                "Here are the open test-drive times for the {}: {}.",
                vehicle.display_name(),
                options_phrase(&open)
            ),
        };
        format!("{lead} Which works best for you?")
    };

    if !open.is_empty() {
        facts.push(Fact::ProposedSlots(open));
    }
    facts.push(Fact::AwaitingReply(AgentKind::Scheduler));

    let mut result = AgentResult::new(AgentKind::Scheduler, narrative);
    result.vehicles.push(vehicle.clone());
    result.tool_calls = tool_calls;
    result.facts = facts;
    result
}

fn question(narrative: impl Into<String>, mut facts: Vec<Fact>) -> AgentResult {
    facts.push(Fact::AwaitingReply(AgentKind::Scheduler));
    let mut result = AgentResult::new(AgentKind::Scheduler, narrative);
    result.facts = facts;
    result
}

#[async_trait]
impl Agent for SchedulerAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Scheduler
    }

    async fn run(&self, context: &TurnContext<'_>) -> Result<AgentResult, AgentError> {
        let vehicle = match self.resolve_vehicle(context).await? {
            VehicleResolution::Found(vehicle) => vehicle,
            VehicleResolution::UnknownStock(stock_number) => {
                return Ok(question(
                    format!(
                        "I couldn't find stock {stock_number} in our inventory. Could you \
                         double-check the stock number?"
                    ),
                    Vec::new(),
                ));
            }
            VehicleResolution::Missing => {
                return Ok(question(WHICH_VEHICLE_QUESTION, Vec::new()));
            }
        };

        if !vehicle.available {
            return Ok(AgentResult::new(
                AgentKind::Scheduler,
                format!(
                    "The {} (stock {}) is no longer available, but I'm happy to help you find a \
                     similar one.",
                    vehicle.display_name(),
                    vehicle.stock_number
                ),
            ));
        }

        let mut facts = vec![Fact::FocusVehicle(vehicle.stock_number.clone())];
        if let Some(email) = &context.signals.email {
            facts.push(Fact::Contact(email.clone()));
        }

        let Some(target) = resolve_target(context) else {
            return Ok(question(WHEN_QUESTION, facts));
        };

        if let Target::Exact(start) = target {
            if let Some(booking) = context.scratch.booking_for(&vehicle.stock_number, start) {
                return Ok(self.replay_booking(context, &vehicle, booking.clone(), facts).await);
            }
        }

        let day_start = target.date().and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let window = TimeWindow::new(day_start, day_start + Duration::days(SEARCH_DAYS));
        let check_key = Self::key(
            context,
            ToolKind::CheckAvailability,
            &format!("{}|{}|{}", context.turn, window.start.to_rfc3339(), window.end.to_rfc3339()),
        );
        let check =
            self.executor.invoke(ToolInvocation::CheckAvailability { window }, check_key).await;

        let slots = match check.output() {
            Some(ToolOutput::Slots(slots)) => slots.clone(),
            _ => {
                let mut result = AgentResult::new(AgentKind::Scheduler, CALENDAR_DOWN);
                result.vehicles.push(vehicle);
                result.tool_calls.push(check);
                result.facts = facts;
                return Ok(result);
            }
        };
        let tool_calls = vec![check];

        if let Target::Exact(start) = target {
            let exact = slots.iter().find(|slot| slot.start == start && slot.is_available());
            if let Some(slot) = exact.cloned() {
                return Ok(self
                    .book(context, &vehicle, slot, target, &slots, tool_calls, facts)
                    .await);
            }
        }

        Ok(propose(&vehicle, target, &slots, context.now, tool_calls, facts))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use autoxloo_core::catalog::InMemoryCatalog;
    use autoxloo_core::domain::conversation::{ConversationId, Fact, ScratchContext};
    use autoxloo_core::domain::tool::{ToolFailureKind, ToolKind, ToolOutput};
    use autoxloo_core::executor::ToolExecutor;
    use autoxloo_core::ports::ServiceError;

    use super::{SchedulerAgent, CALENDAR_DOWN, DEALERSHIP_LOCATION, WHICH_VEHICLE_QUESTION};
    use crate::agents::testing::{inventory, local_services, now};
    use crate::agents::{Agent, AgentResult, TurnContext};
    use crate::extraction::SignalExtractor;
    use crate::llm::NarrativePolisher;

    fn scheduler(executor: ToolExecutor) -> SchedulerAgent {
        let catalog = InMemoryCatalog::from_records(inventory()).expect("catalog");
        SchedulerAgent::new(executor, Arc::new(catalog), NarrativePolisher::disabled())
    }

    async fn run(
        agent: &SchedulerAgent,
        conversation: &str,
        message: &str,
        scratch: &ScratchContext,
    ) -> AgentResult {
        run_turn(agent, conversation, 1, message, scratch).await
    }

    async fn run_turn(
        agent: &SchedulerAgent,
        conversation: &str,
        turn: usize,
        message: &str,
        scratch: &ScratchContext,
    ) -> AgentResult {
        let signals = SignalExtractor::new().extract(message);
        let conversation_id = ConversationId(conversation.to_string());
        let context = TurnContext {
            conversation_id: &conversation_id,
            turn,
            message,
            signals: &signals,
            scratch,
            prior_results: &[],
            now: now(),
        };
        agent.run(&context).await.expect("scheduler run")
    }

    fn tools(result: &AgentResult) -> Vec<ToolKind> {
        result.tool_calls.iter().map(|call| call.tool).collect()
    }

    fn confirmation_code(result: &AgentResult) -> String {
        result
            .tool_calls
            .iter()
            .find_map(|call| match call.output() {
                Some(ToolOutput::Booking(code)) => Some(code.0.clone()),
                _ => None,
            })
            .expect("confirmation code")
    }

    const SATURDAY_TEN: &str = "Schedule a test drive for stock AX10000 this Saturday 10am";

    #[tokio::test]
    async fn exact_open_slot_is_held_then_confirmed() {
        let agent = scheduler(local_services().executor);

        let result = run(&agent, "c-1", SATURDAY_TEN, &ScratchContext::default()).await;

        assert_eq!(
            tools(&result),
            vec![ToolKind::CheckAvailability, ToolKind::HoldSlot, ToolKind::ConfirmBooking]
        );
        assert!(result.complete);
        let code = confirmation_code(&result);
        assert!(code.starts_with("TD-"));
        assert!(result.narrative.starts_with(&format!(
            "Your test drive of the 2024 Toyota RAV4 is confirmed for Saturday Oct 17, 10:00 AM \
             at {DEALERSHIP_LOCATION} (confirmation code {code})."
        )));
        assert!(result.facts.iter().any(|fact| matches!(fact, Fact::Booked(_))));
    }

    #[tokio::test]
    async fn repeated_request_replays_without_new_booking() {
        let agent = scheduler(local_services().executor);
        let first = run(&agent, "c-1", SATURDAY_TEN, &ScratchContext::default()).await;
        let mut scratch = ScratchContext::default();
        scratch.apply_turn(first.facts.clone());

        let second = run(&agent, "c-1", SATURDAY_TEN, &scratch).await;

        assert_eq!(tools(&second), vec![ToolKind::HoldSlot, ToolKind::ConfirmBooking]);
        assert!(second.tool_calls.iter().all(|call| call.replayed));
        assert_eq!(confirmation_code(&second), confirmation_code(&first));
        assert!(second.complete);
    }

    #[tokio::test]
    async fn taken_slot_offers_nearest_alternatives() {
        let agent = scheduler(local_services().executor);
        run(&agent, "c-1", SATURDAY_TEN, &ScratchContext::default()).await;

        let other = run(&agent, "c-2", SATURDAY_TEN, &ScratchContext::default()).await;

        assert_eq!(tools(&other), vec![ToolKind::CheckAvailability]);
        assert!(!other.complete);
        assert!(other.narrative.starts_with(
            "Saturday Oct 17, 10:00 AM isn't open for the 2024 Toyota RAV4, but I can offer \
             option 1 (Saturday Oct 17, 9:00 AM), option 2 (Saturday Oct 17, 11:00 AM) or \
             option 3 (Saturday Oct 17, 12:00 PM)."
        ));
        let proposed = other.facts.iter().find_map(|fact| match fact {
            Fact::ProposedSlots(slots) => Some(slots.len()),
            _ => None,
        });
        assert_eq!(proposed, Some(3));
    }

    #[tokio::test]
    async fn conflicting_hold_offers_the_other_open_times() {
        let services = local_services();
        services.calendar.fail_holds(Some(ServiceError::Conflict("slot taken".to_string())));
        let agent = scheduler(services.executor.clone());

        let result = run(&agent, "c-1", SATURDAY_TEN, &ScratchContext::default()).await;

        assert_eq!(tools(&result), vec![ToolKind::CheckAvailability, ToolKind::HoldSlot]);
        let hold = &result.tool_calls[1];
        assert_eq!(hold.failure().map(|failure| failure.kind), Some(ToolFailureKind::Conflict));
        assert_eq!(hold.attempts, 1);
        assert!(!result.complete);
        assert!(result.narrative.starts_with(
            "Saturday Oct 17, 10:00 AM isn't open for the 2024 Toyota RAV4, but I can offer \
             option 1 (Saturday Oct 17, 9:00 AM), option 2 (Saturday Oct 17, 11:00 AM) or \
             option 3 (Saturday Oct 17, 12:00 PM)."
        ));
        assert!(result.facts.iter().any(|fact| matches!(fact, Fact::ProposedSlots(_))));
        assert!(!result.facts.iter().any(|fact| matches!(fact, Fact::Booked(_))));
    }

    #[tokio::test]
    async fn calendar_outage_during_confirm_books_nothing() {
        let services = local_services();
        services
            .calendar
            .fail_confirms(Some(ServiceError::Unavailable("calendar offline".to_string())));
        let agent = scheduler(services.executor.clone());

        let result = run(&agent, "c-1", SATURDAY_TEN, &ScratchContext::default()).await;

        assert_eq!(result.narrative, CALENDAR_DOWN);
        assert_eq!(
            tools(&result),
            vec![ToolKind::CheckAvailability, ToolKind::HoldSlot, ToolKind::ConfirmBooking]
        );
        let confirm = &result.tool_calls[2];
        assert_eq!(confirm.failure().map(|failure| failure.kind), Some(ToolFailureKind::Transient));
        assert_eq!(confirm.attempts, 3);
        assert!(!result.complete);
        assert!(!result.facts.iter().any(|fact| matches!(fact, Fact::Booked(_))));
    }

    #[tokio::test]
    async fn retry_after_hold_lapses_takes_a_fresh_hold() {
        let services = local_services();
        services
            .calendar
            .fail_confirms(Some(ServiceError::Unavailable("calendar offline".to_string())));
        let agent = scheduler(services.executor.clone());
        let first = run_turn(&agent, "c-1", 1, SATURDAY_TEN, &ScratchContext::default()).await;
        assert_eq!(first.narrative, CALENDAR_DOWN);

        services.calendar.fail_confirms(None);
        services.clock.advance(Duration::minutes(20));
        let mut scratch = ScratchContext::default();
        scratch.apply_turn(first.facts);

        let second = run_turn(&agent, "c-1", 2, SATURDAY_TEN, &scratch).await;

        assert!(second.complete, "{}", second.narrative);
        assert_eq!(
            tools(&second),
            vec![
                ToolKind::CheckAvailability,
                ToolKind::HoldSlot,
                ToolKind::ConfirmBooking,
                ToolKind::HoldSlot,
                ToolKind::ConfirmBooking
            ]
        );
        assert!(second.tool_calls[1].replayed);
        assert_eq!(
            second.tool_calls[2].failure().map(|failure| failure.kind),
            Some(ToolFailureKind::Conflict)
        );
        assert!(second.narrative.contains("confirmed for Saturday Oct 17, 10:00 AM"));

        scratch.apply_turn(second.facts.clone());
        let third = run_turn(&agent, "c-1", 3, SATURDAY_TEN, &scratch).await;

        assert!(third.tool_calls.iter().all(|call| call.replayed));
        assert_eq!(confirmation_code(&third), confirmation_code(&second));
    }

    #[tokio::test]
    async fn option_choice_books_the_proposed_slot() {
        let agent = scheduler(local_services().executor);
        run(&agent, "c-1", SATURDAY_TEN, &ScratchContext::default()).await;
        let proposal = run(&agent, "c-2", SATURDAY_TEN, &ScratchContext::default()).await;
        let mut scratch = ScratchContext::default();
        scratch.apply_turn(proposal.facts);

        let booked = run(&agent, "c-2", "option 2", &scratch).await;

        assert!(booked.complete);
        assert!(booked.narrative.contains("Saturday Oct 17, 11:00 AM"));
    }

    #[tokio::test]
    async fn confirmation_email_goes_to_known_contact() {
        let services = local_services();
        let agent = scheduler(services.executor.clone());
        let message = "Book stock AX10001 tomorrow at 2pm, my email is sam@example.com";

        let result = run(&agent, "c-3", message, &ScratchContext::default()).await;

        let last_tool = result.tool_calls.last().map(|call| call.tool);
        assert_eq!(last_tool, Some(ToolKind::SendConfirmation));
        assert!(result.narrative.contains("A confirmation email is on its way to sam@example.com"));
        let deliveries = services.deliveries.all().await;
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].recipient, "sam@example.com");
    }

    #[tokio::test]
    async fn closed_day_proposes_next_open_slots() {
        let agent = scheduler(local_services().executor);

        let result =
            run(&agent, "c-4", "test drive AX10000 this Sunday 10am", &ScratchContext::default())
                .await;

        assert_eq!(tools(&result), vec![ToolKind::CheckAvailability]);
        assert!(result.narrative.contains("option 1 (Monday Oct 19, 9:00 AM)"));
    }

    #[tokio::test]
    async fn missing_vehicle_asks_without_tool_calls() {
        let agent = scheduler(local_services().executor);

        let message = "can I book a test drive?";
        let result = run(&agent, "c-5", message, &ScratchContext::default()).await;

        assert_eq!(result.narrative, WHICH_VEHICLE_QUESTION);
        assert!(result.tool_calls.is_empty());
        assert!(!result.complete);
    }

    #[tokio::test]
    async fn unknown_stock_number_is_reported() {
        let agent = scheduler(local_services().executor);

        let result =
            run(&agent, "c-6", "test drive AX99999 saturday 10am", &ScratchContext::default())
                .await;

        assert!(result.narrative.starts_with("I couldn't find stock AX99999"));
        assert!(result.tool_calls.is_empty());
    }
}
