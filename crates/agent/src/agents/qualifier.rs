use async_trait::async_trait;

use autoxloo_core::domain::appointment::LeadFields;
use autoxloo_core::domain::conversation::Fact;
use autoxloo_core::domain::routing::AgentKind;
use autoxloo_core::domain::tool::{IdempotencyKey, ToolInvocation, ToolKind, ToolOutput};
use autoxloo_core::domain::vehicle::format_price;
use autoxloo_core::executor::ToolExecutor;

use super::{Agent, AgentError, AgentResult, TurnContext};
use crate::llm::NarrativePolisher;

/// Known qualification signals needed before a lead is logged.
const SIGNALS_FOR_LEAD: usize = 2;
/// One lead per conversation.
const LEAD_BUSINESS_KEY: &str = "lead";

const BUDGET_QUESTION: &str = "What budget range are you working with?";
const TIMELINE_QUESTION: &str = "When are you hoping to buy?";
const TRADE_IN_QUESTION: &str = "Will you be trading in a vehicle?";

pub struct QualifierAgent {
    executor: ToolExecutor,
    polisher: NarrativePolisher,
}

impl QualifierAgent {
    pub fn new(executor: ToolExecutor, polisher: NarrativePolisher) -> Self {
        Self { executor, polisher }
    }
}

struct Qualification {
    budget: Option<u32>,
    timeline: Option<String>,
    trade_in: Option<bool>,
}

impl Qualification {
    fn from_context(context: &TurnContext<'_>) -> Self {
        let signals = context.signals;
        let scratch = context.scratch;
        Self {
            budget: signals.price_ceiling.or(scratch.budget),
            timeline: signals.timeline.clone().or_else(|| scratch.timeline.clone()),
            trade_in: signals.trade_in.or(scratch.trade_in),
        }
    }

    fn known(&self) -> usize {
        [self.budget.is_some(), self.timeline.is_some(), self.trade_in.is_some()]
            .into_iter()
            .filter(|known| *known)
            .count()
    }

    fn next_question(&self) -> &'static str {
        if self.budget.is_none() {
            BUDGET_QUESTION
        } else if self.timeline.is_none() {
            TIMELINE_QUESTION
        } else {
            TRADE_IN_QUESTION
        }
    }

    fn facts(&self) -> Vec<Fact> {
        let mut facts = Vec::new();
        if let Some(budget) = self.budget {
            facts.push(Fact::Budget(budget));
        }
        if let Some(timeline) = &self.timeline {
            facts.push(Fact::Timeline(timeline.clone()));
        }
        if let Some(trade_in) = self.trade_in {
            facts.push(Fact::TradeIn(trade_in));
        }
        facts
    }
}

/// What the customer is shopping for, most specific source first.
fn interest(context: &TurnContext<'_>) -> String {
    if let Some(vehicle) =
        context.prior_result(AgentKind::Research).and_then(|result| result.vehicles.first())
    {
        return format!("{} (stock {})", vehicle.display_name(), vehicle.stock_number);
    }
    let stock_number =
        context.signals.stock_number.as_ref().or(context.scratch.focus_vehicle.as_ref());
    if let Some(stock_number) = stock_number {
        return format!("stock {stock_number}");
    }
    match context.signals.category.or(context.scratch.preferred_category) {
        Some(category) => category.plural_label().to_string(),
        None => "vehicle purchase".to_string(),
    }
}

#[async_trait]
impl Agent for QualifierAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Qualifier
    }

    async fn run(&self, context: &TurnContext<'_>) -> Result<AgentResult, AgentError> {
        let qualification = Qualification::from_context(context);
        let contact = context.signals.email.clone().or_else(|| context.scratch.contact.clone());
        let customer_name =
            context.signals.customer_name.clone().or_else(|| context.scratch.customer_name.clone());

        let mut facts = qualification.facts();
        if let Some(email) = &context.signals.email {
            facts.push(Fact::Contact(email.clone()));
        }
        if let Some(name) = &context.signals.customer_name {
            facts.push(Fact::CustomerName(name.clone()));
        }

        if let Some(lead_id) = &context.scratch.lead_id {
            let mut result = AgentResult::new(
                AgentKind::Qualifier,
                format!(
                    "Your details are already with our sales team under reference {lead_id}, \
                     so a specialist will be in touch.",
                    lead_id = lead_id.0
                ),
            );
            result.facts = facts;
            return Ok(result);
        }

        if qualification.known() < SIGNALS_FOR_LEAD {
            let mut result = AgentResult::new(AgentKind::Qualifier, qualification.next_question());
            facts.push(Fact::AwaitingReply(AgentKind::Qualifier));
            result.facts = facts;
            return Ok(result);
        }

        let lead = LeadFields {
            customer_name,
            contact,
            interest: interest(context),
            budget: qualification.budget.map(format_price),
            timeline: qualification.timeline.clone(),
            trade_in: qualification.trade_in,
        };
        let key = IdempotencyKey::derive(
            context.conversation_id,
            ToolKind::CreateLead,
            LEAD_BUSINESS_KEY,
        );
        let call = self.executor.invoke(ToolInvocation::CreateLead { lead }, key).await;

        let mut result = match call.output() {
            Some(ToolOutput::Lead(lead_id)) => {
                let narrative = format!(
                    "I've passed your details to our sales team under reference {}, and a \
                     specialist will reach out shortly.",
                    lead_id.0
                );
                facts.push(Fact::LeadLogged(lead_id.clone()));
                let mut result =
                    AgentResult::new(AgentKind::Qualifier, self.polisher.polish(narrative).await);
                result.complete = true;
                result
            }
            _ => AgentResult::new(
                AgentKind::Qualifier,
                "I've noted your budget and timeline, but I couldn't reach our sales system just \
                 now. A team member will follow up with you shortly.",
            ),
        };
        result.facts = facts;
        result.tool_calls.push(call);
        Ok(result)
    }
}
