//! Specialized agents.
//!
//! Each agent reads the shared turn context, may call tools through the
//! executor, and hands back a narrative plus the facts it wants remembered.
//! Agents never mutate conversation state directly; the orchestrator applies
//! their facts once the turn is composed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use autoxloo_core::domain::conversation::{ConversationId, Fact, ScratchContext};
use autoxloo_core::domain::routing::AgentKind;
use autoxloo_core::domain::tool::ToolCall;
use autoxloo_core::domain::vehicle::VehicleRecord;
use autoxloo_core::ports::ServiceError;

use crate::extraction::MessageSignals;

mod qualifier;
mod research;
mod scheduler;

pub use qualifier::QualifierAgent;
pub use research::ResearchAgent;
pub use scheduler::{SchedulerAgent, DEALERSHIP_LOCATION};

/// Read-only view of the turn handed to every agent.
pub struct TurnContext<'a> {
    pub conversation_id: &'a ConversationId,
    /// 1-based count of customer messages, this one included.
    pub turn: usize,
    pub message: &'a str,
    pub signals: &'a MessageSignals,
    pub scratch: &'a ScratchContext,
    /// Results of agents that already ran this turn, in execution order.
    pub prior_results: &'a [AgentResult],
    pub now: DateTime<Utc>,
}

impl TurnContext<'_> {
    pub fn prior_result(&self, agent: AgentKind) -> Option<&AgentResult> {
        self.prior_results.iter().find(|result| result.agent == agent)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AgentResult {
    pub agent: AgentKind,
    pub narrative: String,
    pub vehicles: Vec<VehicleRecord>,
    pub tool_calls: Vec<ToolCall>,
    pub facts: Vec<Fact>,
    /// Stops the remaining steps of this turn.
    pub complete: bool,
}

impl AgentResult {
    pub fn new(agent: AgentKind, narrative: impl Into<String>) -> Self {
        Self {
            agent,
            narrative: narrative.into(),
            vehicles: Vec::new(),
            tool_calls: Vec::new(),
            facts: Vec::new(),
            complete: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{agent} agent could not reach a collaborator: {source}")]
    Collaborator {
        agent: AgentKind,
        #[source]
        source: ServiceError,
    },
    #[error("{agent} agent failed: {message}")]
    Failed { agent: AgentKind, message: String },
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn run(&self, context: &TurnContext<'_>) -> Result<AgentResult, AgentError>;
}
