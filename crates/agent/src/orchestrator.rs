//! One customer turn, end to end.
//!
//! The conversation's mutex is held from appending the user message until the
//! assistant reply is appended, so concurrent requests on one id are served
//! in arrival order and the log always alternates user/assistant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, warn};

use autoxloo_core::clock::Clock;
use autoxloo_core::domain::conversation::{ConversationId, Fact, MessageRole};
use autoxloo_core::domain::routing::{AgentKind, RoutingDecision};
use autoxloo_core::domain::tool::ActionRecord;
use autoxloo_core::errors::{ApplicationError, DomainError};

use crate::agents::{Agent, AgentResult, TurnContext};
use crate::composer::ResponseComposer;
use crate::extraction::SignalExtractor;
use crate::router::IntentRouter;
use crate::store::ConversationStore;

pub const MAX_MESSAGE_CHARS: usize = 2_000;

pub const APOLOGY: &str =
    "I'm sorry, something went wrong on my side while handling that. Please try again in a moment.";

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    InvalidMessage(#[from] DomainError),
}

impl From<OrchestrationError> for ApplicationError {
    fn from(error: OrchestrationError) -> Self {
        match error {
            OrchestrationError::InvalidMessage(domain) => ApplicationError::Domain(domain),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
    pub conversation_id: ConversationId,
    pub reply: String,
    pub agents_used: Vec<AgentKind>,
    pub actions_taken: Vec<ActionRecord>,
    pub routing: RoutingDecision,
}

pub struct Orchestrator {
    store: Arc<ConversationStore>,
    router: IntentRouter,
    agents: HashMap<AgentKind, Arc<dyn Agent>>,
    composer: ResponseComposer,
    extractor: SignalExtractor,
    clock: Arc<dyn Clock>,
}

fn validate(message: &str) -> Result<&str, DomainError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(DomainError::EmptyMessage);
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(DomainError::MessageTooLong { max: MAX_MESSAGE_CHARS });
    }
    Ok(message)
}

impl Orchestrator {
    pub fn new(store: Arc<ConversationStore>, router: IntentRouter, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            router,
            agents: HashMap::new(),
            composer: ResponseComposer::default(),
            extractor: SignalExtractor::new(),
            clock,
        }
    }

    /// Registers an agent under its own kind, replacing any earlier one.
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.kind(), agent);
        self
    }

    pub fn with_composer(mut self, composer: ResponseComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn registered_agents(&self) -> Vec<AgentKind> {
        let mut kinds: Vec<AgentKind> = self.agents.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub async fn handle_turn(
        &self,
        conversation_id: Option<ConversationId>,
        message: &str,
    ) -> Result<TurnOutcome, OrchestrationError> {
        let message = validate(message)?;
        let started = Instant::now();

        let (conversation_id, handle) = self.store.open(conversation_id.as_ref()).await;
        let mut conversation = handle.lock().await;
        let now = self.clock.now();

        if conversation.has_unanswered_user_message() {
            warn!(
                event_name = "orchestrator.unanswered_turn_repaired",
                conversation_id = %conversation_id,
                "previous turn ended without a reply"
            );
            conversation.append(MessageRole::Assistant, APOLOGY, now);
        }

        conversation.append(MessageRole::User, message, now);
        let turn = conversation.user_turns();
        let signals = self.extractor.extract(message);
        let history_window = self.router.settings().history_window;
        let routing = self
            .router
            .route(
                message,
                conversation.prior_messages(history_window),
                &conversation.scratch,
                &signals,
            )
            .await;

        let mut results: Vec<AgentResult> = Vec::new();
        let mut aborted = false;
        let reply = match &routing {
            RoutingDecision::Clarify { question, .. } => question.clone(),
            RoutingDecision::Dispatch { steps } => {
                for step in steps {
                    let Some(agent) = self.agents.get(&step.agent) else {
                        error!(
                            event_name = "orchestrator.agent_missing",
                            conversation_id = %conversation_id,
                            agent = %step.agent,
                            "no agent registered for routed kind"
                        );
                        aborted = true;
                        break;
                    };

                    let context = TurnContext {
                        conversation_id: &conversation_id,
                        turn,
                        message,
                        signals: &signals,
                        scratch: &conversation.scratch,
                        prior_results: &results,
                        now,
                    };
                    match agent.run(&context).await {
                        Ok(result) => {
                            let complete = result.complete;
                            results.push(result);
                            if complete {
                                break;
                            }
                        }
                        Err(agent_error) => {
                            warn!(
                                event_name = "orchestrator.agent_failed",
                                conversation_id = %conversation_id,
                                agent = %step.agent,
                                error = %agent_error,
                                "agent failed, replying with what completed"
                            );
                            aborted = true;
                            break;
                        }
                    }
                }
                String::new()
            }
        };

        let composed = self.composer.compose(&results);
        let mut reply = if reply.is_empty() { composed.text } else { reply };
        if aborted {
            if !reply.is_empty() {
                reply.push_str("\n\n");
            }
            reply.push_str(APOLOGY);
        }

        let facts: Vec<Fact> =
            results.iter().flat_map(|result| result.facts.iter().cloned()).collect();
        conversation.scratch.apply_turn(facts);
        conversation.append(MessageRole::Assistant, reply.clone(), self.clock.now());

        info!(
            event_name = "orchestrator.turn.completed",
            conversation_id = %conversation_id,
            turn,
            agents = ?composed.manifest.agents_used,
            actions = composed.manifest.actions_taken.len(),
            aborted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn completed"
        );

        Ok(TurnOutcome {
            conversation_id,
            reply,
            agents_used: composed.manifest.agents_used,
            actions_taken: composed.manifest.actions_taken,
            routing,
        })
    }
}
