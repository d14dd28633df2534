//! Conversational runtime for the dealership assistant.
//!
//! A customer message flows through a constrained loop:
//! 1. **Signal extraction** (`extraction`) - budget, category, stock numbers,
//!    dates and other structured hints pulled from free text
//! 2. **Routing** (`router`) - a classifier proposes agents, low-confidence
//!    candidates are dropped, and an empty result becomes a clarifying question
//! 3. **Agents** (`agents`) - research, qualification and scheduling run in
//!    precedence order, each reading the results of the ones before it
//! 4. **Composition** (`composer`) - narratives, a vehicle table and the
//!    manifest of tool actions become one reply
//!
//! `orchestrator` drives the loop under a per-conversation lock held in
//! `store`.
//!
//! # Safety Principle
//!
//! The language model, when configured, only classifies intent and rewords
//! lead sentences. Prices, availability and bookings always come from the
//! catalog and the tool executor.

pub mod agents;
pub mod composer;
pub mod extraction;
pub mod llm;
pub mod orchestrator;
pub mod router;
pub mod store;

pub use agents::{
    Agent, AgentError, AgentResult, QualifierAgent, ResearchAgent, SchedulerAgent, TurnContext,
    DEALERSHIP_LOCATION,
};
pub use composer::{ComposedReply, ResponseComposer, TurnManifest};
pub use extraction::{MessageSignals, SignalExtractor};
pub use llm::{LlmClient, LlmError, NarrativePolisher, OpenAiCompatibleClient};
pub use orchestrator::{OrchestrationError, Orchestrator, TurnOutcome, APOLOGY, MAX_MESSAGE_CHARS};
pub use router::{IntentClassifier, IntentRouter, KeywordClassifier, LlmClassifier, RouterSettings};
pub use store::ConversationStore;
