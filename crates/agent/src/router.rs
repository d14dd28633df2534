//! Intent routing.
//!
//! A classifier proposes weighted agent candidates for the newest message.
//! The router drops candidates under the confidence floor, adds follow-up
//! steps implied by what the conversation is waiting on, and turns the rest
//! into a precedence-ordered [`RoutingDecision`]. Classification problems
//! never abort a turn: they become a clarifying question.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use autoxloo_core::domain::conversation::{Message, ScratchContext};
use autoxloo_core::domain::routing::{AgentKind, RoutingDecision, RoutingStep};

use crate::extraction::MessageSignals;
use crate::llm::{complete_with_timeout, LlmClient, LlmError};

pub const CLARIFY_QUESTION: &str =
    "I can help you find the right vehicle or book a test drive. What would you like to do?";

const FOLLOW_UP_CONFIDENCE: f32 = 0.85;

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("classifier output could not be parsed: {0}")]
    Malformed(String),
}

pub struct ClassificationRequest<'a> {
    pub message: &'a str,
    pub history: &'a [Message],
    pub signals: &'a MessageSignals,
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<Vec<RoutingStep>, ClassificationError>;
}

const STRONG: f32 = 0.8;
const MEDIUM: f32 = 0.5;
const WEAK: f32 = 0.3;

const RESEARCH_CUES: &[(&str, f32)] = &[
    ("show me", STRONG),
    ("find", STRONG),
    ("search", STRONG),
    ("compare", STRONG),
    ("recommend", STRONG),
    ("what do you have", STRONG),
    ("in stock", STRONG),
    ("inventory", STRONG),
    ("options", MEDIUM),
    ("suggest", MEDIUM),
    ("cheapest", MEDIUM),
    ("safest", MEDIUM),
    ("best", MEDIUM),
    ("features", MEDIUM),
    ("available", WEAK),
    ("which", WEAK),
];

const QUALIFIER_CUES: &[(&str, f32)] = &[
    ("ready to buy", STRONG),
    ("financing", STRONG),
    ("finance", STRONG),
    ("pre-approved", STRONG),
    ("my budget", STRONG),
    ("trade-in", STRONG),
    ("trade in", STRONG),
    ("interested", MEDIUM),
    ("want to buy", MEDIUM),
    ("looking to buy", MEDIUM),
    ("looking for", MEDIUM),
    ("purchase", MEDIUM),
    ("buy", MEDIUM),
    ("want", WEAK),
    ("need", WEAK),
];

const SCHEDULER_CUES: &[(&str, f32)] = &[
    ("test drive", STRONG),
    ("test-drive", STRONG),
    ("schedule", STRONG),
    ("appointment", STRONG),
    ("book", STRONG),
    ("visit", STRONG),
    ("come in", STRONG),
    ("come by", STRONG),
    ("stop by", STRONG),
    ("reschedule", STRONG),
];

/// Deterministic cue-phrase classifier; needs no network.
#[derive(Clone, Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }
}

fn cue_score(normalized: &str, cues: &[(&'static str, f32)]) -> Option<(f32, Vec<&'static str>)> {
    let matched: Vec<(&'static str, f32)> =
        cues.iter().copied().filter(|(cue, _)| normalized.contains(cue)).collect();
    if matched.is_empty() {
        return None;
    }
    let best = matched.iter().map(|(_, weight)| *weight).fold(0.0f32, f32::max);
    let bonus = 0.05 * (matched.len() - 1) as f32;
    Some(((best + bonus).min(0.95), matched.into_iter().map(|(cue, _)| cue).collect()))
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<Vec<RoutingStep>, ClassificationError> {
        let normalized = request.message.to_ascii_lowercase();
        let signals = request.signals;
        let mut steps = Vec::new();

        let research = cue_score(&normalized, RESEARCH_CUES);
        let research = match (research, signals.has_search_criteria()) {
            (Some((score, cues)), true) => {
                Some(((score + 0.1).min(0.95), format!("cues {cues:?} with search criteria")))
            }
            (Some((score, cues)), false) => Some((score, format!("cues {cues:?}"))),
            (None, true) => Some((STRONG, "search criteria in message".to_string())),
            (None, false) => None,
        };
        if let Some((confidence, rationale)) = research {
            steps.push(RoutingStep::new(AgentKind::Research, confidence, rationale));
        }

        if let Some((score, cues)) = cue_score(&normalized, QUALIFIER_CUES) {
            let score = if signals.timeline.is_some() { (score + 0.1).min(0.95) } else { score };
            steps.push(RoutingStep::new(AgentKind::Qualifier, score, format!("cues {cues:?}")));
        } else if signals.timeline.is_some() || signals.trade_in.is_some() {
            steps.push(RoutingStep::new(
                AgentKind::Qualifier,
                MEDIUM,
                "purchase timeline or trade-in mentioned",
            ));
        }

        let scheduler = cue_score(&normalized, SCHEDULER_CUES).map(|(score, cues)| {
            let boosted =
                if signals.has_scheduling_detail() { (score + 0.1).min(0.95) } else { score };
            (boosted, format!("cues {cues:?}"))
        });
        let scheduler = scheduler.or_else(|| {
            (signals.stock_number.is_some() && signals.day.is_some())
                .then(|| (MEDIUM, "stock number with a day".to_string()))
        });
        if let Some((confidence, rationale)) = scheduler {
            steps.push(RoutingStep::new(AgentKind::Scheduler, confidence, rationale));
        }

        Ok(steps)
    }
}

#[derive(Debug, Deserialize)]
struct LlmIntentEnvelope {
    intents: Vec<LlmIntent>,
}

#[derive(Debug, Deserialize)]
struct LlmIntent {
    agent: String,
    confidence: f32,
    #[serde(default)]
    rationale: String,
}

/// Prompts a language model for `{"intents":[{"agent","confidence","rationale"}]}`.
pub struct LlmClassifier {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmClassifier {
    pub fn new(client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn prompt(request: &ClassificationRequest<'_>) -> String {
        let mut transcript = String::new();
        for message in request.history {
            transcript.push_str(message.role.as_str());
            transcript.push_str(": ");
            transcript.push_str(&message.content);
            transcript.push('\n');
        }

        format!(
            "You route messages for a car dealership assistant. Agents:\n\
             - research: finding, comparing or describing vehicles in inventory\n\
             - qualifier: buying intent, budget, purchase timeline, trade-in, financing\n\
             - scheduler: test drives, appointments, visits\n\
             A message may need several agents. Reply with JSON only, shaped as \
             {{\"intents\":[{{\"agent\":\"research\",\"confidence\":0.9,\"rationale\":\"...\"}}]}}. \
             Confidence is between 0 and 1. Use an empty list when no agent fits.\n\n\
             Recent conversation:\n{transcript}\nNew message: {}",
            request.message
        )
    }
}

pub(crate) fn parse_intents(raw: &str) -> Result<Vec<RoutingStep>, ClassificationError> {
    let trimmed = raw.trim().trim_start_matches("```json").trim_start_matches("```");
    let start = trimmed
        .find('{')
        .ok_or_else(|| ClassificationError::Malformed("no JSON object in reply".to_string()))?;
    let end = trimmed
        .rfind('}')
        .ok_or_else(|| ClassificationError::Malformed("unterminated JSON object".to_string()))?;
    if end < start {
        return Err(ClassificationError::Malformed("unterminated JSON object".to_string()));
    }

    let envelope: LlmIntentEnvelope = serde_json::from_str(&trimmed[start..=end])
        .map_err(|error| ClassificationError::Malformed(error.to_string()))?;

    Ok(envelope
        .intents
        .into_iter()
        .filter_map(|intent| {
            AgentKind::parse(&intent.agent)
                .map(|agent| RoutingStep::new(agent, intent.confidence, intent.rationale))
        })
        .collect())
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<Vec<RoutingStep>, ClassificationError> {
        let reply =
            complete_with_timeout(self.client.as_ref(), &Self::prompt(request), self.timeout)
                .await?;
        parse_intents(&reply)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouterSettings {
    /// Prior messages handed to the classifier.
    pub history_window: usize,
    pub confidence_floor: f32,
    pub timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self { history_window: 6, confidence_floor: 0.5, timeout: Duration::from_secs(10) }
    }
}

pub struct IntentRouter {
    classifier: Arc<dyn IntentClassifier>,
    settings: RouterSettings,
}

impl IntentRouter {
    pub fn new(classifier: Arc<dyn IntentClassifier>, settings: RouterSettings) -> Self {
        Self { classifier, settings }
    }

    pub fn keyword(settings: RouterSettings) -> Self {
        Self::new(Arc::new(KeywordClassifier::new()), settings)
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub async fn route(
        &self,
        message: &str,
        history: &[Message],
        scratch: &ScratchContext,
        signals: &MessageSignals,
    ) -> RoutingDecision {
        let window_start = history.len().saturating_sub(self.settings.history_window);
        let request =
            ClassificationRequest { message, history: &history[window_start..], signals };

        let classified = tokio::time::timeout(
            self.settings.timeout,
            self.classifier.classify(&request),
        )
        .await;

        let candidates = match classified {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(error)) => {
                warn!(
                    event_name = "router.classification_failed",
                    classifier = self.classifier.name(),
                    error = %error,
                    "classification failed, asking the customer to clarify"
                );
                return RoutingDecision::clarify(CLARIFY_QUESTION, error.to_string());
            }
            Err(_) => {
                warn!(
                    event_name = "router.classification_failed",
                    classifier = self.classifier.name(),
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "classification timed out, asking the customer to clarify"
                );
                return RoutingDecision::clarify(CLARIFY_QUESTION, "classification timed out");
            }
        };

        let mut steps: Vec<RoutingStep> = candidates
            .into_iter()
            .filter(|step| step.confidence >= self.settings.confidence_floor)
            .collect();
        steps.extend(follow_up_steps(scratch, signals));

        let decision = if steps.is_empty() {
            RoutingDecision::clarify(CLARIFY_QUESTION, "no candidate reached the confidence floor")
        } else {
            RoutingDecision::dispatch(steps, CLARIFY_QUESTION)
        };

        info!(
            event_name = "router.decision",
            classifier = self.classifier.name(),
            agents = ?decision.agents(),
            clarify = decision.is_clarify(),
            "message routed"
        );
        decision
    }
}

/// Steps implied by an open question from the previous turn.
fn follow_up_steps(scratch: &ScratchContext, signals: &MessageSignals) -> Vec<RoutingStep> {
    let mut steps = Vec::new();

    if scratch.awaiting_reply_from == Some(AgentKind::Qualifier)
        && signals.has_qualification_answer()
    {
        steps.push(RoutingStep::new(
            AgentKind::Qualifier,
            FOLLOW_UP_CONFIDENCE,
            "answers the open qualification question",
        ));
    }

    let scheduling_open = !scratch.proposed_slots.is_empty()
        || scratch.awaiting_reply_from == Some(AgentKind::Scheduler);
    if scheduling_open && (signals.has_scheduling_detail() || signals.stock_number.is_some()) {
        steps.push(RoutingStep::new(
            AgentKind::Scheduler,
            FOLLOW_UP_CONFIDENCE,
            "answers the open scheduling question",
        ));
    }

    steps
}
