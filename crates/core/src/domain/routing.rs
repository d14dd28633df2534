use std::fmt;

use serde::{Deserialize, Serialize};

/// Agent variants in pipeline precedence order: downstream agents read
/// upstream results, so `Ord` is the execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Research,
    Qualifier,
    Scheduler,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [Self::Research, Self::Qualifier, Self::Scheduler];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Qualifier => "qualifier",
            Self::Scheduler => "scheduler",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "research" => Some(Self::Research),
            "qualifier" | "qualification" => Some(Self::Qualifier),
            "scheduler" | "scheduling" => Some(Self::Scheduler),
            _ => None,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingStep {
    pub agent: AgentKind,
    /// Clamped to `[0, 1]`.
    pub confidence: f32,
    /// Diagnostics only; never shown to the customer.
    pub rationale: String,
}

impl RoutingStep {
    pub fn new(agent: AgentKind, confidence: f32, rationale: impl Into<String>) -> Self {
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        Self { agent, confidence, rationale: rationale.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RoutingDecision {
    /// Non-empty, precedence-ordered, one step per agent kind.
    Dispatch { steps: Vec<RoutingStep> },
    /// The "no agent" fallback: ask the customer a disambiguating question.
    Clarify { question: String, rationale: String },
}

impl RoutingDecision {
    /// Builds a dispatch decision, enforcing precedence order and dropping
    /// duplicate kinds (the highest confidence wins). An empty step list
    /// degrades to `Clarify`.
    pub fn dispatch(steps: Vec<RoutingStep>, clarify_question: impl Into<String>) -> Self {
        let mut deduped: Vec<RoutingStep> = Vec::with_capacity(steps.len());
        for step in steps {
            match deduped.iter_mut().find(|existing| existing.agent == step.agent) {
                Some(existing) if existing.confidence < step.confidence => *existing = step,
                Some(_) => {}
                None => deduped.push(step),
            }
        }
        deduped.sort_by_key(|step| step.agent);

        if deduped.is_empty() {
            return Self::Clarify {
                question: clarify_question.into(),
                rationale: "no routing steps supplied".to_string(),
            };
        }

        Self::Dispatch { steps: deduped }
    }

    pub fn clarify(question: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self::Clarify { question: question.into(), rationale: rationale.into() }
    }

    pub fn agents(&self) -> Vec<AgentKind> {
        match self {
            Self::Dispatch { steps } => steps.iter().map(|step| step.agent).collect(),
            Self::Clarify { .. } => Vec::new(),
        }
    }

    pub fn is_clarify(&self) -> bool {
        matches!(self, Self::Clarify { .. })
    }
}
