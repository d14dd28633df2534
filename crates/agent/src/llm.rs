//! Language-model access.
//!
//! The model only ever rephrases or classifies. Every caller bounds the call
//! with a timeout and has a deterministic fallback when the model is absent,
//! slow, or returns something unusable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("language model request failed: {0}")]
    Request(String),
    #[error("language model returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("language model response was unusable: {0}")]
    InvalidResponse(String),
    #[error("language model call timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Runs `complete` under a deadline.
pub async fn complete_with_timeout(
    client: &dyn LlmClient,
    prompt: &str,
    timeout: Duration,
) -> Result<String, LlmError> {
    match tokio::time::timeout(timeout, client.complete(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(timeout)),
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Chat-completions client for OpenAI and compatible servers (Ollama exposes
/// the same route under `/v1`).
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiCompatibleClient {
    pub const OPENAI_BASE_URL: &'static str = "https://api.openai.com/v1";
    pub const OLLAMA_BASE_URL: &'static str = "http://localhost:11434/v1";

    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| LlmError::Request(error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = CompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
            temperature: 0.2,
            max_tokens: 400,
        };

        let mut builder =
            self.client.post(format!("{}/chat/completions", self.base_url)).json(&request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response =
            builder.send().await.map_err(|error| LlmError::Request(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|api_error| api_error.error.message)
                .unwrap_or(body);
            return Err(LlmError::Status { status: status.as_u16(), message });
        }

        let parsed: CompletionResponse =
            response.json().await.map_err(|error| LlmError::InvalidResponse(error.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse("no completion in response".to_string()))?;

        debug!(
            event_name = "llm.completion",
            model = %self.model,
            chars = content.len(),
            "language model completion received"
        );
        Ok(content)
    }
}

/// Optional rephrasing of an agent's lead sentence.
///
/// The rewrite is only accepted when it is a single short line that keeps
/// every digit run of the original and every proper noun or reference code
/// verbatim, so prices, dates, vehicle names and confirmation codes cannot
/// drift.
#[derive(Clone, Default)]
pub struct NarrativePolisher {
    client: Option<Arc<dyn LlmClient>>,
    timeout: Duration,
}

impl NarrativePolisher {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { client: Some(client), timeout }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub async fn polish(&self, narrative: String) -> String {
        let Some(client) = &self.client else {
            return narrative;
        };
        let (lead, rest) = split_lead_sentence(&narrative);
        if lead.is_empty() {
            return narrative;
        }

        let prompt = format!(
            "Rewrite this car dealership assistant sentence to sound warm and natural. \
             Keep every number, name, date and code exactly as written. \
             Reply with the sentence only.\n\n{lead}"
        );

        match complete_with_timeout(client.as_ref(), &prompt, self.timeout).await {
            Ok(candidate) => {
                let candidate = candidate.trim().trim_matches('"').trim();
                if is_faithful_rewrite(lead, candidate) {
                    format!("{candidate}{rest}")
                } else {
                    debug!(event_name = "llm.polish_rejected", "rewrite dropped required details");
                    narrative
                }
            }
            Err(error) => {
                debug!(event_name = "llm.polish_skipped", error = %error, "keeping original text");
                narrative
            }
        }
    }
}

/// Splits after the first sentence terminator that is followed by whitespace.
pub(crate) fn split_lead_sentence(text: &str) -> (&str, &str) {
    let bytes = text.as_bytes();
    for (index, byte) in bytes.iter().enumerate() {
        if matches!(byte, b'.' | b'!' | b'?')
            && bytes.get(index + 1).map_or(true, |next| next.is_ascii_whitespace())
        {
            return text.split_at(index + 1);
        }
    }
    (text, "")
}

fn digit_runs(text: &str) -> Vec<&str> {
    text.split(|character: char| !character.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .collect()
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|character: char| !(character.is_ascii_alphanumeric() || character == '-'))
        .map(|word| word.trim_matches('-'))
        .filter(|word| !word.is_empty())
}

/// Capitalized names and `TD-3FA9C0B2` style codes. A plain capitalized
/// opening word is left free so the rewrite can start the sentence its own way.
fn pinned_words(text: &str) -> Vec<&str> {
    words(text)
        .enumerate()
        .filter(|(index, word)| {
            let mut characters = word.chars();
            let starts_upper = characters.next().is_some_and(|first| first.is_ascii_uppercase());
            let plain_capitalized = characters.all(|rest| rest.is_ascii_lowercase());
            if !starts_upper || word.len() < 2 {
                return false;
            }
            *index > 0 || !plain_capitalized
        })
        .map(|(_, word)| word)
        .collect()
}

fn is_faithful_rewrite(original: &str, candidate: &str) -> bool {
    if candidate.is_empty() || candidate.contains('\n') || candidate.len() > original.len() * 2 + 40
    {
        return false;
    }
    let candidate_runs = digit_runs(candidate);
    if !digit_runs(original).iter().all(|run| candidate_runs.contains(run)) {
        return false;
    }
    let candidate_words: Vec<&str> = words(candidate).collect();
    pinned_words(original).iter().all(|word| candidate_words.contains(word))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{
        complete_with_timeout, is_faithful_rewrite, pinned_words, split_lead_sentence, LlmClient,
        LlmError, NarrativePolisher,
    };

    /// Returns canned replies in order, repeating the last one.
    pub(crate) struct ScriptedLlm {
        replies: Vec<Result<String, LlmError>>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        pub(crate) fn replying(reply: &str) -> Self {
            Self::new(vec![Ok(reply.to_string())], Duration::ZERO)
        }

        pub(crate) fn new(replies: Vec<Result<String, LlmError>>, delay: Duration) -> Self {
            Self { replies, delay, calls: AtomicUsize::new(0) }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .get(index.min(self.replies.len().saturating_sub(1)))
                .cloned()
                .unwrap_or_else(|| Err(LlmError::InvalidResponse("no scripted reply".to_string())))
        }
    }

    #[test]
    fn lead_sentence_split_ignores_decimal_points() {
        let (lead, rest) = split_lead_sentence("Rated 4.5 stars. Ask about it!");
        assert_eq!(lead, "Rated 4.5 stars.");
        assert_eq!(rest, " Ask about it!");
        assert_eq!(split_lead_sentence("no terminator"), ("no terminator", ""));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let slow = ScriptedLlm::new(vec![Ok("late".to_string())], Duration::from_millis(200));
        let result = complete_with_timeout(&slow, "hi", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(LlmError::Timeout(_))));
    }

    #[tokio::test]
    async fn disabled_polisher_returns_text_untouched() {
        let text = "The 2024 Toyota RAV4 is $34,500. It has AWD.".to_string();
        assert_eq!(NarrativePolisher::disabled().polish(text.clone()).await, text);
    }

    #[tokio::test]
    async fn polisher_accepts_faithful_rewrite_of_lead_only() {
        let llm =
            Arc::new(ScriptedLlm::replying("Great news: the 2024 Toyota RAV4 is just $34,500."));
        let polisher = NarrativePolisher::new(llm.clone(), Duration::from_secs(1));

        let polished =
            polisher.polish("The 2024 Toyota RAV4 is $34,500. It has AWD.".to_string()).await;

        assert_eq!(polished, "Great news: the 2024 Toyota RAV4 is just $34,500. It has AWD.");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn polisher_rejects_rewrites_that_change_numbers() {
        let llm = Arc::new(ScriptedLlm::replying("The RAV4 is about $30,000."));
        let polisher = NarrativePolisher::new(llm, Duration::from_secs(1));
        let original = "The 2024 Toyota RAV4 is $34,500.".to_string();

        assert_eq!(polisher.polish(original.clone()).await, original);
    }

    #[tokio::test]
    async fn polisher_rejects_rewrites_that_alter_a_confirmation_code() {
        let original = "Your test drive of the 2024 Toyota RAV4 is confirmed for Saturday at \
                        10:00 AM (confirmation code TD-3FA9C0B2)."
            .to_string();
        let llm = Arc::new(ScriptedLlm::replying(
            "You're all set for the 2024 Toyota RAV4 on Saturday at 10:00 AM, code TD-3EA9C0B2!",
        ));
        let polisher = NarrativePolisher::new(llm.clone(), Duration::from_secs(1));

        assert_eq!(polisher.polish(original.clone()).await, original);
        assert_eq!(llm.calls(), 1);
    }

    #[test]
    fn rewrites_must_keep_names_and_letter_only_codes() {
        let original = "Your 2024 Toyota RAV4 is booked under TD-ABCDEFAB.";

        assert!(is_faithful_rewrite(original, "Great, your 2024 Toyota RAV4 is set: TD-ABCDEFAB."));
        assert!(!is_faithful_rewrite(original, "Great, your 2024 Toyota RAV4 is set."));
        let swapped = "Your 2024 Honda RAV4 is booked under TD-ABCDEFAB.";
        assert!(!is_faithful_rewrite(original, swapped));
        assert_eq!(pinned_words(original), vec!["Toyota", "RAV4", "TD-ABCDEFAB"]);
    }

    #[tokio::test]
    async fn polisher_falls_back_on_error() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![Err(LlmError::Status { status: 503, message: "busy".to_string() })],
            Duration::ZERO,
        ));
        let polisher = NarrativePolisher::new(llm, Duration::from_secs(1));
        let original = "Booked for Saturday.".to_string();

        assert_eq!(polisher.polish(original.clone()).await, original);
    }
}
