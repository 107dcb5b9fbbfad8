use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use snipgate_llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

use super::{Classifier, Generator, OracleError, Responder, prompt};
use crate::persona::{DEFAULT_PERSONA, Persona};
use crate::types::{Classification, Destination, Intent};

const CLASSIFY_MAX_TOKENS: u32 = 400;
const GENERATE_MAX_TOKENS: u32 = 2048;
const REVIEW_MAX_TOKENS: u32 = 400;
const ANSWER_MAX_TOKENS: u32 = 1024;
const FALLBACK_MARKER: &str = "Fallback to ASKTHEWORLD.";
const DEFAULT_THREAD_LIMIT: usize = 512;

type History = Mutex<ThreadLogs>;

/// Message logs keyed by thread. `tick` orders uses so the least recently used thread can
/// be dropped when the limit is reached.
#[derive(Default)]
struct ThreadLogs {
    threads: HashMap<Destination, ThreadLog>,
    tick: u64,
}

#[derive(Default)]
struct ThreadLog {
    messages: VecDeque<ChatMessage>,
    last_used: u64,
}

/// All oracles backed by one `LlmProvider`, with bounded per-thread memory.
pub struct LlmOracle {
    provider: Arc<dyn LlmProvider>,
    /// Messages kept per thread (user + assistant pairs).
    history_turns: usize,
    /// Threads remembered per history.
    max_threads: usize,
    classifier_history: History,
    conversations: History,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn LlmProvider>, history_turns: usize) -> Self {
        Self {
            provider,
            history_turns,
            max_threads: DEFAULT_THREAD_LIMIT,
            classifier_history: Mutex::new(ThreadLogs::default()),
            conversations: Mutex::new(ThreadLogs::default()),
        }
    }

    pub fn with_thread_limit(mut self, threads: usize) -> Self {
        self.max_threads = threads.max(1);
        self
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, OracleError> {
        let resp = self
            .provider
            .complete(CompletionRequest {
                messages,
                max_tokens,
                temperature,
            })
            .await?;
        tracing::debug!(
            provider = self.provider.name(),
            input_tokens = resp.input_tokens,
            output_tokens = resp.output_tokens,
            "oracle completion"
        );
        Ok(resp.content)
    }

    fn snapshot(&self, history: &History, destination: &Destination) -> Vec<ChatMessage> {
        let mut logs = history.lock().unwrap_or_else(PoisonError::into_inner);
        logs.tick += 1;
        let tick = logs.tick;
        match logs.threads.get_mut(destination) {
            Some(log) => {
                log.last_used = tick;
                log.messages.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    fn remember(&self, history: &History, destination: &Destination, messages: impl IntoIterator<Item = ChatMessage>) {
        let cap = self.history_turns.saturating_mul(2);
        let mut logs = history.lock().unwrap_or_else(PoisonError::into_inner);
        logs.tick += 1;
        let tick = logs.tick;

        if !logs.threads.contains_key(destination) && logs.threads.len() >= self.max_threads {
            let idle = logs
                .threads
                .iter()
                .min_by_key(|(_, log)| log.last_used)
                .map(|(dest, _)| dest.clone());
            if let Some(idle) = idle {
                logs.threads.remove(&idle);
                tracing::debug!(destination = %idle, "dropped least recently used thread history");
            }
        }

        let log = logs.threads.entry(destination.clone()).or_default();
        log.last_used = tick;
        log.messages.extend(messages);
        while log.messages.len() > cap {
            log.messages.pop_front();
        }
    }
}

#[async_trait::async_trait]
impl Classifier for LlmOracle {
    async fn classify(&self, text: &str, destination: &Destination) -> Result<Classification, OracleError> {
        let mut messages = vec![ChatMessage::system(prompt::CLASSIFIER)];
        messages.extend(self.snapshot(&self.classifier_history, destination));
        messages.push(ChatMessage::user(text));

        let result = self
            .complete(messages, CLASSIFY_MAX_TOKENS, 0.0)
            .await
            .and_then(|raw| parse_classification(&raw).map(|c| (c, raw)));

        match result {
            Ok((classification, raw)) => {
                self.remember(
                    &self.classifier_history,
                    destination,
                    [ChatMessage::user(text), ChatMessage::assistant(raw)],
                );
                Ok(classification)
            }
            Err(e) => {
                tracing::warn!(destination = %destination, error = %e, "classification failed");
                self.remember(
                    &self.classifier_history,
                    destination,
                    [ChatMessage::user(text), ChatMessage::assistant(FALLBACK_MARKER)],
                );
                Err(e)
            }
        }
    }
}

#[async_trait::async_trait]
impl Generator for LlmOracle {
    async fn generate_payload(&self, request: &str) -> Result<String, OracleError> {
        let raw = self
            .complete(
                vec![ChatMessage::system(prompt::CODER), ChatMessage::user(request)],
                GENERATE_MAX_TOKENS,
                0.3,
            )
            .await?;
        let code = extract_code(&raw);
        if code.is_empty() {
            return Err(OracleError::Empty);
        }
        Ok(code)
    }

    async fn review_payload(&self, payload: &str) -> Result<String, OracleError> {
        let raw = self
            .complete(
                vec![ChatMessage::system(prompt::REVIEWER), ChatMessage::user(payload)],
                REVIEW_MAX_TOKENS,
                0.2,
            )
            .await?;
        non_empty(raw)
    }
}

#[async_trait::async_trait]
impl Responder for LlmOracle {
    async fn ask_the_world(
        &self,
        text: &str,
        destination: &Destination,
        persona: &Persona,
    ) -> Result<String, OracleError> {
        let mut messages = vec![ChatMessage::system(persona.system_prompt.as_str())];
        messages.extend(self.snapshot(&self.conversations, destination));
        messages.push(ChatMessage::user(text));

        let answer = non_empty(self.complete(messages, ANSWER_MAX_TOKENS, persona.temperature).await?)?;
        self.remember(
            &self.conversations,
            destination,
            [ChatMessage::user(text), ChatMessage::assistant(answer.as_str())],
        );
        Ok(answer)
    }

    async fn ask_the_bot(&self, text: &str) -> Result<String, OracleError> {
        let raw = self
            .complete(
                vec![ChatMessage::system(prompt::BOT_KNOWLEDGE), ChatMessage::user(text)],
                ANSWER_MAX_TOKENS,
                0.6,
            )
            .await?;
        non_empty(raw)
    }
}

fn non_empty(raw: String) -> Result<String, OracleError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Err(OracleError::Empty)
    } else {
        Ok(trimmed.to_owned())
    }
}

#[derive(Deserialize)]
struct RawClassification {
    #[serde(alias = "intent")]
    request_type: String,
    #[serde(default, alias = "role")]
    role_info: Option<String>,
    #[serde(default, alias = "parameters")]
    extra_data: serde_json::Value,
}

/// Parse the classifier's JSON verdict. Unknown intents are malformed, never guessed.
pub fn parse_classification(raw: &str) -> Result<Classification, OracleError> {
    let json = json_body(raw).ok_or_else(|| OracleError::Malformed("no JSON object in reply".into()))?;
    let parsed: RawClassification =
        serde_json::from_str(json).map_err(|e| OracleError::Malformed(e.to_string()))?;
    let intent = Intent::from_label(&parsed.request_type)
        .ok_or_else(|| OracleError::Malformed(format!("unknown request_type {:?}", parsed.request_type)))?;
    let role = parsed
        .role_info
        .map(|r| r.trim().to_owned())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_PERSONA.to_owned());
    let parameters = match parsed.extra_data {
        serde_json::Value::Object(map) => serde_json::Value::Object(map),
        _ => serde_json::Value::Object(Default::default()),
    };
    Ok(Classification { intent, role, parameters })
}

/// The outermost `{...}` span, ignoring any fence or prose around it.
fn json_body(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Unwrap the first fenced block (```` ```bash ````, ```` ```sh ````, bare ```` ``` ````);
/// text without a complete fence is returned trimmed.
pub fn extract_code(response: &str) -> String {
    let trimmed = response.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_owned();
        }
    }
    trimmed.to_owned()
}
