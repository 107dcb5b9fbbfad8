use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque conversation locator (channel + thread).
/// Every follow-up message about a proposal is routed here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub channel: String,
    pub thread: String,
}

impl Destination {
    pub fn new(channel: impl Into<String>, thread: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread: thread.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.thread)
    }
}

// ── Snippet lifecycle ──────────────────────────────────────────

/// Decision state of a proposal. `Pending` moves to exactly one terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Pending,
    Confirmed,
    Canceled,
    Expired,
}

/// A generated payload awaiting a human confirm/cancel/extend decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetProposal {
    pub id: Uuid,
    pub payload: String,
    /// Review oracle's description of what the payload claims to do.
    pub summary: String,
    /// The natural-language request that produced the payload.
    pub origin_description: String,
    pub destination: Destination,
    pub created_at: DateTime<Utc>,
    /// Only ever pushed forward.
    pub expires_at: DateTime<Utc>,
    /// Set once by the watchdog, never reset.
    pub alerted: bool,
    pub decision: Decision,
}

impl SnippetProposal {
    /// Build a fresh `Pending` record expiring `expiry_window` after `now`. A window past the
    /// representable range saturates at `DateTime::<Utc>::MAX_UTC`.
    pub fn new(request: ProposalRequest, now: DateTime<Utc>, expiry_window: TimeDelta) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: request.payload,
            summary: request.summary,
            origin_description: request.origin_description,
            destination: request.destination,
            created_at: now,
            expires_at: now.checked_add_signed(expiry_window).unwrap_or(DateTime::<Utc>::MAX_UTC),
            alerted: false,
            decision: Decision::Pending,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.created_at
    }

    /// Strictly past the deadline. A command arriving exactly at `expires_at` still counts.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Input to `LifecycleManager::propose`.
#[derive(Debug, Clone)]
pub struct ProposalRequest {
    pub payload: String,
    pub summary: String,
    pub origin_description: String,
    pub destination: Destination,
}

// ── Routing ────────────────────────────────────────────────────

/// A chat message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub destination: Destination,
    pub user: Option<String>,
    pub text: String,
}

impl InboundMessage {
    pub fn new(destination: Destination, text: impl Into<String>) -> Self {
        Self {
            destination,
            user: None,
            text: text.into(),
        }
    }
}

/// Closed set of request intents the classifier may choose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    /// Ordinary Q&A. Also the fallback whenever classification fails.
    AskTheWorld,
    /// Questions about the assistant itself.
    AskTheBot,
    /// Generate code and propose it for gated execution.
    Coder,
}

impl Intent {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "ASKTHEWORLD" => Some(Self::AskTheWorld),
            "ASKTHEBOT" => Some(Self::AskTheBot),
            "CODER" => Some(Self::Coder),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::AskTheWorld => "ASKTHEWORLD",
            Self::AskTheBot => "ASKTHEBOT",
            Self::Coder => "CODER",
        }
    }
}

/// Classifier verdict for one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    /// Persona to answer with.
    pub role: String,
    /// Free-form extras (`bot_knowledge`, `new_role_prompt`, `role_temperature`, ...).
    pub parameters: serde_json::Value,
}

impl Classification {
    /// The fail-closed verdict: plain conversation with the default persona.
    pub fn fallback() -> Self {
        Self {
            intent: Intent::AskTheWorld,
            role: "default".into(),
            parameters: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
