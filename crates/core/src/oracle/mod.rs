//! External language-model collaborators: classification, payload generation and review,
//! and conversational replies. All are fallible; callers decide the fallback.

pub mod llm;
pub mod prompt;

use crate::persona::Persona;
use crate::types::{Classification, Destination};
use snipgate_llm::provider::LlmError;

pub use llm::{LlmOracle, extract_code};

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("malformed oracle reply: {0}")]
    Malformed(String),
    #[error("oracle returned an empty reply")]
    Empty,
}

#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, destination: &Destination) -> Result<Classification, OracleError>;
}

#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Produce an executable payload for a natural-language request.
    async fn generate_payload(&self, request: &str) -> Result<String, OracleError>;

    /// Describe what `payload` does, for the human deciding whether to run it.
    async fn review_payload(&self, payload: &str) -> Result<String, OracleError>;
}

#[async_trait::async_trait]
pub trait Responder: Send + Sync {
    async fn ask_the_world(
        &self,
        text: &str,
        destination: &Destination,
        persona: &Persona,
    ) -> Result<String, OracleError>;

    async fn ask_the_bot(&self, text: &str) -> Result<String, OracleError>;
}
