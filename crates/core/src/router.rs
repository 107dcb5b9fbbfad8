use std::sync::Arc;

use uuid::Uuid;

use crate::io::transport::{Transport, notify_best_effort};
use crate::oracle::{Classifier, Generator, Responder};
use crate::persona::PersonaRegistry;
use crate::snippet::{AdmissionError, CommandOutcome, LifecycleManager, SnippetCommand};
use crate::types::{Classification, Destination, InboundMessage, Intent, ProposalRequest};

const ANSWER_FAILED: &str = "Sorry, I couldn't come up with an answer right now.";

/// What `route` did with a message. All user-visible results have already been sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Ignored,
    Command(CommandOutcome),
    Proposed(Uuid),
    Rejected(AdmissionError),
    GenerationFailed,
    Answered(Intent),
    AnswerFailed(Intent),
}

/// Dispatches inbound messages: lifecycle keywords first, then classification.
pub struct RequestRouter {
    lifecycle: Arc<LifecycleManager>,
    classifier: Arc<dyn Classifier>,
    generator: Arc<dyn Generator>,
    responder: Arc<dyn Responder>,
    personas: Arc<PersonaRegistry>,
    transport: Arc<dyn Transport>,
}

impl RequestRouter {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        classifier: Arc<dyn Classifier>,
        generator: Arc<dyn Generator>,
        responder: Arc<dyn Responder>,
        personas: Arc<PersonaRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            lifecycle,
            classifier,
            generator,
            responder,
            personas,
            transport,
        }
    }

    pub async fn route(&self, message: InboundMessage) -> RouteOutcome {
        let text = message.text.trim();
        let dest = &message.destination;
        if text.is_empty() {
            return RouteOutcome::Ignored;
        }

        // Reserved keywords never reach the classifier.
        if let Some(command) = SnippetCommand::parse(text) {
            return RouteOutcome::Command(self.lifecycle.handle_command(dest, command).await);
        }

        let classification = match self.classifier.classify(text, dest).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(destination = %dest, error = %e, "classifier failed, using fallback");
                Classification::fallback()
            }
        };
        tracing::info!(
            destination = %dest,
            user = message.user.as_deref().unwrap_or("-"),
            intent = classification.intent.label(),
            role = %classification.role,
            "message classified"
        );

        self.personas
            .register_from_hint(&classification.role, &classification.parameters);

        match classification.intent {
            Intent::Coder => self.propose_snippet(text, dest, &classification).await,
            Intent::AskTheBot => {
                let reply = self.responder.ask_the_bot(text).await;
                self.answer(Intent::AskTheBot, dest, reply).await
            }
            Intent::AskTheWorld => {
                let persona = self.personas.resolve(&classification.role);
                let reply = self.responder.ask_the_world(text, dest, &persona).await;
                self.answer(Intent::AskTheWorld, dest, reply).await
            }
        }
    }

    async fn propose_snippet(&self, text: &str, dest: &Destination, classification: &Classification) -> RouteOutcome {
        if let Some(existing) = self.lifecycle.store().pending_for(dest) {
            let err = AdmissionError::AlreadyPending { existing: existing.id };
            self.notify(
                dest,
                &format!(
                    "Snippet ID={} is still awaiting a decision in this thread. \
                     Reply `confirm`, `cancel` or `extend` before asking for another.",
                    existing.id
                ),
            )
            .await;
            return RouteOutcome::Rejected(err);
        }

        let request = match classification.parameter_str("bot_knowledge") {
            Some(knowledge) => format!("{text}\n\n[Bot Knowledge]: {knowledge}"),
            None => text.to_owned(),
        };

        let payload = match self.generator.generate_payload(&request).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(destination = %dest, error = %e, "snippet generation failed");
                self.notify(dest, &format!("Could not generate a snippet: {e}")).await;
                return RouteOutcome::GenerationFailed;
            }
        };
        let summary = match self.generator.review_payload(&payload).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(destination = %dest, error = %e, "snippet review failed");
                self.notify(dest, &format!("Could not review the generated snippet: {e}")).await;
                return RouteOutcome::GenerationFailed;
            }
        };

        let proposal = ProposalRequest {
            payload,
            summary,
            origin_description: text.to_owned(),
            destination: dest.clone(),
        };
        match self.lifecycle.propose(proposal).await {
            Ok(id) => RouteOutcome::Proposed(id),
            Err(e) => {
                self.notify(dest, &format!("Snippet rejected: {e}.")).await;
                RouteOutcome::Rejected(e)
            }
        }
    }

    async fn answer<E: std::fmt::Display>(
        &self,
        intent: Intent,
        dest: &Destination,
        reply: Result<String, E>,
    ) -> RouteOutcome {
        match reply {
            Ok(text) => {
                self.notify(dest, &text).await;
                RouteOutcome::Answered(intent)
            }
            Err(e) => {
                tracing::warn!(destination = %dest, intent = intent.label(), error = %e, "answer failed");
                self.notify(dest, ANSWER_FAILED).await;
                RouteOutcome::AnswerFailed(intent)
            }
        }
    }

    async fn notify(&self, dest: &Destination, text: &str) {
        notify_best_effort(self.transport.as_ref(), dest, text).await;
    }
}
