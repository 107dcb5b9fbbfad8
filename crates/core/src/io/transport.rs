use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::error::TrySendError;

use super::output::{OutputMessage, OutputSender};
use crate::types::Destination;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("outbound channel full")]
    Full,
    #[error("outbound channel closed")]
    Closed,
}

/// Conversation transport: best-effort delivery of a notice into a thread.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn notify(&self, destination: &Destination, text: &str) -> Result<(), TransportError>;
}

/// Deliver and log on failure. Delivery is never retried.
pub async fn notify_best_effort(transport: &dyn Transport, destination: &Destination, text: &str) {
    if let Err(e) = transport.notify(destination, text).await {
        tracing::warn!(destination = %destination, error = %e, "notification dropped");
    }
}

/// Transport backed by the output channel. Never waits for capacity.
pub struct ChannelTransport {
    tx: OutputSender,
}

impl ChannelTransport {
    pub fn new(tx: OutputSender) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn notify(&self, destination: &Destination, text: &str) -> Result<(), TransportError> {
        self.tx
            .try_send(OutputMessage::new(destination.clone(), text))
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::Full,
                TrySendError::Closed(_) => TransportError::Closed,
            })
    }
}

/// In-memory transport that records every notice. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutputMessage>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutputMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn texts_for(&self, destination: &Destination) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| &m.destination == destination)
            .map(|m| m.content.clone())
            .collect()
    }

    /// Number of recorded notices whose text contains `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.content.contains(needle))
            .count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn notify(&self, destination: &Destination, text: &str) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(OutputMessage::new(destination.clone(), text));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::output;

    #[tokio::test]
    async fn channel_transport_reports_full_and_closed() {
        let (tx, rx) = output::channel(1);
        let t = ChannelTransport::new(tx);
        let dest = Destination::new("C", "T");
        t.notify(&dest, "one").await.unwrap();
        assert!(matches!(t.notify(&dest, "two").await, Err(TransportError::Full)));
        drop(rx);
        assert!(matches!(t.notify(&dest, "three").await, Err(TransportError::Closed)));
        // Failures are swallowed by the best-effort helper.
        notify_best_effort(&t, &dest, "four").await;
    }

    #[tokio::test]
    async fn recording_transport_filters_by_destination() {
        let t = RecordingTransport::new();
        let a = Destination::new("C", "a");
        let b = Destination::new("C", "b");
        t.notify(&a, "hello a").await.unwrap();
        t.notify(&b, "hello b").await.unwrap();
        assert_eq!(t.texts_for(&a), vec!["hello a".to_owned()]);
        assert_eq!(t.count_containing("hello"), 2);
        t.clear();
        assert!(t.messages().is_empty());
    }
}
