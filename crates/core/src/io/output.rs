use tokio::sync::mpsc;

use crate::types::Destination;

/// An outbound notice to deliver into a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMessage {
    pub destination: Destination,
    pub content: String,
}

impl OutputMessage {
    pub fn new(destination: Destination, content: impl Into<String>) -> Self {
        Self {
            destination,
            content: content.into(),
        }
    }
}

/// Output channel sender. The service pushes notices here.
pub type OutputSender = mpsc::Sender<OutputMessage>;
/// Output channel receiver. The chat front-end consumes from here.
pub type OutputReceiver = mpsc::Receiver<OutputMessage>;

/// Create an output channel with the given buffer size.
pub fn channel(buffer: usize) -> (OutputSender, OutputReceiver) {
    mpsc::channel(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_send_recv() {
        let (tx, mut rx) = channel(4);
        let dest = Destination::new("C", "T");
        tx.send(OutputMessage::new(dest.clone(), "test")).await.unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.content, "test");
        assert_eq!(msg.destination, dest);
    }
}
