use tokio::sync::mpsc;

use crate::types::{Destination, InboundMessage};

/// Input channel sender. The chat front-end pushes messages here.
pub type InputSender = mpsc::Sender<InboundMessage>;
/// Input channel receiver. The service consumes from here.
pub type InputReceiver = mpsc::Receiver<InboundMessage>;

/// Create an input channel with the given buffer size.
pub fn channel(buffer: usize) -> (InputSender, InputReceiver) {
    mpsc::channel(buffer)
}

/// Submit user text posted in `destination`.
pub async fn submit_text(
    tx: &InputSender,
    destination: Destination,
    text: impl Into<String>,
) -> Result<(), mpsc::error::SendError<InboundMessage>> {
    tx.send(InboundMessage::new(destination, text)).await
}
