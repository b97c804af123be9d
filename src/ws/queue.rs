use std::collections::VecDeque;

use futures::{Sink, SinkExt as _};
use tokio_tungstenite::tungstenite::Message;

use super::message::OutboundMessage;

/// FIFO buffer for messages that could not be sent immediately.
///
/// Unbounded, no deduplication: a message enqueued twice is sent twice. Under a long
/// disconnection the queue grows with every `send`.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<OutboundMessage>,
}

impl OutboundQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, message: OutboundMessage) {
        self.messages.push_back(message);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Send queued messages in order until the queue is empty or the sink fails.
    ///
    /// On failure the message that failed stays at the head of the queue, followed by
    /// everything behind it, and the error is returned. Returns the number of messages sent.
    pub async fn flush<S>(&mut self, sink: &mut S) -> Result<usize, S::Error>
    where
        S: Sink<Message> + Unpin,
    {
        let mut sent = 0_usize;
        while let Some(message) = self.messages.pop_front() {
            if let Err(e) = sink.send(message.to_frame()).await {
                self.messages.push_front(message);
                return Err(e);
            }
            sent += 1;
        }

        Ok(sent)
    }
}
