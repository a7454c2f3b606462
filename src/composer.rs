//! Ordered event stream for a single turn.
//!
//! A [`StreamComposer`] is the only writer of a turn's channel. Every event
//! goes through [`StreamComposer::emit`], which runs the `on_event` hook,
//! stamps the next sequence number and hands the envelope to the client's
//! [`ChatStream`].

use crate::events::{ChatEvent, ChatEventEnvelope, FinishReason, SequenceCounter};
use crate::hooks::ChatHooks;
use crate::types::TokenUsage;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Client side of a turn.
///
/// Dropping the stream does not stop the turn; call [`ChatStream::abort`]
/// to cancel generation.
pub struct ChatStream {
    rx: mpsc::Receiver<ChatEventEnvelope>,
    cancel: CancellationToken,
}

impl ChatStream {
    /// Receive the next event, or `None` once the turn has finished.
    pub async fn recv(&mut self) -> Option<ChatEventEnvelope> {
        self.rx.recv().await
    }

    /// Cancel the turn. Fragments already complete stay in the log; the
    /// stream ends with `Finish { reason: Aborted }`.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// A token that aborts this turn when cancelled.
    #[must_use]
    pub fn abort_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the stream, returning the events in order.
    pub async fn collect_events(mut self) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(envelope) = self.rx.recv().await {
            events.push(envelope.event);
        }
        events
    }
}

impl Stream for ChatStream {
    type Item = ChatEventEnvelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Writer side of a turn.
pub struct StreamComposer<H> {
    tx: mpsc::Sender<ChatEventEnvelope>,
    seq: SequenceCounter,
    hooks: Arc<H>,
    cancel: CancellationToken,
}

impl<H: ChatHooks> StreamComposer<H> {
    /// Open a turn channel with room for `buffer` undelivered events.
    #[must_use]
    pub fn channel(buffer: usize, hooks: Arc<H>) -> (Self, ChatStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        let composer = Self {
            tx,
            seq: SequenceCounter::new(),
            hooks,
            cancel: cancel.clone(),
        };
        (composer, ChatStream { rx, cancel })
    }

    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send an event to the client.
    ///
    /// Tries a non-blocking send first. When the channel is full it waits up
    /// to 30 seconds for the consumer; a closed or stuck consumer is logged
    /// and the turn carries on, since the log is the source of truth.
    pub async fn emit(&self, event: ChatEvent) {
        self.hooks.on_event(&event).await;

        let envelope = ChatEventEnvelope::wrap(event, &self.seq);

        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                log::debug!("Event channel full, waiting for consumer...");
                match tokio::time::timeout(SEND_TIMEOUT, self.tx.send(envelope)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        log::warn!("Event channel closed while sending - consumer disconnected");
                    }
                    Err(_) => {
                        log::error!("Timeout waiting to send event - consumer may be deadlocked");
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Event channel closed - consumer disconnected");
            }
        }
    }

    /// Emit the terminal event.
    pub async fn finish(&self, reason: FinishReason, usage: TokenUsage) {
        self.emit(ChatEvent::finish(reason, usage)).await;
    }

    /// The whole stream of a turn suppressed by a human handoff.
    pub async fn placeholder(&self) {
        self.finish(FinishReason::WaitingForHuman, TokenUsage::default())
            .await;
    }
}
