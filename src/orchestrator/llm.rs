use super::ChatOrchestrator;
use super::helpers::calculate_backoff_delay;
use super::types::{StepOutcome, StreamAttempt, StreamError};
use crate::composer::StreamComposer;
use crate::events::ChatEvent;
use crate::hooks::ChatHooks;
use crate::llm::{ChatRequest, LlmProvider, StreamAccumulator, StreamDelta};
use crate::stores::MessageStore;
use futures::StreamExt;
use log::{error, warn};
use tokio::time::sleep;

impl<Ctx, P, H, M> ChatOrchestrator<Ctx, P, H, M>
where
    Ctx: Clone + Send + Sync + 'static,
    P: LlmProvider + 'static,
    H: ChatHooks + 'static,
    M: MessageStore + 'static,
{
    /// Stream one model step, emitting text deltas as they arrive.
    ///
    /// A recoverable failure is retried with backoff only while nothing of
    /// the step has reached the client, so a retry never repeats a token.
    pub(super) async fn stream_step(
        &self,
        request: &ChatRequest,
        composer: &StreamComposer<H>,
        message_id: &str,
    ) -> StepOutcome {
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            let (partial, error, delivered) =
                match self.process_stream(request, composer, message_id).await {
                    StreamAttempt::Completed(accumulator) => {
                        return StepOutcome::Completed(accumulator);
                    }
                    StreamAttempt::Aborted(accumulator) => {
                        return StepOutcome::Aborted(accumulator);
                    }
                    StreamAttempt::Failed {
                        partial,
                        error,
                        delivered,
                    } => (partial, error, delivered),
                };

            let msg = match error {
                StreamError::Fatal(msg) => {
                    error!("Streaming error (non-recoverable): {msg}");
                    return StepOutcome::Failed {
                        partial,
                        message: format!("Streaming error: {msg}"),
                        recoverable: false,
                    };
                }
                StreamError::Recoverable(msg) if delivered => {
                    error!("Streaming error after partial output, not retrying: {msg}");
                    return StepOutcome::Failed {
                        partial,
                        message: format!("Streaming error: {msg}"),
                        recoverable: true,
                    };
                }
                StreamError::Recoverable(msg) => msg,
            };

            attempt += 1;
            if attempt > retry.max_retries {
                error!("Streaming error after {} retries: {msg}", retry.max_retries);
                return StepOutcome::Failed {
                    partial,
                    message: format!(
                        "Streaming error after {} retries: {msg}",
                        retry.max_retries
                    ),
                    recoverable: true,
                };
            }

            let delay = calculate_backoff_delay(attempt, retry);
            warn!(
                "Streaming error, retrying (attempt={attempt}, delay_ms={}, error={msg})",
                delay.as_millis()
            );

            tokio::select! {
                () = composer.cancel_token().cancelled() => {
                    return StepOutcome::Aborted(StreamAccumulator::new());
                }
                () = sleep(delay) => {}
            }
        }
    }

    /// Consume a single streaming attempt.
    async fn process_stream(
        &self,
        request: &ChatRequest,
        composer: &StreamComposer<H>,
        message_id: &str,
    ) -> StreamAttempt {
        let mut stream = self.provider.chat_stream(request.clone());
        let mut accumulator = StreamAccumulator::new();
        let mut delivered = false;
        let mut delta_count: u64 = 0;

        log::debug!("Starting to consume LLM stream (model={})", self.provider.model());

        loop {
            let next = tokio::select! {
                biased;
                () = composer.cancel_token().cancelled() => {
                    log::info!("Turn aborted mid-stream at delta_count={delta_count}");
                    return StreamAttempt::Aborted(accumulator);
                }
                next = stream.next() => next,
            };
            let Some(result) = next else {
                break;
            };

            match result {
                Ok(delta) => {
                    delta_count += 1;
                    accumulator.apply(&delta);
                    match &delta {
                        StreamDelta::TextDelta { delta, .. } => {
                            composer
                                .emit(ChatEvent::text_delta(message_id, delta.clone()))
                                .await;
                            delivered = true;
                        }
                        StreamDelta::Error {
                            message,
                            recoverable,
                        } => {
                            warn!(
                                "Stream error received delta_count={delta_count} message={message} recoverable={recoverable}"
                            );
                            let error = if *recoverable {
                                StreamError::Recoverable(message.clone())
                            } else {
                                StreamError::Fatal(message.clone())
                            };
                            return StreamAttempt::Failed {
                                partial: accumulator,
                                error,
                                delivered,
                            };
                        }
                        // Handled by the accumulator
                        StreamDelta::Done { .. }
                        | StreamDelta::Usage(_)
                        | StreamDelta::ToolUseStart { .. }
                        | StreamDelta::ToolInputDelta { .. } => {}
                    }
                }
                Err(e) => {
                    error!("Stream iteration error delta_count={delta_count} error={e}");
                    return StreamAttempt::Failed {
                        partial: accumulator,
                        error: StreamError::Recoverable(format!("Stream error: {e}")),
                        delivered,
                    };
                }
            }
        }

        log::debug!(
            "LLM stream completed delta_count={delta_count} stop_reason={:?}",
            accumulator.stop_reason()
        );
        StreamAttempt::Completed(accumulator)
    }
}
