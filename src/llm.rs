//! Model provider boundary.
//!
//! The orchestrator treats the language model as an opaque capability: given
//! the cleaned conversation history and the available tool schemas, a
//! provider yields a stream of [`StreamDelta`] events.

pub mod streaming;
pub mod types;

pub use streaming::{StreamAccumulator, StreamBox, StreamDelta};
pub use types::*;

pub trait LlmProvider: Send + Sync {
    /// Start a streaming completion for `request`.
    fn chat_stream(&self, request: ChatRequest) -> StreamBox<'_>;
    fn model(&self) -> &str;
    fn provider(&self) -> &'static str;
}
