//! Agent Handoff - A conversation orchestrator for LLM chat agents.
//!
//! This crate routes a conversation between a language model, a set of
//! tools and human operators:
//! - Tool calls gated on explicit approval for sensitive tools
//! - Human handoff through a per-message `waitingForHuman` flag
//! - Streaming event-based turns that can be aborted mid-generation
//! - Scheduled tasks injected as ordinary turns
//!
//! # Example
//!
//! ```ignore
//! use agent_handoff::{ChatConfig, ConversationId, ToolRegistry, ToolResolution};
//!
//! let mut tools = ToolRegistry::new();
//! tools.register(WeatherTool).register(LocalTimeTool);
//!
//! let chat = agent_handoff::builder(())
//!     .provider(my_provider)
//!     .tools(tools)
//!     .config(ChatConfig::default())
//!     .build();
//!
//! let conversation = ConversationId::from_name("support-42");
//! let (_, mut events) = chat.submit_user_message(&conversation, "Weather in Lima?").await?;
//! while let Some(envelope) = events.recv().await {
//!     println!("{:?}", envelope.event);
//! }
//!
//! // Later, once the user approved the pending call:
//! chat.resolve_tool_call(&conversation, &message_id, &tool_call_id, ToolResolution::Approve)
//!     .await?;
//! let events = chat.continue_conversation(&conversation).await?;
//! ```

#![forbid(unsafe_code)]

mod composer;
mod error;
mod events;
pub mod gate;
pub mod handoff;
mod hooks;
pub mod llm;
pub mod message;
mod orchestrator;
pub mod registry;
pub mod schedule;
mod stores;
mod tools;
mod types;

pub use composer::{ChatStream, StreamComposer};
pub use error::ChatError;
pub use events::{ChatEvent, ChatEventEnvelope, FinishReason, SequenceCounter};
pub use gate::ToolCallGate;
pub use handoff::{HandoffState, PendingMessage};
pub use hooks::{ChatHooks, DefaultHooks, LoggingHooks, ToolDecision};
pub use llm::LlmProvider;
pub use message::{MessagePart, ToolInvocation, UiMessage};
pub use orchestrator::{
    ChatOrchestrator, ChatOrchestratorBuilder, DECLINED_OUTPUT, INTERRUPTED_OUTPUT,
    ResolveOutcome, ToolResolution, builder,
};
pub use schedule::{
    CancelScheduledTaskTool, HasTaskQueue, ListScheduledTasksTool, ScheduleBridge,
    ScheduleTaskTool, ScheduledTask, TaskQueue, TaskScheduler,
};
pub use stores::{
    InMemoryExecutionStore, InMemoryStore, JsonFileStore, MessageStore, ToolExecutionStore,
};
pub use tools::{DynamicToolName, ErasedTool, Tool, ToolContext, ToolName, ToolRegistry};
pub use types::{
    ChatConfig, ConversationId, ExecutionStatus, RetryConfig, TokenUsage, ToolExecution,
    ToolResult, ToolTier,
};
