use crate::gate::ToolCallGate;
use crate::hooks::{ChatHooks, DefaultHooks};
use crate::llm::LlmProvider;
use crate::registry::ConversationRegistry;
use crate::stores::{InMemoryStore, MessageStore, ToolExecutionStore};
use crate::tools::ToolRegistry;
use crate::types::ChatConfig;
use std::sync::Arc;

use super::ChatOrchestrator;

/// Builder for constructing a `ChatOrchestrator`.
///
/// # Example
///
/// ```ignore
/// let chat = agent_handoff::builder(app)
///     .provider(my_provider)
///     .tools(my_tools)
///     .config(ChatConfig::default().with_confirmation_tool("getWeatherInformation"))
///     .build();
/// ```
pub struct ChatOrchestratorBuilder<Ctx, P, H, M> {
    app: Ctx,
    provider: Option<P>,
    tools: Option<ToolRegistry<Ctx>>,
    hooks: Option<H>,
    message_store: Option<M>,
    config: Option<ChatConfig>,
    execution_store: Option<Arc<dyn ToolExecutionStore>>,
}

impl<Ctx> ChatOrchestratorBuilder<Ctx, (), (), ()> {
    /// Create a new builder with no components set.
    #[must_use]
    pub fn new(app: Ctx) -> Self {
        Self {
            app,
            provider: None,
            tools: None,
            hooks: None,
            message_store: None,
            config: None,
            execution_store: None,
        }
    }
}

impl<Ctx, P, H, M> ChatOrchestratorBuilder<Ctx, P, H, M> {
    /// Set the LLM provider.
    #[must_use]
    pub fn provider<P2: LlmProvider>(self, provider: P2) -> ChatOrchestratorBuilder<Ctx, P2, H, M> {
        ChatOrchestratorBuilder {
            app: self.app,
            provider: Some(provider),
            tools: self.tools,
            hooks: self.hooks,
            message_store: self.message_store,
            config: self.config,
            execution_store: self.execution_store,
        }
    }

    /// Set the tool registry.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry<Ctx>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set the lifecycle hooks.
    #[must_use]
    pub fn hooks<H2: ChatHooks>(self, hooks: H2) -> ChatOrchestratorBuilder<Ctx, P, H2, M> {
        ChatOrchestratorBuilder {
            app: self.app,
            provider: self.provider,
            tools: self.tools,
            hooks: Some(hooks),
            message_store: self.message_store,
            config: self.config,
            execution_store: self.execution_store,
        }
    }

    /// Set the message store.
    #[must_use]
    pub fn message_store<M2: MessageStore>(
        self,
        message_store: M2,
    ) -> ChatOrchestratorBuilder<Ctx, P, H, M2> {
        ChatOrchestratorBuilder {
            app: self.app,
            provider: self.provider,
            tools: self.tools,
            hooks: self.hooks,
            message_store: Some(message_store),
            config: self.config,
            execution_store: self.execution_store,
        }
    }

    /// Set the execution store for tool idempotency.
    ///
    /// When set, tool executions are tracked using a write-ahead pattern:
    /// 1. Record execution intent BEFORE calling the tool
    /// 2. Update with result AFTER completion
    /// 3. On retry or after an interrupted turn, reuse the completed result
    #[must_use]
    pub fn execution_store(mut self, store: impl ToolExecutionStore + 'static) -> Self {
        self.execution_store = Some(Arc::new(store));
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: ChatConfig) -> Self {
        self.config = Some(config);
        self
    }
}

fn confirmation_gate<Ctx: Send + Sync + 'static>(
    tools: &ToolRegistry<Ctx>,
    config: &ChatConfig,
) -> ToolCallGate {
    ToolCallGate::new(
        tools
            .confirmation_tools()
            .into_iter()
            .chain(config.confirmation_tools.iter().cloned()),
    )
}

impl<Ctx, P> ChatOrchestratorBuilder<Ctx, P, (), ()>
where
    Ctx: Clone + Send + Sync + 'static,
    P: LlmProvider + 'static,
{
    /// Build with default hooks and an in-memory message store.
    ///
    /// # Panics
    ///
    /// Panics if a provider has not been set.
    #[must_use]
    pub fn build(self) -> ChatOrchestrator<Ctx, P, DefaultHooks, InMemoryStore> {
        let provider = self.provider.expect("provider is required");
        let tools = self.tools.unwrap_or_default();
        let config = self.config.unwrap_or_default();
        let gate = confirmation_gate(&tools, &config);

        ChatOrchestrator {
            provider: Arc::new(provider),
            tools: Arc::new(tools),
            hooks: Arc::new(DefaultHooks),
            message_store: Arc::new(InMemoryStore::new()),
            execution_store: self.execution_store,
            config: Arc::new(config),
            gate: Arc::new(gate),
            conversations: Arc::new(ConversationRegistry::new()),
            app: self.app,
        }
    }
}

impl<Ctx, P, H, M> ChatOrchestratorBuilder<Ctx, P, H, M>
where
    Ctx: Clone + Send + Sync + 'static,
    P: LlmProvider + 'static,
    H: ChatHooks + 'static,
    M: MessageStore + 'static,
{
    /// Build with custom hooks and message store.
    ///
    /// # Panics
    ///
    /// Panics if any of `provider`, `hooks` or `message_store` has not been
    /// set.
    #[must_use]
    pub fn build_with_stores(self) -> ChatOrchestrator<Ctx, P, H, M> {
        let provider = self.provider.expect("provider is required");
        let hooks = self
            .hooks
            .expect("hooks is required when using build_with_stores");
        let message_store = self
            .message_store
            .expect("message_store is required when using build_with_stores");
        let tools = self.tools.unwrap_or_default();
        let config = self.config.unwrap_or_default();
        let gate = confirmation_gate(&tools, &config);

        ChatOrchestrator {
            provider: Arc::new(provider),
            tools: Arc::new(tools),
            hooks: Arc::new(hooks),
            message_store: Arc::new(message_store),
            execution_store: self.execution_store,
            config: Arc::new(config),
            gate: Arc::new(gate),
            conversations: Arc::new(ConversationRegistry::new()),
            app: self.app,
        }
    }
}
