//! Tool definition and registry.
//!
//! - [`Tool`] trait - Define tools the model can call
//! - [`ToolName`] trait - Marker trait for strongly-typed tool names
//! - [`DynamicToolName`] - Tool names created at runtime
//! - [`ToolRegistry`] - Collection of available tools
//! - [`ToolContext`] - Context passed to tool execution
//!
//! # Implementing a Tool
//!
//! ```ignore
//! use agent_handoff::{Tool, ToolContext, ToolResult, ToolTier, DynamicToolName};
//!
//! struct WeatherTool;
//!
//! impl Tool<AppCtx> for WeatherTool {
//!     type Name = DynamicToolName;
//!
//!     fn name(&self) -> DynamicToolName { DynamicToolName::new("getWeatherInformation") }
//!     fn display_name(&self) -> &'static str { "Weather" }
//!     fn description(&self) -> &'static str { "Show the weather in a given city" }
//!     fn input_schema(&self) -> Value { json!({ "type": "object" }) }
//!     fn tier(&self) -> ToolTier { ToolTier::Confirm }
//!
//!     async fn execute(&self, ctx: &ToolContext<AppCtx>, input: Value) -> Result<ToolResult> {
//!         Ok(ToolResult::success("sunny"))
//!     }
//! }
//! ```

use crate::llm;
use crate::types::{ConversationId, ToolResult, ToolTier};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Marker trait for tool names.
///
/// The string sent to the model is the serde serialization of the name, so
/// an enum with `#[serde(rename_all = "camelCase")]` yields names like
/// `getWeatherInformation`.
pub trait ToolName: Send + Sync + Serialize + DeserializeOwned + 'static {}

/// String representation of a tool name via serde.
#[must_use]
pub fn tool_name_to_string<N: ToolName>(name: &N) -> String {
    match serde_json::to_value(name) {
        Ok(Value::String(name)) => name,
        Ok(other) => other.to_string(),
        Err(error) => {
            log::warn!("Tool name failed to serialize: {error}");
            String::new()
        }
    }
}

/// Parse a tool name from string via serde.
///
/// # Errors
/// Returns error if the string doesn't match a valid tool name.
pub fn tool_name_from_str<N: ToolName>(s: &str) -> Result<N, serde_json::Error> {
    serde_json::from_value(Value::String(s.to_string()))
}

/// Dynamic tool name for runtime-created tools.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicToolName(String);

impl DynamicToolName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ToolName for DynamicToolName {}

/// Context passed to tool execution
pub struct ToolContext<Ctx> {
    /// Application-specific context (e.g., a scheduler handle, db connection)
    pub app: Ctx,
    /// Conversation the call belongs to
    pub conversation_id: ConversationId,
    /// Tool-specific metadata
    pub metadata: HashMap<String, Value>,
}

impl<Ctx> ToolContext<Ctx> {
    #[must_use]
    pub fn new(app: Ctx, conversation_id: ConversationId) -> Self {
        Self {
            app,
            conversation_id,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Definition of a tool that can be called by the model.
///
/// Uses native async functions in traits; implementors do not need
/// `async_trait`.
pub trait Tool<Ctx>: Send + Sync {
    /// The type of name for this tool.
    type Name: ToolName;

    /// Returns the tool's strongly-typed name.
    fn name(&self) -> Self::Name;

    /// Human-readable display name for UI.
    fn display_name(&self) -> &'static str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &'static str;

    /// JSON schema for the tool's input parameters.
    fn input_schema(&self) -> Value;

    /// Permission tier. [`ToolTier::Confirm`] tools never run without an
    /// explicit external decision.
    fn tier(&self) -> ToolTier {
        ToolTier::Observe
    }

    /// Execute the tool with the given input.
    ///
    /// # Errors
    /// Returns an error if tool execution fails.
    fn execute(
        &self,
        ctx: &ToolContext<Ctx>,
        input: Value,
    ) -> impl Future<Output = Result<ToolResult>> + Send;
}

/// Type-erased tool trait for registry storage.
#[async_trait]
pub trait ErasedTool<Ctx>: Send + Sync {
    fn name_str(&self) -> &str;
    fn display_name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    fn tier(&self) -> ToolTier;
    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult>;
}

/// Wrapper that erases the Name associated type from a Tool.
struct ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    inner: T,
    name_cache: String,
    _marker: PhantomData<fn() -> Ctx>,
}

impl<T, Ctx> ToolWrapper<T, Ctx>
where
    T: Tool<Ctx>,
{
    fn new(tool: T) -> Self {
        let name_cache = tool_name_to_string(&tool.name());
        Self {
            inner: tool,
            name_cache,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, Ctx> ErasedTool<Ctx> for ToolWrapper<T, Ctx>
where
    T: Tool<Ctx> + 'static,
    Ctx: Send + Sync + 'static,
{
    fn name_str(&self) -> &str {
        &self.name_cache
    }

    fn display_name(&self) -> &'static str {
        self.inner.display_name()
    }

    fn description(&self) -> &'static str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    fn tier(&self) -> ToolTier {
        self.inner.tier()
    }

    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        self.inner.execute(ctx, input).await
    }
}

/// Registry of the tools the model may call, keyed by name.
pub struct ToolRegistry<Ctx> {
    tools: BTreeMap<String, Arc<dyn ErasedTool<Ctx>>>,
}

impl<Ctx> Clone for ToolRegistry<Ctx> {
    fn clone(&self) -> Self {
        Self {
            tools: self.tools.clone(),
        }
    }
}

impl<Ctx: Send + Sync + 'static> Default for ToolRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Send + Sync + 'static> ToolRegistry<Ctx> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. A later registration with the same name replaces
    /// the earlier one.
    pub fn register<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool<Ctx> + 'static,
    {
        let wrapper = ToolWrapper::new(tool);
        let name = wrapper.name_str().to_string();
        self.tools.insert(name, Arc::new(wrapper));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedTool<Ctx>>> {
        self.tools.get(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn ErasedTool<Ctx>>> {
        self.tools.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names of all tools registered with [`ToolTier::Confirm`].
    #[must_use]
    pub fn confirmation_tools(&self) -> HashSet<String> {
        self.tools
            .values()
            .filter(|tool| tool.tier() == ToolTier::Confirm)
            .map(|tool| tool.name_str().to_string())
            .collect()
    }

    /// Tool schemas advertised to the model, ordered by name.
    #[must_use]
    pub fn to_llm_tools(&self) -> Vec<llm::Tool> {
        self.tools
            .values()
            .map(|tool| llm::Tool {
                name: tool.name_str().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }
}
