use crate::hooks::{ChatHooks, ToolDecision};
use crate::llm::{ChatRequest, LlmProvider, StopReason, StreamBox, StreamDelta, Usage};
use crate::tools::{DynamicToolName, Tool, ToolContext};
use crate::types::{ToolResult, ToolTier};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ===================
// Mock LLM Provider
// ===================

/// One scripted model step.
pub enum MockStep {
    /// Yield these items, then end the stream.
    Deltas(Vec<Result<StreamDelta>>),
    /// Yield these deltas, then never finish.
    Hanging(Vec<StreamDelta>),
}

#[derive(Default)]
struct MockState {
    steps: Mutex<VecDeque<MockStep>>,
    requests: Mutex<Vec<ChatRequest>>,
    call_count: AtomicUsize,
}

/// Scripted provider. Clones share the script and the recorded requests.
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<MockState>,
}

impl MockProvider {
    pub fn new(steps: Vec<MockStep>) -> Self {
        Self {
            state: Arc::new(MockState {
                steps: Mutex::new(steps.into()),
                ..MockState::default()
            }),
        }
    }

    fn usage() -> StreamDelta {
        StreamDelta::Usage(Usage {
            input_tokens: 10,
            output_tokens: 20,
        })
    }

    pub fn text(text: &str) -> MockStep {
        MockStep::Deltas(vec![
            Ok(StreamDelta::TextDelta {
                delta: text.to_string(),
                block_index: 0,
            }),
            Ok(Self::usage()),
            Ok(StreamDelta::Done {
                stop_reason: Some(StopReason::EndTurn),
            }),
        ])
    }

    /// A step that produces no content at all.
    pub fn empty() -> MockStep {
        MockStep::Deltas(vec![
            Ok(Self::usage()),
            Ok(StreamDelta::Done {
                stop_reason: Some(StopReason::EndTurn),
            }),
        ])
    }

    pub fn tool_use(id: &str, name: &str, input: &Value) -> MockStep {
        MockStep::Deltas(vec![
            Ok(StreamDelta::ToolUseStart {
                id: id.to_string(),
                name: name.to_string(),
                block_index: 0,
            }),
            Ok(StreamDelta::ToolInputDelta {
                id: id.to_string(),
                delta: input.to_string(),
                block_index: 0,
            }),
            Ok(Self::usage()),
            Ok(StreamDelta::Done {
                stop_reason: Some(StopReason::ToolUse),
            }),
        ])
    }

    pub fn error(message: &str, recoverable: bool) -> MockStep {
        MockStep::Deltas(vec![Ok(StreamDelta::Error {
            message: message.to_string(),
            recoverable,
        })])
    }

    pub fn text_then_error(text: &str, message: &str) -> MockStep {
        MockStep::Deltas(vec![
            Ok(StreamDelta::TextDelta {
                delta: text.to_string(),
                block_index: 0,
            }),
            Ok(StreamDelta::Error {
                message: message.to_string(),
                recoverable: true,
            }),
        ])
    }

    pub fn hanging_text(text: &str) -> MockStep {
        MockStep::Hanging(vec![StreamDelta::TextDelta {
            delta: text.to_string(),
            block_index: 0,
        }])
    }

    pub fn call_count(&self) -> usize {
        self.state.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.state.requests.lock().expect("lock poisoned").clone()
    }
}

impl LlmProvider for MockProvider {
    fn chat_stream(&self, request: ChatRequest) -> StreamBox<'_> {
        self.state.call_count.fetch_add(1, Ordering::SeqCst);
        self.state
            .requests
            .lock()
            .expect("lock poisoned")
            .push(request);

        let step = self
            .state
            .steps
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Self::text("Done"));

        match step {
            MockStep::Deltas(items) => Box::pin(futures::stream::iter(items)),
            MockStep::Hanging(deltas) => Box::pin(
                futures::stream::iter(deltas.into_iter().map(Ok))
                    .chain(futures::stream::pending()),
            ),
        }
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

// ===================
// Test Tools
// ===================

/// Automatic tool.
pub struct LocalTimeTool;

impl Tool<()> for LocalTimeTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("getLocalTime")
    }

    fn display_name(&self) -> &'static str {
        "Local Time"
    }

    fn description(&self) -> &'static str {
        "Get the local time for a specified location"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "location": { "type": "string" } },
            "required": ["location"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
        Ok(ToolResult::success("10am"))
    }
}

/// Confirmation-required tool that counts its executions.
#[derive(Clone, Default)]
pub struct WeatherTool {
    pub executions: Arc<AtomicUsize>,
}

impl WeatherTool {
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl Tool<()> for WeatherTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("getWeatherInformation")
    }

    fn display_name(&self) -> &'static str {
        "Weather"
    }

    fn description(&self) -> &'static str {
        "Show the weather in a given city to the user"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city"]
        })
    }

    fn tier(&self) -> ToolTier {
        ToolTier::Confirm
    }

    async fn execute(&self, _ctx: &ToolContext<()>, input: Value) -> Result<ToolResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let city = input
            .get("city")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        Ok(ToolResult::success(format!("The weather in {city} is sunny")))
    }
}

/// Automatic tool that never returns in test time.
pub struct SlowTool;

impl Tool<()> for SlowTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("slowLookup")
    }

    fn display_name(&self) -> &'static str {
        "Slow Lookup"
    }

    fn description(&self) -> &'static str {
        "A lookup that takes an hour"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ToolResult::success("finally"))
    }
}

/// Automatic tool that counts its executions.
#[derive(Clone, Default)]
pub struct CountingTool {
    pub executions: Arc<AtomicUsize>,
}

impl Tool<()> for CountingTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("countCalls")
    }

    fn display_name(&self) -> &'static str {
        "Count Calls"
    }

    fn description(&self) -> &'static str {
        "Counts how often it runs"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _ctx: &ToolContext<()>, _input: Value) -> Result<ToolResult> {
        let n = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ToolResult::success(format!("call #{n}")))
    }
}

// ===================
// Test Hooks
// ===================

/// Blocks every automatic tool.
pub struct BlockAllHooks;

#[async_trait]
impl ChatHooks for BlockAllHooks {
    async fn pre_tool_use(&self, tool_name: &str, _input: &Value) -> ToolDecision {
        ToolDecision::Block(format!("{tool_name} is disabled"))
    }
}
