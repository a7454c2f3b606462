//! Walks one conversation through tool approval, human handoff and a
//! scheduled task, using a scripted model.
//!
//! Run with `cargo run --example handoff`.

use agent_handoff::llm::{ChatRequest, LlmProvider, StopReason, StreamBox, StreamDelta, Usage};
use agent_handoff::{
    ChatConfig, ChatEvent, ChatStream, ConversationId, DynamicToolName, HandoffState, Tool,
    ToolContext, ToolRegistry, ToolResolution, ToolResult, ToolTier,
};
use anyhow::Result;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays canned steps, one per model request.
struct ScriptedModel {
    steps: Mutex<VecDeque<Vec<StreamDelta>>>,
}

impl ScriptedModel {
    fn new() -> Self {
        let text = |text: &str| {
            vec![
                StreamDelta::TextDelta {
                    delta: text.to_string(),
                    block_index: 0,
                },
                StreamDelta::Usage(Usage {
                    input_tokens: 40,
                    output_tokens: 12,
                }),
                StreamDelta::Done {
                    stop_reason: Some(StopReason::EndTurn),
                },
            ]
        };
        let weather_call = vec![
            StreamDelta::ToolUseStart {
                id: "call_weather".to_string(),
                name: "getWeatherInformation".to_string(),
                block_index: 0,
            },
            StreamDelta::ToolInputDelta {
                id: "call_weather".to_string(),
                delta: json!({"city": "Lima"}).to_string(),
                block_index: 0,
            },
            StreamDelta::Done {
                stop_reason: Some(StopReason::ToolUse),
            },
        ];

        Self {
            steps: Mutex::new(VecDeque::from([
                weather_call,
                text("It is sunny in Lima today."),
                // Nothing to say to the handoff request.
                vec![StreamDelta::Done {
                    stop_reason: Some(StopReason::EndTurn),
                }],
            ])),
        }
    }
}

impl LlmProvider for ScriptedModel {
    fn chat_stream(&self, _request: ChatRequest) -> StreamBox<'_> {
        let step = self
            .steps
            .lock()
            .ok()
            .and_then(|mut steps| steps.pop_front())
            .unwrap_or_default();
        Box::pin(futures::stream::iter(step.into_iter().map(Ok)))
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn provider(&self) -> &'static str {
        "demo"
    }
}

struct WeatherTool;

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
        let city = input.get("city").and_then(Value::as_str).unwrap_or("unknown");
        Ok(ToolResult::success(format!("The weather in {city} is sunny")))
    }
}

/// Print a turn's events and return the message id of a pending approval.
async fn print_turn(label: &str, stream: ChatStream) -> Option<String> {
    println!("--- {label}");
    let mut pending = None;
    for event in stream.collect_events().await {
        match &event {
            ChatEvent::TextDelta { delta, .. } => println!("  model: {delta}"),
            ChatEvent::ToolApprovalRequired {
                message_id,
                tool_name,
                input,
                ..
            } => {
                println!("  approval needed: {tool_name} {input}");
                pending = Some(message_id.clone());
            }
            ChatEvent::Finish { reason, .. } => println!("  finished: {reason:?}"),
            other => println!("  {other:?}"),
        }
    }
    pending
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut tools = ToolRegistry::new();
    tools.register(WeatherTool);
    let chat = agent_handoff::builder(())
        .provider(ScriptedModel::new())
        .tools(tools)
        .config(ChatConfig::default())
        .build();
    let conversation = ConversationId::from_name("demo");

    // The weather tool waits for the user's approval.
    let (_, stream) = chat
        .submit_user_message(&conversation, "What's the weather in Lima?")
        .await?;
    if let Some(message_id) = print_turn("weather question", stream).await {
        chat.resolve_tool_call(&conversation, &message_id, "call_weather", ToolResolution::Approve)
            .await?;
        let stream = chat.continue_conversation(&conversation).await?;
        print_turn("after approval", stream).await;
    }

    // An operator takes over; the model stays quiet.
    let (user_id, stream) = chat
        .submit_user_message(&conversation, "Can I talk to a person?")
        .await?;
    print_turn("handoff request", stream).await;
    chat.mark_waiting_for_human(&conversation, &user_id).await?;

    let (task_message_id, stream) = chat
        .on_scheduled_task_fired(&conversation, "check on the customer")
        .await?;
    print_turn("scheduled task while handed off", stream).await;
    println!("handoff state: {:?}", chat.handoff_state(&conversation).await?);

    chat.submit_manual_assistant_message(
        &conversation,
        "Hi, this is Ana from support.",
        Some(&task_message_id),
    )
    .await?;
    assert_eq!(chat.handoff_state(&conversation).await?, HandoffState::Normal);

    println!("--- transcript");
    for message in chat.list_messages(&conversation).await? {
        println!("  {:?}: {}", message.role, message.text());
    }
    Ok(())
}
