//! Tools that let the model manage scheduled tasks of its own conversation.
//!
//! All three run automatically. They reach the scheduler through the
//! application context, which must implement [`HasTaskQueue`].

use super::{HasTaskQueue, ScheduledTask};
use crate::tools::{DynamicToolName, Tool, ToolContext};
use crate::types::ToolResult;
use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

fn task_json(task: &ScheduledTask) -> Value {
    json!({
        "id": task.id,
        "description": task.description,
        "runAt": task.run_at.format(&Rfc3339).unwrap_or_default(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleInput {
    description: String,
    delay_in_seconds: Option<u64>,
    date: Option<String>,
}

/// `scheduleTask`: run a task once, after a delay or at a given time.
pub struct ScheduleTaskTool;

impl<Ctx: HasTaskQueue + Send + Sync> Tool<Ctx> for ScheduleTaskTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("scheduleTask")
    }

    fn display_name(&self) -> &'static str {
        "Schedule Task"
    }

    fn description(&self) -> &'static str {
        "Schedule a task to run once in this conversation, either after delayInSeconds or at an RFC 3339 date"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": { "type": "string" },
                "delayInSeconds": { "type": "integer", "minimum": 0 },
                "date": { "type": "string", "format": "date-time" }
            },
            "required": ["description"]
        })
    }

    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let input: ScheduleInput = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(e) => return Ok(ToolResult::error(format!("Invalid input: {e}"))),
        };
        if input.description.trim().is_empty() {
            return Ok(ToolResult::error("A task description is required"));
        }

        let queue = ctx.app.task_queue();
        let conversation_id = ctx.conversation_id.clone();
        let task = match (input.delay_in_seconds, input.date) {
            (Some(seconds), None) => {
                queue
                    .schedule_in(conversation_id, input.description, Duration::from_secs(seconds))
                    .await
            }
            (None, Some(date)) => match OffsetDateTime::parse(&date, &Rfc3339) {
                Ok(run_at) => queue.schedule_at(conversation_id, input.description, run_at).await,
                Err(e) => return Ok(ToolResult::error(format!("Invalid date {date}: {e}"))),
            },
            _ => {
                return Ok(ToolResult::error(
                    "Provide exactly one of delayInSeconds or date",
                ));
            }
        };

        let run_at = task.run_at.format(&Rfc3339).unwrap_or_default();
        Ok(ToolResult::success_with_data(
            format!("Task {} scheduled for {run_at}", task.id),
            task_json(&task),
        ))
    }
}

/// `getScheduledTasks`: pending tasks of this conversation, soonest first.
pub struct ListScheduledTasksTool;

impl<Ctx: HasTaskQueue + Send + Sync> Tool<Ctx> for ListScheduledTasksTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("getScheduledTasks")
    }

    fn display_name(&self) -> &'static str {
        "Scheduled Tasks"
    }

    fn description(&self) -> &'static str {
        "List the tasks scheduled in this conversation"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, ctx: &ToolContext<Ctx>, _input: Value) -> Result<ToolResult> {
        let tasks = ctx.app.task_queue().list(Some(&ctx.conversation_id)).await;
        if tasks.is_empty() {
            return Ok(ToolResult::success("No scheduled tasks found"));
        }
        let listed: Vec<Value> = tasks.iter().map(task_json).collect();
        Ok(ToolResult::success_with_data(
            format!("{} scheduled task(s)", tasks.len()),
            Value::Array(listed),
        ))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelInput {
    task_id: String,
}

/// `cancelScheduledTask`: cancel a pending task of this conversation.
pub struct CancelScheduledTaskTool;

impl<Ctx: HasTaskQueue + Send + Sync> Tool<Ctx> for CancelScheduledTaskTool {
    type Name = DynamicToolName;

    fn name(&self) -> DynamicToolName {
        DynamicToolName::new("cancelScheduledTask")
    }

    fn display_name(&self) -> &'static str {
        "Cancel Scheduled Task"
    }

    fn description(&self) -> &'static str {
        "Cancel a scheduled task by its id"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "taskId": { "type": "string" } },
            "required": ["taskId"]
        })
    }

    async fn execute(&self, ctx: &ToolContext<Ctx>, input: Value) -> Result<ToolResult> {
        let CancelInput { task_id } = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(e) => return Ok(ToolResult::error(format!("Invalid input: {e}"))),
        };

        let queue = ctx.app.task_queue();
        // Tasks of other conversations are invisible here.
        let owned = queue
            .list(Some(&ctx.conversation_id))
            .await
            .iter()
            .any(|task| task.id == task_id);
        if owned && queue.cancel(&task_id).await {
            Ok(ToolResult::success(format!("Task {task_id} cancelled")))
        } else {
            Ok(ToolResult::error(format!("No pending task with id {task_id}")))
        }
    }
}
