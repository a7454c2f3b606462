//! Scheduled tasks.
//!
//! A fired task becomes an ordinary turn: the bridge appends the user
//! message `"Running scheduled task: {description}"` and runs the normal turn
//! pipeline, including the handoff check. [`TaskScheduler`] is a minimal
//! in-process one-shot timer that delivers tasks to a [`ScheduleBridge`].
//!
//! The model reaches the scheduler through the tools in [`tools`], which
//! find it in the application context via [`HasTaskQueue`]. Because the
//! orchestrator is both the scheduler's bridge and the owner of those
//! tools, the scheduler is usually created [detached](TaskScheduler::detached)
//! and [attached](TaskScheduler::attach) once the orchestrator exists.

pub mod tools;

pub use tools::{CancelScheduledTaskTool, ListScheduledTasksTool, ScheduleTaskTool};

use crate::composer::ChatStream;
use crate::error::ChatError;
use crate::events::ChatEvent;
use crate::hooks::ChatHooks;
use crate::llm::LlmProvider;
use crate::orchestrator::ChatOrchestrator;
use crate::stores::MessageStore;
use crate::types::ConversationId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Receiver of fired scheduled tasks.
#[async_trait]
pub trait ScheduleBridge: Send + Sync {
    /// Inject the task into its conversation and start a turn for it.
    ///
    /// # Errors
    /// Returns an error if the synthetic message cannot be appended.
    async fn on_scheduled_task_fired(
        &self,
        conversation_id: &ConversationId,
        description: &str,
    ) -> Result<(String, ChatStream), ChatError>;
}

#[async_trait]
impl<Ctx, P, H, M> ScheduleBridge for ChatOrchestrator<Ctx, P, H, M>
where
    Ctx: Clone + Send + Sync + 'static,
    P: LlmProvider + 'static,
    H: ChatHooks + 'static,
    M: MessageStore + 'static,
{
    async fn on_scheduled_task_fired(
        &self,
        conversation_id: &ConversationId,
        description: &str,
    ) -> Result<(String, ChatStream), ChatError> {
        Self::on_scheduled_task_fired(self, conversation_id, description).await
    }
}

/// A one-shot task waiting to fire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub conversation_id: ConversationId,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub run_at: OffsetDateTime,
}

/// Scheduling operations available to tools, independent of the bridge type.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn schedule_at(
        &self,
        conversation_id: ConversationId,
        description: String,
        run_at: OffsetDateTime,
    ) -> ScheduledTask;

    async fn schedule_in(
        &self,
        conversation_id: ConversationId,
        description: String,
        delay: Duration,
    ) -> ScheduledTask;

    async fn list(&self, conversation_id: Option<&ConversationId>) -> Vec<ScheduledTask>;

    async fn cancel(&self, task_id: &str) -> bool;
}

/// Application contexts that carry a [`TaskQueue`].
pub trait HasTaskQueue {
    fn task_queue(&self) -> &dyn TaskQueue;
}

impl HasTaskQueue for Arc<dyn TaskQueue> {
    fn task_queue(&self) -> &dyn TaskQueue {
        self.as_ref()
    }
}

struct Entry {
    task: ScheduledTask,
    cancel: CancellationToken,
}

/// In-process one-shot scheduler.
///
/// Each task gets its own timer; firing removes it from the list before the
/// bridge is called. Turns started by a fired task have no client, so their
/// streams are drained and logged here. Clones share the task list.
pub struct TaskScheduler<B> {
    bridge: Arc<OnceLock<Arc<B>>>,
    tasks: Arc<Mutex<HashMap<String, Entry>>>,
    shutdown: CancellationToken,
}

impl<B> Clone for TaskScheduler<B> {
    fn clone(&self) -> Self {
        Self {
            bridge: Arc::clone(&self.bridge),
            tasks: Arc::clone(&self.tasks),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<B> std::fmt::Debug for TaskScheduler<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<B: ScheduleBridge + 'static> TaskScheduler<B> {
    #[must_use]
    pub fn new(bridge: Arc<B>) -> Self {
        let scheduler = Self::detached();
        scheduler.attach(bridge);
        scheduler
    }

    /// A scheduler without a bridge yet. Tasks can be scheduled right away;
    /// a task that fires before [`Self::attach`] is dropped.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            bridge: Arc::new(OnceLock::new()),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the bridge fired tasks are delivered to. Returns `false` if one
    /// was already attached; the first one stays.
    pub fn attach(&self, bridge: Arc<B>) -> bool {
        let attached = self.bridge.set(bridge).is_ok();
        if !attached {
            tracing::warn!("scheduler bridge already attached, keeping the first one");
        }
        attached
    }

    /// Fire `description` into `conversation_id` at `run_at`. A time in the
    /// past fires immediately.
    pub async fn schedule_at(
        &self,
        conversation_id: ConversationId,
        description: impl Into<String>,
        run_at: OffsetDateTime,
    ) -> ScheduledTask {
        let delay = Duration::try_from(run_at - OffsetDateTime::now_utc()).unwrap_or_default();
        self.schedule(conversation_id, description.into(), run_at, delay)
            .await
    }

    /// Fire `description` into `conversation_id` after `delay`.
    pub async fn schedule_in(
        &self,
        conversation_id: ConversationId,
        description: impl Into<String>,
        delay: Duration,
    ) -> ScheduledTask {
        let run_at = OffsetDateTime::now_utc() + delay;
        self.schedule(conversation_id, description.into(), run_at, delay)
            .await
    }

    async fn schedule(
        &self,
        conversation_id: ConversationId,
        description: String,
        run_at: OffsetDateTime,
        delay: Duration,
    ) -> ScheduledTask {
        let task = ScheduledTask {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id,
            description,
            run_at,
        };
        let cancel = self.shutdown.child_token();

        self.tasks.lock().await.insert(
            task.id.clone(),
            Entry {
                task: task.clone(),
                cancel: cancel.clone(),
            },
        );

        let bridge = Arc::clone(&self.bridge);
        let tasks = Arc::clone(&self.tasks);
        let fired = task.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(task_id = %fired.id, "scheduled task cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    if tasks.lock().await.remove(&fired.id).is_none() {
                        return;
                    }
                    match bridge.get() {
                        Some(bridge) => fire(bridge.as_ref(), &fired).await,
                        None => tracing::error!(
                            task_id = %fired.id,
                            "no bridge attached, dropping scheduled task"
                        ),
                    }
                }
            }
        });

        tracing::info!(
            task_id = %task.id,
            conversation_id = %task.conversation_id,
            delay_secs = delay.as_secs(),
            "task scheduled"
        );
        task
    }

    /// Pending tasks, soonest first, optionally for one conversation.
    pub async fn list(&self, conversation_id: Option<&ConversationId>) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self
            .tasks
            .lock()
            .await
            .values()
            .filter(|entry| conversation_id.is_none_or(|id| entry.task.conversation_id == *id))
            .map(|entry| entry.task.clone())
            .collect();
        tasks.sort_by_key(|task| task.run_at);
        tasks
    }

    /// Cancel a pending task. Returns `false` if it already fired or never
    /// existed.
    pub async fn cancel(&self, task_id: &str) -> bool {
        match self.tasks.lock().await.remove(task_id) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(task_id, "scheduled task cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every pending task.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.lock().await.clear();
    }
}

#[async_trait]
impl<B: ScheduleBridge + 'static> TaskQueue for TaskScheduler<B> {
    async fn schedule_at(
        &self,
        conversation_id: ConversationId,
        description: String,
        run_at: OffsetDateTime,
    ) -> ScheduledTask {
        Self::schedule_at(self, conversation_id, description, run_at).await
    }

    async fn schedule_in(
        &self,
        conversation_id: ConversationId,
        description: String,
        delay: Duration,
    ) -> ScheduledTask {
        Self::schedule_in(self, conversation_id, description, delay).await
    }

    async fn list(&self, conversation_id: Option<&ConversationId>) -> Vec<ScheduledTask> {
        Self::list(self, conversation_id).await
    }

    async fn cancel(&self, task_id: &str) -> bool {
        Self::cancel(self, task_id).await
    }
}

async fn fire<B: ScheduleBridge>(bridge: &B, task: &ScheduledTask) {
    match bridge
        .on_scheduled_task_fired(&task.conversation_id, &task.description)
        .await
    {
        Ok((message_id, stream)) => {
            tracing::info!(task_id = %task.id, %message_id, "scheduled task fired");
            for event in stream.collect_events().await {
                match event {
                    ChatEvent::Finish { reason, .. } => {
                        tracing::info!(task_id = %task.id, ?reason, "scheduled turn finished");
                    }
                    ChatEvent::Error { message, .. } => {
                        tracing::warn!(task_id = %task.id, error = %message, "scheduled turn error");
                    }
                    _ => {}
                }
            }
        }
        Err(e) => {
            tracing::error!(task_id = %task.id, error = %e, "failed to deliver scheduled task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::StreamComposer;
    use crate::events::FinishReason;
    use crate::hooks::DefaultHooks;
    use crate::types::TokenUsage;

    #[derive(Default)]
    struct RecordingBridge {
        fired: Mutex<Vec<(ConversationId, String)>>,
    }

    #[async_trait]
    impl ScheduleBridge for RecordingBridge {
        async fn on_scheduled_task_fired(
            &self,
            conversation_id: &ConversationId,
            description: &str,
        ) -> Result<(String, ChatStream), ChatError> {
            self.fired
                .lock()
                .await
                .push((conversation_id.clone(), description.to_string()));
            let (composer, stream) = StreamComposer::channel(4, Arc::new(DefaultHooks));
            composer.finish(FinishReason::Stop, TokenUsage::default()).await;
            Ok(("msg_1".to_string(), stream))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn task_fires_after_delay() {
        let bridge = Arc::new(RecordingBridge::default());
        let scheduler = TaskScheduler::new(Arc::clone(&bridge));
        let conversation = ConversationId::from_name("reminders");

        scheduler
            .schedule_in(conversation.clone(), "send reminder", Duration::from_secs(60))
            .await;
        assert_eq!(scheduler.list(None).await.len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        let fired = bridge.fired.lock().await.clone();
        assert_eq!(fired, vec![(conversation, "send reminder".to_string())]);
        assert!(scheduler.list(None).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_fires() {
        let bridge = Arc::new(RecordingBridge::default());
        let scheduler = TaskScheduler::new(Arc::clone(&bridge));

        let task = scheduler
            .schedule_in(ConversationId::new(), "ping", Duration::from_secs(10))
            .await;
        assert!(scheduler.cancel(&task.id).await);
        assert!(!scheduler.cancel(&task.id).await);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(bridge.fired.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn detached_scheduler_delivers_after_attach() {
        let scheduler = TaskScheduler::<RecordingBridge>::detached();
        let early = scheduler
            .schedule_in(ConversationId::new(), "too early", Duration::from_secs(5))
            .await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert!(scheduler.list(None).await.iter().all(|task| task.id != early.id));

        let bridge = Arc::new(RecordingBridge::default());
        assert!(scheduler.attach(Arc::clone(&bridge)));
        assert!(!scheduler.attach(Arc::new(RecordingBridge::default())));

        let queue: Arc<dyn TaskQueue> = Arc::new(scheduler.clone());
        queue
            .schedule_in(ConversationId::from_name("late"), "on time".into(), Duration::from_secs(5))
            .await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        let fired = bridge.fired.lock().await.clone();
        assert_eq!(
            fired,
            vec![(ConversationId::from_name("late"), "on time".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn list_filters_by_conversation_and_sorts_by_time() {
        let scheduler = TaskScheduler::new(Arc::new(RecordingBridge::default()));
        let a = ConversationId::from_name("a");
        let b = ConversationId::from_name("b");

        scheduler
            .schedule_in(a.clone(), "later", Duration::from_secs(300))
            .await;
        scheduler
            .schedule_in(b, "other", Duration::from_secs(100))
            .await;
        scheduler
            .schedule_in(a.clone(), "sooner", Duration::from_secs(200))
            .await;

        let for_a: Vec<_> = scheduler
            .list(Some(&a))
            .await
            .into_iter()
            .map(|task| task.description)
            .collect();
        assert_eq!(for_a, vec!["sooner", "later"]);
        assert_eq!(scheduler.list(None).await.len(), 3);

        scheduler.shutdown().await;
        assert!(scheduler.list(None).await.is_empty());
    }
}
