//! Storage traits for the conversation log and tool executions.
//!
//! - [`MessageStore`] - Durable, strictly ordered message log per conversation
//! - [`ToolExecutionStore`] - Write-ahead records for tool idempotency
//!
//! # Built-in Implementations
//!
//! [`InMemoryStore`] is suitable for testing and single-process deployments.
//! [`JsonFileStore`] keeps one JSON document per conversation on disk and
//! swaps it atomically on every write. For production, implement the traits
//! over your database.

use crate::message::UiMessage;
use crate::types::{ConversationId, ToolExecution};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;

/// Ordered message log. Implementations must persist before returning; a
/// returned error means nothing was written.
///
/// The orchestrator serializes all writes for one conversation, so
/// implementations only need to be safe across conversations.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to the tail of the conversation's log and return
    /// the updated sequence.
    ///
    /// # Errors
    /// Returns an error if the message cannot be stored.
    async fn append(
        &self,
        conversation_id: &ConversationId,
        message: UiMessage,
    ) -> Result<Vec<UiMessage>>;

    /// Get all messages for a conversation, oldest first.
    ///
    /// # Errors
    /// Returns an error if the log cannot be read.
    async fn list(&self, conversation_id: &ConversationId) -> Result<Vec<UiMessage>>;

    /// Atomically replace the whole sequence. Used to apply patches as a
    /// copy-on-write swap of the log snapshot.
    ///
    /// # Errors
    /// Returns an error if the log cannot be replaced.
    async fn replace_all(
        &self,
        conversation_id: &ConversationId,
        messages: Vec<UiMessage>,
    ) -> Result<()>;

    /// Get the message count for a conversation
    ///
    /// # Errors
    /// Returns an error if the count cannot be retrieved.
    async fn count(&self, conversation_id: &ConversationId) -> Result<usize> {
        Ok(self.list(conversation_id).await?.len())
    }
}

/// Store for tracking tool executions (idempotency).
///
/// 1. Record execution intent BEFORE calling the tool (`record_execution`)
/// 2. Update with result AFTER completion (`update_execution`)
/// 3. On retry, check if execution exists and return cached result
#[async_trait]
pub trait ToolExecutionStore: Send + Sync {
    /// Get an execution by `tool_call_id`.
    ///
    /// # Errors
    /// Returns an error if the execution cannot be retrieved.
    async fn get_execution(&self, tool_call_id: &str) -> Result<Option<ToolExecution>>;

    /// Record a new execution (write-ahead, before calling tool).
    ///
    /// # Errors
    /// Returns an error if the execution cannot be recorded.
    async fn record_execution(&self, execution: ToolExecution) -> Result<()>;

    /// Update an existing execution after completion.
    ///
    /// # Errors
    /// Returns an error if the execution cannot be updated.
    async fn update_execution(&self, execution: ToolExecution) -> Result<()>;
}

/// In-memory implementation of `MessageStore`.
#[derive(Default)]
pub struct InMemoryStore {
    messages: RwLock<HashMap<String, Vec<UiMessage>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append(
        &self,
        conversation_id: &ConversationId,
        message: UiMessage,
    ) -> Result<Vec<UiMessage>> {
        let mut messages = self.messages.write().ok().context("lock poisoned")?;
        let log = messages.entry(conversation_id.0.clone()).or_default();
        log.push(message);
        Ok(log.clone())
    }

    async fn list(&self, conversation_id: &ConversationId) -> Result<Vec<UiMessage>> {
        let messages = self.messages.read().ok().context("lock poisoned")?;
        Ok(messages.get(&conversation_id.0).cloned().unwrap_or_default())
    }

    async fn replace_all(
        &self,
        conversation_id: &ConversationId,
        messages: Vec<UiMessage>,
    ) -> Result<()> {
        self.messages
            .write()
            .ok()
            .context("lock poisoned")?
            .insert(conversation_id.0.clone(), messages);
        Ok(())
    }
}

/// File-backed `MessageStore`: one JSON array per conversation under `root`.
///
/// Every write goes to a temporary file that is synced and then renamed over
/// the previous log, so a failed write leaves the old log intact.
pub struct JsonFileStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn path_for(&self, conversation_id: &ConversationId) -> PathBuf {
        self.root
            .join(format!("{}.json", encode_file_stem(conversation_id.as_str())))
    }

    async fn read_log(path: &Path) -> Result<Vec<UiMessage>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt conversation log {}", path.display())),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(error) => {
                Err(error).with_context(|| format!("failed to read {}", path.display()))
            }
        }
    }

    async fn write_log(&self, path: &Path, messages: &[UiMessage]) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create {}", self.root.display()))?;

        let bytes = serde_json::to_vec(messages)?;
        let tmp_path = path.with_extension("json.tmp");
        let written: Result<()> = async {
            let mut file = tokio::fs::File::create(&tmp_path)
                .await
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, path)
                .await
                .with_context(|| format!("failed to replace {}", path.display()))
        }
        .await;

        if written.is_err() {
            // Best effort; report the write error.
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        written
    }
}

#[async_trait]
impl MessageStore for JsonFileStore {
    async fn append(
        &self,
        conversation_id: &ConversationId,
        message: UiMessage,
    ) -> Result<Vec<UiMessage>> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(conversation_id);
        let mut messages = Self::read_log(&path).await?;
        messages.push(message);
        self.write_log(&path, &messages).await?;
        Ok(messages)
    }

    async fn list(&self, conversation_id: &ConversationId) -> Result<Vec<UiMessage>> {
        Self::read_log(&self.path_for(conversation_id)).await
    }

    async fn replace_all(
        &self,
        conversation_id: &ConversationId,
        messages: Vec<UiMessage>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_log(&self.path_for(conversation_id), &messages)
            .await
    }
}

/// Keep `[A-Za-z0-9_-]`, percent-encode every other byte.
fn encode_file_stem(id: &str) -> String {
    let mut encoded = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

/// In-memory implementation of `ToolExecutionStore`.
///
/// Useful for testing and simple use cases where durability is not required.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    /// Executions indexed by `tool_call_id`
    executions: RwLock<HashMap<String, ToolExecution>>,
}

impl InMemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolExecutionStore for InMemoryExecutionStore {
    async fn get_execution(&self, tool_call_id: &str) -> Result<Option<ToolExecution>> {
        let executions = self.executions.read().ok().context("lock poisoned")?;
        Ok(executions.get(tool_call_id).cloned())
    }

    async fn record_execution(&self, execution: ToolExecution) -> Result<()> {
        let tool_call_id = execution.tool_call_id.clone();
        self.executions
            .write()
            .ok()
            .context("lock poisoned")?
            .insert(tool_call_id, execution);
        Ok(())
    }

    async fn update_execution(&self, execution: ToolExecution) -> Result<()> {
        self.record_execution(execution).await
    }
}
