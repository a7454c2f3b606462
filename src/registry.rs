//! Conversation handles.
//!
//! Each conversation id maps to exactly one live [`ConversationHandle`]. The
//! handle owns the two per-conversation locks:
//!
//! - the turn lock, held for the whole of a model turn, so at most one turn
//!   is in flight;
//! - the write lock, held for every read-modify-write of the log, so
//!   patches from operators and tool resolutions never interleave with a
//!   turn's appends.
//!
//! Lock order is always turn lock, then write lock.
//!
//! Handles nobody holds are dropped by [`ConversationRegistry::release`];
//! the next caller gets a fresh one.

use crate::types::ConversationId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

pub struct ConversationHandle {
    id: ConversationId,
    turn_lock: Arc<Mutex<()>>,
    write_lock: Mutex<()>,
}

impl ConversationHandle {
    fn new(id: ConversationId) -> Self {
        Self {
            id,
            turn_lock: Arc::new(Mutex::new(())),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Wait until no other turn is running for this conversation.
    pub async fn lock_turn(&self) -> MutexGuard<'_, ()> {
        self.turn_lock.lock().await
    }

    /// Like [`Self::lock_turn`], but the guard can move into the task that
    /// runs the turn.
    pub async fn lock_turn_owned(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.turn_lock).lock_owned().await
    }

    /// Serialize a read-modify-write of the log.
    pub async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Whether a turn currently holds the turn lock.
    #[must_use]
    pub fn is_turn_running(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }
}

#[derive(Default)]
pub struct ConversationRegistry {
    handles: Mutex<HashMap<ConversationId, Arc<ConversationHandle>>>,
}

impl ConversationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle for `id`, created on first use.
    pub async fn handle(&self, id: &ConversationId) -> Arc<ConversationHandle> {
        let mut handles = self.handles.lock().await;
        Arc::clone(
            handles
                .entry(id.clone())
                .or_insert_with(|| Arc::new(ConversationHandle::new(id.clone()))),
        )
    }

    /// Give back a handle. Its entry is removed once no other caller holds
    /// it.
    pub async fn release(&self, handle: Arc<ConversationHandle>) {
        let mut handles = self.handles.lock().await;
        let id = handle.id().clone();
        drop(handle);
        if handles
            .get(&id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            handles.remove(&id);
        }
    }

    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_name_yields_same_handle() {
        let registry = ConversationRegistry::new();
        let a = registry.handle(&ConversationId::from_name("support-42")).await;
        let b = registry.handle(&ConversationId::from_name("support-42")).await;
        let c = registry.handle(&ConversationId::from_name("support-43")).await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn released_handles_are_pruned_once_unused() {
        let registry = ConversationRegistry::new();
        let id = ConversationId::from_name("support-42");
        let first = registry.handle(&id).await;
        let second = registry.handle(&id).await;

        registry.release(first).await;
        assert_eq!(registry.len().await, 1);

        let held = Arc::clone(&second);
        registry.release(second).await;
        assert_eq!(registry.len().await, 1);

        registry.release(held).await;
        assert!(registry.is_empty().await);

        let fresh = registry.handle(&id).await;
        assert_eq!(fresh.id(), &id);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn turn_lock_admits_one_turn() {
        let registry = ConversationRegistry::new();
        let handle = registry.handle(&ConversationId::new()).await;

        let guard = handle.lock_turn().await;
        assert!(handle.is_turn_running());
        drop(guard);
        assert!(!handle.is_turn_running());
    }

    #[tokio::test]
    async fn write_lock_is_independent_of_turn_lock() {
        let registry = ConversationRegistry::new();
        let handle = registry.handle(&ConversationId::new()).await;

        let _turn = handle.lock_turn().await;
        let write = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            handle.lock_writes(),
        )
        .await;
        assert!(write.is_ok());
    }
}
