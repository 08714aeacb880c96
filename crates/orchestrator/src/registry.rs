//! In-process map from live operation ids to their cancellation tokens.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use common::OperationId;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Entry {
    token: CancellationToken,
    reason: Option<String>,
}

/// Registry of cancel handles for tasks running in this process.
///
/// Every token is a child of one root token, so [`CancelRegistry::shutdown`]
/// interrupts all live tasks at once. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancelRegistry {
    root: CancellationToken,
    entries: Arc<RwLock<HashMap<OperationId, Entry>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cancel handle for `id`.
    ///
    /// Returns `None` if `id` already has a live entry.
    pub fn register(&self, id: OperationId) -> Option<CancellationToken> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&id) {
            return None;
        }
        let token = self.root.child_token();
        entries.insert(
            id,
            Entry {
                token: token.clone(),
                reason: None,
            },
        );
        Some(token)
    }

    /// Records `reason` and cancels the task for `id`.
    ///
    /// Returns false if no live task is registered.
    pub fn cancel(&self, id: OperationId, reason: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(&id) {
            Some(entry) => {
                entry.reason.get_or_insert_with(|| reason.to_string());
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// The operator-supplied reason, if `id` was cancelled through [`Self::cancel`].
    pub fn reason(&self, id: OperationId) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&id).and_then(|entry| entry.reason.clone())
    }

    pub fn remove(&self, id: OperationId) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels the root token and with it every registered task.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }
}
