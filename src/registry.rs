use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::handle::{RequestHandle, RequestId};

/// Ordered collection of in-flight requests.
///
/// Entries are keyed by [`RequestId`]; ids grow monotonically, so iteration
/// follows issuance order. The client inserts on issuance and removes from
/// the completion job on the callback context.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<BTreeMap<RequestId, RequestHandle>>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handle
    pub fn insert(&self, handle: RequestHandle) {
        self.lock().insert(handle.id(), handle);
    }

    /// Stop tracking a request, returning its handle if it was present
    pub fn remove(&self, id: RequestId) -> Option<RequestHandle> {
        self.lock().remove(&id)
    }

    /// Check if a request is tracked
    pub fn contains(&self, id: RequestId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Get the handle of a tracked request
    pub fn get(&self, id: RequestId) -> Option<RequestHandle> {
        self.lock().get(&id).cloned()
    }

    /// Get the number of tracked requests
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Get the tracked ids in issuance order
    pub fn ids(&self) -> Vec<RequestId> {
        self.lock().keys().copied().collect()
    }

    /// Get the tracked handles in issuance order
    pub fn snapshot(&self) -> Vec<RequestHandle> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<RequestId, RequestHandle>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallbackContext;

    #[tokio::test]
    async fn test_insert_and_remove() {
        let context = CallbackContext::spawn("registry-tests").unwrap();
        let registry = TaskRegistry::new();
        let first = RequestHandle::new(RequestId::next(), context.clone());
        let second = RequestHandle::new(RequestId::next(), context);

        registry.insert(first.clone());
        registry.insert(second.clone());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![first.id(), second.id()]);

        assert_eq!(registry.remove(first.id()), Some(first.clone()));
        assert!(!registry.contains(first.id()));
        assert!(registry.get(first.id()).is_none());
        assert_eq!(registry.remove(first.id()), None);

        assert_eq!(registry.snapshot(), vec![second.clone()]);
        registry.remove(second.id());
        assert!(registry.is_empty());
    }
}
