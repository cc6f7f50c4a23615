use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, trace, warn};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serial execution context for callbacks.
///
/// Every completion, progress report, registry removal and reachability
/// update is funnelled through one of these, so user callbacks never run
/// concurrently with each other no matter which I/O thread finished the
/// request. Jobs run in the order they were dispatched.
///
/// Cloning is cheap; all clones feed the same queue. The draining task
/// stops once every clone has been dropped.
#[derive(Clone)]
pub struct CallbackContext {
    label: Arc<str>,
    sender: mpsc::UnboundedSender<Job>,
}

impl CallbackContext {
    /// Spawn a new context on the current Tokio runtime
    pub fn spawn(label: impl Into<String>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("a callback context must be created inside a Tokio runtime"))?;
        Ok(Self::spawn_on(&runtime, label))
    }

    /// Spawn a new context on the given runtime
    pub fn spawn_on(runtime: &tokio::runtime::Handle, label: impl Into<String>) -> Self {
        let label: Arc<str> = Arc::from(label.into());
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let task_label = label.clone();
        runtime.spawn(async move {
            while let Some(job) = receiver.recv().await {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!(context = %task_label, "callback panicked");
                }
            }
            trace!(context = %task_label, "callback context drained");
        });

        Self { label, sender }
    }

    /// Queue a job for execution on this context
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(job)).is_err() {
            warn!(context = %self.label, "callback context is closed, dropping job");
        }
    }

    /// Wait until every job dispatched before this call has run
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.dispatch(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    /// Get the context label
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackContext")
            .field("label", &self.label)
            .finish()
    }
}
