use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::context::CallbackContext;
use crate::error::DomainError;
use crate::parser::Outcome;

/// Callback receiving the parsed success payload
pub type SuccessCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// Callback receiving the domain error of a failed request
pub type FailureCallback = Box<dyn FnOnce(DomainError) + Send + 'static>;

/// Callback receiving upload progress reports
pub type ProgressCallback = Box<dyn FnMut(Progress) + Send + 'static>;

/// Identifier assigned to every request at issuance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        RequestId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw identifier
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Upload progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes handed to the transport so far
    pub completed: u64,
    /// Total body size in bytes
    pub total: u64,
}

impl Progress {
    /// Fraction completed in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// Check if the whole body has been sent
    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

enum Phase {
    InFlight,
    /// Completed, but the matching callback has not been attached yet
    Held(Outcome),
    Delivered,
}

struct Slots {
    success: Option<SuccessCallback>,
    failure: Option<FailureCallback>,
    progress: Option<ProgressCallback>,
    cancel: Option<oneshot::Sender<()>>,
    phase: Phase,
}

struct Shared {
    slots: Mutex<Slots>,
    context: CallbackContext,
    finished: watch::Sender<bool>,
}

/// Handle to one issued request.
///
/// Callbacks are attached with [`success`](Self::success),
/// [`failed`](Self::failed) and [`progress`](Self::progress), in any order and
/// at any time. Exactly one of the success or failure callbacks runs, once,
/// on the client's callback context. If the request completes before the
/// matching callback is attached, the outcome is held and delivered as soon
/// as it is. Every callback reference is dropped once the outcome has been
/// delivered.
///
/// Handles are cheap to clone; clones share the same request.
#[derive(Clone)]
pub struct RequestHandle {
    id: RequestId,
    shared: Arc<Shared>,
}

impl RequestHandle {
    pub(crate) fn new(id: RequestId, context: CallbackContext) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            id,
            shared: Arc::new(Shared {
                slots: Mutex::new(Slots {
                    success: None,
                    failure: None,
                    progress: None,
                    cancel: None,
                    phase: Phase::InFlight,
                }),
                context,
                finished,
            }),
        }
    }

    /// Get the request identifier
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Attach the success callback
    pub fn success<F>(self, callback: F) -> Self
    where
        F: FnOnce(Value) + Send + 'static,
    {
        {
            let mut guard = self.lock();
            let slots = &mut *guard;
            match mem::replace(&mut slots.phase, Phase::Delivered) {
                Phase::InFlight => {
                    slots.phase = Phase::InFlight;
                    slots.success = Some(Box::new(callback));
                }
                Phase::Held(Ok(value)) => {
                    self.shared.context.dispatch(move || callback(value));
                }
                other => slots.phase = other,
            }
        }
        self
    }

    /// Attach the failure callback
    pub fn failed<F>(self, callback: F) -> Self
    where
        F: FnOnce(DomainError) + Send + 'static,
    {
        {
            let mut guard = self.lock();
            let slots = &mut *guard;
            match mem::replace(&mut slots.phase, Phase::Delivered) {
                Phase::InFlight => {
                    slots.phase = Phase::InFlight;
                    slots.failure = Some(Box::new(callback));
                }
                Phase::Held(Err(error)) => {
                    self.shared.context.dispatch(move || callback(error));
                }
                other => slots.phase = other,
            }
        }
        self
    }

    /// Attach the progress callback; ignored once the request has completed
    pub fn progress<F>(self, callback: F) -> Self
    where
        F: FnMut(Progress) + Send + 'static,
    {
        {
            let mut slots = self.lock();
            if matches!(slots.phase, Phase::InFlight) {
                slots.progress = Some(Box::new(callback));
            }
        }
        self
    }

    /// Cancel the underlying transport request.
    ///
    /// The request then completes through the failure callback. Does nothing
    /// once the request has completed.
    pub fn cancel(&self) {
        let trigger = self.lock().cancel.take();
        if let Some(trigger) = trigger {
            debug!(request = %self.id, "cancelling request");
            let _ = trigger.send(());
        }
    }

    /// Wait for the outcome instead of attaching callbacks.
    ///
    /// Replaces any success or failure callback attached so far. Yields an
    /// error with code `-1` if the outcome was already handed to a callback.
    pub async fn outcome(self) -> Outcome {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let on_failure = tx.clone();

        let _handle = self
            .success(move |value| send_outcome(&tx, Ok(value)))
            .failed(move |error| send_outcome(&on_failure, Err(error)));

        rx.await.unwrap_or_else(|_| {
            Err(DomainError::new(
                DomainError::UNKNOWN_CODE,
                "request outcome was already delivered",
            ))
        })
    }

    /// Wait until the request has completed and left the task registry
    pub async fn finished(&self) {
        let mut rx = self.shared.finished.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Check if the request has completed and left the task registry
    pub fn is_finished(&self) -> bool {
        *self.shared.finished.borrow()
    }

    pub(crate) fn attach_cancel(&self, trigger: oneshot::Sender<()>) {
        let mut slots = self.lock();
        if matches!(slots.phase, Phase::InFlight) {
            slots.cancel = Some(trigger);
        }
    }

    /// Runs on the callback context once the parser produced an outcome
    pub(crate) fn deliver(&self, outcome: Outcome) {
        let mut slots = self.lock();
        if !matches!(slots.phase, Phase::InFlight) {
            return;
        }

        slots.cancel = None;
        slots.progress = None;
        let success = slots.success.take();
        let failure = slots.failure.take();

        match outcome {
            Ok(value) => match success {
                Some(callback) => {
                    slots.phase = Phase::Delivered;
                    drop(slots);
                    callback(value);
                }
                None => slots.phase = Phase::Held(Ok(value)),
            },
            Err(error) => match failure {
                Some(callback) => {
                    slots.phase = Phase::Delivered;
                    drop(slots);
                    callback(error);
                }
                None => slots.phase = Phase::Held(Err(error)),
            },
        }
    }

    /// Runs on the callback context for every progress report
    pub(crate) fn report_progress(&self, progress: Progress) {
        let callback = self.lock().progress.take();
        if let Some(mut callback) = callback {
            callback(progress);
            let mut slots = self.lock();
            if slots.progress.is_none() && matches!(slots.phase, Phase::InFlight) {
                slots.progress = Some(callback);
            }
        }
    }

    pub(crate) fn mark_finished(&self) {
        self.shared.finished.send_replace(true);
    }

    pub(crate) fn has_callbacks(&self) -> bool {
        let slots = self.lock();
        slots.success.is_some() || slots.failure.is_some() || slots.progress.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.shared
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn send_outcome(slot: &Mutex<Option<oneshot::Sender<Outcome>>>, outcome: Outcome) {
    let sender = slot
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(outcome);
    }
}

impl PartialEq for RequestHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RequestHandle {}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.lock().phase {
            Phase::InFlight => "in-flight",
            Phase::Held(_) => "held",
            Phase::Delivered => "delivered",
        };
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("phase", &phase)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle() -> RequestHandle {
        let context = CallbackContext::spawn("handle-tests").unwrap();
        RequestHandle::new(RequestId::next(), context)
    }

    fn record<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<Vec<T>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (seen.clone(), seen)
    }

    #[tokio::test]
    async fn test_success_delivered_once_and_callbacks_cleared() {
        let handle = handle();
        let (successes, sink) = record::<Value>();
        let (failures, fail_sink) = record::<DomainError>();

        let handle = handle
            .success(move |v| sink.lock().unwrap().push(v))
            .failed(move |e| fail_sink.lock().unwrap().push(e));
        assert!(handle.has_callbacks());

        handle.deliver(Ok(json!({"x": 1})));
        handle.deliver(Err(DomainError::new(1, "late")));

        assert_eq!(*successes.lock().unwrap(), vec![json!({"x": 1})]);
        assert!(failures.lock().unwrap().is_empty());
        assert!(!handle.has_callbacks());
    }

    #[tokio::test]
    async fn test_outcome_held_until_callback_attached() {
        let handle = handle();
        handle.deliver(Err(DomainError::new(404, "missing")));

        let (failures, sink) = record::<DomainError>();
        let handle = handle.failed(move |e| sink.lock().unwrap().push(e));
        handle.shared.context.flush().await;

        assert_eq!(*failures.lock().unwrap(), vec![DomainError::new(404, "missing")]);

        let (again, sink) = record::<DomainError>();
        let handle = handle.failed(move |e| sink.lock().unwrap().push(e));
        handle.shared.context.flush().await;
        assert!(again.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_callback_never_fires() {
        let handle = handle();
        handle.deliver(Ok(json!(1)));

        let (failures, sink) = record::<DomainError>();
        let handle = handle.failed(move |e| sink.lock().unwrap().push(e));
        handle.shared.context.flush().await;

        assert!(failures.lock().unwrap().is_empty());
        assert!(!handle.has_callbacks());
    }

    #[tokio::test]
    async fn test_cancel_after_delivery_is_noop() {
        let handle = handle();
        let (tx, mut rx) = oneshot::channel();
        handle.attach_cancel(tx);

        handle.deliver(Ok(json!(null)));
        handle.cancel();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_fires_trigger_once() {
        let handle = handle();
        let (tx, rx) = oneshot::channel();
        handle.attach_cancel(tx);

        handle.cancel();
        handle.cancel();

        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_progress_reports_until_completion() {
        let handle = handle();
        let (reports, sink) = record::<Progress>();
        let handle = handle.progress(move |p| sink.lock().unwrap().push(p));

        handle.report_progress(Progress { completed: 5, total: 10 });
        handle.deliver(Ok(json!(null)));
        handle.report_progress(Progress { completed: 10, total: 10 });

        assert_eq!(*reports.lock().unwrap(), vec![Progress { completed: 5, total: 10 }]);
    }

    #[tokio::test]
    async fn test_outcome_future() {
        let handle = handle();
        let waiter = tokio::spawn(handle.clone().outcome());
        tokio::task::yield_now().await;

        handle.deliver(Ok(json!("done")));
        assert_eq!(waiter.await.unwrap(), Ok(json!("done")));

        assert!(handle.outcome().await.is_err());
    }

    #[tokio::test]
    async fn test_finished_signal() {
        let handle = handle();
        assert!(!handle.is_finished());

        handle.mark_finished();
        handle.finished().await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_identity_equality() {
        let a = handle();
        let b = handle();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(Progress { completed: 1, total: 4 }.fraction(), 0.25);
        assert_eq!(Progress { completed: 0, total: 0 }.fraction(), 1.0);
        assert!(Progress { completed: 4, total: 4 }.is_complete());
    }
}
