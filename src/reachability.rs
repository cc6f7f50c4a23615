use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::context::CallbackContext;
use crate::error::{Error, Result};

/// Network connectivity as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkStatus {
    /// It is unknown whether the network is reachable
    #[default]
    Unknown,
    /// The network is not reachable
    NotReachable,
    /// Reachable over Ethernet or WiFi
    EthernetOrWiFi,
    /// Reachable over a cellular connection
    Cellular,
}

impl NetworkStatus {
    /// Check if the network is reachable at all
    pub fn is_reachable(&self) -> bool {
        matches!(self, NetworkStatus::EthernetOrWiFi | NetworkStatus::Cellular)
    }
}

/// Link type reported by an observer for a reachable network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    EthernetOrWiFi,
    Cellular,
}

/// Classification reported by a [`ReachabilityObserver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    NotReachable,
    Unknown,
    Reachable(ConnectionType),
}

impl From<Reachability> for NetworkStatus {
    fn from(reachability: Reachability) -> Self {
        match reachability {
            Reachability::NotReachable => NetworkStatus::NotReachable,
            Reachability::Unknown => NetworkStatus::Unknown,
            Reachability::Reachable(ConnectionType::EthernetOrWiFi) => NetworkStatus::EthernetOrWiFi,
            Reachability::Reachable(ConnectionType::Cellular) => NetworkStatus::Cellular,
        }
    }
}

/// Callback an observer invokes on every reachability transition
pub type ReachabilityListener = Arc<dyn Fn(Reachability) + Send + Sync>;

/// Source of connectivity changes
pub trait ReachabilityObserver: Send + Sync {
    /// Begin reporting transitions to `listener`
    fn start_listening(&self, listener: ReachabilityListener) -> Result<()>;

    /// Stop reporting transitions
    fn stop_listening(&self);
}

/// Tracks the current [`NetworkStatus`] and broadcasts every change.
///
/// Updates are applied on the callback context. Notifications carry no
/// payload; receivers read [`status`](Self::status) again.
pub struct ReachabilityMonitor {
    observer: Option<Arc<dyn ReachabilityObserver>>,
    status: Arc<RwLock<NetworkStatus>>,
    notifier: broadcast::Sender<()>,
    listening: Mutex<bool>,
    context: CallbackContext,
}

impl ReachabilityMonitor {
    /// Create a monitor around an optional observer
    pub fn new(observer: Option<Arc<dyn ReachabilityObserver>>, context: CallbackContext) -> Self {
        let (notifier, _) = broadcast::channel(16);
        Self {
            observer,
            status: Arc::new(RwLock::new(NetworkStatus::Unknown)),
            notifier,
            listening: Mutex::new(false),
            context,
        }
    }

    /// Start listening; does nothing if already listening
    pub fn start_monitoring(&self) -> Result<()> {
        let observer = self
            .observer
            .as_ref()
            .ok_or_else(|| Error::config("no reachability observer configured"))?;

        let mut listening = self.listening.lock().unwrap_or_else(|p| p.into_inner());
        if *listening {
            return Ok(());
        }

        let status = self.status.clone();
        let notifier = self.notifier.clone();
        let context = self.context.clone();
        observer.start_listening(Arc::new(move |reachability| {
            let status = status.clone();
            let notifier = notifier.clone();
            context.dispatch(move || {
                let next = NetworkStatus::from(reachability);
                *status.write().unwrap_or_else(|p| p.into_inner()) = next;
                info!(status = ?next, "network status changed");
                // No subscribers is fine
                let _ = notifier.send(());
            });
        }))?;

        *listening = true;
        debug!("reachability monitoring started");
        Ok(())
    }

    /// Stop listening; does nothing if not listening
    pub fn stop_monitoring(&self) {
        let mut listening = self.listening.lock().unwrap_or_else(|p| p.into_inner());
        if !*listening {
            return;
        }
        if let Some(observer) = &self.observer {
            observer.stop_listening();
        }
        *listening = false;
        debug!("reachability monitoring stopped");
    }

    /// Check if the monitor is listening
    pub fn is_monitoring(&self) -> bool {
        *self.listening.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Get the last known status
    pub fn status(&self) -> NetworkStatus {
        *self.status.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notifier.subscribe()
    }
}

impl fmt::Debug for ReachabilityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReachabilityMonitor")
            .field("status", &self.status())
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}

/// Observer that probes a TCP endpoint at a fixed interval.
///
/// A successful connect reports [`ConnectionType::EthernetOrWiFi`]; the link
/// type is not visible from a socket. Only transitions are reported, the
/// first probe result always is.
pub struct ProbeObserver {
    target: SocketAddr,
    interval: Duration,
    probe_timeout: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProbeObserver {
    /// Create an observer probing `target` every five seconds
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            task: Mutex::new(None),
        }
    }

    /// Set the probe interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the connect timeout of a single probe
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    async fn probe(target: SocketAddr, timeout: Duration) -> Reachability {
        match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(_)) => Reachability::Reachable(ConnectionType::EthernetOrWiFi),
            _ => Reachability::NotReachable,
        }
    }
}

impl ReachabilityObserver for ProbeObserver {
    fn start_listening(&self, listener: ReachabilityListener) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("reachability probing needs a Tokio runtime"))?;

        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let target = self.target;
        let probe_timeout = self.probe_timeout;
        let mut ticker = tokio::time::interval(self.interval);
        *task = Some(runtime.spawn(async move {
            let mut last = None;
            loop {
                ticker.tick().await;
                let current = Self::probe(target, probe_timeout).await;
                if last != Some(current) {
                    last = Some(current);
                    listener(current);
                }
            }
        }));
        Ok(())
    }

    fn stop_listening(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
    }
}

impl Drop for ProbeObserver {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Observer driven by hand
    #[derive(Default)]
    struct ManualObserver {
        listeners: Mutex<Vec<ReachabilityListener>>,
        starts: Mutex<usize>,
    }

    impl ManualObserver {
        fn emit(&self, reachability: Reachability) {
            for listener in self.listeners.lock().unwrap().iter() {
                listener(reachability);
            }
        }
    }

    impl ReachabilityObserver for ManualObserver {
        fn start_listening(&self, listener: ReachabilityListener) -> Result<()> {
            *self.starts.lock().unwrap() += 1;
            self.listeners.lock().unwrap().push(listener);
            Ok(())
        }

        fn stop_listening(&self) {
            self.listeners.lock().unwrap().clear();
        }
    }

    fn monitor(observer: Arc<ManualObserver>) -> (ReachabilityMonitor, CallbackContext) {
        let context = CallbackContext::spawn("reachability-tests").unwrap();
        (ReachabilityMonitor::new(Some(observer), context.clone()), context)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(NetworkStatus::from(Reachability::NotReachable), NetworkStatus::NotReachable);
        assert_eq!(NetworkStatus::from(Reachability::Unknown), NetworkStatus::Unknown);
        assert_eq!(
            NetworkStatus::from(Reachability::Reachable(ConnectionType::EthernetOrWiFi)),
            NetworkStatus::EthernetOrWiFi
        );
        assert_eq!(
            NetworkStatus::from(Reachability::Reachable(ConnectionType::Cellular)),
            NetworkStatus::Cellular
        );
        assert!(NetworkStatus::Cellular.is_reachable());
        assert!(!NetworkStatus::Unknown.is_reachable());
    }

    #[tokio::test]
    async fn test_updates_store_status_and_notify() {
        let observer = Arc::new(ManualObserver::default());
        let (monitor, context) = monitor(observer.clone());
        let mut notifications = monitor.subscribe();

        assert_eq!(monitor.status(), NetworkStatus::Unknown);
        monitor.start_monitoring().unwrap();

        observer.emit(Reachability::Reachable(ConnectionType::Cellular));
        notifications.recv().await.unwrap();
        assert_eq!(monitor.status(), NetworkStatus::Cellular);

        observer.emit(Reachability::NotReachable);
        context.flush().await;
        assert_eq!(monitor.status(), NetworkStatus::NotReachable);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_single_stop_suffices() {
        let observer = Arc::new(ManualObserver::default());
        let (monitor, context) = monitor(observer.clone());

        monitor.start_monitoring().unwrap();
        monitor.start_monitoring().unwrap();
        assert_eq!(*observer.starts.lock().unwrap(), 1);
        assert_eq!(observer.listeners.lock().unwrap().len(), 1);

        monitor.stop_monitoring();
        assert!(!monitor.is_monitoring());

        observer.emit(Reachability::Reachable(ConnectionType::EthernetOrWiFi));
        context.flush().await;
        assert_eq!(monitor.status(), NetworkStatus::Unknown);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let observer = Arc::new(ManualObserver::default());
        let (monitor, _context) = monitor(observer);
        monitor.stop_monitoring();
        assert!(!monitor.is_monitoring());
    }

    #[tokio::test]
    async fn test_start_without_observer_fails() {
        let context = CallbackContext::spawn("no-observer").unwrap();
        let monitor = ReachabilityMonitor::new(None, context);
        assert!(matches!(monitor.start_monitoring(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_probe_observer_reports_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap();
        let observer = ProbeObserver::new(target).interval(Duration::from_millis(20));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        observer
            .start_listening(Arc::new(move |reachability| {
                let _ = tx.send(reachability);
            }))
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first, Reachability::Reachable(ConnectionType::EthernetOrWiFi));
        observer.stop_listening();
    }
}
