use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use reqwest::ClientBuilder as ReqwestBuilder;
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use crate::config::ClientConfig;
use crate::context::CallbackContext;
use crate::error::{Error, Result};
use crate::handle::{RequestHandle, RequestId};
use crate::multipart::FormPart;
use crate::parser::{RawResponse, ResponseParser};
use crate::reachability::{NetworkStatus, ReachabilityMonitor, ReachabilityObserver};
use crate::registry::TaskRegistry;
use crate::request::{RequestBuilder, UploadBuilder};
use crate::transport::{HttpTransport, ProgressSink, Transport, TransportRequest, DEFAULT_TIMEOUT};

/// Dispatcher for all requests of an application.
///
/// Construct one with [`Client::builder`] and share it; clones are cheap and
/// refer to the same configuration, task registry and callback context.
///
/// # Examples
///
/// ```rust,no_run
/// use netdispatch::{Client, EnvelopeParser};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::builder()
///         .default_header("X-App", "demo")?
///         .timeout(Duration::from_secs(15))
///         .parser(EnvelopeParser::new())
///         .build()?;
///
///     let user = client.get("https://api.example.com/user").send().outcome().await?;
///     println!("{}", user);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    config: RwLock<ClientConfig>,
    registry: Arc<TaskRegistry>,
    context: CallbackContext,
    runtime: tokio::runtime::Handle,
    reachability: ReachabilityMonitor,
}

impl Client {
    /// Create a client with default settings
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a new client builder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Replace the defaults applied to subsequent requests
    pub fn configure(&self, config: ClientConfig) {
        debug!(?config, "client reconfigured");
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
    }

    /// Get a snapshot of the current configuration
    pub fn config(&self) -> ClientConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Create a GET request
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Create a POST request
    pub fn post(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Create a request with a custom method
    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, url)
    }

    /// Create a multipart upload
    pub fn upload(&self, url: impl Into<String>, parts: Vec<FormPart>) -> UploadBuilder {
        UploadBuilder::new(self.clone(), url, parts)
    }

    /// Cancel every request currently in flight
    pub fn cancel_all(&self) {
        self.cancel_tracked();
    }

    /// Cancel every request currently in flight and run `on_complete` on
    /// `context` once all of them have completed
    pub fn cancel_all_with<F>(&self, context: &CallbackContext, on_complete: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handles = self.cancel_tracked();
        let context = context.clone();
        self.inner.runtime.spawn(async move {
            futures::future::join_all(handles.iter().map(|handle| handle.finished())).await;
            context.dispatch(on_complete);
        });
    }

    /// Get the task registry
    pub fn tasks(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    /// Get the context callbacks run on
    pub fn callback_context(&self) -> &CallbackContext {
        &self.inner.context
    }

    /// Get the transport
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Start following reachability changes; does nothing if already started
    pub fn start_monitoring(&self) -> Result<()> {
        self.inner.reachability.start_monitoring()
    }

    /// Stop following reachability changes; does nothing if not started
    pub fn stop_monitoring(&self) {
        self.inner.reachability.stop_monitoring()
    }

    /// Get the last known network status
    pub fn network_status(&self) -> NetworkStatus {
        self.inner.reachability.status()
    }

    /// Subscribe to network status change notifications
    pub fn subscribe_network_status(&self) -> broadcast::Receiver<()> {
        self.inner.reachability.subscribe()
    }

    /// Get the reachability monitor
    pub fn reachability(&self) -> &ReachabilityMonitor {
        &self.inner.reachability
    }

    fn cancel_tracked(&self) -> Vec<RequestHandle> {
        let handles = self.inner.registry.snapshot();
        debug!(count = handles.len(), "cancelling all requests");
        for handle in &handles {
            handle.cancel();
        }
        handles
    }

    /// Register a handle and run the request in the background.
    ///
    /// Completion is parsed, delivered and unregistered on the callback
    /// context. A request that could not be built fails the same way as a
    /// transport error.
    pub(crate) fn dispatch(&self, request: Result<TransportRequest>, track_progress: bool) -> RequestHandle {
        let id = RequestId::next();
        let handle = RequestHandle::new(id, self.inner.context.clone());
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        handle.attach_cancel(cancel_tx);
        self.inner.registry.insert(handle.clone());

        let progress = if track_progress {
            Some(progress_sink(&handle, &self.inner.context))
        } else {
            None
        };

        let parser: Arc<dyn ResponseParser> = self.config().get_parser().clone();
        let transport = self.inner.transport.clone();
        let registry = self.inner.registry.clone();
        let context = self.inner.context.clone();
        let task_handle = handle.clone();

        match &request {
            Ok(request) => debug!(request = %id, method = %request.method, url = %request.url, "issuing request"),
            Err(e) => debug!(request = %id, error = %e, "request could not be built"),
        }

        self.inner.runtime.spawn(async move {
            let raw = match request {
                Ok(request) => {
                    tokio::select! {
                        raw = transport.execute(request, progress) => raw,
                        Ok(()) = cancel_rx => RawResponse::cancelled(),
                    }
                }
                Err(e) => RawResponse::failure(None, e.to_string()),
            };

            context.dispatch(move || {
                let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                    let outcome = parser.parse(raw);
                    debug!(request = %id, success = outcome.is_ok(), "request completed");
                    task_handle.deliver(outcome);
                }));

                // A panicking parser or callback must not leave the request tracked
                registry.remove(id);
                task_handle.mark_finished();
                if let Err(payload) = delivered {
                    panic::resume_unwind(payload);
                }
            });
        });

        handle
    }
}

fn progress_sink(handle: &RequestHandle, context: &CallbackContext) -> ProgressSink {
    let handle = handle.clone();
    let context = context.clone();
    Arc::new(move |progress| {
        let handle = handle.clone();
        context.dispatch(move || handle.report_progress(progress));
    })
}

/// Builder for creating clients with custom configuration
///
/// # Examples
///
/// ```rust,no_run
/// use netdispatch::ClientBuilder;
/// use std::time::Duration;
///
/// # fn example() -> netdispatch::Result<()> {
/// let client = ClientBuilder::new()
///     .timeout(Duration::from_secs(30))
///     .user_agent("MyApp/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    reqwest_builder: ReqwestBuilder,
    transport_timeout: Duration,
    transport: Option<Arc<dyn Transport>>,
    config: ClientConfig,
    context: Option<CallbackContext>,
    observer: Option<Arc<dyn ReachabilityObserver>>,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self {
            reqwest_builder: reqwest::Client::builder(),
            transport_timeout: DEFAULT_TIMEOUT,
            transport: None,
            config: ClientConfig::new(),
            context: None,
            observer: None,
        }
    }

    /// Set the default timeout for all requests
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.timeout(timeout);
        self
    }

    /// Set the timeout the transport falls back to when none is configured
    pub fn transport_timeout(mut self, timeout: Duration) -> Self {
        self.transport_timeout = timeout;
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.reqwest_builder = self.reqwest_builder.connect_timeout(timeout);
        self
    }

    /// Set the pool idle timeout
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.reqwest_builder = self.reqwest_builder.pool_idle_timeout(timeout);
        self
    }

    /// Set the maximum number of idle connections per host
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.reqwest_builder = self.reqwest_builder.pool_max_idle_per_host(max);
        self
    }

    /// Set the maximum redirects to follow
    pub fn redirect(mut self, max_redirects: usize) -> Self {
        self.reqwest_builder = self
            .reqwest_builder
            .redirect(reqwest::redirect::Policy::limited(max_redirects));
        self
    }

    /// Set a default header for all requests
    pub fn default_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.config = self.config.header(name, value)?;
        Ok(self)
    }

    /// Set the default headers for all requests
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.config = self.config.headers(headers);
        self
    }

    /// Set the user agent
    pub fn user_agent(self, user_agent: &str) -> Result<Self> {
        self.default_header("User-Agent", user_agent)
    }

    /// Set the response parser
    pub fn parser<P>(mut self, parser: P) -> Self
    where
        P: ResponseParser + 'static,
    {
        self.config = self.config.parser(parser);
        self
    }

    /// Replace the whole initial configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom transport instead of reqwest
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Deliver callbacks on an existing context
    pub fn callback_context(mut self, context: CallbackContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the observer used by reachability monitoring
    pub fn reachability_observer(mut self, observer: Arc<dyn ReachabilityObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the client; must be called inside a Tokio runtime
    pub fn build(self) -> Result<Client> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("a client must be built inside a Tokio runtime"))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let reqwest_client = self.reqwest_builder.build()?;
                Arc::new(HttpTransport::with_client(reqwest_client).default_timeout(self.transport_timeout))
            }
        };

        let context = self
            .context
            .unwrap_or_else(|| CallbackContext::spawn_on(&runtime, "netdispatch-callbacks"));
        let reachability = ReachabilityMonitor::new(self.observer, context.clone());

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                config: RwLock::new(self.config),
                registry: Arc::new(TaskRegistry::new()),
                context,
                runtime,
                reachability,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a `Name: Value` header line
pub fn parse_header_line(line: &str) -> Result<(HeaderName, HeaderValue)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| Error::invalid_request(format!("header '{}' is not in 'Name: Value' form", line)))?;
    Ok((name.trim().parse()?, value.trim().parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;
    use crate::handle::Progress;
    use crate::parser::EnvelopeParser;
    use crate::transport::RequestBody;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Records every request and answers with a scripted response
    struct RecordingTransport {
        seen: Mutex<Vec<TransportRequest>>,
        response: RawResponse,
        gate: Option<Arc<Notify>>,
    }

    impl RecordingTransport {
        fn answering(response: RawResponse) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                response,
                gate: None,
            })
        }

        fn blocking() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                response: RawResponse::Success(Value::Null),
                gate: Some(Arc::new(Notify::new())),
            })
        }

        fn requests(&self) -> Vec<TransportRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn execute(&self, request: TransportRequest, progress: Option<ProgressSink>) -> RawResponse {
            let total = request.body.len() as u64;
            self.seen.lock().unwrap().push(request);
            if let Some(sink) = progress {
                sink(Progress { completed: total / 2, total });
                sink(Progress { completed: total, total });
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.response.clone()
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn client_with(transport: Arc<RecordingTransport>) -> Client {
        Client::builder().transport(transport).build().unwrap()
    }

    #[tokio::test]
    async fn test_success_callback_fires_once() {
        let transport = RecordingTransport::answering(RawResponse::Success(json!({"ok": true})));
        let client = client_with(transport);

        let (tx, rx) = oneshot::channel();
        let failures = Arc::new(Mutex::new(0));
        let counter = failures.clone();
        let handle = client
            .get("https://example.com/ping")
            .send()
            .success(move |value| {
                let _ = tx.send(value);
            })
            .failed(move |_| *counter.lock().unwrap() += 1);

        assert_eq!(rx.await.unwrap(), json!({"ok": true}));
        handle.finished().await;
        handle.cancel();
        client.callback_context().flush().await;

        assert_eq!(*failures.lock().unwrap(), 0);
        assert!(!client.tasks().contains(handle.id()));
        assert!(!handle.has_callbacks());
    }

    #[tokio::test]
    async fn test_transport_failure_reaches_failure_callback() {
        let transport = RecordingTransport::answering(RawResponse::failure(Some(500), "Server error"));
        let client = client_with(transport);

        let outcome = client.get("https://example.com/boom").send().outcome().await;
        assert_eq!(outcome, Err(DomainError::new(500, "Server error")));
    }

    #[tokio::test]
    async fn test_unbuildable_request_fails_through_callback() {
        let transport = RecordingTransport::answering(RawResponse::Success(Value::Null));
        let client = client_with(transport.clone());

        let error = client.get("::not a url::").send().outcome().await.unwrap_err();
        assert_eq!(error.code, -1);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_envelope_parser_via_configure() {
        let transport = RecordingTransport::answering(RawResponse::Success(json!({"code": 400, "msg": "bad"})));
        let client = client_with(transport);
        client.configure(ClientConfig::new().parser(EnvelopeParser::new()));

        let outcome = client.post("https://example.com/items").send().outcome().await;
        assert_eq!(outcome, Err(DomainError::new(400, "bad")));
    }

    #[tokio::test]
    async fn test_per_call_headers_do_not_leak() {
        let transport = RecordingTransport::answering(RawResponse::Success(Value::Null));
        let client = client_with(transport.clone());
        client.configure(ClientConfig::new().header("X-App", "demo").unwrap());

        client
            .get("https://example.com/a")
            .header("X-Once", "1")
            .unwrap()
            .send()
            .outcome()
            .await
            .unwrap();
        client.get("https://example.com/b").send().outcome().await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].headers.get("x-app").unwrap(), "demo");
        assert_eq!(requests[0].headers.get("x-once").unwrap(), "1");
        assert_eq!(requests[1].headers.get("x-app").unwrap(), "demo");
        assert!(requests[1].headers.get("x-once").is_none());
    }

    #[tokio::test]
    async fn test_timeout_precedence() {
        let transport = RecordingTransport::answering(RawResponse::Success(Value::Null));
        let client = client_with(transport.clone());

        // Neither global nor per-call: transport default
        client.get("https://example.com/1").send().outcome().await.unwrap();

        // Per-call only
        client
            .get("https://example.com/1b")
            .timeout(Duration::from_secs(7))
            .send()
            .outcome()
            .await
            .unwrap();

        // Global only
        client.configure(ClientConfig::new().timeout(Duration::from_secs(20)));
        client.get("https://example.com/2").send().outcome().await.unwrap();

        // Both: per-call wins
        client
            .get("https://example.com/3")
            .timeout(Duration::from_secs(3))
            .send()
            .outcome()
            .await
            .unwrap();

        let timeouts: Vec<_> = transport.requests().iter().map(|r| r.timeout).collect();
        assert_eq!(
            timeouts,
            vec![
                None,
                Some(Duration::from_secs(7)),
                Some(Duration::from_secs(20)),
                Some(Duration::from_secs(3))
            ]
        );
    }

    #[tokio::test]
    async fn test_registry_tracks_in_flight_requests() {
        let transport = RecordingTransport::blocking();
        let client = client_with(transport.clone());

        let handle = client.get("https://example.com/slow").send();
        assert!(client.tasks().contains(handle.id()));
        assert_eq!(client.tasks().get(handle.id()), Some(handle.clone()));

        let gate = transport.gate.clone().unwrap();
        while transport.requests().is_empty() {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        handle.finished().await;
        assert!(!client.tasks().contains(handle.id()));
        assert!(client.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_completes_with_failure() {
        let transport = RecordingTransport::blocking();
        let client = client_with(transport);

        let handle = client.get("https://example.com/slow").send();
        let waiter = tokio::spawn(handle.clone().outcome());
        handle.cancel();

        let error = waiter.await.unwrap().unwrap_err();
        assert_eq!(error, DomainError::new(-1, "request cancelled"));
    }

    #[tokio::test]
    async fn test_cancel_all_completion_runs_after_every_request() {
        let transport = RecordingTransport::blocking();
        let client = client_with(transport);
        let events = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let events = events.clone();
                client
                    .get(format!("https://example.com/{}", i))
                    .send()
                    .failed(move |_| events.lock().unwrap().push(format!("failed {}", i)))
            })
            .collect();
        assert_eq!(client.tasks().len(), 5);

        let (tx, rx) = oneshot::channel();
        let done_events = events.clone();
        client.cancel_all_with(client.callback_context(), move || {
            done_events.lock().unwrap().push("all cancelled".to_string());
            let _ = tx.send(());
        });
        rx.await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 6);
        assert_eq!(events.last().unwrap(), "all cancelled");
        assert!(handles.iter().all(|h| h.is_finished()));
        assert!(client.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_callback_still_releases_request() {
        let transport = RecordingTransport::answering(RawResponse::Success(json!({"ok": true})));
        let client = client_with(transport);

        let handle = client
            .get("https://example.com/ping")
            .send()
            .success(|_| panic!("callback bug"));

        tokio::time::timeout(Duration::from_secs(2), handle.finished())
            .await
            .unwrap();
        assert!(!client.tasks().contains(handle.id()));

        // The context keeps running and bulk cancellation still completes
        let (tx, rx) = oneshot::channel();
        client.cancel_all_with(client.callback_context(), move || {
            let _ = tx.send(());
        });
        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_all_without_requests() {
        let transport = RecordingTransport::answering(RawResponse::Success(Value::Null));
        let client = client_with(transport);

        let (tx, rx) = oneshot::channel();
        client.cancel_all_with(client.callback_context(), move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        client.cancel_all();
    }

    #[tokio::test]
    async fn test_upload_reports_progress() {
        let transport = RecordingTransport::answering(RawResponse::Success(json!({"stored": true})));
        let client = client_with(transport.clone());
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();

        let outcome = client
            .upload("https://example.com/upload", vec![FormPart::new(vec![0; 64], "file", "a.bin", "application/octet-stream")])
            .field("album", "1")
            .send()
            .progress(move |p| sink.lock().unwrap().push(p))
            .outcome()
            .await;
        assert_eq!(outcome, Ok(json!({"stored": true})));

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports[1].is_complete());
        assert!(matches!(transport.requests()[0].body, RequestBody::Multipart(_)));
    }

    #[test]
    fn test_build_requires_runtime() {
        assert!(matches!(Client::builder().build(), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = parse_header_line("X-Trace: abc").unwrap();
        assert_eq!(name, "x-trace");
        assert_eq!(value, "abc");
        assert!(parse_header_line("nocolon").is_err());
    }
}
