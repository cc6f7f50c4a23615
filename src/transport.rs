use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use reqwest::Client as ReqwestClient;
use serde_json::Value;
use tracing::trace;
use url::Url;

use crate::error::{Result, StatusError};
use crate::handle::Progress;
use crate::multipart::MultipartBody;
use crate::parser::RawResponse;

/// Timeout applied by [`HttpTransport`] when a request carries none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Receives upload progress from the transport, on whatever thread it runs
pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

/// A fully resolved request as handed to a [`Transport`]
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Requested timeout; `None` leaves the choice to the transport
    pub timeout: Option<Duration>,
    pub body: RequestBody,
}

/// Request body types
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Empty body
    Empty,
    /// `application/x-www-form-urlencoded` body
    Form(String),
    /// Raw JSON text
    Json(String),
    /// Multipart form data, encoded by the transport
    Multipart(MultipartBody),
}

impl RequestBody {
    /// Get the Content-Type this body implies.
    ///
    /// `None` for multipart bodies: the boundary is only known once the
    /// transport encodes the form.
    pub fn content_type(&self) -> Option<String> {
        match self {
            RequestBody::Empty | RequestBody::Multipart(_) => None,
            RequestBody::Form(_) => Some("application/x-www-form-urlencoded; charset=utf-8".to_string()),
            RequestBody::Json(_) => Some("application/json".to_string()),
        }
    }

    /// Get the body length in bytes; the file payload for multipart bodies
    pub fn len(&self) -> usize {
        match self {
            RequestBody::Empty => 0,
            RequestBody::Form(text) | RequestBody::Json(text) => text.len(),
            RequestBody::Multipart(body) => body.payload_len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the body as text, if it is textual
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RequestBody::Form(text) | RequestBody::Json(text) => Some(text),
            _ => None,
        }
    }
}

/// Executes requests on behalf of a client.
///
/// Implementations never fail: every problem becomes a
/// [`RawResponse::Failure`] so it can flow through the response parser.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a request and decode its body
    async fn execute(&self, request: TransportRequest, progress: Option<ProgressSink>) -> RawResponse;

    /// Get the transport name/type
    fn name(&self) -> &str;
}

/// Default transport implementation using reqwest
pub struct HttpTransport {
    client: ReqwestClient,
    default_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with a default reqwest client
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(ReqwestClient::builder().build()?))
    }

    /// Create a transport around an existing reqwest client
    pub fn with_client(client: ReqwestClient) -> Self {
        Self {
            client,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the timeout used when a request carries none
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Get the underlying reqwest client
    pub fn client(&self) -> &ReqwestClient {
        &self.client
    }

    /// Get the timeout used when a request carries none
    pub fn get_default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: TransportRequest, progress: Option<ProgressSink>) -> RawResponse {
        let TransportRequest {
            method,
            url,
            headers,
            timeout,
            body,
        } = request;

        let head = method == Method::HEAD;
        let mut builder = self
            .client
            .request(method, url)
            .headers(headers)
            .timeout(timeout.unwrap_or(self.default_timeout));

        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Form(text) | RequestBody::Json(text) => builder.body(text),
            RequestBody::Multipart(multipart) => match multipart.into_form(progress) {
                Ok(form) => builder.multipart(form),
                Err(e) => return RawResponse::failure(None, e.to_string()),
            },
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return RawResponse::failure(e.status().map(|s| s.as_u16()), e.to_string()),
        };

        let status = response.status();
        trace!(%status, url = %response.url(), "response received");
        if !status.is_success() {
            let error = StatusError::from_status(status, "response status code was unacceptable");
            return RawResponse::failure(Some(status.as_u16()), error.to_string());
        }

        match response.bytes().await {
            Ok(bytes) => decode_payload(status, head, &bytes),
            Err(e) => RawResponse::failure(Some(status.as_u16()), e.to_string()),
        }
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}

/// Decode a successful response body as JSON
pub(crate) fn decode_payload(status: StatusCode, head: bool, bytes: &[u8]) -> RawResponse {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        if head || status == StatusCode::NO_CONTENT || status == StatusCode::RESET_CONTENT {
            return RawResponse::Success(Value::Null);
        }
        return RawResponse::failure(None, "response body was empty");
    }

    match serde_json::from_slice(bytes) {
        Ok(payload) => RawResponse::Success(payload),
        Err(e) => RawResponse::failure(None, format!("response could not be decoded as JSON: {}", e)),
    }
}
