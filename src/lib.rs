//! netdispatch - a callback-driven HTTP request dispatcher
//!
//! A [`Client`] issues JSON requests, turns every response into a single
//! success or failure through a pluggable [`ResponseParser`], and delivers
//! it to callbacks on one serial [`CallbackContext`]. In-flight requests are
//! tracked so they can be cancelled individually or all at once.
//!
//! ## Features
//!
//! - **Exactly-once delivery** of success or failure per request
//! - **Callbacks attached at any time**, even after the response arrived
//! - **Envelope parsing** of `{code, msg, data}` style APIs
//! - **Multipart uploads** with progress reporting
//! - **Bulk cancellation** with a completion notification
//! - **Reachability monitoring** with change notifications
//!
//! ## Quick Start
//!
//! ```no_run
//! use netdispatch::{Client, ClientConfig, EnvelopeParser};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new()?;
//!     client.configure(ClientConfig::new().parser(EnvelopeParser::new()));
//!
//!     client
//!         .get("https://api.example.com/user")
//!         .parameter("id", 7)
//!         .send()
//!         .success(|data| println!("user: {}", data))
//!         .failed(|error| eprintln!("failed: {}", error));
//!
//!     let data = client.get("https://api.example.com/feed").send().outcome().await?;
//!     println!("feed: {}", data);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod encoding;
pub mod error;
pub mod handle;
pub mod multipart;
pub mod parser;
pub mod reachability;
pub mod registry;
pub mod request;
pub mod transport;

pub use client::{parse_header_line, Client, ClientBuilder};
pub use config::ClientConfig;
pub use context::CallbackContext;
pub use encoding::ParameterEncoding;
pub use error::{DomainError, Error, Result, StatusError};
pub use handle::{Progress, RequestHandle, RequestId};
pub use multipart::{FormPart, MimeType, MultipartBody};
pub use parser::{CustomParser, EnvelopeParser, Outcome, PassthroughParser, RawResponse, ResponseParser, TransportFailure};
pub use reachability::{
    ConnectionType, NetworkStatus, ProbeObserver, Reachability, ReachabilityListener, ReachabilityMonitor,
    ReachabilityObserver,
};
pub use registry::TaskRegistry;
pub use request::{RequestBuilder, UploadBuilder};
pub use transport::{HttpTransport, ProgressSink, RequestBody, Transport, TransportRequest};

// Re-export common HTTP types
pub use http::{HeaderMap, HeaderValue, Method, StatusCode};

// Re-export JSON types
pub use serde_json::{Map as JsonMap, Value as JsonValue};

pub use async_trait::async_trait;
