use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

use crate::error::Result;
use crate::parser::{PassthroughParser, ResponseParser};

/// Defaults applied to every request issued by a client.
///
/// Replaced wholesale by [`Client::configure`](crate::Client::configure);
/// the last configuration wins.
#[derive(Clone)]
pub struct ClientConfig {
    headers: HeaderMap,
    timeout: Option<Duration>,
    parser: Arc<dyn ResponseParser>,
}

impl ClientConfig {
    /// Create a configuration with no headers, no timeout and the passthrough parser
    pub fn new() -> Self {
        Self {
            headers: HeaderMap::new(),
            timeout: None,
            parser: Arc::new(PassthroughParser),
        }
    }

    /// Set a default header
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = name.parse::<HeaderName>()?;
        let value = value.parse::<HeaderValue>()?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Replace the default headers
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the default request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the response parser
    pub fn parser<P>(mut self, parser: P) -> Self
    where
        P: ResponseParser + 'static,
    {
        self.parser = Arc::new(parser);
        self
    }

    /// Set a shared response parser
    pub fn shared_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Get the default headers
    pub fn get_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get the default timeout
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Get the response parser
    pub fn get_parser(&self) -> &Arc<dyn ResponseParser> {
        &self.parser
    }

    /// Layer per-request headers over a copy of the defaults
    pub fn merged_headers(&self, overrides: &HeaderMap) -> HeaderMap {
        let mut headers = self.headers.clone();
        let mut last_name: Option<HeaderName> = None;
        for (name, value) in overrides {
            // Replace the default once per name, then keep appending repeated values
            if last_name.as_ref() != Some(name) {
                headers.insert(name.clone(), value.clone());
                last_name = Some(name.clone());
            } else {
                headers.append(name.clone(), value.clone());
            }
        }
        headers
    }

    /// Timeout for a request: per-request, then the default, then `None`
    /// for the transport's own default
    pub fn effective_timeout(&self, per_request: Option<Duration>) -> Option<Duration> {
        per_request.or(self.timeout)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("parser", &self.parser.name())
            .finish()
    }
}
