use std::fmt;

use serde_json::Value;

use crate::error::DomainError;

/// Result of a request after parsing: the success payload or a domain error
pub type Outcome = std::result::Result<Value, DomainError>;

/// What the transport hands back once a request has finished
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    /// The response body decoded as JSON
    Success(Value),
    /// The request failed before a usable payload was produced
    Failure(TransportFailure),
}

/// Transport-level failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    /// HTTP status, if the failure is tied to one
    pub status: Option<u16>,
    /// Transport error text
    pub description: String,
}

impl RawResponse {
    /// Create a failure response
    pub fn failure(status: Option<u16>, description: impl Into<String>) -> Self {
        RawResponse::Failure(TransportFailure {
            status,
            description: description.into(),
        })
    }

    pub(crate) fn cancelled() -> Self {
        Self::failure(None, "request cancelled")
    }

    /// Check if this is a transport failure
    pub fn is_failure(&self) -> bool {
        matches!(self, RawResponse::Failure(_))
    }
}

impl TransportFailure {
    /// Map onto the error shape callers see
    pub fn into_domain_error(self) -> DomainError {
        let code = self
            .status
            .map(i64::from)
            .unwrap_or(DomainError::UNKNOWN_CODE);
        DomainError::new(code, self.description)
    }
}

/// Strategy turning a raw transport result into an [`Outcome`].
///
/// The client runs the configured parser on the callback context for every
/// completed request. Applications with their own response conventions
/// implement this instead of touching the dispatch path.
pub trait ResponseParser: Send + Sync {
    /// Map a raw response onto success data or a domain error
    fn parse(&self, raw: RawResponse) -> Outcome;

    /// Get the name of this parser
    fn name(&self) -> &str {
        "Unknown"
    }
}

/// Hands the decoded payload through untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughParser;

impl ResponseParser for PassthroughParser {
    fn parse(&self, raw: RawResponse) -> Outcome {
        match raw {
            RawResponse::Success(payload) => Ok(payload),
            RawResponse::Failure(failure) => Err(failure.into_domain_error()),
        }
    }

    fn name(&self) -> &str {
        "Passthrough"
    }
}

/// Enforces a `{code, msg, data}` response envelope.
///
/// A payload whose code equals the success code yields its data field (null
/// when absent); any other code becomes a [`DomainError`] carrying the
/// payload's code and message.
#[derive(Debug, Clone)]
pub struct EnvelopeParser {
    code_field: String,
    message_field: String,
    data_field: String,
    success_code: i64,
}

impl EnvelopeParser {
    /// Code assumed when the envelope has no usable code field
    pub const MISSING_CODE: i64 = 0;

    /// Create a parser for the `{code, msg, data}` convention with success code 200
    pub fn new() -> Self {
        Self {
            code_field: "code".to_string(),
            message_field: "msg".to_string(),
            data_field: "data".to_string(),
            success_code: 200,
        }
    }

    /// Set the name of the code field
    pub fn code_field(mut self, name: &str) -> Self {
        self.code_field = name.to_string();
        self
    }

    /// Set the name of the message field
    pub fn message_field(mut self, name: &str) -> Self {
        self.message_field = name.to_string();
        self
    }

    /// Set the name of the data field
    pub fn data_field(mut self, name: &str) -> Self {
        self.data_field = name.to_string();
        self
    }

    /// Set the code that marks a successful envelope
    pub fn success_code(mut self, code: i64) -> Self {
        self.success_code = code;
        self
    }

    fn read_code(&self, payload: &Value) -> i64 {
        match payload.get(&self.code_field) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(Self::MISSING_CODE),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(Self::MISSING_CODE),
            _ => Self::MISSING_CODE,
        }
    }

    fn read_message(&self, payload: &Value) -> String {
        match payload.get(&self.message_field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

impl Default for EnvelopeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser for EnvelopeParser {
    fn parse(&self, raw: RawResponse) -> Outcome {
        let mut payload = match raw {
            RawResponse::Success(payload) => payload,
            RawResponse::Failure(failure) => return Err(failure.into_domain_error()),
        };

        let code = self.read_code(&payload);
        if code != self.success_code {
            return Err(DomainError::new(code, self.read_message(&payload)));
        }

        Ok(payload
            .as_object_mut()
            .and_then(|fields| fields.remove(&self.data_field))
            .unwrap_or(Value::Null))
    }

    fn name(&self) -> &str {
        "Envelope"
    }
}

/// Parser backed by a closure
pub struct CustomParser<F> {
    parser: F,
    name: String,
}

impl<F> CustomParser<F>
where
    F: Fn(RawResponse) -> Outcome + Send + Sync + 'static,
{
    /// Create a new custom parser
    pub fn new(parser: F, name: &str) -> Self {
        Self {
            parser,
            name: name.to_string(),
        }
    }
}

impl<F> ResponseParser for CustomParser<F>
where
    F: Fn(RawResponse) -> Outcome + Send + Sync + 'static,
{
    fn parse(&self, raw: RawResponse) -> Outcome {
        (self.parser)(raw)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for CustomParser<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomParser").field("name", &self.name).finish()
    }
}
