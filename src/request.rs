use std::collections::HashMap;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::encoding::{self, Destination, ParameterEncoding};
use crate::error::{Error, Result};
use crate::handle::RequestHandle;
use crate::multipart::{FormPart, MultipartBody};
use crate::transport::{RequestBody, TransportRequest};

/// Builder for a GET/POST style request.
///
/// `parameters` are encoded according to the [`ParameterEncoding`]; `body`
/// is always sent as raw JSON text and takes precedence over parameters that
/// would otherwise land in the body.
///
/// # Examples
///
/// ```rust,no_run
/// use netdispatch::Client;
/// use serde_json::json;
///
/// # async fn example(client: Client) -> netdispatch::Result<()> {
/// client
///     .get("https://api.example.com/items")
///     .parameters(&json!({"page": 2}))?
///     .header("X-Trace", "1")?
///     .send()
///     .success(|items| println!("{}", items))
///     .failed(|error| eprintln!("{}", error));
/// # Ok(())
/// # }
/// ```
pub struct RequestBuilder {
    client: Client,
    method: Method,
    url: String,
    parameters: Option<Map<String, Value>>,
    body: Option<Map<String, Value>>,
    encoding: ParameterEncoding,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl RequestBuilder {
    pub(crate) fn new(client: Client, method: Method, url: impl Into<String>) -> Self {
        Self {
            client,
            method,
            url: url.into(),
            parameters: None,
            body: None,
            encoding: ParameterEncoding::default(),
            headers: HeaderMap::new(),
            timeout: None,
        }
    }

    /// Get the HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get the URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Set the parameters; must serialize to a JSON object
    pub fn parameters<T>(mut self, parameters: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        self.parameters = Some(to_object(parameters, "parameters")?);
        Ok(self)
    }

    /// Add a single parameter
    pub fn parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// Set the raw JSON body; must serialize to a JSON object
    pub fn body<T>(mut self, body: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        self.body = Some(to_object(body, "body")?);
        Ok(self)
    }

    /// Set how parameters are encoded
    pub fn encoding(mut self, encoding: ParameterEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set a header for this request only
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = name.parse::<HeaderName>()?;
        let value = value.parse::<HeaderValue>()?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Set multiple headers for this request only
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Set the timeout for this request only
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve against the client configuration
    pub fn build(&self, config: &ClientConfig) -> Result<TransportRequest> {
        let mut url = Url::parse(&self.url)?;
        let mut body = RequestBody::Empty;

        if let Some(parameters) = &self.parameters {
            match self.encoding.destination(&self.method) {
                Destination::Query => encoding::append_query(&mut url, parameters),
                Destination::FormBody => body = RequestBody::Form(encoding::form_body(parameters)),
                Destination::JsonBody => body = RequestBody::Json(serde_json::to_string(parameters)?),
            }
        }

        if let Some(raw) = &self.body {
            body = RequestBody::Json(serde_json::to_string(raw)?);
        }

        let mut headers = config.merged_headers(&self.headers);
        apply_content_type(&mut headers, &body)?;

        Ok(TransportRequest {
            method: self.method.clone(),
            url,
            headers,
            timeout: config.effective_timeout(self.timeout),
            body,
        })
    }

    /// Issue the request and return its handle immediately
    pub fn send(self) -> RequestHandle {
        let request = self.build(&self.client.config());
        self.client.dispatch(request, false)
    }
}

/// Builder for a multipart upload.
///
/// Text fields are written before the file parts, in insertion order.
/// Upload progress is reported through the handle's progress callback.
pub struct UploadBuilder {
    client: Client,
    method: Method,
    url: String,
    fields: Vec<(String, String)>,
    parts: Vec<FormPart>,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl UploadBuilder {
    pub(crate) fn new(client: Client, url: impl Into<String>, parts: Vec<FormPart>) -> Self {
        Self {
            client,
            method: Method::POST,
            url: url.into(),
            fields: Vec::new(),
            parts,
            headers: HeaderMap::new(),
            timeout: None,
        }
    }

    /// Get the URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the file parts
    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    /// Override the method (POST by default)
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add text fields, ordered by key
    pub fn parameters(mut self, parameters: HashMap<String, String>) -> Self {
        let mut fields: Vec<(String, String)> = parameters.into_iter().collect();
        fields.sort();
        self.fields.extend(fields);
        self
    }

    /// Add a single text field
    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    /// Add another file part
    pub fn part(mut self, part: FormPart) -> Self {
        self.parts.push(part);
        self
    }

    /// Set a header for this request only
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = name.parse::<HeaderName>()?;
        let value = value.parse::<HeaderValue>()?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Set the timeout for this request only
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve against the client configuration
    pub fn build(&self, config: &ClientConfig) -> Result<TransportRequest> {
        let url = Url::parse(&self.url)?;
        let body = RequestBody::Multipart(MultipartBody::new(self.fields.clone(), self.parts.clone()));

        // The transport writes the multipart Content-Type with its boundary
        let mut headers = config.merged_headers(&self.headers);
        headers.remove(CONTENT_TYPE);

        Ok(TransportRequest {
            method: self.method.clone(),
            url,
            headers,
            timeout: config.effective_timeout(self.timeout),
            body,
        })
    }

    /// Issue the upload and return its handle immediately
    pub fn send(self) -> RequestHandle {
        let request = self.build(&self.client.config());
        self.client.dispatch(request, true)
    }
}

fn to_object<T>(value: &T, what: &str) -> Result<Map<String, Value>>
where
    T: Serialize + ?Sized,
{
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::invalid_request(format!(
            "{} must serialize to a JSON object, got {}",
            what, other
        ))),
    }
}

/// Set the Content-Type implied by the body unless one was configured
fn apply_content_type(headers: &mut HeaderMap, body: &RequestBody) -> Result<()> {
    if headers.contains_key(CONTENT_TYPE) {
        return Ok(());
    }
    if let Some(content_type) = body.content_type() {
        headers.insert(CONTENT_TYPE, content_type.parse::<HeaderValue>()?);
    }
    Ok(())
}
