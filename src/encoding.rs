use http::Method;
use serde_json::{Map, Value};
use url::Url;

/// Where request parameters go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterEncoding {
    /// Query string for GET, HEAD and DELETE; form body otherwise
    #[default]
    MethodDependent,
    /// Always the query string
    QueryString,
    /// Always a `application/x-www-form-urlencoded` body
    HttpBody,
    /// Always a JSON body
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Destination {
    Query,
    FormBody,
    JsonBody,
}

impl ParameterEncoding {
    pub(crate) fn destination(&self, method: &Method) -> Destination {
        match self {
            ParameterEncoding::MethodDependent => {
                if *method == Method::GET || *method == Method::HEAD || *method == Method::DELETE {
                    Destination::Query
                } else {
                    Destination::FormBody
                }
            }
            ParameterEncoding::QueryString => Destination::Query,
            ParameterEncoding::HttpBody => Destination::FormBody,
            ParameterEncoding::Json => Destination::JsonBody,
        }
    }
}

/// Flatten parameters into ordered key/value pairs.
///
/// Keys are sorted. Nested objects become `key[sub]`, arrays `key[]`,
/// booleans `1`/`0` and null an empty value.
pub fn query_pairs(parameters: &Map<String, Value>) -> Vec<(String, String)> {
    let mut keys: Vec<&String> = parameters.keys().collect();
    keys.sort();

    let mut pairs = Vec::new();
    for key in keys {
        flatten(key, &parameters[key.as_str()], &mut pairs);
    }
    pairs
}

fn flatten(key: &str, value: &Value, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            let mut nested: Vec<&String> = map.keys().collect();
            nested.sort();
            for sub in nested {
                flatten(&format!("{}[{}]", key, sub), &map[sub.as_str()], pairs);
            }
        }
        Value::Array(items) => {
            let array_key = format!("{}[]", key);
            for item in items {
                flatten(&array_key, item, pairs);
            }
        }
        Value::Bool(b) => pairs.push((key.to_string(), if *b { "1" } else { "0" }.to_string())),
        Value::Number(n) => pairs.push((key.to_string(), n.to_string())),
        Value::String(s) => pairs.push((key.to_string(), s.clone())),
        Value::Null => pairs.push((key.to_string(), String::new())),
    }
}

/// Append parameters to the URL's query string, keeping any existing query
pub fn append_query(url: &mut Url, parameters: &Map<String, Value>) {
    let pairs = query_pairs(parameters);
    if pairs.is_empty() {
        return;
    }
    url.query_pairs_mut().extend_pairs(pairs);
}

/// Encode parameters as a form body
pub fn form_body(parameters: &Map<String, Value>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query_pairs(parameters))
        .finish()
}
