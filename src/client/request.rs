use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

/// Optional parts of a request: query parameters, a JSON body and header overrides.
///
/// ```
/// # use spotify_http::client::RequestOptions;
/// let options = RequestOptions::new()
///     .query("market", "US")
///     .query("limit", 10.to_string())
///     .header("Accept-Language", "fi")
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<serde_json::Value>,
    pub(crate) headers: HeaderMap,
}

/// One logical request. It is resubmitted unchanged on every retry; only the attempt counter changes.
#[derive(Debug, Clone)]
pub(crate) struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub headers: HeaderMap,
    pub retry_attempt: u32,
}

/// A successful response. The body is not interpreted until asked to.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a query parameter. Parameters keep the order they're appended in.
    pub fn query<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets the JSON body of the request.
    pub fn body<B>(mut self, body: &B) -> Result<Self>
    where
        B: Serialize + ?Sized,
    {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Sets a JSON body that is already a [serde_json::Value].
    pub fn json_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a header for this request only. It overrides the client's default and static headers.
    pub fn header<K, V>(mut self, name: K, value: V) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

impl RequestDescriptor {
    pub fn new<S>(method: Method, path: S, options: RequestOptions) -> Self
    where
        S: Into<String>,
    {
        Self {
            method,
            path: path.into(),
            query: options.query,
            body: options.body,
            headers: options.headers,
            retry_attempt: 0,
        }
    }
}

impl Response {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self { status, headers, body }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the body as JSON.
    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name =
        HeaderName::from_bytes(name.as_bytes()).map_err(|err| Error::InvalidHeader(format!("{name}: {err}")))?;
    let header_value = HeaderValue::from_str(value).map_err(|err| Error::InvalidHeader(format!("{name}: {err}")))?;

    Ok((header_name, header_value))
}
