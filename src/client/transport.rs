//! The connection layer: sending a fully prepared request and handing back whatever came out of it.
//!
//! [SpotifyClient](crate::client::SpotifyClient) never talks to reqwest directly; it goes through the [Transport]
//! trait. [ReqwestTransport] is the default implementation. A custom transport may be supplied with
//! [SpotifyClientBuilder::transport](crate::client::SpotifyClientBuilder::transport), e.g. to record or replay
//! traffic.

use std::{fmt::Debug, net::IpAddr, time::SystemTime};

use async_trait::async_trait;
use log::trace;
use reqwest::{header, header::HeaderMap, Method, StatusCode, Url};

use crate::error::{Error, Result};

/// A request with its URL, headers and authentication already filled in.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: TransportBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// Any response the server gave, successful or not.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// The request didn't produce a response at all.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    #[source]
    pub source: Option<reqwest::Error>,
}

#[async_trait]
pub trait Transport: Debug + Send + Sync {
    async fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError>;
}

/// [Transport] backed by a [reqwest::Client]. Proxy and local address settings apply to every connection the client
/// makes.
#[derive(Debug, Clone)]
pub struct ReqwestTransport(reqwest::Client);

impl ReqwestTransport {
    pub fn new(proxy: Option<&str>, local_address: Option<IpAddr>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|err| Error::InvalidConfiguration(format!("invalid proxy {proxy}: {err}")))?;

            builder = builder.proxy(proxy);
        }

        if local_address.is_some() {
            builder = builder.local_address(local_address);
        }

        Ok(Self(builder.build()?))
    }
}

impl TransportResponse {
    /// The `Retry-After` header as whole seconds, if present and valid. The header may be either a number of seconds
    /// or an HTTP date; a date in the past gives 0.
    pub fn retry_after(&self) -> Option<u64> {
        let header_str = self.headers.get(header::RETRY_AFTER)?.to_str().ok()?.trim();

        if let Ok(seconds) = header_str.parse::<u64>() {
            return Some(seconds);
        }

        let date = httpdate::parse_http_date(header_str).ok()?;
        let remaining = date.duration_since(SystemTime::now()).unwrap_or_default();

        // round up so the wait never ends before the given date
        Some(remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0))
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl TransportError {
    pub fn new<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
        let TransportRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.0.request(method.clone(), url).headers(headers);

        builder = match body {
            TransportBody::Json(body) => {
                trace!("Request body: {body}");
                builder.json(&body)
            }

            TransportBody::Form(form) => builder.form(&form),

            // Spotify requires that all empty POST and PUT have a Content-Length header set to 0. reqwest doesn't do it
            // so we have to do it ourselves
            TransportBody::Empty if method == Method::POST || method == Method::PUT => {
                builder.header(header::CONTENT_LENGTH, header::HeaderValue::from_static("0"))
            }

            TransportBody::Empty => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse { status, headers, body })
    }
}
