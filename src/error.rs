use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use crate::model::error::{describe_api_error, AuthenticationErrorKind};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Acquiring or refreshing an access token failed, or the client lacks the credentials to do either.
    #[error("{message}")]
    Auth {
        message: String,
        kind: Option<AuthenticationErrorKind>,
        body: Option<String>,
    },

    #[error("Bad request to {url}: {}", describe_api_error(.body))]
    BadRequest { url: Url, body: String },
    #[error("Unauthorized request to {url}: {}", describe_api_error(.body))]
    Unauthorized { url: Url, body: String },
    #[error("Forbidden request to {url}, are you sure you have the right scopes? {}", describe_api_error(.body))]
    Forbidden { url: Url, body: String },
    #[error("Not found ({url})")]
    NotFound { url: Url },

    #[error("Request rate limit hit for {url}{}", describe_retry_after(.retry_after))]
    RateLimit { url: Url, retry_after: Option<u64> },

    #[error("Request to {url} exceeded all {attempts} retry attempts (last status: {})", describe_status(.last_status))]
    RetriesExceeded {
        url: Url,
        attempts: u32,
        last_status: Option<u16>,
        #[source]
        cause: Box<Error>,
    },

    #[error("Unhandled API response status {status} from {url}: {}", describe_api_error(.body))]
    UnhandledStatus { url: Url, status: u16, body: String },

    /// The request never produced a response: the connection failed, was reset, timed out or the body could not be
    /// read.
    #[error("Network error while requesting {url}: {message}")]
    Network {
        url: Url,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Invalid client configuration: {0}")]
    InvalidConfiguration(String),

    #[error("A retry was scheduled in {0:?} but no sleep utility has been enabled")]
    RetrySleepUnavailable(Duration),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    HttpError(#[from] reqwest::Error),
}

fn describe_status(status: &Option<u16>) -> String {
    status
        .map(|status| status.to_string())
        .unwrap_or_else(|| "no response".to_owned())
}

fn describe_retry_after(retry_after: &Option<u64>) -> String {
    retry_after
        .map(|seconds| format!("; retry after {seconds} seconds"))
        .unwrap_or_default()
}

impl Error {
    pub(crate) fn auth<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Error::Auth {
            message: message.into(),
            kind: None,
            body: None,
        }
    }

    /// Returns the URL of the request that failed, if the error is tied to one.
    pub fn url(&self) -> Option<&Url> {
        match self {
            Error::BadRequest { url, .. }
            | Error::Unauthorized { url, .. }
            | Error::Forbidden { url, .. }
            | Error::NotFound { url }
            | Error::RateLimit { url, .. }
            | Error::RetriesExceeded { url, .. }
            | Error::UnhandledStatus { url, .. }
            | Error::Network { url, .. } => Some(url),

            _ => None,
        }
    }

    /// Returns the upstream response body, if the error carries one.
    pub fn body(&self) -> Option<&str> {
        match self {
            Error::BadRequest { body, .. }
            | Error::Unauthorized { body, .. }
            | Error::Forbidden { body, .. }
            | Error::UnhandledStatus { body, .. } => Some(body),
            Error::Auth { body, .. } => body.as_deref(),
            Error::RetriesExceeded { cause, .. } => cause.body(),

            _ => None,
        }
    }

    /// Returns how long the API asked to wait before retrying, if the error is a rate limit that said so.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after, .. } => retry_after.map(Duration::from_secs),
            _ => None,
        }
    }
}
