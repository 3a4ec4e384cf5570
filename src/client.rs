//! The authenticated HTTP client for the Spotify Web API.
//!
//! [SpotifyClient] turns a method, a path and [RequestOptions] into an authenticated request, sends it and hands back
//! the [Response]. On the way it:
//!
//! - acquires an access token with the refresh token or client credentials flow when there is no valid one cached,
//! - waits out rate limits (`429 Too Many Requests`) for as long as the API asks to,
//! - retries server errors and failed connections a limited number of times,
//! - and classifies every other failure into an [Error](crate::Error) that carries the failing URL and the
//!   response body.
//!
//! # Usage
//!
//! ```no_run
//! # use spotify_http::client::{RequestOptions, SpotifyClientBuilder};
//! # async fn foo() -> spotify_http::Result<()> {
//! let client = SpotifyClientBuilder::new()
//!     .client_credentials("application client ID", "application client secret")
//!     .build()?;
//!
//! let response = client
//!     .get("/tracks/2PoYyfBkedDBPGAh0ZUoHW", RequestOptions::new().query("market", "FI"))
//!     .await?;
//!
//! let track: serde_json::Value = response.json()?;
//! # Ok(())
//! # }
//! ```
//!
//! The client is cheap to clone; clones share the same credentials and connection pool. Requests that must happen in
//! a certain order have to be awaited one after another, the client gives no ordering guarantees between concurrent
//! requests.

mod credentials;
mod request;
mod retry;
mod token;
mod transport;

#[cfg(test)]
mod test_transport;

pub use reqwest::{Method, StatusCode};

pub use self::{
    request::{RequestOptions, Response},
    retry::{Backoff, Failure, FailureClass, RetryDecision, RetryPolicy},
    transport::{ReqwestTransport, Transport, TransportBody, TransportError, TransportRequest, TransportResponse},
};

use std::{net::IpAddr, sync::Arc, time::Duration};

use const_format::concatcp;
use log::{debug, error, trace, warn};
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Url,
};
use serde::Serialize;

use self::{
    credentials::{AccessToken, Credentials, ACCESS_TOKEN_TTL},
    request::{parse_header, RequestDescriptor},
    token::TokenManager,
};
use crate::{
    config::Config,
    error::{Error, Result},
    model::error::{ApiErrorMessage, ApiErrorResponse},
};

const API_BASE_URL: &str = "https://api.spotify.com/v1";

const ACCOUNTS_BASE_URL: &str = "https://accounts.spotify.com/";
const ACCOUNTS_API_TOKEN_ENDPOINT: &str = concatcp!(ACCOUNTS_BASE_URL, "api/token");

const DEFAULT_USER_AGENT: &str = concatcp!("spotify-http/", env!("CARGO_PKG_VERSION"));

/// An authenticated client for the Spotify Web API. See the [module-level documentation](self) for more information.
///
/// This client uses `Arc` internally, so you do not need to wrap it in an `Arc` in order to share it.
#[derive(Debug, Clone)]
pub struct SpotifyClient {
    inner: Arc<SpotifyClientRef>,
}

#[derive(Debug)]
struct SpotifyClientRef {
    transport: Arc<dyn Transport>,
    token_manager: TokenManager,
    retry_policy: RetryPolicy,
    base_url: Url,
    default_headers: HeaderMap,
}

/// Builder for [SpotifyClient].
#[derive(Debug, Clone, Default)]
pub struct SpotifyClientBuilder {
    config: Config,
    access_token_lifetime: Option<Duration>,
    backoff: Backoff,
    transport: Option<Arc<dyn Transport>>,
}

impl SpotifyClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing [Config]. Any builder function called afterwards overrides the value from the config.
    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Sets the application's client ID and secret. With only these the client uses the client credentials flow.
    pub fn client_credentials<I, S>(mut self, client_id: I, client_secret: S) -> Self
    where
        I: Into<String>,
        S: Into<String>,
    {
        self.config.client_credentials = Some(crate::config::ClientCredentials {
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
        });
        self
    }

    /// Sets a user's refresh token. Together with the client credentials the client uses the refresh token flow.
    pub fn refresh_token<S>(mut self, refresh_token: S) -> Self
    where
        S: Into<String>,
    {
        self.config.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets an existing access token. It is assumed to be valid for an hour from when the client is built.
    pub fn access_token<S>(mut self, access_token: S) -> Self
    where
        S: Into<String>,
    {
        self.config.access_token = Some(access_token.into());
        self
    }

    /// Sets an existing access token that is valid for the given time from when the client is built.
    pub fn access_token_with_lifetime<S>(self, access_token: S, lifetime: Duration) -> Self
    where
        S: Into<String>,
    {
        Self {
            access_token_lifetime: Some(lifetime),
            ..self.access_token(access_token)
        }
    }

    /// Whether or not to wait out rate limits and retry. Defaults to `true`.
    pub fn retry(mut self, retry: bool) -> Self {
        self.config.retry = Some(retry);
        self
    }

    /// Whether or not to retry server errors and failed connections. Defaults to `true`.
    pub fn retry_5xx(mut self, retry_5xx: bool) -> Self {
        self.config.retry_5xx = Some(retry_5xx);
        self
    }

    /// How many times server errors and failed connections are retried. Defaults to 3.
    pub fn retry_5xx_amount(mut self, retry_5xx_amount: u32) -> Self {
        self.config.retry_5xx_amount = Some(retry_5xx_amount);
        self
    }

    /// The delay between retries of server errors and failed connections. Defaults to a static one second.
    pub fn backoff(self, backoff: Backoff) -> Self {
        Self { backoff, ..self }
    }

    /// The longest rate limit that is waited out. A rate limit asking to wait longer fails with
    /// [Error::RateLimit](crate::Error::RateLimit) right away. Defaults to five minutes.
    pub fn max_retry_after(mut self, max_retry_after: Duration) -> Self {
        self.config.max_retry_after = Some(max_retry_after.as_secs());
        self
    }

    /// Whether or not to log retries. Defaults to `true`.
    pub fn log_retry(mut self, log_retry: bool) -> Self {
        self.config.log_retry = Some(log_retry);
        self
    }

    /// Log failed token requests as warnings instead of debug messages. Defaults to `false`.
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = Some(debug);
        self
    }

    /// Sends every request through the given proxy URL. Has no effect with a custom [transport](Self::transport).
    pub fn proxy<S>(mut self, proxy: S) -> Self
    where
        S: Into<String>,
    {
        self.config.http.proxy = Some(proxy.into());
        self
    }

    /// Sets the `User-Agent` header. Defaults to `spotify-http/<version>`.
    pub fn user_agent<S>(mut self, user_agent: S) -> Self
    where
        S: Into<String>,
    {
        self.config.http.user_agent = Some(user_agent.into());
        self
    }

    /// Binds outgoing connections to the given local IPv4 or IPv6 address.
    pub fn local_address<S>(mut self, local_address: S) -> Self
    where
        S: Into<String>,
    {
        self.config.http.local_address = Some(local_address.into());
        self
    }

    /// Adds a header sent with every API request. It overrides the client's default headers.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.config.http.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the URL request paths are relative to. Defaults to `https://api.spotify.com/v1`.
    pub fn base_url<S>(mut self, base_url: S) -> Self
    where
        S: Into<String>,
    {
        self.config.http.base_url = Some(base_url.into());
        self
    }

    /// Sets the accounts service endpoint access tokens are requested from. Defaults to
    /// `https://accounts.spotify.com/api/token`.
    pub fn token_url<S>(mut self, token_url: S) -> Self
    where
        S: Into<String>,
    {
        self.config.http.token_url = Some(token_url.into());
        self
    }

    /// Sends requests through a custom [Transport] instead of the default reqwest client. Proxy and local address
    /// settings have no effect when a custom transport is used.
    pub fn transport(self, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            ..self
        }
    }

    /// Builds the client. Fails if a URL, header or local address is invalid, or if the HTTP client cannot be
    /// constructed. No requests are sent until the client is used.
    pub fn build(self) -> Result<SpotifyClient> {
        let config = self.config;

        let base_url = Url::parse(config.http.base_url.as_deref().unwrap_or(API_BASE_URL))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidConfiguration(format!("{base_url} cannot be a base URL")));
        }

        let token_url = Url::parse(config.http.token_url.as_deref().unwrap_or(ACCOUNTS_API_TOKEN_ENDPOINT))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let local_address = config
                    .http
                    .local_address
                    .as_deref()
                    .map(|address| {
                        address
                            .parse::<IpAddr>()
                            .map_err(|err| Error::InvalidConfiguration(format!("invalid local address {address}: {err}")))
                    })
                    .transpose()?;

                Arc::new(ReqwestTransport::new(config.http.proxy.as_deref(), local_address)?) as Arc<dyn Transport>
            }
        };

        let mut default_headers = HeaderMap::new();
        let user_agent = config.http.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let (_, user_agent) = parse_header(header::USER_AGENT.as_str(), user_agent)?;
        default_headers.insert(header::USER_AGENT, user_agent);

        for (name, value) in &config.http.headers {
            let (name, value) = parse_header(name, value)?;
            default_headers.insert(name, value);
        }

        let access_token = config.access_token.clone().map(|access_token| {
            AccessToken::new(access_token, self.access_token_lifetime.unwrap_or(ACCESS_TOKEN_TTL))
        });

        let credentials = Arc::new(Credentials::new(
            config.client_id().map(str::to_owned),
            config.client_secret().map(str::to_owned),
            config.refresh_token.clone(),
            access_token,
        ));
        debug!("Building client with credentials: {credentials:?}");

        let retry_policy = RetryPolicy {
            retry: config.retry(),
            retry_5xx: config.retry_5xx(),
            retry_5xx_amount: config.retry_5xx_amount(),
            log_retry: config.log_retry(),
            backoff: self.backoff,
            max_retry_after: Some(config.max_retry_after()),
        };

        Ok(SpotifyClient {
            inner: Arc::new(SpotifyClientRef {
                token_manager: TokenManager::new(credentials, Arc::clone(&transport), token_url, config.debug()),
                transport,
                retry_policy,
                base_url,
                default_headers,
            }),
        })
    }
}

impl SpotifyClient {
    /// Builds the full URL for a path relative to the API base URL, with the given query parameters appended in
    /// order.
    pub fn get_url<K, V>(&self, path: &str, query: &[(K, V)]) -> Url
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut url = self.inner.base_url.clone();
        let full_path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        url.set_path(&full_path);
        url.set_query(None);

        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(key, value)| (key.as_ref(), value.as_ref())));
        }

        url
    }

    /// Returns a valid access token, acquiring a new one if needed.
    pub async fn access_token(&self) -> Result<String> {
        self.inner.token_manager.get_token().await
    }

    /// Sends a GET request.
    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::GET, path, options).await
    }

    /// Sends a POST request with the given value serialized as the JSON body.
    pub async fn post<B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, options.body(body)?).await
    }

    /// Sends a PUT request with the given value serialized as the JSON body.
    pub async fn put<B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, options.body(body)?).await
    }

    /// Sends a DELETE request. A body may be given in the options, e.g. to remove several items at once.
    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::DELETE, path, options).await
    }

    /// Sends a request, retrying it as configured, and returns the successful response.
    pub async fn request(&self, method: Method, path: &str, options: RequestOptions) -> Result<Response> {
        let mut descriptor = RequestDescriptor::new(method, path, options);
        let url = self.get_url(&descriptor.path, &descriptor.query);
        let policy = &self.inner.retry_policy;

        loop {
            let access_token = self.inner.token_manager.get_token().await?;
            let request = self.build_transport_request(&descriptor, &url, &access_token)?;

            debug!(
                "{} {url} (attempt {})",
                descriptor.method,
                descriptor.retry_attempt + 1
            );

            let outcome = match self.inner.transport.send(request).await {
                Ok(response) if response.status.is_success() => {
                    trace!("Got {} response from {url}", response.status);
                    return Ok(Response::new(response.status, response.headers, response.body));
                }

                outcome => outcome,
            };

            let failure = match &outcome {
                Ok(response) => Failure::Status {
                    status: response.status,
                    retry_after: response.retry_after(),
                },
                Err(_) => Failure::NoResponse,
            };

            match policy.decide(&failure, descriptor.retry_attempt) {
                RetryDecision::RetryRateLimited { delay } => {
                    if policy.log_retry {
                        warn!("Hit rate limit on {url}, retrying in {delay:?}");
                    }

                    retry_sleep(delay).await?;
                    descriptor.retry_attempt = 0;
                }

                RetryDecision::RetryTransient { delay } => {
                    descriptor.retry_attempt += 1;

                    if policy.log_retry {
                        warn!(
                            "Request to {url} failed ({}), retrying in {delay:?} ({}/{})",
                            describe_failure(&outcome),
                            descriptor.retry_attempt,
                            policy.retry_5xx_amount
                        );
                    }

                    retry_sleep(delay).await?;
                }

                RetryDecision::Fail(class) => return Err(self.failure_error(class, url, &descriptor, outcome)),
            }
        }
    }

    fn build_transport_request(
        &self,
        descriptor: &RequestDescriptor,
        url: &Url,
        access_token: &str,
    ) -> Result<TransportRequest> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))
                .map_err(|err| Error::InvalidHeader(format!("authorization: {err}")))?,
        );

        // static headers override the defaults, per-request headers override both
        override_headers(&mut headers, &self.inner.default_headers);
        override_headers(&mut headers, &descriptor.headers);

        let body = match &descriptor.body {
            Some(body) => TransportBody::Json(body.clone()),
            None => TransportBody::Empty,
        };

        Ok(TransportRequest {
            method: descriptor.method.clone(),
            url: url.clone(),
            headers,
            body,
        })
    }

    fn failure_error(
        &self,
        class: FailureClass,
        url: Url,
        descriptor: &RequestDescriptor,
        outcome: std::result::Result<TransportResponse, TransportError>,
    ) -> Error {
        let (status, body) = match &outcome {
            Ok(response) => (Some(response.status.as_u16()), response.body_text()),
            Err(_) => (None, String::new()),
        };

        match class {
            FailureClass::BadRequest => {
                error!("Got 400 Bad Request response from {url}");
                Error::BadRequest { url, body }
            }

            FailureClass::Unauthorized => {
                warn!("Got 401 Unauthorized response from {url}");

                if let Some(ApiErrorResponse { error }) = ApiErrorResponse::parse(&body) {
                    if error.message == ApiErrorMessage::TokenExpired {
                        warn!("Access token expired early, a new one is acquired for the next request");
                        self.inner.token_manager.invalidate();
                    }
                }

                Error::Unauthorized { url, body }
            }

            FailureClass::Forbidden => {
                error!("Got 403 Forbidden response from {url}");
                Error::Forbidden { url, body }
            }

            FailureClass::NotFound => {
                warn!("Got 404 Not Found response from {url}");
                Error::NotFound { url }
            }

            FailureClass::RateLimited { retry_after } => {
                match retry_after {
                    Some(seconds) => warn!("Got rate limited for {seconds} seconds on {url}, not retrying"),
                    None => warn!("Got rate limited on {url}, not retrying"),
                }

                Error::RateLimit { url, retry_after }
            }

            FailureClass::RetriesExceeded => {
                error!(
                    "Request to {url} exceeded all {} retry attempts",
                    descriptor.retry_attempt
                );

                Error::RetriesExceeded {
                    url: url.clone(),
                    attempts: descriptor.retry_attempt,
                    last_status: status,
                    cause: Box::new(raw_error(url, outcome)),
                }
            }

            FailureClass::Raw => raw_error(url, outcome),
        }
    }
}

fn raw_error(url: Url, outcome: std::result::Result<TransportResponse, TransportError>) -> Error {
    match outcome {
        Ok(response) => Error::UnhandledStatus {
            url,
            status: response.status.as_u16(),
            body: response.body_text(),
        },

        Err(err) => Error::Network {
            url,
            message: err.message,
            source: err.source,
        },
    }
}

fn describe_failure(outcome: &std::result::Result<TransportResponse, TransportError>) -> String {
    match outcome {
        Ok(response) => response.status.to_string(),
        Err(err) => err.message.clone(),
    }
}

/// Replaces every header in `target` that `overrides` has, keeping all of the override's values.
fn override_headers(target: &mut HeaderMap, overrides: &HeaderMap) {
    for name in overrides.keys() {
        target.remove(name);

        for value in overrides.get_all(name) {
            target.append(name.clone(), value.clone());
        }
    }
}

/// Return an error since no sleep utility has been enabled.
#[cfg(all(not(feature = "tokio_sleep"), not(feature = "async_std_sleep")))]
async fn retry_sleep(sleep_time: Duration) -> Result<()> {
    Err(Error::RetrySleepUnavailable(sleep_time))
}

// sleeping with tokio takes precedence over async_std so if the user enables both features for some reason, they get
// tokio sleep
/// Sleep for the specified amount of time using tokio's sleep function.
#[cfg(feature = "tokio_sleep")]
async fn retry_sleep(sleep_time: Duration) -> Result<()> {
    tokio::time::sleep(sleep_time).await;
    Ok(())
}

/// Sleep for the specified amount of time using async_std's sleep function.
#[cfg(all(feature = "async_std_sleep", not(feature = "tokio_sleep")))]
async fn retry_sleep(sleep_time: Duration) -> Result<()> {
    async_std::task::sleep(sleep_time).await;
    Ok(())
}
