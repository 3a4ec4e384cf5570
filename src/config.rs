//! The configuration surface consumed by [SpotifyClientBuilder](crate::client::SpotifyClientBuilder).
//!
//! [Config] mirrors the option object the client accepts and deserializes from the same camelCase keys, so it may be
//! read from any serde format. Loading it from a file or the environment is left to the application.
//!
//! ```
//! # use spotify_http::config::Config;
//! let config: Config = serde_json::from_str(
//!     r#"{
//!         "clientCredentials": { "clientId": "id", "clientSecret": "secret" },
//!         "retry5xxAmount": 5,
//!         "http": { "userAgent": "my-app/1.0" }
//!     }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.retry_5xx_amount(), 5);
//! assert!(config.retry());
//! ```

use std::{collections::BTreeMap, time::Duration};

use serde::Deserialize;

pub(crate) const DEFAULT_RETRY_5XX_AMOUNT: u32 = 3;
pub(crate) const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub client_credentials: Option<ClientCredentials>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,

    /// Retry requests that hit the rate limit. Defaults to `true`.
    pub retry: Option<bool>,
    /// Retry requests that fail with a server error or without a response. Defaults to `true`.
    #[serde(rename = "retry5xx")]
    pub retry_5xx: Option<bool>,
    /// How many times a server error or a missing response is retried. Defaults to 3.
    #[serde(rename = "retry5xxAmount")]
    pub retry_5xx_amount: Option<u32>,
    /// The longest rate limit in seconds that is waited out; longer ones fail. Defaults to 300.
    pub max_retry_after: Option<u64>,
    /// Log every retry. Defaults to `true`.
    pub log_retry: Option<bool>,
    /// Log failed token requests more loudly. Defaults to `false`.
    pub debug: Option<bool>,

    #[serde(default)]
    pub http: HttpOptions,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpOptions {
    /// URL of a proxy all requests are sent through.
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    /// Local IPv4 or IPv6 address outgoing connections are bound to.
    pub local_address: Option<String>,
    /// Static headers added to every API request. They override the default headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(rename = "baseURL")]
    pub base_url: Option<String>,
    #[serde(rename = "tokenURL")]
    pub token_url: Option<String>,
}

impl Config {
    pub fn retry(&self) -> bool {
        self.retry.unwrap_or(true)
    }

    pub fn retry_5xx(&self) -> bool {
        self.retry_5xx.unwrap_or(true)
    }

    pub fn retry_5xx_amount(&self) -> u32 {
        self.retry_5xx_amount.unwrap_or(DEFAULT_RETRY_5XX_AMOUNT)
    }

    pub fn max_retry_after(&self) -> Duration {
        self.max_retry_after
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_MAX_RETRY_AFTER)
    }

    pub fn log_retry(&self) -> bool {
        self.log_retry.unwrap_or(true)
    }

    pub fn debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    pub(crate) fn client_id(&self) -> Option<&str> {
        self.client_credentials.as_ref()?.client_id.as_deref()
    }

    pub(crate) fn client_secret(&self) -> Option<&str> {
        self.client_credentials.as_ref()?.client_secret.as_deref()
    }
}
