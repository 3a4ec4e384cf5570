//! An authenticated, rate-limit aware HTTP layer for the [Spotify Web API](https://developer.spotify.com/documentation/web-api/).
//!
//! The crate doesn't model the API's resources. It handles everything between "send a GET to `/tracks/{id}`" and a
//! successful response body: acquiring and refreshing access tokens, waiting out rate limits, retrying server errors
//! and classifying the failures that remain.
//!
//! ```no_run
//! use spotify_http::client::{RequestOptions, SpotifyClientBuilder};
//!
//! # async fn foo() -> spotify_http::Result<()> {
//! let client = SpotifyClientBuilder::new()
//!     .client_credentials("application client ID", "application client secret")
//!     .build()?;
//!
//! let album: serde_json::Value = client
//!     .get("/albums/4aawyAB9vmqN3uQ7FjRGTy", RequestOptions::new())
//!     .await?
//!     .json()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Crate features
//!
//! - `tokio_sleep` (default): wait between retries with tokio's sleep. Requires a tokio runtime.
//! - `async_std_sleep`: wait between retries with async-std's sleep. If both sleep features are enabled, tokio is
//!   used. Without either, a request that would have to wait before retrying fails with
//!   [Error::RetrySleepUnavailable] instead.
//! - `native-tls` (default): use the system TLS implementation.
//! - `rustls-tls`: use rustls instead.

pub mod client;
pub mod config;
mod error;
pub mod model;

pub use crate::error::{Error, Result};
