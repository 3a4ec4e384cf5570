//! Deciding whether a failed attempt is retried, and how long to wait before it is.
//!
//! [RetryPolicy::decide] is a pure function of the failure, the request's attempt counter and the client
//! configuration. Sleeping and resubmitting is up to the caller.

use std::time::Duration;

use reqwest::StatusCode;

use crate::config::{DEFAULT_MAX_RETRY_AFTER, DEFAULT_RETRY_5XX_AMOUNT};

/// The delay between retries of server errors and failed connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always wait the same amount of time.
    Static(Duration),
    /// Wait the given duration multiplied by the retry attempt number.
    Linear(Duration),
    /// Wait `base * (2^attempt - 1) / 2`, but no longer than `max`.
    Exponential { base: Duration, max: Duration },
}

/// What went wrong with a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The server responded with a non-success status.
    Status {
        status: StatusCode,
        /// The `Retry-After` header in seconds, if the response had a valid one.
        retry_after: Option<u64>,
    },
    /// No response was received.
    NoResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait and resubmit. The request's attempt counter is reset.
    RetryRateLimited { delay: Duration },
    /// Wait and resubmit. The request's attempt counter is incremented.
    RetryTransient { delay: Duration },
    Fail(FailureClass),
}

/// How a terminal failure is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    /// `retry_after` is `None` when the response had no usable `Retry-After` header.
    RateLimited { retry_after: Option<u64> },
    RetriesExceeded,
    /// Not classified; the failure is passed through as-is.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry: bool,
    pub retry_5xx: bool,
    pub retry_5xx_amount: u32,
    pub log_retry: bool,
    pub backoff: Backoff,
    /// Rate limits asking to wait longer than this fail instead of being waited out. `None` waits any amount.
    pub max_retry_after: Option<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Static(Duration::from_secs(1))
    }
}

impl Backoff {
    /// The delay before the given retry. `attempt` is 1 for the first retry.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Static(delay) => delay,
            Backoff::Linear(step) => step.saturating_mul(attempt),
            Backoff::Exponential { base, max } => {
                let factor = 2f64.powi(attempt.min(32) as i32);

                Duration::try_from_secs_f64(base.as_secs_f64() * (factor - 1.0) / 2.0)
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

impl Failure {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Failure::Status { status, .. } => Some(*status),
            Failure::NoResponse => None,
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            Failure::Status { status, .. } => status.is_server_error(),
            Failure::NoResponse => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry: true,
            retry_5xx: true,
            retry_5xx_amount: DEFAULT_RETRY_5XX_AMOUNT,
            log_retry: true,
            backoff: Backoff::default(),
            max_retry_after: Some(DEFAULT_MAX_RETRY_AFTER),
        }
    }
}

impl RetryPolicy {
    /// Decides what to do about a failed attempt. `retry_attempt` is the number of transient retries the request has
    /// already gone through.
    pub fn decide(&self, failure: &Failure, retry_attempt: u32) -> RetryDecision {
        if let Failure::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            retry_after,
        } = *failure
        {
            let too_long = retry_after.map_or(false, |seconds| {
                self.max_retry_after
                    .map_or(false, |max| Duration::from_secs(seconds) > max)
            });

            return if self.retry && !too_long {
                // a rate limit without a usable Retry-After still shouldn't hammer the API
                let delay = retry_after
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.backoff.delay(1));

                RetryDecision::RetryRateLimited { delay }
            } else {
                RetryDecision::Fail(FailureClass::RateLimited { retry_after })
            };
        }

        if failure.is_transient() {
            return if !self.retry_5xx {
                RetryDecision::Fail(FailureClass::Raw)
            } else if retry_attempt >= self.retry_5xx_amount {
                RetryDecision::Fail(FailureClass::RetriesExceeded)
            } else {
                RetryDecision::RetryTransient {
                    delay: self.backoff.delay(retry_attempt + 1),
                }
            };
        }

        let class = match failure.status() {
            Some(StatusCode::BAD_REQUEST) => FailureClass::BadRequest,
            Some(StatusCode::UNAUTHORIZED) => FailureClass::Unauthorized,
            Some(StatusCode::FORBIDDEN) => FailureClass::Forbidden,
            Some(StatusCode::NOT_FOUND) => FailureClass::NotFound,
            _ => FailureClass::Raw,
        };

        RetryDecision::Fail(class)
    }
}
