//! GET with per-attempt timeout, exponential backoff and cooperative
//! cancellation.
//!
//! The retry decision is a pure function of the failure count and the last
//! error ([`RetryPolicy::next_action`]); [`RetryClient::fetch_with_retry`]
//! only drives it, racing every suspension point against the caller's
//! [`CancellationToken`].

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{HttpError, HttpRequest, HttpResponse, HttpTransport};
use crate::{BASE_BACKOFF_MS, DEFAULT_MAX_RETRIES, JITTER_MAX_MS, MAX_BACKOFF_MS};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out after {attempts} attempt(s): {message}")]
    Timeout { attempts: u32, message: String },

    #[error("network failure after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },

    #[error("request canceled")]
    Canceled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, FetchError::Canceled)
    }

    /// Tags the error that ended the loop. Cancellation stays distinct from
    /// exhausted retries.
    fn from_last(error: &HttpError, attempts: u32) -> Self {
        match error {
            HttpError::Timeout { .. } => FetchError::Timeout {
                attempts,
                message: error.to_string(),
            },
            HttpError::ConnectionError { .. }
            | HttpError::HttpStatus { .. }
            | HttpError::ResponseTooLarge { .. } => FetchError::Network {
                attempts,
                message: error.to_string(),
            },
            HttpError::Cancelled { .. } => FetchError::Canceled,
            HttpError::InvalidResponse { reason, .. } => {
                FetchError::InvalidResponse(reason.clone())
            }
            HttpError::InvalidUrl { .. } | HttpError::InvalidRequest { .. } => FetchError::InvalidRequest(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff_ms: BASE_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            jitter_max_ms: JITTER_MAX_MS,
        }
    }
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry `k` (1-based), without jitter:
    /// `min(base * 2^(k-1), max_backoff)`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let ms = self
            .base_backoff_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn sample_jitter(&self) -> Duration {
        Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_max_ms))
    }

    /// What to do after `failed_attempts` attempts have failed, the last one
    /// with `error`. `jitter` is added to the backoff and clamped to
    /// `jitter_max_ms`.
    pub fn next_action(&self, failed_attempts: u32, error: &HttpError, jitter: Duration) -> RetryAction {
        if !error.is_retryable() || failed_attempts > self.max_retries {
            return RetryAction::GiveUp;
        }
        let jitter = jitter.min(Duration::from_millis(self.jitter_max_ms));
        RetryAction::RetryAfter(self.backoff_for(failed_attempts) + jitter)
    }
}

#[derive(Clone)]
pub struct RetryClient {
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for RetryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryClient").finish_non_exhaustive()
    }
}

impl RetryClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Issues `request` up to `policy.max_retries + 1` times. Each attempt is
    /// bounded by the request's timeout. Non-2xx statuses count as failures.
    /// Triggering `cancel` at any point, including mid-backoff, resolves
    /// the call as [`FetchError::Canceled`] without another attempt.
    #[instrument(
        skip(self, request, policy, cancel),
        fields(
            url = %request.url().redacted(),
            request_id = %request.request_id(),
            max_retries = policy.max_retries,
        )
    )]
    pub async fn fetch_with_retry(
        &self,
        request: &HttpRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, FetchError> {
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                debug!(attempts, "canceled before attempt");
                return Err(FetchError::Canceled);
            }

            attempts += 1;
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(attempt = attempts, "canceled during attempt");
                    return Err(FetchError::Canceled);
                }
                result = tokio::time::timeout(request.timeout(), self.transport.send(request)) => result,
            };

            let error = match outcome {
                Ok(Ok(response)) => match response.error_for_status() {
                    Ok(response) => {
                        debug!(
                            attempt = attempts,
                            status = response.status(),
                            duration_ms = response.duration_ms(),
                            "request succeeded"
                        );
                        return Ok(response);
                    }
                    Err(e) => e,
                },
                Ok(Err(e)) => e,
                Err(_elapsed) => HttpError::Timeout {
                    timeout_ms: request.timeout_ms(),
                    request_id: request.request_id().to_string(),
                },
            };

            match policy.next_action(attempts, &error, policy.sample_jitter()) {
                RetryAction::RetryAfter(delay) => {
                    warn!(
                        attempt = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "attempt failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            debug!(attempt = attempts, "canceled during backoff");
                            return Err(FetchError::Canceled);
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RetryAction::GiveUp => {
                    info!(attempts, error = %error, "giving up");
                    return Err(FetchError::from_last(&error, attempts));
                }
            }
        }
    }
}
