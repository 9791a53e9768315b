use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_RESPONSE_BODY_SIZE: usize = 20 * 1024 * 1024;
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Query parameters whose values never appear in logs.
const REDACTED_PARAMS: &[&str] = &["key", "token", "access_key"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: String,
    host: String,
}

impl ValidatedUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, HttpError> {
        let url = url.into();
        let parsed = Self::validate(&url)?;
        Ok(Self::from_parsed(&parsed))
    }

    pub fn from_url(url: &Url) -> Result<Self, HttpError> {
        Self::new(url.as_str())
    }

    fn from_parsed(parsed: &Url) -> Self {
        Self {
            url: parsed.to_string(),
            host: parsed.host_str().unwrap_or_default().to_lowercase(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The URL with credential-bearing query values masked, for log lines.
    pub fn redacted(&self) -> String {
        let Ok(mut parsed) = Url::parse(&self.url) else {
            return Self::truncate_url(&self.url);
        };
        if parsed.query().is_none() {
            return self.url.clone();
        }

        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| {
                let value = if REDACTED_PARAMS.contains(&k.as_ref()) {
                    "***".to_string()
                } else {
                    v.into_owned()
                };
                (k.into_owned(), value)
            })
            .collect();
        {
            let mut query = parsed.query_pairs_mut();
            query.clear();
            for (k, v) in &pairs {
                query.append_pair(k, v);
            }
        }
        parsed.to_string()
    }

    fn validate(url: &str) -> Result<Url, HttpError> {
        if url.trim().is_empty() {
            return Err(HttpError::InvalidUrl {
                url: url.to_string(),
                reason: "URL cannot be empty".to_string(),
            });
        }

        if url.len() > MAX_URL_LENGTH {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(url),
                reason: format!("URL exceeds maximum length of {MAX_URL_LENGTH} bytes"),
            });
        }

        let parsed = Url::parse(url).map_err(|e| HttpError::InvalidUrl {
            url: Self::truncate_url(url),
            reason: e.to_string(),
        })?;

        let scheme = parsed.scheme().to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(url),
                reason: format!("invalid scheme '{scheme}', only 'http' and 'https' are allowed"),
            });
        }

        if parsed.host_str().is_none() {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(url),
                reason: "URL must have a host".to_string(),
            });
        }

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(url),
                reason: "credentials in URL are not allowed".to_string(),
            });
        }

        Ok(parsed)
    }

    fn truncate_url(url: &str) -> String {
        if url.len() <= 100 {
            return url.to_string();
        }
        let mut end = 100;
        while !url.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &url[..end])
    }
}

/// A GET request against the image API. The core never sends bodies; the
/// only headers are the fixed ones the API client sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    url: ValidatedUrl,
    headers: Vec<(String, String)>,
    timeout_ms: u64,
    request_id: String,
}

impl HttpRequest {
    pub fn new(url: ValidatedUrl) -> Self {
        Self {
            url,
            headers: Vec::new(),
            timeout_ms: crate::DEFAULT_TIMEOUT_MS,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn get(url: impl Into<String>) -> Result<Self, HttpError> {
        Ok(Self::new(ValidatedUrl::new(url)?))
    }

    /// Sets `name`, replacing an earlier value for the same header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Result<Self, HttpError> {
        if timeout_ms == 0 {
            return Err(HttpError::InvalidRequest {
                reason: "timeout cannot be zero".to_string(),
            });
        }
        if timeout_ms > MAX_TIMEOUT_MS {
            return Err(HttpError::InvalidRequest {
                reason: format!("timeout exceeds maximum of {MAX_TIMEOUT_MS}ms"),
            });
        }
        self.timeout_ms = timeout_ms;
        Ok(self)
    }

    pub fn url(&self) -> &ValidatedUrl {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum HttpError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("connection failed to {host}: {message}")]
    ConnectionError { host: String, message: String },

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64, request_id: String },

    #[error("HTTP error {status}: {message}")]
    HttpStatus {
        status: u16,
        message: String,
        request_id: String,
    },

    #[error("request cancelled")]
    Cancelled { request_id: String },

    #[error("response body too large: {size} bytes exceeds maximum of {max} bytes")]
    ResponseTooLarge { size: usize, max: usize },

    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String, request_id: String },
}

impl HttpError {
    /// Transport-level failures worth another attempt. Malformed requests
    /// and cancellations are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HttpError::Timeout { .. }
                | HttpError::ConnectionError { .. }
                | HttpError::HttpStatus { .. }
                | HttpError::ResponseTooLarge { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    body: Vec<u8>,
    request_id: String,
    duration_ms: u64,
}

impl HttpResponse {
    pub fn new(status: u16, body: Vec<u8>, request_id: String, duration_ms: u64) -> Self {
        Self {
            status,
            body,
            request_id,
            duration_ms,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::InvalidResponse {
            reason: format!("failed to parse JSON: {e}"),
            request_id: self.request_id.clone(),
        })
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Converts a non-2xx response into the error the retry loop works with.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.is_success() {
            return Ok(self);
        }
        let snippet: String = String::from_utf8_lossy(&self.body).chars().take(200).collect();
        Err(HttpError::HttpStatus {
            status: self.status,
            message: snippet,
            request_id: self.request_id,
        })
    }
}

pub type HttpResult = Result<HttpResponse, HttpError>;

/// Performs a single attempt. Timeouts, retries and cancellation are layered
/// on top by [`crate::retry::RetryClient`]; dropping the returned future must
/// abort the attempt.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> HttpResult;
}

#[cfg(feature = "native-transport")]
pub use native::ReqwestTransport;

#[cfg(feature = "native-transport")]
mod native {
    use super::{
        HttpError, HttpRequest, HttpResponse, HttpResult, HttpTransport, MAX_RESPONSE_BODY_SIZE,
    };
    use async_trait::async_trait;
    use std::time::Instant;

    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Result<Self, HttpError> {
            let client = reqwest::Client::builder()
                .build()
                .map_err(|e| HttpError::InvalidRequest {
                    reason: format!("failed to build HTTP client: {e}"),
                })?;
            Ok(Self { client })
        }

        fn map_error(error: &reqwest::Error, request: &HttpRequest) -> HttpError {
            if error.is_timeout() {
                HttpError::Timeout {
                    timeout_ms: request.timeout_ms(),
                    request_id: request.request_id().to_string(),
                }
            } else if error.is_decode() || error.is_body() {
                HttpError::InvalidResponse {
                    reason: error.to_string(),
                    request_id: request.request_id().to_string(),
                }
            } else {
                HttpError::ConnectionError {
                    host: request.url().host().to_string(),
                    message: error.to_string(),
                }
            }
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: &HttpRequest) -> HttpResult {
            let started = Instant::now();

            let mut builder = self
                .client
                .get(request.url().as_str())
                .timeout(request.timeout());
            for (name, value) in request.headers() {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder
                .send()
                .await
                .map_err(|e| Self::map_error(&e, request))?;

            let status = response.status().as_u16();

            if let Some(len) = response.content_length() {
                let len = usize::try_from(len).unwrap_or(usize::MAX);
                if len > MAX_RESPONSE_BODY_SIZE {
                    return Err(HttpError::ResponseTooLarge {
                        size: len,
                        max: MAX_RESPONSE_BODY_SIZE,
                    });
                }
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| Self::map_error(&e, request))?;
            if body.len() > MAX_RESPONSE_BODY_SIZE {
                return Err(HttpError::ResponseTooLarge {
                    size: body.len(),
                    max: MAX_RESPONSE_BODY_SIZE,
                });
            }

            Ok(HttpResponse::new(
                status,
                body.to_vec(),
                request.request_id().to_string(),
                u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            ))
        }
    }
}
