use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use crate::capabilities::{ValidatedUrl, MAX_TIMEOUT_MS};
use crate::model::EventId;
use crate::retry::RetryPolicy;
use crate::{
    BASE_BACKOFF_MS, DEFAULT_MAX_RETRIES, DEFAULT_ORDER_ASC, DEFAULT_ORDER_BY, DEFAULT_PAGE_SIZE,
    DEFAULT_PREFETCH_ITEMS, DEFAULT_TIMEOUT_MS, JITTER_MAX_MS, MAX_BACKOFF_MS,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SortOrder {
    pub order_by: u32,
    pub order_asc: bool,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self {
            order_by: DEFAULT_ORDER_BY,
            order_asc: DEFAULT_ORDER_ASC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff_ms: BASE_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
            jitter_max_ms: JITTER_MAX_MS,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff_ms: self.base_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            jitter_max_ms: self.jitter_max_ms,
        }
    }
}

/// Everything a feed session needs to talk to the image-list endpoint.
/// The access key is held as a secret and never printed.
#[derive(Debug, Deserialize)]
pub struct GalleryConfig {
    pub base_url: String,
    pub event_id: EventId,
    pub access_key: SecretString,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sort: SortOrder,
    #[serde(default = "default_prefetch_items")]
    pub prefetch_items: usize,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_prefetch_items() -> usize {
    DEFAULT_PREFETCH_ITEMS
}

impl GalleryConfig {
    pub fn new(
        base_url: impl Into<String>,
        event_id: impl Into<EventId>,
        access_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            event_id: event_id.into(),
            access_key: SecretString::new(access_key.into()),
            page_size: DEFAULT_PAGE_SIZE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry: RetryConfig::default(),
            sort: SortOrder::default(),
            prefetch_items: DEFAULT_PREFETCH_ITEMS,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ValidatedUrl::new(self.base_url.as_str()).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        if self.event_id.as_str().trim().is_empty() {
            return Err(ConfigError::invalid("event_id", "must not be empty"));
        }
        if self.access_key.expose_secret().is_empty() {
            return Err(ConfigError::invalid("access_key", "must not be empty"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::invalid("page_size", "must be greater than 0"));
        }
        if self.timeout_ms == 0 || self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::invalid(
                "timeout_ms",
                format!("must be between 1 and {MAX_TIMEOUT_MS}"),
            ));
        }
        if self.retry.base_backoff_ms == 0 {
            return Err(ConfigError::invalid("retry.base_backoff_ms", "must be greater than 0"));
        }
        if self.retry.max_backoff_ms < self.retry.base_backoff_ms {
            return Err(ConfigError::invalid(
                "retry.max_backoff_ms",
                "must not be less than base_backoff_ms",
            ));
        }
        Ok(())
    }
}
