#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod api;
pub mod capabilities;
pub mod config;
pub mod favorites;
pub mod feed;
pub mod model;
pub mod retry;
pub mod store;
pub mod view;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use api::{build_image_list_url, ImageListQuery, ImageListResponse};
pub use capabilities::Capabilities;
pub use config::{ConfigError, GalleryConfig, RetryConfig, SortOrder};
pub use favorites::FavoritesSync;
pub use feed::{FeedController, LoadOutcome, SkipReason};
pub use model::{EventId, ImageId, ImageRecord, LoadStatus, Page, PaginationState};
pub use retry::{FetchError, RetryAction, RetryClient, RetryPolicy};
pub use store::GalleryStore;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const BASE_BACKOFF_MS: u64 = 500;
pub const MAX_BACKOFF_MS: u64 = 30_000;
pub const JITTER_MAX_MS: u64 = 200;
pub const DEFAULT_ORDER_BY: u32 = 2;
pub const DEFAULT_ORDER_ASC: bool = true;
pub const DEFAULT_PREFETCH_ITEMS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Timeout,
    NetworkFailure,
    Canceled,
    StorageFailure,
    InvalidResponse,
    InvalidConfig,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::NetworkFailure => "NETWORK_ERROR",
            Self::Canceled => "CANCELED",
            Self::StorageFailure => "STORAGE_ERROR",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::InvalidConfig => "INVALID_CONFIG",
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::NetworkFailure | Self::StorageFailure
        )
    }
}

/// Error as carried in observable state: clonable, comparable and free of
/// transport internals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: Option<u32>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.kind == ErrorKind::Canceled
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::NetworkFailure => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Canceled => "The request was canceled.".into(),
            ErrorKind::StorageFailure => {
                "Unable to save data locally. Please try again.".into()
            }
            ErrorKind::InvalidResponse => {
                "The server sent an unexpected response. Please try again later.".into()
            }
            ErrorKind::InvalidConfig => self.message.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)
    }
}

impl std::error::Error for AppError {}

impl From<FetchError> for AppError {
    fn from(e: FetchError) -> Self {
        let message = e.to_string();
        match e {
            FetchError::Timeout { attempts, .. } => {
                AppError::new(ErrorKind::Timeout, message).with_attempts(attempts)
            }
            FetchError::Network { attempts, .. } => {
                AppError::new(ErrorKind::NetworkFailure, message).with_attempts(attempts)
            }
            FetchError::Canceled => AppError::new(ErrorKind::Canceled, message),
            FetchError::InvalidRequest(_) => AppError::new(ErrorKind::InvalidConfig, message),
            FetchError::InvalidResponse(_) => AppError::new(ErrorKind::InvalidResponse, message),
        }
    }
}

impl From<capabilities::KvError> for AppError {
    fn from(e: capabilities::KvError) -> Self {
        AppError::new(ErrorKind::StorageFailure, e.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::InvalidConfig, e.to_string())
    }
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
