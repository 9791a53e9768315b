use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::capabilities::{HttpError, HttpRequest, ValidatedUrl};
use crate::config::{GalleryConfig, SortOrder};
use crate::model::{EventId, ImageRecord, Page};
use crate::retry::{FetchError, RetryClient, RetryPolicy};

/// Parameters of one image-list request.
#[derive(Debug)]
pub struct ImageListQuery {
    pub event_id: EventId,
    pub page: u32,
    pub page_size: u32,
    pub access_key: SecretString,
    pub sort: SortOrder,
}

impl ImageListQuery {
    pub fn new(event_id: EventId, page: u32, page_size: u32, access_key: SecretString) -> Self {
        Self {
            event_id,
            page,
            page_size,
            access_key,
            sort: SortOrder::default(),
        }
    }
}

/// Builds `<base>?event_id&page&page_size&key&order_by&order_asc`.
/// Pure: identical inputs always give the identical URL. Query parameters
/// already present on `base` are kept ahead of the generated ones.
pub fn build_image_list_url(base: &str, query: &ImageListQuery) -> Result<ValidatedUrl, HttpError> {
    let mut url = Url::parse(base).map_err(|e| HttpError::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut()
        .append_pair("event_id", query.event_id.as_str())
        .append_pair("page", &query.page.to_string())
        .append_pair("page_size", &query.page_size.to_string())
        .append_pair("key", query.access_key.expose_secret())
        .append_pair("order_by", &query.sort.order_by.to_string())
        .append_pair("order_asc", if query.sort.order_asc { "true" } else { "false" });
    ValidatedUrl::from_url(&url)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageListResponse {
    #[serde(default)]
    pub ok: Option<bool>,
    pub data: ImageListData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageListData {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub image_list: Vec<ImageRecord>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// The API sends `"image_list": null` for a page past the end.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl ImageListResponse {
    /// Converts to a [`Page`]. The page number is the one the server echoes,
    /// falling back to `requested_page`; fullness is judged against the
    /// page size the client asked for.
    pub fn into_page(self, requested_page: u32, page_size: u32) -> Page {
        let number = self.data.page.unwrap_or(requested_page);
        Page::new(number, self.data.image_list, page_size)
    }
}

/// The image-list endpoint for one event, bound to a transport and policy.
#[derive(Debug)]
pub struct ImageListApi {
    client: RetryClient,
    base_url: String,
    event_id: EventId,
    access_key: SecretString,
    page_size: u32,
    sort: SortOrder,
    timeout_ms: u64,
    policy: RetryPolicy,
}

impl ImageListApi {
    pub fn new(client: RetryClient, config: &GalleryConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            event_id: config.event_id.clone(),
            access_key: SecretString::new(config.access_key.expose_secret().clone()),
            page_size: config.page_size,
            sort: config.sort,
            timeout_ms: config.timeout_ms,
            policy: config.retry.policy(),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn query(&self, page: u32) -> ImageListQuery {
        ImageListQuery {
            event_id: self.event_id.clone(),
            page,
            page_size: self.page_size,
            access_key: SecretString::new(self.access_key.expose_secret().clone()),
            sort: self.sort,
        }
    }

    pub fn request(&self, page: u32) -> Result<HttpRequest, HttpError> {
        let url = build_image_list_url(&self.base_url, &self.query(page))?;
        HttpRequest::new(url)
            .with_header("Accept", "application/json")
            .with_timeout_ms(self.timeout_ms)
    }

    /// Fetches and decodes one page. A body that is not an image-list
    /// document fails with [`FetchError::InvalidResponse`] and is not retried.
    #[instrument(skip(self, cancel), fields(event_id = %self.event_id))]
    pub async fn fetch_page(&self, page: u32, cancel: &CancellationToken) -> Result<Page, FetchError> {
        let request = self
            .request(page)
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        let response = self
            .client
            .fetch_with_retry(&request, &self.policy, cancel)
            .await?;
        let body: ImageListResponse = response.json().map_err(|e| match e {
            HttpError::InvalidResponse { reason, .. } => FetchError::InvalidResponse(reason),
            other => FetchError::InvalidResponse(other.to_string()),
        })?;
        let page = body.into_page(page, self.page_size);
        debug!(
            page = page.number,
            count = page.records.len(),
            has_next = page.has_next,
            "page decoded"
        );
        Ok(page)
    }
}
