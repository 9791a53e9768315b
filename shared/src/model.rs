use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::AppError;

// --- Opaque ids: the API sends numbers, storage keys are strings ---

macro_rules! opaque_id {
    ($name:ident, $what:literal) => {
        #[derive(Serialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(n.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct IdVisitor;

                impl<'de> Visitor<'de> for IdVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str(concat!("a string or integer ", $what))
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<$name, E> {
                        Ok($name(v.to_string()))
                    }

                    fn visit_string<E: de::Error>(self, v: String) -> Result<$name, E> {
                        Ok($name(v))
                    }

                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<$name, E> {
                        Ok($name(v.to_string()))
                    }

                    fn visit_i64<E: de::Error>(self, v: i64) -> Result<$name, E> {
                        Ok($name(v.to_string()))
                    }
                }

                deserializer.deserialize_any(IdVisitor)
            }
        }
    };
}

opaque_id!(ImageId, "image id");
opaque_id!(EventId, "event id");

/// One photo as returned by the image-list endpoint. Records are never
/// mutated; a refetch replaces them. Fields the core does not interpret are
/// kept verbatim in `extra` so the metadata cache round-trips them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageRecord {
    pub id: ImageId,
    #[serde(rename = "img_url", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(rename = "med_url", default, skip_serializing_if = "Option::is_none")]
    pub medium_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ImageRecord {
    pub fn new(id: impl Into<ImageId>) -> Self {
        Self {
            id: id.into(),
            image_url: None,
            thumbnail_url: None,
            medium_url: None,
            high_url: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Best locator for full-screen display.
    pub fn display_url(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .or(self.high_url.as_deref())
            .or(self.medium_url.as_deref())
            .or(self.thumbnail_url.as_deref())
    }

    /// Best locator for a grid cell.
    pub fn grid_url(&self) -> Option<&str> {
        self.thumbnail_url
            .as_deref()
            .or(self.medium_url.as_deref())
            .or(self.image_url.as_deref())
    }
}

impl From<String> for ImageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The result of one page request.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub number: u32,
    pub records: Vec<ImageRecord>,
    pub has_next: bool,
}

impl Page {
    /// `has_next` is inferred from fullness: a page holding `page_size`
    /// records or more may have a successor. When the server holds an exact
    /// multiple of `page_size`, this costs one extra request for an empty page.
    pub fn new(number: u32, records: Vec<ImageRecord>, page_size: u32) -> Self {
        let returned = u32::try_from(records.len()).unwrap_or(u32::MAX);
        Self {
            number,
            has_next: returned >= page_size,
            records,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    #[default]
    Idle,
    /// Appending the next page.
    Loading,
    /// Reloading page 1; the display shows a pull-to-refresh spinner.
    Refreshing,
    Error,
}

impl LoadStatus {
    pub const fn is_busy(self) -> bool {
        matches!(self, LoadStatus::Loading | LoadStatus::Refreshing)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            LoadStatus::Idle => "idle",
            LoadStatus::Loading => "loading",
            LoadStatus::Refreshing => "refreshing",
            LoadStatus::Error => "error",
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one feed session. Only the feed controller writes it.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PaginationState {
    pub items: Vec<ImageRecord>,
    /// Last page loaded; 0 before the first load.
    pub page_cursor: u32,
    pub has_next: bool,
    pub status: LoadStatus,
    pub last_error: Option<AppError>,
    pub online: bool,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page_cursor: 0,
            has_next: true,
            status: LoadStatus::Idle,
            last_error: None,
            online: true,
        }
    }
}

impl PaginationState {
    pub fn is_loading(&self) -> bool {
        self.status == LoadStatus::Loading
    }

    pub fn is_refreshing(&self) -> bool {
        self.status == LoadStatus::Refreshing
    }

    pub fn error(&self) -> Option<&AppError> {
        match self.status {
            LoadStatus::Error => self.last_error.as_ref(),
            _ => None,
        }
    }

    /// Appends or replaces in one step so observers never see half a page.
    pub(crate) fn apply_page(&mut self, page: Page, replace: bool) {
        if replace {
            self.items = page.records;
        } else {
            self.items.extend(page.records);
        }
        self.page_cursor = page.number;
        self.has_next = page.has_next;
        self.status = LoadStatus::Idle;
        self.last_error = None;
    }
}
