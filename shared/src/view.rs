//! View models handed to the display layer. Everything here is a pure
//! function of controller state and favorites snapshots.

use serde::{Deserialize, Serialize};

use crate::favorites::FavoritesSnapshot;
use crate::model::{ImageId, ImageRecord, LoadStatus, PaginationState};
use crate::AppError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserFacingError {
    pub message: String,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageCard {
    pub id: ImageId,
    pub thumbnail_url: Option<String>,
    pub is_favorite: bool,
    /// A favorite write for this id has not settled yet.
    pub favorite_pending: bool,
}

impl ImageCard {
    fn new(id: ImageId, record: Option<&ImageRecord>, favorites: &FavoritesSnapshot) -> Self {
        Self {
            is_favorite: favorites.contains(&id),
            favorite_pending: favorites.is_pending(&id),
            thumbnail_url: record.and_then(ImageRecord::grid_url).map(str::to_string),
            id,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GridFooter {
    None,
    Spinner,
    EndOfList,
    /// A later page failed; loaded items stay on screen.
    Error { error: UserFacingError },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GridView {
    /// Nothing loaded yet and a load is running.
    Skeleton { offline: bool },
    /// The first page failed. The display offers a retry.
    Failed { error: UserFacingError, offline: bool },
    Empty { offline: bool },
    Grid {
        cards: Vec<ImageCard>,
        footer: GridFooter,
        refreshing: bool,
        offline: bool,
    },
}

pub fn grid_view(state: &PaginationState, favorites: &FavoritesSnapshot) -> GridView {
    let offline = !state.online;

    if state.items.is_empty() {
        return match (state.status, state.last_error.as_ref()) {
            (LoadStatus::Loading | LoadStatus::Refreshing, _) => GridView::Skeleton { offline },
            (LoadStatus::Error, Some(error)) => GridView::Failed {
                error: error.into(),
                offline,
            },
            _ => GridView::Empty { offline },
        };
    }

    let footer = match (state.status, state.last_error.as_ref()) {
        (LoadStatus::Loading, _) => GridFooter::Spinner,
        (LoadStatus::Error, Some(error)) => GridFooter::Error {
            error: error.into(),
        },
        _ if !state.has_next => GridFooter::EndOfList,
        _ => GridFooter::None,
    };

    GridView::Grid {
        cards: state
            .items
            .iter()
            .map(|r| ImageCard::new(r.id.clone(), Some(r), favorites))
            .collect(),
        footer,
        refreshing: state.status == LoadStatus::Refreshing,
        offline,
    }
}

/// Whether the display should call `load_next` now. True when the last
/// visible cell is within `prefetch` items of the end and a load could
/// start. A failed page is not retried by scrolling; the footer offers it.
pub fn should_load_more(state: &PaginationState, last_visible_index: usize, prefetch: usize) -> bool {
    if !state.has_next || state.status != LoadStatus::Idle || state.items.is_empty() {
        return false;
    }
    last_visible_index.saturating_add(prefetch) >= state.items.len().saturating_sub(1)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FavoritesView {
    pub cards: Vec<ImageCard>,
    /// Favorites with no cached record; shown without a thumbnail.
    pub unresolved: usize,
}

pub fn favorites_view(
    resolved: &[(ImageId, Option<ImageRecord>)],
    favorites: &FavoritesSnapshot,
) -> FavoritesView {
    let cards: Vec<ImageCard> = resolved
        .iter()
        .filter(|(id, _)| favorites.contains(id))
        .map(|(id, record)| ImageCard::new(id.clone(), record.as_ref(), favorites))
        .collect();
    let unresolved = resolved
        .iter()
        .filter(|(id, record)| record.is_none() && favorites.contains(id))
        .count();
    FavoritesView { cards, unresolved }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewerItem {
    pub id: ImageId,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl From<&ImageRecord> for ViewerItem {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id.clone(),
            image_url: record.display_url().map(str::to_string),
            thumbnail_url: record.thumbnail_url.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewerSession {
    pub items: Vec<ViewerItem>,
    pub start_index: usize,
}

impl ViewerSession {
    pub fn current(&self) -> Option<&ViewerItem> {
        self.items.get(self.start_index)
    }

    /// Moves the start to `id`, or to the first item if `id` is absent.
    #[must_use]
    pub fn starting_at(mut self, id: &ImageId) -> Self {
        self.start_index = self.items.iter().position(|i| &i.id == id).unwrap_or(0);
        self
    }
}

/// Full-screen viewer list from grid items. `start` is clamped to the list.
pub fn viewer_items(records: &[ImageRecord], start: usize) -> ViewerSession {
    let items: Vec<ViewerItem> = records.iter().map(ViewerItem::from).collect();
    let start_index = start.min(items.len().saturating_sub(1));
    ViewerSession { items, start_index }
}

/// Full-screen viewer list from resolved favorites; ids without a cached
/// record keep their place with no locator.
pub fn viewer_items_from_favorites(
    resolved: &[(ImageId, Option<ImageRecord>)],
    start: usize,
) -> ViewerSession {
    let items: Vec<ViewerItem> = resolved
        .iter()
        .map(|(id, record)| match record {
            Some(record) => ViewerItem::from(record),
            None => ViewerItem {
                id: id.clone(),
                image_url: None,
                thumbnail_url: None,
            },
        })
        .collect();
    let start_index = start.min(items.len().saturating_sub(1));
    ViewerSession { items, start_index }
}
