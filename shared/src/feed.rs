//! Paginated image feed for one screen session.
//!
//! At most one page request is in flight per controller. A load that is
//! canceled or superseded never touches the published state: each flight
//! carries a generation number and only the current generation may commit,
//! so a page is appended whole or not at all.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::ImageListApi;
use crate::capabilities::Capabilities;
use crate::config::{ConfigError, GalleryConfig};
use crate::model::{LoadStatus, Page, PaginationState};
use crate::retry::{FetchError, RetryClient};
use crate::store::GalleryStore;
use crate::view;
use crate::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another load or refresh is running; the call was dropped.
    InFlight,
    /// The last page was short; there is nothing more to load.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded { page: u32, count: usize },
    Skipped(SkipReason),
    /// Canceled before it could commit. State was left as `cancel` set it.
    Canceled,
    Failed(AppError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    Next,
    Refresh,
}

impl LoadKind {
    fn busy_status(self) -> LoadStatus {
        match self {
            LoadKind::Next => LoadStatus::Loading,
            LoadKind::Refresh => LoadStatus::Refreshing,
        }
    }
}

#[derive(Debug, Default)]
struct Flight {
    generation: u64,
    active: Option<CancellationToken>,
}

/// Ends a flight on drop, including when the caller abandons the load
/// future mid-request. A guard whose generation was superseded by
/// `cancel` or a later flight leaves everything alone.
struct FlightGuard<'a> {
    feed: &'a FeedController,
    generation: u64,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flight = self.feed.lock_flight();
        if flight.generation != self.generation {
            return;
        }
        if let Some(token) = flight.active.take() {
            token.cancel();
        }
        self.feed.state.send_if_modified(|s| {
            if s.status.is_busy() {
                s.status = LoadStatus::Idle;
                true
            } else {
                false
            }
        });
    }
}

pub struct FeedController {
    api: ImageListApi,
    store: GalleryStore,
    state: watch::Sender<PaginationState>,
    flight: Mutex<Flight>,
    shutdown: CancellationToken,
    prefetch_items: usize,
}

impl std::fmt::Debug for FeedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedController")
            .field("api", &self.api)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl FeedController {
    /// Builds an idle controller with no items. Most callers want [`open`].
    ///
    /// [`open`]: FeedController::open
    pub fn new(config: &GalleryConfig, caps: &Capabilities) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(PaginationState::default());
        Ok(Self {
            api: ImageListApi::new(RetryClient::new(caps.http.clone()), config),
            store: GalleryStore::new(caps.kv.clone()),
            state,
            flight: Mutex::new(Flight::default()),
            shutdown: CancellationToken::new(),
            prefetch_items: config.prefetch_items,
        })
    }

    /// Builds a controller and runs the initial refresh. A failed first page
    /// is reported through the state, not as an error here.
    pub async fn open(config: &GalleryConfig, caps: &Capabilities) -> Result<Self, ConfigError> {
        let controller = Self::new(config, caps)?;
        controller.refresh().await;
        Ok(controller)
    }

    pub fn state(&self) -> PaginationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PaginationState> {
        self.state.subscribe()
    }

    pub fn store(&self) -> &GalleryStore {
        &self.store
    }

    /// Load trigger for the grid, using the configured prefetch distance.
    /// See [`view::should_load_more`].
    pub fn should_load_more(&self, last_visible_index: usize) -> bool {
        view::should_load_more(&self.state.borrow(), last_visible_index, self.prefetch_items)
    }

    /// Requests the page after the cursor and appends it. Dropped while a
    /// load is running or once the feed is exhausted.
    #[instrument(skip(self))]
    pub async fn load_next(&self) -> LoadOutcome {
        self.run(LoadKind::Next).await
    }

    /// Requests page 1 and replaces the items. Ignores exhaustion and a
    /// previous error, but is still dropped while a load is running.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> LoadOutcome {
        self.run(LoadKind::Refresh).await
    }

    /// Retry affordance: refresh when nothing is loaded yet, otherwise
    /// retry the next page.
    pub async fn retry(&self) -> LoadOutcome {
        if self.state.borrow().items.is_empty() {
            self.refresh().await
        } else {
            self.load_next().await
        }
    }

    /// Aborts the in-flight request, if any, and forces the status back to
    /// idle. Items and the last error are kept.
    pub fn cancel(&self) {
        let mut flight = self.lock_flight();
        if let Some(token) = flight.active.take() {
            flight.generation += 1;
            token.cancel();
            info!(generation = flight.generation, "in-flight load canceled");
        }
        self.state.send_if_modified(|s| {
            if s.status.is_busy() {
                s.status = LoadStatus::Idle;
                true
            } else {
                false
            }
        });
    }

    /// Records host connectivity for the offline banner. Requests are not
    /// gated on it.
    pub fn set_online(&self, online: bool) {
        self.state.send_if_modified(|s| {
            let changed = s.online != online;
            s.online = online;
            changed
        });
    }

    fn lock_flight(&self) -> MutexGuard<'_, Flight> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, kind: LoadKind) -> Result<(u64, u32, CancellationToken), SkipReason> {
        let mut flight = self.lock_flight();
        if flight.active.is_some() {
            return Err(SkipReason::InFlight);
        }

        let page = {
            let state = self.state.borrow();
            match kind {
                LoadKind::Next if !state.has_next => return Err(SkipReason::Exhausted),
                LoadKind::Next => state.page_cursor.saturating_add(1),
                LoadKind::Refresh => 1,
            }
        };

        flight.generation += 1;
        let token = self.shutdown.child_token();
        flight.active = Some(token.clone());

        self.state.send_modify(|s| {
            s.status = kind.busy_status();
            s.last_error = None;
        });
        Ok((flight.generation, page, token))
    }

    /// Publishes the result if `generation` is still current. Returns
    /// `None` when the flight was canceled or superseded in the meantime.
    /// A loaded page keeps the busy status; the flight guard clears it.
    fn commit(
        &self,
        generation: u64,
        kind: LoadKind,
        result: Result<Page, FetchError>,
    ) -> Option<LoadOutcome> {
        let flight = self.lock_flight();
        if flight.generation != generation || flight.active.is_none() {
            return None;
        }

        let outcome = match result {
            Ok(page) => {
                let outcome = LoadOutcome::Loaded {
                    page: page.number,
                    count: page.records.len(),
                };
                self.state.send_modify(|s| {
                    s.apply_page(page, kind == LoadKind::Refresh);
                    s.status = kind.busy_status();
                });
                outcome
            }
            Err(FetchError::Canceled) => {
                self.state.send_modify(|s| s.status = LoadStatus::Idle);
                LoadOutcome::Canceled
            }
            Err(e) => {
                let error = AppError::from(e);
                self.state.send_modify(|s| {
                    s.status = LoadStatus::Error;
                    s.last_error = Some(error.clone());
                });
                LoadOutcome::Failed(error)
            }
        };
        Some(outcome)
    }

    async fn run(&self, kind: LoadKind) -> LoadOutcome {
        let (generation, page, token) = match self.begin(kind) {
            Ok(started) => started,
            Err(reason) => {
                debug!(?reason, ?kind, "load skipped");
                return LoadOutcome::Skipped(reason);
            }
        };
        let flight = FlightGuard {
            feed: self,
            generation,
        };
        info!(?kind, page, generation, "load started");

        let result = self.api.fetch_page(page, &token).await;
        let records = match &result {
            Ok(page) => Some(page.records.clone()),
            Err(_) => None,
        };

        let Some(outcome) = self.commit(generation, kind, result) else {
            debug!(generation, "load superseded, result dropped");
            return LoadOutcome::Canceled;
        };

        // The flight stays open while metadata is written so one
        // controller never races itself on the metadata key.
        if let Some(records) = records {
            if let Err(e) = self.store.upsert_metadata(&records).await {
                warn!(error = %e, count = records.len(), "failed to cache image metadata");
            }
        }
        drop(flight);

        match &outcome {
            LoadOutcome::Loaded { page, count } => info!(page, count, "load finished"),
            LoadOutcome::Failed(e) => warn!(code = e.code(), error = %e, "load failed"),
            LoadOutcome::Canceled | LoadOutcome::Skipped(_) => {}
        }
        outcome
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
