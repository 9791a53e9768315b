use std::collections::HashSet;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::capabilities::{Capabilities, KvError};
use crate::model::{ImageId, ImageRecord};
use crate::store::{toggle_membership, GalleryStore};

/// Favorite membership as last read from the store, plus local changes
/// whose writes have not settled yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FavoritesSnapshot {
    pub ids: Vec<ImageId>,
    pub pending: HashSet<ImageId>,
    pub loaded: bool,
}

impl FavoritesSnapshot {
    pub fn contains(&self, id: &ImageId) -> bool {
        self.ids.contains(id)
    }

    pub fn is_pending(&self, id: &ImageId) -> bool {
        self.pending.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn set_membership(&mut self, id: &ImageId, favorite: bool) {
        if self.contains(id) != favorite {
            toggle_membership(&mut self.ids, id);
        }
    }
}

/// Phase one of a toggle: the membership shown before the write settles.
#[derive(Debug)]
struct Tentative {
    id: ImageId,
    favorite: bool,
}

/// One view's handle on the favorites table. Each view owns its own and
/// calls [`reload`](FavoritesSync::reload) when it regains focus, since
/// another view may have changed favorites in the meantime.
#[derive(Debug)]
pub struct FavoritesSync {
    store: GalleryStore,
    snapshot: watch::Sender<FavoritesSnapshot>,
}

impl FavoritesSync {
    pub fn new(store: GalleryStore) -> Self {
        let (snapshot, _) = watch::channel(FavoritesSnapshot::default());
        Self { store, snapshot }
    }

    pub fn from_capabilities(caps: &Capabilities) -> Self {
        Self::new(GalleryStore::new(caps.kv.clone()))
    }

    /// Creates a handle and loads the first snapshot.
    pub async fn open(store: GalleryStore) -> Result<Self, KvError> {
        let sync = Self::new(store);
        sync.reload().await?;
        Ok(sync)
    }

    pub fn snapshot(&self) -> FavoritesSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FavoritesSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn is_favorite(&self, id: &ImageId) -> bool {
        self.snapshot.borrow().contains(id)
    }

    /// Re-reads the full set. Ids with a write still in flight keep their
    /// local membership. On failure the previous snapshot stays.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<(), KvError> {
        let stored = self.store.favorites().await?;
        self.snapshot.send_modify(|snap| {
            let local: Vec<(ImageId, bool)> = snap
                .pending
                .iter()
                .map(|id| (id.clone(), snap.contains(id)))
                .collect();
            snap.ids = stored;
            for (id, favorite) in &local {
                snap.set_membership(id, *favorite);
            }
            snap.loaded = true;
        });
        debug!(count = self.snapshot.borrow().len(), "favorites reloaded");
        Ok(())
    }

    /// Flips `id` locally at once, then persists. When the write fails the
    /// local change is reverted and the error returned. Returns the new
    /// membership on success.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn toggle(&self, id: &ImageId) -> Result<bool, KvError> {
        let tentative = self.apply(id);
        // Persist the target state, not a flip: the snapshot may be ahead of
        // or behind the store.
        let result = self.store.set_favorite(&tentative.id, tentative.favorite).await;
        match result {
            Ok(()) => {
                self.settle(&tentative);
                debug!(favorite = tentative.favorite, "favorite committed");
                Ok(tentative.favorite)
            }
            Err(e) => {
                self.revert(&tentative);
                warn!(error = %e, "favorite write failed, reverted");
                Err(e)
            }
        }
    }

    /// Cached records for the current favorites, in favorites order.
    pub async fn resolve(&self) -> Result<Vec<(ImageId, Option<ImageRecord>)>, KvError> {
        let metadata = self.store.metadata().await?;
        let ids = self.snapshot.borrow().ids.clone();
        Ok(ids
            .into_iter()
            .map(|id| {
                let record = metadata.get(&id).cloned();
                (id, record)
            })
            .collect())
    }

    fn apply(&self, id: &ImageId) -> Tentative {
        let mut favorite = false;
        self.snapshot.send_modify(|snap| {
            favorite = toggle_membership(&mut snap.ids, id);
            snap.pending.insert(id.clone());
        });
        Tentative {
            id: id.clone(),
            favorite,
        }
    }

    fn settle(&self, tentative: &Tentative) {
        self.snapshot.send_modify(|snap| {
            snap.pending.remove(&tentative.id);
        });
    }

    fn revert(&self, tentative: &Tentative) {
        self.snapshot.send_modify(|snap| {
            snap.set_membership(&tentative.id, !tentative.favorite);
            snap.pending.remove(&tentative.id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::FailableStore;
    use crate::capabilities::MemoryStore;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    fn sync() -> (FavoritesSync, Arc<FailableStore<MemoryStore>>) {
        let kv = Arc::new(FailableStore::new(MemoryStore::new()));
        (FavoritesSync::new(GalleryStore::new(kv.clone())), kv)
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_updates_snapshot_and_store() {
        let (sync, kv) = sync();
        let id = ImageId::from("7");

        assert!(sync.toggle(&id).await.unwrap());
        assert!(sync.is_favorite(&id));
        assert_eq!(kv.write_count(), 1);

        assert!(!sync.toggle(&id).await.unwrap());
        assert!(!sync.is_favorite(&id));
        assert!(sync.snapshot().pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_is_visible_before_write_settles() {
        let (sync, kv) = sync();
        kv.set_write_delay(Some(Duration::from_millis(500)));
        let id = ImageId::from("7");

        let (result, ()) = tokio::join!(sync.toggle(&id), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(sync.is_favorite(&id));
            assert!(sync.snapshot().is_pending(&id));
            assert_eq!(kv.write_count(), 0);
        });

        assert!(result.unwrap());
        assert!(!sync.snapshot().is_pending(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_reverts_and_surfaces_error() {
        let (sync, kv) = sync();
        kv.set_fail_writes(true);
        let id = ImageId::from("7");
        let mut rx = sync.subscribe();

        let result = sync.toggle(&id).await;

        assert_matches!(result, Err(KvError::Storage { .. }));
        assert!(!sync.is_favorite(&id));
        assert!(sync.snapshot().pending.is_empty());
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_picks_up_changes_from_another_view() {
        let kv = Arc::new(MemoryStore::new());
        let grid = FavoritesSync::open(GalleryStore::new(kv.clone())).await.unwrap();
        let detail = FavoritesSync::open(GalleryStore::new(kv.clone())).await.unwrap();
        let id = ImageId::from("3");

        detail.toggle(&id).await.unwrap();
        assert!(!grid.is_favorite(&id));

        grid.reload().await.unwrap();
        assert!(grid.is_favorite(&id));
        assert!(grid.snapshot().loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_failure_keeps_previous_snapshot() {
        let (sync, kv) = sync();
        let id = ImageId::from("1");
        sync.toggle(&id).await.unwrap();

        kv.set_fail_reads(true);
        assert!(sync.reload().await.is_err());
        assert!(sync.is_favorite(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_joins_metadata() {
        let (sync, kv) = sync();
        let store = GalleryStore::new(kv.clone());
        let mut record = ImageRecord::new(5u64);
        record.thumbnail_url = Some("t5".into());
        store.upsert_metadata(&[record]).await.unwrap();

        sync.toggle(&ImageId::from("5")).await.unwrap();
        sync.toggle(&ImageId::from("6")).await.unwrap();

        let resolved = sync.resolve().await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(
            resolved[0].1.as_ref().and_then(|r| r.thumbnail_url.as_deref()),
            Some("t5")
        );
        assert!(resolved[1].1.is_none());
    }
}
