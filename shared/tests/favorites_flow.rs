use assert_matches::assert_matches;
use serde_json::json;
use shared::capabilities::testing::{mock_capabilities, FailableStore, Scripted};
use shared::capabilities::{KvError, MemoryStore, SqliteStore};
use shared::view::{favorites_view, grid_view, viewer_items_from_favorites, GridView};
use shared::{FavoritesSync, FeedController, GalleryConfig, GalleryStore, ImageId, ImageRecord};
use std::sync::Arc;
use std::time::Duration;

fn one_page() -> serde_json::Value {
    json!({
        "data": {
            "image_list": [
                { "id": 1, "img_url": "https://cdn.example.com/1.jpg", "thumbnail_url": "https://cdn.example.com/1_t.jpg" },
                { "id": 2, "img_url": "https://cdn.example.com/2.jpg", "thumbnail_url": "https://cdn.example.com/2_t.jpg" }
            ],
            "page": 1
        }
    })
}

#[tokio::test(start_paused = true)]
async fn heart_on_grid_is_optimistic_then_committed() {
    let mock = mock_capabilities();
    mock.http.push(Scripted::json(&one_page()));
    let feed = FeedController::open(
        &GalleryConfig::new("https://api.example.com/list", "154770", "k"),
        &mock.caps,
    )
    .await
    .unwrap();
    let favorites = FavoritesSync::from_capabilities(&mock.caps);
    favorites.reload().await.unwrap();

    mock.kv.set_write_delay(Some(Duration::from_millis(400)));
    let id = ImageId::from("2");

    let (result, ()) = tokio::join!(favorites.toggle(&id), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        // 1. The heart fills before the write lands.
        let GridView::Grid { cards, .. } = grid_view(&feed.state(), &favorites.snapshot()) else {
            panic!("expected grid");
        };
        assert!(cards[1].is_favorite);
        assert!(cards[1].favorite_pending);
    });

    // 2. Once written, the store agrees and nothing is pending.
    assert!(result.unwrap());
    assert!(!favorites.snapshot().is_pending(&id));
    assert!(feed.store().is_favorite(&id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn storage_failure_reverts_the_heart_and_reports_error() {
    let kv = Arc::new(FailableStore::new(MemoryStore::new()));
    let favorites = FavoritesSync::open(GalleryStore::new(kv.clone())).await.unwrap();
    let id = ImageId::from("5");

    favorites.toggle(&id).await.unwrap();
    kv.set_fail_writes(true);

    let result = favorites.toggle(&id).await;
    assert_matches!(result, Err(KvError::Storage { .. }));
    // Still a favorite: the unfavorite never reached storage.
    assert!(favorites.is_favorite(&id));

    kv.set_fail_writes(false);
    favorites.reload().await.unwrap();
    assert!(favorites.is_favorite(&id));
}

#[tokio::test(start_paused = true)]
async fn views_resync_on_focus() {
    let kv = Arc::new(MemoryStore::new());
    let grid = FavoritesSync::open(GalleryStore::new(kv.clone())).await.unwrap();
    let detail = FavoritesSync::open(GalleryStore::new(kv.clone())).await.unwrap();
    let favorites_tab = FavoritesSync::open(GalleryStore::new(kv.clone())).await.unwrap();

    let a = ImageId::from("10");
    let b = ImageId::from("11");
    grid.toggle(&a).await.unwrap();
    detail.toggle(&b).await.unwrap();
    detail.toggle(&a).await.unwrap();

    // Stale until the view regains focus.
    assert!(grid.is_favorite(&a));
    assert!(!favorites_tab.is_favorite(&b));

    grid.reload().await.unwrap();
    favorites_tab.reload().await.unwrap();
    for view in [&grid, &favorites_tab] {
        assert!(!view.is_favorite(&a));
        assert!(view.is_favorite(&b));
    }
}

#[tokio::test]
async fn favorites_render_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("gallery.db");

    // 1. First launch: browse, then favorite one photo.
    {
        let store = GalleryStore::new(Arc::new(SqliteStore::open(&db).unwrap()));
        store
            .upsert_metadata(&[
                serde_json::from_value::<ImageRecord>(json!({ "id": 1, "img_url": "https://cdn.example.com/1.jpg", "thumbnail_url": "t1" })).unwrap(),
                serde_json::from_value::<ImageRecord>(json!({ "id": 2, "img_url": "https://cdn.example.com/2.jpg", "thumbnail_url": "t2" })).unwrap(),
            ])
            .await
            .unwrap();
        let favorites = FavoritesSync::open(store).await.unwrap();
        favorites.toggle(&ImageId::from("2")).await.unwrap();
        favorites.toggle(&ImageId::from("99")).await.unwrap();
    }

    // 2. Second launch: no page list in memory, only the store.
    let store = GalleryStore::new(Arc::new(SqliteStore::open(&db).unwrap()));
    let favorites = FavoritesSync::open(store).await.unwrap();
    let resolved = favorites.resolve().await.unwrap();

    let view = favorites_view(&resolved, &favorites.snapshot());
    assert_eq!(view.cards.len(), 2);
    assert_eq!(view.cards[0].thumbnail_url.as_deref(), Some("t2"));
    assert_eq!(view.unresolved, 1);

    let viewer = viewer_items_from_favorites(&resolved, 0);
    assert_eq!(
        viewer.current().and_then(|i| i.image_url.as_deref()),
        Some("https://cdn.example.com/2.jpg")
    );
}
