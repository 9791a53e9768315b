use assert_matches::assert_matches;
use serde_json::{json, Value};
use shared::capabilities::testing::{mock_capabilities, Scripted};
use shared::view::{grid_view, GridFooter, GridView};
use shared::{
    ErrorKind, FeedController, GalleryConfig, LoadOutcome, LoadStatus, RetryConfig, SkipReason,
};
use std::time::Duration;

const BASE: &str = "https://api.example.com/v1/images/list";

fn config() -> GalleryConfig {
    GalleryConfig::new(BASE, 154_770u64, "k3y")
}

fn page(first_id: u64, count: u64, page: u32) -> Value {
    let list: Vec<Value> = (first_id..first_id + count)
        .map(|id| {
            json!({
                "id": id,
                "event_id": 154_770,
                "img_url": format!("https://cdn.example.com/{id}.jpg"),
                "thumbnail_url": format!("https://cdn.example.com/{id}_t.jpg"),
                "width": 4000,
                "height": 3000
            })
        })
        .collect();
    json!({ "ok": true, "data": { "image_list": list, "page": page, "page_size": 20 } })
}

#[tokio::test(start_paused = true)]
async fn full_scroll_to_end_of_event() {
    let mock = mock_capabilities();
    mock.http.push(Scripted::json(&page(1, 20, 1)));
    mock.http.push(Scripted::json(&page(21, 3, 2)));

    // 1. Opening the feed loads page 1.
    let feed = FeedController::open(&config(), &mock.caps).await.unwrap();
    let state = feed.state();
    assert_eq!(state.items.len(), 20);
    assert!(state.has_next);
    assert_eq!(state.status, LoadStatus::Idle);

    let calls = mock.http.calls();
    let first_url = &calls[0].url;
    assert!(first_url.starts_with(BASE));
    assert!(first_url.contains("event_id=154770&page=1&page_size=20&key=k3y&order_by=2&order_asc=true"));

    // 2. Scrolling near the end asks for more.
    assert!(feed.should_load_more(18));
    assert_matches!(feed.load_next().await, LoadOutcome::Loaded { page: 2, count: 3 });
    let state = feed.state();
    assert_eq!(state.items.len(), 23);
    assert!(!state.has_next);

    // 3. A short page ends the feed: no third request.
    assert_eq!(feed.load_next().await, LoadOutcome::Skipped(SkipReason::Exhausted));
    assert_eq!(mock.http.call_count(), 2);
    assert!(!feed.should_load_more(22));

    let view = grid_view(&feed.state(), &Default::default());
    assert_matches!(view, GridView::Grid { footer: GridFooter::EndOfList, ref cards, .. } if cards.len() == 23);
}

#[tokio::test(start_paused = true)]
async fn full_page_boundary_costs_one_empty_request() {
    let mock = mock_capabilities();
    mock.http.push(Scripted::json(&page(1, 20, 1)));
    mock.http.push(Scripted::json(&page(21, 0, 2)));

    let feed = FeedController::open(&config(), &mock.caps).await.unwrap();
    assert!(feed.state().has_next);

    assert_matches!(feed.load_next().await, LoadOutcome::Loaded { count: 0, .. });
    assert!(!feed.state().has_next);
    assert_eq!(feed.state().items.len(), 20);
    assert_eq!(mock.http.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn null_image_list_past_the_end_finishes_the_feed() {
    let mock = mock_capabilities();
    mock.http.push(Scripted::json(&page(1, 20, 1)));
    mock.http
        .push(Scripted::json(&json!({ "data": { "image_list": null, "page": 2 } })));

    let feed = FeedController::open(&config(), &mock.caps).await.unwrap();
    assert_matches!(feed.load_next().await, LoadOutcome::Loaded { page: 2, count: 0 });

    let state = feed.state();
    assert_eq!(state.status, LoadStatus::Idle);
    assert!(state.last_error.is_none());
    assert_matches!(
        grid_view(&state, &Default::default()),
        GridView::Grid { footer: GridFooter::EndOfList, .. }
    );
}

#[tokio::test(start_paused = true)]
async fn pull_to_refresh_replaces_the_list() {
    let mock = mock_capabilities();
    mock.http.push(Scripted::json(&page(1, 3, 1)));
    mock.http.push(Scripted::json(&page(4, 2, 1)).after(Duration::from_millis(300)));

    let feed = FeedController::open(&config(), &mock.caps).await.unwrap();
    let mut rx = feed.subscribe();

    let (outcome, ()) = tokio::join!(feed.refresh(), async {
        rx.changed().await.unwrap();
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.status, LoadStatus::Refreshing);
        // Old items stay visible under the spinner.
        assert_eq!(state.items.len(), 3);
        assert_matches!(
            grid_view(&state, &Default::default()),
            GridView::Grid { refreshing: true, .. }
        );
    });

    assert_matches!(outcome, LoadOutcome::Loaded { page: 1, count: 2 });
    let ids: Vec<String> = feed.state().items.iter().map(|r| r.id.to_string()).collect();
    assert_eq!(ids, ["4", "5"]);
}

#[tokio::test(start_paused = true)]
async fn back_to_back_load_next_issues_one_request() {
    let mock = mock_capabilities();
    mock.http.push(Scripted::json(&page(1, 20, 1)));
    mock.http
        .push(Scripted::json(&page(21, 20, 2)).after(Duration::from_millis(250)));

    let feed = FeedController::open(&config(), &mock.caps).await.unwrap();
    let (a, b) = tokio::join!(feed.load_next(), feed.load_next());

    assert_matches!(a, LoadOutcome::Loaded { page: 2, .. });
    assert_eq!(b, LoadOutcome::Skipped(SkipReason::InFlight));
    assert_eq!(mock.http.call_count(), 2);
    assert_eq!(feed.state().items.len(), 40);
}

#[tokio::test(start_paused = true)]
async fn later_page_failure_keeps_items_and_can_be_retried() {
    let mock = mock_capabilities();
    mock.http.push(Scripted::json(&page(1, 20, 1)));
    mock.http.push(Scripted::Hang);
    mock.http.push(Scripted::Hang);
    mock.http.push(Scripted::json(&page(21, 5, 2)));

    let config = config().with_timeout_ms(1_000).with_retry(RetryConfig {
        max_retries: 1,
        ..RetryConfig::default()
    });
    let feed = FeedController::open(&config, &mock.caps).await.unwrap();

    // 1. Both attempts for page 2 time out.
    let outcome = feed.load_next().await;
    assert_matches!(outcome, LoadOutcome::Failed(ref e) if e.kind == ErrorKind::Timeout && e.attempts == Some(2));
    let state = feed.state();
    assert_eq!(state.items.len(), 20);
    assert_eq!(state.status, LoadStatus::Error);
    assert_matches!(
        grid_view(&state, &Default::default()),
        GridView::Grid { footer: GridFooter::Error { .. }, .. }
    );

    // 2. The footer's retry asks for page 2 again.
    assert_matches!(feed.retry().await, LoadOutcome::Loaded { page: 2, count: 5 });
    assert_eq!(feed.state().items.len(), 25);
    assert!(mock.http.calls()[3].url.contains("page=2&"));
}

#[tokio::test(start_paused = true)]
async fn first_page_failure_shows_retry_screen() {
    let mock = mock_capabilities();
    mock.http.repeat(Scripted::status(503));

    let config = config().with_retry(RetryConfig {
        max_retries: 2,
        ..RetryConfig::default()
    });
    let feed = FeedController::open(&config, &mock.caps).await.unwrap();

    assert_eq!(mock.http.call_count(), 3);
    assert_matches!(
        grid_view(&feed.state(), &Default::default()),
        GridView::Failed { ref error, .. } if error.error_code == "NETWORK_ERROR"
    );
}

#[tokio::test(start_paused = true)]
async fn leaving_the_screen_cancels_silently() {
    let mock = mock_capabilities();
    mock.http.push(Scripted::json(&page(1, 20, 1)));
    mock.http.repeat(Scripted::connection_error());

    let feed = FeedController::open(&config(), &mock.caps).await.unwrap();
    let (outcome, ()) = tokio::join!(feed.load_next(), async {
        // First attempt fails at once; cancel lands in the backoff sleep.
        tokio::time::sleep(Duration::from_millis(100)).await;
        feed.cancel();
    });

    assert_eq!(outcome, LoadOutcome::Canceled);
    assert_eq!(mock.http.call_count(), 2);
    let state = feed.state();
    assert_eq!(state.status, LoadStatus::Idle);
    assert!(state.last_error.is_none());
    assert_eq!(state.items.len(), 20);
}

#[tokio::test(start_paused = true)]
async fn fetched_records_survive_a_restart_through_metadata() {
    let mock = mock_capabilities();
    mock.http.push(Scripted::json(&page(1, 20, 1)));

    let feed = FeedController::open(&config(), &mock.caps).await.unwrap();
    drop(feed);

    let metadata = shared::GalleryStore::new(mock.caps.kv.clone())
        .metadata()
        .await
        .unwrap();
    assert_eq!(metadata.len(), 20);
    let record = &metadata[&shared::ImageId::from("7")];
    assert_eq!(record.image_url.as_deref(), Some("https://cdn.example.com/7.jpg"));
    assert_eq!(record.extra.get("width"), Some(&json!(4000)));
}
