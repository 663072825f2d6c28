//! Integration Tests for the Sync Engine
//!
//! Runs the delta sync client and the data loaders against a mock sheet
//! endpoint, covering the snapshot/changes protocol, the fallback paths
//! and the stale-while-revalidate lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use sheetsync::cache::{CacheEntry, CacheStore, Freshness, MemoryStore};
use sheetsync::loader::{ChangeNotifier, DataLoader, LoadPhase, NoopNotifier, Visibility};
use sheetsync::models::{DataType, ScoreRow};
use sheetsync::sync::{DatasetDiff, DeltaSyncClient, PollResult};
use sheetsync::Config;

// == Mock Sheet Endpoint ==

#[derive(Default)]
struct MockSheet {
    snapshot: Mutex<Value>,
    changes: Mutex<Value>,
    csv: Mutex<String>,
    fail_snapshot: AtomicBool,
    /// (action, since) per request, in arrival order
    requests: Mutex<Vec<(String, u64)>>,
}

impl MockSheet {
    fn requests(&self) -> Vec<(String, u64)> {
        self.requests.lock().unwrap().clone()
    }

    fn actions(&self) -> Vec<String> {
        self.requests().into_iter().map(|(action, _)| action).collect()
    }
}

async fn api_handler(
    State(sheet): State<Arc<MockSheet>>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let action = params.get("action").cloned().unwrap_or_default();
    let since = params
        .get("since")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    sheet.requests.lock().unwrap().push((action.clone(), since));

    match action.as_str() {
        "snapshot" => {
            if sheet.fail_snapshot.load(Ordering::SeqCst) {
                return (StatusCode::INTERNAL_SERVER_ERROR, "sheet backend down").into_response();
            }
            Json(sheet.snapshot.lock().unwrap().clone()).into_response()
        }
        "changes" => Json(sheet.changes.lock().unwrap().clone()).into_response(),
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn csv_handler(State(sheet): State<Arc<MockSheet>>) -> String {
    sheet.csv.lock().unwrap().clone()
}

/// Boots the mock endpoint on an ephemeral port; returns its base URL.
async fn start_mock(sheet: Arc<MockSheet>) -> String {
    let app = Router::new()
        .route("/api", get(api_handler))
        .route("/export.csv", get(csv_handler))
        .with_state(sheet);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// == Helper Functions ==

fn test_config(base: &str) -> Config {
    Config {
        base_url: format!("{}/api", base),
        csv_export_url: Some(format!("{}/export.csv", base)),
        request_timeout_ms: 2_000,
        ..Config::default()
    }
}

fn shared_store(config: &Config) -> Arc<RwLock<CacheStore>> {
    Arc::new(RwLock::new(CacheStore::new(
        Box::new(MemoryStore::new()),
        config,
    )))
}

fn score_rows(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({ "ticker": format!("T{:03}", i), "score": 50.0, "price": 10.0 }))
        .collect()
}

fn loader_with_notifier(
    config: &Config,
    store: &Arc<RwLock<CacheStore>>,
    notifier: Arc<dyn ChangeNotifier>,
) -> DataLoader<ScoreRow> {
    DataLoader::new(
        DataType::ScoreBoard,
        config.clone(),
        Arc::clone(store),
        DeltaSyncClient::new(config).unwrap(),
        Visibility::visible(),
        notifier,
    )
}

fn loader(config: &Config, store: &Arc<RwLock<CacheStore>>) -> DataLoader<ScoreRow> {
    loader_with_notifier(config, store, Arc::new(NoopNotifier))
}

// == Init Sync ==

#[tokio::test]
async fn test_init_sync_persists_snapshot_with_version() {
    let sheet = Arc::new(MockSheet::default());
    *sheet.snapshot.lock().unwrap() = json!({ "version": 17, "rows": score_rows(3) });
    let base = start_mock(Arc::clone(&sheet)).await;

    let config = test_config(&base);
    let store = shared_store(&config);
    let client = DeltaSyncClient::new(&config).unwrap();

    let outcome = client
        .init_sync::<ScoreRow>(DataType::ScoreBoard, &store)
        .await
        .unwrap();
    assert_eq!(outcome.version, 17);
    assert_eq!(outcome.data.len(), 3);

    // Exactly one HTTP GET, and the persisted entry is a snapshot-marked
    // delta entry carrying the server's version
    assert_eq!(sheet.actions(), vec!["snapshot"]);
    let entry: CacheEntry<Vec<ScoreRow>> = store
        .write()
        .await
        .read_entry(&DataType::ScoreBoard.cache_key())
        .unwrap();
    assert_eq!(entry.version(), Some(17));
    let CacheEntry::Delta(delta) = entry else {
        panic!("expected a delta entry");
    };
    assert!(delta.last_snapshot_at > 0, "snapshot timestamp recorded");
}

// == Poll Changes ==

#[tokio::test]
async fn test_poll_applies_changes_in_place_without_refetch() {
    let sheet = Arc::new(MockSheet::default());
    *sheet.changes.lock().unwrap() = json!({
        "version": 11,
        "changes": [
            { "op": "update", "id": "AAPL", "row": { "ticker": "AAPL", "score": 95.0 } }
        ]
    });
    let base = start_mock(Arc::clone(&sheet)).await;

    let config = test_config(&base);
    let store = shared_store(&config);
    store
        .write()
        .await
        .write_delta(
            &DataType::ScoreBoard.cache_key(),
            vec![
                ScoreRow {
                    ticker: "AAPL".into(),
                    company: String::new(),
                    sector: String::new(),
                    score: 90.0,
                    price: 0.0,
                },
                ScoreRow {
                    ticker: "MSFT".into(),
                    company: String::new(),
                    sector: String::new(),
                    score: 80.0,
                    price: 0.0,
                },
            ],
            10,
            true,
        )
        .unwrap();

    let client = DeltaSyncClient::new(&config).unwrap();
    let result = client
        .poll_changes::<ScoreRow>(DataType::ScoreBoard, &store)
        .await
        .unwrap();

    let PollResult::Applied(outcome) = result else {
        panic!("expected applied changes");
    };
    assert_eq!(outcome.version, 11);
    let aapl = outcome.data.iter().find(|r| r.ticker == "AAPL").unwrap();
    assert_eq!(aapl.score, 95.0);

    // The request asked for changes since our version; no snapshot ran
    assert_eq!(sheet.requests(), vec![("changes".to_string(), 10)]);

    // And the cache was updated in place
    let entry: CacheEntry<Vec<ScoreRow>> = store
        .write()
        .await
        .read_entry(&DataType::ScoreBoard.cache_key())
        .unwrap();
    assert_eq!(entry.version(), Some(11));
    assert_eq!(entry.data().len(), 2);
}

#[tokio::test]
async fn test_poll_with_empty_store_falls_back_to_init_sync() {
    let sheet = Arc::new(MockSheet::default());
    *sheet.snapshot.lock().unwrap() = json!({ "version": 4, "rows": score_rows(2) });
    let base = start_mock(Arc::clone(&sheet)).await;

    let config = test_config(&base);
    let store = shared_store(&config);
    let client = DeltaSyncClient::new(&config).unwrap();

    let result = client
        .poll_changes::<ScoreRow>(DataType::ScoreBoard, &store)
        .await
        .unwrap();
    let PollResult::Applied(outcome) = result else {
        panic!("expected applied snapshot");
    };
    assert_eq!(outcome.version, 4);
    assert_eq!(sheet.actions(), vec!["snapshot"]);
}

#[tokio::test]
async fn test_reload_required_triggers_fresh_snapshot_through_loader() {
    let sheet = Arc::new(MockSheet::default());
    *sheet.changes.lock().unwrap() = json!({ "reloadRequired": true });
    *sheet.snapshot.lock().unwrap() = json!({ "version": 42, "rows": score_rows(5) });
    let base = start_mock(Arc::clone(&sheet)).await;

    let config = test_config(&base);
    let store = shared_store(&config);
    store
        .write()
        .await
        .write_delta(&DataType::ScoreBoard.cache_key(), vec![ScoreRow {
            ticker: "OLD".into(),
            company: String::new(),
            sector: String::new(),
            score: 1.0,
            price: 0.0,
        }], 2, true)
        .unwrap();

    let loader = loader(&config, &store);
    let snapshot = loader.refetch(false).await;

    assert_eq!(snapshot.version, 42);
    assert_eq!(snapshot.data.as_ref().map(Vec::len), Some(5));
    assert_eq!(sheet.actions(), vec!["changes", "snapshot"]);
}

// == Stale-While-Revalidate ==

#[tokio::test]
async fn test_stale_cache_served_immediately_with_one_background_fetch() {
    let sheet = Arc::new(MockSheet::default());
    *sheet.changes.lock().unwrap() = json!({ "version": 11, "changes": [] });
    let base = start_mock(Arc::clone(&sheet)).await;

    let mut config = test_config(&base);
    config.fresh_threshold_ms = 0; // cached data is immediately stale
    let store = shared_store(&config);
    store
        .write()
        .await
        .write_delta(&DataType::ScoreBoard.cache_key(), vec![ScoreRow {
            ticker: "AAPL".into(),
            company: String::new(),
            sector: String::new(),
            score: 90.0,
            price: 0.0,
        }], 10, true)
        .unwrap();

    let loader = loader(&config, &store);
    let snapshot = loader.mount().await;

    // Cached data returned synchronously, no loading indicator
    assert_eq!(snapshot.data.as_ref().map(Vec::len), Some(1));
    assert!(!snapshot.loading, "previously-seen data never shows a spinner");

    // Exactly one background fetch follows; the loading flag never turns
    // on while it runs
    let mut settled = loader.snapshot().await;
    for _ in 0..100 {
        assert!(!settled.loading, "loading flag must stay off during revalidation");
        if settled.phase == LoadPhase::Ready(Freshness::Fresh) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        settled = loader.snapshot().await;
    }

    assert_eq!(settled.phase, LoadPhase::Ready(Freshness::Fresh), "revalidation settled");
    assert_eq!(settled.version, 11);
    assert_eq!(sheet.requests(), vec![("changes".to_string(), 10)]);
}

// == Fallback Paths ==

#[tokio::test]
async fn test_csv_fallback_when_json_api_is_down() {
    let sheet = Arc::new(MockSheet::default());
    sheet.fail_snapshot.store(true, Ordering::SeqCst);
    *sheet.csv.lock().unwrap() =
        "ticker,score,price\nAAPL,87.5,231\nMSFT,82,415.2\n".to_string();
    let base = start_mock(Arc::clone(&sheet)).await;

    let mut config = test_config(&base);
    config.delta_sync_enabled = false; // direct path straight away
    let store = shared_store(&config);

    let loader = loader(&config, &store);
    let snapshot = loader.mount().await;

    let data = snapshot.data.expect("CSV fallback produced data");
    assert_eq!(data.len(), 2);
    assert_eq!(data[0].ticker, "AAPL");
    assert_eq!(data[0].score, 87.5);
    assert!(snapshot.error.is_none());

    // The non-delta path persists a TTL entry
    let entry: CacheEntry<Vec<ScoreRow>> = store
        .write()
        .await
        .read_entry(&DataType::ScoreBoard.cache_key())
        .unwrap();
    assert!(matches!(entry, CacheEntry::Ttl(_)));
}

#[tokio::test]
async fn test_delta_failure_falls_back_to_direct_fetch_silently() {
    let sheet = Arc::new(MockSheet::default());
    // Changes endpoint answers garbage; snapshot works
    *sheet.changes.lock().unwrap() = json!({ "unexpected": true });
    *sheet.snapshot.lock().unwrap() = json!({ "version": 9, "rows": score_rows(4) });
    let base = start_mock(Arc::clone(&sheet)).await;

    let config = test_config(&base);
    let store = shared_store(&config);
    store
        .write()
        .await
        .write_delta(&DataType::ScoreBoard.cache_key(), vec![ScoreRow {
            ticker: "OLD".into(),
            company: String::new(),
            sector: String::new(),
            score: 1.0,
            price: 0.0,
        }], 3, true)
        .unwrap();

    let loader = loader(&config, &store);
    let snapshot = loader.refetch(false).await;

    assert!(snapshot.error.is_none(), "protocol failure handled by fallback");
    assert_eq!(snapshot.data.as_ref().map(Vec::len), Some(4));
    assert_eq!(sheet.actions(), vec!["changes", "snapshot"]);
}

#[tokio::test]
async fn test_force_refetch_bypasses_delta_sync() {
    let sheet = Arc::new(MockSheet::default());
    *sheet.snapshot.lock().unwrap() = json!({ "version": 20, "rows": score_rows(2) });
    let base = start_mock(Arc::clone(&sheet)).await;

    let config = test_config(&base);
    let store = shared_store(&config);
    store
        .write()
        .await
        .write_delta(&DataType::ScoreBoard.cache_key(), vec![ScoreRow {
            ticker: "OLD".into(),
            company: String::new(),
            sector: String::new(),
            score: 1.0,
            price: 0.0,
        }], 10, true)
        .unwrap();

    let loader = loader(&config, &store);
    let snapshot = loader.refetch(true).await;

    assert_eq!(snapshot.data.as_ref().map(Vec::len), Some(2));
    // Force refresh never consults the changes endpoint
    assert_eq!(sheet.actions(), vec!["snapshot"]);
}

// == Change Notification ==

#[derive(Default)]
struct RecordingNotifier {
    diffs: Mutex<Vec<DatasetDiff>>,
}

impl ChangeNotifier for RecordingNotifier {
    fn notify(&self, _data_type: DataType, diff: &DatasetDiff) {
        self.diffs.lock().unwrap().push(diff.clone());
    }
}

#[tokio::test]
async fn test_significant_change_notifies_once() {
    let sheet = Arc::new(MockSheet::default());
    // 6 of 100 records change: above the 5% threshold
    let changes: Vec<Value> = (0..6)
        .map(|i| {
            json!({
                "op": "update",
                "id": format!("T{:03}", i),
                "row": { "ticker": format!("T{:03}", i), "score": 99.0, "price": 10.0 }
            })
        })
        .collect();
    *sheet.changes.lock().unwrap() = json!({ "version": 11, "changes": changes });
    let base = start_mock(Arc::clone(&sheet)).await;

    let config = test_config(&base);
    let store = shared_store(&config);
    let seeded: Vec<ScoreRow> = (0..100)
        .map(|i| ScoreRow {
            ticker: format!("T{:03}", i),
            company: String::new(),
            sector: String::new(),
            score: 50.0,
            price: 10.0,
        })
        .collect();
    store
        .write()
        .await
        .write_delta(&DataType::ScoreBoard.cache_key(), &seeded, 10, true)
        .unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let loader = loader_with_notifier(&config, &store, Arc::clone(&notifier) as Arc<dyn ChangeNotifier>);

    loader.mount().await; // loads fresh cache, no fetch
    let snapshot = loader.refetch(false).await;
    assert_eq!(snapshot.version, 11);

    let diffs = notifier.diffs.lock().unwrap();
    assert_eq!(diffs.len(), 1, "one notification for the significant change");
    assert_eq!(diffs[0].updated, 6);
    assert!(diffs[0].has_significant_changes());
}

#[tokio::test]
async fn test_insignificant_change_stays_quiet() {
    let sheet = Arc::new(MockSheet::default());
    // 4 of 100: below the threshold
    let changes: Vec<Value> = (0..4)
        .map(|i| {
            json!({
                "op": "update",
                "id": format!("T{:03}", i),
                "row": { "ticker": format!("T{:03}", i), "score": 99.0, "price": 10.0 }
            })
        })
        .collect();
    *sheet.changes.lock().unwrap() = json!({ "version": 11, "changes": changes });
    let base = start_mock(Arc::clone(&sheet)).await;

    let config = test_config(&base);
    let store = shared_store(&config);
    let seeded: Vec<ScoreRow> = (0..100)
        .map(|i| ScoreRow {
            ticker: format!("T{:03}", i),
            company: String::new(),
            sector: String::new(),
            score: 50.0,
            price: 10.0,
        })
        .collect();
    store
        .write()
        .await
        .write_delta(&DataType::ScoreBoard.cache_key(), &seeded, 10, true)
        .unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let loader = loader_with_notifier(&config, &store, Arc::clone(&notifier) as Arc<dyn ChangeNotifier>);

    loader.mount().await;
    let snapshot = loader.refetch(false).await;
    assert_eq!(snapshot.version, 11);
    assert!(notifier.diffs.lock().unwrap().is_empty());
}
