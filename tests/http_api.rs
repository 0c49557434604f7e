use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Value, json};
use ulid::Ulid;

use lessond::config::Config;
use lessond::http;
use lessond::model::{DocId, Document, Filter, LESSONS, ORDERS};
use lessond::store::Store;

// ── Test infrastructure ──────────────────────────────────────

fn test_config(data_dir: PathBuf) -> Config {
    Config {
        port: 0,
        bind: "127.0.0.1".to_string(),
        data_dir,
        db_name: "test".to_string(),
        seed_file: None,
        static_dir: None,
        images_dir: None,
        metrics_port: None,
        compact_threshold: 1000,
        clamp_at_zero: false,
        max_reconcile_retries: 3,
    }
}

async fn start_test_server() -> (SocketAddr, Arc<Store>) {
    let dir = std::env::temp_dir().join(format!("lessond_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();

    let config = test_config(dir);
    let store = Arc::new(Store::open(&config.data_dir, &config.db_name).unwrap());
    let state = http::AppState::new(store.clone(), &config);
    let app = http::router(state, &config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, store)
}

async fn seed_lesson(store: &Store, business_id: &str, spaces: i64) -> DocId {
    let mut doc = Document::new();
    doc.set("id", json!(business_id));
    doc.set("topic", json!("Math"));
    doc.set("location", json!("London"));
    doc.set("price", json!(100));
    doc.set("availableSpaces", json!(spaces));
    doc.set("version", json!(0));
    store.insert_one(LESSONS, doc).await.unwrap()
}

fn order_body(lesson_ref: &str, spaces: i64) -> Value {
    json!({
        "id": lesson_ref,
        "bookedSpaces": spaces,
        "name": "Ada",
        "phoneNum": "07000000000",
    })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn get_lessons_lists_the_whole_collection() {
    let (addr, store) = start_test_server().await;
    seed_lesson(&store, "math101", 10).await;
    seed_lesson(&store, "art900", 4).await;

    let response = reqwest::get(format!("http://{addr}/lessons")).await.unwrap();
    assert_eq!(response.status(), 200);

    let lessons: Vec<Value> = response.json().await.unwrap();
    assert_eq!(lessons.len(), 2);
    assert_eq!(lessons[0]["id"], json!("math101"));
    assert_eq!(lessons[0]["availableSpaces"], json!(10));
    assert!(lessons[0]["_id"].is_string());
}

#[tokio::test]
async fn post_order_inserts_an_unfulfilled_order() {
    let (addr, store) = start_test_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/collections/order"))
        .json(&order_body("math101", 3))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    let inserted_id = body["insertedId"].as_str().expect("insertedId in response");
    assert!(Ulid::from_string(inserted_id).is_ok());

    let orders = store.find(ORDERS, &Filter::all()).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].get("fulfilled"), Some(&json!(false)));
}

#[tokio::test]
async fn post_order_rejects_wrong_collection_name() {
    let (addr, store) = start_test_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/collections/products"))
        .json(&order_body("math101", 3))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(store.count(ORDERS).await, 0);
}

#[tokio::test]
async fn post_order_rejects_missing_fields_without_writing() {
    let (addr, store) = start_test_server().await;
    let client = reqwest::Client::new();

    for body in [
        json!({}),
        json!({"id": "math101", "bookedSpaces": 3, "name": "Ada"}), // no phoneNum
        json!({"id": "math101", "bookedSpaces": 0, "name": "Ada", "phoneNum": "07"}),
        json!({"id": "", "bookedSpaces": 3, "name": "Ada", "phoneNum": "07"}),
    ] {
        let response = client
            .post(format!("http://{addr}/collections/order"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "body: {body}");
    }
    assert_eq!(store.count(ORDERS).await, 0);
}

#[tokio::test]
async fn put_reconcile_deducts_capacity_and_marks_orders() {
    let (addr, store) = start_test_server().await;
    let client = reqwest::Client::new();

    let doc_id = seed_lesson(&store, "math101", 10).await;
    for spaces in [3, 2] {
        let response = client
            .post(format!("http://{addr}/collections/order"))
            .json(&order_body("math101", spaces))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let response = client
        .put(format!("http://{addr}/collections/products/{doc_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["newAvailableSpaces"], json!(5));
    assert_eq!(body["message"], json!("Lesson and orders successfully updated."));

    let unfulfilled = store
        .find(ORDERS, &Filter::field_eq("fulfilled", json!(false)))
        .await
        .unwrap();
    assert!(unfulfilled.is_empty());
}

#[tokio::test]
async fn put_reconcile_without_pending_orders_is_404() {
    let (addr, store) = start_test_server().await;
    let client = reqwest::Client::new();

    let doc_id = seed_lesson(&store, "math101", 10).await;

    let response = client
        .put(format!("http://{addr}/collections/products/{doc_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Capacity untouched
    let lessons = store.find(LESSONS, &Filter::all()).await.unwrap();
    assert_eq!(lessons[0].get("availableSpaces"), Some(&json!(10)));
}

#[tokio::test]
async fn put_reconcile_unknown_lesson_is_404() {
    let (addr, _store) = start_test_server().await;
    let client = reqwest::Client::new();

    let response = client
        .put(format!("http://{addr}/collections/products/{}", Ulid::new()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn put_reconcile_malformed_lesson_id_is_400() {
    let (addr, _store) = start_test_server().await;
    let client = reqwest::Client::new();

    let response = client
        .put(format!("http://{addr}/collections/products/not-a-ulid"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn search_matches_numeric_fields_as_text() {
    let (addr, store) = start_test_server().await;

    // price 100 and spaces 10 both contain "10"
    seed_lesson(&store, "math101", 10).await;
    // 85 and 4 contain no "10"
    let mut doc = Document::new();
    doc.set("id", json!("art900"));
    doc.set("topic", json!("Art"));
    doc.set("location", json!("Oxford"));
    doc.set("price", json!(85));
    doc.set("availableSpaces", json!(4));
    doc.set("version", json!(0));
    store.insert_one(LESSONS, doc).await.unwrap();

    let hits: Vec<Value> = reqwest::get(format!("http://{addr}/search?q=10"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], json!("math101"));

    // Case-insensitive text match
    let hits: Vec<Value> = reqwest::get(format!("http://{addr}/search?q=OXFORD"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], json!("art900"));
}

#[tokio::test]
async fn search_without_a_term_returns_everything() {
    let (addr, store) = start_test_server().await;
    seed_lesson(&store, "math101", 10).await;
    seed_lesson(&store, "art900", 4).await;

    let hits: Vec<Value> = reqwest::get(format!("http://{addr}/search"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn unmatched_paths_answer_404() {
    let (addr, _store) = start_test_server().await;

    let response = reqwest::get(format!("http://{addr}/definitely/not/here"))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "Resource not found");
}

#[tokio::test]
async fn concurrent_reconciliations_have_a_single_winner() {
    let (addr, store) = start_test_server().await;
    let client = reqwest::Client::new();

    let doc_id = seed_lesson(&store, "math101", 10).await;
    for spaces in [3, 2] {
        client
            .post(format!("http://{addr}/collections/order"))
            .json(&order_body("math101", spaces))
            .send()
            .await
            .unwrap();
    }

    let url = format!("http://{addr}/collections/products/{doc_id}");
    let (a, b) = tokio::join!(client.put(&url).send(), client.put(&url).send());
    let statuses = [a.unwrap().status(), b.unwrap().status()];

    let wins = statuses.iter().filter(|s| s.is_success()).count();
    assert_eq!(wins, 1, "exactly one PUT may report success: {statuses:?}");

    let unfulfilled = store
        .find(ORDERS, &Filter::field_eq("fulfilled", json!(false)))
        .await
        .unwrap();
    assert!(unfulfilled.is_empty(), "every order ends up fulfilled");
}
