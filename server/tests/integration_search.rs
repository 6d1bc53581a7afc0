use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sieve_core::ingest::{Ingestor, SourceDocument};
use sieve_core::merge::merge_batches;
use sieve_core::persist::IndexPaths;
use sieve_core::IndexConfig;
use std::path::Path;
use tempfile::tempdir;
use tower::ServiceExt;

fn index_docs(dir: &Path, docs: &[(&str, &str)]) {
    let paths = IndexPaths::new(dir);
    let mut ingestor = Ingestor::start(paths.clone(), &IndexConfig::default()).unwrap();
    for (name, text) in docs {
        let doc = SourceDocument { path: format!("{name}.json"), url: format!("https://example.com/{name}"), text: text.to_string() };
        ingestor.ingest(doc).unwrap();
    }
    ingestor.finish().unwrap();
    merge_batches(&paths).unwrap();
}

fn build_tiny_index(dir: &Path) {
    index_docs(dir, &[
        ("guide", "rust rust systems programming guide"),
        ("intro", "learning rust from scratch"),
        ("garden", "tomatoes need sun and water"),
        ("recipe", "slow cooked beans with garlic"),
    ]);
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = sieve_server::build_app(dir.path().to_string_lossy().to_string()).unwrap();

    let (status, body) = call(app, get("/search?q=rust&k=2")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    let arr = json["results"].as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["doc_id"].as_u64().unwrap(), 1);
    assert_eq!(arr[1]["doc_id"].as_u64().unwrap(), 2);
    assert_eq!(arr[0]["path"], "guide.json");
    assert_eq!(arr[1]["url"], "https://example.com/intro");
    assert!(arr[0]["score"].as_f64().unwrap() > arr[1]["score"].as_f64().unwrap());
    assert_eq!(json["total_hits"], 2);
}

#[tokio::test]
async fn search_requires_every_term() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = sieve_server::build_app(dir.path().to_string_lossy().to_string()).unwrap();

    let (status, body) = call(app.clone(), get("/search?q=rust%20garlic")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["results"].as_array().unwrap().is_empty());

    let (_, body) = call(app, get("/search?q=%21%21%21")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_hits"], 0);
}

#[tokio::test]
async fn doc_lookup_uses_phonebook() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = sieve_server::build_app(dir.path().to_string_lossy().to_string()).unwrap();

    let (status, body) = call(app.clone(), get("/doc/3")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["path"], "garden.json");
    assert_eq!(json["token_count"], 5);

    let (status, _) = call(app, get("/doc/99")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reload_picks_up_new_generation() {
    std::env::set_var("ADMIN_TOKEN", "sesame");
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = sieve_server::build_app(dir.path().to_string_lossy().to_string()).unwrap();

    index_docs(dir.path(), &[("owls", "owls hunt at night")]);
    let (_, body) = call(app.clone(), get("/search?q=owls")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_hits"], 0);

    let wrong = Request::post("/index/reload").header("X-ADMIN-TOKEN", "nope").body(Body::empty()).unwrap();
    let (status, _) = call(app.clone(), wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let right = Request::post("/index/reload").header("X-ADMIN-TOKEN", "sesame").body(Body::empty()).unwrap();
    let (status, body) = call(app.clone(), right).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total_docs"], 5);

    let (_, body) = call(app, get("/search?q=owls")).await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["results"][0]["doc_id"], 5);
}

#[tokio::test]
async fn search_on_pruned_generation_is_a_server_error() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = sieve_server::build_app(dir.path().to_string_lossy().to_string()).unwrap();

    index_docs(dir.path(), &[("owls", "owls hunt at night")]);
    index_docs(dir.path(), &[("bats", "bats hunt at dusk")]);
    let (status, _) = call(app, get("/search?q=rust")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
