use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::{HeaderMap, StatusCode}, routing::{get, post}, Json, Router};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sieve_core::persist::IndexPaths;
use sieve_core::query::QueryEngine;
use sieve_core::DocId;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer, AllowOrigin};

const MAX_K: usize = 100;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub k: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_ms: u128,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f64,
    pub path: Option<String>,
    pub url: Option<String>,
    pub token_count: Option<u64>,
}

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    /// Swapped wholesale on reload; searches in flight keep their old engine.
    pub engine: Arc<RwLock<Arc<QueryEngine>>>,
    pub index_root: PathBuf,
    pub admin_token: Option<String>,
    pub top_k: usize,
}

impl AppState {
    fn engine(&self) -> Arc<QueryEngine> { self.engine.read().clone() }
}

pub fn build_app(index_dir: String) -> Result<Router> {
    let index_root = PathBuf::from(&index_dir);
    let top_k = sieve_core::IndexConfig::default().top_k;
    let engine = QueryEngine::open(&IndexPaths::new(&index_root), top_k)?;
    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    let app_state = AppState { engine: Arc::new(RwLock::new(Arc::new(engine))), index_root, admin_token, top_k };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/index/reload", post(reload_handler))
        .with_state(app_state)
        .layer(cors);
    Ok(app)
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    let k = params.k.unwrap_or(state.top_k).clamp(1, MAX_K);
    let engine = state.engine();
    let found = engine.search_text(&params.q, k).map_err(|e| {
        tracing::error!(query = %params.q, error = %e, "search failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let results: Vec<SearchHit> = found
        .hits
        .into_iter()
        .map(|hit| SearchHit {
            doc_id: hit.doc_id,
            score: hit.score,
            path: hit.entry.as_ref().map(|e| e.path.clone()),
            url: hit.entry.as_ref().map(|e| e.url.clone()),
            token_count: hit.entry.as_ref().map(|e| e.token_count),
        })
        .collect();
    Ok(Json(SearchResponse {
        query: found.query,
        took_ms: found.elapsed.as_millis(),
        took_s: found.elapsed.as_secs_f64(),
        total_hits: results.len(),
        results,
    }))
}

pub async fn doc_handler(State(state): State<AppState>, Path(doc_id): Path<DocId>) -> Result<Json<serde_json::Value>, ApiError> {
    let engine = state.engine();
    match engine.phonebook().get(doc_id) {
        Some(entry) => Ok(Json(serde_json::json!({
            "doc_id": doc_id,
            "path": entry.path,
            "url": entry.url,
            "token_count": entry.token_count,
        }))),
        None => Err((StatusCode::NOT_FOUND, format!("doc {doc_id} not found"))),
    }
}

/// Re-open whatever generation is published now.
async fn reload_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let engine = QueryEngine::open(&IndexPaths::new(&state.index_root), state.top_k).map_err(|e| {
        tracing::error!(error = %e, "reload failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    let total_docs = engine.total_docs();
    *state.engine.write() = Arc::new(engine);
    tracing::info!(total_docs, "index reloaded");
    Ok(Json(serde_json::json!({ "reloaded": true, "total_docs": total_docs })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
