use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, Request, State};
use axum::handler::HandlerWithoutStateExt;
use axum::http::{Method, StatusCode, header::CONTENT_TYPE};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::Config;
use crate::error::AppError;
use crate::fulfill::FulfillmentEngine;
use crate::lessons::LessonRepository;
use crate::model::{Lesson, NewOrder, ORDERS};
use crate::orders::OrderRepository;
use crate::store::Store;

/// Everything a handler needs, built once at startup around the shared store.
pub struct AppState {
    pub lessons: LessonRepository,
    pub orders: OrderRepository,
    pub engine: FulfillmentEngine,
}

impl AppState {
    pub fn new(store: Arc<Store>, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            lessons: LessonRepository::new(store.clone()),
            orders: OrderRepository::new(store.clone()),
            engine: FulfillmentEngine::new(
                store,
                config.clamp_at_zero,
                config.max_reconcile_retries,
            ),
        })
    }
}

pub fn router(state: Arc<AppState>, config: &Config) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(Any);

    let mut app = Router::new()
        .route("/lessons", get(list_lessons))
        .route("/collections/:collection", post(submit_order))
        .route("/collections/products/:lesson_id", put(reconcile_lesson))
        .route("/search", get(search_lessons))
        .with_state(state);

    if let Some(dir) = &config.images_dir {
        app = app.nest_service("/images", ServeDir::new(dir));
    }
    // Unmatched paths fall through to the frontend bundle when one is
    // configured, and to a plain 404 otherwise.
    app = match &config.static_dir {
        Some(dir) => app.fallback_service(
            ServeDir::new(dir)
                .call_fallback_on_method_not_allowed(true)
                .not_found_service(not_found.into_service()),
        ),
        None => app.fallback(not_found),
    };

    app.layer(middleware::from_fn(log_requests)).layer(cors)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Resource not found")
}

/// Log every incoming request and record the RED metrics for it.
async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = crate::observability::route_label(&method, &path);
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status();
    metrics::counter!(
        crate::observability::REQUESTS_TOTAL,
        "route" => route,
        "status" => status.as_u16().to_string()
    )
    .increment(1);
    metrics::histogram!(crate::observability::REQUEST_DURATION_SECONDS, "route" => route)
        .record(start.elapsed().as_secs_f64());
    info!("{method} {path} -> {}", status.as_u16());
    response
}

// ── Handlers ─────────────────────────────────────────────────────

async fn list_lessons(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Lesson>>, AppError> {
    Ok(Json(state.lessons.list_all().await?))
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

async fn search_lessons(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Lesson>>, AppError> {
    Ok(Json(state.lessons.search(&params.q).await?))
}

async fn submit_order(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    Json(order): Json<NewOrder>,
) -> Result<Json<Value>, AppError> {
    if collection != ORDERS {
        return Err(AppError::Validation(
            "Invalid collection name. Use 'order' for creating an order.".to_string(),
        ));
    }
    let id = state.orders.insert(order).await?;
    metrics::counter!(crate::observability::ORDERS_INSERTED_TOTAL).increment(1);
    Ok(Json(json!({ "insertedId": id.to_string() })))
}

async fn reconcile_lesson(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let new_available_spaces = state.engine.reconcile(&lesson_id).await?;
    Ok(Json(json!({
        "message": "Lesson and orders successfully updated.",
        "newAvailableSpaces": new_available_spaces,
    })))
}
