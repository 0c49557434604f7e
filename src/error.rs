use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::store::StoreError;

/// Everything a handler can fail with, and therefore everything the HTTP
/// layer has to translate. Repositories and the fulfillment engine fail fast
/// with the first error hit; partial writes stay in place.
#[derive(Debug)]
pub enum AppError {
    /// Bad client input (missing order fields, wrong collection name).
    Validation(String),
    /// Identifier that does not parse as a storage id.
    InvalidId(String),
    LessonNotFound(String),
    /// Nothing to reconcile — reported, not a server fault.
    NoPendingOrders(String),
    /// Version-conditional capacity write lost the race past the retry bound.
    Conflict(String),
    /// The capacity write touched zero records and the lesson is gone.
    LessonUpdateFailed(String),
    /// The bulk fulfilled-marking touched zero records.
    OrderUpdateFailed(String),
    /// A stored document no longer decodes as its typed view.
    CorruptDocument(String),
    Store(StoreError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "{msg}"),
            AppError::InvalidId(id) => write!(f, "malformed lesson id: {id}"),
            AppError::LessonNotFound(id) => write!(f, "lesson not found: {id}"),
            AppError::NoPendingOrders(id) => {
                write!(f, "no unfulfilled orders found for lesson: {id}")
            }
            AppError::Conflict(id) => {
                write!(f, "reconciliation conflict on lesson {id}: retries exhausted")
            }
            AppError::LessonUpdateFailed(id) => write!(f, "failed to update lesson: {id}"),
            AppError::OrderUpdateFailed(id) => write!(f, "failed to update orders for lesson: {id}"),
            AppError::CorruptDocument(detail) => write!(f, "corrupt document: {detail}"),
            AppError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Store(e)
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidId(_) => StatusCode::BAD_REQUEST,
            AppError::LessonNotFound(_) | AppError::NoPendingOrders(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::LessonUpdateFailed(_)
            | AppError::OrderUpdateFailed(_)
            | AppError::CorruptDocument(_)
            | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::warn!("{self}");
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
