use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::AppError;
use crate::model::{DocId, Document, Filter, NewOrder, ORDERS, Order, Patch};
use crate::store::Store;

/// Typed accessor over the `order` collection.
pub struct OrderRepository {
    store: Arc<Store>,
}

impl OrderRepository {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// All orders still waiting on the given lesson. `lesson_ref` is the
    /// lesson's business `id`, not its storage id. Empty is a valid answer.
    pub async fn find_unfulfilled_by_lesson_ref(
        &self,
        lesson_ref: &Value,
    ) -> Result<Vec<Order>, AppError> {
        let docs = self
            .store
            .find(ORDERS, &unfulfilled_filter(lesson_ref))
            .await?;
        docs.into_iter().map(order_from_doc).collect()
    }

    /// Set-based transition: every still-unfulfilled order referencing the
    /// lesson flips to fulfilled. Returns the count flipped — `0` is valid
    /// but suspicious, and the caller checks it against what it expected.
    pub async fn mark_fulfilled(&self, lesson_ref: &Value) -> Result<u64, AppError> {
        self.store
            .update_many(
                ORDERS,
                &unfulfilled_filter(lesson_ref),
                Patch::set("fulfilled", json!(true)),
            )
            .await
            .map_err(AppError::from)
    }

    /// Validate and insert a submitted order. Rejection happens before any
    /// write reaches the store.
    pub async fn insert(&self, order: NewOrder) -> Result<DocId, AppError> {
        let NewOrder { id, booked_spaces, name, phone_num } = order;

        let id = id.filter(truthy).ok_or_else(required_fields)?;
        let booked_spaces = booked_spaces
            .as_ref()
            .and_then(Value::as_i64)
            .filter(|n| *n > 0)
            .ok_or_else(required_fields)?;
        let name = name.filter(|s| !s.is_empty()).ok_or_else(required_fields)?;
        let phone_num = phone_num.filter(|s| !s.is_empty()).ok_or_else(required_fields)?;

        let mut doc = Document::new();
        doc.set("id", id);
        doc.set("bookedSpaces", json!(booked_spaces));
        doc.set("name", json!(name));
        doc.set("phoneNum", json!(phone_num));
        doc.set("fulfilled", json!(false));

        self.store.insert_one(ORDERS, doc).await.map_err(AppError::from)
    }
}

fn unfulfilled_filter(lesson_ref: &Value) -> Filter {
    Filter::field_eq("id", lesson_ref.clone()).and_eq("fulfilled", json!(false))
}

fn required_fields() -> AppError {
    AppError::Validation("All fields (id, bookedSpaces, name, phoneNum) are required.".to_string())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn order_from_doc(doc: Document) -> Result<Order, AppError> {
    serde_json::from_value(doc.into_value())
        .map_err(|e| AppError::CorruptDocument(format!("{ORDERS}: {e}")))
}
