use std::sync::Arc;

use serde_json::json;
use ulid::Ulid;

use crate::error::AppError;
use crate::model::{DocId, Document, Filter, LESSONS, Lesson, Patch};
use crate::store::Store;

/// Result of a conditional capacity write.
///
/// `NotModified` means the write touched zero records — a lost update or a
/// concurrent deletion. Callers surface it; nothing here treats it as success.
#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotModified,
}

/// Typed accessor over the `products` collection.
pub struct LessonRepository {
    store: Arc<Store>,
}

impl LessonRepository {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Fetch by storage id. The id comes straight off the URL, so a string
    /// that is not a well-formed ULID is client input, not a server fault.
    pub async fn get_by_id(&self, lesson_id: &str) -> Result<Lesson, AppError> {
        let doc_id = Ulid::from_string(lesson_id)
            .map_err(|_| AppError::InvalidId(lesson_id.to_string()))?;
        self.find_by_doc_id(doc_id)
            .await?
            .ok_or_else(|| AppError::LessonNotFound(lesson_id.to_string()))
    }

    pub async fn find_by_doc_id(&self, doc_id: DocId) -> Result<Option<Lesson>, AppError> {
        match self.store.find_one(LESSONS, &Filter::id_eq(doc_id)).await? {
            Some(doc) => Ok(Some(lesson_from_doc(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn list_all(&self) -> Result<Vec<Lesson>, AppError> {
        let docs = self.store.find(LESSONS, &Filter::all()).await?;
        docs.into_iter().map(lesson_from_doc).collect()
    }

    /// Case-insensitive substring search across topic, location, price-as-text
    /// and capacity-as-text. An empty term matches every lesson.
    pub async fn search(&self, term: &str) -> Result<Vec<Lesson>, AppError> {
        let term = term.to_lowercase();
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|lesson| lesson_matches(lesson, &term))
            .collect())
    }

    /// Write the new capacity, conditional on the lesson's version being
    /// unchanged since it was read. A successful write bumps the version.
    pub async fn set_available_spaces(
        &self,
        doc_id: DocId,
        new_value: i64,
        expected_version: u64,
    ) -> Result<UpdateOutcome, AppError> {
        let filter = Filter::id_eq(doc_id).and_eq("version", json!(expected_version));
        let patch = Patch::set("availableSpaces", json!(new_value))
            .and_set("version", json!(expected_version + 1));
        let modified = self.store.update_one(LESSONS, &filter, patch).await?;
        Ok(if modified == 0 {
            UpdateOutcome::NotModified
        } else {
            UpdateOutcome::Updated
        })
    }
}

fn lesson_from_doc(doc: Document) -> Result<Lesson, AppError> {
    serde_json::from_value(doc.into_value())
        .map_err(|e| AppError::CorruptDocument(format!("{LESSONS}: {e}")))
}

fn lesson_matches(lesson: &Lesson, term_lower: &str) -> bool {
    lesson.topic.to_lowercase().contains(term_lower)
        || lesson.location.to_lowercase().contains(term_lower)
        || lesson.price.to_string().contains(term_lower)
        || lesson.available_spaces.to_string().contains(term_lower)
}
