
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::AppError;
use crate::lessons::{LessonRepository, UpdateOutcome};
use crate::orders::OrderRepository;
use crate::store::Store;

/// The reconciliation core: deducts booked capacity from a lesson and marks
/// the consumed orders fulfilled.
///
/// The read-then-write sequence is not transactional. The capacity write is
/// conditional on the lesson's version being unchanged since the read, so a
/// racing reconciliation loses at that step and the whole attempt restarts;
/// past `max_retries` the caller gets a conflict. A failure after the
/// capacity write leaves it in place — there is no rollback.
pub struct FulfillmentEngine {
    lessons: LessonRepository,
    orders: OrderRepository,
    clamp_at_zero: bool,
    max_retries: u32,
}

impl FulfillmentEngine {
    pub fn new(store: Arc<Store>, clamp_at_zero: bool, max_retries: u32) -> Self {
        Self {
            lessons: LessonRepository::new(store.clone()),
            orders: OrderRepository::new(store),
            clamp_at_zero,
            max_retries,
        }
    }

    /// Reconcile one lesson against its unfulfilled orders.
    ///
    /// Per attempt: fetch the lesson by storage id, fetch the orders still
    /// unfulfilled against its business id, deduct the booked sum from the
    /// available capacity, write the capacity conditionally on the version,
    /// then flip the consumed orders to fulfilled. Returns the new capacity.
    pub async fn reconcile(&self, lesson_id: &str) -> Result<i64, AppError> {
        let mut attempt = 0u32;
        loop {
            let lesson = self.lessons.get_by_id(lesson_id).await?;

            let pending = self
                .orders
                .find_unfulfilled_by_lesson_ref(&lesson.id)
                .await?;
            if pending.is_empty() {
                return Err(AppError::NoPendingOrders(lesson_id.to_string()));
            }

            let booked: i64 = pending.iter().map(|o| o.booked_spaces).sum();
            let mut new_available = lesson.available_spaces - booked;
            if self.clamp_at_zero && new_available < 0 {
                new_available = 0;
            }

            match self
                .lessons
                .set_available_spaces(lesson.doc_id, new_available, lesson.version)
                .await?
            {
                UpdateOutcome::Updated => {}
                UpdateOutcome::NotModified => {
                    // Zero records touched: either the version moved under us
                    // or the lesson vanished. Only the former is retryable.
                    if self.lessons.find_by_doc_id(lesson.doc_id).await?.is_none() {
                        return Err(AppError::LessonUpdateFailed(lesson_id.to_string()));
                    }
                    metrics::counter!(crate::observability::RECONCILE_CONFLICTS_TOTAL)
                        .increment(1);
                    if attempt >= self.max_retries {
                        return Err(AppError::Conflict(lesson_id.to_string()));
                    }
                    attempt += 1;
                    debug!("reconcile lost the version race on lesson {lesson_id}, attempt {attempt}");
                    continue;
                }
            }

            // Same filter as the fetch (ref id + still-unfulfilled), so orders
            // consumed by a racing reconciliation are not flipped twice.
            let marked = self.orders.mark_fulfilled(&lesson.id).await?;
            if marked == 0 {
                return Err(AppError::OrderUpdateFailed(lesson_id.to_string()));
            }
            if marked != pending.len() as u64 {
                warn!(
                    "reconcile on lesson {lesson_id} marked {marked} orders, expected {}",
                    pending.len()
                );
            }

            return Ok(new_available);
        }
    }
}
