//! # Topic Resolution
//!
//! Maps a point to the topic (normalisation bucket) it belongs to through
//! the rationales that reference it.

use crate::storage::{LedgerRead, LedgerStore};
use crate::{LedgerResult, PointId, TopicId};
use std::sync::Arc;

/// Point → zero-or-one topic lookup.
pub trait TopicResolver: Send + Sync {
    fn topic_of(&self, point: PointId) -> LedgerResult<Option<TopicId>>;
}

/// Resolves topics from the `point_topics` index, falling back to a scan of
/// every rationale graph when the index has no answer.
#[derive(Debug, Clone)]
pub struct RationaleTopicResolver {
    store: Arc<LedgerStore>,
}

impl RationaleTopicResolver {
    #[must_use]
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Lowest-id tagged rationale that references `point`.
    fn scan(&self, point: PointId) -> LedgerResult<Option<TopicId>> {
        let mut rationales = self.store.read(|tx| tx.rationales())?;
        rationales.sort_by_key(|r| r.id);
        Ok(rationales
            .iter()
            .filter(|r| r.point_ids().contains(&point))
            .find_map(|r| r.topic_id))
    }
}

impl TopicResolver for RationaleTopicResolver {
    fn topic_of(&self, point: PointId) -> LedgerResult<Option<TopicId>> {
        match self.store.read(|tx| tx.indexed_topic_of(point)) {
            Ok(Some(topic)) => Ok(Some(topic)),
            Ok(None) => self.scan(point),
            Err(e) => {
                tracing::warn!(error = %e, point = %point, "topic index lookup failed, scanning rationales");
                self.scan(point)
            }
        }
    }
}
