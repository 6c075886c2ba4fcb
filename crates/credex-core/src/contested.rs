//! # Contested Points
//!
//! Points where stance mass is split between support and opposition.
//! `score = min(pos, neg) / max(pos, neg)`: 1 for an even split, 0 when
//! everyone leans the same way.

use crate::storage::{LedgerRead, LedgerStore};
use crate::topics::TopicResolver;
use crate::{LedgerResult, PointId, TopicId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContestedPoint {
    pub point_id: PointId,
    /// Sum of positive stances.
    pub positive: f64,
    /// Sum of the magnitudes of negative stances.
    pub negative: f64,
    pub score: f64,
}

/// Contest score, `None` when there is no stance mass at all.
#[must_use]
pub fn contest_score(positive: f64, negative: f64) -> Option<f64> {
    let high = positive.max(negative);
    if high <= 0.0 {
        return None;
    }
    Some(positive.min(negative) / high)
}

/// Rank the points with stances on `day` by contest score, descending
/// (ties by point id). With `topic`, only points in that topic are ranked.
pub fn compute_contested_points(
    store: &LedgerStore,
    topics: &dyn TopicResolver,
    day: NaiveDate,
    topic: Option<TopicId>,
) -> LedgerResult<Vec<ContestedPoint>> {
    let stances = store.read(|tx| tx.stances_on(day))?;

    let mut mass: BTreeMap<PointId, (f64, f64)> = BTreeMap::new();
    for stance in &stances {
        let entry = mass.entry(stance.point_id).or_insert((0.0, 0.0));
        if stance.z_value > 0.0 {
            entry.0 += stance.z_value;
        } else {
            entry.1 += -stance.z_value;
        }
    }

    let mut ranked = Vec::new();
    for (point_id, (positive, negative)) in mass {
        if let Some(wanted) = topic {
            if topics.topic_of(point_id)? != Some(wanted) {
                continue;
            }
        }
        if let Some(score) = contest_score(positive, negative) {
            ranked.push(ContestedPoint {
                point_id,
                positive,
                negative,
                score,
            });
        }
    }
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.point_id.cmp(&b.point_id))
    });
    Ok(ranked)
}
