//! # Delta Aggregator
//!
//! Pairwise disagreement between two users over a point cluster, rolled up
//! to rationales and topics.
//!
//! ```text
//! delta(A, B) = sqrt(Σ (a_i - b_i)²) / (2 * z_clamp * sqrt(n))
//! ```
//!
//! with every component clamped to `[-z_clamp, z_clamp]`, so the result lies
//! in `[0, 1]` and `delta(A, B) == delta(B, A)`. A delta of `0` means the
//! users agree; `None` with `no_interaction` means there was no signal.
//!
//! When `daily_stances` has nothing for the day, stances are seeded from
//! current endorsements (canonical sign where endorsed, else 0). Seeded
//! values live only for the computation and are never written back.

use crate::cluster::ClusterBuilder;
use crate::config::AnalyticsConfig;
use crate::storage::{LedgerRead, LedgerStore};
use crate::{
    LedgerError, LedgerResult, PointCluster, PointId, Rationale, RationaleId, TopicId,
    UserId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Result of a delta computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaResult {
    pub delta: Option<f64>,
    pub no_interaction: bool,
}

impl DeltaResult {
    #[must_use]
    pub fn value(delta: f64) -> Self {
        Self {
            delta: Some(delta),
            no_interaction: false,
        }
    }

    /// Both users are silent over the point set.
    #[must_use]
    pub fn no_interaction() -> Self {
        Self {
            delta: None,
            no_interaction: true,
        }
    }

    /// The point set itself could not be resolved.
    #[must_use]
    pub fn unresolved() -> Self {
        Self {
            delta: None,
            no_interaction: false,
        }
    }

    /// Mean of the non-null deltas.
    #[must_use]
    pub fn mean_of(children: &[DeltaResult]) -> Self {
        let values: Vec<f64> = children.iter().filter_map(|c| c.delta).collect();
        if values.is_empty() {
            return Self::no_interaction();
        }
        Self::value(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Normalised Euclidean distance between two equal-length stance vectors.
#[must_use]
pub fn stance_distance(a: &[f64], b: &[f64], z_clamp: f64) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 || z_clamp <= 0.0 {
        return 0.0;
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x.clamp(-z_clamp, z_clamp) - y.clamp(-z_clamp, z_clamp);
            d * d
        })
        .sum();
    sum.sqrt() / (2.0 * z_clamp * (n as f64).sqrt())
}

fn all_zero(values: &[f64]) -> bool {
    values.iter().all(|v| v.abs() < f64::EPSILON)
}

/// Computes deltas on demand from `daily_stances` and cluster membership.
pub struct DeltaAggregator {
    store: Arc<LedgerStore>,
    clusters: Arc<dyn ClusterBuilder>,
    config: AnalyticsConfig,
}

impl DeltaAggregator {
    #[must_use]
    pub fn new(
        store: Arc<LedgerStore>,
        clusters: Arc<dyn ClusterBuilder>,
        config: AnalyticsConfig,
    ) -> Self {
        Self {
            store,
            clusters,
            config,
        }
    }

    /// Delta between `a` and `b` over the cluster rooted at `root` on `day`.
    pub fn compute_delta(
        &self,
        a: UserId,
        b: UserId,
        root: PointId,
        day: NaiveDate,
    ) -> LedgerResult<DeltaResult> {
        let Some(members) = self.resolve_cluster(root)? else {
            return Ok(DeltaResult::unresolved());
        };

        let va = self.stance_vector(a, &members, day)?;
        let vb = self.stance_vector(b, &members, day)?;
        let unseeded = va.iter().chain(&vb).all(Option::is_none);
        let mut za: Vec<f64> = va.into_iter().map(|v| v.unwrap_or(0.0)).collect();
        let mut zb: Vec<f64> = vb.into_iter().map(|v| v.unwrap_or(0.0)).collect();

        if unseeded || (all_zero(&za) && all_zero(&zb)) {
            let signs = self.member_signs(root, &members);
            za = self.endorsement_vector(a, &members, &signs)?;
            zb = self.endorsement_vector(b, &members, &signs)?;
            if all_zero(&za) && all_zero(&zb) {
                tracing::debug!(a = %a, b = %b, root = %root, "no interaction on cluster");
                return Ok(DeltaResult::no_interaction());
            }
        }

        Ok(DeltaResult::value(stance_distance(
            &za,
            &zb,
            self.config.z_clamp,
        )))
    }

    /// Mean cluster delta over the clusters the rationale's points belong to.
    pub fn compute_rationale_delta(
        &self,
        a: UserId,
        b: UserId,
        rationale: RationaleId,
        day: NaiveDate,
    ) -> LedgerResult<DeltaResult> {
        let rationale = self
            .store
            .read(|tx| tx.rationale(rationale))?
            .ok_or(LedgerError::RationaleNotFound(rationale))?;
        self.rationale_delta(a, b, &rationale, day)
    }

    /// Mean rationale delta over every rationale tagged with `topic`.
    pub fn compute_topic_delta(
        &self,
        a: UserId,
        b: UserId,
        topic: TopicId,
        day: NaiveDate,
    ) -> LedgerResult<DeltaResult> {
        let mut rationales = self.store.read(|tx| tx.rationales())?;
        rationales.retain(|r| r.topic_id == Some(topic));
        rationales.sort_by_key(|r| r.id);

        let mut children = Vec::with_capacity(rationales.len());
        for rationale in &rationales {
            children.push(self.rationale_delta(a, b, rationale, day)?);
        }
        Ok(DeltaResult::mean_of(&children))
    }

    fn rationale_delta(
        &self,
        a: UserId,
        b: UserId,
        rationale: &Rationale,
        day: NaiveDate,
    ) -> LedgerResult<DeltaResult> {
        let mut roots: Vec<PointId> = Vec::new();
        let mut seen = BTreeSet::new();
        for point in rationale.point_ids() {
            let mut point_roots: Vec<PointId> = self
                .store
                .read(|tx| tx.cluster_roots_of(point))?
                .into_iter()
                .map(|(root, _)| root)
                .collect();
            if point_roots.is_empty() {
                point_roots.push(point);
            }
            for root in point_roots {
                if seen.insert(root) {
                    roots.push(root);
                }
            }
        }

        let mut children = Vec::with_capacity(roots.len());
        for root in roots {
            children.push(self.compute_delta(a, b, root, day)?);
        }
        Ok(DeltaResult::mean_of(&children))
    }

    /// Cluster members ordered by point id, building the cluster if needed.
    fn resolve_cluster(&self, root: PointId) -> LedgerResult<Option<Vec<PointCluster>>> {
        let members = self.store.read(|tx| tx.cluster(root))?;
        if !members.is_empty() {
            return Ok(Some(members));
        }
        match self.clusters.build_cluster(root) {
            Ok(members) if !members.is_empty() => Ok(Some(members)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::warn!(root = %root, error = %e, "cluster build failed");
                Ok(None)
            }
        }
    }

    fn stance_vector(
        &self,
        user: UserId,
        members: &[PointCluster],
        day: NaiveDate,
    ) -> LedgerResult<Vec<Option<f64>>> {
        self.store.read(|tx| {
            members
                .iter()
                .map(|m| Ok(tx.stance(day, user, m.point_id)?.map(|s| s.z_value)))
                .collect()
        })
    }

    /// Canonical sign per member, falling back to the cluster's own sign.
    fn member_signs(&self, root: PointId, members: &[PointCluster]) -> Vec<i8> {
        let component = self.clusters.component_signs(root).unwrap_or_else(|e| {
            tracing::warn!(root = %root, error = %e, "sign lookup failed, using cluster signs");
            BTreeMap::new()
        });
        members
            .iter()
            .map(|m| component.get(&m.point_id).copied().unwrap_or(m.sign))
            .collect()
    }

    /// `sign` where the user currently endorses the member, else 0.
    fn endorsement_vector(
        &self,
        user: UserId,
        members: &[PointCluster],
        signs: &[i8],
    ) -> LedgerResult<Vec<f64>> {
        self.store.read(|tx| {
            members
                .iter()
                .zip(signs)
                .map(|(m, sign)| {
                    let endorsed = tx.endorsement_total(user, m.point_id)? > 0;
                    Ok(if endorsed { f64::from(*sign) } else { 0.0 })
                })
                .collect()
        })
    }
}
