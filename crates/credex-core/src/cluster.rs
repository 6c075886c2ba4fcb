//! # Point Clusters
//!
//! A cluster is a rooted tree of points related through negations. Every
//! member carries a polarity relative to the root: the root is `+1`, its
//! counterpoints `-1`, their counterpoints `+1` again, and so on.
//!
//! Cluster signs are relative to whichever root was asked for. Snapshots
//! and deltas instead use a point's canonical polarity: its sign relative
//! to the lowest point id of its negation component. That value depends
//! on the negation graph alone, never on which clusters have been built.

use crate::storage::{LedgerRead, LedgerStore};
use crate::{LedgerError, LedgerResult, PointCluster, PointId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Builds (or rebuilds) cluster membership for a root point.
///
/// Implementations must be idempotent: building twice yields the same rows.
pub trait ClusterBuilder: Send + Sync {
    /// Build and persist the cluster rooted at `root`, returning its members
    /// ordered by point id.
    fn build_cluster(&self, root: PointId) -> LedgerResult<Vec<PointCluster>>;

    /// Canonical polarity of every point in `point`'s negation component.
    /// Read-only.
    fn component_signs(&self, point: PointId) -> LedgerResult<BTreeMap<PointId, i8>>;
}

/// Breadth-first walk of the negation graph from the root.
#[derive(Debug, Clone)]
pub struct NegationClusterBuilder {
    store: Arc<LedgerStore>,
    max_depth: u32,
}

impl NegationClusterBuilder {
    #[must_use]
    pub fn new(store: Arc<LedgerStore>, max_depth: u32) -> Self {
        Self { store, max_depth }
    }

    fn walk(&self, root: PointId) -> LedgerResult<Vec<PointCluster>> {
        self.store.read(|tx| {
            if tx.point(root)?.is_none() {
                return Err(LedgerError::ClusterBuild {
                    root,
                    reason: "root point does not exist".to_string(),
                });
            }

            let mut members: BTreeMap<PointId, PointCluster> = BTreeMap::new();
            members.insert(
                root,
                PointCluster {
                    point_id: root,
                    root_id: root,
                    ancestor_id: None,
                    depth: 0,
                    sign: 1,
                },
            );
            let mut queue = VecDeque::from([root]);

            while let Some(current) = queue.pop_front() {
                let (depth, sign) = match members.get(&current) {
                    Some(m) => (m.depth, m.sign),
                    None => continue,
                };
                if depth >= self.max_depth {
                    continue;
                }
                for next in tx.counterpoints(current)? {
                    if members.contains_key(&next) {
                        continue;
                    }
                    let active = tx.point(next)?.is_some_and(|p| p.is_active);
                    if !active {
                        continue;
                    }
                    members.insert(
                        next,
                        PointCluster {
                            point_id: next,
                            root_id: root,
                            ancestor_id: Some(current),
                            depth: depth + 1,
                            sign: -sign,
                        },
                    );
                    queue.push_back(next);
                }
            }
            Ok(members.into_values().collect())
        })
    }
}

impl ClusterBuilder for NegationClusterBuilder {
    fn build_cluster(&self, root: PointId) -> LedgerResult<Vec<PointCluster>> {
        let members = self.walk(root)?;
        self.store.write(|tx| tx.replace_cluster(root, &members))?;
        tracing::debug!(root = %root, members = members.len(), "cluster built");
        Ok(members)
    }

    fn component_signs(&self, point: PointId) -> LedgerResult<BTreeMap<PointId, i8>> {
        self.store.read(|tx| {
            let mut component = BTreeSet::from([point]);
            let mut queue = VecDeque::from([point]);
            while let Some(current) = queue.pop_front() {
                for next in tx.counterpoints(current)? {
                    if component.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
            let anchor = component.first().copied().unwrap_or(point);

            // Parity is measured from the anchor, not from `point`.
            let mut signs = BTreeMap::from([(anchor, 1i8)]);
            let mut queue = VecDeque::from([anchor]);
            while let Some(current) = queue.pop_front() {
                let sign = signs.get(&current).copied().unwrap_or(1);
                for next in tx.counterpoints(current)? {
                    if !signs.contains_key(&next) {
                        signs.insert(next, -sign);
                        queue.push_back(next);
                    }
                }
            }
            Ok(signs)
        })
    }
}
