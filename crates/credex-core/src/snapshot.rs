//! # Daily Snapshot Builder
//!
//! Folds the cred event log into cumulative per-user/point totals as of the
//! end of a day.
//!
//! For day `D` with previous snapshot day `P`:
//!
//! 1. Read `P`'s rows (the carry-forward state)
//! 2. Read events in `[start(P + 1), start(D + 1))`, all of history when
//!    there is no `P`
//! 3. Add the per-kind sums onto the carried totals
//! 4. Resolve each point's canonical sign and topic bucket
//! 5. Upsert every row for `D` in one transaction
//!
//! Running a day twice without new events yields identical rows, whatever
//! clusters were built in between.
//!
//! `restake_live_raw` only grows: a day contributes `max(0, restake -
//! slash)`, so restake decreases and cap clawbacks never lower it. Only the
//! endorsement cap in `restake_live` brings the live figure down.

use crate::cluster::ClusterBuilder;
use crate::storage::{LedgerRead, LedgerStore, day_start_millis};
use crate::topics::TopicResolver;
use crate::{
    Cred, CredEventKind, JobReport, JobStats, LedgerError, LedgerResult, PointId, Snapshot,
    TopicId, UserId,
};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    endorse: Cred,
    restake_live_raw: Cred,
    doubt: Cred,
}

#[derive(Debug, Clone, Copy, Default)]
struct DaySums {
    endorse: Cred,
    restake: Cred,
    slash: Cred,
    doubt: Cred,
}

/// Builds `snapshots` rows for one day.
pub struct SnapshotBuilder {
    store: Arc<LedgerStore>,
    clusters: Arc<dyn ClusterBuilder>,
    topics: Arc<dyn TopicResolver>,
}

impl SnapshotBuilder {
    #[must_use]
    pub fn new(
        store: Arc<LedgerStore>,
        clusters: Arc<dyn ClusterBuilder>,
        topics: Arc<dyn TopicResolver>,
    ) -> Self {
        Self {
            store,
            clusters,
            topics,
        }
    }

    /// Build the snapshot for `day`. Failures are reported, not returned.
    pub fn run(&self, day: NaiveDate) -> JobReport {
        match self.build(day) {
            Ok(stats) => {
                tracing::info!(
                    day = %day,
                    events = stats.rows_read,
                    carried = stats.rows_carried,
                    written = stats.rows_written,
                    "daily snapshot built"
                );
                JobReport::ok(
                    format!("snapshot for {day}: {} rows", stats.rows_written),
                    stats,
                )
            }
            Err(e) => {
                tracing::error!(day = %day, error = %e, "daily snapshot failed");
                JobReport::failed(&e)
            }
        }
    }

    fn build(&self, day: NaiveDate) -> LedgerResult<JobStats> {
        let next_day = day
            .succ_opt()
            .ok_or_else(|| LedgerError::Consistency(format!("no day after {day}")))?;

        let (carried, events) = self.store.read(|tx| {
            let previous = tx.latest_snapshot_day_before(day)?;
            let carried = match previous {
                Some(p) => tx.snapshots_on(p)?,
                None => Vec::new(),
            };
            let from = match previous.and_then(|p| p.succ_opt()) {
                Some(after) => day_start_millis(after),
                None => i64::MIN,
            };
            let events = tx.events_between(from, day_start_millis(next_day))?;
            Ok((carried, events))
        })?;

        let mut totals: BTreeMap<(UserId, PointId), Totals> = BTreeMap::new();
        for row in &carried {
            totals.insert(
                (row.user_id, row.point_id),
                Totals {
                    endorse: row.endorse,
                    restake_live_raw: row.restake_live_raw,
                    doubt: row.doubt,
                },
            );
        }

        let mut sums: BTreeMap<(UserId, PointId), DaySums> = BTreeMap::new();
        for event in &events {
            let entry = sums.entry((event.user_id, event.point_id)).or_default();
            match event.kind {
                CredEventKind::Endorse => entry.endorse += event.amount,
                CredEventKind::Restake => entry.restake += event.amount,
                CredEventKind::Slash => entry.slash += event.amount,
                CredEventKind::Doubt => entry.doubt += event.amount,
            }
        }
        for (key, day_sums) in &sums {
            let total = totals.entry(*key).or_default();
            total.endorse += day_sums.endorse;
            total.restake_live_raw += (day_sums.restake - day_sums.slash).max(0);
            total.doubt += day_sums.doubt;
        }

        let mut signs: BTreeMap<PointId, i8> = BTreeMap::new();
        let mut resolved: BTreeMap<PointId, (i8, Option<TopicId>)> = BTreeMap::new();
        for (_, point) in totals.keys() {
            if !resolved.contains_key(point) {
                let sign = self.sign_of(*point, &mut signs);
                let bucket = self.topics.topic_of(*point)?;
                resolved.insert(*point, (sign, bucket));
            }
        }

        let rows: Vec<Snapshot> = totals
            .iter()
            .map(|((user, point), total)| {
                let (sign, bucket_id) = resolved.get(point).copied().unwrap_or((1, None));
                Snapshot {
                    snap_day: day,
                    user_id: *user,
                    point_id: *point,
                    endorse: total.endorse,
                    restake_live_raw: total.restake_live_raw,
                    restake_live: total.restake_live_raw.min(total.endorse),
                    doubt: total.doubt,
                    sign,
                    bucket_id,
                }
            })
            .collect();

        self.store.write(|tx| {
            for row in &rows {
                tx.put_snapshot(row)?;
            }
            Ok(())
        })?;

        Ok(JobStats {
            rows_read: events.len() as u64,
            rows_written: rows.len() as u64,
            rows_carried: carried.len() as u64,
            ..JobStats::default()
        })
    }

    /// Canonical sign of `point`, caching its whole component in `signs`.
    /// Falls back to `+1` when the negation graph cannot be read.
    fn sign_of(&self, point: PointId, signs: &mut BTreeMap<PointId, i8>) -> i8 {
        if let Some(sign) = signs.get(&point) {
            return *sign;
        }
        match self.clusters.component_signs(point) {
            Ok(component) => {
                if let Some(anchor) = component.keys().next() {
                    self.ensure_cluster(*anchor);
                }
                let sign = component.get(&point).copied().unwrap_or(1);
                signs.extend(component);
                sign
            }
            Err(e) => {
                tracing::warn!(point = %point, error = %e, "sign lookup failed, using +1");
                1
            }
        }
    }

    /// Build the anchor's cluster if it has never been built.
    fn ensure_cluster(&self, anchor: PointId) {
        let built = self
            .store
            .read(|tx| tx.cluster(anchor))
            .is_ok_and(|members| !members.is_empty());
        if built {
            return;
        }
        if let Err(e) = self.clusters.build_cluster(anchor) {
            tracing::warn!(root = %anchor, error = %e, "cluster build failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NegationClusterBuilder;
    use crate::topics::RationaleTopicResolver;
    use crate::{Caller, Clock, Ledger, ManualClock};
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: Arc<LedgerStore>,
        ledger: Ledger,
        clock: Arc<ManualClock>,
        builder: SnapshotBuilder,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Arc::new(LedgerStore::open(dir.path().join("snap.redb")).expect("open"));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0)
                .single()
                .expect("valid instant"),
        ));
        let ledger = Ledger::new(Arc::clone(&store)).with_clock(clock.clone());
        let builder = SnapshotBuilder::new(
            Arc::clone(&store),
            Arc::new(NegationClusterBuilder::new(Arc::clone(&store), 3)),
            Arc::new(RationaleTopicResolver::new(Arc::clone(&store))),
        );
        Harness {
            _dir: dir,
            store,
            ledger,
            clock,
            builder,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid day")
    }

    #[test]
    fn folds_events_and_caps_restake() {
        let h = harness();
        let user = h.store.create_user(1_000).expect("user");
        let point = h.store.create_point("p", user, h.clock.now()).expect("p");
        let counter = h.store.create_point("n", user, h.clock.now()).expect("n");
        let caller = Caller::user(user);
        h.ledger.endorse(&caller, point, 100).expect("endorse");
        h.ledger.restake(&caller, point, counter, 80).expect("restake");
        h.ledger.unendorse(&caller, point, 60).expect("unendorse");

        let report = h.builder.run(day(1));
        assert!(report.success, "{}", report.message);
        let rows = h.store.read(|tx| tx.snapshots_on(day(1))).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].endorse, 40);
        assert_eq!(rows[0].restake_live_raw, 80);
        assert_eq!(rows[0].restake_live, 40);
        assert_eq!(rows[0].sign, 1);
    }

    #[test]
    fn carries_forward_and_is_idempotent() {
        let h = harness();
        let user = h.store.create_user(1_000).expect("user");
        let point = h.store.create_point("p", user, h.clock.now()).expect("p");
        let caller = Caller::user(user);
        h.ledger.endorse(&caller, point, 50).expect("endorse");
        assert!(h.builder.run(day(1)).success);

        h.clock.advance(Duration::days(2));
        let other = h.store.create_point("q", user, h.clock.now()).expect("q");
        h.ledger.endorse(&caller, other, 10).expect("endorse other");
        h.ledger.endorse(&caller, point, 5).expect("endorse more");

        let first = h.builder.run(day(3));
        assert!(first.success);
        assert_eq!(first.stats.rows_carried, 1);
        let rows = h.store.read(|tx| tx.snapshots_on(day(3))).expect("rows");
        let again = h.builder.run(day(3));
        assert!(again.success);
        assert_eq!(h.store.read(|tx| tx.snapshots_on(day(3))).expect("rows"), rows);

        let by_point: BTreeMap<PointId, Cred> =
            rows.iter().map(|r| (r.point_id, r.endorse)).collect();
        assert_eq!(by_point.get(&point), Some(&55));
        assert_eq!(by_point.get(&other), Some(&10));
    }

    #[test]
    fn signs_survive_cluster_builds_between_runs() {
        let h = harness();
        let alice = h.store.create_user(1_000).expect("alice");
        let bob = h.store.create_user(1_000).expect("bob");
        let point = h.store.create_point("p", alice, h.clock.now()).expect("p");
        let counter = h.store.create_point("n", bob, h.clock.now()).expect("n");
        h.ledger
            .negate(&Caller::user(bob), point, counter, 0)
            .expect("negate");
        h.ledger
            .endorse(&Caller::user(alice), point, 50)
            .expect("alice endorses");
        h.ledger
            .endorse(&Caller::user(bob), counter, 50)
            .expect("bob endorses");

        let signs = |h: &Harness| -> Vec<(PointId, i8)> {
            h.store
                .read(|tx| tx.snapshots_on(day(1)))
                .expect("rows")
                .iter()
                .map(|r| (r.point_id, r.sign))
                .collect()
        };
        let clusters = NegationClusterBuilder::new(Arc::clone(&h.store), 3);
        clusters.build_cluster(counter).expect("cluster at counter");
        assert!(h.builder.run(day(1)).success);
        let first = signs(&h);
        assert_eq!(first, vec![(point, 1), (counter, -1)]);

        let aggregator = crate::DeltaAggregator::new(
            Arc::clone(&h.store),
            Arc::new(clusters.clone()),
            crate::AnalyticsConfig::default(),
        );
        aggregator
            .compute_delta(alice, bob, point, day(1))
            .expect("delta");
        clusters.build_cluster(point).expect("cluster at point");
        assert!(h.builder.run(day(1)).success);
        assert_eq!(signs(&h), first);
    }

    #[test]
    fn restake_live_raw_ignores_decreases() {
        let h = harness();
        let user = h.store.create_user(1_000).expect("user");
        let point = h.store.create_point("p", user, h.clock.now()).expect("p");
        let counter = h.store.create_point("n", user, h.clock.now()).expect("n");
        let caller = Caller::user(user);
        h.ledger.endorse(&caller, point, 100).expect("endorse");
        h.ledger.restake(&caller, point, counter, 80).expect("restake");
        assert!(h.builder.run(day(1)).success);

        h.clock.advance(Duration::days(1));
        h.ledger.restake(&caller, point, counter, 30).expect("decrease");
        assert!(h.builder.run(day(2)).success);
        let rows = h.store.read(|tx| tx.snapshots_on(day(2))).expect("rows");
        assert_eq!(rows[0].restake_live_raw, 80);
        assert_eq!(rows[0].restake_live, 80);
    }

    #[test]
    fn empty_log_writes_nothing() {
        let h = harness();
        let report = h.builder.run(day(1));
        assert!(report.success);
        assert_eq!(report.stats.rows_written, 0);
    }
}
