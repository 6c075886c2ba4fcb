//! # Stance Normalizer
//!
//! Turns a day's snapshot rows into bucket-normalised stance scores.
//!
//! ```text
//! raw = sign * min((we*endorse + wr*restake_live + wd*doubt) / max(user_total, 1), clamp)
//! z   = shrink(n) * (raw - mean) / std                  (population statistics)
//! ```
//!
//! `user_total` is the sum of `endorse + restake_live` over ALL of the user's
//! rows for the day. Buckets with no spread keep each member's direction:
//! `z = shrink(n) * clamp(raw, -1, 1)`.

use crate::config::AnalyticsConfig;
use crate::primitives::{SHRINKAGE_FULL_GROUP, SHRINKAGE_STEP, VARIANCE_EPSILON};
use crate::storage::{LedgerRead, LedgerStore};
use crate::{Cred, DailyStance, JobReport, JobStats, LedgerResult, Snapshot, TopicId, UserId};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Raw (un-normalised) stance of one snapshot row.
#[must_use]
pub fn raw_stance(config: &AnalyticsConfig, row: &Snapshot, user_total: Cred) -> f64 {
    let weighted = config.endorse_weight * row.endorse as f64
        + config.restake_weight * row.restake_live as f64
        + config.doubt_weight * row.doubt as f64;
    let denominator = user_total.max(1) as f64;
    f64::from(row.sign) * (weighted / denominator).min(config.raw_stance_clamp)
}

/// Shrinkage applied to a bucket of `n` members: 1 for full buckets,
/// bounded below by `min_shrinkage`.
#[must_use]
pub fn shrinkage(n: usize, min_shrinkage: f64) -> f64 {
    if n >= SHRINKAGE_FULL_GROUP {
        return 1.0;
    }
    let missing = (SHRINKAGE_FULL_GROUP - n) as f64;
    (1.0 - missing * SHRINKAGE_STEP).max(min_shrinkage)
}

/// z-normalise `raw` within one bucket, preserving order.
#[must_use]
pub fn z_scores(raw: &[f64], min_shrinkage: f64) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }
    let n = raw.len() as f64;
    let mean = raw.iter().sum::<f64>() / n;
    let variance = raw.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let shrink = shrinkage(raw.len(), min_shrinkage);

    if std < VARIANCE_EPSILON {
        raw.iter().map(|x| shrink * x.clamp(-1.0, 1.0)).collect()
    } else {
        raw.iter().map(|x| shrink * (x - mean) / std).collect()
    }
}

/// Computes `daily_stances` rows for one day.
#[derive(Debug, Clone)]
pub struct StanceNormalizer {
    store: Arc<LedgerStore>,
    config: AnalyticsConfig,
}

impl StanceNormalizer {
    #[must_use]
    pub fn new(store: Arc<LedgerStore>, config: AnalyticsConfig) -> Self {
        Self { store, config }
    }

    /// Normalise the stances for `day`. Failures are reported, not returned.
    pub fn run(&self, day: NaiveDate) -> JobReport {
        match self.compute(day) {
            Ok(stats) => {
                tracing::info!(
                    day = %day,
                    rows = stats.rows_read,
                    buckets = stats.buckets,
                    skipped = stats.skipped,
                    "stances computed"
                );
                let message = if stats.rows_read == 0 {
                    format!("no snapshots for {day}")
                } else {
                    format!("stances for {day}: {} rows", stats.rows_written)
                };
                JobReport::ok(message, stats)
            }
            Err(e) => {
                tracing::error!(day = %day, error = %e, "stance computation failed");
                JobReport::failed(&e)
            }
        }
    }

    fn compute(&self, day: NaiveDate) -> LedgerResult<JobStats> {
        let rows = self.store.read(|tx| tx.snapshots_on(day))?;
        if rows.is_empty() {
            return Ok(JobStats::default());
        }

        let mut user_totals: BTreeMap<UserId, Cred> = BTreeMap::new();
        for row in &rows {
            *user_totals.entry(row.user_id).or_default() += row.endorse + row.restake_live;
        }

        let mut buckets: BTreeMap<Option<TopicId>, Vec<(&Snapshot, f64)>> = BTreeMap::new();
        for row in &rows {
            let total = user_totals.get(&row.user_id).copied().unwrap_or(0);
            buckets
                .entry(row.bucket_id)
                .or_default()
                .push((row, raw_stance(&self.config, row, total)));
        }

        let mut stats = JobStats {
            rows_read: rows.len() as u64,
            ..JobStats::default()
        };
        let mut stances = Vec::with_capacity(rows.len());
        for (bucket, members) in &buckets {
            stats.buckets += 1;
            let raw: Vec<f64> = members.iter().map(|(_, r)| *r).collect();
            let z = z_scores(&raw, self.config.min_shrinkage);
            if z.len() != members.len() {
                tracing::error!(
                    bucket = ?bucket,
                    raw = members.len(),
                    z = z.len(),
                    "stance bucket misaligned, skipping"
                );
                stats.skipped += 1;
                continue;
            }
            for ((row, _), z_value) in members.iter().zip(z) {
                stances.push(DailyStance {
                    snap_day: day,
                    user_id: row.user_id,
                    point_id: row.point_id,
                    z_value,
                });
            }
        }

        self.store.write(|tx| {
            for stance in &stances {
                tx.put_stance(stance)?;
            }
            Ok(())
        })?;
        stats.rows_written = stances.len() as u64;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PointId;
    use tempfile::tempdir;

    fn row(user: u64, point: u64, endorse: Cred, sign: i8, bucket: Option<u64>) -> Snapshot {
        Snapshot {
            snap_day: NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid day"),
            user_id: UserId(user),
            point_id: PointId(point),
            endorse,
            restake_live_raw: 0,
            restake_live: 0,
            doubt: 0,
            sign,
            bucket_id: bucket.map(TopicId),
        }
    }

    #[test]
    fn raw_stance_follows_sign_and_clamp() {
        let config = AnalyticsConfig::default();
        assert!((raw_stance(&config, &row(1, 1, 50, 1, None), 100) - 0.5).abs() < 1e-12);
        assert!((raw_stance(&config, &row(1, 1, 50, -1, None), 100) + 0.5).abs() < 1e-12);
        // Zero total uses a denominator of 1 and hits the clamp.
        assert!((raw_stance(&config, &row(1, 1, 50, 1, None), 0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn shrinkage_curve() {
        assert!((shrinkage(1, 0.7) - 0.7).abs() < 1e-12);
        assert!((shrinkage(2, 0.7) - 0.85).abs() < 1e-12);
        assert!((shrinkage(3, 0.7) - 1.0).abs() < 1e-12);
        assert!((shrinkage(1, 0.8) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn z_scores_are_centred() {
        let z = z_scores(&[1.0, 2.0, 3.0, 4.0], 0.7);
        assert_eq!(z.len(), 4);
        assert!(z.iter().sum::<f64>().abs() < 1e-9);
        let variance = z.iter().map(|v| v * v).sum::<f64>() / 4.0;
        assert!((variance - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_member_keeps_direction() {
        let z = z_scores(&[-2.0], 0.7);
        assert!((z[0] + 0.7).abs() < 1e-12);
    }

    #[test]
    fn normalises_per_bucket() {
        let dir = tempdir().expect("temp dir");
        let store = Arc::new(LedgerStore::open(dir.path().join("stance.redb")).expect("open"));
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid day");
        store
            .write(|tx| {
                tx.put_snapshot(&row(1, 1, 10, 1, Some(7)))?;
                tx.put_snapshot(&row(2, 1, 30, 1, Some(7)))?;
                tx.put_snapshot(&row(3, 1, 20, 1, Some(7)))?;
                tx.put_snapshot(&row(1, 2, 10, -1, None))
            })
            .expect("seed");

        let normalizer = StanceNormalizer::new(Arc::clone(&store), AnalyticsConfig::default());
        let report = normalizer.run(day);
        assert!(report.success);
        assert_eq!(report.stats.buckets, 2);
        assert_eq!(report.stats.rows_written, 4);

        let untagged = store
            .read(|tx| tx.stance(day, UserId(1), PointId(2)))
            .expect("read")
            .expect("stance");
        // user 1 total is 20, raw = -0.5, single-member bucket.
        assert!((untagged.z_value + 0.35).abs() < 1e-9);
    }

    #[test]
    fn empty_day_succeeds_trivially() {
        let dir = tempdir().expect("temp dir");
        let store = Arc::new(LedgerStore::open(dir.path().join("stance.redb")).expect("open"));
        let normalizer = StanceNormalizer::new(store, AnalyticsConfig::default());
        let report = normalizer.run(NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid day"));
        assert!(report.success);
        assert_eq!(report.stats, JobStats::default());
    }
}
