//! # Property-Based Tests
//!
//! Invariants of the ledger arithmetic and the analytics scoring.

use chrono::{Duration, TimeZone, Utc};
use credex_core::contested::contest_score;
use credex_core::delta::stance_distance;
use credex_core::ledger::slash_reduction;
use credex_core::stance::{shrinkage, z_scores};
use credex_core::{Caller, Clock, DoubtAction, Ledger, LedgerRead, LedgerStore, ManualClock};
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    /// A single reduction never exceeds the doubt it applies to.
    #[test]
    fn prop_reduction_bounded_by_doubt(
        doubt in 0i64..10_000,
        restaked in 1i64..10_000,
        fraction in 0.0f64..=1.0,
    ) {
        let slashed = (restaked as f64 * fraction).round() as i64;
        let reduction = slash_reduction(doubt, slashed, restaked);
        prop_assert!(reduction >= 0);
        prop_assert!(reduction <= doubt);
    }

    /// A full slash wipes the doubt out entirely.
    #[test]
    fn prop_full_slash_takes_everything(doubt in 1i64..10_000, restaked in 1i64..10_000) {
        prop_assert_eq!(slash_reduction(doubt, restaked, restaked), doubt);
    }

    /// Contest scores lie in [0, 1] and ignore which side is larger.
    #[test]
    fn prop_contest_score_range(pos in 0.0f64..100.0, neg in 0.0f64..100.0) {
        match contest_score(pos, neg) {
            None => prop_assert!(pos <= 0.0 && neg <= 0.0),
            Some(score) => {
                prop_assert!((0.0..=1.0).contains(&score));
                prop_assert_eq!(Some(score), contest_score(neg, pos));
            }
        }
    }

    /// Shrinkage is bounded and never decreases with bucket size.
    #[test]
    fn prop_shrinkage_monotonic(n in 0usize..20, min in 0.0f64..=1.0) {
        let here = shrinkage(n, min);
        let next = shrinkage(n + 1, min);
        prop_assert!(here <= 1.0);
        prop_assert!(here >= min.min(1.0) - f64::EPSILON);
        prop_assert!(next >= here);
    }

    /// Normalised scores of a spread-out bucket are centred with unit
    /// variance, and their order follows the raw order.
    #[test]
    fn prop_z_scores_centred(raw in prop::collection::vec(-3.0f64..3.0, 3..40)) {
        let z = z_scores(&raw, 0.7);
        prop_assert_eq!(z.len(), raw.len());

        let n = raw.len() as f64;
        let mean = raw.iter().sum::<f64>() / n;
        let std = (raw.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
        prop_assume!(std > 1e-3);

        let z_mean = z.iter().sum::<f64>() / n;
        let z_var = z.iter().map(|x| (x - z_mean).powi(2)).sum::<f64>() / n;
        prop_assert!(z_mean.abs() < 1e-9);
        prop_assert!((z_var - 1.0).abs() < 1e-9);
        for (i, j) in (0..raw.len()).zip(1..raw.len()) {
            if raw[i] < raw[j] {
                prop_assert!(z[i] <= z[j]);
            }
        }
    }

    /// Deltas are symmetric, lie in [0, 1], and are zero on identical input.
    #[test]
    fn prop_delta_symmetric_and_bounded(
        pairs in prop::collection::vec((-5.0f64..5.0, -5.0f64..5.0), 1..30),
    ) {
        let (a, b): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
        let ab = stance_distance(&a, &b, 3.0);
        let ba = stance_distance(&b, &a, 3.0);
        prop_assert!((ab - ba).abs() < 1e-12);
        prop_assert!((0.0..=1.0 + 1e-12).contains(&ab));
        prop_assert!(stance_distance(&a, &a, 3.0).abs() < 1e-12);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Across every doubt on a pair, one slash removes at most the slashed
    /// amount.
    #[test]
    fn prop_slash_reductions_never_exceed_slash(
        restaked in 1i64..500,
        doubts in prop::collection::vec(1i64..200, 1..6),
        fraction in 0.0f64..=1.0,
    ) {
        let slashed = ((restaked as f64 * fraction).round() as i64).max(1);

        let dir = tempfile::tempdir().expect("temp dir");
        let store = Arc::new(LedgerStore::open(dir.path().join("prop.redb")).expect("open"));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().expect("valid instant"),
        ));
        let ledger = Ledger::new(Arc::clone(&store)).with_clock(clock.clone());

        let restaker = store.create_user(10_000).expect("restaker");
        let point = store.create_point("P", restaker, clock.now()).expect("point");
        let negation = store.create_point("N", restaker, clock.now()).expect("negation");
        let caller = Caller::user(restaker);
        ledger.endorse(&caller, point, restaked).expect("endorse");
        ledger.restake(&caller, point, negation, restaked).expect("restake");

        let mut ids = Vec::new();
        for amount in &doubts {
            clock.advance(Duration::seconds(1));
            let doubter = store.create_user(1_000).expect("doubter");
            let outcome = ledger
                .doubt(&Caller::user(doubter), point, negation, *amount)
                .expect("doubt")
                .expect("created");
            ids.push(outcome.doubt_id);
        }

        ledger.slash(&caller, point, negation, slashed).expect("slash");

        let mut removed = 0;
        for id in ids {
            let history = store.read(|tx| tx.doubt_history(id)).expect("history");
            for entry in history.iter().filter(|h| h.action == DoubtAction::ReducedBySlash) {
                let before = entry.previous_amount.unwrap_or(entry.new_amount);
                prop_assert!(entry.new_amount >= 0);
                prop_assert!(entry.new_amount <= before);
                removed += before - entry.new_amount;
            }
        }
        prop_assert!(removed <= slashed);
    }
}
