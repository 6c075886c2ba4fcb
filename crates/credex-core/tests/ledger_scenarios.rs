//! # Ledger Scenarios
//!
//! End-to-end behaviour of the engines against an on-disk store.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use credex_core::{
    AnalyticsConfig, CapReconciler, Caller, Clock, Cred, CredEventKind, DeltaAggregator, Doubt,
    DoubtAction, Ledger, LedgerError, LedgerRead, LedgerResult, LedgerStore, ManualClock,
    NegationClusterBuilder, Notifier, PointId, Restake, Slash, UserId,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct World {
    _dir: TempDir,
    store: Arc<LedgerStore>,
    clock: Arc<ManualClock>,
    ledger: Ledger,
}

impl World {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Arc::new(LedgerStore::open(dir.path().join("world.redb")).expect("open"));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0)
                .single()
                .expect("valid instant"),
        ));
        let ledger = Ledger::new(Arc::clone(&store)).with_clock(clock.clone());
        Self {
            _dir: dir,
            store,
            clock,
            ledger,
        }
    }

    fn user(&self, cred: i64) -> UserId {
        self.store.create_user(cred).expect("user")
    }

    fn point(&self, owner: UserId, content: &str) -> PointId {
        self.store
            .create_point(content, owner, self.clock.now())
            .expect("point")
    }
}

#[test]
fn restake_cannot_exceed_endorsement() {
    let w = World::new();
    let u = w.user(1_000);
    let p = w.point(u, "P");
    let n = w.point(u, "N");
    let caller = Caller::user(u);
    w.ledger.endorse(&caller, p, 100).expect("endorse");

    let id = w.ledger.restake(&caller, p, n, 80).expect("restake 80");
    let restake = w
        .store
        .read(|tx| tx.restake(id))
        .expect("read")
        .expect("restake");
    assert_eq!(restake.amount, 80);

    let err = w.ledger.restake(&caller, p, n, 120).expect_err("120 > 100");
    assert!(matches!(err, LedgerError::RestakeExceedsEndorsement { .. }));
}

#[test]
fn slash_cannot_exceed_restake() {
    let w = World::new();
    let u = w.user(1_000);
    let p = w.point(u, "P");
    let n = w.point(u, "N");
    let caller = Caller::user(u);
    w.ledger.endorse(&caller, p, 100).expect("endorse");
    w.ledger.restake(&caller, p, n, 50).expect("restake");

    let err = w.ledger.slash(&caller, p, n, 60).expect_err("60 > 50");
    assert!(matches!(err, LedgerError::SlashExceedsRestake { .. }));
}

#[test]
fn half_slash_halves_doubt() {
    let w = World::new();
    let restaker = w.user(1_000);
    let doubter = w.user(1_000);
    let p = w.point(restaker, "P");
    let n = w.point(restaker, "N");
    let caller = Caller::user(restaker);
    w.ledger.endorse(&caller, p, 100).expect("endorse");
    w.ledger.restake(&caller, p, n, 60).expect("restake");
    w.clock.advance(Duration::minutes(5));
    let doubt = w
        .ledger
        .doubt(&Caller::user(doubter), p, n, 20)
        .expect("doubt")
        .expect("created");

    w.ledger.slash(&caller, p, n, 30).expect("slash half");

    let history = w
        .store
        .read(|tx| tx.doubt_history(doubt.doubt_id))
        .expect("history");
    let reduced = history
        .iter()
        .find(|h| h.action == DoubtAction::ReducedBySlash)
        .expect("reduction entry");
    assert_eq!(reduced.previous_amount, Some(20));
    assert_eq!(reduced.new_amount, 10);
}

#[test]
fn doubts_placed_before_a_reused_restake_are_not_reduced() {
    let w = World::new();
    let restaker = w.user(1_000);
    let doubter = w.user(1_000);
    let p = w.point(restaker, "P");
    let n = w.point(restaker, "N");
    let caller = Caller::user(restaker);
    w.ledger.endorse(&caller, p, 100).expect("endorse");
    w.ledger.restake(&caller, p, n, 40).expect("restake");
    w.ledger
        .doubt(&Caller::user(doubter), p, n, 20)
        .expect("doubt");

    // Exhaust, then reuse: the restake's lifecycle restarts after the doubt.
    w.ledger.restake(&caller, p, n, 0).expect("deactivate");
    w.clock.advance(Duration::hours(1));
    w.ledger.restake(&caller, p, n, 40).expect("reuse");
    w.ledger.slash(&caller, p, n, 40).expect("slash");

    let doubt = w
        .store
        .read(|tx| tx.doubt_for(doubter, p, n))
        .expect("read")
        .expect("doubt");
    assert_eq!(doubt.amount, 20);
}

#[test]
fn first_doubt_records_creation() {
    let w = World::new();
    let owner = w.user(100);
    let doubter = w.user(100);
    let p = w.point(owner, "P");
    let n = w.point(owner, "N");

    let outcome = w
        .ledger
        .doubt(&Caller::user(doubter), p, n, 10)
        .expect("doubt")
        .expect("created");
    assert_eq!(outcome.earnings, 0);

    let doubt = w
        .store
        .read(|tx| tx.doubt_for(doubter, p, n))
        .expect("read")
        .expect("doubt");
    assert_eq!(doubt.amount, 10);
    let history = w
        .store
        .read(|tx| tx.doubt_history(outcome.doubt_id))
        .expect("history");
    assert_eq!(history[0].action, DoubtAction::Created);
    assert_eq!(history[0].previous_amount, None);

    // No cred event is emitted for doubts.
    let events = w
        .store
        .read(|tx| tx.events_between(i64::MIN, i64::MAX))
        .expect("events");
    assert!(events.iter().all(|e| e.kind != CredEventKind::Doubt));
}

#[test]
fn silent_users_have_no_interaction() {
    let w = World::new();
    let owner = w.user(0);
    let root = w.point(owner, "root");
    let a = w.user(100);
    let b = w.user(100);

    let aggregator = DeltaAggregator::new(
        Arc::clone(&w.store),
        Arc::new(NegationClusterBuilder::new(Arc::clone(&w.store), 3)),
        AnalyticsConfig::default(),
    );
    let day = NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid day");
    let result = aggregator.compute_delta(a, b, root, day).expect("delta");
    assert_eq!(result.delta, None);
    assert!(result.no_interaction);
}

#[test]
fn cap_enforcement_claws_back_reduced_endorsement() {
    let w = World::new();
    let u = w.user(1_000);
    let p = w.point(u, "P");
    let n = w.point(u, "N");
    let caller = Caller::user(u);
    w.ledger.endorse(&caller, p, 100).expect("endorse");
    let id = w.ledger.restake(&caller, p, n, 90).expect("restake");
    w.ledger.unendorse(&caller, p, 40).expect("reduce endorsement");

    let reconciler = CapReconciler::new(Arc::clone(&w.store)).with_clock(w.clock.clone());
    let report = reconciler.enforce(None, None);
    assert!(report.success);
    assert_eq!(report.adjustments.len(), 1);

    let restake = w
        .store
        .read(|tx| tx.restake(id))
        .expect("read")
        .expect("restake");
    assert_eq!(restake.amount, 60);

    let clawback: Vec<i64> = w
        .store
        .read(|tx| tx.events_between(i64::MIN, i64::MAX))
        .expect("events")
        .into_iter()
        .filter(|e| e.kind == CredEventKind::Restake && e.amount < 0)
        .map(|e| e.amount)
        .collect();
    assert_eq!(clawback, vec![-30]);
}

#[test]
fn cred_is_conserved_across_restake_and_slash() {
    let w = World::new();
    let u = w.user(1_000);
    let p = w.point(u, "P");
    let n = w.point(u, "N");
    let caller = Caller::user(u);
    w.ledger.negate(&caller, p, n, 0).expect("negate");
    w.ledger.endorse(&caller, p, 300).expect("endorse");
    w.ledger.restake(&caller, p, n, 200).expect("restake");
    w.ledger.slash(&caller, p, n, 150).expect("slash");
    w.ledger.restake(&caller, p, n, 100).expect("edit");

    // Only the endorsement moved cred.
    assert_eq!(w.store.balance_of(u).expect("balance"), 700);
}

/// Records every notification; optionally fails each one after recording.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    fn record(&self, what: String) -> LedgerResult<()> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(what);
        if self.fail {
            Err(LedgerError::Storage("mailer down".into()))
        } else {
            Ok(())
        }
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_restake(&self, restake: &Restake) -> LedgerResult<()> {
        self.record(format!("restake {}", restake.amount))
    }

    fn notify_slash(&self, slash: &Slash) -> LedgerResult<()> {
        self.record(format!("slash {}", slash.amount))
    }

    fn notify_doubt(&self, doubt: &Doubt, point_owner: UserId) -> LedgerResult<()> {
        self.record(format!("doubt {} owner {}", doubt.amount, point_owner))
    }

    fn notify_doubt_reduction(&self, doubt: &Doubt, reduction: Cred) -> LedgerResult<()> {
        self.record(format!("reduced {} by {}", doubt.id, reduction))
    }
}

fn notified_world(fail: bool) -> (World, Arc<RecordingNotifier>) {
    let mut w = World::new();
    let notifier = Arc::new(RecordingNotifier {
        fail,
        ..RecordingNotifier::default()
    });
    w.ledger = Ledger::new(Arc::clone(&w.store))
        .with_clock(w.clock.clone())
        .with_notifier(notifier.clone());
    (w, notifier)
}

#[test]
fn stake_moves_notify_in_order() {
    let (w, notifier) = notified_world(false);
    let restaker = w.user(1_000);
    let doubter = w.user(1_000);
    let p = w.point(restaker, "P");
    let n = w.point(restaker, "N");
    let caller = Caller::user(restaker);
    w.ledger.endorse(&caller, p, 100).expect("endorse");
    w.ledger.restake(&caller, p, n, 60).expect("restake");
    w.clock.advance(Duration::minutes(5));
    let doubt = w
        .ledger
        .doubt(&Caller::user(doubter), p, n, 20)
        .expect("doubt")
        .expect("created");
    w.ledger.slash(&caller, p, n, 30).expect("slash");

    assert_eq!(
        notifier.sent(),
        vec![
            "restake 60".to_string(),
            format!("doubt 20 owner {}", restaker),
            format!("reduced {} by 10", doubt.doubt_id),
            "slash 30".to_string(),
        ]
    );
}

#[test]
fn failed_notifications_do_not_fail_mutations() {
    let (w, notifier) = notified_world(true);
    let u = w.user(1_000);
    let p = w.point(u, "P");
    let n = w.point(u, "N");
    let caller = Caller::user(u);
    w.ledger.endorse(&caller, p, 100).expect("endorse");
    w.ledger.restake(&caller, p, n, 50).expect("restake despite notifier");
    w.ledger.slash(&caller, p, n, 10).expect("slash despite notifier");
    assert_eq!(notifier.sent().len(), 2);
    assert_eq!(w.store.balance_of(u).expect("balance"), 900);
}
