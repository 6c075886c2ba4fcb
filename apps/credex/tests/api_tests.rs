//! Integration tests for the Credex HTTP API.
//!
//! Uses axum-test to drive the router without binding a socket.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::{HeaderValue, header};
use axum_test::TestServer;
use chrono::Utc;
use credex::api::{
    AppState, DoubtResponse, ErrorResponse, HealthResponse, NegateResponse, RestakeResponse,
    SlashResponse, create_router,
};
use credex::config::AppConfig;
use credex_core::{
    Caller, CapReport, DeltaResult, LedgerRead, LedgerStore, PipelineRangeReport, PointId,
    RestakeValidation, UserId,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

const ALICE_KEY: &str = "alice-key";
const BOB_KEY: &str = "bob-key";

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

struct Fixture {
    _dir: TempDir,
    server: TestServer,
    state: AppState,
    alice: UserId,
    bob: UserId,
    point: PointId,
    negation: PointId,
}

/// Alice and Bob with 1000 cred each, and two points by Alice.
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let database = dir.path().join("api.redb");
    let store = Arc::new(LedgerStore::open(&database).unwrap());
    let alice = store.create_user(1_000).unwrap();
    let bob = store.create_user(1_000).unwrap();
    let point = store.create_point("P", alice, Utc::now()).unwrap();
    let negation = store.create_point("N", alice, Utc::now()).unwrap();

    let config = AppConfig {
        database,
        rate_limit: 0,
        api_keys: BTreeMap::from([
            (ALICE_KEY.to_string(), alice.0),
            (BOB_KEY.to_string(), bob.0),
        ]),
        ..AppConfig::default()
    };
    let state = AppState::new(store, &config).unwrap();
    let server = TestServer::new(create_router(state.clone())).unwrap();
    Fixture {
        _dir: dir,
        server,
        state,
        alice,
        bob,
        point,
        negation,
    }
}

fn bearer(key: &str) -> HeaderValue {
    format!("Bearer {}", key).parse::<HeaderValue>().unwrap()
}

impl Fixture {
    /// Endorse the fixture point as `user` straight through the engine.
    fn endorse(&self, user: UserId, amount: i64) {
        self.state
            .ledger
            .endorse(&Caller::user(user), self.point, amount)
            .unwrap();
    }

    fn stake_body(&self, amount: i64) -> serde_json::Value {
        json!({
            "point_id": self.point.0,
            "negation_id": self.negation.0,
            "amount": amount
        })
    }
}

// =============================================================================
// HEALTH & AUTH
// =============================================================================

#[tokio::test]
async fn test_health_needs_no_key() {
    let f = fixture();
    let response = f.server.get("/health").await;
    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
}

#[tokio::test]
async fn test_mutation_without_key_is_unauthorized() {
    let f = fixture();
    let response = f.server.post("/restake").json(&f.stake_body(10)).await;
    assert_eq!(response.status_code().as_u16(), 401);
}

#[tokio::test]
async fn test_wrong_key_is_unauthorized() {
    let f = fixture();
    let response = f
        .server
        .post("/restake")
        .add_header(header::AUTHORIZATION, bearer("not-a-key"))
        .json(&f.stake_body(10))
        .await;
    assert_eq!(response.status_code().as_u16(), 401);
}

#[tokio::test]
async fn test_empty_authorization_is_unauthorized() {
    let f = fixture();
    let response = f
        .server
        .post("/restake")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static(""))
        .json(&f.stake_body(10))
        .await;
    assert_eq!(response.status_code().as_u16(), 401);
}

// =============================================================================
// LEDGER ENDPOINTS
// =============================================================================

#[tokio::test]
async fn test_negate_links_points() {
    let f = fixture();
    let response = f
        .server
        .post("/negate")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&json!({
            "point_id": f.point.0,
            "counterpoint_id": f.negation.0
        }))
        .await;
    response.assert_status_ok();
    let first: NegateResponse = response.json();

    // Negating the same pair again returns the existing negation.
    let again: NegateResponse = f
        .server
        .post("/negate")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&json!({
            "point_id": f.negation.0,
            "counterpoint_id": f.point.0
        }))
        .await
        .json();
    assert_eq!(first.negation_id, again.negation_id);
}

#[tokio::test]
async fn test_negate_self_is_bad_request() {
    let f = fixture();
    let response = f
        .server
        .post("/negate")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&json!({
            "point_id": f.point.0,
            "counterpoint_id": f.point.0
        }))
        .await;
    assert_eq!(response.status_code().as_u16(), 400);
}

#[tokio::test]
async fn test_restake_within_endorsement() {
    let f = fixture();
    f.endorse(f.alice, 100);

    let response = f
        .server
        .post("/restake")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&f.stake_body(80))
        .await;
    response.assert_status_ok();
    let restake: RestakeResponse = response.json();
    assert!(restake.restake_id > 0);
}

#[tokio::test]
async fn test_restake_over_endorsement_is_bad_request() {
    let f = fixture();
    f.endorse(f.alice, 100);

    let response = f
        .server
        .post("/restake")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&f.stake_body(120))
        .await;
    assert_eq!(response.status_code().as_u16(), 400);
    let body: ErrorResponse = response.json();
    assert!(!body.error.is_empty());
}

#[tokio::test]
async fn test_restake_on_unknown_point_is_not_found() {
    let f = fixture();
    let response = f
        .server
        .post("/restake")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&json!({
            "point_id": 9_999,
            "negation_id": f.negation.0,
            "amount": 10
        }))
        .await;
    assert_eq!(response.status_code().as_u16(), 404);
}

#[tokio::test]
async fn test_slash_without_restake_is_bad_request() {
    let f = fixture();
    let response = f
        .server
        .post("/slash")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&f.stake_body(10))
        .await;
    assert_eq!(response.status_code().as_u16(), 400);
}

#[tokio::test]
async fn test_restake_then_slash() {
    let f = fixture();
    f.endorse(f.alice, 100);
    f.server
        .post("/restake")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&f.stake_body(50))
        .await
        .assert_status_ok();

    let response = f
        .server
        .post("/slash")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&f.stake_body(20))
        .await;
    response.assert_status_ok();
    let slash: SlashResponse = response.json();
    assert!(slash.slash_id > 0);
}

#[tokio::test]
async fn test_doubt_charges_the_doubter() {
    let f = fixture();
    f.endorse(f.alice, 100);
    f.server
        .post("/restake")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&f.stake_body(60))
        .await
        .assert_status_ok();

    let response = f
        .server
        .post("/doubt")
        .add_header(header::AUTHORIZATION, bearer(BOB_KEY))
        .json(&f.stake_body(20))
        .await;
    response.assert_status_ok();
    let doubt: DoubtResponse = response.json();
    assert!(doubt.doubt_id.is_some());
    assert_eq!(doubt.earnings, 0);
    assert_eq!(f.state.ledger.store().balance_of(f.bob).unwrap(), 980);
}

// =============================================================================
// RESTAKE CAP ENDPOINTS
// =============================================================================

#[tokio::test]
async fn test_validate_defaults_to_caller() {
    let f = fixture();
    f.endorse(f.alice, 100);

    let response = f
        .server
        .post("/restake/validate")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&json!({"point_id": f.point.0, "amount": 150}))
        .await;
    response.assert_status_ok();
    let validation: RestakeValidation = response.json();
    assert!(!validation.valid);
    assert_eq!(validation.max_allowed, 100);

    // Bob has no endorsement of his own.
    let bob: RestakeValidation = f
        .server
        .post("/restake/validate")
        .add_header(header::AUTHORIZATION, bearer(BOB_KEY))
        .json(&json!({"point_id": f.point.0, "amount": 1}))
        .await
        .json();
    assert!(!bob.valid);
    assert_eq!(bob.endorse_amount, 0);
}

#[tokio::test]
async fn test_enforce_cap_clamps_restake() {
    let f = fixture();
    f.endorse(f.alice, 100);
    f.server
        .post("/restake")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&f.stake_body(90))
        .await
        .assert_status_ok();
    f.state
        .ledger
        .unendorse(&Caller::user(f.alice), f.point, 40)
        .unwrap();

    let response = f
        .server
        .post("/restake/enforce")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&json!({"user_id": f.alice.0}))
        .await;
    response.assert_status_ok();
    let report: CapReport = response.json();
    assert!(report.success);
    assert_eq!(report.adjustments.len(), 1);
    assert_eq!(report.adjustments[0].new_amount, 60);
}

#[tokio::test]
async fn test_enforce_cap_requires_a_user() {
    let f = fixture();
    let response = f.server.post("/restake/enforce").json(&json!({})).await;
    assert_eq!(response.status_code().as_u16(), 401);
}

// =============================================================================
// ANALYTICS ENDPOINTS
// =============================================================================

#[tokio::test]
async fn test_pipeline_run_for_a_range() {
    let f = fixture();
    f.endorse(f.alice, 100);

    let response = f
        .server
        .post("/pipeline/run")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&json!({"from": "2024-01-01", "to": "2024-01-03"}))
        .await;
    response.assert_status_ok();
    let report: PipelineRangeReport = response.json();
    assert_eq!(report.days.len(), 3);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_delta_for_silent_users() {
    let f = fixture();
    let response = f
        .server
        .post("/delta")
        .add_header(header::AUTHORIZATION, bearer(BOB_KEY))
        .json(&json!({
            "user_a": f.alice.0,
            "user_b": f.bob.0,
            "day": "2024-01-02",
            "scope": "cluster",
            "root_id": f.point.0
        }))
        .await;
    response.assert_status_ok();
    let result: DeltaResult = response.json();
    assert_eq!(result.delta, None);
    assert!(result.no_interaction);
}

#[tokio::test]
async fn test_delta_without_key_is_unauthorized() {
    let f = fixture();
    let response = f
        .server
        .post("/delta")
        .json(&json!({
            "user_a": f.alice.0,
            "user_b": f.bob.0,
            "day": "2024-01-02",
            "scope": "cluster",
            "root_id": f.point.0
        }))
        .await;
    assert_eq!(response.status_code().as_u16(), 401);
}

#[tokio::test]
async fn test_delta_leaves_stances_untouched() {
    let f = fixture();
    f.server
        .post("/negate")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&json!({
            "point_id": f.point.0,
            "counterpoint_id": f.negation.0
        }))
        .await
        .assert_status_ok();
    f.endorse(f.alice, 100);

    let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let response = f
        .server
        .post("/delta")
        .add_header(header::AUTHORIZATION, bearer(BOB_KEY))
        .json(&json!({
            "user_a": f.alice.0,
            "user_b": f.bob.0,
            "day": "2024-01-02",
            "scope": "cluster",
            "root_id": f.point.0
        }))
        .await;
    response.assert_status_ok();
    let result: DeltaResult = response.json();
    assert!(result.delta.is_some_and(|d| d > 0.0));

    let stances = f
        .state
        .ledger
        .store()
        .read(|tx| tx.stances_on(day))
        .unwrap();
    assert!(stances.is_empty());
}

#[tokio::test]
async fn test_delta_on_missing_rationale_is_not_found() {
    let f = fixture();
    let response = f
        .server
        .post("/delta")
        .add_header(header::AUTHORIZATION, bearer(BOB_KEY))
        .json(&json!({
            "user_a": f.alice.0,
            "user_b": f.bob.0,
            "day": "2024-01-02",
            "scope": "rationale",
            "rationale_id": 77
        }))
        .await;
    assert_eq!(response.status_code().as_u16(), 404);
}

#[tokio::test]
async fn test_malformed_body_is_client_error() {
    let f = fixture();
    let response = f
        .server
        .post("/restake")
        .add_header(header::AUTHORIZATION, bearer(ALICE_KEY))
        .json(&json!({"point_id": "one"}))
        .await;
    assert!(response.status_code().is_client_error());
}
