//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API. Analytics
//! results (`CapReport`, `RestakeValidation`, `PipelineRangeReport`,
//! `DeltaResult`) are returned as the core types serialize.

use chrono::NaiveDate;
use credex_core::{Cred, DoubtOutcome, PointId, RationaleId, TopicId, UserId};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Body of every non-2xx response produced by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// =============================================================================
// LEDGER REQUESTS/RESPONSES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegateRequest {
    pub point_id: PointId,
    pub counterpoint_id: PointId,
    /// Cred endorsed on the counterpoint, 0 for a bare negation.
    #[serde(default)]
    pub cred: Cred,
    /// Record the negation as an objection.
    #[serde(default)]
    pub objection: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegateResponse {
    pub negation_id: u64,
}

/// Body shared by `/restake`, `/slash` and `/doubt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeRequest {
    pub point_id: PointId,
    pub negation_id: PointId,
    pub amount: Cred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestakeResponse {
    pub restake_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashResponse {
    pub slash_id: u64,
}

/// `doubt_id` is `None` when a zero amount left nothing to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoubtResponse {
    pub doubt_id: Option<u64>,
    pub earnings: Cred,
}

impl From<Option<DoubtOutcome>> for DoubtResponse {
    fn from(outcome: Option<DoubtOutcome>) -> Self {
        match outcome {
            Some(o) => Self {
                doubt_id: Some(o.doubt_id.0),
                earnings: o.earnings,
            },
            None => Self {
                doubt_id: None,
                earnings: 0,
            },
        }
    }
}

// =============================================================================
// RESTAKE CAP REQUESTS
// =============================================================================

/// `user_id` defaults to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRestakeRequest {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub point_id: PointId,
    pub amount: Cred,
}

/// Both filters optional; an empty body enforces every restake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnforceCapRequest {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub point_id: Option<PointId>,
}

// =============================================================================
// ANALYTICS REQUESTS
// =============================================================================

/// Run the pipeline for `from`, or for every day in `from..=to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunRequest {
    pub from: NaiveDate,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

/// The point set a delta is computed over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum DeltaScope {
    Cluster { root_id: PointId },
    Rationale { rationale_id: RationaleId },
    Topic { topic_id: TopicId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaRequest {
    pub user_a: UserId,
    pub user_b: UserId,
    pub day: NaiveDate,
    #[serde(flatten)]
    pub scope: DeltaScope,
}

#[cfg(test)]
mod tests {
    use super::*;
    use credex_core::DoubtId;
    use serde_json::json;

    #[test]
    fn delta_request_is_tagged_by_scope() {
        let request: DeltaRequest = serde_json::from_value(json!({
            "user_a": 1,
            "user_b": 2,
            "day": "2024-01-02",
            "scope": "rationale",
            "rationale_id": 9
        }))
        .expect("parse");
        assert!(matches!(
            request.scope,
            DeltaScope::Rationale {
                rationale_id: RationaleId(9)
            }
        ));
    }

    #[test]
    fn negate_defaults_to_bare_negation() {
        let request: NegateRequest =
            serde_json::from_value(json!({"point_id": 1, "counterpoint_id": 2})).expect("parse");
        assert_eq!(request.cred, 0);
        assert!(!request.objection);
    }

    #[test]
    fn doubt_response_from_outcome() {
        let none = DoubtResponse::from(None);
        assert_eq!(none.doubt_id, None);
        let some = DoubtResponse::from(Some(DoubtOutcome {
            doubt_id: DoubtId(4),
            earnings: 12,
        }));
        assert_eq!(some.doubt_id, Some(4));
        assert_eq!(some.earnings, 12);
    }
}
