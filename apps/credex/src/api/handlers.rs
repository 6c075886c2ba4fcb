//! # API Endpoint Handlers
//!
//! Ledger errors map onto status codes: validation → 400, unauthenticated →
//! 401, not found → 404, everything else → 500.

use super::{
    AppState,
    types::{
        DeltaRequest, DeltaScope, DoubtResponse, EnforceCapRequest, ErrorResponse, HealthResponse,
        NegateRequest, NegateResponse, PipelineRunRequest, RestakeResponse, SlashResponse,
        StakeRequest, ValidateRestakeRequest,
    },
};
use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use credex_core::{
    Caller, CapReport, DeltaResult, Identity, LedgerError, LedgerResult, PipelineRangeReport,
    RestakeValidation, UserId,
};

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// A ledger error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        Self(e)
    }
}

/// Status code for a ledger error.
#[must_use]
pub fn status_for(error: &LedgerError) -> StatusCode {
    if matches!(error, LedgerError::Unauthenticated) {
        StatusCode::UNAUTHORIZED
    } else if error.is_validation() || matches!(error, LedgerError::Config(_)) {
        StatusCode::BAD_REQUEST
    } else if error.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn require_user(caller: &Caller) -> Result<UserId, ApiError> {
    caller
        .current_user_id()
        .ok_or(ApiError(LedgerError::Unauthenticated))
}

/// Run redb-bound `work` off the async runtime.
async fn blocking<T, F>(task: &'static str, work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> LedgerResult<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LedgerError::Consistency(format!("{} task failed: {}", task, e)))?;
    Ok(result?)
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// LEDGER HANDLERS
// =============================================================================

/// Negate (or object to) a point.
pub async fn negate_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<NegateRequest>,
) -> ApiResult<NegateResponse> {
    let ledger = state.ledger.clone();
    let id = blocking("negate", move || {
        let (point, counter) = (request.point_id, request.counterpoint_id);
        if request.objection {
            ledger.object(&caller, point, counter, request.cred)
        } else {
            ledger.negate(&caller, point, counter, request.cred)
        }
    })
    .await?;
    Ok(Json(NegateResponse { negation_id: id.0 }))
}

/// Create or update a restake.
pub async fn restake_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<StakeRequest>,
) -> ApiResult<RestakeResponse> {
    let ledger = state.ledger.clone();
    let id = blocking("restake", move || {
        ledger.restake(&caller, request.point_id, request.negation_id, request.amount)
    })
    .await?;
    Ok(Json(RestakeResponse { restake_id: id.0 }))
}

/// Slash the caller's restake.
pub async fn slash_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<StakeRequest>,
) -> ApiResult<SlashResponse> {
    let ledger = state.ledger.clone();
    let id = blocking("slash", move || {
        ledger.slash(&caller, request.point_id, request.negation_id, request.amount)
    })
    .await?;
    Ok(Json(SlashResponse { slash_id: id.0 }))
}

/// Place or increase a doubt.
pub async fn doubt_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<StakeRequest>,
) -> ApiResult<DoubtResponse> {
    let ledger = state.ledger.clone();
    let outcome = blocking("doubt", move || {
        ledger.doubt(&caller, request.point_id, request.negation_id, request.amount)
    })
    .await?;
    Ok(Json(outcome.into()))
}

// =============================================================================
// RESTAKE CAP HANDLERS
// =============================================================================

pub async fn validate_restake_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<ValidateRestakeRequest>,
) -> ApiResult<RestakeValidation> {
    let user = match request.user_id {
        Some(user) => user,
        None => require_user(&caller)?,
    };
    let pipeline = state.pipeline.clone();
    let validation = blocking("restake validation", move || {
        pipeline
            .reconciler()
            .validate(user, request.point_id, request.amount)
    })
    .await?;
    Ok(Json(validation))
}

/// Clamp restakes to their endorsement cap. Failures are reported in the
/// body with `success: false`, never as an error status.
pub async fn enforce_cap_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<EnforceCapRequest>,
) -> ApiResult<CapReport> {
    require_user(&caller)?;
    let pipeline = state.pipeline.clone();
    let report = blocking("cap enforcement", move || {
        Ok(pipeline
            .reconciler()
            .enforce(request.user_id, request.point_id))
    })
    .await?;
    Ok(Json(report))
}

// =============================================================================
// ANALYTICS HANDLERS
// =============================================================================

/// Run the daily pipeline for one day or a range of days.
pub async fn pipeline_run_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<PipelineRunRequest>,
) -> ApiResult<PipelineRangeReport> {
    require_user(&caller)?;
    let to = request.to.unwrap_or(request.from);
    let pipeline = state.pipeline.clone();
    let report =
        blocking("pipeline", move || pipeline.run_pipeline_range(request.from, to)).await?;
    Ok(Json(report))
}

/// Delta between two users over a cluster, rationale or topic.
///
/// Authenticated: resolving a cluster that was never built stores it.
pub async fn delta_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<DeltaRequest>,
) -> ApiResult<DeltaResult> {
    require_user(&caller)?;
    let aggregator = state.aggregator.clone();
    let result = blocking("delta", move || {
        let (a, b, day) = (request.user_a, request.user_b, request.day);
        match request.scope {
            DeltaScope::Cluster { root_id } => aggregator.compute_delta(a, b, root_id, day),
            DeltaScope::Rationale { rationale_id } => {
                aggregator.compute_rationale_delta(a, b, rationale_id, day)
            }
            DeltaScope::Topic { topic_id } => aggregator.compute_topic_delta(a, b, topic_id, day),
        }
    })
    .await?;
    Ok(Json(result))
}
