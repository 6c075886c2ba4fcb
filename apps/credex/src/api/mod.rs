//! # Credex HTTP API Module
//!
//! The authenticated request layer in front of the ledger engines.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /negate` - Negate or object to a point
//! - `POST /restake` - Create or edit a restake
//! - `POST /slash` - Slash the caller's restake
//! - `POST /doubt` - Place or increase a doubt
//! - `POST /restake/validate` - Check a proposed restake amount
//! - `POST /restake/enforce` - Clamp restakes to their endorsement cap
//! - `POST /pipeline/run` - Run the daily analytics pipeline
//! - `POST /delta` - Cluster, rationale or topic delta between two users (authenticated)
//!
//! ## Security Configuration
//!
//! - `api_keys` (config): bearer key → user id
//! - `rate_limit` (config) / `CREDEX_RATE_LIMIT`: requests per second, 0 disables
//! - `CREDEX_CORS_ORIGINS`: comma-separated allowed origins, or "*" for all
//!   (default: localhost only)

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::ApiKeys;
pub use handlers::{ApiError, status_for};
pub use middleware::create_rate_limiter;
pub use types::{
    DeltaRequest, DeltaScope, DoubtResponse, EnforceCapRequest, ErrorResponse, HealthResponse,
    NegateRequest, NegateResponse, PipelineRunRequest, RestakeResponse, SlashResponse,
    StakeRequest, ValidateRestakeRequest,
};

use crate::config::AppConfig;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use credex_core::{
    DeltaAggregator, Ledger, LedgerError, LedgerResult, LedgerStore, NegationClusterBuilder,
    Pipeline,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state. The store serializes writers itself, so no lock is
/// held around the engines.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub pipeline: Arc<Pipeline>,
    pub aggregator: Arc<DeltaAggregator>,
    pub keys: Arc<ApiKeys>,
    pub rate_limit: u32,
}

impl AppState {
    /// Wire the engines over `store` with the configured analytics.
    pub fn new(store: Arc<LedgerStore>, config: &AppConfig) -> LedgerResult<Self> {
        let pipeline = Pipeline::with_defaults(Arc::clone(&store), config.analytics.clone())?;
        let aggregator = DeltaAggregator::new(
            Arc::clone(&store),
            Arc::new(NegationClusterBuilder::new(
                Arc::clone(&store),
                config.analytics.cluster_max_depth,
            )),
            config.analytics.clone(),
        );
        Ok(Self {
            ledger: Arc::new(Ledger::new(store)),
            pipeline: Arc::new(pipeline),
            aggregator: Arc::new(aggregator),
            keys: Arc::new(ApiKeys::new(config.key_table(), config.space_id())),
            rate_limit: config.rate_limit,
        })
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from `CREDEX_CORS_ORIGINS`.
fn build_cors_layer() -> CorsLayer {
    match std::env::var("CREDEX_CORS_ORIGINS").ok().as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (CREDEX_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => Some(hv),
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in CREDEX_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                restrict(CorsLayer::new().allow_origin(allowed_origins))
            }
        }
        None => build_localhost_cors(),
    }
}

/// Build a restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();
    restrict(CorsLayer::new().allow_origin(origins))
}

fn restrict(layer: CorsLayer) -> CorsLayer {
    layer
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Rate Limiting - protects against DoS (if enabled)
/// 4. Authentication - resolves the caller from the API key
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    if state.keys.is_empty() {
        tracing::warn!(
            "No API keys configured - every request is anonymous and ledger mutations will be rejected"
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/negate", post(handlers::negate_handler))
        .route("/restake", post(handlers::restake_handler))
        .route("/slash", post(handlers::slash_handler))
        .route("/doubt", post(handlers::doubt_handler))
        .route("/restake/validate", post(handlers::validate_restake_handler))
        .route("/restake/enforce", post(handlers::enforce_cap_handler))
        .route("/pipeline/run", post(handlers::pipeline_run_handler))
        .route("/delta", post(handlers::delta_handler))
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state.keys),
            auth::api_key_auth_middleware,
        ));

    if state.rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", state.rate_limit);
        router = router.layer(axum_middleware::from_fn_with_state(
            create_rate_limiter(state.rate_limit),
            middleware::rate_limit_middleware,
        ));
    } else {
        tracing::info!("Rate limiting disabled");
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(256 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server.
pub async fn run_server(addr: &str, state: AppState) -> LedgerResult<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| LedgerError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("Credex HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| LedgerError::Io(format!("Server error: {}", e)))
}
