//! Local HTTP API read by the UI layer: history, chains, swaps, preferences and quotes

use crate::chain::{Chain, ChainRegistry};
use crate::config::ApiConfig;
use crate::error::{EngineError, EngineResult};
use crate::quote::{QuoteRefresher, QuoteRequest, RefreshOutcome};
use crate::route::{RouteQuote, Token};
use crate::state::{
    HistoryStore, KeyValueStore, Preferences, PreferencesStore, SwapHistory, SwapSelection,
};
use crate::swap::SwapSession;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SwapSession>,
    pub history: Arc<HistoryStore>,
    pub preferences: Arc<PreferencesStore>,
    pub registry: Arc<ChainRegistry>,
    pub store: Arc<dyn KeyValueStore>,
    pub refresher: Option<Arc<QuoteRefresher>>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/chains", get(get_chains))
        .route("/swaps", get(list_swaps).post(submit_swap))
        .route("/swaps/cancel", post(cancel_swap))
        .route("/swaps/:tx_hash", get(get_swap))
        .route("/preferences", get(get_preferences))
        .route("/preferences/slippage", put(set_slippage))
        .route("/preferences/selection", put(set_selection))
        .route(
            "/preferences/favourites",
            post(add_favourite).delete(remove_favourite),
        )
        .route("/quotes", post(refresh_quotes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> EngineResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Error body returned by every failing endpoint
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        let status = match &error {
            EngineError::HistoryNotFound { .. } => StatusCode::NOT_FOUND,
            e if e.is_rejection() => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::QuoteProvider(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!("API request failed: {}", error);
        }
        Self::new(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Liveness plus storage reachability
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage = state.store.health_check().await.is_ok();
    let status = if storage {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if storage { "ok" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            storage,
            chains: state.registry.len(),
            active_swap: state.session.active_swap().await,
        }),
    )
}

async fn get_chains(State(state): State<AppState>) -> Json<Vec<Chain>> {
    Json(
        state
            .registry
            .chains()
            .iter()
            .map(|c| c.as_ref().clone())
            .collect(),
    )
}

async fn list_swaps(State(state): State<AppState>) -> Json<Vec<SwapHistory>> {
    Json(state.history.list().await)
}

async fn get_swap(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> ApiResult<Json<SwapHistory>> {
    let hash = H256::from_str(&tx_hash).map_err(|_| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("invalid transaction hash: {}", tx_hash),
        )
    })?;

    state
        .history
        .get_swap_history(hash)
        .await
        .map(Json)
        .ok_or_else(|| EngineError::HistoryNotFound { tx_hash }.into())
}

async fn submit_swap(
    State(state): State<AppState>,
    Json(quote): Json<RouteQuote>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let swap_id = state.session.start(quote).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { swap_id })))
}

async fn cancel_swap(State(state): State<AppState>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.session.cancel().await,
    })
}

async fn get_preferences(State(state): State<AppState>) -> ApiResult<Json<PreferencesResponse>> {
    let Preferences { slippage_bps } = state.preferences.preferences().await?;
    Ok(Json(PreferencesResponse {
        slippage_bps,
        favourite_tokens: state.preferences.favourite_tokens().await?,
        selection: state.preferences.swap_selection().await?,
    }))
}

async fn set_slippage(
    State(state): State<AppState>,
    Json(request): Json<SlippageRequest>,
) -> ApiResult<Json<Preferences>> {
    Ok(Json(state.preferences.set_slippage(request.slippage_bps).await?))
}

async fn set_selection(
    State(state): State<AppState>,
    Json(selection): Json<SwapSelection>,
) -> ApiResult<Json<SwapSelection>> {
    state.preferences.set_swap_selection(&selection).await?;
    Ok(Json(selection))
}

async fn add_favourite(
    State(state): State<AppState>,
    Json(token): Json<Token>,
) -> ApiResult<Json<Vec<Token>>> {
    Ok(Json(state.preferences.add_favourite(token).await?))
}

async fn remove_favourite(
    State(state): State<AppState>,
    Json(request): Json<FavouriteKey>,
) -> ApiResult<Json<Vec<Token>>> {
    Ok(Json(
        state
            .preferences
            .remove_favourite(request.chain_id, request.address)
            .await?,
    ))
}

async fn refresh_quotes(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<Json<Vec<RouteQuote>>> {
    let refresher = state.refresher.as_ref().ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "no quoting service configured",
        )
    })?;

    match refresher.refresh(request).await? {
        RefreshOutcome::Applied(quotes) => Ok(Json(quotes)),
        RefreshOutcome::Superseded => Err(ApiError::new(
            StatusCode::CONFLICT,
            "superseded by a newer quote request",
        )),
    }
}

// Request and response types

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    storage: bool,
    chains: usize,
    active_swap: Option<Uuid>,
}

#[derive(Serialize, Deserialize)]
struct SubmitResponse {
    swap_id: Uuid,
}

#[derive(Serialize, Deserialize)]
struct CancelResponse {
    cancelled: Option<Uuid>,
}

#[derive(Serialize)]
struct PreferencesResponse {
    slippage_bps: u32,
    favourite_tokens: Vec<Token>,
    selection: SwapSelection,
}

#[derive(Deserialize)]
struct SlippageRequest {
    slippage_bps: u32,
}

#[derive(Deserialize)]
struct FavouriteKey {
    chain_id: u64,
    address: Address,
}
