//! HTTP API for VoteChain
//!
//! Serves the voting front end (vote submission, mining trigger, chain and
//! tally views) and the peer protocol (chain fetch, registration, block
//! announcement) from one axum router.

use axum::{
    extract::{rejection::JsonRejection, Host, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::network::{ChainResponse, RegisterRequest};
use crate::node::{Node, NodeStatus};
use crate::sync::SyncStats;
use crate::transaction::VoteRequest;

/// Router state: the node plus request counters.
#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<Node>,
    stats: Arc<Mutex<ApiStats>>,
}

impl ApiState {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            stats: Arc::new(Mutex::new(ApiStats::new())),
        }
    }
}

/// API statistics and monitoring
#[derive(Debug)]
struct ApiStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    transactions_submitted: u64,
    start_time: Instant,
}

impl ApiStats {
    fn new() -> Self {
        ApiStats {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            transactions_submitted: 0,
            start_time: Instant::now(),
        }
    }

    fn record_request(&mut self, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    InvalidInput(String),
    Chain(ChainError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Chain(err) => {
                let status = match &err {
                    ChainError::InvalidTransaction(_)
                    | ChainError::InvalidPeerAddress(_)
                    | ChainError::RejectedBlock(_) => StatusCode::BAD_REQUEST,
                    ChainError::CorruptChainDump(_) => StatusCode::CONFLICT,
                    ChainError::UnreachablePeer { .. } => StatusCode::BAD_GATEWAY,
                    ChainError::Storage(_)
                    | ChainError::Serialization(_)
                    | ChainError::Crypto(_)
                    | ChainError::Config(_)
                    | ChainError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::Chain(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
struct SuccessResponse {
    message: String,
}

impl SuccessResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[derive(Serialize)]
pub struct MineResponse {
    pub message: String,
    pub mined: bool,
    pub index: Option<u64>,
    pub hash: Option<String>,
    pub chain_replaced: bool,
}

#[derive(Serialize)]
pub struct RegisterWithResponse {
    pub message: String,
    pub length: usize,
    pub peers: Vec<String>,
}

#[derive(Serialize)]
pub struct ApiStatsResponse {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub transactions_submitted: u64,
    pub uptime_seconds: u64,
    pub blocks_mined: u64,
    pub public_length: usize,
    pub counting_length: usize,
    pub pending_transactions: usize,
    pub peer_count: usize,
    pub sync: SyncStats,
}

// ============================================================================
// Middleware
// ============================================================================

/// Request statistics middleware
async fn stats_middleware(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    state.stats.lock().record_request(response.status().is_success());
    response
}

/// Logs method, path, status, duration and the node lifecycle state.
async fn logging_middleware(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        node_state = ?state.node.status(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Build the API router with all endpoints
pub fn build_api_router(node: Arc<Node>) -> Router {
    let state = ApiState::new(node);

    Router::new()
        // Front end
        .route("/new_transaction", post(new_transaction))
        .route("/mine", get(mine))
        .route("/results_count", get(results_count))
        .route("/pending_tx", get(pending_tx))
        // Peer protocol
        .route("/chain", get(get_chain))
        .route("/register_node", post(register_node))
        .route("/register_with", post(register_with))
        .route("/add_block", post(add_block))
        // System
        .route("/health", get(health_check))
        .route("/stats", get(get_api_stats))
        // logging before stats so we always record timing and node-state
        .layer(middleware::from_fn_with_state(state.clone(), logging_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), stats_middleware))
        .with_state(state)
        .layer(cors_layer())
}

/// Serve the API on an already bound listener.
pub async fn run_api_server(node: Arc<Node>, listener: TcpListener) -> Result<(), ChainError> {
    let app = build_api_router(node);
    axum::serve(listener, app)
        .await
        .map_err(|e| ChainError::Io(format!("API server stopped: {}", e)))
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn new_transaction(
    State(state): State<ApiState>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    state.node.submit(&request)?;
    state.stats.lock().transactions_submitted += 1;
    Ok((StatusCode::CREATED, SuccessResponse::new("Success")))
}

async fn mine(State(state): State<ApiState>) -> Result<Json<MineResponse>, ApiError> {
    let summary = state.node.mine().await?;
    let message = match summary.index {
        Some(index) if summary.mined => format!("Block #{} is mined.", index),
        _ => "No transactions to mine".to_string(),
    };
    Ok(Json(MineResponse {
        message,
        mined: summary.mined,
        index: summary.index,
        hash: summary.hash,
        chain_replaced: summary.chain_replaced,
    }))
}

async fn get_chain(State(state): State<ApiState>) -> Json<ChainResponse> {
    Json(state.node.chain())
}

async fn results_count(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.node.tally())
}

async fn pending_tx(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.node.pending())
}

fn required_address(request: RegisterRequest) -> Result<String, ApiError> {
    request
        .node_address
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidInput("Invalid data: node_address is required".to_string()))
}

async fn register_node(
    State(state): State<ApiState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<ChainResponse>, ApiError> {
    let Json(request) = payload?;
    let address = required_address(request)?;
    Ok(Json(state.node.register_node(&address)?))
}

async fn register_with(
    State(state): State<ApiState>,
    host: Option<Host>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterWithResponse>, ApiError> {
    let Json(request) = payload?;
    let address = required_address(request)?;
    let reached_as = host.map(|Host(host)| host);
    let length = state.node.register_with(&address, reached_as.as_deref()).await?;
    Ok(Json(RegisterWithResponse {
        message: "Registration successful".to_string(),
        length,
        peers: state.node.peers(),
    }))
}

async fn add_block(
    State(state): State<ApiState>,
    payload: Result<Json<Block>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(block) = payload?;
    match state.node.receive_block(block) {
        Ok(_) => Ok((StatusCode::CREATED, SuccessResponse::new("Block added to the chain"))),
        Err(ChainError::RejectedBlock(_)) => Err(ApiError::InvalidInput(
            "The block was discarded by the node".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.node.status();
    let (code, label) = match status {
        NodeStatus::Ready => (StatusCode::OK, "healthy"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };
    (
        code,
        Json(serde_json::json!({
            "status": label,
            "node_state": status,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn get_api_stats(State(state): State<ApiState>) -> Json<ApiStatsResponse> {
    let (public_length, counting_length) = state.node.chain_lengths();
    let pending_transactions = state.node.pending().len();
    let peer_count = state.node.peers().len();
    let stats = state.stats.lock();
    Json(ApiStatsResponse {
        total_requests: stats.total_requests,
        successful_requests: stats.successful_requests,
        failed_requests: stats.failed_requests,
        transactions_submitted: stats.transactions_submitted,
        uptime_seconds: stats.start_time.elapsed().as_secs(),
        blocks_mined: state.node.blocks_mined(),
        public_length,
        counting_length,
        pending_transactions,
        peer_count,
        sync: state.node.sync_stats(),
    })
}
