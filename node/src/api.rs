//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the node's resync interface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path               | Description                               |
//! |--------|--------------------|-------------------------------------------|
//! | GET    | `/health`          | Liveness probe                            |
//! | GET    | `/status`          | Counts, resend mode and last pass         |
//! | POST   | `/resendBatch`     | Re-publish history to one peer            |
//! | POST   | `/pushBatch`       | Stage a batch pushed by a peer            |
//! | POST   | `/staging/perform` | Run a staging pass                        |
//! | POST   | `/sync/perform`    | Run a sync pass                           |
//! | DELETE | `/staging`         | Empty the staging area                    |
//! | GET    | `/ws`              | Outbound batches and pass events          |
//!
//! The resync operations touch sled synchronously, so every handler that
//! reaches the manager runs it on the blocking pool.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ptm_resync::config::ResyncConfig;
use ptm_resync::enclave::Enclave;
use ptm_resync::payload::{BincodePayloadEncoder, PayloadEncoder, PayloadError};
use ptm_resync::resend::{
    BatchResendManager, BatchResendManagerImpl, PushBatchRequest, ResendBatchRequest,
    ResendBatchResponse, ResendError, ResyncOutcome, SyncReport, TransactionCommitter,
};
use ptm_resync::storage::{
    EncryptedTransactionStore, ResyncDb, SledStagingStore, SledTransactionStore, StagingStore,
};

use crate::metrics::SharedMetrics;
use crate::publisher::ChannelPublisher;
use crate::recovery::{self, PassStatus};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers and the
/// background recovery loop.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub manager: Arc<dyn BatchResendManager>,
    pub transactions: Arc<dyn EncryptedTransactionStore>,
    pub staging: Arc<dyn StagingStore>,
    /// Broadcast channel for outbound batches and pass events.
    pub event_tx: broadcast::Sender<NodeEvent>,
    pub metrics: SharedMetrics,
    /// Result of the most recent background pass.
    pub last_pass: Arc<RwLock<Option<PassStatus>>>,
}

impl AppState {
    /// Wire the resync stack over `db` with the bincode codec, sled stores,
    /// the committer and a channel publisher on `event_tx`.
    pub fn new(
        version: String,
        db: &ResyncDb,
        enclave: Arc<dyn Enclave>,
        config: ResyncConfig,
        metrics: SharedMetrics,
        event_tx: broadcast::Sender<NodeEvent>,
    ) -> Self {
        let encoder: Arc<dyn PayloadEncoder> = Arc::new(BincodePayloadEncoder);
        let transactions = Arc::new(SledTransactionStore::new(db));
        let staging = Arc::new(SledStagingStore::new(db));
        let publisher = Arc::new(ChannelPublisher::new(
            encoder.clone(),
            event_tx.clone(),
            metrics.clone(),
        ));
        let committer = Arc::new(TransactionCommitter::new(
            encoder.clone(),
            transactions.clone(),
        ));

        let manager = BatchResendManagerImpl::new(
            encoder,
            enclave,
            transactions.clone(),
            staging.clone(),
            publisher,
            committer,
            config,
        );

        Self {
            version,
            manager: Arc::new(manager),
            transactions,
            staging,
            event_tx,
            metrics,
            last_pass: Arc::new(RwLock::new(None)),
        }
    }
}

/// Events pushed to WebSocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    /// A resend batch for `recipient`, ready to forward to its `/pushBatch`.
    #[serde(rename = "outbound_batch", rename_all = "camelCase")]
    OutboundBatch {
        recipient: String,
        encoded_payloads: Vec<String>,
    },
    /// A background recovery pass finished.
    #[serde(rename = "pass_completed")]
    PassCompleted {
        staging: ResyncOutcome,
        sync: ResyncOutcome,
        cleaned: Option<u64>,
    },
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/resendBatch", post(resend_batch_handler))
        .route("/pushBatch", post(push_batch_handler))
        .route("/staging/perform", post(perform_staging_handler))
        .route("/sync/perform", post(perform_sync_handler))
        .route("/staging", axum::routing::delete(cleanup_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Wire form of a push: payloads as hex strings.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushBatchBody {
    pub encoded_payloads: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub resend_mode: bool,
    pub transaction_count: u64,
    pub staging_rows: u64,
    pub staged_rows: u64,
    pub last_pass: Option<PassStatus>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OutcomeResponse {
    pub outcome: ResyncOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An error rendered as `{"error": ...}` with a mapped status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ResendError> for ApiError {
    fn from(err: ResendError) -> Self {
        let status = match &err {
            ResendError::EnclaveUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ResendError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            ResendError::InvalidBatchSize
            | ResendError::InvalidPublicKey(_)
            | ResendError::Payload(PayloadError::Decode(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("resync operation failed: {}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
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

/// Run a synchronous resync operation on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ResendError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("task failed: {}", e)))?
        .map_err(ApiError::from)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`
async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let stores = state.clone();
    let (transaction_count, staging_rows, staged_rows) = run_blocking(move || {
        Ok((
            stores.transactions.transaction_count()?,
            stores.staging.count_all()?,
            stores.staging.count_staged()?,
        ))
    })
    .await?;

    Ok(Json(StatusResponse {
        version: state.version.clone(),
        resend_mode: state.manager.is_resend_mode(),
        transaction_count,
        staging_rows,
        staged_rows,
        last_pass: state.last_pass.read().clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// `POST /resendBatch`: body `{publicKey, batchSize}`.
async fn resend_batch_handler(
    State(state): State<AppState>,
    Json(request): Json<ResendBatchRequest>,
) -> Result<Json<ResendBatchResponse>, ApiError> {
    let manager = state.manager.clone();
    let response = run_blocking(move || manager.resend_batch(&request)).await?;
    state
        .metrics
        .resend_rows_examined_total
        .inc_by(response.total);
    Ok(Json(response))
}

/// `POST /pushBatch`: body `{encodedPayloads: [hex]}`.
async fn push_batch_handler(
    State(state): State<AppState>,
    Json(body): Json<PushBatchBody>,
) -> Result<StatusCode, ApiError> {
    let encoded_payloads = body
        .encoded_payloads
        .iter()
        .map(hex::decode)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::bad_request(format!("invalid hex payload: {}", e)))?;
    let count = encoded_payloads.len() as u64;

    let worker = state.clone();
    run_blocking(move || {
        worker
            .manager
            .store_resend_batch(&PushBatchRequest { encoded_payloads })?;
        recovery::refresh_staging_gauge(&worker);
        Ok(())
    })
    .await?;

    state.metrics.push_payloads_staged_total.inc_by(count);
    Ok(StatusCode::OK)
}

/// `POST /staging/perform`
async fn perform_staging_handler(
    State(state): State<AppState>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let outcome = run_blocking(move || recovery::stage(&state)).await?;
    Ok(Json(OutcomeResponse { outcome }))
}

/// `POST /sync/perform`: returns the outcome with its counters.
async fn perform_sync_handler(State(state): State<AppState>) -> Result<Json<SyncReport>, ApiError> {
    let report = run_blocking(move || recovery::sync(&state)).await?;
    Ok(Json(report))
}

/// `DELETE /staging`
async fn cleanup_handler(State(state): State<AppState>) -> Result<Json<CleanupResponse>, ApiError> {
    let removed = run_blocking(move || recovery::cleanup(&state)).await?;
    Ok(Json(CleanupResponse { removed }))
}

/// `GET /ws`: WebSocket upgrade for live event streaming.
///
/// Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Forwards broadcast events until the client disconnects or the channel
/// is closed.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use ptm_resync::crypto::{KeyPair, MessageHash};
    use ptm_resync::storage::EncryptedTransaction;
    use tower::ServiceExt;

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        send(router, req).await
    }

    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        send(router, req).await
    }

    async fn post_empty(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        send(router, req).await
    }

    fn error_of(body: &[u8]) -> String {
        let json: ErrorResponse = serde_json::from_slice(body).unwrap();
        json.error
    }

    fn store_raw(node: &TestNode, raw: Vec<u8>) {
        let payload = BincodePayloadEncoder.decode(&raw).unwrap();
        node.state
            .transactions
            .save(&EncryptedTransaction::new(payload.message_hash(), raw))
            .unwrap();
    }

    // -- health / status ----------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let node = test_node();
        let router = create_router(node.state.clone());
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_store_counts() {
        let node = test_node();
        node.state
            .manager
            .store_resend_batch(&seeded_push(&node.key, 2))
            .unwrap();
        let router = create_router(node.state.clone());

        let (status, body) = get(&router, "/status").await;
        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert!(resp.resend_mode);
        assert_eq!(resp.transaction_count, 0);
        assert_eq!(resp.staging_rows, 2);
        assert_eq!(resp.staged_rows, 0);
        assert!(resp.last_pass.is_none());
    }

    // -- resendBatch ----------------------------------------------------------

    #[tokio::test]
    async fn resend_publishes_sender_views() {
        let node = test_node();
        let target = KeyPair::generate().public_key();
        let payload = node
            .enclave
            .encrypt_payload(b"mine", &node.key, &[target])
            .unwrap();
        store_raw(&node, BincodePayloadEncoder.encode(&payload).unwrap());
        let mut rx = node.state.event_tx.subscribe();
        let router = create_router(node.state.clone());

        let (status, body) = post_json(
            &router,
            "/resendBatch",
            serde_json::json!({ "publicKey": target.to_base64(), "batchSize": 10 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let resp: ResendBatchResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.total, 1);
        assert_eq!(node.state.metrics.resend_rows_examined_total.get(), 1);

        match rx.try_recv().unwrap() {
            NodeEvent::OutboundBatch {
                recipient,
                encoded_payloads,
            } => {
                assert_eq!(recipient, target.to_base64());
                assert_eq!(encoded_payloads.len(), 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn resend_rejects_bad_requests() {
        let node = test_node();
        let router = create_router(node.state.clone());

        let (status, body) = post_json(
            &router,
            "/resendBatch",
            serde_json::json!({ "publicKey": "not base64!", "batchSize": 10 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error_of(&body).contains("invalid public key"));

        let (status, _) = post_json(
            &router,
            "/resendBatch",
            serde_json::json!({ "publicKey": node.key.to_base64(), "batchSize": 0 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn resend_with_stopped_enclave_is_unavailable() {
        let node = test_node();
        node.enclave.stop();
        let router = create_router(node.state.clone());

        let (status, body) = post_json(
            &router,
            "/resendBatch",
            serde_json::json!({ "publicKey": node.key.to_base64(), "batchSize": 1 }),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_of(&body), "enclave is not available");
    }

    #[tokio::test]
    async fn resend_of_unopenable_payload_is_not_found() {
        let node = test_node();
        let target = KeyPair::generate().public_key();
        for raw in foreign_payloads(&target, 1) {
            store_raw(&node, raw);
        }
        let router = create_router(node.state.clone());

        let (status, body) = post_json(
            &router,
            "/resendBatch",
            serde_json::json!({ "publicKey": target.to_base64(), "batchSize": 1 }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(error_of(&body).starts_with("No key found as recipient of message "));
    }

    // -- pushBatch and passes -------------------------------------------------

    #[tokio::test]
    async fn push_rejects_invalid_payloads() {
        let node = test_node();
        let router = create_router(node.state.clone());

        let (status, _) = post_json(
            &router,
            "/pushBatch",
            serde_json::json!({ "encodedPayloads": ["zz"] }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post_json(
            &router,
            "/pushBatch",
            serde_json::json!({ "encodedPayloads": ["deadbeef"] }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(node.state.staging.count_all().unwrap(), 0);
    }

    #[tokio::test]
    async fn push_stage_sync_and_cleanup() {
        let node = test_node();
        let raw = foreign_payloads(&node.key, 2);
        let hashes: Vec<MessageHash> = raw
            .iter()
            .map(|r| BincodePayloadEncoder.decode(r).unwrap().message_hash())
            .collect();
        let router = create_router(node.state.clone());

        let (status, body) = post_json(
            &router,
            "/pushBatch",
            serde_json::json!({ "encodedPayloads": raw.iter().map(hex::encode).collect::<Vec<_>>() }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(node.state.metrics.push_payloads_staged_total.get(), 2);
        assert_eq!(node.state.metrics.staging_rows.get(), 2);

        let (status, body) = post_empty(&router, "/staging/perform").await;
        assert_eq!(status, StatusCode::OK);
        let resp: OutcomeResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.outcome, ResyncOutcome::Success);

        let (status, body) = post_empty(&router, "/sync/perform").await;
        assert_eq!(status, StatusCode::OK);
        let report: SyncReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.outcome, ResyncOutcome::Success);
        assert_eq!(report.attempted, 2);
        for hash in &hashes {
            assert!(node.state.transactions.find_by_hash(hash).unwrap().is_some());
        }

        let req = Request::builder()
            .method("DELETE")
            .uri("/staging")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, req).await;
        assert_eq!(status, StatusCode::OK);
        let resp: CleanupResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.removed, 2);
        assert_eq!(node.state.metrics.staging_rows.get(), 0);
    }

    #[tokio::test]
    async fn sync_of_empty_area_is_failure() {
        let node = test_node();
        let router = create_router(node.state.clone());

        let (status, body) = post_empty(&router, "/sync/perform").await;
        assert_eq!(status, StatusCode::OK);
        let report: SyncReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.outcome, ResyncOutcome::Failure);
        assert_eq!(report.attempted, 0);
    }
}
