//! Axum server exposing the ledger over JSON.
//!
//! All request and response bodies use camelCase fields; domain errors come
//! back as `{"error": {"code", "message"}}` with the stable codes from
//! `LedgerError::code`.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use shonali_core::{
    Address, Batch, CropType, CustodyEvent, DisputeOutcome, EscrowRecord, LedgerError,
    SequencedEvent,
};
use shonali_engine::{HoardingFlag, HoardingThresholds};
use shonali_ledger::{ledger::RebuildSummary, unix_now, Ledger, RegisterBatch, Storage};

#[derive(Clone)]
struct AppState {
    ledger: Ledger,
}

/// Runtime configuration for the ledger API server.
#[derive(Debug, Clone)]
pub struct ApiRuntimeConfig {
    database_url: String,
    port: u16,
    max_connections: u32,
    thresholds: HoardingThresholds,
}

impl ApiRuntimeConfig {
    /// Build runtime configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://shonali.db".to_string());
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let max_connections = parse_env_u64("SHONALI_DB_MAX_CONNECTIONS")?
            .map(|v| v as u32)
            .unwrap_or(5);

        let defaults = HoardingThresholds::default();
        let thresholds = HoardingThresholds {
            farmer_secs: parse_env_u64("SHONALI_FARMER_DWELL_SECS")?.unwrap_or(defaults.farmer_secs),
            transporter_secs: parse_env_u64("SHONALI_TRANSPORTER_DWELL_SECS")?
                .unwrap_or(defaults.transporter_secs),
            wholesaler_secs: parse_env_u64("SHONALI_WHOLESALER_DWELL_SECS")?
                .unwrap_or(defaults.wholesaler_secs),
            retailer_secs: parse_env_u64("SHONALI_RETAILER_DWELL_SECS")?
                .unwrap_or(defaults.retailer_secs),
        };

        Ok(Self {
            database_url,
            port,
            max_connections,
            thresholds,
        })
    }

    /// Deterministic test configuration over a private database.
    pub fn for_test(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            port: 0,
            max_connections: 1,
            thresholds: HoardingThresholds::default(),
        }
    }
}

fn parse_env_u64(name: &str) -> anyhow::Result<Option<u64>> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    anyhow::ensure!(!raw.is_empty(), "{} is set but empty", name);
    let v: u64 = raw
        .parse()
        .with_context(|| format!("Invalid {} (expected u64)", name))?;
    Ok(Some(v))
}

async fn build_state(config: &ApiRuntimeConfig) -> anyhow::Result<AppState> {
    let storage = Storage::new(&config.database_url, config.max_connections).await?;
    storage.run_migrations().await?;
    Ok(AppState {
        ledger: Ledger::new(storage, config.thresholds),
    })
}

fn router_for_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/batches", get(list_batches).post(register_batch))
        .route("/v1/batches/:batch_id", get(get_batch))
        .route("/v1/batches/:batch_id/transfers", post(transfer_custody))
        .route(
            "/v1/batches/:batch_id/certifications",
            post(add_certification),
        )
        .route("/v1/batches/:batch_id/trace", get(get_trace))
        .route("/v1/escrows", post(fund_escrow))
        .route("/v1/escrows/expire-due", post(expire_due))
        .route("/v1/escrows/:batch_id", get(get_escrow))
        .route("/v1/escrows/:batch_id/dispute", post(raise_dispute))
        .route("/v1/escrows/:batch_id/resolution", post(resolve_dispute))
        .route("/v1/escrows/:batch_id/expire", post(expire_escrow))
        .route("/v1/events", get(get_events))
        .route("/v1/hoarding", get(get_hoarding))
        .route("/v1/rebuild", post(rebuild_projection))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build an in-process API router from explicit runtime config.
pub async fn build_app(config: &ApiRuntimeConfig) -> anyhow::Result<Router> {
    let state = build_state(config).await?;
    Ok(router_for_state(state))
}

/// Run the API server with explicit runtime configuration.
pub async fn run_with_config(config: ApiRuntimeConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let storage_for_shutdown = state.ledger.storage().clone();
    let app = router_for_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "ShonaliChain API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    storage_for_shutdown.close().await;
    info!("ShonaliChain API server shutdown complete");
    Ok(())
}

/// Run the API server using environment-driven configuration.
pub async fn run_from_env() -> anyhow::Result<()> {
    run_with_config(ApiRuntimeConfig::from_env()?).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

const ERROR_CODE_INTERNAL_ERROR: &str = "internal_error";

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Serialize)]
struct ErrorInfo {
    code: &'static str,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorInfo {
                code,
                message: message.into(),
            },
        }),
    )
}

/// Map a service error onto a status code and wire shape. Infrastructure
/// failures are logged here and surface as opaque 500s.
fn map_error(err: anyhow::Error) -> ApiError {
    let Some(domain) = err.downcast_ref::<LedgerError>() else {
        error!(error = %err, "internal error");
        return api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERROR_CODE_INTERNAL_ERROR,
            format!("Internal error: {err}"),
        );
    };

    let status = match domain {
        LedgerError::BatchNotFound(_) | LedgerError::NoActiveEscrow(_) => StatusCode::NOT_FOUND,
        LedgerError::UnauthorizedTransfer { .. } => StatusCode::FORBIDDEN,
        LedgerError::BatchFinalized { .. }
        | LedgerError::RoleSequenceViolation { .. }
        | LedgerError::NonMonotonicTimestamp { .. }
        | LedgerError::ConcurrentModification { .. }
        | LedgerError::EscrowAlreadyExists(_) => StatusCode::CONFLICT,
        LedgerError::InvalidQuantity(_)
        | LedgerError::InvalidQualityScore(_)
        | LedgerError::InvalidAmount(_)
        | LedgerError::RejectedEvent(_) => StatusCode::BAD_REQUEST,
    };
    api_error(status, domain.code(), domain.to_string())
}

async fn health(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.ledger.storage().health_check().await.map_err(|e| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            ERROR_CODE_INTERNAL_ERROR,
            e.to_string(),
        )
    })?;
    Ok("OK")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBatchRequest {
    producer: Address,
    crop_type: CropType,
    quantity_kg: i64,
    unit_price: u64,
    origin_location: String,
    origin_district: String,
    #[serde(default)]
    certifications: BTreeSet<String>,
    quality_score: i64,
    timestamp: Option<u64>,
}

async fn register_batch(
    State(state): State<AppState>,
    Json(req): Json<RegisterBatchRequest>,
) -> Result<(StatusCode, Json<Batch>), ApiError> {
    let batch = state
        .ledger
        .register_batch(RegisterBatch {
            producer: req.producer,
            crop_type: req.crop_type,
            quantity_kg: req.quantity_kg,
            unit_price: req.unit_price,
            origin_location: req.origin_location,
            origin_district: req.origin_district,
            certifications: req.certifications,
            quality_score: req.quality_score,
            timestamp: req.timestamp.unwrap_or_else(unix_now),
        })
        .await
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(batch)))
}

async fn list_batches(State(state): State<AppState>) -> Result<Json<Vec<Batch>>, ApiError> {
    let batches = state.ledger.list_batches().await.map_err(map_error)?;
    Ok(Json(batches))
}

async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<u64>,
) -> Result<Json<Batch>, ApiError> {
    let batch = state.ledger.get_batch(batch_id).await.map_err(map_error)?;
    Ok(Json(batch))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest {
    caller: Address,
    from_handler: Address,
    to_handler: Address,
    location: String,
    timestamp: u64,
}

async fn transfer_custody(
    State(state): State<AppState>,
    Path(batch_id): Path<u64>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<Batch>, ApiError> {
    let batch = state
        .ledger
        .transfer_custody(
            batch_id,
            req.caller,
            req.from_handler,
            req.to_handler,
            req.location,
            req.timestamp,
        )
        .await
        .map_err(map_error)?;
    Ok(Json(batch))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificationRequest {
    caller: Address,
    certification: String,
    timestamp: Option<u64>,
}

async fn add_certification(
    State(state): State<AppState>,
    Path(batch_id): Path<u64>,
    Json(req): Json<CertificationRequest>,
) -> Result<Json<Batch>, ApiError> {
    let batch = state
        .ledger
        .add_certification(
            batch_id,
            req.caller,
            req.certification,
            req.timestamp.unwrap_or_else(unix_now),
        )
        .await
        .map_err(map_error)?;
    Ok(Json(batch))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceResponse {
    batch_id: u64,
    events: Vec<CustodyEvent>,
}

async fn get_trace(
    State(state): State<AppState>,
    Path(batch_id): Path<u64>,
) -> Result<Json<TraceResponse>, ApiError> {
    let events = state.ledger.trace_batch(batch_id).await.map_err(map_error)?;
    Ok(Json(TraceResponse { batch_id, events }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundEscrowRequest {
    batch_id: u64,
    buyer: Address,
    seller: Address,
    amount: i64,
    deadline: u64,
    timestamp: Option<u64>,
}

async fn fund_escrow(
    State(state): State<AppState>,
    Json(req): Json<FundEscrowRequest>,
) -> Result<(StatusCode, Json<EscrowRecord>), ApiError> {
    let escrow = state
        .ledger
        .fund_escrow(
            req.batch_id,
            req.buyer,
            req.seller,
            req.amount,
            req.deadline,
            req.timestamp.unwrap_or_else(unix_now),
        )
        .await
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(escrow)))
}

async fn get_escrow(
    State(state): State<AppState>,
    Path(batch_id): Path<u64>,
) -> Result<Json<EscrowRecord>, ApiError> {
    let escrow = state.ledger.get_escrow(batch_id).await.map_err(map_error)?;
    Ok(Json(escrow))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisputeRequest {
    reason: String,
    timestamp: Option<u64>,
}

async fn raise_dispute(
    State(state): State<AppState>,
    Path(batch_id): Path<u64>,
    Json(req): Json<DisputeRequest>,
) -> Result<Json<EscrowRecord>, ApiError> {
    let escrow = state
        .ledger
        .raise_dispute(batch_id, req.reason, req.timestamp.unwrap_or_else(unix_now))
        .await
        .map_err(map_error)?;
    Ok(Json(escrow))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolutionRequest {
    outcome: DisputeOutcome,
    timestamp: Option<u64>,
}

async fn resolve_dispute(
    State(state): State<AppState>,
    Path(batch_id): Path<u64>,
    Json(req): Json<ResolutionRequest>,
) -> Result<Json<EscrowRecord>, ApiError> {
    let escrow = state
        .ledger
        .resolve_dispute(
            batch_id,
            req.outcome,
            req.timestamp.unwrap_or_else(unix_now),
        )
        .await
        .map_err(map_error)?;
    Ok(Json(escrow))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ExpireRequest {
    now: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExpireResponse {
    refunded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    escrow: Option<EscrowRecord>,
}

async fn expire_escrow(
    State(state): State<AppState>,
    Path(batch_id): Path<u64>,
    Json(req): Json<ExpireRequest>,
) -> Result<Json<ExpireResponse>, ApiError> {
    let escrow = state
        .ledger
        .expire_escrow(batch_id, req.now.unwrap_or_else(unix_now))
        .await
        .map_err(map_error)?;
    Ok(Json(ExpireResponse {
        refunded: escrow.is_some(),
        escrow,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExpireSweepResponse {
    refunded: u64,
}

async fn expire_due(
    State(state): State<AppState>,
    Json(req): Json<ExpireRequest>,
) -> Result<Json<ExpireSweepResponse>, ApiError> {
    let refunded = state
        .ledger
        .expire_due_escrows(req.now.unwrap_or_else(unix_now))
        .await
        .map_err(map_error)?;
    Ok(Json(ExpireSweepResponse { refunded }))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct EventsQuery {
    from: u64,
}

async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<SequencedEvent>>, ApiError> {
    let events = state
        .ledger
        .events_from(query.from)
        .await
        .map_err(map_error)?;
    Ok(Json(events))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct HoardingQuery {
    now: Option<u64>,
}

async fn get_hoarding(
    State(state): State<AppState>,
    Query(query): Query<HoardingQuery>,
) -> Result<Json<Vec<HoardingFlag>>, ApiError> {
    let flags = state
        .ledger
        .hoarding_flags(query.now.unwrap_or_else(unix_now))
        .await
        .map_err(map_error)?;
    Ok(Json(flags))
}

async fn rebuild_projection(
    State(state): State<AppState>,
) -> Result<Json<RebuildSummary>, ApiError> {
    let summary = state.ledger.rebuild_projection().await.map_err(map_error)?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const T0: u64 = 1_700_000_000;

    fn addr_hex(byte: u8) -> String {
        format!("0x{}", format!("{byte:02x}").repeat(20))
    }

    async fn test_app() -> Router {
        build_app(&ApiRuntimeConfig::for_test("sqlite::memory:"))
            .await
            .expect("test app")
    }

    async fn request(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        request(app, "POST", uri, Some(body)).await
    }

    async fn get_uri(app: &Router, uri: &str) -> (StatusCode, Value) {
        request(app, "GET", uri, None).await
    }

    fn register_body(ts: u64) -> Value {
        json!({
            "producer": addr_hex(0x11),
            "cropType": "jute",
            "quantityKg": 5000,
            "unitPrice": 45,
            "originLocation": "Bogura Sadar",
            "originDistrict": "bogura",
            "certifications": ["organic"],
            "qualityScore": 95,
            "timestamp": ts,
        })
    }

    fn transfer_body(from: u8, to: u8, location: &str, ts: u64) -> Value {
        json!({
            "caller": addr_hex(from),
            "fromHandler": addr_hex(from),
            "toHandler": addr_hex(to),
            "location": location,
            "timestamp": ts,
        })
    }

    async fn register(app: &Router) -> u64 {
        let (status, body) = post(app, "/v1/batches", register_body(T0)).await;
        assert_eq!(status, StatusCode::CREATED);
        body["batchId"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_and_fetch_batch() {
        let app = test_app().await;
        let (status, body) = post(&app, "/v1/batches", register_body(T0)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["batchId"], 1);
        assert_eq!(body["status"], "created");
        assert_eq!(body["currentRole"], "farmer");
        assert_eq!(body["qualityScore"], 95);
        assert_eq!(body["version"], 1);
        assert_eq!(
            body["producer"].as_str().unwrap().to_lowercase(),
            addr_hex(0x11)
        );

        let (status, fetched) = get_uri(&app, "/v1/batches/1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, body);

        let (status, err) = get_uri(&app, "/v1/batches/9").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"]["code"], "batch_not_found");
    }

    #[tokio::test]
    async fn validation_errors_are_bad_requests() {
        let app = test_app().await;
        let mut body = register_body(T0);
        body["quantityKg"] = json!(0);
        let (status, err) = post(&app, "/v1/batches", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["code"], "invalid_quantity");
    }

    #[tokio::test]
    async fn custody_chain_and_trace() {
        let app = test_app().await;
        let id = register(&app).await;

        let (status, body) = post(
            &app,
            &format!("/v1/batches/{id}/transfers"),
            transfer_body(0x11, 0x22, "Sherpur", T0 + 100),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "in_transit");
        assert_eq!(body["currentRole"], "transporter");

        post(
            &app,
            &format!("/v1/batches/{id}/transfers"),
            transfer_body(0x22, 0x33, "Dhaka Karwan Bazar", T0 + 200),
        )
        .await;
        let (status, body) = post(
            &app,
            &format!("/v1/batches/{id}/transfers"),
            transfer_body(0x33, 0x44, "Mirpur", T0 + 300),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "delivered");
        assert_eq!(body["currentRole"], "retailer");

        let (status, trace) = get_uri(&app, &format!("/v1/batches/{id}/trace")).await;
        assert_eq!(status, StatusCode::OK);
        let events = trace["events"].as_array().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["fromRole"], "farmer");
        assert_eq!(events[0]["toRole"], "farmer");
        assert_eq!(events[0]["location"], "Bogura Sadar");
        assert_eq!(events[3]["toRole"], "retailer");
        assert_eq!(events[3]["timestamp"], T0 + 300);
    }

    #[tokio::test]
    async fn custody_violations_map_to_status_codes() {
        let app = test_app().await;
        let id = register(&app).await;

        // Stranger relinquishing: forbidden.
        let (status, err) = post(
            &app,
            &format!("/v1/batches/{id}/transfers"),
            transfer_body(0x99, 0x22, "Sherpur", T0 + 100),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err["error"]["code"], "unauthorized_transfer");

        // Backdated handover: conflict.
        let (status, err) = post(
            &app,
            &format!("/v1/batches/{id}/transfers"),
            transfer_body(0x11, 0x22, "Sherpur", T0),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], "non_monotonic_timestamp");

        // Transfer out of the retailer: conflict.
        for (from, to, ts) in [(0x11, 0x22, 100), (0x22, 0x33, 200), (0x33, 0x44, 300)] {
            post(
                &app,
                &format!("/v1/batches/{id}/transfers"),
                transfer_body(from, to, "x", T0 + ts),
            )
            .await;
        }
        let (status, err) = post(
            &app,
            &format!("/v1/batches/{id}/transfers"),
            transfer_body(0x44, 0x55, "x", T0 + 400),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], "role_sequence_violation");
    }

    #[tokio::test]
    async fn escrow_releases_on_delivery() {
        let app = test_app().await;
        let id = register(&app).await;

        let (status, escrow) = post(
            &app,
            "/v1/escrows",
            json!({
                "batchId": id,
                "buyer": addr_hex(0x55),
                "seller": addr_hex(0x11),
                "amount": 225_000,
                "deadline": T0 + 7 * 86_400,
                "timestamp": T0,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(escrow["escrowId"], 1);
        assert_eq!(escrow["state"], "funded");

        // Double funding is a conflict.
        let (status, err) = post(
            &app,
            "/v1/escrows",
            json!({
                "batchId": id,
                "buyer": addr_hex(0x66),
                "seller": addr_hex(0x11),
                "amount": 1000,
                "deadline": T0 + 86_400,
                "timestamp": T0,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], "escrow_already_exists");

        for (from, to, ts) in [(0x11, 0x22, 100), (0x22, 0x33, 200), (0x33, 0x44, 300)] {
            post(
                &app,
                &format!("/v1/batches/{id}/transfers"),
                transfer_body(from, to, "x", T0 + ts),
            )
            .await;
        }

        let (_, batch) = get_uri(&app, &format!("/v1/batches/{id}")).await;
        assert_eq!(batch["status"], "settled");
        let (_, escrow) = get_uri(&app, &format!("/v1/escrows/{id}")).await;
        assert_eq!(escrow["state"], "released");
    }

    #[tokio::test]
    async fn dispute_and_resolution_over_http() {
        let app = test_app().await;
        let id = register(&app).await;
        post(
            &app,
            "/v1/escrows",
            json!({
                "batchId": id,
                "buyer": addr_hex(0x55),
                "seller": addr_hex(0x11),
                "amount": 225_000,
                "deadline": T0 + 86_400,
                "timestamp": T0,
            }),
        )
        .await;

        let (status, escrow) = post(
            &app,
            &format!("/v1/escrows/{id}/dispute"),
            json!({"reason": "bags arrived short", "timestamp": T0 + 100}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(escrow["state"], "disputed");
        let (_, batch) = get_uri(&app, &format!("/v1/batches/{id}")).await;
        assert_eq!(batch["status"], "disputed");

        let (status, escrow) = post(
            &app,
            &format!("/v1/escrows/{id}/resolution"),
            json!({"outcome": "refund", "timestamp": T0 + 200}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(escrow["state"], "refunded");
        let (_, batch) = get_uri(&app, &format!("/v1/batches/{id}")).await;
        assert_eq!(batch["status"], "created");

        // No live escrow left to dispute.
        let (status, err) = post(
            &app,
            &format!("/v1/escrows/{id}/dispute"),
            json!({"reason": "again", "timestamp": T0 + 300}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"]["code"], "no_active_escrow");
    }

    #[tokio::test]
    async fn expiry_endpoints_refund_due_escrows() {
        let app = test_app().await;
        let id = register(&app).await;
        post(
            &app,
            "/v1/escrows",
            json!({
                "batchId": id,
                "buyer": addr_hex(0x55),
                "seller": addr_hex(0x11),
                "amount": 225_000,
                "deadline": T0 + 100,
                "timestamp": T0,
            }),
        )
        .await;

        // Not due yet.
        let (status, body) = post(
            &app,
            &format!("/v1/escrows/{id}/expire"),
            json!({"now": T0 + 100}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["refunded"], false);

        let (status, body) = post(
            &app,
            &format!("/v1/escrows/{id}/expire"),
            json!({"now": T0 + 101}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["refunded"], true);
        assert_eq!(body["escrow"]["state"], "refunded");

        // Sweep finds nothing else.
        let (status, body) = post(&app, "/v1/escrows/expire-due", json!({"now": T0 + 500})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["refunded"], 0);
    }

    #[tokio::test]
    async fn hoarding_and_events_endpoints() {
        let app = test_app().await;
        let id = register(&app).await;

        let (status, flags) = get_uri(&app, &format!("/v1/hoarding?now={}", T0 + 60)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(flags.as_array().unwrap().is_empty());

        let late = T0 + shonali_core::DEFAULT_FARMER_DWELL_SECS + 1;
        let (_, flags) = get_uri(&app, &format!("/v1/hoarding?now={late}")).await;
        let flags = flags.as_array().unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0]["batchId"], id);
        assert_eq!(flags[0]["currentRole"], "farmer");

        let (status, events) = get_uri(&app, "/v1/events?from=1").await;
        assert_eq!(status, StatusCode::OK);
        let events = events.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["seq"], 1);
        assert_eq!(events[0]["event"]["type"], "batch_registered");
    }

    #[tokio::test]
    async fn rebuild_reports_counts() {
        let app = test_app().await;
        let id = register(&app).await;
        post(
            &app,
            &format!("/v1/batches/{id}/transfers"),
            transfer_body(0x11, 0x22, "Sherpur", T0 + 100),
        )
        .await;

        let (status, summary) = request(&app, "POST", "/v1/rebuild", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["eventsApplied"], 2);
        assert_eq!(summary["batches"], 1);

        let (_, batch) = get_uri(&app, &format!("/v1/batches/{id}")).await;
        assert_eq!(batch["status"], "in_transit");
        assert_eq!(batch["version"], 2);
    }
}
