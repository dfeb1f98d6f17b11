//! HTTP API endpoints
//!
//! The thin control surface over the pairing core: PIN registration and
//! inspection as plain JSON, plus the two WebSocket upgrade endpoints. All
//! admission checks run before an upgrade is offered; an upgraded transport
//! cannot be downgraded back into an error response.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::metrics::RelayMetrics;
use crate::pairing::{AdmissionError, PairingCoordinator};
use crate::registry::{ConnectionRegistry, Leg};
use crate::relay;
use crate::store::{unix_now, SessionStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub coordinator: Arc<PairingCoordinator>,
    pub metrics: Arc<RelayMetrics>,
}

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/register-pin", post(register_pin))
        .route("/check-pin/:pin", get(check_pin))
        .route("/get-base-dir/:pin", get(get_base_dir))
        .route("/connect-pc", get(missing_pin))
        .route("/connect-pc/:pin", get(connect_pc))
        .route("/connect-user", get(missing_pin))
        .route("/connect-user/:pin", get(connect_user))
        .route("/health", get(health))
        .route("/metrics", get(export_metrics))
        .with_state(state)
}

async fn root() -> &'static str {
    "Relay server is up and running"
}

#[derive(Debug, Deserialize)]
pub struct RegisterPinRequest {
    #[serde(default)]
    pub pin: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterPinResponse {
    pub message: String,
    pub expires_at: i64,
}

/// POST /register-pin - register a new pairing code
pub async fn register_pin(
    State(state): State<AppState>,
    Json(body): Json<RegisterPinRequest>,
) -> Response {
    if body.pin.is_empty() {
        return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
    }

    match state.coordinator.register_pin(&body.pin).await {
        Ok(session) => (
            StatusCode::CREATED,
            Json(RegisterPinResponse {
                message: "PIN registered successfully".to_string(),
                expires_at: session.expires_at,
            }),
        )
            .into_response(),
        Err(StoreError::AlreadyExists) => {
            warn!(pin = %body.pin, "attempt to register existing PIN");
            (StatusCode::CONFLICT, "PIN already registered").into_response()
        }
        Err(err) => {
            error!(pin = %body.pin, error = %err, "failed to create session");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session").into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckPinResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pc_connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckPinResponse {
    fn invalid(reason: &str) -> Self {
        Self {
            valid: false,
            expires_at: None,
            pc_connected: None,
            error: Some(reason.to_string()),
        }
    }
}

/// GET /check-pin/{pin} - always 200; a missing or expired PIN is reported
/// in the body, never as a transport error
pub async fn check_pin(
    State(state): State<AppState>,
    Path(pin): Path<String>,
) -> Json<CheckPinResponse> {
    let session = match state.store.get(&pin).await {
        Ok(session) => session,
        Err(StoreError::NotFound) => return Json(CheckPinResponse::invalid("PIN not found")),
        Err(err) => {
            error!(pin = %pin, error = %err, "session lookup failed");
            return Json(CheckPinResponse::invalid("storage error"));
        }
    };

    if session.is_expired(unix_now()) {
        return Json(CheckPinResponse::invalid("PIN expired"));
    }

    Json(CheckPinResponse {
        valid: true,
        expires_at: Some(session.expires_at),
        // Live registry state, not the stored flag.
        pc_connected: Some(state.registry.has(&pin, Leg::Pc)),
        error: None,
    })
}

#[derive(Debug, Serialize)]
pub struct BaseDirResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /get-base-dir/{pin}
pub async fn get_base_dir(
    State(state): State<AppState>,
    Path(pin): Path<String>,
) -> Json<BaseDirResponse> {
    let session = match state.store.get(&pin).await {
        Ok(session) => session,
        Err(StoreError::NotFound) => {
            return Json(BaseDirResponse {
                base_directory: None,
                error: Some("PIN not found".to_string()),
            })
        }
        Err(err) => {
            error!(pin = %pin, error = %err, "session lookup failed");
            return Json(BaseDirResponse {
                base_directory: None,
                error: Some("storage error".to_string()),
            });
        }
    };

    match session.base_directory {
        Some(path) => Json(BaseDirResponse {
            base_directory: Some(path),
            error: None,
        }),
        None => Json(BaseDirResponse {
            base_directory: None,
            error: Some("Base directory not set".to_string()),
        }),
    }
}

/// GET /connect-pc or /connect-user with no PIN path segment
async fn missing_pin() -> Response {
    (StatusCode::BAD_REQUEST, "Missing PIN").into_response()
}

/// GET /connect-pc/{pin} - upgrade the PC leg
pub async fn connect_pc(
    State(state): State<AppState>,
    Path(pin): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(err) = state.coordinator.check_pc_admission(&pin).await {
        warn!(pin = %pin, error = %err, "refusing PC leg");
        return pc_refusal(err);
    }

    ws.on_upgrade(move |socket| relay::run_pc_leg(state, pin, socket))
}

/// GET /connect-user/{pin} - upgrade the user leg only after all admission
/// checks pass
pub async fn connect_user(
    State(state): State<AppState>,
    Path(pin): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(err) = state.coordinator.check_user_admission(&pin).await {
        warn!(pin = %pin, error = %err, "refusing user leg");
        return user_refusal(err);
    }

    ws.on_upgrade(move |socket| relay::run_user_leg(state, pin, socket))
}

/// PC legs: an unknown PIN is a 404, an expired one a 403.
fn pc_refusal(err: AdmissionError) -> Response {
    let status = match err {
        AdmissionError::NotFound => StatusCode::NOT_FOUND,
        AdmissionError::Store(ref inner) => {
            error!(error = %inner, "admission check hit storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::FORBIDDEN,
    };
    (status, err.to_string()).into_response()
}

/// User legs: only a missing PC leg is a 404; every other refusal is a 403
/// so probing cannot distinguish an unregistered PIN from an unready one.
fn user_refusal(err: AdmissionError) -> Response {
    let status = match err {
        AdmissionError::PcNotConnected => StatusCode::NOT_FOUND,
        AdmissionError::Store(ref inner) => {
            error!(error = %inner, "admission check hit storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::FORBIDDEN,
    };
    (status, err.to_string()).into_response()
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    use serde_json::json;

    let response = json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_pairings": state.registry.paired_count(),
    });

    (StatusCode::OK, Json(response)).into_response()
}

/// GET /metrics
pub async fn export_metrics(State(state): State<AppState>) -> Response {
    let prometheus = state.metrics.export_prometheus();
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        prometheus,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LegHandle;
    use crate::store::MemoryStore;

    fn test_state() -> AppState {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        let coordinator = Arc::new(PairingCoordinator::new(
            store.clone(),
            registry.clone(),
            metrics.clone(),
        ));
        AppState {
            store,
            registry,
            coordinator,
            metrics,
        }
    }

    #[tokio::test]
    async fn test_register_pin_empty_body() {
        let state = test_state();
        let response = register_pin(
            State(state),
            Json(RegisterPinRequest { pin: String::new() }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_register_pin_created_then_conflict() {
        let state = test_state();

        let response = register_pin(
            State(state.clone()),
            Json(RegisterPinRequest {
                pin: "1234".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = register_pin(
            State(state),
            Json(RegisterPinRequest {
                pin: "1234".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_check_pin_unknown() {
        let state = test_state();
        let Json(response) = check_pin(State(state), Path("0000".to_string())).await;
        assert!(!response.valid);
        assert_eq!(response.error.as_deref(), Some("PIN not found"));
        assert!(response.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_check_pin_reports_live_pc_state() {
        let state = test_state();
        state.coordinator.register_pin("1234").await.unwrap();

        let Json(response) = check_pin(State(state.clone()), Path("1234".to_string())).await;
        assert!(response.valid);
        assert_eq!(response.pc_connected, Some(false));

        let (pc, _rx) = LegHandle::new();
        state.coordinator.attach_pc("1234", pc).await;

        let Json(response) = check_pin(State(state), Path("1234".to_string())).await;
        assert!(response.valid);
        assert_eq!(response.pc_connected, Some(true));
        assert!(response.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_get_base_dir_states() {
        let state = test_state();

        let Json(response) = get_base_dir(State(state.clone()), Path("0000".to_string())).await;
        assert_eq!(response.error.as_deref(), Some("PIN not found"));

        state.coordinator.register_pin("1234").await.unwrap();
        let Json(response) = get_base_dir(State(state.clone()), Path("1234".to_string())).await;
        assert_eq!(response.error.as_deref(), Some("Base directory not set"));

        state
            .store
            .set_base_directory("1234", "/home/x")
            .await
            .unwrap();
        let Json(response) = get_base_dir(State(state), Path("1234".to_string())).await;
        assert_eq!(response.base_directory.as_deref(), Some("/home/x"));
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_refusal_status_mapping() {
        assert_eq!(
            pc_refusal(AdmissionError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            pc_refusal(AdmissionError::Expired).status(),
            StatusCode::FORBIDDEN
        );

        assert_eq!(
            user_refusal(AdmissionError::PcNotConnected).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            user_refusal(AdmissionError::NotFound).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            user_refusal(AdmissionError::Expired).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            user_refusal(AdmissionError::BaseDirNotSet).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            user_refusal(AdmissionError::UserAlreadyConnected).status(),
            StatusCode::FORBIDDEN
        );
    }
}
