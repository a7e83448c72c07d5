//! Engine API surface.
//!
//! Two routes only. `PATCH /v2/components/{id}` is the endpoint the on-node
//! reporter calls with the referral token of the boot it performed; the
//! engine resolves the token to the staged artifacts and records them as
//! the component's actual state. `GET /healthz` exposes per-operator
//! liveness for probes.
//!
//! Error responses carry a machine-readable code. An unknown referral token
//! is a domain error (`UNKNOWN_TOKEN`, 400) — the node is reporting a boot
//! the engine never staged — and is deliberately distinct from a store
//! outage (`STORE_ERROR`, 502).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::clients::bos::BosClient;
use crate::clients::ClientError;
use crate::clock;
use crate::operators::Liveness;
use crate::tokens::{TokenError, TokenTable};
use crate::types::{ActualState, BootArtifacts, ComponentUpdate};
use crate::xname;

// ============================================================================
// Response envelope
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: ErrorDetail,
}

impl ApiError {
    fn build(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
        let body = ApiError {
            error: ErrorDetail {
                code,
                message: message.into(),
            },
        };
        (status, Json(body)).into_response()
    }

    fn bad_request(message: impl Into<String>) -> Response {
        Self::build(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    fn unknown_token(token: &str) -> Response {
        Self::build(
            StatusCode::BAD_REQUEST,
            "UNKNOWN_TOKEN",
            format!("no staged boot is known for referral token {token:?}"),
        )
    }

    fn not_found(message: impl Into<String>) -> Response {
        Self::build(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    fn store_error(message: impl Into<String>) -> Response {
        Self::build(StatusCode::BAD_GATEWAY, "STORE_ERROR", message)
    }

    fn internal(message: impl Into<String>) -> Response {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

// ============================================================================
// State and router
// ============================================================================

#[derive(Clone)]
pub struct ApiState {
    pub tokens: Arc<TokenTable>,
    pub store: Arc<BosClient>,
    pub liveness: Arc<Liveness>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v2/components/:id", patch(report_component_state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Seconds since each operator's last completed tick.
    operators: std::collections::BTreeMap<String, i64>,
}

/// GET /healthz
async fn healthz(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        operators: state.liveness.ages(),
    })
}

/// What the on-node reporter submits: the actual state containing the
/// referral token of the boot it performed.
#[derive(Debug, Deserialize)]
struct StateReport {
    actual_state: ReportedActualState,
}

#[derive(Debug, Deserialize)]
struct ReportedActualState {
    #[serde(default)]
    boot_artifacts: ReportedBootArtifacts,
}

#[derive(Debug, Default, Deserialize)]
struct ReportedBootArtifacts {
    #[serde(default)]
    bss_token: String,
}

/// PATCH /v2/components/{id}
async fn report_component_state(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(report): Json<StateReport>,
) -> Response {
    let id = xname::canonize(&id);
    let token = report.actual_state.boot_artifacts.bss_token;
    if token.is_empty() {
        return ApiError::bad_request("actual_state.boot_artifacts.bss_token is required");
    }

    // The token is the identity of the boot; the staged artifacts come from
    // the table, not from the reporter.
    let record = match state.tokens.get(&token) {
        Ok(record) => record,
        Err(TokenError::Unknown(token)) => {
            warn!(component = %id, token = %token, "Report with unknown referral token");
            return ApiError::unknown_token(&token);
        }
        Err(err) => return ApiError::internal(err.to_string()),
    };

    let actual_state = ActualState {
        boot_artifacts: BootArtifacts {
            kernel: record.kernel,
            initrd: record.initrd,
            kernel_parameters: record.kernel_parameters,
            bss_token: token,
        },
        last_updated: clock::now_string(),
    };
    let update = ComponentUpdate {
        id: id.clone(),
        actual_state: Some(actual_state.clone()),
        ..ComponentUpdate::default()
    };

    match state.store.components().update_component(&update).await {
        Ok(()) => {
            info!(component = %id, "Actual state reported");
            (StatusCode::OK, Json(serde_json::json!({"actual_state": actual_state})))
                .into_response()
        }
        Err(ClientError::Status { status, .. }) if status == StatusCode::NOT_FOUND => {
            ApiError::not_found(format!("component {id} does not exist"))
        }
        Err(err) => ApiError::store_error(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::util::ServiceExt;

    fn test_state() -> (tempfile::TempDir, ApiState) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("tokens")).unwrap();
        let tokens = Arc::new(TokenTable::open(&db).unwrap());
        let store = Arc::new(BosClient::new("http://bos.invalid").unwrap());
        let liveness = Arc::new(Liveness::new());
        liveness.beat("power_on");
        (
            dir,
            ApiState {
                tokens,
                store,
                liveness,
            },
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_operator_ages() {
        let (_dir, state) = test_state();
        let app = router(state);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/healthz")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["status"], "ok");
        assert!(value["operators"]["power_on"].is_i64());
    }

    #[tokio::test]
    async fn unknown_token_is_a_domain_error() {
        let (_dir, state) = test_state();
        let app = router(state);
        let body = serde_json::json!({
            "actual_state": {"boot_artifacts": {"bss_token": "Z"}}
        });
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("PATCH")
                    .uri("/v2/components/x1c0s0b0n0")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = body_json(response).await;
        assert_eq!(value["error"]["code"], "UNKNOWN_TOKEN");
    }

    #[tokio::test]
    async fn report_without_token_is_rejected() {
        let (_dir, state) = test_state();
        let app = router(state);
        let body = serde_json::json!({"actual_state": {"boot_artifacts": {}}});
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("PATCH")
                    .uri("/v2/components/x1c0s0b0n0")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = body_json(response).await;
        assert_eq!(value["error"]["code"], "BAD_REQUEST");
    }
}
