//! HTTP surface: withdrawals, status, metrics and health
//!
//! - `POST /withdraw/:preset` body `{amountETH, destination?, auxDestination?}`
//! - `GET /status`
//! - `GET /metrics` (Prometheus text format)
//! - `GET /health`

use crate::metrics::metrics;
use crate::orchestrator::{parse_destination, Orchestrator, WithdrawalRequest};
use crate::sniffer::supervisor::{StreamState, StreamSupervisor, SupervisorSnapshot};
use crate::submission::WithdrawalError;
use alloy::primitives::Address;
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Absent when streaming is disabled
    pub supervisor: Option<Arc<StreamSupervisor>>,
}

/// `amountETH` arrives as either a JSON number or a string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(f64),
}

impl AmountInput {
    fn into_decimal(self) -> String {
        match self {
            AmountInput::Text(text) => text,
            AmountInput::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WithdrawBody {
    #[serde(rename = "amountETH")]
    pub amount_eth: AmountInput,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default, rename = "auxDestination")]
    pub aux_destination: Option<String>,
}

/// Blank strings count as absent
fn optional_address(raw: Option<String>) -> Result<Option<Address>, WithdrawalError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_destination(s).map(Some),
    }
}

impl TryFrom<WithdrawBody> for WithdrawalRequest {
    type Error = WithdrawalError;

    fn try_from(body: WithdrawBody) -> Result<Self, Self::Error> {
        Ok(WithdrawalRequest {
            amount_eth: body.amount_eth.into_decimal(),
            destination: optional_address(body.destination)?,
            aux_destination: optional_address(body.aux_destination)?,
        })
    }
}

fn withdrawal_error_status(err: &WithdrawalError) -> StatusCode {
    match err {
        WithdrawalError::UnknownPreset(_) => StatusCode::NOT_FOUND,
        e if e.is_caller_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn withdraw(
    State(state): State<AppState>,
    Path(preset): Path<String>,
    Json(body): Json<WithdrawBody>,
) -> Response {
    let result = match WithdrawalRequest::try_from(body) {
        Ok(request) => state.orchestrator.submit_withdrawal(&preset, request).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(report) => {
            let status = if report.success {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(report)).into_response()
        }
        Err(e) => {
            let status = withdrawal_error_status(&e);
            if status.is_server_error() {
                error!(strategy = %preset, error = %e, "Withdrawal failed");
            }
            (
                status,
                Json(json!({ "success": false, "strategy": preset, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn status(State(state): State<AppState>) -> Response {
    match state.orchestrator.get_status().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!(error = %e, "Status query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn metrics_handler() -> Response {
    match metrics().export() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_state: Option<StreamState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<SupervisorSnapshot>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stream_state: state.supervisor.as_ref().map(|s| s.state()),
        stream: state.supervisor.as_ref().map(|s| s.stats()),
    })
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/withdraw/:preset", post(withdraw))
        .route("/status", get(status))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(bind: &str, port: u16, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", bind, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP endpoint listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
