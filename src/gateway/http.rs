use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::budget::{BudgetCheckRequest, BudgetConfig, BudgetSummary, CostCheckResult, CostPlan};
use super::costing::CostEstimate;
use super::monitor::PipelineHealth;
use super::observability::ObservabilitySnapshot;
use super::sanitizer::{SanitizationResult, SanitizeOptions};
use super::Gateway;
use crate::GatewayError;
use crate::types::{AiRequest, ExecutionResult, Operation};

#[derive(Clone)]
pub struct GatewayHttpState {
    gateway: Arc<Gateway>,
}

impl GatewayHttpState {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }

    pub fn from_shared(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

type HttpError = (StatusCode, Json<ErrorResponse>);

pub fn router(state: GatewayHttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/execute", post(execute))
        .route("/v1/sanitize", post(sanitize))
        .route("/v1/cost/estimate", post(estimate_cost))
        .route("/v1/budget/check", post(check_budget))
        .route("/v1/budget/:project_id", get(budget_summary))
        .route("/v1/pipeline/health", get(pipeline_health))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn metrics(State(state): State<GatewayHttpState>) -> Json<ObservabilitySnapshot> {
    Json(state.gateway.observability())
}

/// Always 200: the outcome travels in the envelope.
async fn execute(
    State(state): State<GatewayHttpState>,
    Json(request): Json<AiRequest>,
) -> Json<ExecutionResult> {
    Json(state.gateway.execute(request).await)
}

#[derive(Debug, Deserialize)]
struct SanitizeHttpRequest {
    input: String,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    strict_mode: Option<bool>,
}

async fn sanitize(
    State(state): State<GatewayHttpState>,
    Json(payload): Json<SanitizeHttpRequest>,
) -> Result<Json<SanitizationResult>, HttpError> {
    let options = match (payload.max_length, payload.strict_mode) {
        (None, None) => None,
        (max_length, strict_mode) => {
            let defaults = state.gateway.sanitizer_config().prompt_options().sanitize;
            let max_length = max_length.unwrap_or(defaults.max_length);
            if max_length == 0 {
                return Err(map_gateway_error(GatewayError::validation(
                    "max_length must be positive",
                )));
            }
            Some(SanitizeOptions {
                max_length,
                strict_mode: strict_mode.unwrap_or(defaults.strict_mode),
            })
        }
    };
    Ok(Json(state.gateway.sanitize(&payload.input, options)))
}

#[derive(Debug, Deserialize)]
struct EstimateHttpRequest {
    operation: String,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    model: Option<String>,
}

async fn estimate_cost(
    State(state): State<GatewayHttpState>,
    Json(payload): Json<EstimateHttpRequest>,
) -> Result<Json<CostEstimate>, HttpError> {
    let operation: Operation = payload.operation.parse().map_err(map_gateway_error)?;
    let estimate = match payload.model.as_deref() {
        Some(model) => state
            .gateway
            .resolve_model(operation, model)
            .map(|config| config.estimate_cost(payload.input_tokens, payload.output_tokens)),
        None => state
            .gateway
            .estimate_cost(operation, payload.input_tokens, payload.output_tokens),
    }
    .map_err(map_gateway_error)?;
    Ok(Json(estimate))
}

#[derive(Debug, Deserialize)]
struct BudgetCheckHttpRequest {
    project_id: String,
    #[serde(default)]
    estimated_cost_usd: Option<f64>,
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    accept_downgrade: bool,
    #[serde(default)]
    config: Option<BudgetConfig>,
}

/// Either a raw `estimated_cost_usd`, or an `operation` (plus optional
/// `model`) from which the estimate and downgrade plan are derived.
async fn check_budget(
    State(state): State<GatewayHttpState>,
    Json(payload): Json<BudgetCheckHttpRequest>,
) -> Result<Json<CostCheckResult>, HttpError> {
    if payload.project_id.trim().is_empty() {
        return Err(map_gateway_error(GatewayError::validation(
            "project_id is required",
        )));
    }

    let plan = match payload.operation.as_deref() {
        Some(raw) => {
            let operation: Operation = raw.parse().map_err(map_gateway_error)?;
            let config = match payload.model.as_deref() {
                Some(model) => state.gateway.resolve_model(operation, model),
                None => state.gateway.selector().cached_model_config(operation),
            }
            .map_err(map_gateway_error)?;
            let output_tokens = payload
                .output_tokens
                .unwrap_or_else(|| u64::from(config.max_tokens));
            Some(CostPlan {
                operation,
                config,
                input_tokens: payload.input_tokens,
                output_tokens,
                requires_vision: false,
            })
        }
        None => None,
    };

    let estimated_cost_usd = match (payload.estimated_cost_usd, plan.as_ref()) {
        (Some(cost), _) => cost,
        (None, Some(plan)) => {
            plan.config
                .estimate_cost(plan.input_tokens, plan.output_tokens)
                .total_cost
        }
        (None, None) => {
            return Err(map_gateway_error(GatewayError::validation(
                "either estimated_cost_usd or operation is required",
            )));
        }
    };

    let request = BudgetCheckRequest {
        estimated_cost_usd,
        plan,
        accept_downgrade: payload.accept_downgrade,
        config: payload.config,
    };
    state
        .gateway
        .check_budget(&payload.project_id, &request)
        .await
        .map(Json)
        .map_err(map_gateway_error)
}

async fn budget_summary(
    State(state): State<GatewayHttpState>,
    Path(project_id): Path<String>,
) -> Result<Json<BudgetSummary>, HttpError> {
    state
        .gateway
        .budget_summary(&project_id)
        .await
        .map(Json)
        .map_err(map_gateway_error)
}

async fn pipeline_health(
    State(state): State<GatewayHttpState>,
) -> Result<Json<PipelineHealth>, HttpError> {
    state
        .gateway
        .pipeline_health()
        .await
        .map(Json)
        .map_err(map_gateway_error)
}

fn map_gateway_error(err: GatewayError) -> HttpError {
    let status = match &err {
        GatewayError::Validation { .. }
        | GatewayError::UnknownOperation { .. }
        | GatewayError::UnknownModel { .. }
        | GatewayError::Blocked { .. } => StatusCode::BAD_REQUEST,
        GatewayError::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
        GatewayError::Provider { .. } => StatusCode::BAD_GATEWAY,
        GatewayError::InvalidConfig { .. } | GatewayError::Ledger { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        tracing::error!(code = err.code(), error = %err, "request failed");
    }
    error_response(status, err.code(), err.to_string())
}

fn error_response(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> HttpError {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code,
                message: message.into(),
            },
        }),
    )
}
