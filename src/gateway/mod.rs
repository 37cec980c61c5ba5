//! Policy gateway: sanitize, route, govern spend, dispatch one provider
//! call and record the outcome.

pub mod budget;
pub mod config;
pub mod costing;
#[cfg(feature = "gateway-http")]
pub mod http;
pub mod ledger;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod provider;
pub mod sanitizer;
#[cfg(feature = "gateway-store-sqlite")]
pub mod sqlite_store;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::Instrument;
use uuid::Uuid;

use crate::types::{AiRequest, ExecutionError, ExecutionResult, Operation, Usage};
use crate::{GatewayError, Result};

use budget::{BudgetCheckRequest, BudgetGovernor, CostCheckResult, CostPlan, EnforcementMode};
use costing::{CostEstimate, approximate_tokens, usd_to_micros};
use ledger::{CostLedger, LedgerRecord};
use models::{ModelConfig, ModelSelector, RoutingHints};
use monitor::{HealthMonitor, PipelineHealth, PipelineSnapshot, StageMetrics};
use observability::{Observability, ObservabilitySnapshot};
use provider::{ModelProvider, ProviderRequest};
use sanitizer::{SanitizationResult, SanitizeOptions, Sanitizer, prompt_messages, validate_ai_output};

pub use budget::{BudgetConfig, BudgetSettings, BudgetSummary};
pub use config::{ConfigError, GatewayConfig, ProviderConfig, SanitizerConfig};
pub use ledger::MemoryLedger;
pub use models::ModelCatalog;
pub use monitor::MonitorThresholds;
pub use provider::OpenAiCompatibleProvider;

pub trait Clock: Send + Sync {
    fn now_epoch_millis(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_millis(&self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        now.as_millis() as u64
    }
}

/// Settable clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_epoch_millis(&self) -> u64 {
        self.now_ms.load(Ordering::Relaxed)
    }
}

/// Per-call state carried across dispatch stages into the result envelope.
struct Dispatch {
    request_id: String,
    started: Instant,
    model: Option<String>,
    risk_score: Option<u8>,
    warnings: Vec<String>,
    downgrade: Option<budget::DowngradeProposal>,
}

impl Dispatch {
    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

pub struct Gateway {
    sanitizer: Sanitizer,
    sanitizer_config: SanitizerConfig,
    selector: Arc<ModelSelector>,
    governor: BudgetGovernor,
    ledger: Arc<dyn CostLedger>,
    provider: Arc<dyn ModelProvider>,
    monitor: HealthMonitor,
    observability: Observability,
    clock: Arc<dyn Clock>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        provider: Arc<dyn ModelProvider>,
        ledger: Arc<dyn CostLedger>,
    ) -> Result<Self> {
        Self::with_clock(config, provider, ledger, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: GatewayConfig,
        provider: Arc<dyn ModelProvider>,
        ledger: Arc<dyn CostLedger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(config.catalog());
        catalog.validate()?;
        let selector = Arc::new(ModelSelector::new(catalog));
        let governor = BudgetGovernor::new(
            ledger.clone(),
            selector.clone(),
            config.budget.clone(),
            clock.clone(),
        );
        Ok(Self {
            sanitizer: config.sanitizer.build_sanitizer()?,
            sanitizer_config: config.sanitizer,
            selector,
            governor,
            ledger,
            provider,
            monitor: HealthMonitor::new(config.monitor),
            observability: Observability::default(),
            clock,
        })
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    pub fn governor(&self) -> &BudgetGovernor {
        &self.governor
    }

    pub fn observability(&self) -> ObservabilitySnapshot {
        self.observability.snapshot()
    }

    pub fn sanitizer_config(&self) -> &SanitizerConfig {
        &self.sanitizer_config
    }

    /// Resolves an explicit model id against the operation's route limits.
    pub fn resolve_model(&self, operation: Operation, model_id: &str) -> Result<ModelConfig> {
        let catalog = self.selector.catalog();
        let route = catalog.route(operation)?;
        catalog.resolve(route, model_id.trim())
    }

    /// Sanitizes with the configured rules; `options` falls back to the
    /// configured limits.
    pub fn sanitize(&self, input: &str, options: Option<SanitizeOptions>) -> SanitizationResult {
        let options = options.unwrap_or(self.sanitizer_config.prompt_options().sanitize);
        self.sanitizer.sanitize(input, options)
    }

    pub fn estimate_cost(
        &self,
        operation: Operation,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<CostEstimate> {
        self.selector.estimate_cost(operation, input_tokens, output_tokens)
    }

    pub async fn check_budget(
        &self,
        project_id: &str,
        request: &BudgetCheckRequest,
    ) -> Result<CostCheckResult> {
        self.governor.check_budget(project_id, request).await
    }

    pub async fn budget_summary(&self, project_id: &str) -> Result<BudgetSummary> {
        self.governor.budget_summary(project_id).await
    }

    /// In-flight calls as queue depth, the ledger window as the gateway
    /// stage, model-config cache counters as cache metrics.
    pub async fn pipeline_snapshot(&self) -> Result<PipelineSnapshot> {
        let window_ms = self.monitor.thresholds().window_seconds.saturating_mul(1000);
        let since = self.clock.now_epoch_millis().saturating_sub(window_ms);
        let records = self.ledger.records_since(since).await?;
        let cache = self.selector.cache_stats();
        Ok(PipelineSnapshot {
            queue_depth: self.observability.in_flight(),
            stages: vec![StageMetrics::from_ledger("gateway", &records)],
            cache_hits: cache.hits,
            cache_misses: cache.misses,
        })
    }

    pub async fn pipeline_health(&self) -> Result<PipelineHealth> {
        let snapshot = self.pipeline_snapshot().await?;
        Ok(self.monitor.evaluate(&snapshot))
    }

    /// Runs one request to a terminal outcome. Never returns an error: every
    /// failure is reported in the envelope and recorded in the ledger.
    pub async fn execute(&self, request: AiRequest) -> ExecutionResult {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "gateway.execute",
            request_id = %request_id,
            operation = %request.operation,
            project_id = %request.project_id,
        );
        self.execute_inner(request, request_id).instrument(span).await
    }

    async fn execute_inner(&self, request: AiRequest, request_id: String) -> ExecutionResult {
        let _in_flight = self.observability.start_request();
        let mut run = Dispatch {
            request_id,
            started: Instant::now(),
            model: None,
            risk_score: None,
            warnings: Vec::new(),
            downgrade: None,
        };

        if let Err(err) = validate_request(&request) {
            self.observability.record_validation_failed();
            tracing::debug!(error = %err, "request rejected");
            return self.finish_failed(&request, run, err, Usage::default(), 0.0).await;
        }

        let prompt_options = self.sanitizer_config.prompt_options();
        let sanitization = self.sanitizer.sanitize(&request.user_input, prompt_options.sanitize);
        run.risk_score = Some(sanitization.risk_score);
        if sanitization.risk_score >= self.sanitizer_config.block_threshold {
            tracing::warn!(
                risk_score = sanitization.risk_score,
                threats = ?sanitization.detected_patterns,
                "request blocked by sanitizer"
            );
            return self.finish_blocked(&request, run, sanitization).await;
        }

        let operation = match request.operation.parse::<Operation>() {
            Ok(operation) => operation,
            Err(err) => {
                tracing::error!(error = %err, "operation is not routable");
                return self.finish_failed(&request, run, err, Usage::default(), 0.0).await;
            }
        };
        let decision = match self.selector.route(
            operation,
            RoutingHints {
                desired_model: request.desired_model.as_deref(),
                has_images: !request.images.is_empty(),
                quality: request.desired_quality,
            },
        ) {
            Ok(decision) => decision,
            Err(err) => {
                if matches!(err, GatewayError::UnknownOperation { .. }) {
                    tracing::error!(error = %err, "operation missing from routing table");
                }
                return self.finish_failed(&request, run, err, Usage::default(), 0.0).await;
            }
        };
        tracing::debug!(
            model = %decision.config.model_id,
            reason = ?decision.reason,
            "routed request"
        );
        let mut config = decision.config;
        run.model = Some(config.model_id.clone());

        let mut messages = prompt_messages(
            operation.system_prompt(),
            &sanitization.cleaned_input,
            prompt_options.role_reminder,
        );
        if !request.images.is_empty() {
            if let Some(user) = messages.last_mut() {
                *user = user.clone().with_images(&request.images);
            }
        }
        let prompt_tokens = messages
            .iter()
            .map(|message| approximate_tokens(&message.text()))
            .sum::<u64>();

        if let Err(err) = self
            .apply_budget(&request, operation, &mut config, prompt_tokens, &mut run)
            .await
        {
            return self.finish_failed(&request, run, err, Usage::default(), 0.0).await;
        }

        let provider_request = ProviderRequest {
            model: config.model_id.clone(),
            messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };
        self.observability.record_provider_call();
        let response = match self.provider.complete(&provider_request).await {
            Ok(response) => response,
            Err(err) => {
                self.observability.record_provider_error();
                tracing::error!(model = %config.model_id, error = %err, "provider call failed");
                let usage = match &err {
                    GatewayError::Provider {
                        usage: Some(usage), ..
                    } => *usage,
                    _ => Usage::default(),
                };
                let cost = config
                    .estimate_cost(usage.input_tokens, usage.output_tokens)
                    .total_cost;
                return self.finish_failed(&request, run, err, usage, cost).await;
            }
        };

        let usage = response.usage.unwrap_or_else(|| {
            Usage::new(prompt_tokens, approximate_tokens(&response.content))
        });
        let cost = config
            .estimate_cost(usage.input_tokens, usage.output_tokens)
            .total_cost;

        let output = validate_ai_output(&response.content);
        if !output.is_valid {
            tracing::warn!(issues = ?output.issues, "model output flagged");
            run.warnings
                .extend(output.issues.iter().map(|issue| format!("output: {}", issue.detail)));
        }

        self.observability.record_completed();
        let result = ExecutionResult {
            success: true,
            blocked: false,
            threats: Vec::new(),
            request_id: run.request_id.clone(),
            usage,
            cost,
            duration_ms: run.elapsed_ms(),
            model: run.model.take(),
            risk_score: run.risk_score,
            content: Some(response.content),
            error: None,
            warnings: std::mem::take(&mut run.warnings),
            downgrade: run.downgrade.take(),
        };
        self.record(&request, &result).await;
        result
    }

    async fn apply_budget(
        &self,
        request: &AiRequest,
        operation: Operation,
        config: &mut ModelConfig,
        prompt_tokens: u64,
        run: &mut Dispatch,
    ) -> Result<()> {
        let output_tokens = u64::from(config.max_tokens);
        let estimated = config.estimate_cost(prompt_tokens, output_tokens).total_cost;
        let check = BudgetCheckRequest {
            estimated_cost_usd: estimated,
            plan: Some(CostPlan {
                operation,
                config: config.clone(),
                input_tokens: prompt_tokens,
                output_tokens,
                requires_vision: !request.images.is_empty(),
            }),
            accept_downgrade: false,
            config: None,
        };

        let decision = match self.governor.check_budget(&request.project_id, &check).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(error = %err, "budget check unavailable; proceeding");
                run.warnings.push(format!("budget check unavailable: {err}"));
                return Ok(());
            }
        };

        if !decision.allowed {
            self.observability.record_budget_denied();
            tracing::warn!(message = %decision.message, "budget refused request");
            return Err(GatewayError::BudgetExceeded {
                message: decision.message,
            });
        }

        match decision.enforcement_mode {
            EnforcementMode::AutoDowngrade => {
                if let Some(proposal) = decision.downgrade.as_ref().filter(|p| p.recommended) {
                    self.observability.record_downgrade_applied();
                    tracing::info!(
                        from = %proposal.original_config.model_id,
                        to = %proposal.adjusted_config.model_id,
                        "applying budget downgrade"
                    );
                    *config = proposal.adjusted_config.clone();
                    run.model = Some(config.model_id.clone());
                    run.warnings.push(decision.message.clone());
                }
            }
            EnforcementMode::Warn if decision.message.starts_with("Warning") => {
                self.observability.record_budget_warning();
                tracing::warn!(message = %decision.message, "budget warning");
                run.warnings.push(decision.message.clone());
            }
            EnforcementMode::Warn | EnforcementMode::Abort => {}
        }
        run.downgrade = decision.downgrade;
        Ok(())
    }

    async fn finish_blocked(
        &self,
        request: &AiRequest,
        mut run: Dispatch,
        sanitization: SanitizationResult,
    ) -> ExecutionResult {
        self.observability.record_blocked();
        let err = GatewayError::Blocked {
            threats: sanitization.detected_patterns.clone(),
            risk_score: sanitization.risk_score,
        };
        let result = ExecutionResult {
            success: false,
            blocked: true,
            threats: sanitization.detected_patterns,
            request_id: run.request_id.clone(),
            usage: Usage::default(),
            cost: 0.0,
            duration_ms: run.elapsed_ms(),
            model: None,
            risk_score: run.risk_score,
            content: None,
            error: Some(ExecutionError::from(&err)),
            warnings: std::mem::take(&mut run.warnings),
            downgrade: None,
        };
        self.record(request, &result).await;
        result
    }

    async fn finish_failed(
        &self,
        request: &AiRequest,
        mut run: Dispatch,
        err: GatewayError,
        usage: Usage,
        cost: f64,
    ) -> ExecutionResult {
        self.observability.record_failed();
        let result = ExecutionResult {
            success: false,
            blocked: false,
            threats: Vec::new(),
            request_id: run.request_id.clone(),
            usage,
            cost,
            duration_ms: run.elapsed_ms(),
            model: run.model.take(),
            risk_score: run.risk_score,
            content: None,
            error: Some(ExecutionError::from(&err)),
            warnings: std::mem::take(&mut run.warnings),
            downgrade: run.downgrade.take(),
        };
        self.record(request, &result).await;
        result
    }

    async fn record(&self, request: &AiRequest, result: &ExecutionResult) {
        let outcome = result.outcome();
        let record = LedgerRecord {
            request_id: result.request_id.clone(),
            project_id: request.project_id.clone(),
            user_id: request.user_id.clone(),
            operation_type: request.operation.trim().to_ascii_lowercase(),
            model_id: result.model.clone(),
            outcome,
            cost_usd_micros: usd_to_micros(result.cost),
            tokens: result.usage.total_tokens,
            duration_ms: result.duration_ms,
            created_at_ms: self.clock.now_epoch_millis(),
        };
        if let Err(err) = self.ledger.append(record).await {
            self.observability.record_ledger_error();
            tracing::error!(error = %err, outcome = outcome.as_str(), "ledger append failed");
        }
    }
}

fn validate_request(request: &AiRequest) -> Result<()> {
    for (field, value) in [
        ("user_id", &request.user_id),
        ("project_id", &request.project_id),
        ("operation", &request.operation),
    ] {
        if value.trim().is_empty() {
            return Err(GatewayError::validation(format!("{field} is required")));
        }
    }
    if request.user_input.trim().is_empty() {
        return Err(GatewayError::validation("user_input must not be blank"));
    }
    Ok(())
}
