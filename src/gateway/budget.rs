//! Per-project monthly budget governance.
//!
//! Month spend is read back from the [`CostLedger`]; nothing here keeps a
//! running balance. Two concurrent checks for the same project can both see
//! the same spend and both be allowed.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime};

use super::Clock;
use super::ledger::CostLedger;
use super::models::{Capability, ModelConfig, ModelSelector};
use crate::types::Operation;
use crate::{GatewayError, Result};

/// Share of the monthly budget after which warn-mode messages call out
/// the approaching limit.
pub const BUDGET_ALERT_PERCENT: f64 = 80.0;

/// Month-to-date usage above this share without a projected overrun is
/// reported as `on_track` rather than `under_budget`.
pub const ON_TRACK_PERCENT: f64 = 75.0;

const DAY_MS: u64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    #[default]
    Warn,
    Abort,
    AutoDowngrade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_monthly_budget_usd")]
    pub monthly_budget_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_query_usd: Option<f64>,
    #[serde(default)]
    pub enforcement_mode: EnforcementMode,
}

fn default_monthly_budget_usd() -> f64 {
    100.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_budget_usd: default_monthly_budget_usd(),
            max_cost_per_query_usd: None,
            enforcement_mode: EnforcementMode::Warn,
        }
    }
}

impl BudgetConfig {
    pub fn new(monthly_budget_usd: f64, enforcement_mode: EnforcementMode) -> Self {
        Self {
            monthly_budget_usd,
            max_cost_per_query_usd: None,
            enforcement_mode,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.monthly_budget_usd.is_finite() || self.monthly_budget_usd <= 0.0 {
            return Err("monthly_budget_usd must be a positive number".to_string());
        }
        if let Some(cap) = self.max_cost_per_query_usd {
            if !cap.is_finite() || cap <= 0.0 {
                return Err("max_cost_per_query_usd must be a positive number".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetSettings {
    #[serde(default)]
    pub default: BudgetConfig,
    #[serde(default)]
    pub projects: BTreeMap<String, BudgetConfig>,
}

impl BudgetSettings {
    pub fn for_project(&self, project_id: &str) -> &BudgetConfig {
        self.projects.get(project_id).unwrap_or(&self.default)
    }

    pub fn validate(&self) -> Result<()> {
        self.default
            .validate()
            .map_err(|reason| GatewayError::invalid_config(format!("budget.default: {reason}")))?;
        for (project_id, config) in &self.projects {
            config.validate().map_err(|reason| {
                GatewayError::invalid_config(format!("budget.projects.{project_id}: {reason}"))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub monthly_budget_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_query_usd: Option<f64>,
    pub enforcement_mode: EnforcementMode,
    pub current_month_spend: f64,
    pub daily_burn_rate: f64,
    pub projected_month_end: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    UnderBudget,
    OnTrack,
    AtRisk,
    OverBudget,
}

impl BudgetStatus {
    /// First match wins: over budget, projected overrun, heavy usage.
    pub fn evaluate(
        month_spend: f64,
        monthly_budget: f64,
        projected_month_end: f64,
        budget_used_percent: f64,
    ) -> Self {
        if month_spend > monthly_budget {
            BudgetStatus::OverBudget
        } else if projected_month_end > monthly_budget {
            BudgetStatus::AtRisk
        } else if budget_used_percent > ON_TRACK_PERCENT {
            BudgetStatus::OnTrack
        } else {
            BudgetStatus::UnderBudget
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub project_id: String,
    #[serde(flatten)]
    pub state: BudgetState,
    pub today_spend: f64,
    pub budget_used_percent: f64,
    pub days_elapsed: u32,
    pub days_in_month: u32,
    pub status: BudgetStatus,
}

/// What the caller is about to run. Enables downgrade proposals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostPlan {
    pub operation: Operation,
    pub config: ModelConfig,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub requires_vision: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetCheckRequest {
    pub estimated_cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<CostPlan>,
    #[serde(default)]
    pub accept_downgrade: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<BudgetConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DowngradeProposal {
    pub recommended: bool,
    pub original_config: ModelConfig,
    pub adjusted_config: ModelConfig,
    pub estimated_new_cost: f64,
    pub cost_savings_percent: f64,
    pub quality_impact_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostCheckResult {
    pub allowed: bool,
    pub message: String,
    pub remaining_budget: f64,
    pub estimated_cost: f64,
    pub month_spent: f64,
    pub percent_used: f64,
    pub enforcement_mode: EnforcementMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downgrade: Option<DowngradeProposal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MonthWindow {
    start_ms: u64,
    end_ms: u64,
    day_start_ms: u64,
    day_of_month: u32,
    days_in_month: u32,
}

fn month_window(now_ms: u64) -> Result<MonthWindow> {
    let nanos = i128::from(now_ms) * 1_000_000;
    let now = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|err| GatewayError::invalid_config(format!("clock out of range: {err}")))?;

    let (year, month) = (now.year(), now.month());
    let (next_year, next_month) = if month == Month::December {
        (year + 1, Month::January)
    } else {
        (year, month.next())
    };
    let first = Date::from_calendar_date(year, month, 1)
        .map_err(|err| GatewayError::invalid_config(format!("clock out of range: {err}")))?;
    let next_first = Date::from_calendar_date(next_year, next_month, 1)
        .map_err(|err| GatewayError::invalid_config(format!("clock out of range: {err}")))?;

    let start_ms = epoch_millis(first.midnight().assume_utc());
    let end_ms = epoch_millis(next_first.midnight().assume_utc());
    Ok(MonthWindow {
        start_ms,
        end_ms,
        day_start_ms: now_ms - now_ms % DAY_MS,
        day_of_month: u32::from(now.day()),
        days_in_month: ((end_ms - start_ms) / DAY_MS) as u32,
    })
}

fn epoch_millis(at: OffsetDateTime) -> u64 {
    u64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(0)
}

fn percent_of(value: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return if value > 0.0 { 100.0 } else { 0.0 };
    }
    value / total * 100.0
}

pub struct BudgetGovernor {
    ledger: Arc<dyn CostLedger>,
    selector: Arc<ModelSelector>,
    settings: BudgetSettings,
    clock: Arc<dyn Clock>,
}

impl BudgetGovernor {
    pub fn new(
        ledger: Arc<dyn CostLedger>,
        selector: Arc<ModelSelector>,
        settings: BudgetSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            selector,
            settings,
            clock,
        }
    }

    pub fn budget_config(&self, project_id: &str) -> &BudgetConfig {
        self.settings.for_project(project_id)
    }

    pub async fn check_budget(
        &self,
        project_id: &str,
        request: &BudgetCheckRequest,
    ) -> Result<CostCheckResult> {
        let config = match &request.config {
            Some(config) => {
                config.validate().map_err(GatewayError::validation)?;
                config.clone()
            }
            None => self.budget_config(project_id).clone(),
        };
        let estimated = request.estimated_cost_usd;
        if !estimated.is_finite() || estimated < 0.0 {
            return Err(GatewayError::validation(
                "estimated_cost_usd must be finite and non-negative",
            ));
        }

        let window = month_window(self.clock.now_epoch_millis())?;
        let month_spent = self
            .ledger
            .spend_between(project_id, window.start_ms, window.end_ms)
            .await?
            .cost_usd();

        let budget = config.monthly_budget_usd;
        let post_spend = month_spent + estimated;
        let percent_used = percent_of(post_spend, budget);
        let remaining_budget = (budget - month_spent).max(0.0);
        let over_month = post_spend > budget;
        let over_query = config
            .max_cost_per_query_usd
            .is_some_and(|cap| estimated > cap);
        let would_exceed = over_month || over_query;

        let downgrade = request
            .plan
            .as_ref()
            .and_then(|plan| {
                self.propose_downgrade(plan, estimated, &config, month_spent, would_exceed)
            });
        let downgrade_fits = downgrade
            .as_ref()
            .is_some_and(|proposal| fits(&config, month_spent, proposal.estimated_new_cost));

        let overrun_message = || {
            if over_month {
                format!(
                    "this request (${estimated:.4}) would bring monthly spend to ${post_spend:.2}, exceeding the ${budget:.2} budget by ${:.2}",
                    post_spend - budget
                )
            } else {
                format!(
                    "estimated cost ${estimated:.4} exceeds the per-query limit of ${:.4}",
                    config.max_cost_per_query_usd.unwrap_or_default()
                )
            }
        };
        let usage_message = || {
            format!("{percent_used:.1}% of the ${budget:.2} monthly budget used after this request")
        };

        let (allowed, message) = match config.enforcement_mode {
            EnforcementMode::Warn => {
                let message = if would_exceed {
                    format!("Warning: {}", overrun_message())
                } else if percent_used >= BUDGET_ALERT_PERCENT {
                    format!("Warning: approaching budget, {}", usage_message())
                } else {
                    format!("Within budget: {}", usage_message())
                };
                (true, message)
            }
            EnforcementMode::Abort => {
                if !would_exceed {
                    (true, format!("Within budget: {}", usage_message()))
                } else if request.accept_downgrade && downgrade_fits {
                    let model = downgrade
                        .as_ref()
                        .map(|proposal| proposal.adjusted_config.model_id.as_str())
                        .unwrap_or_default();
                    (
                        true,
                        format!("Budget would be exceeded; proceeding with downgraded model {model}"),
                    )
                } else {
                    (false, format!("Budget exceeded: {}", overrun_message()))
                }
            }
            EnforcementMode::AutoDowngrade => match &downgrade {
                Some(proposal) => (
                    true,
                    format!(
                        "Auto-downgrade: {} instead of {} saves {:.1}% (estimated quality impact {:.1}%)",
                        proposal.adjusted_config.model_id,
                        proposal.original_config.model_id,
                        proposal.cost_savings_percent,
                        proposal.quality_impact_percent
                    ),
                ),
                None if would_exceed => (
                    true,
                    format!("No cheaper model available: {}", overrun_message()),
                ),
                None => (true, format!("Within budget: {}", usage_message())),
            },
        };

        Ok(CostCheckResult {
            allowed,
            message,
            remaining_budget,
            estimated_cost: estimated,
            month_spent,
            percent_used,
            enforcement_mode: config.enforcement_mode,
            downgrade,
        })
    }

    /// Cheaper alternatives for the plan's operation that keep the original
    /// model's capabilities, least quality impact first. On an overrun the
    /// first alternative that fits the budget wins, else the cheapest.
    ///
    /// Candidates must undercut both the plan's own token cost and the
    /// caller's `estimated_cost`, so a proposal never costs more than the
    /// estimate it is reported against.
    pub fn propose_downgrade(
        &self,
        plan: &CostPlan,
        estimated_cost: f64,
        config: &BudgetConfig,
        month_spent: f64,
        would_exceed: bool,
    ) -> Option<DowngradeProposal> {
        let catalog = self.selector.catalog();
        let route = catalog.route(plan.operation).ok()?;
        let original = &plan.config;
        let original_cost = original
            .estimate_cost(plan.input_tokens, plan.output_tokens)
            .total_cost
            .min(estimated_cost);

        let mut candidates: Vec<(ModelConfig, f64, f64)> = route
            .candidate_models()
            .into_iter()
            .filter(|model| *model != original.model_id)
            .filter_map(|model| catalog.resolve(route, model).ok())
            .filter(|candidate| keeps_capabilities(original, candidate, plan.requires_vision))
            .map(|mut candidate| {
                candidate.max_tokens = original.max_tokens;
                candidate.temperature = original.temperature;
                let cost = candidate
                    .estimate_cost(plan.input_tokens, plan.output_tokens)
                    .total_cost;
                let impact = catalog.quality_impact_percent(original, &candidate);
                (candidate, cost, impact)
            })
            .filter(|(_, cost, _)| *cost < original_cost)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        candidates.sort_by(|a, b| a.2.total_cmp(&b.2).then(a.1.total_cmp(&b.1)));
        let chosen = if would_exceed {
            match candidates
                .iter()
                .position(|(_, cost, _)| fits(config, month_spent, *cost))
            {
                Some(index) => candidates.swap_remove(index),
                None => {
                    let cheapest = candidates
                        .iter()
                        .enumerate()
                        .min_by(|a, b| a.1.1.total_cmp(&b.1.1))
                        .map(|(index, _)| index)
                        .unwrap_or(0);
                    candidates.swap_remove(cheapest)
                }
            }
        } else {
            candidates.swap_remove(0)
        };

        let (adjusted_config, estimated_new_cost, quality_impact_percent) = chosen;
        Some(DowngradeProposal {
            recommended: config.enforcement_mode == EnforcementMode::AutoDowngrade
                || would_exceed,
            original_config: original.clone(),
            adjusted_config,
            estimated_new_cost,
            cost_savings_percent: percent_of(original_cost - estimated_new_cost, original_cost),
            quality_impact_percent: quality_impact_percent.max(0.0),
        })
    }

    pub async fn budget_summary(&self, project_id: &str) -> Result<BudgetSummary> {
        let config = self.budget_config(project_id).clone();
        let window = month_window(self.clock.now_epoch_millis())?;
        let month_spend = self
            .ledger
            .spend_between(project_id, window.start_ms, window.end_ms)
            .await?
            .cost_usd();
        let today_spend = self
            .ledger
            .spend_between(project_id, window.day_start_ms, window.day_start_ms + DAY_MS)
            .await?
            .cost_usd();

        let days_elapsed = window.day_of_month.max(1);
        let daily_burn_rate = month_spend / f64::from(days_elapsed);
        let projected_month_end = daily_burn_rate * f64::from(window.days_in_month);
        let budget_used_percent = percent_of(month_spend, config.monthly_budget_usd);
        let status = BudgetStatus::evaluate(
            month_spend,
            config.monthly_budget_usd,
            projected_month_end,
            budget_used_percent,
        );

        Ok(BudgetSummary {
            project_id: project_id.to_string(),
            state: BudgetState {
                monthly_budget_usd: config.monthly_budget_usd,
                max_cost_per_query_usd: config.max_cost_per_query_usd,
                enforcement_mode: config.enforcement_mode,
                current_month_spend: month_spend,
                daily_burn_rate,
                projected_month_end,
            },
            today_spend,
            budget_used_percent,
            days_elapsed,
            days_in_month: window.days_in_month,
            status,
        })
    }
}

fn fits(config: &BudgetConfig, month_spent: f64, cost: f64) -> bool {
    month_spent + cost <= config.monthly_budget_usd
        && config.max_cost_per_query_usd.is_none_or(|cap| cost <= cap)
}

fn keeps_capabilities(original: &ModelConfig, candidate: &ModelConfig, requires_vision: bool) -> bool {
    let kinds = [Capability::Chat, Capability::Embeddings, Capability::Moderation];
    let same_kind = kinds
        .iter()
        .all(|cap| !original.supports(*cap) || candidate.supports(*cap));
    same_kind && (!requires_vision || candidate.supports(Capability::Vision))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::gateway::ManualClock;
    use crate::gateway::costing::usd_to_micros;
    use crate::gateway::ledger::{MemoryLedger, record};
    use crate::gateway::models::ModelCatalog;

    fn at(dt: OffsetDateTime) -> u64 {
        epoch_millis(dt)
    }

    async fn governor(
        settings: BudgetSettings,
        now: OffsetDateTime,
        spends: &[(f64, OffsetDateTime)],
    ) -> BudgetGovernor {
        let ledger = Arc::new(MemoryLedger::new());
        for (usd, when) in spends {
            ledger
                .append(record("p1", usd_to_micros(*usd), at(*when)))
                .await
                .unwrap();
        }
        let selector = Arc::new(ModelSelector::new(Arc::new(ModelCatalog::builtin())));
        BudgetGovernor::new(ledger, selector, settings, Arc::new(ManualClock::new(at(now))))
    }

    fn settings(monthly: f64, mode: EnforcementMode) -> BudgetSettings {
        BudgetSettings {
            default: BudgetConfig::new(monthly, mode),
            projects: BTreeMap::new(),
        }
    }

    fn check(estimated_cost_usd: f64) -> BudgetCheckRequest {
        BudgetCheckRequest {
            estimated_cost_usd,
            ..BudgetCheckRequest::default()
        }
    }

    fn premium_chat_plan() -> CostPlan {
        let catalog = ModelCatalog::builtin();
        let route = catalog.route(Operation::Chat).unwrap();
        CostPlan {
            operation: Operation::Chat,
            config: catalog.resolve(route, "gpt-4o").unwrap(),
            input_tokens: 1_000_000,
            output_tokens: 250_000,
            requires_vision: false,
        }
    }

    const NOW: OffsetDateTime = datetime!(2026-03-15 12:00 UTC);
    const EARLIER: OffsetDateTime = datetime!(2026-03-10 08:00 UTC);

    #[test]
    fn month_window_covers_calendar_month() {
        let window = month_window(at(NOW)).unwrap();
        assert_eq!(window.start_ms, at(datetime!(2026-03-01 0:00 UTC)));
        assert_eq!(window.end_ms, at(datetime!(2026-04-01 0:00 UTC)));
        assert_eq!(window.day_of_month, 15);
        assert_eq!(window.days_in_month, 31);

        let december = month_window(at(datetime!(2025-12-31 23:59 UTC))).unwrap();
        assert_eq!(december.end_ms, at(datetime!(2026-01-01 0:00 UTC)));
        let february = month_window(at(datetime!(2028-02-10 0:00 UTC))).unwrap();
        assert_eq!(february.days_in_month, 29);
    }

    #[tokio::test]
    async fn abort_mode_refuses_overrun() {
        let governor = governor(settings(50.0, EnforcementMode::Abort), NOW, &[(48.0, EARLIER)]).await;
        let result = governor.check_budget("p1", &check(5.0)).await.unwrap();
        assert!(!result.allowed);
        assert!(result.message.contains("Budget exceeded"));
        assert!(result.message.contains("$50.00"));
        assert!((result.month_spent - 48.0).abs() < 1e-9);
        assert!((result.percent_used - 106.0).abs() < 1e-9);
        assert!((result.remaining_budget - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn warn_mode_allows_overrun_with_message() {
        let governor = governor(settings(50.0, EnforcementMode::Warn), NOW, &[(48.0, EARLIER)]).await;
        let result = governor.check_budget("p1", &check(5.0)).await.unwrap();
        assert!(result.allowed);
        assert!(result.message.starts_with("Warning:"));
        assert!(result.message.contains("exceeding"));
        assert_eq!(result.enforcement_mode, EnforcementMode::Warn);
    }

    #[tokio::test]
    async fn abort_mode_allows_within_budget() {
        let governor = governor(settings(50.0, EnforcementMode::Abort), NOW, &[(10.0, EARLIER)]).await;
        let result = governor.check_budget("p1", &check(5.0)).await.unwrap();
        assert!(result.allowed);
        assert!(result.message.starts_with("Within budget"));
    }

    #[tokio::test]
    async fn auto_downgrade_recommends_cheaper_model() {
        let governor = governor(
            settings(500.0, EnforcementMode::AutoDowngrade),
            NOW,
            &[(10.0, EARLIER)],
        )
        .await;
        let plan = premium_chat_plan();
        let estimated = plan
            .config
            .estimate_cost(plan.input_tokens, plan.output_tokens)
            .total_cost;
        let request = BudgetCheckRequest {
            estimated_cost_usd: estimated,
            plan: Some(plan),
            ..BudgetCheckRequest::default()
        };
        let result = governor.check_budget("p1", &request).await.unwrap();
        assert!(result.allowed);
        let downgrade = result.downgrade.expect("downgrade");
        assert!(downgrade.recommended);
        assert_eq!(downgrade.adjusted_config.model_id, "gpt-4o-mini");
        assert_eq!(downgrade.quality_impact_percent, 3.2);
        assert!(downgrade.estimated_new_cost < result.estimated_cost);
        assert!((downgrade.cost_savings_percent - 94.0).abs() < 1e-6);
        assert_eq!(downgrade.adjusted_config.max_tokens, downgrade.original_config.max_tokens);
    }

    #[tokio::test]
    async fn abort_mode_accepts_fitting_downgrade_only_when_asked() {
        let governor = governor(settings(50.0, EnforcementMode::Abort), NOW, &[(48.0, EARLIER)]).await;
        let mut request = BudgetCheckRequest {
            estimated_cost_usd: 5.0,
            plan: Some(premium_chat_plan()),
            ..BudgetCheckRequest::default()
        };

        let refused = governor.check_budget("p1", &request).await.unwrap();
        assert!(!refused.allowed);
        assert!(refused.downgrade.as_ref().is_some_and(|d| d.recommended));

        request.accept_downgrade = true;
        let accepted = governor.check_budget("p1", &request).await.unwrap();
        assert!(accepted.allowed);
        let downgrade = accepted.downgrade.expect("downgrade");
        assert!(48.0 + downgrade.estimated_new_cost <= 50.0);
    }

    #[tokio::test]
    async fn downgrade_never_costs_more_than_reported_estimate() {
        let governor = governor(settings(500.0, EnforcementMode::AutoDowngrade), NOW, &[]).await;
        let mut plan = premium_chat_plan();
        plan.output_tokens = 0;
        let request = BudgetCheckRequest {
            estimated_cost_usd: 0.0001,
            plan: Some(plan),
            ..BudgetCheckRequest::default()
        };
        let result = governor.check_budget("p1", &request).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.estimated_cost, 0.0001);
        assert!(result.downgrade.is_none(), "{:?}", result.downgrade);

        // 1M input tokens: gpt-4o-mini $0.15 and gpt-4.1-nano $0.10 both undercut $0.20.
        let mut plan = premium_chat_plan();
        plan.output_tokens = 0;
        let request = BudgetCheckRequest {
            estimated_cost_usd: 0.2,
            plan: Some(plan),
            ..BudgetCheckRequest::default()
        };
        let result = governor.check_budget("p1", &request).await.unwrap();
        let downgrade = result.downgrade.expect("downgrade");
        assert_eq!(downgrade.adjusted_config.model_id, "gpt-4o-mini");
        assert!(downgrade.estimated_new_cost <= result.estimated_cost);
    }

    #[tokio::test]
    async fn per_query_cap_is_enforced_in_abort_mode() {
        let mut config = BudgetConfig::new(1000.0, EnforcementMode::Abort);
        config.max_cost_per_query_usd = Some(1.0);
        let governor = governor(
            BudgetSettings {
                default: config,
                projects: BTreeMap::new(),
            },
            NOW,
            &[],
        )
        .await;
        let result = governor.check_budget("p1", &check(2.0)).await.unwrap();
        assert!(!result.allowed);
        assert!(result.message.contains("per-query limit"));
    }

    #[tokio::test]
    async fn previous_month_spend_is_ignored() {
        let governor = governor(
            settings(50.0, EnforcementMode::Abort),
            NOW,
            &[(500.0, datetime!(2026-02-27 10:00 UTC)), (1.0, EARLIER)],
        )
        .await;
        let result = governor.check_budget("p1", &check(5.0)).await.unwrap();
        assert!(result.allowed);
        assert!((result.month_spent - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn request_config_overrides_project_config() {
        let governor = governor(settings(50.0, EnforcementMode::Warn), NOW, &[(48.0, EARLIER)]).await;
        let request = BudgetCheckRequest {
            estimated_cost_usd: 5.0,
            config: Some(BudgetConfig::new(50.0, EnforcementMode::Abort)),
            ..BudgetCheckRequest::default()
        };
        let result = governor.check_budget("p1", &request).await.unwrap();
        assert!(!result.allowed);

        let invalid = BudgetCheckRequest {
            estimated_cost_usd: 5.0,
            config: Some(BudgetConfig::new(0.0, EnforcementMode::Abort)),
            ..BudgetCheckRequest::default()
        };
        let err = governor.check_budget("p1", &invalid).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[tokio::test]
    async fn summary_reports_burn_rate_and_status() {
        let governor = governor(settings(50.0, EnforcementMode::Warn), NOW, &[(30.0, EARLIER)]).await;
        let summary = governor.budget_summary("p1").await.unwrap();
        assert_eq!(summary.days_elapsed, 15);
        assert_eq!(summary.days_in_month, 31);
        assert!((summary.state.daily_burn_rate - 2.0).abs() < 1e-9);
        assert!((summary.state.projected_month_end - 62.0).abs() < 1e-9);
        assert_eq!(summary.status, BudgetStatus::AtRisk);
        assert_eq!(summary.today_spend, 0.0);
    }

    #[tokio::test]
    async fn summary_status_levels() {
        let over = governor(settings(50.0, EnforcementMode::Warn), NOW, &[(51.0, EARLIER)]).await;
        assert_eq!(
            over.budget_summary("p1").await.unwrap().status,
            BudgetStatus::OverBudget
        );

        let month_end = datetime!(2026-03-31 18:00 UTC);
        let on_track =
            governor(settings(50.0, EnforcementMode::Warn), month_end, &[(40.0, EARLIER)]).await;
        assert_eq!(
            on_track.budget_summary("p1").await.unwrap().status,
            BudgetStatus::OnTrack
        );

        let under = governor(settings(50.0, EnforcementMode::Warn), NOW, &[(5.0, EARLIER)]).await;
        assert_eq!(
            under.budget_summary("p1").await.unwrap().status,
            BudgetStatus::UnderBudget
        );
    }

    #[test]
    fn over_budget_wins_regardless_of_other_signals() {
        assert_eq!(
            BudgetStatus::evaluate(51.0, 50.0, 0.0, 0.0),
            BudgetStatus::OverBudget
        );
        assert_eq!(
            BudgetStatus::evaluate(10.0, 50.0, 60.0, 99.0),
            BudgetStatus::AtRisk
        );
    }
}
