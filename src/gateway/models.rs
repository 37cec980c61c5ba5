//! Model catalog and operation routing.
//!
//! The catalog is an immutable table built once (built-in or from config)
//! and shared behind an `Arc`. [`ModelSelector`] resolves an [`Operation`]
//! plus caller hints into a concrete [`ModelConfig`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::types::{Operation, Quality};
use crate::{GatewayError, Result};

/// Item count at which batch selection switches to the economy tier.
pub const BATCH_ECONOMY_THRESHOLD: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Economy,
    Standard,
    Premium,
}

impl ModelTier {
    fn rank(self) -> u8 {
        match self {
            ModelTier::Economy => 0,
            ModelTier::Standard => 1,
            ModelTier::Premium => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Vision,
    Embeddings,
    Reasoning,
    Moderation,
}

/// Pricing and capability entry for one model. Prices are USD per 1M tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub tier: ModelTier,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
    pub context_window: u32,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRoute {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub economy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium: Option<String>,
}

impl OperationRoute {
    fn new(model: &str, max_tokens: u32, temperature: f32) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            temperature,
            economy: None,
            standard: None,
            premium: None,
        }
    }

    fn economy(mut self, model: &str) -> Self {
        self.economy = Some(model.to_string());
        self
    }

    fn standard(mut self, model: &str) -> Self {
        self.standard = Some(model.to_string());
        self
    }

    fn premium(mut self, model: &str) -> Self {
        self.premium = Some(model.to_string());
        self
    }

    pub fn tier_model(&self, tier: ModelTier) -> Option<&str> {
        match tier {
            ModelTier::Economy => self.economy.as_deref(),
            ModelTier::Standard => self.standard.as_deref(),
            ModelTier::Premium => self.premium.as_deref(),
        }
    }

    /// Default model first, then tier models, without duplicates.
    pub fn candidate_models(&self) -> Vec<&str> {
        let mut out = vec![self.model.as_str()];
        for model in [&self.economy, &self.standard, &self.premium]
            .into_iter()
            .flatten()
        {
            if !out.contains(&model.as_str()) {
                out.push(model.as_str());
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DowngradeImpact {
    pub from: String,
    pub to: String,
    pub quality_impact_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: BTreeMap<String, ModelSpec>,
    pub routes: BTreeMap<Operation, OperationRoute>,
    pub vision_model: String,
    #[serde(default)]
    pub downgrade_impacts: Vec<DowngradeImpact>,
}

/// Fully resolved model configuration for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    pub tier: ModelTier,
    pub max_tokens: u32,
    pub temperature: f32,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
    pub context_window: u32,
    pub capabilities: BTreeSet<Capability>,
}

impl ModelConfig {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        use Capability::{Chat, Embeddings, Moderation, Reasoning, Vision};

        let mut models = BTreeMap::new();
        let mut model = |id: &str, tier, input, output, context_window, caps: &[Capability]| {
            models.insert(
                id.to_string(),
                ModelSpec {
                    tier,
                    input_cost_per_million: input,
                    output_cost_per_million: output,
                    context_window,
                    capabilities: caps.iter().copied().collect(),
                },
            );
        };
        model("gpt-4.1-nano", ModelTier::Economy, 0.10, 0.40, 1_047_576, &[Chat]);
        model("gpt-4o-mini", ModelTier::Standard, 0.15, 0.60, 128_000, &[Chat, Vision]);
        model("gpt-4.1-mini", ModelTier::Standard, 0.40, 1.60, 1_047_576, &[Chat, Vision]);
        model("gpt-4o", ModelTier::Premium, 2.50, 10.00, 128_000, &[Chat, Vision]);
        model("gpt-4.1", ModelTier::Premium, 2.00, 8.00, 1_047_576, &[Chat, Vision]);
        model("o3-mini", ModelTier::Premium, 1.10, 4.40, 200_000, &[Chat, Reasoning]);
        model("text-embedding-3-small", ModelTier::Economy, 0.02, 0.0, 8_191, &[Embeddings]);
        model("text-embedding-3-large", ModelTier::Premium, 0.13, 0.0, 8_191, &[Embeddings]);
        model("omni-moderation-latest", ModelTier::Economy, 0.01, 0.01, 32_768, &[Moderation]);

        let routes: BTreeMap<Operation, OperationRoute> = [
            (
                Operation::Translation,
                OperationRoute::new("gpt-4o-mini", 4000, 0.3)
                    .economy("gpt-4.1-nano")
                    .premium("gpt-4.1"),
            ),
            (
                Operation::Classification,
                OperationRoute::new("gpt-4.1-nano", 500, 0.0)
                    .standard("gpt-4o-mini")
                    .premium("gpt-4o"),
            ),
            (
                Operation::Summarization,
                OperationRoute::new("gpt-4o-mini", 1500, 0.3)
                    .economy("gpt-4.1-nano")
                    .premium("gpt-4o"),
            ),
            (
                Operation::Chat,
                OperationRoute::new("gpt-4o-mini", 2000, 0.7)
                    .economy("gpt-4.1-nano")
                    .premium("gpt-4o"),
            ),
            (
                Operation::Verification,
                OperationRoute::new("gpt-4.1-mini", 1500, 0.1)
                    .economy("gpt-4o-mini")
                    .premium("gpt-4.1"),
            ),
            (
                Operation::LegalAnalysis,
                OperationRoute::new("gpt-4o", 4000, 0.2)
                    .economy("gpt-4o-mini")
                    .standard("gpt-4.1-mini"),
            ),
            (
                Operation::VisualAnalysis,
                OperationRoute::new("gpt-4o", 2000, 0.3).economy("gpt-4o-mini"),
            ),
            (
                Operation::Embeddings,
                OperationRoute::new("text-embedding-3-small", 0, 0.0)
                    .premium("text-embedding-3-large"),
            ),
            (
                Operation::Moderation,
                OperationRoute::new("omni-moderation-latest", 200, 0.0),
            ),
            (
                Operation::Extraction,
                OperationRoute::new("gpt-4o-mini", 2000, 0.0)
                    .economy("gpt-4.1-nano")
                    .premium("gpt-4.1"),
            ),
            (
                Operation::SentimentAnalysis,
                OperationRoute::new("gpt-4.1-nano", 300, 0.0)
                    .standard("gpt-4o-mini")
                    .premium("gpt-4o"),
            ),
            (
                Operation::QuestionAnswering,
                OperationRoute::new("gpt-4o-mini", 1500, 0.2)
                    .economy("gpt-4.1-nano")
                    .premium("gpt-4o"),
            ),
            (
                Operation::ReportGeneration,
                OperationRoute::new("gpt-4.1-mini", 4000, 0.4)
                    .economy("gpt-4o-mini")
                    .premium("gpt-4.1"),
            ),
            (
                Operation::CodeGeneration,
                OperationRoute::new("gpt-4.1-mini", 4000, 0.2)
                    .economy("gpt-4.1-nano")
                    .premium("gpt-4.1"),
            ),
            (
                Operation::DataAnalysis,
                OperationRoute::new("gpt-4.1-mini", 3000, 0.2)
                    .economy("gpt-4o-mini")
                    .premium("o3-mini"),
            ),
            (
                Operation::DocumentComparison,
                OperationRoute::new("gpt-4.1-mini", 3000, 0.1)
                    .economy("gpt-4o-mini")
                    .premium("gpt-4.1"),
            ),
            (
                Operation::EntityRecognition,
                OperationRoute::new("gpt-4.1-nano", 1000, 0.0)
                    .standard("gpt-4o-mini")
                    .premium("gpt-4o"),
            ),
            (
                Operation::KeywordExtraction,
                OperationRoute::new("gpt-4.1-nano", 300, 0.0)
                    .standard("gpt-4o-mini")
                    .premium("gpt-4o"),
            ),
            (
                Operation::TitleGeneration,
                OperationRoute::new("gpt-4.1-nano", 60, 0.5).premium("gpt-4.1"),
            ),
            (
                Operation::Rewriting,
                OperationRoute::new("gpt-4o-mini", 2000, 0.5)
                    .economy("gpt-4.1-nano")
                    .premium("gpt-4o"),
            ),
            (
                Operation::Research,
                OperationRoute::new("gpt-4.1", 4000, 0.3)
                    .economy("gpt-4o-mini")
                    .standard("gpt-4.1-mini"),
            ),
            (
                Operation::AgentPlanning,
                OperationRoute::new("o3-mini", 3000, 0.2).economy("gpt-4.1-mini"),
            ),
        ]
        .into_iter()
        .collect();

        let impact = |from: &str, to: &str, quality_impact_percent: f64| DowngradeImpact {
            from: from.to_string(),
            to: to.to_string(),
            quality_impact_percent,
        };
        let downgrade_impacts = vec![
            impact("gpt-4o", "gpt-4o-mini", 3.2),
            impact("gpt-4o", "gpt-4.1-mini", 3.0),
            impact("gpt-4.1", "gpt-4.1-mini", 4.5),
            impact("gpt-4.1", "gpt-4o-mini", 6.5),
            impact("gpt-4.1-mini", "gpt-4o-mini", 2.5),
            impact("gpt-4o-mini", "gpt-4.1-nano", 6.0),
            impact("o3-mini", "gpt-4.1-mini", 9.0),
            impact("text-embedding-3-large", "text-embedding-3-small", 2.0),
        ];

        Self {
            models,
            routes,
            vision_model: "gpt-4o".to_string(),
            downgrade_impacts,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (id, spec) in &self.models {
            for (field, value) in [
                ("input_cost_per_million", spec.input_cost_per_million),
                ("output_cost_per_million", spec.output_cost_per_million),
            ] {
                if !value.is_finite() || value < 0.0 {
                    return Err(GatewayError::invalid_config(format!(
                        "model {id}: {field} must be finite and non-negative"
                    )));
                }
            }
            if spec.context_window == 0 {
                return Err(GatewayError::invalid_config(format!(
                    "model {id}: context_window must be positive"
                )));
            }
        }

        for (operation, route) in &self.routes {
            for model in route.candidate_models() {
                if !self.models.contains_key(model) {
                    return Err(GatewayError::invalid_config(format!(
                        "route {operation}: unknown model {model}"
                    )));
                }
            }
            if !route.temperature.is_finite() || route.temperature < 0.0 {
                return Err(GatewayError::invalid_config(format!(
                    "route {operation}: temperature must be finite and non-negative"
                )));
            }
        }

        match self.models.get(&self.vision_model) {
            Some(spec) if spec.capabilities.contains(&Capability::Vision) => {}
            _ => {
                return Err(GatewayError::invalid_config(format!(
                    "vision_model {} is not a vision-capable catalog model",
                    self.vision_model
                )));
            }
        }

        for impact in &self.downgrade_impacts {
            if !impact.quality_impact_percent.is_finite() || impact.quality_impact_percent < 0.0 {
                return Err(GatewayError::invalid_config(format!(
                    "downgrade impact {} -> {} must be finite and non-negative",
                    impact.from, impact.to
                )));
            }
        }

        Ok(())
    }

    pub fn model(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }

    pub fn route(&self, operation: Operation) -> Result<&OperationRoute> {
        self.routes
            .get(&operation)
            .ok_or_else(|| GatewayError::UnknownOperation {
                operation: operation.to_string(),
            })
    }

    pub fn resolve(&self, route: &OperationRoute, model_id: &str) -> Result<ModelConfig> {
        let spec = self
            .models
            .get(model_id)
            .ok_or_else(|| GatewayError::UnknownModel {
                model: model_id.to_string(),
            })?;
        Ok(ModelConfig {
            model_id: model_id.to_string(),
            tier: spec.tier,
            max_tokens: route.max_tokens,
            temperature: route.temperature,
            input_cost_per_million: spec.input_cost_per_million,
            output_cost_per_million: spec.output_cost_per_million,
            context_window: spec.context_window,
            capabilities: spec.capabilities.clone(),
        })
    }

    /// Cheapest catalog model of `tier` that keeps every capability of the
    /// route's default model. Used when a route names no model for a tier.
    pub fn tier_fallback(&self, route: &OperationRoute, tier: ModelTier) -> Option<&str> {
        let required = &self.models.get(&route.model)?.capabilities;
        self.models
            .iter()
            .filter(|(_, spec)| spec.tier == tier && spec.capabilities.is_superset(required))
            .min_by(|a, b| {
                let cost = |spec: &ModelSpec| spec.input_cost_per_million + spec.output_cost_per_million;
                cost(a.1).total_cmp(&cost(b.1))
            })
            .map(|(id, _)| id.as_str())
    }

    /// Estimated quality loss when swapping `from` for `to`. Explicit pairs
    /// win; otherwise the tier distance decides. Never negative.
    pub fn quality_impact_percent(&self, from: &ModelConfig, to: &ModelConfig) -> f64 {
        if let Some(impact) = self
            .downgrade_impacts
            .iter()
            .find(|impact| impact.from == from.model_id && impact.to == to.model_id)
        {
            return impact.quality_impact_percent.max(0.0);
        }

        match (from.tier.rank(), to.tier.rank()) {
            (from, to) if to > from => 0.0,
            (from, to) if from == to => 5.0,
            (2, 1) => 8.0,
            (1, 0) => 12.0,
            _ => 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingHints<'a> {
    pub desired_model: Option<&'a str>,
    pub has_images: bool,
    pub quality: Option<Quality>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingReason {
    Override,
    Vision,
    Quality,
    Default,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub config: ModelConfig,
    pub reason: RoutingReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSelection {
    pub config: ModelConfig,
    pub economy_applied: bool,
    pub per_item_cost: f64,
    pub estimated_total_cost: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

#[derive(Debug)]
pub struct ModelSelector {
    catalog: Arc<ModelCatalog>,
    cache: RwLock<HashMap<Operation, ModelConfig>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl ModelSelector {
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self {
            catalog,
            cache: RwLock::new(HashMap::new()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Default operation to model mapping.
    pub fn select_model(&self, operation: Operation) -> Result<ModelConfig> {
        let route = self.catalog.route(operation)?;
        self.catalog.resolve(route, &route.model)
    }

    /// Route's model for `tier`. Without one, a capability-preserving
    /// catalog model of that tier, and the default model as a last resort.
    pub fn select_model_by_tier(&self, operation: Operation, tier: ModelTier) -> Result<ModelConfig> {
        let route = self.catalog.route(operation)?;
        let default = self.catalog.resolve(route, &route.model)?;
        if default.tier == tier && route.tier_model(tier).is_none() {
            return Ok(default);
        }
        match route
            .tier_model(tier)
            .or_else(|| self.catalog.tier_fallback(route, tier))
        {
            Some(model) => self.catalog.resolve(route, model),
            None => Ok(default),
        }
    }

    /// Precedence: explicit override, then image input, then requested
    /// quality, then the operation default.
    pub fn route(&self, operation: Operation, hints: RoutingHints<'_>) -> Result<RoutingDecision> {
        let route = self.catalog.route(operation)?;

        if let Some(model) = hints.desired_model.map(str::trim).filter(|m| !m.is_empty()) {
            let config = self.catalog.resolve(route, model)?;
            return Ok(RoutingDecision {
                config,
                reason: RoutingReason::Override,
            });
        }

        if hints.has_images {
            let default = self.catalog.resolve(route, &route.model)?;
            let config = if default.supports(Capability::Vision) {
                default
            } else {
                self.catalog.resolve(route, &self.catalog.vision_model)?
            };
            return Ok(RoutingDecision {
                config,
                reason: RoutingReason::Vision,
            });
        }

        let tier = match hints.quality {
            Some(Quality::High) => Some(ModelTier::Premium),
            Some(Quality::Low) => Some(ModelTier::Economy),
            Some(Quality::Standard) | None => None,
        };
        if let Some(tier) = tier {
            return Ok(RoutingDecision {
                config: self.select_model_by_tier(operation, tier)?,
                reason: RoutingReason::Quality,
            });
        }

        Ok(RoutingDecision {
            config: self.cached_model_config(operation)?,
            reason: RoutingReason::Default,
        })
    }

    pub fn select_batch_model(
        &self,
        operation: Operation,
        item_count: usize,
        avg_tokens: u32,
    ) -> Result<BatchSelection> {
        let economy_applied = item_count >= BATCH_ECONOMY_THRESHOLD;
        let config = if economy_applied {
            self.select_model_by_tier(operation, ModelTier::Economy)?
        } else {
            self.select_model(operation)?
        };

        let expected_output = u64::from(avg_tokens.min(config.max_tokens));
        let per_item_cost = config
            .estimate_cost(u64::from(avg_tokens), expected_output)
            .total_cost;
        Ok(BatchSelection {
            estimated_total_cost: per_item_cost * item_count as f64,
            per_item_cost,
            economy_applied,
            config,
        })
    }

    /// Memoized [`ModelSelector::select_model`].
    pub fn cached_model_config(&self, operation: Operation) -> Result<ModelConfig> {
        if let Some(config) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&operation)
        {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(config.clone());
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        let config = self.select_model(operation)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation, config.clone());
        Ok(config)
    }

    pub fn clear_model_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cache_stats(&self) -> ModelCacheStats {
        let entries = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len() as u64;
        ModelCacheStats {
            hits: self.cache_hits.load(Ordering::Relaxed),
            misses: self.cache_misses.load(Ordering::Relaxed),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> ModelSelector {
        ModelSelector::new(Arc::new(ModelCatalog::builtin()))
    }

    #[test]
    fn builtin_catalog_is_valid_and_complete() {
        let catalog = ModelCatalog::builtin();
        catalog.validate().expect("valid");
        for op in Operation::ALL {
            assert!(catalog.route(op).is_ok(), "missing route for {op}");
        }
    }

    #[test]
    fn default_mapping() {
        let config = selector().select_model(Operation::Classification).unwrap();
        assert_eq!(config.model_id, "gpt-4.1-nano");
        assert_eq!(config.max_tokens, 500);
        assert_eq!(config.tier, ModelTier::Economy);
    }

    #[test]
    fn missing_route_is_unknown_operation() {
        let mut catalog = ModelCatalog::builtin();
        catalog.routes.remove(&Operation::Research);
        let selector = ModelSelector::new(Arc::new(catalog));
        let err = selector.select_model(Operation::Research).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownOperation { .. }));
    }

    #[test]
    fn override_beats_vision_and_quality() {
        let decision = selector()
            .route(
                Operation::Chat,
                RoutingHints {
                    desired_model: Some("gpt-4.1-nano"),
                    has_images: true,
                    quality: Some(Quality::High),
                },
            )
            .unwrap();
        assert_eq!(decision.reason, RoutingReason::Override);
        assert_eq!(decision.config.model_id, "gpt-4.1-nano");
    }

    #[test]
    fn unknown_override_is_rejected() {
        let err = selector()
            .route(
                Operation::Chat,
                RoutingHints {
                    desired_model: Some("gpt-9"),
                    ..RoutingHints::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownModel { .. }));
    }

    #[test]
    fn images_force_vision_model_regardless_of_quality() {
        let decision = selector()
            .route(
                Operation::Classification,
                RoutingHints {
                    desired_model: None,
                    has_images: true,
                    quality: Some(Quality::Low),
                },
            )
            .unwrap();
        assert_eq!(decision.reason, RoutingReason::Vision);
        assert!(decision.config.supports(Capability::Vision));
        assert_eq!(decision.config.model_id, "gpt-4o");

        let chat = selector()
            .route(
                Operation::Chat,
                RoutingHints {
                    has_images: true,
                    ..RoutingHints::default()
                },
            )
            .unwrap();
        assert_eq!(chat.config.model_id, "gpt-4o-mini");
    }

    #[test]
    fn high_quality_forces_premium() {
        let decision = selector()
            .route(
                Operation::Summarization,
                RoutingHints {
                    quality: Some(Quality::High),
                    ..RoutingHints::default()
                },
            )
            .unwrap();
        assert_eq!(decision.reason, RoutingReason::Quality);
        assert_eq!(decision.config.tier, ModelTier::Premium);
    }

    #[test]
    fn high_quality_is_premium_for_every_chat_operation() {
        let selector = selector();
        for op in Operation::ALL {
            let default = selector.select_model(op).unwrap();
            if !default.supports(Capability::Chat) {
                continue;
            }
            let decision = selector
                .route(
                    op,
                    RoutingHints {
                        quality: Some(Quality::High),
                        ..RoutingHints::default()
                    },
                )
                .unwrap();
            assert_eq!(decision.config.tier, ModelTier::Premium, "{op}");
            assert!(decision.config.supports(Capability::Chat), "{op}");
        }
    }

    #[test]
    fn missing_tier_uses_capability_preserving_catalog_model() {
        let mut catalog = ModelCatalog::builtin();
        if let Some(route) = catalog.routes.get_mut(&Operation::TitleGeneration) {
            route.premium = None;
        }
        let selector = ModelSelector::new(Arc::new(catalog));
        let config = selector
            .select_model_by_tier(Operation::TitleGeneration, ModelTier::Premium)
            .unwrap();
        assert_eq!(config.tier, ModelTier::Premium);
        // Cheapest premium chat model.
        assert_eq!(config.model_id, "o3-mini");
        assert_eq!(config.max_tokens, 60);
    }

    #[test]
    fn missing_tier_without_capable_model_keeps_default() {
        let config = selector()
            .select_model_by_tier(Operation::Moderation, ModelTier::Premium)
            .unwrap();
        assert_eq!(config.model_id, "omni-moderation-latest");
    }

    #[test]
    fn batch_biases_to_economy() {
        let selector = selector();
        let small = selector
            .select_batch_model(Operation::Summarization, 3, 1000)
            .unwrap();
        assert!(!small.economy_applied);
        assert_eq!(small.config.model_id, "gpt-4o-mini");

        let large = selector
            .select_batch_model(Operation::Summarization, 100, 1000)
            .unwrap();
        assert!(large.economy_applied);
        assert_eq!(large.config.model_id, "gpt-4.1-nano");
        assert!((large.estimated_total_cost - large.per_item_cost * 100.0).abs() < 1e-12);
        assert!(large.per_item_cost < small.per_item_cost);
    }

    #[test]
    fn cache_is_explicitly_invalidated() {
        let selector = selector();
        let first = selector.cached_model_config(Operation::Chat).unwrap();
        let second = selector.cached_model_config(Operation::Chat).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            selector.cache_stats(),
            ModelCacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );

        selector.clear_model_cache();
        assert_eq!(selector.cache_stats().entries, 0);
        selector.cached_model_config(Operation::Chat).unwrap();
        assert_eq!(selector.cache_stats().misses, 2);
    }

    #[test]
    fn validate_rejects_negative_pricing() {
        let mut catalog = ModelCatalog::builtin();
        if let Some(spec) = catalog.models.get_mut("gpt-4o") {
            spec.output_cost_per_million = -1.0;
        }
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn quality_impact_uses_pairs_then_tiers() {
        let selector = selector();
        let catalog = selector.catalog();
        let route = catalog.route(Operation::Chat).unwrap();
        let premium = catalog.resolve(route, "gpt-4o").unwrap();
        let standard = catalog.resolve(route, "gpt-4o-mini").unwrap();
        let economy = catalog.resolve(route, "gpt-4.1-nano").unwrap();
        assert_eq!(catalog.quality_impact_percent(&premium, &standard), 3.2);
        assert_eq!(catalog.quality_impact_percent(&premium, &economy), 20.0);
        assert_eq!(catalog.quality_impact_percent(&economy, &premium), 0.0);
    }
}
