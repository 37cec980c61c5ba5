use serde::{Deserialize, Serialize};

use super::models::{Capability, ModelConfig, ModelSelector};
use crate::Result;
use crate::types::Operation;

pub const CURRENCY_USD: &str = "USD";

/// Catalog prices are quoted per this many tokens.
pub const TOKENS_PER_PRICE_UNIT: f64 = 1_000_000.0;

const USD_MICROS: f64 = 1_000_000.0;
const USD_NANOS: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub currency: String,
}

impl CostEstimate {
    pub fn zero() -> Self {
        Self {
            input_cost: 0.0,
            output_cost: 0.0,
            total_cost: 0.0,
            currency: CURRENCY_USD.to_string(),
        }
    }
}

impl ModelConfig {
    fn is_embedding_only(&self) -> bool {
        self.supports(Capability::Embeddings) && !self.supports(Capability::Chat)
    }

    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> CostEstimate {
        let input_cost = input_tokens as f64 * self.input_cost_per_million / TOKENS_PER_PRICE_UNIT;
        let output_cost = if self.is_embedding_only() {
            0.0
        } else {
            output_tokens as f64 * self.output_cost_per_million / TOKENS_PER_PRICE_UNIT
        };
        CostEstimate {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
            currency: CURRENCY_USD.to_string(),
        }
    }
}

impl ModelSelector {
    /// Cost of running `operation` on its default model.
    pub fn estimate_cost(
        &self,
        operation: Operation,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<CostEstimate> {
        let config = self.cached_model_config(operation)?;
        Ok(config.estimate_cost(input_tokens, output_tokens))
    }
}

/// Rough token count for text the provider has not measured: one token per
/// four characters, rounded up.
pub fn approximate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

/// Ledger amount for `usd`: rounded at nano-USD precision, then up to the
/// next whole micro so sub-micro calls still register spend.
pub fn usd_to_micros(usd: f64) -> u64 {
    if !usd.is_finite() || usd <= 0.0 {
        return 0;
    }
    let nanos = (usd * USD_NANOS).round();
    if nanos >= u64::MAX as f64 {
        return u64::MAX / 1_000;
    }
    (nanos as u64).div_ceil(1_000)
}

pub fn micros_to_usd(micros: u64) -> f64 {
    micros as f64 / USD_MICROS
}
