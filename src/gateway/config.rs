use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::budget::BudgetSettings;
use super::models::ModelCatalog;
use super::monitor::MonitorThresholds;
use super::sanitizer::{InjectionRule, SafePromptOptions, SanitizeOptions, Sanitizer};
use crate::GatewayError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid json config: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] GatewayError),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub sanitizer: SanitizerConfig,
    #[serde(default)]
    pub budget: BudgetSettings,
    /// Replaces the built-in catalog when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<ModelCatalog>,
    #[serde(default)]
    pub monitor: MonitorThresholds,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_seconds: default_timeout_seconds(),
            headers: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key_env", &self.api_key_env)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("headers", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub key: String,
    pub pattern: String,
    pub weight: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizerConfig {
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default)]
    pub strict_mode: bool,
    /// Requests scoring at or above this are blocked before routing.
    #[serde(default = "default_block_threshold")]
    pub block_threshold: u8,
    #[serde(default = "default_role_reminder")]
    pub role_reminder: bool,
    /// Appended to the built-in injection rules.
    #[serde(default)]
    pub extra_rules: Vec<RuleConfig>,
}

fn default_max_length() -> usize {
    SanitizeOptions::default().max_length
}

fn default_block_threshold() -> u8 {
    70
}

fn default_role_reminder() -> bool {
    true
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            strict_mode: false,
            block_threshold: default_block_threshold(),
            role_reminder: default_role_reminder(),
            extra_rules: Vec::new(),
        }
    }
}

impl SanitizerConfig {
    pub fn prompt_options(&self) -> SafePromptOptions {
        SafePromptOptions {
            sanitize: SanitizeOptions {
                max_length: self.max_length,
                strict_mode: self.strict_mode,
            },
            role_reminder: self.role_reminder,
        }
    }

    pub fn build_sanitizer(&self) -> Result<Sanitizer, GatewayError> {
        let mut rules = Sanitizer::default().rules().to_vec();
        for rule in &self.extra_rules {
            rules.push(InjectionRule::new(rule.key.clone(), &rule.pattern, rule.weight)?);
        }
        Ok(Sanitizer::with_rules(rules))
    }
}

impl GatewayConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&raw)
        } else {
            Self::from_toml_str(&raw)
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn catalog(&self) -> ModelCatalog {
        self.catalog.clone().unwrap_or_else(ModelCatalog::builtin)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.provider.base_url.trim().is_empty() {
            return Err(GatewayError::invalid_config("provider.base_url must not be empty"));
        }
        if self.provider.timeout_seconds == 0 {
            return Err(GatewayError::invalid_config(
                "provider.timeout_seconds must be positive",
            ));
        }
        if self.sanitizer.max_length == 0 {
            return Err(GatewayError::invalid_config(
                "sanitizer.max_length must be positive",
            ));
        }
        if !(1..=100).contains(&self.sanitizer.block_threshold) {
            return Err(GatewayError::invalid_config(
                "sanitizer.block_threshold must be within 1..=100",
            ));
        }
        self.sanitizer.build_sanitizer()?;
        self.budget.validate()?;
        if let Some(catalog) = &self.catalog {
            catalog.validate()?;
        }
        self.monitor.validate()?;
        Ok(())
    }
}
