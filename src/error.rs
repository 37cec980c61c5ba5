use thiserror::Error;

use crate::types::Usage;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {reason}")]
    Validation { reason: String },
    #[error("request blocked: risk_score={risk_score} threats={}", .threats.join(","))]
    Blocked { threats: Vec<String>, risk_score: u8 },
    #[error("budget exceeded: {message}")]
    BudgetExceeded { message: String },
    #[error("provider error: {message}")]
    Provider {
        message: String,
        status: Option<u16>,
        usage: Option<Usage>,
    },
    #[error("unknown operation: {operation}")]
    UnknownOperation { operation: String },
    #[error("unknown model: {model}")]
    UnknownModel { model: String },
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
    #[error("ledger error: {message}")]
    Ledger { message: String },
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Blocked { .. } => "blocked",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::Provider { .. } => "provider_error",
            Self::UnknownOperation { .. } => "unknown_operation",
            Self::UnknownModel { .. } => "unknown_model",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::Ledger { .. } => "ledger_error",
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider {
            message: err.to_string(),
            status: err.status().map(|status| status.as_u16()),
            usage: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_error_lists_threats() {
        let err = GatewayError::Blocked {
            threats: vec!["ignore_instructions".to_string(), "jailbreak".to_string()],
            risk_score: 80,
        };
        assert_eq!(
            err.to_string(),
            "request blocked: risk_score=80 threats=ignore_instructions,jailbreak"
        );
        assert_eq!(err.code(), "blocked");
    }
}
