mod error;
pub mod gateway;
pub mod types;

pub use error::{GatewayError, Result};
pub use gateway::{
    BudgetConfig, BudgetSettings, BudgetSummary, Clock, ConfigError, Gateway, GatewayConfig,
    ManualClock, MemoryLedger, ModelCatalog, MonitorThresholds, OpenAiCompatibleProvider,
    ProviderConfig, SanitizerConfig, SystemClock,
};
pub use types::{
    AiRequest, ContentPart, ExecutionError, ExecutionResult, Message, Operation, Outcome, Quality,
    Role, Usage,
};
