//! Append-only cost ledger.
//!
//! Spend is never stored as a running balance: the budget governor and the
//! health monitor derive it from ledger rows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use super::costing::micros_to_usd;
use crate::GatewayError;
use crate::types::Outcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub request_id: String,
    pub project_id: String,
    pub user_id: String,
    pub operation_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub outcome: Outcome,
    pub cost_usd_micros: u64,
    pub tokens: u64,
    pub duration_ms: u64,
    pub created_at_ms: u64,
}

impl LedgerRecord {
    pub fn cost_usd(&self) -> f64 {
        micros_to_usd(self.cost_usd_micros)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendAggregate {
    pub cost_usd_micros: u64,
    pub tokens: u64,
    pub requests: u64,
}

impl SpendAggregate {
    pub fn add(&mut self, record: &LedgerRecord) {
        self.cost_usd_micros = self.cost_usd_micros.saturating_add(record.cost_usd_micros);
        self.tokens = self.tokens.saturating_add(record.tokens);
        self.requests = self.requests.saturating_add(1);
    }

    pub fn cost_usd(&self) -> f64 {
        micros_to_usd(self.cost_usd_micros)
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger backend error: {0}")]
    Backend(String),
    #[error("ledger task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[cfg(feature = "gateway-store-sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<LedgerError> for GatewayError {
    fn from(err: LedgerError) -> Self {
        GatewayError::Ledger {
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait CostLedger: Send + Sync {
    async fn append(&self, record: LedgerRecord) -> Result<(), LedgerError>;

    /// Aggregate for `project_id` over `[from_ms, until_ms)`.
    async fn spend_between(
        &self,
        project_id: &str,
        from_ms: u64,
        until_ms: u64,
    ) -> Result<SpendAggregate, LedgerError>;

    /// All rows created at or after `since_ms`, oldest first.
    async fn records_since(&self, since_ms: u64) -> Result<Vec<LedgerRecord>, LedgerError>;
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<Vec<LedgerRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn records(&self) -> Vec<LedgerRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl CostLedger for MemoryLedger {
    async fn append(&self, record: LedgerRecord) -> Result<(), LedgerError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn spend_between(
        &self,
        project_id: &str,
        from_ms: u64,
        until_ms: u64,
    ) -> Result<SpendAggregate, LedgerError> {
        let records = self.records.read().await;
        let mut out = SpendAggregate::default();
        for record in records.iter().filter(|record| {
            record.project_id == project_id
                && record.created_at_ms >= from_ms
                && record.created_at_ms < until_ms
        }) {
            out.add(record);
        }
        Ok(out)
    }

    async fn records_since(&self, since_ms: u64) -> Result<Vec<LedgerRecord>, LedgerError> {
        let records = self.records.read().await;
        let mut out: Vec<LedgerRecord> = records
            .iter()
            .filter(|record| record.created_at_ms >= since_ms)
            .cloned()
            .collect();
        out.sort_by_key(|record| record.created_at_ms);
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) fn record(project_id: &str, cost_usd_micros: u64, created_at_ms: u64) -> LedgerRecord {
    LedgerRecord {
        request_id: format!("req-{created_at_ms}"),
        project_id: project_id.to_string(),
        user_id: "user-1".to_string(),
        operation_type: "chat".to_string(),
        model_id: Some("gpt-4o-mini".to_string()),
        outcome: Outcome::Completed,
        cost_usd_micros,
        tokens: 100,
        duration_ms: 20,
        created_at_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_ledger_aggregates_window_per_project() {
        let ledger = MemoryLedger::new();
        ledger.append(record("p1", 1_000_000, 10)).await.unwrap();
        ledger.append(record("p1", 2_000_000, 20)).await.unwrap();
        ledger.append(record("p1", 4_000_000, 30)).await.unwrap();
        ledger.append(record("p2", 8_000_000, 20)).await.unwrap();

        let spend = ledger.spend_between("p1", 10, 30).await.unwrap();
        assert_eq!(spend.cost_usd_micros, 3_000_000);
        assert_eq!(spend.requests, 2);
        assert_eq!(spend.tokens, 200);
        assert_eq!(spend.cost_usd(), 3.0);

        let empty = ledger.spend_between("p3", 0, u64::MAX).await.unwrap();
        assert_eq!(empty, SpendAggregate::default());
    }

    #[tokio::test]
    async fn records_since_is_ordered() {
        let ledger = MemoryLedger::new();
        ledger.append(record("p1", 1, 50)).await.unwrap();
        ledger.append(record("p1", 1, 5)).await.unwrap();
        ledger.append(record("p1", 1, 40)).await.unwrap();

        let rows = ledger.records_since(10).await.unwrap();
        let times: Vec<u64> = rows.iter().map(|row| row.created_at_ms).collect();
        assert_eq!(times, vec![40, 50]);
        assert_eq!(ledger.len().await, 3);
    }
}
