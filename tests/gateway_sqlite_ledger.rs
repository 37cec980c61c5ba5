#![cfg(feature = "gateway-store-sqlite")]

use std::sync::Arc;

use async_trait::async_trait;
use policy_gateway::gateway::budget::EnforcementMode;
use policy_gateway::gateway::ledger::CostLedger;
use policy_gateway::gateway::provider::{ModelProvider, ProviderRequest, ProviderResponse};
use policy_gateway::gateway::sqlite_store::SqliteLedger;
use policy_gateway::{
    AiRequest, BudgetConfig, Gateway, GatewayConfig, ManualClock, Outcome, Usage,
};

// 2026-03-15T12:00:00Z
const NOW_MS: u64 = 1_773_576_000_000;

struct CostlyProvider;

#[async_trait]
impl ModelProvider for CostlyProvider {
    async fn complete(&self, _request: &ProviderRequest) -> policy_gateway::Result<ProviderResponse> {
        // 1M output tokens on gpt-4o-mini: $0.60
        Ok(ProviderResponse {
            content: "ok".to_string(),
            usage: Some(Usage::new(0, 1_000_000)),
            model: None,
        })
    }
}

fn gateway(ledger: Arc<SqliteLedger>) -> Gateway {
    let mut config = GatewayConfig::default();
    config
        .budget
        .projects
        .insert("small".to_string(), BudgetConfig::new(1.0, EnforcementMode::Abort));
    Gateway::with_clock(
        config,
        Arc::new(CostlyProvider),
        ledger,
        Arc::new(ManualClock::new(NOW_MS)),
    )
    .expect("gateway")
}

#[tokio::test]
async fn persisted_spend_survives_restart_and_enforces_budget() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ledger.sqlite");

    {
        let ledger = Arc::new(SqliteLedger::new(&path));
        ledger.init().await.expect("init");
        let first = gateway(ledger.clone())
            .execute(AiRequest::new("u1", "small", "chat", "hello"))
            .await;
        assert!(first.success, "{first:?}");
        assert!((first.cost - 0.6).abs() < 1e-9);
    }

    let ledger = Arc::new(SqliteLedger::new(&path));
    let gateway = gateway(ledger.clone());

    let summary = gateway.budget_summary("small").await.expect("summary");
    assert!((summary.state.current_month_spend - 0.6).abs() < 1e-9);
    assert!((summary.today_spend - 0.6).abs() < 1e-9);

    // Spent $0.60 of $1.00; another $0.60 call would overrun.
    let second = gateway
        .check_budget(
            "small",
            &policy_gateway::gateway::budget::BudgetCheckRequest {
                estimated_cost_usd: 0.6,
                ..Default::default()
            },
        )
        .await
        .expect("check");
    assert!(!second.allowed);
    assert!((second.remaining_budget - 0.4).abs() < 1e-9);

    let rows = ledger.records_since(0).await.expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].outcome, Outcome::Completed);
    assert_eq!(rows[0].cost_usd_micros, 600_000);
    assert_eq!(ledger.record_count().await.expect("count"), 1);
}
