use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub requests: u64,
    pub completed: u64,
    pub blocked: u64,
    pub failed: u64,
    pub validation_failed: u64,
    pub budget_warnings: u64,
    pub budget_denied: u64,
    pub downgrades_applied: u64,
    pub provider_calls: u64,
    pub provider_errors: u64,
    pub ledger_errors: u64,
    pub in_flight: u64,
}

#[derive(Debug, Default)]
pub struct Observability {
    requests: AtomicU64,
    completed: AtomicU64,
    blocked: AtomicU64,
    failed: AtomicU64,
    validation_failed: AtomicU64,
    budget_warnings: AtomicU64,
    budget_denied: AtomicU64,
    downgrades_applied: AtomicU64,
    provider_calls: AtomicU64,
    provider_errors: AtomicU64,
    ledger_errors: AtomicU64,
    in_flight: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Observability {
    /// Counts the request and marks it in flight until the guard drops.
    pub fn start_request(&self) -> InFlightGuard<'_> {
        bump(&self.requests);
        bump(&self.in_flight);
        InFlightGuard { owner: self }
    }

    pub fn record_completed(&self) {
        bump(&self.completed);
    }

    pub fn record_blocked(&self) {
        bump(&self.blocked);
    }

    pub fn record_failed(&self) {
        bump(&self.failed);
    }

    pub fn record_validation_failed(&self) {
        bump(&self.validation_failed);
    }

    pub fn record_budget_warning(&self) {
        bump(&self.budget_warnings);
    }

    pub fn record_budget_denied(&self) {
        bump(&self.budget_denied);
    }

    pub fn record_downgrade_applied(&self) {
        bump(&self.downgrades_applied);
    }

    pub fn record_provider_call(&self) {
        bump(&self.provider_calls);
    }

    pub fn record_provider_error(&self) {
        bump(&self.provider_errors);
    }

    pub fn record_ledger_error(&self) {
        bump(&self.ledger_errors);
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ObservabilitySnapshot {
            requests: load(&self.requests),
            completed: load(&self.completed),
            blocked: load(&self.blocked),
            failed: load(&self.failed),
            validation_failed: load(&self.validation_failed),
            budget_warnings: load(&self.budget_warnings),
            budget_denied: load(&self.budget_denied),
            downgrades_applied: load(&self.downgrades_applied),
            provider_calls: load(&self.provider_calls),
            provider_errors: load(&self.provider_errors),
            ledger_errors: load(&self.ledger_errors),
            in_flight: load(&self.in_flight),
        }
    }
}

#[derive(Debug)]
pub struct InFlightGuard<'a> {
    owner: &'a Observability,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
