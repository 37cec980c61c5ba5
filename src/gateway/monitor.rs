//! Pipeline health evaluation.
//!
//! Reads counters and ledger rows, never gateway state it could alter.

use serde::{Deserialize, Serialize};

use super::ledger::LedgerRecord;
use crate::types::Outcome;
use crate::{GatewayError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorThresholds {
    #[serde(default = "default_queue_depth_warning")]
    pub queue_depth_warning: u64,
    #[serde(default = "default_queue_depth_critical")]
    pub queue_depth_critical: u64,
    /// Fractions in `[0, 1]`.
    #[serde(default = "default_error_rate_warning")]
    pub error_rate_warning: f64,
    #[serde(default = "default_error_rate_critical")]
    pub error_rate_critical: f64,
    #[serde(default = "default_latency_warning_ms")]
    pub latency_warning_ms: f64,
    #[serde(default = "default_latency_critical_ms")]
    pub latency_critical_ms: f64,
    #[serde(default = "default_min_cache_hit_rate")]
    pub min_cache_hit_rate: f64,
    /// Cache hit rate is not judged below this many lookups.
    #[serde(default = "default_min_cache_lookups")]
    pub min_cache_lookups: u64,
    /// Ledger lookback used for the gateway stage.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_queue_depth_warning() -> u64 {
    100
}

fn default_queue_depth_critical() -> u64 {
    500
}

fn default_error_rate_warning() -> f64 {
    0.05
}

fn default_error_rate_critical() -> f64 {
    0.20
}

fn default_latency_warning_ms() -> f64 {
    5_000.0
}

fn default_latency_critical_ms() -> f64 {
    15_000.0
}

fn default_min_cache_hit_rate() -> f64 {
    0.5
}

fn default_min_cache_lookups() -> u64 {
    20
}

fn default_window_seconds() -> u64 {
    3_600
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            queue_depth_warning: default_queue_depth_warning(),
            queue_depth_critical: default_queue_depth_critical(),
            error_rate_warning: default_error_rate_warning(),
            error_rate_critical: default_error_rate_critical(),
            latency_warning_ms: default_latency_warning_ms(),
            latency_critical_ms: default_latency_critical_ms(),
            min_cache_hit_rate: default_min_cache_hit_rate(),
            min_cache_lookups: default_min_cache_lookups(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl MonitorThresholds {
    pub fn validate(&self) -> Result<()> {
        if self.queue_depth_warning > self.queue_depth_critical {
            return Err(GatewayError::invalid_config(
                "monitor.queue_depth_warning must not exceed queue_depth_critical",
            ));
        }
        for (field, value) in [
            ("error_rate_warning", self.error_rate_warning),
            ("error_rate_critical", self.error_rate_critical),
            ("min_cache_hit_rate", self.min_cache_hit_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(GatewayError::invalid_config(format!(
                    "monitor.{field} must be within [0, 1]"
                )));
            }
        }
        if self.error_rate_warning > self.error_rate_critical {
            return Err(GatewayError::invalid_config(
                "monitor.error_rate_warning must not exceed error_rate_critical",
            ));
        }
        if !self.latency_warning_ms.is_finite()
            || self.latency_warning_ms < 0.0
            || self.latency_warning_ms > self.latency_critical_ms
        {
            return Err(GatewayError::invalid_config(
                "monitor latency thresholds must be non-negative with warning <= critical",
            ));
        }
        if self.window_seconds == 0 {
            return Err(GatewayError::invalid_config(
                "monitor.window_seconds must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub name: String,
    pub processed: u64,
    pub failed: u64,
    /// Rows behind `avg_latency_ms`; blocked rows are not timed.
    #[serde(default)]
    pub timed: u64,
    pub avg_latency_ms: f64,
}

impl StageMetrics {
    /// Blocked rows count as processed but neither as failures nor toward
    /// latency, since no provider call was made.
    pub fn from_ledger(name: impl Into<String>, records: &[LedgerRecord]) -> Self {
        let mut failed = 0u64;
        let mut timed = 0u64;
        let mut latency_total = 0u64;
        for record in records {
            match record.outcome {
                Outcome::Failed => failed += 1,
                Outcome::Blocked => continue,
                Outcome::Completed => {}
            }
            timed += 1;
            latency_total = latency_total.saturating_add(record.duration_ms);
        }
        Self {
            name: name.into(),
            processed: records.len() as u64,
            failed,
            timed,
            avg_latency_ms: if timed == 0 {
                0.0
            } else {
                latency_total as f64 / timed as f64
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub queue_depth: u64,
    #[serde(default)]
    pub stages: Vec<StageMetrics>,
    #[serde(default)]
    pub cache_hits: u64,
    #[serde(default)]
    pub cache_misses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub severity: AlertSeverity,
    pub metric: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineHealth {
    pub status: HealthStatus,
    pub queue_depth: u64,
    pub error_rate: f64,
    pub avg_latency: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit_rate: Option<f64>,
    pub alerts: Vec<HealthAlert>,
}

#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    thresholds: MonitorThresholds,
}

impl HealthMonitor {
    pub fn new(thresholds: MonitorThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &MonitorThresholds {
        &self.thresholds
    }

    pub fn evaluate(&self, snapshot: &PipelineSnapshot) -> PipelineHealth {
        let t = &self.thresholds;
        let mut alerts = Vec::new();

        let queue_depth = snapshot.queue_depth;
        if queue_depth >= t.queue_depth_critical {
            alerts.push(alert(
                AlertSeverity::Critical,
                "queue_depth",
                format!("queue depth {queue_depth} at or above {}", t.queue_depth_critical),
            ));
        } else if queue_depth >= t.queue_depth_warning {
            alerts.push(alert(
                AlertSeverity::Warning,
                "queue_depth",
                format!("queue depth {queue_depth} at or above {}", t.queue_depth_warning),
            ));
        }

        let processed: u64 = snapshot.stages.iter().map(|stage| stage.processed).sum();
        let failed: u64 = snapshot.stages.iter().map(|stage| stage.failed).sum();
        let error_rate = if processed == 0 {
            0.0
        } else {
            failed as f64 / processed as f64
        };
        if processed > 0 {
            let percent = error_rate * 100.0;
            if error_rate >= t.error_rate_critical {
                alerts.push(alert(
                    AlertSeverity::Critical,
                    "error_rate",
                    format!("error rate {percent:.1}% ({failed}/{processed})"),
                ));
            } else if error_rate >= t.error_rate_warning {
                alerts.push(alert(
                    AlertSeverity::Warning,
                    "error_rate",
                    format!("error rate {percent:.1}% ({failed}/{processed})"),
                ));
            }
        }

        let timed: u64 = snapshot.stages.iter().map(|stage| stage.timed).sum();
        let avg_latency = if timed == 0 {
            0.0
        } else {
            snapshot
                .stages
                .iter()
                .map(|stage| stage.avg_latency_ms * stage.timed as f64)
                .sum::<f64>()
                / timed as f64
        };
        if avg_latency >= t.latency_critical_ms {
            alerts.push(alert(
                AlertSeverity::Critical,
                "avg_latency",
                format!("average latency {avg_latency:.0}ms"),
            ));
        } else if avg_latency >= t.latency_warning_ms {
            alerts.push(alert(
                AlertSeverity::Warning,
                "avg_latency",
                format!("average latency {avg_latency:.0}ms"),
            ));
        }
        for stage in &snapshot.stages {
            if stage.avg_latency_ms >= t.latency_critical_ms && snapshot.stages.len() > 1 {
                alerts.push(alert(
                    AlertSeverity::Warning,
                    "stage_latency",
                    format!("stage {} averages {:.0}ms", stage.name, stage.avg_latency_ms),
                ));
            }
        }

        let lookups = snapshot.cache_hits.saturating_add(snapshot.cache_misses);
        let cache_hit_rate = (lookups > 0).then(|| snapshot.cache_hits as f64 / lookups as f64);
        if let Some(rate) = cache_hit_rate {
            if lookups >= t.min_cache_lookups && rate < t.min_cache_hit_rate {
                alerts.push(alert(
                    AlertSeverity::Warning,
                    "cache_hit_rate",
                    format!("cache hit rate {:.1}% over {lookups} lookups", rate * 100.0),
                ));
            }
        }

        let status = alerts
            .iter()
            .map(|alert| match alert.severity {
                AlertSeverity::Warning => HealthStatus::Degraded,
                AlertSeverity::Critical => HealthStatus::Critical,
            })
            .max()
            .unwrap_or(HealthStatus::Healthy);

        PipelineHealth {
            status,
            queue_depth,
            error_rate,
            avg_latency,
            cache_hit_rate,
            alerts,
        }
    }
}

fn alert(severity: AlertSeverity, metric: &str, message: String) -> HealthAlert {
    HealthAlert {
        severity,
        metric: metric.to_string(),
        message,
    }
}
