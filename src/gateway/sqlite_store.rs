use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::ledger::{CostLedger, LedgerError, LedgerRecord, SpendAggregate};
use crate::types::Outcome;

/// SQLite-backed [`CostLedger`]. Every call opens its own connection on the
/// blocking pool, so the handle is cheap to clone and share.
#[derive(Clone, Debug)]
pub struct SqliteLedger {
    path: PathBuf,
}

impl SqliteLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), LedgerError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), LedgerError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            Ok(())
        })
        .await?
    }

    pub async fn record_count(&self) -> Result<u64, LedgerError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<u64, LedgerError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM cost_ledger_entries", [], |row| row.get(0))?;
            Ok(i64_to_u64(count))
        })
        .await?
    }
}

#[async_trait]
impl CostLedger for SqliteLedger {
    async fn append(&self, record: LedgerRecord) -> Result<(), LedgerError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), LedgerError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            conn.execute(
                "INSERT INTO cost_ledger_entries (
                    request_id, project_id, user_id, operation_type, model_id, outcome,
                    cost_usd_micros, tokens, duration_ms, created_at_ms
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    record.request_id,
                    record.project_id,
                    record.user_id,
                    record.operation_type,
                    record.model_id,
                    record.outcome.as_str(),
                    u64_to_i64(record.cost_usd_micros),
                    u64_to_i64(record.tokens),
                    u64_to_i64(record.duration_ms),
                    u64_to_i64(record.created_at_ms),
                ],
            )?;
            Ok(())
        })
        .await?
    }

    async fn spend_between(
        &self,
        project_id: &str,
        from_ms: u64,
        until_ms: u64,
    ) -> Result<SpendAggregate, LedgerError> {
        let path = self.path.clone();
        let project_id = project_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<SpendAggregate, LedgerError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let (cost, tokens, requests): (i64, i64, i64) = conn.query_row(
                "SELECT COALESCE(SUM(cost_usd_micros), 0), COALESCE(SUM(tokens), 0), COUNT(*)
                     FROM cost_ledger_entries
                     WHERE project_id = ?1 AND created_at_ms >= ?2 AND created_at_ms < ?3",
                rusqlite::params![project_id, u64_to_i64(from_ms), u64_to_i64(until_ms)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            Ok(SpendAggregate {
                cost_usd_micros: i64_to_u64(cost),
                tokens: i64_to_u64(tokens),
                requests: i64_to_u64(requests),
            })
        })
        .await?
    }

    async fn records_since(&self, since_ms: u64) -> Result<Vec<LedgerRecord>, LedgerError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<LedgerRecord>, LedgerError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let mut stmt = conn.prepare(
                "SELECT request_id, project_id, user_id, operation_type, model_id, outcome,
                        cost_usd_micros, tokens, duration_ms, created_at_ms
                     FROM cost_ledger_entries
                     WHERE created_at_ms >= ?1
                     ORDER BY created_at_ms, id",
            )?;
            let rows = stmt.query_map(rusqlite::params![u64_to_i64(since_ms)], |row| {
                Ok((
                    LedgerRecord {
                        request_id: row.get(0)?,
                        project_id: row.get(1)?,
                        user_id: row.get(2)?,
                        operation_type: row.get(3)?,
                        model_id: row.get(4)?,
                        outcome: Outcome::Failed,
                        cost_usd_micros: i64_to_u64(row.get(6)?),
                        tokens: i64_to_u64(row.get(7)?),
                        duration_ms: i64_to_u64(row.get(8)?),
                        created_at_ms: i64_to_u64(row.get(9)?),
                    },
                    row.get::<_, String>(5)?,
                ))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (mut record, outcome) = row?;
                record.outcome = outcome.parse().map_err(LedgerError::Backend)?;
                out.push(record);
            }
            Ok(out)
        })
        .await?
    }
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cost_ledger_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            operation_type TEXT NOT NULL,
            model_id TEXT,
            outcome TEXT NOT NULL,
            cost_usd_micros INTEGER NOT NULL DEFAULT 0,
            tokens INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cost_ledger_entries_project_created
            ON cost_ledger_entries(project_id, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_cost_ledger_entries_created
            ON cost_ledger_entries(created_at_ms);",
    )?;
    Ok(())
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn u64_to_i64(value: u64) -> i64 {
    if value > i64::MAX as u64 {
        i64::MAX
    } else {
        value as i64
    }
}

fn i64_to_u64(value: i64) -> u64 {
    if value <= 0 { 0 } else { value as u64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ledger::record;

    #[tokio::test]
    async fn sqlite_ledger_sums_project_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = SqliteLedger::new(dir.path().join("ledger.sqlite"));
        ledger.init().await.expect("init");

        ledger.append(record("p1", 1_500_000, 100)).await.expect("append");
        ledger.append(record("p1", 500_000, 200)).await.expect("append");
        ledger.append(record("p1", 9_000_000, 300)).await.expect("append");
        ledger.append(record("p2", 7_000_000, 150)).await.expect("append");

        let spend = ledger.spend_between("p1", 100, 300).await.expect("spend");
        assert_eq!(spend.cost_usd_micros, 2_000_000);
        assert_eq!(spend.requests, 2);
        assert_eq!(spend.tokens, 200);

        let none = ledger.spend_between("missing", 0, u64::MAX).await.expect("spend");
        assert_eq!(none, SpendAggregate::default());
        assert_eq!(ledger.record_count().await.expect("count"), 4);
    }

    #[tokio::test]
    async fn sqlite_ledger_round_trips_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = SqliteLedger::new(dir.path().join("ledger.sqlite"));

        let mut blocked = record("p1", 0, 20);
        blocked.outcome = Outcome::Blocked;
        blocked.model_id = None;
        ledger.append(record("p1", 42, 10)).await.expect("append");
        ledger.append(blocked.clone()).await.expect("append");

        let rows = ledger.records_since(15).await.expect("rows");
        assert_eq!(rows, vec![blocked]);

        let all = ledger.records_since(0).await.expect("rows");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].cost_usd_micros, 42);
        assert_eq!(all[0].outcome, Outcome::Completed);
    }
}
