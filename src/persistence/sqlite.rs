//! SQLite-backed state store
//!
//! Decimals and timestamps are stored as TEXT so values round-trip exactly.
//! Multi-statement writes run inside a transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{ResumeRequest, StateStore};
use crate::domain::{AccountSnapshot, BotBudget, CycleId, CycleRecord, HaltState, HaltStatus};
use crate::error::{Result, WardenError};

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        if let Some(parent) = options.clone().get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!(url = url, "state store connected");
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn fmt_ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| WardenError::InvalidState(format!("bad timestamp {:?}: {}", raw, e)))
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| WardenError::InvalidState(format!("bad decimal {:?}: {}", raw, e)))
}

fn budget_from_row(row: &SqliteRow) -> Result<BotBudget> {
    let cycle_id: i64 = row.try_get("cycle_id")?;
    Ok(BotBudget {
        bot_id: row.try_get("bot_id")?,
        max_capital: parse_decimal(&row.try_get::<String, _>("max_capital")?)?,
        max_position_size: parse_decimal(&row.try_get::<String, _>("max_position_size")?)?,
        cycle_id: CycleId(cycle_id as u64),
    })
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load_halt(&self) -> Result<HaltState> {
        let row = sqlx::query(
            r#"
            SELECT status, reason, set_at
            FROM halt_state
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(HaltState::initial());
        };

        let raw_status: String = row.try_get("status")?;
        let status = HaltStatus::parse(&raw_status).ok_or_else(|| {
            WardenError::InvalidState(format!("unknown halt status {:?}", raw_status))
        })?;

        Ok(HaltState {
            status,
            reason: row.try_get("reason")?,
            set_at: parse_ts(&row.try_get::<String, _>("set_at")?)?,
        })
    }

    async fn compare_and_set_halt(&self, expected: &HaltState, next: &HaltState) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE halt_state
            SET status = ?1, reason = ?2, set_at = ?3
            WHERE id = 1 AND status = ?4 AND set_at = ?5
            "#,
        )
        .bind(next.status.as_str())
        .bind(next.reason.as_deref())
        .bind(fmt_ts(&next.set_at))
        .bind(expected.status.as_str())
        .bind(fmt_ts(&expected.set_at))
        .execute(&self.pool)
        .await?;

        let swapped = result.rows_affected() == 1;
        debug!(
            from = %expected.status,
            to = %next.status,
            swapped = swapped,
            "halt compare-and-set"
        );
        Ok(swapped)
    }

    async fn next_cycle_id(&self) -> Result<CycleId> {
        let row = sqlx::query(
            r#"
            UPDATE cycle_counter
            SET last_cycle_id = last_cycle_id + 1
            WHERE id = 1
            RETURNING last_cycle_id
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("last_cycle_id")?;
        Ok(CycleId(id as u64))
    }

    async fn append_cycle(&self, record: &CycleRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;

        sqlx::query(
            r#"
            INSERT INTO cycle_records (cycle_id, run_id, started_at, outcome, status, record)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(record.cycle_id.value() as i64)
        .bind(record.run_id.to_string())
        .bind(fmt_ts(&record.started_at))
        .bind(record.outcome.to_string())
        .bind(&record.status)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT record
            FROM cycle_records
            ORDER BY cycle_id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CycleRecord> {
                let raw: String = row.try_get("record")?;
                Ok(serde_json::from_str(&raw)?)
            })
            .collect()
    }

    async fn day_start_equity(&self, day: NaiveDate) -> Result<Option<Decimal>> {
        let row = sqlx::query(
            r#"
            SELECT equity FROM day_start_equity WHERE trading_day = ?1
            "#,
        )
        .bind(day.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<Decimal> { parse_decimal(&r.try_get::<String, _>("equity")?) })
            .transpose()
    }

    async fn set_day_start_equity_once(&self, day: NaiveDate, equity: Decimal) -> Result<Decimal> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO day_start_equity (trading_day, equity)
            VALUES (?1, ?2)
            ON CONFLICT (trading_day) DO NOTHING
            "#,
        )
        .bind(day.to_string())
        .bind(equity.to_string())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT equity FROM day_start_equity WHERE trading_day = ?1")
            .bind(day.to_string())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        parse_decimal(&row.try_get::<String, _>("equity")?)
    }

    async fn save_account_snapshot(&self, snapshot: &AccountSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_snapshot (id, snapshot, captured_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT (id) DO UPDATE SET
                snapshot = excluded.snapshot,
                captured_at = excluded.captured_at
            "#,
        )
        .bind(serde_json::to_string(snapshot)?)
        .bind(fmt_ts(&snapshot.captured_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_account_snapshot(&self) -> Result<Option<AccountSnapshot>> {
        let row = sqlx::query("SELECT snapshot FROM account_snapshot WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("snapshot")?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn put_budgets(&self, cycle_id: CycleId, budgets: &[BotBudget]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM bot_budgets")
            .execute(&mut *tx)
            .await?;

        for budget in budgets.iter().filter(|b| b.is_for(cycle_id)) {
            sqlx::query(
                r#"
                INSERT INTO bot_budgets (bot_id, cycle_id, max_capital, max_position_size)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&budget.bot_id)
            .bind(cycle_id.value() as i64)
            .bind(budget.max_capital.to_string())
            .bind(budget.max_position_size.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn budgets_for_cycle(&self, cycle_id: CycleId) -> Result<Vec<BotBudget>> {
        let rows = sqlx::query(
            r#"
            SELECT bot_id, cycle_id, max_capital, max_position_size
            FROM bot_budgets
            WHERE cycle_id = ?1
            ORDER BY bot_id ASC
            "#,
        )
        .bind(cycle_id.value() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(budget_from_row).collect()
    }

    async fn discard_budgets(&self, cycle_id: CycleId) -> Result<()> {
        sqlx::query("DELETE FROM bot_budgets WHERE cycle_id = ?1")
            .bind(cycle_id.value() as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_exposures(&self, exposures: &BTreeMap<String, Decimal>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (bot_id, exposure) in exposures {
            sqlx::query(
                r#"
                INSERT INTO bot_exposures (bot_id, exposure)
                VALUES (?1, ?2)
                ON CONFLICT (bot_id) DO UPDATE SET exposure = excluded.exposure
                "#,
            )
            .bind(bot_id)
            .bind(exposure.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_exposures(&self) -> Result<BTreeMap<String, Decimal>> {
        let rows = sqlx::query("SELECT bot_id, exposure FROM bot_exposures")
            .fetch_all(&self.pool)
            .await?;

        let mut exposures = BTreeMap::new();
        for row in rows {
            let bot_id: String = row.try_get("bot_id")?;
            let exposure = parse_decimal(&row.try_get::<String, _>("exposure")?)?;
            exposures.insert(bot_id, exposure);
        }
        Ok(exposures)
    }

    async fn request_resume(&self, requested_by: &str, at: DateTime<Utc>) -> Result<ResumeRequest> {
        let row = sqlx::query(
            r#"
            INSERT INTO resume_requests (requested_by, requested_at, consumed)
            VALUES (?1, ?2, 0)
            RETURNING id
            "#,
        )
        .bind(requested_by)
        .bind(fmt_ts(&at))
        .fetch_one(&self.pool)
        .await?;

        Ok(ResumeRequest {
            id: row.try_get("id")?,
            requested_by: requested_by.to_string(),
            requested_at: at,
        })
    }

    async fn take_resume_request(&self) -> Result<Option<ResumeRequest>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, requested_by, requested_at
            FROM resume_requests
            WHERE consumed = 0
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query("UPDATE resume_requests SET consumed = 1 WHERE consumed = 0")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        match row {
            Some(row) => Ok(Some(ResumeRequest {
                id: row.try_get("id")?,
                requested_by: row.try_get("requested_by")?,
                requested_at: parse_ts(&row.try_get::<String, _>("requested_at")?)?,
            })),
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    async fn open(dir: &tempfile::TempDir) -> SqliteStateStore {
        let url = format!("sqlite://{}", dir.path().join("state.db").display());
        SqliteStateStore::connect(&url, 2).await.unwrap()
    }

    #[tokio::test]
    async fn test_fresh_store_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let halt = store.load_halt().await.unwrap();
        assert_eq!(halt, HaltState::initial());
    }

    #[tokio::test]
    async fn test_halt_and_cycle_counter_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap();

        {
            let store = open(&dir).await;
            let initial = store.load_halt().await.unwrap();
            let halted = HaltState::halted("daily loss limit reached", at);
            assert!(store.compare_and_set_halt(&initial, &halted).await.unwrap());
            assert_eq!(store.next_cycle_id().await.unwrap(), CycleId(1));
            assert_eq!(store.next_cycle_id().await.unwrap(), CycleId(2));
            store.close().await;
        }

        let store = open(&dir).await;
        let halt = store.load_halt().await.unwrap();
        assert!(halt.is_halted());
        assert_eq!(halt.reason.as_deref(), Some("daily loss limit reached"));
        assert_eq!(halt.set_at, at);
        assert_eq!(store.next_cycle_id().await.unwrap(), CycleId(3));
    }

    #[tokio::test]
    async fn test_compare_and_set_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let initial = store.load_halt().await.unwrap();
        let halted = HaltState::halted("health", Utc::now());
        assert!(store.compare_and_set_halt(&initial, &halted).await.unwrap());
        assert!(!store
            .compare_and_set_halt(&initial, &HaltState::running(Utc::now()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_day_start_equity_set_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert_eq!(store.day_start_equity(day).await.unwrap(), None);
        store.set_day_start_equity_once(day, dec!(100000.50)).await.unwrap();
        let kept = store.set_day_start_equity_once(day, dec!(1)).await.unwrap();
        assert_eq!(kept, dec!(100000.50));
    }

    #[tokio::test]
    async fn test_budget_ledger_replaced_per_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let budget = |id: &str, cycle| BotBudget {
            bot_id: id.to_string(),
            max_capital: dec!(2500.00),
            max_position_size: dec!(2000.00),
            cycle_id: CycleId(cycle),
        };

        store
            .put_budgets(CycleId(1), &[budget("a", 1), budget("b", 1)])
            .await
            .unwrap();
        store.put_budgets(CycleId(2), &[budget("a", 2)]).await.unwrap();

        assert!(store.budgets_for_cycle(CycleId(1)).await.unwrap().is_empty());
        let current = store.budgets_for_cycle(CycleId(2)).await.unwrap();
        assert_eq!(current, vec![budget("a", 2)]);
    }

    #[tokio::test]
    async fn test_cycle_records_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        for id in 1..=3 {
            let mut record = CycleRecord::start(CycleId(id), Uuid::new_v4(), Utc::now());
            record.finish(Utc::now());
            store.append_cycle(&record).await.unwrap();
        }
        let recent = store.recent_cycles(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].cycle_id, CycleId(3));
        assert_eq!(recent[1].cycle_id, CycleId(2));
    }

    #[tokio::test]
    async fn test_resume_request_consumed_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store.request_resume("ops", Utc::now()).await.unwrap();
        let taken = store.take_resume_request().await.unwrap();
        assert_eq!(taken.map(|r| r.requested_by), Some("ops".to_string()));
        assert!(store.take_resume_request().await.unwrap().is_none());
    }
}
