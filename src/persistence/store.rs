use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{AccountSnapshot, BotBudget, CycleId, CycleRecord, HaltState};
use crate::error::Result;

/// Operator request to leave HALTED, queued for the running loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub id: i64,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
}

/// Durable, single source of truth for everything that must survive a restart.
///
/// Implementations must make every write atomic: a crash mid-write leaves
/// either the old or the new value, never a mix.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current halt state; a never-written store reports RUNNING.
    async fn load_halt(&self) -> Result<HaltState>;

    /// Replace the halt state only if the stored one still equals `expected`
    /// (status and `set_at`). Returns false on conflict.
    async fn compare_and_set_halt(&self, expected: &HaltState, next: &HaltState) -> Result<bool>;

    /// Allocate the next cycle id. Never reuses an id, across restarts too.
    async fn next_cycle_id(&self) -> Result<CycleId>;

    async fn append_cycle(&self, record: &CycleRecord) -> Result<()>;

    /// Most recent records, newest first.
    async fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleRecord>>;

    async fn day_start_equity(&self, day: NaiveDate) -> Result<Option<Decimal>>;

    /// Record day-start equity unless one already exists for `day`.
    /// Returns whichever value is stored afterwards.
    async fn set_day_start_equity_once(&self, day: NaiveDate, equity: Decimal) -> Result<Decimal>;

    async fn save_account_snapshot(&self, snapshot: &AccountSnapshot) -> Result<()>;

    async fn load_account_snapshot(&self) -> Result<Option<AccountSnapshot>>;

    /// Replace the budget ledger with this cycle's budgets.
    async fn put_budgets(&self, cycle_id: CycleId, budgets: &[BotBudget]) -> Result<()>;

    /// Budgets written for `cycle_id`; budgets from any other cycle are never returned.
    async fn budgets_for_cycle(&self, cycle_id: CycleId) -> Result<Vec<BotBudget>>;

    async fn discard_budgets(&self, cycle_id: CycleId) -> Result<()>;

    /// Merge per-bot exposure figures into the stored set.
    async fn save_exposures(&self, exposures: &BTreeMap<String, Decimal>) -> Result<()>;

    async fn load_exposures(&self) -> Result<BTreeMap<String, Decimal>>;

    async fn request_resume(&self, requested_by: &str, at: DateTime<Utc>) -> Result<ResumeRequest>;

    /// Consume all pending resume requests, returning the latest one.
    async fn take_resume_request(&self) -> Result<Option<ResumeRequest>>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<()>;
}
