//! In-process state store
//!
//! Holds everything behind one lock so each operation is atomic. Used by
//! tests and for dry runs; state is lost when the process exits.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{ResumeRequest, StateStore};
use crate::domain::{AccountSnapshot, BotBudget, CycleId, CycleRecord, HaltState};
use crate::error::Result;

#[derive(Debug, Default)]
struct Inner {
    halt: Option<HaltState>,
    last_cycle_id: u64,
    cycles: Vec<CycleRecord>,
    day_start_equity: BTreeMap<NaiveDate, Decimal>,
    account: Option<AccountSnapshot>,
    budgets: Vec<BotBudget>,
    exposures: BTreeMap<String, Decimal>,
    resume_requests: Vec<ResumeRequest>,
    next_request_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: RwLock<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a halt state, as if a previous process had written it.
    pub async fn with_halt(self, state: HaltState) -> Self {
        self.inner.write().await.halt = Some(state);
        self
    }

    pub async fn cycles(&self) -> Vec<CycleRecord> {
        self.inner.read().await.cycles.clone()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_halt(&self) -> Result<HaltState> {
        Ok(self
            .inner
            .read()
            .await
            .halt
            .clone()
            .unwrap_or_else(HaltState::initial))
    }

    async fn compare_and_set_halt(&self, expected: &HaltState, next: &HaltState) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let current = inner.halt.clone().unwrap_or_else(HaltState::initial);
        if current.status != expected.status || current.set_at != expected.set_at {
            return Ok(false);
        }
        inner.halt = Some(next.clone());
        Ok(true)
    }

    async fn next_cycle_id(&self) -> Result<CycleId> {
        let mut inner = self.inner.write().await;
        inner.last_cycle_id += 1;
        Ok(CycleId(inner.last_cycle_id))
    }

    async fn append_cycle(&self, record: &CycleRecord) -> Result<()> {
        self.inner.write().await.cycles.push(record.clone());
        Ok(())
    }

    async fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.cycles.iter().rev().take(limit).cloned().collect())
    }

    async fn day_start_equity(&self, day: NaiveDate) -> Result<Option<Decimal>> {
        Ok(self.inner.read().await.day_start_equity.get(&day).copied())
    }

    async fn set_day_start_equity_once(&self, day: NaiveDate, equity: Decimal) -> Result<Decimal> {
        let mut inner = self.inner.write().await;
        Ok(*inner.day_start_equity.entry(day).or_insert(equity))
    }

    async fn save_account_snapshot(&self, snapshot: &AccountSnapshot) -> Result<()> {
        self.inner.write().await.account = Some(snapshot.clone());
        Ok(())
    }

    async fn load_account_snapshot(&self) -> Result<Option<AccountSnapshot>> {
        Ok(self.inner.read().await.account.clone())
    }

    async fn put_budgets(&self, cycle_id: CycleId, budgets: &[BotBudget]) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.budgets = budgets
            .iter()
            .filter(|b| b.is_for(cycle_id))
            .cloned()
            .collect();
        Ok(())
    }

    async fn budgets_for_cycle(&self, cycle_id: CycleId) -> Result<Vec<BotBudget>> {
        let inner = self.inner.read().await;
        Ok(inner
            .budgets
            .iter()
            .filter(|b| b.is_for(cycle_id))
            .cloned()
            .collect())
    }

    async fn discard_budgets(&self, cycle_id: CycleId) -> Result<()> {
        self.inner
            .write()
            .await
            .budgets
            .retain(|b| !b.is_for(cycle_id));
        Ok(())
    }

    async fn save_exposures(&self, exposures: &BTreeMap<String, Decimal>) -> Result<()> {
        let mut inner = self.inner.write().await;
        for (bot_id, exposure) in exposures {
            inner.exposures.insert(bot_id.clone(), *exposure);
        }
        Ok(())
    }

    async fn load_exposures(&self) -> Result<BTreeMap<String, Decimal>> {
        Ok(self.inner.read().await.exposures.clone())
    }

    async fn request_resume(&self, requested_by: &str, at: DateTime<Utc>) -> Result<ResumeRequest> {
        let mut inner = self.inner.write().await;
        inner.next_request_id += 1;
        let request = ResumeRequest {
            id: inner.next_request_id,
            requested_by: requested_by.to_string(),
            requested_at: at,
        };
        inner.resume_requests.push(request.clone());
        Ok(request)
    }

    async fn take_resume_request(&self) -> Result<Option<ResumeRequest>> {
        let mut inner = self.inner.write().await;
        Ok(inner.resume_requests.drain(..).last())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
