//! Health Monitor
//!
//! Every broker, state-store and filesystem call is recorded here as a
//! success or failure. The halt manager judges the rolling window against
//! [`HealthThresholds`]; a breach halts trading.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::HealthConfig;
use crate::error::{Result, WardenError};

/// Hard cap on retained entries regardless of window length
const MAX_ENTRIES: usize = 4096;

/// Which dependency an entry is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCategory {
    Broker,
    State,
    Io,
}

impl std::fmt::Display for HealthCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthCategory::Broker => write!(f, "broker"),
            HealthCategory::State => write!(f, "state"),
            HealthCategory::Io => write!(f, "io"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthEntry {
    pub timestamp: DateTime<Utc>,
    pub category: HealthCategory,
    pub operation: String,
    pub success: bool,
    pub detail: Option<String>,
}

/// Time-bounded window of health entries
#[derive(Debug, Clone)]
pub struct HealthRecord {
    window: Duration,
    entries: VecDeque<HealthEntry>,
    /// Last successful broker call; survives eviction
    last_broker_data: Option<DateTime<Utc>>,
    as_of: Option<DateTime<Utc>>,
}

impl HealthRecord {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
            last_broker_data: None,
            as_of: None,
        }
    }

    pub fn push(&mut self, entry: HealthEntry) {
        let now = entry.timestamp;
        if entry.success && entry.category == HealthCategory::Broker {
            self.last_broker_data = Some(now);
        }
        self.entries.push_back(entry);
        self.evict(now);
        while self.entries.len() > MAX_ENTRIES {
            self.entries.pop_front();
        }
    }

    /// Drop entries older than the window as seen from `now`.
    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        self.entries.retain(|e| e.timestamp >= cutoff);
        self.as_of = Some(now);
    }

    /// Time since the broker last answered, as of the latest eviction.
    /// None until the broker has answered once.
    pub fn broker_data_age(&self) -> Option<Duration> {
        match (self.last_broker_data, self.as_of) {
            (Some(seen), Some(now)) => Some(now - seen),
            _ => None,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &HealthEntry> {
        self.entries.iter()
    }

    pub fn samples(&self) -> usize {
        self.entries.len()
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|e| !e.success).count()
    }

    pub fn failures_in(&self, category: HealthCategory) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.success && e.category == category)
            .count()
    }

    pub fn failure_ratio(&self) -> Decimal {
        if self.entries.is_empty() {
            return Decimal::ZERO;
        }
        Decimal::from(self.failures() as u64) / Decimal::from(self.samples() as u64)
    }

    pub fn last_failure(&self) -> Option<&HealthEntry> {
        self.entries.iter().rev().find(|e| !e.success)
    }
}

/// Limits the rolling window is judged against
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub max_failures_in_window: u32,
    pub max_failure_ratio: Decimal,
    pub min_samples: u32,
    pub max_data_staleness: Duration,
}

impl HealthThresholds {
    pub fn from_config(config: &HealthConfig) -> Self {
        Self {
            max_failures_in_window: config.max_api_failures_in_window,
            max_failure_ratio: config.max_failure_ratio,
            min_samples: config.min_samples,
            max_data_staleness: Duration::seconds(
                config.max_data_staleness_seconds.min(u32::MAX as u64) as i64,
            ),
        }
    }

    pub fn assess(&self, record: &HealthRecord) -> HealthVerdict {
        let failures = record.failures();
        let last = record
            .last_failure()
            .map(|e| {
                format!(
                    "; last: {} {}: {}",
                    e.category,
                    e.operation,
                    e.detail.as_deref().unwrap_or("failed")
                )
            })
            .unwrap_or_default();

        if failures >= self.max_failures_in_window as usize {
            return HealthVerdict::Unhealthy(format!(
                "{} failures in window (max {}){}",
                failures, self.max_failures_in_window, last
            ));
        }

        let ratio = record.failure_ratio();
        if record.samples() >= self.min_samples as usize && ratio > self.max_failure_ratio {
            return HealthVerdict::Unhealthy(format!(
                "failure ratio {} over {} samples exceeds {}{}",
                ratio.round_dp(4),
                record.samples(),
                self.max_failure_ratio,
                last
            ));
        }

        if let Some(age) = record.broker_data_age() {
            if age > self.max_data_staleness {
                return HealthVerdict::Unhealthy(format!(
                    "broker data stale ({}s > {}s)",
                    age.num_seconds(),
                    self.max_data_staleness.num_seconds()
                ));
            }
        }

        HealthVerdict::Healthy
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    Unhealthy(String),
}

impl HealthVerdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthVerdict::Healthy)
    }
}

/// Shared recorder for external-call outcomes
pub struct HealthMonitor {
    record: Mutex<HealthRecord>,
    strategy_failures: Mutex<BTreeMap<String, u32>>,
    clock: Arc<dyn Clock>,
}

impl HealthMonitor {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            record: Mutex::new(HealthRecord::new(window)),
            strategy_failures: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    pub fn from_config(config: &HealthConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(Duration::seconds(config.window_seconds as i64), clock)
    }

    pub fn record_success(&self, category: HealthCategory, operation: &str) {
        self.push(category, operation, true, None);
    }

    pub fn record_failure(&self, category: HealthCategory, operation: &str, detail: &str) {
        warn!(
            category = %category,
            operation = operation,
            detail = detail,
            "external call failed"
        );
        self.push(category, operation, false, Some(detail.to_string()));
    }

    fn push(&self, category: HealthCategory, operation: &str, success: bool, detail: Option<String>) {
        let entry = HealthEntry {
            timestamp: self.clock.now(),
            category,
            operation: operation.to_string(),
            success,
            detail,
        };
        let mut record = self.record.lock().unwrap_or_else(|e| e.into_inner());
        record.push(entry);
    }

    /// Copy of the window as of now.
    pub fn snapshot(&self) -> HealthRecord {
        let now = self.clock.now();
        let mut record = self
            .record
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        record.evict(now);
        record
    }

    /// Strategy errors are tallied per bot and never count toward systemic health.
    pub fn record_strategy_failure(&self, bot_id: &str) {
        let mut failures = self
            .strategy_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *failures.entry(bot_id.to_string()).or_insert(0) += 1;
    }

    pub fn strategy_failures(&self) -> BTreeMap<String, u32> {
        self.strategy_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run an external call under `timeout`, recording its outcome.
    pub async fn observe<T, F>(
        &self,
        category: HealthCategory,
        operation: &str,
        timeout: std::time::Duration,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => {
                debug!(category = %category, operation = operation, "external call ok");
                self.record_success(category, operation);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(category, operation, &e.to_string());
                Err(e)
            }
            Err(_) => {
                let err = WardenError::timeout(operation, timeout);
                self.record_failure(category, operation, &err.to_string());
                Err(err)
            }
        }
    }
}
