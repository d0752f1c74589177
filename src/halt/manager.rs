use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::domain::{AccountSnapshot, CyclePhase, HaltState, HaltTrigger};
use crate::error::{Result, WardenError};
use crate::health::{HealthCategory, HealthMonitor, HealthRecord, HealthThresholds, HealthVerdict};
use crate::persistence::StateStore;

/// Re-reads allowed when another writer changes the halt state underneath us
const MAX_CAS_ATTEMPTS: usize = 3;

/// Limits that force a halt
#[derive(Debug, Clone)]
pub struct HaltPolicy {
    /// Fraction of day-start equity
    pub max_daily_loss: Decimal,
    pub health: HealthThresholds,
}

impl HaltPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_daily_loss: config.risk.global_max_daily_loss,
            health: HealthThresholds::from_config(&config.health),
        }
    }

    /// First violated rule, health before daily loss.
    pub fn violation(&self, account: &AccountSnapshot, health: &HealthRecord) -> Option<HaltTrigger> {
        if let HealthVerdict::Unhealthy(detail) = self.health.assess(health) {
            return Some(HaltTrigger::Health(detail));
        }
        if account.breaches_daily_loss(self.max_daily_loss) {
            return Some(HaltTrigger::DailyLoss {
                loss_fraction: account.daily_loss_fraction(),
                limit: self.max_daily_loss,
            });
        }
        None
    }
}

/// Halt rule. A prior HALTED state is kept as is; only `resume` clears it.
pub fn decide(
    prior: &HaltState,
    account: &AccountSnapshot,
    health: &HealthRecord,
    policy: &HaltPolicy,
    now: DateTime<Utc>,
) -> HaltState {
    if prior.is_halted() {
        return prior.clone();
    }
    match policy.violation(account, health) {
        Some(trigger) => HaltState::halted(trigger.to_string(), now),
        None => prior.clone(),
    }
}

/// Halt state before and after an operation
#[derive(Debug, Clone, PartialEq)]
pub struct HaltTransition {
    pub previous: HaltState,
    pub current: HaltState,
}

impl HaltTransition {
    fn unchanged(state: HaltState) -> Self {
        Self {
            previous: state.clone(),
            current: state,
        }
    }

    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    pub fn newly_halted(&self) -> bool {
        !self.previous.is_halted() && self.current.is_halted()
    }

    pub fn resumed(&self) -> bool {
        self.previous.is_halted() && !self.current.is_halted()
    }
}

pub struct HaltManager {
    store: Arc<dyn StateStore>,
    health: Arc<HealthMonitor>,
    policy: HaltPolicy,
    clock: Arc<dyn Clock>,
    io_timeout: Duration,
}

impl HaltManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        health: Arc<HealthMonitor>,
        policy: HaltPolicy,
        clock: Arc<dyn Clock>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            store,
            health,
            policy,
            clock,
            io_timeout,
        }
    }

    pub fn policy(&self) -> &HaltPolicy {
        &self.policy
    }

    /// Persisted halt state.
    pub async fn current(&self) -> Result<HaltState> {
        self.health
            .observe(
                HealthCategory::State,
                "load_halt",
                self.io_timeout,
                self.store.load_halt(),
            )
            .await
    }

    async fn swap(&self, expected: &HaltState, next: &HaltState) -> Result<bool> {
        self.health
            .observe(
                HealthCategory::State,
                "compare_and_set_halt",
                self.io_timeout,
                self.store.compare_and_set_halt(expected, next),
            )
            .await
    }

    /// Apply the halt rule to this cycle's account and health, persisting any change.
    pub async fn evaluate(
        &self,
        account: &AccountSnapshot,
        health: &HealthRecord,
    ) -> Result<HaltTransition> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let prior = self.current().await?;
            let next = decide(&prior, account, health, &self.policy, self.clock.now());
            if next == prior {
                return Ok(HaltTransition::unchanged(prior));
            }

            if self.swap(&prior, &next).await? {
                error!(
                    reason = next.reason_or_default(),
                    equity = %account.equity,
                    day_start_equity = %account.day_start_equity,
                    "TRADING HALTED"
                );
                return Ok(HaltTransition {
                    previous: prior,
                    current: next,
                });
            }
            warn!(attempt, "halt state changed concurrently; re-evaluating");
        }

        Err(WardenError::StateConflict(
            "halt state kept changing during evaluation".into(),
        ))
    }

    /// Force HALTED after a systemic phase failure.
    pub async fn record_failure(&self, phase: CyclePhase, error: &str) -> Result<HaltTransition> {
        self.force_halt(HaltTrigger::PhaseFailure {
            phase: phase.to_string(),
            error: error.to_string(),
        })
        .await
    }

    /// Operator emergency stop.
    pub async fn halt(&self, reason: &str) -> Result<HaltTransition> {
        self.force_halt(HaltTrigger::Manual(reason.to_string())).await
    }

    /// Move to HALTED unless already there. An existing halt keeps its original reason.
    async fn force_halt(&self, trigger: HaltTrigger) -> Result<HaltTransition> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let prior = self.current().await?;
            if prior.is_halted() {
                info!(
                    existing = prior.reason_or_default(),
                    ignored = %trigger,
                    "already halted"
                );
                return Ok(HaltTransition::unchanged(prior));
            }

            let next = HaltState::halted(trigger.to_string(), self.clock.now());
            if self.swap(&prior, &next).await? {
                error!(reason = %trigger, "TRADING HALTED");
                return Ok(HaltTransition {
                    previous: prior,
                    current: next,
                });
            }
            warn!(attempt, "halt state changed concurrently; retrying halt");
        }

        Err(WardenError::StateConflict(
            "could not persist halt after repeated conflicts".into(),
        ))
    }

    /// Leave HALTED, but only if health and daily loss are within limits right now.
    pub async fn resume(&self) -> Result<HaltTransition> {
        let prior = self.current().await?;
        if !prior.is_halted() {
            return Ok(HaltTransition::unchanged(prior));
        }

        let health = self.health.snapshot();
        if let HealthVerdict::Unhealthy(detail) = self.policy.health.assess(&health) {
            warn!(detail = %detail, "resume refused: health still failing");
            return Ok(HaltTransition::unchanged(prior));
        }

        let account = self
            .health
            .observe(
                HealthCategory::State,
                "load_account_snapshot",
                self.io_timeout,
                self.store.load_account_snapshot(),
            )
            .await?;
        if let Some(account) = account {
            if account.breaches_daily_loss(self.policy.max_daily_loss) {
                warn!(
                    equity = %account.equity,
                    day_start_equity = %account.day_start_equity,
                    "resume refused: daily loss limit still breached"
                );
                return Ok(HaltTransition::unchanged(prior));
            }
        }

        let next = HaltState::running(self.clock.now());
        if self.swap(&prior, &next).await? {
            info!(previous_reason = prior.reason_or_default(), "trading resumed");
            return Ok(HaltTransition {
                previous: prior,
                current: next,
            });
        }

        warn!("resume lost a race with another halt writer");
        Ok(HaltTransition::unchanged(self.current().await?))
    }
}
