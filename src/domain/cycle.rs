use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ExecutionOutcome;

/// Monotonically increasing cycle number, allocated by the state store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(pub u64);

impl CycleId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cycle phases, always entered in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Initialize,
    HealthAndHalt,
    Allocate,
    Execute,
    Finalize,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Initialize => "initialize",
            CyclePhase::HealthAndHalt => "health_and_halt",
            CyclePhase::Allocate => "allocate",
            CyclePhase::Execute => "execute",
            CyclePhase::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// All phases ran; bots may have been skipped or failed individually
    Completed,
    /// Trading was halted for this cycle; no bot was dispatched
    Halted,
    /// A phase failed systemically
    Errored,
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleOutcome::Completed => write!(f, "completed"),
            CycleOutcome::Halted => write!(f, "halted"),
            CycleOutcome::Errored => write!(f, "errored"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotOutcomeRecord {
    pub bot_id: String,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
}

/// Audit record of one cycle. Appended once, during Finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_id: CycleId,
    /// Identifies the process instance that ran the cycle
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phases_completed: Vec<CyclePhase>,
    pub outcome: CycleOutcome,
    pub failed_phase: Option<CyclePhase>,
    pub error: Option<String>,
    pub halt_reason: Option<String>,
    pub equity: Option<Decimal>,
    pub bots: Vec<BotOutcomeRecord>,
    pub status: String,
}

impl CycleRecord {
    pub fn start(cycle_id: CycleId, run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            run_id,
            started_at,
            finished_at: None,
            phases_completed: Vec::new(),
            // Pessimistic until finish() has run
            outcome: CycleOutcome::Errored,
            failed_phase: None,
            error: None,
            halt_reason: None,
            equity: None,
            bots: Vec::new(),
            status: String::new(),
        }
    }

    pub fn complete_phase(&mut self, phase: CyclePhase) {
        if !self.phases_completed.contains(&phase) {
            self.phases_completed.push(phase);
        }
    }

    pub fn fail(&mut self, phase: CyclePhase, error: impl Into<String>) {
        // Keep the first failure; later ones are consequences.
        if self.failed_phase.is_none() {
            self.failed_phase = Some(phase);
            self.error = Some(error.into());
        }
    }

    pub fn mark_halted(&mut self, reason: impl Into<String>) {
        self.halt_reason = Some(reason.into());
    }

    pub fn record_bot(&mut self, bot_id: impl Into<String>, outcome: ExecutionOutcome) {
        self.bots.push(BotOutcomeRecord {
            bot_id: bot_id.into(),
            outcome,
        });
    }

    pub fn bots_executed(&self) -> usize {
        self.bots.iter().filter(|b| b.outcome.is_executed()).count()
    }

    pub fn bots_failed(&self) -> usize {
        self.bots.iter().filter(|b| b.outcome.is_failed()).count()
    }

    pub fn orders_submitted(&self) -> u32 {
        self.bots.iter().map(|b| b.outcome.submitted()).sum()
    }

    /// Settle the outcome and status line.
    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
        self.outcome = if self.failed_phase.is_some() {
            CycleOutcome::Errored
        } else if self.halt_reason.is_some() {
            CycleOutcome::Halted
        } else {
            CycleOutcome::Completed
        };
        self.status = self.summary();
    }

    fn summary(&self) -> String {
        match self.outcome {
            CycleOutcome::Errored => format!(
                "ERROR: {}: {}",
                self.failed_phase
                    .map(|p| p.as_str())
                    .unwrap_or("unknown"),
                self.error.as_deref().unwrap_or("unknown error")
            ),
            CycleOutcome::Halted => format!(
                "HALTED: {}",
                self.halt_reason.as_deref().unwrap_or("unspecified")
            ),
            CycleOutcome::Completed => {
                let executed = self.bots_executed();
                let failed = self.bots_failed();
                if failed > 0 {
                    format!("PARTIAL: {} executed, {} failed", executed, failed)
                } else if executed == 0 {
                    "SKIPPED: no bots executed".to_string()
                } else {
                    format!("OK: {} bots executed", executed)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailureKind, SkipReason};

    fn record() -> CycleRecord {
        CycleRecord::start(CycleId(7), Uuid::new_v4(), Utc::now())
    }

    fn executed() -> ExecutionOutcome {
        ExecutionOutcome::Executed {
            intents: 1,
            submitted: 1,
            rejected: 0,
            failed: 0,
        }
    }

    #[test]
    fn test_completed_summary() {
        let mut rec = record();
        rec.record_bot("a", executed());
        rec.record_bot("b", ExecutionOutcome::skipped(SkipReason::Disabled));
        rec.finish(Utc::now());
        assert_eq!(rec.outcome, CycleOutcome::Completed);
        assert_eq!(rec.status, "OK: 1 bots executed");
        assert_eq!(rec.orders_submitted(), 1);
    }

    #[test]
    fn test_partial_summary_keeps_completed_outcome() {
        let mut rec = record();
        rec.record_bot("a", executed());
        rec.record_bot("b", ExecutionOutcome::failed(FailureKind::Strategy, "boom"));
        rec.finish(Utc::now());
        assert_eq!(rec.outcome, CycleOutcome::Completed);
        assert_eq!(rec.status, "PARTIAL: 1 executed, 1 failed");
    }

    #[test]
    fn test_error_wins_over_halt() {
        let mut rec = record();
        rec.mark_halted("health check failed");
        rec.fail(CyclePhase::Allocate, "store unavailable");
        rec.fail(CyclePhase::Finalize, "second failure");
        rec.finish(Utc::now());
        assert_eq!(rec.outcome, CycleOutcome::Errored);
        assert_eq!(rec.failed_phase, Some(CyclePhase::Allocate));
        assert_eq!(rec.status, "ERROR: allocate: store unavailable");
    }

    #[test]
    fn test_halted_summary() {
        let mut rec = record();
        rec.mark_halted("daily loss limit reached");
        rec.finish(Utc::now());
        assert_eq!(rec.outcome, CycleOutcome::Halted);
        assert_eq!(rec.status, "HALTED: daily loss limit reached");
    }

    #[test]
    fn test_no_bots_summary() {
        let mut rec = record();
        rec.finish(Utc::now());
        assert_eq!(rec.status, "SKIPPED: no bots executed");
    }

    #[test]
    fn test_record_serializes_bot_outcomes_flat() {
        let mut rec = record();
        rec.record_bot("a", ExecutionOutcome::skipped(SkipReason::ZeroBudget));
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["bots"][0]["bot_id"], "a");
        assert_eq!(json["bots"][0]["outcome"], "skipped");
        assert_eq!(json["bots"][0]["reason"]["kind"], "zero_budget");
        let back: CycleRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }
}
