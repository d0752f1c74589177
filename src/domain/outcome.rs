use serde::{Deserialize, Serialize};

use super::CycleId;

/// Why a bot was not dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    Halted { reason: String },
    NoBudget,
    StaleBudget { budget_cycle: CycleId },
    ZeroBudget,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "disabled"),
            SkipReason::Halted { reason } => write!(f, "halted ({})", reason),
            SkipReason::NoBudget => write!(f, "no budget for this cycle"),
            SkipReason::StaleBudget { budget_cycle } => {
                write!(f, "budget belongs to cycle {}", budget_cycle)
            }
            SkipReason::ZeroBudget => write!(f, "zero budget"),
        }
    }
}

/// Why a dispatched bot did not finish cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// State store or broker unreachable before the strategy ran
    Preflight,
    /// The strategy hook returned an error
    Strategy,
    /// The dispatch exceeded the per-bot time limit
    Timeout,
    /// The strategy hook panicked
    Panicked,
    /// The dispatch task was cancelled
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Preflight => write!(f, "preflight"),
            FailureKind::Strategy => write!(f, "strategy"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Panicked => write!(f, "panicked"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of dispatching one bot in one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Skipped {
        reason: SkipReason,
    },
    Executed {
        intents: u32,
        submitted: u32,
        rejected: u32,
        failed: u32,
    },
    Failed {
        kind: FailureKind,
        detail: String,
    },
}

impl ExecutionOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        ExecutionOutcome::Skipped { reason }
    }

    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        ExecutionOutcome::Failed {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ExecutionOutcome::Failed { .. })
    }

    /// Orders the broker accepted during this dispatch
    pub fn submitted(&self) -> u32 {
        match self {
            ExecutionOutcome::Executed { submitted, .. } => *submitted,
            _ => 0,
        }
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            ExecutionOutcome::Executed {
                intents,
                submitted,
                rejected,
                failed,
            } => write!(
                f,
                "executed: {} intents, {} submitted, {} rejected, {} failed",
                intents, submitted, rejected, failed
            ),
            ExecutionOutcome::Failed { kind, detail } => write!(f, "failed: {}: {}", kind, detail),
        }
    }
}
