use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Global trading switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HaltStatus {
    /// Bots may be dispatched
    Running,
    /// No bot may place orders until an explicit, re-validated resume
    Halted,
}

impl HaltStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltStatus::Running => "RUNNING",
            HaltStatus::Halted => "HALTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(HaltStatus::Running),
            "HALTED" => Some(HaltStatus::Halted),
            _ => None,
        }
    }
}

impl std::fmt::Display for HaltStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The single authoritative halt state. Only the halt manager writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltState {
    pub status: HaltStatus,
    pub reason: Option<String>,
    pub set_at: DateTime<Utc>,
}

impl HaltState {
    pub fn running(at: DateTime<Utc>) -> Self {
        Self {
            status: HaltStatus::Running,
            reason: None,
            set_at: at.trunc_subsecs(6),
        }
    }

    pub fn halted(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: HaltStatus::Halted,
            reason: Some(reason.into()),
            set_at: at.trunc_subsecs(6),
        }
    }

    /// State of a store that has never been written.
    pub fn initial() -> Self {
        Self::running(DateTime::<Utc>::default())
    }

    pub fn is_halted(&self) -> bool {
        self.status == HaltStatus::Halted
    }

    pub fn reason_or_default(&self) -> &str {
        self.reason.as_deref().unwrap_or("unspecified")
    }
}

/// Why the halt manager moved to HALTED
#[derive(Debug, Clone, PartialEq)]
pub enum HaltTrigger {
    /// Rolling failure window breached
    Health(String),
    /// Drawdown from day-start equity reached the configured fraction
    DailyLoss {
        loss_fraction: rust_decimal::Decimal,
        limit: rust_decimal::Decimal,
    },
    /// A cycle phase failed systemically
    PhaseFailure { phase: String, error: String },
    /// Operator-requested stop
    Manual(String),
}

impl std::fmt::Display for HaltTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltTrigger::Health(detail) => write!(f, "health check failed: {}", detail),
            HaltTrigger::DailyLoss {
                loss_fraction,
                limit,
            } => write!(
                f,
                "daily loss limit reached: {}% >= {}%",
                (*loss_fraction * rust_decimal::Decimal::ONE_HUNDRED).round_dp(4).normalize(),
                (*limit * rust_decimal::Decimal::ONE_HUNDRED).round_dp(4).normalize()
            ),
            HaltTrigger::PhaseFailure { phase, error } => {
                write!(f, "cycle phase {} failed: {}", phase, error)
            }
            HaltTrigger::Manual(reason) => write!(f, "manual halt: {}", reason),
        }
    }
}
