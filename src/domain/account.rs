use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current exposure (absolute market value) per ticker
pub type Exposures = BTreeMap<String, Decimal>;

/// Broker-side account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Restricted,
    Closed,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountStatus::Active => write!(f, "ACTIVE"),
            AccountStatus::Restricted => write!(f, "RESTRICTED"),
            AccountStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Raw account figures as reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub equity: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub status: AccountStatus,
}

/// Account state captured once per cycle during Initialize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
    /// Equity recorded at the first cycle of `trading_day`
    pub day_start_equity: Decimal,
    pub trading_day: NaiveDate,
    pub captured_at: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn from_info(
        info: &AccountInfo,
        day_start_equity: Decimal,
        trading_day: NaiveDate,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            equity: info.equity,
            cash: info.cash,
            buying_power: info.buying_power,
            day_start_equity,
            trading_day,
            captured_at,
        }
    }

    /// Drawdown since day start, in currency. Gains count as zero loss.
    pub fn daily_loss(&self) -> Decimal {
        (self.day_start_equity - self.equity).max(Decimal::ZERO)
    }

    /// Drawdown since day start as a fraction of day-start equity.
    pub fn daily_loss_fraction(&self) -> Decimal {
        if self.day_start_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.daily_loss() / self.day_start_equity
    }

    /// Whether the drawdown has reached `max_daily_loss` (a fraction of day-start equity).
    pub fn breaches_daily_loss(&self, max_daily_loss: Decimal) -> bool {
        // Compare in currency so the boundary is exact: 100000 * 0.02 = 2000
        self.daily_loss() >= self.day_start_equity * max_daily_loss
    }
}
