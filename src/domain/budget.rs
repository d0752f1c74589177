use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::CycleId;

/// Capital a single bot may use during one cycle. Valid only for `cycle_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotBudget {
    pub bot_id: String,
    pub max_capital: Decimal,
    pub max_position_size: Decimal,
    pub cycle_id: CycleId,
}

impl BotBudget {
    pub fn zero(bot_id: impl Into<String>, cycle_id: CycleId) -> Self {
        Self {
            bot_id: bot_id.into(),
            max_capital: Decimal::ZERO,
            max_position_size: Decimal::ZERO,
            cycle_id,
        }
    }

    pub fn is_for(&self, cycle_id: CycleId) -> bool {
        self.cycle_id == cycle_id
    }

    pub fn is_zero(&self) -> bool {
        self.max_capital <= Decimal::ZERO
    }
}
