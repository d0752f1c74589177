//! Budget allocation
//!
//! Splits the day's remaining risk capital across enabled bots:
//! - available = equity * max_daily_risk - capital already at risk
//! - each bot's share is proportional to its weight
//! - each share is clamped to equity * max_position_size
//! - amounts are rounded down to cents; rounding remainders stay unallocated

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::RiskConfig;
use crate::domain::{BotBudget, CycleId};

/// Currency precision for budgets
const BUDGET_DP: u32 = 2;

fn round_down(amount: Decimal) -> Decimal {
    amount
        .max(Decimal::ZERO)
        .round_dp_with_strategy(BUDGET_DP, RoundingStrategy::ToZero)
}

#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_daily_risk: Decimal,
    pub max_position_size: Decimal,
}

impl RiskLimits {
    pub fn from_config(config: &RiskConfig) -> Self {
        Self {
            max_daily_risk: config.global_max_daily_risk,
            max_position_size: config.global_max_position_size,
        }
    }
}

/// One enabled bot as the allocator sees it
#[derive(Debug, Clone)]
pub struct AllocationInput {
    pub bot_id: String,
    pub weight: Decimal,
    /// Capital this bot already has at risk today
    pub exposure: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationPlan {
    pub cycle_id: CycleId,
    pub equity: Decimal,
    pub available: Decimal,
    pub per_bot_cap: Decimal,
    pub budgets: Vec<BotBudget>,
}

impl AllocationPlan {
    pub fn total_allocated(&self) -> Decimal {
        self.budgets.iter().map(|b| b.max_capital).sum()
    }

    pub fn unallocated(&self) -> Decimal {
        self.available - self.total_allocated()
    }

    pub fn budget_for(&self, bot_id: &str) -> Option<&BotBudget> {
        self.budgets.iter().find(|b| b.bot_id == bot_id)
    }
}

pub struct BudgetAllocator {
    limits: RiskLimits,
}

impl BudgetAllocator {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Deterministic: same inputs always give the same plan.
    pub fn allocate(
        &self,
        cycle_id: CycleId,
        equity: Decimal,
        bots: &[AllocationInput],
    ) -> AllocationPlan {
        let equity = equity.max(Decimal::ZERO);
        let at_risk: Decimal = bots.iter().map(|b| b.exposure.abs()).sum();
        let available = round_down(equity * self.limits.max_daily_risk - at_risk);
        let per_bot_cap = round_down(equity * self.limits.max_position_size);

        let total_weight: Decimal = bots.iter().map(|b| b.weight.max(Decimal::ZERO)).sum();
        // Weights summing below one leave the rest unallocated.
        let divisor = total_weight.max(Decimal::ONE);

        let mut budgets: Vec<BotBudget> = bots
            .iter()
            .map(|bot| {
                if available <= Decimal::ZERO || total_weight <= Decimal::ZERO {
                    return BotBudget::zero(bot.bot_id.clone(), cycle_id);
                }
                let share = available * bot.weight.max(Decimal::ZERO) / divisor;
                let max_capital = round_down(share.min(per_bot_cap));
                BotBudget {
                    bot_id: bot.bot_id.clone(),
                    max_capital,
                    max_position_size: max_capital.min(per_bot_cap),
                    cycle_id,
                }
            })
            .collect();

        // Guard against division rounding pushing the sum past the pool.
        let mut excess: Decimal = budgets.iter().map(|b| b.max_capital).sum::<Decimal>() - available;
        for budget in budgets.iter_mut().rev() {
            if excess <= Decimal::ZERO {
                break;
            }
            let cut = excess.min(budget.max_capital);
            budget.max_capital -= cut;
            budget.max_position_size = budget.max_position_size.min(budget.max_capital);
            excess -= cut;
        }

        let plan = AllocationPlan {
            cycle_id,
            equity,
            available,
            per_bot_cap,
            budgets,
        };

        for budget in &plan.budgets {
            debug!(
                cycle_id = %cycle_id,
                bot_id = %budget.bot_id,
                max_capital = %budget.max_capital,
                max_position_size = %budget.max_position_size,
                "budget allocated"
            );
        }
        info!(
            cycle_id = %cycle_id,
            equity = %equity,
            available = %plan.available,
            allocated = %plan.total_allocated(),
            bots = plan.budgets.len(),
            "allocation complete"
        );

        plan
    }
}
