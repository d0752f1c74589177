use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bots::{BotContext, BotSlot};
use crate::broker::BrokerClient;
use crate::domain::{
    BotBudget, CycleId, ExecutionOutcome, Exposures, FailureKind, OrderIntent, OrderResult,
    OrderSide, SkipReason,
};
use crate::health::{HealthCategory, HealthMonitor};
use crate::persistence::StateStore;

/// Everything the orchestrator needs to know about one dispatch
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub bot_id: String,
    pub outcome: ExecutionOutcome,
    /// Capital at risk for this bot after the dispatch, when positions could be read
    pub exposure: Option<Decimal>,
    pub orders: Vec<OrderResult>,
}

impl DispatchReport {
    pub fn new(bot_id: &str, outcome: ExecutionOutcome) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            outcome,
            exposure: None,
            orders: Vec::new(),
        }
    }

    fn with_exposure(mut self, exposure: Decimal) -> Self {
        self.exposure = Some(exposure);
        self
    }
}

pub struct ExecutionGateway {
    store: Arc<dyn StateStore>,
    broker: Arc<dyn BrokerClient>,
    health: Arc<HealthMonitor>,
    io_timeout: Duration,
}

impl ExecutionGateway {
    pub fn new(
        store: Arc<dyn StateStore>,
        broker: Arc<dyn BrokerClient>,
        health: Arc<HealthMonitor>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            health,
            io_timeout,
        }
    }

    /// Run one bot for `cycle_id`.
    ///
    /// Checks, in order: enabled, halt state (read from the store, which also
    /// proves it is reachable), budget present/current/non-zero, broker
    /// reachable. Only then is the strategy hook called, and every intent it
    /// returns is checked before it reaches the broker: buys against the
    /// budget, sells against the bot's open positions.
    pub async fn dispatch(
        &self,
        slot: &BotSlot,
        budget: Option<&BotBudget>,
        cycle_id: CycleId,
    ) -> DispatchReport {
        let bot_id = slot.id();

        if !slot.enabled {
            return DispatchReport::new(bot_id, ExecutionOutcome::skipped(SkipReason::Disabled));
        }

        let halt = match self
            .health
            .observe(
                HealthCategory::State,
                "load_halt",
                self.io_timeout,
                self.store.load_halt(),
            )
            .await
        {
            Ok(halt) => halt,
            Err(e) => {
                return DispatchReport::new(
                    bot_id,
                    ExecutionOutcome::failed(
                        FailureKind::Preflight,
                        format!("state store unreachable: {}", e),
                    ),
                )
            }
        };
        if halt.is_halted() {
            return DispatchReport::new(
                bot_id,
                ExecutionOutcome::skipped(SkipReason::Halted {
                    reason: halt.reason_or_default().to_string(),
                }),
            );
        }

        let budget = match budget {
            None => {
                return DispatchReport::new(bot_id, ExecutionOutcome::skipped(SkipReason::NoBudget))
            }
            Some(b) if !b.is_for(cycle_id) || b.bot_id != bot_id => {
                return DispatchReport::new(
                    bot_id,
                    ExecutionOutcome::skipped(SkipReason::StaleBudget {
                        budget_cycle: b.cycle_id,
                    }),
                )
            }
            Some(b) if b.is_zero() => {
                return DispatchReport::new(bot_id, ExecutionOutcome::skipped(SkipReason::ZeroBudget))
            }
            Some(b) => b,
        };

        let positions = match self
            .health
            .observe(
                HealthCategory::Broker,
                "get_positions",
                self.io_timeout,
                self.broker.get_positions(),
            )
            .await
        {
            Ok(positions) => positions,
            Err(e) => {
                return DispatchReport::new(
                    bot_id,
                    ExecutionOutcome::failed(
                        FailureKind::Preflight,
                        format!("broker unreachable: {}", e),
                    ),
                )
            }
        };

        let tickers: HashSet<&str> = slot.bot.tickers().iter().map(String::as_str).collect();
        let own: Exposures = positions
            .into_iter()
            .filter(|(ticker, _)| tickers.contains(ticker.as_str()))
            .collect();
        let exposure_before: Decimal = own.values().map(|v| v.abs()).sum();
        let mut held = own.clone();

        let ctx = BotContext {
            cycle_id,
            budget: budget.clone(),
            positions: own,
        };

        let intents = match slot.bot.budget_aware_execute(&ctx).await {
            Ok(intents) => intents,
            Err(e) => {
                warn!(bot_id = %bot_id, cycle_id = %cycle_id, error = %e, "strategy hook failed");
                self.health.record_strategy_failure(bot_id);
                return DispatchReport::new(
                    bot_id,
                    ExecutionOutcome::failed(FailureKind::Strategy, e.to_string()),
                )
                .with_exposure(exposure_before);
            }
        };

        let mut committed = Decimal::ZERO;
        let mut submitted = 0u32;
        let mut rejected = 0u32;
        let mut failed = 0u32;
        let mut added_exposure = Decimal::ZERO;
        let mut released_exposure = Decimal::ZERO;
        let mut orders = Vec::new();

        for intent in &intents {
            if let Err(reason) =
                check_intent(intent, bot_id, cycle_id, &tickers, budget, committed, &held)
            {
                warn!(
                    bot_id = %bot_id,
                    cycle_id = %cycle_id,
                    ticker = %intent.ticker,
                    notional = %intent.notional,
                    reason = %reason,
                    "order intent rejected"
                );
                rejected += 1;
                continue;
            }
            if intent.side == OrderSide::Buy {
                committed += intent.notional;
            }

            match self
                .health
                .observe(
                    HealthCategory::Broker,
                    "submit_order",
                    self.io_timeout,
                    self.broker.submit_order(intent),
                )
                .await
            {
                Ok(result) if result.accepted => {
                    submitted += 1;
                    match intent.side {
                        OrderSide::Buy => added_exposure += intent.notional,
                        OrderSide::Sell => {
                            let position = held.entry(intent.ticker.clone()).or_default();
                            let closed = intent.notional.min(*position);
                            *position -= closed;
                            released_exposure += closed;
                        }
                    }
                    orders.push(result);
                }
                Ok(result) => {
                    info!(
                        bot_id = %bot_id,
                        ticker = %intent.ticker,
                        message = result.message.as_deref().unwrap_or(""),
                        "order rejected by broker"
                    );
                    rejected += 1;
                    orders.push(result);
                }
                Err(e) => {
                    warn!(bot_id = %bot_id, ticker = %intent.ticker, error = %e, "order submission failed");
                    failed += 1;
                }
            }
        }

        let outcome = ExecutionOutcome::Executed {
            intents: intents.len() as u32,
            submitted,
            rejected,
            failed,
        };
        debug!(bot_id = %bot_id, cycle_id = %cycle_id, outcome = %outcome, "dispatch finished");

        let exposure = (exposure_before + added_exposure - released_exposure).max(Decimal::ZERO);
        DispatchReport {
            bot_id: bot_id.to_string(),
            outcome,
            exposure: Some(exposure),
            orders,
        }
    }
}

/// Rules every intent must satisfy before it may be sent. Only buys draw on
/// the budget; a sell must reduce a long position the bot holds.
fn check_intent(
    intent: &OrderIntent,
    bot_id: &str,
    cycle_id: CycleId,
    tickers: &HashSet<&str>,
    budget: &BotBudget,
    committed: Decimal,
    held: &Exposures,
) -> std::result::Result<(), String> {
    if intent.bot_id != bot_id {
        return Err(format!("intent belongs to bot {}", intent.bot_id));
    }
    if intent.cycle_id != cycle_id {
        return Err(format!("intent built for cycle {}", intent.cycle_id));
    }
    if !tickers.contains(intent.ticker.as_str()) {
        return Err("ticker not configured for this bot".into());
    }
    if intent.notional <= Decimal::ZERO {
        return Err("notional must be positive".into());
    }
    if intent.side == OrderSide::Sell {
        let position = held.get(&intent.ticker).copied().unwrap_or_default();
        if position <= Decimal::ZERO {
            return Err(format!("no open position in {} to sell", intent.ticker));
        }
        return Ok(());
    }
    if intent.notional > budget.max_position_size {
        return Err(format!(
            "notional {} exceeds max position size {}",
            intent.notional, budget.max_position_size
        ));
    }
    if committed + intent.notional > budget.max_capital {
        return Err(format!(
            "cumulative notional {} exceeds budget {}",
            committed + intent.notional,
            budget.max_capital
        ));
    }
    Ok(())
}
