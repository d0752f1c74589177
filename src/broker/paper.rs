//! In-memory paper broker
//!
//! Fills every accepted order immediately at its notional. Positions are
//! carried at cost unless re-marked with [`PaperBroker::mark`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::BrokerClient;
use crate::clock::Clock;
use crate::domain::{
    AccountInfo, AccountStatus, Exposures, FlattenReport, OrderIntent, OrderResult, OrderSide,
};
use crate::error::Result;

#[derive(Debug)]
struct PaperState {
    cash: Decimal,
    positions: BTreeMap<String, Decimal>,
    next_order_id: u64,
    filled: Vec<OrderIntent>,
}

pub struct PaperBroker {
    state: RwLock<PaperState>,
    clock: Arc<dyn Clock>,
}

impl PaperBroker {
    pub fn new(starting_cash: Decimal, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(PaperState {
                cash: starting_cash,
                positions: BTreeMap::new(),
                next_order_id: 1,
                filled: Vec::new(),
            }),
            clock,
        }
    }

    /// Re-mark a position to a new market value.
    pub async fn mark(&self, ticker: &str, market_value: Decimal) {
        let mut state = self.state.write().await;
        if let Some(value) = state.positions.get_mut(ticker) {
            *value = market_value.max(Decimal::ZERO);
        }
    }

    pub async fn filled_orders(&self) -> Vec<OrderIntent> {
        self.state.read().await.filled.clone()
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn get_account(&self) -> Result<AccountInfo> {
        let state = self.state.read().await;
        let equity = state.cash + state.positions.values().copied().sum::<Decimal>();
        Ok(AccountInfo {
            equity,
            cash: state.cash,
            buying_power: state.cash,
            status: AccountStatus::Active,
        })
    }

    async fn get_positions(&self) -> Result<Exposures> {
        Ok(self.state.read().await.positions.clone())
    }

    async fn submit_order(&self, intent: &OrderIntent) -> Result<OrderResult> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        if intent.notional <= Decimal::ZERO {
            return Ok(OrderResult::rejected(intent, "notional must be positive", now));
        }

        match intent.side {
            OrderSide::Buy => {
                if intent.notional > state.cash {
                    return Ok(OrderResult::rejected(intent, "insufficient cash", now));
                }
                state.cash -= intent.notional;
                *state.positions.entry(intent.ticker.clone()).or_insert(Decimal::ZERO) +=
                    intent.notional;
            }
            OrderSide::Sell => {
                let held = state.positions.get(&intent.ticker).copied().unwrap_or_default();
                if held <= Decimal::ZERO {
                    return Ok(OrderResult::rejected(intent, "no position to sell", now));
                }
                let sold = intent.notional.min(held);
                state.cash += sold;
                if sold == held {
                    state.positions.remove(&intent.ticker);
                } else {
                    state.positions.insert(intent.ticker.clone(), held - sold);
                }
            }
        }

        let order_id = format!("paper-{}", state.next_order_id);
        state.next_order_id += 1;
        state.filled.push(intent.clone());
        debug!(
            order_id = %order_id,
            bot_id = %intent.bot_id,
            ticker = %intent.ticker,
            side = %intent.side,
            notional = %intent.notional,
            "paper fill"
        );

        Ok(OrderResult::accepted(intent, order_id, now))
    }

    async fn flatten(&self) -> Result<FlattenReport> {
        let mut state = self.state.write().await;
        let closed = state.positions.len() as u32;
        let proceeds: Decimal = state.positions.values().copied().sum();
        state.cash += proceeds;
        state.positions.clear();
        info!(positions_closed = closed, proceeds = %proceeds, "paper account flattened");
        Ok(FlattenReport {
            orders_cancelled: 0,
            positions_closed: closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::domain::{AssetClass, CycleId};
    use rust_decimal_macros::dec;

    fn broker() -> PaperBroker {
        PaperBroker::new(dec!(10000), Arc::new(SystemClock::new()))
    }

    #[tokio::test]
    async fn test_buy_moves_cash_into_position() {
        let broker = broker();
        let intent = OrderIntent::buy("mom", CycleId(1), "AAPL", AssetClass::Equity, dec!(2500));
        let result = broker.submit_order(&intent).await.unwrap();
        assert!(result.accepted);

        let account = broker.get_account().await.unwrap();
        assert_eq!(account.cash, dec!(7500));
        assert_eq!(account.equity, dec!(10000));
        assert_eq!(broker.get_positions().await.unwrap()["AAPL"], dec!(2500));
    }

    #[tokio::test]
    async fn test_rejects_when_cash_short() {
        let broker = broker();
        let intent = OrderIntent::buy("mom", CycleId(1), "AAPL", AssetClass::Equity, dec!(10001));
        let result = broker.submit_order(&intent).await.unwrap();
        assert!(!result.accepted);
        assert!(broker.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_changes_equity_and_flatten_closes() {
        let broker = broker();
        let intent = OrderIntent::buy("mom", CycleId(1), "AAPL", AssetClass::Equity, dec!(4000));
        broker.submit_order(&intent).await.unwrap();
        broker.mark("AAPL", dec!(3000)).await;
        assert_eq!(broker.get_account().await.unwrap().equity, dec!(9000));

        let report = broker.flatten().await.unwrap();
        assert_eq!(report.positions_closed, 1);
        let account = broker.get_account().await.unwrap();
        assert_eq!(account.cash, dec!(9000));
        assert!(broker.get_positions().await.unwrap().is_empty());
    }
}
