use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{entry_candidates, plan_entries, BotContext, EntryRules, SignalSource, TradingBot};
use crate::config::{BotConfig, BotKind};
use crate::domain::{AssetClass, OrderIntent};
use crate::error::Result;

const DEFAULT_RULES: EntryRules = EntryRules {
    max_new_entries_per_cycle: 1,
    max_concurrent_positions: 2,
};

/// Defined-risk option structures. The notional is the premium at risk.
pub struct OptionsBot {
    id: String,
    underlyings: Vec<String>,
    rules: EntryRules,
    signals: Arc<dyn SignalSource>,
}

impl OptionsBot {
    pub fn new(config: &BotConfig, signals: Arc<dyn SignalSource>) -> Self {
        Self {
            id: config.id.clone(),
            underlyings: config.tickers.clone(),
            rules: EntryRules::from_config(config, DEFAULT_RULES),
            signals,
        }
    }
}

#[async_trait]
impl TradingBot for OptionsBot {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> BotKind {
        BotKind::Options
    }

    fn tickers(&self) -> &[String] {
        &self.underlyings
    }

    async fn budget_aware_execute(&self, ctx: &BotContext) -> Result<Vec<OrderIntent>> {
        let candidates =
            entry_candidates(&self.id, &self.underlyings, ctx, self.signals.as_ref()).await?;
        debug!(bot_id = %self.id, candidates = candidates.len(), "options candidates");
        Ok(plan_entries(
            &self.id,
            AssetClass::Option,
            ctx,
            &candidates,
            self.rules,
            "defined-risk spread",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::StaticSignals;
    use crate::domain::{BotBudget, CycleId};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_one_structure_per_cycle_and_skips_held_underlying() {
        let config = BotConfig {
            id: "opts".into(),
            kind: BotKind::Options,
            enabled: true,
            weight: dec!(1),
            tickers: vec!["SPY".into(), "QQQ".into(), "IWM".into()],
            max_new_entries_per_cycle: None,
            max_concurrent_positions: None,
        };
        let bot = OptionsBot::new(&config, Arc::new(StaticSignals::entering(["SPY", "QQQ"])));
        let ctx = BotContext {
            cycle_id: CycleId(5),
            budget: BotBudget {
                bot_id: "opts".into(),
                max_capital: dec!(2000),
                max_position_size: dec!(750),
                cycle_id: CycleId(5),
            },
            positions: [("SPY".to_string(), dec!(400))].into_iter().collect(),
        };

        let intents = bot.budget_aware_execute(&ctx).await.unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].ticker, "QQQ");
        assert_eq!(intents[0].notional, dec!(750));
        assert_eq!(intents[0].asset_class, AssetClass::Option);
    }
}
