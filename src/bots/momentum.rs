use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{entry_candidates, plan_entries, BotContext, EntryRules, SignalSource, TradingBot};
use crate::config::{BotConfig, BotKind};
use crate::domain::{AssetClass, OrderIntent};
use crate::error::Result;

/// Equity momentum: at most one position per ticker.
pub struct MomentumBot {
    id: String,
    tickers: Vec<String>,
    rules: EntryRules,
    signals: Arc<dyn SignalSource>,
}

impl MomentumBot {
    pub fn new(config: &BotConfig, signals: Arc<dyn SignalSource>) -> Self {
        let per_ticker = config.tickers.len() as u32;
        Self {
            id: config.id.clone(),
            tickers: config.tickers.clone(),
            rules: EntryRules::from_config(
                config,
                EntryRules {
                    max_new_entries_per_cycle: per_ticker,
                    max_concurrent_positions: per_ticker,
                },
            ),
            signals,
        }
    }
}

#[async_trait]
impl TradingBot for MomentumBot {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> BotKind {
        BotKind::Momentum
    }

    fn tickers(&self) -> &[String] {
        &self.tickers
    }

    async fn budget_aware_execute(&self, ctx: &BotContext) -> Result<Vec<OrderIntent>> {
        let candidates = entry_candidates(&self.id, &self.tickers, ctx, self.signals.as_ref()).await?;
        debug!(bot_id = %self.id, candidates = candidates.len(), "momentum candidates");
        Ok(plan_entries(
            &self.id,
            AssetClass::Equity,
            ctx,
            &candidates,
            self.rules,
            "momentum entry",
        ))
    }
}
