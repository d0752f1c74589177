use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{entry_candidates, plan_entries, BotContext, EntryRules, SignalSource, TradingBot};
use crate::config::{BotConfig, BotKind};
use crate::domain::{AssetClass, OrderIntent};
use crate::error::Result;

const DEFAULT_RULES: EntryRules = EntryRules {
    max_new_entries_per_cycle: 2,
    max_concurrent_positions: 2,
};

/// Round-the-clock crypto pairs, capped at two new trades per cycle.
pub struct CryptoBot {
    id: String,
    pairs: Vec<String>,
    rules: EntryRules,
    signals: Arc<dyn SignalSource>,
}

impl CryptoBot {
    pub fn new(config: &BotConfig, signals: Arc<dyn SignalSource>) -> Self {
        Self {
            id: config.id.clone(),
            pairs: config.tickers.clone(),
            rules: EntryRules::from_config(config, DEFAULT_RULES),
            signals,
        }
    }
}

#[async_trait]
impl TradingBot for CryptoBot {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> BotKind {
        BotKind::Crypto
    }

    fn tickers(&self) -> &[String] {
        &self.pairs
    }

    async fn budget_aware_execute(&self, ctx: &BotContext) -> Result<Vec<OrderIntent>> {
        let candidates = entry_candidates(&self.id, &self.pairs, ctx, self.signals.as_ref()).await?;
        debug!(
            bot_id = %self.id,
            candidates = candidates.len(),
            open = ctx.open_positions(),
            "crypto candidates"
        );
        Ok(plan_entries(
            &self.id,
            AssetClass::Crypto,
            ctx,
            &candidates,
            self.rules,
            "crypto entry",
        ))
    }
}
