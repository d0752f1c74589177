//! Trading bots
//!
//! A bot turns signals into order intents sized within the budget it was
//! handed for the cycle. Bots never talk to the broker; the execution
//! gateway validates and forwards what they return.

pub mod crypto;
pub mod momentum;
pub mod options;
pub mod signal;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use crate::config::{BotConfig, BotKind};
use crate::domain::{AssetClass, BotBudget, CycleId, Exposures, OrderIntent};
use crate::error::Result;

pub use crypto::CryptoBot;
pub use momentum::MomentumBot;
pub use options::OptionsBot;
pub use signal::{NeutralSignals, Signal, SignalSource, StaticSignals};

/// Smallest order worth sending
pub const MIN_ORDER_NOTIONAL: Decimal = dec!(1.00);

/// What a bot gets to see when asked to trade
#[derive(Debug, Clone)]
pub struct BotContext {
    pub cycle_id: CycleId,
    pub budget: BotBudget,
    /// Current exposure for this bot's tickers only
    pub positions: Exposures,
}

impl BotContext {
    pub fn open_positions(&self) -> usize {
        self.positions.values().filter(|v| **v > Decimal::ZERO).count()
    }

    pub fn holds(&self, ticker: &str) -> bool {
        self.positions
            .get(ticker)
            .map(|v| *v > Decimal::ZERO)
            .unwrap_or(false)
    }
}

#[async_trait]
pub trait TradingBot: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> BotKind;

    fn tickers(&self) -> &[String];

    /// Produce order intents for this cycle. Must stay within `ctx.budget`.
    async fn budget_aware_execute(&self, ctx: &BotContext) -> Result<Vec<OrderIntent>>;
}

/// A configured bot with its dispatch settings
#[derive(Clone)]
pub struct BotSlot {
    pub bot: Arc<dyn TradingBot>,
    pub enabled: bool,
    pub weight: Decimal,
}

impl BotSlot {
    pub fn id(&self) -> &str {
        self.bot.id()
    }
}

/// Per-bot limits on how many entries it may open
#[derive(Debug, Clone, Copy)]
pub struct EntryRules {
    pub max_new_entries_per_cycle: u32,
    pub max_concurrent_positions: u32,
}

impl EntryRules {
    fn from_config(config: &BotConfig, defaults: EntryRules) -> Self {
        Self {
            max_new_entries_per_cycle: config
                .max_new_entries_per_cycle
                .unwrap_or(defaults.max_new_entries_per_cycle),
            max_concurrent_positions: config
                .max_concurrent_positions
                .unwrap_or(defaults.max_concurrent_positions),
        }
    }
}

/// Size entries for `candidates` in order, within budget and entry rules.
pub fn plan_entries(
    bot_id: &str,
    asset_class: AssetClass,
    ctx: &BotContext,
    candidates: &[String],
    rules: EntryRules,
    rationale: &str,
) -> Vec<OrderIntent> {
    let open = ctx.open_positions() as u32;
    let slots = rules
        .max_concurrent_positions
        .saturating_sub(open)
        .min(rules.max_new_entries_per_cycle) as usize;

    let mut remaining = ctx.budget.max_capital;
    let mut intents = Vec::new();
    for ticker in candidates.iter().take(slots) {
        let notional = ctx.budget.max_position_size.min(remaining);
        if notional < MIN_ORDER_NOTIONAL {
            break;
        }
        remaining -= notional;
        intents.push(
            OrderIntent::buy(bot_id, ctx.cycle_id, ticker, asset_class, notional)
                .with_rationale(rationale),
        );
    }
    intents
}

/// Tickers without an open position that the signal source says to enter
async fn entry_candidates(
    bot_id: &str,
    tickers: &[String],
    ctx: &BotContext,
    signals: &dyn SignalSource,
) -> Result<Vec<String>> {
    let mut candidates = Vec::new();
    for ticker in tickers {
        if ctx.holds(ticker) {
            continue;
        }
        if signals.signal(bot_id, ticker).await? == Signal::Enter {
            candidates.push(ticker.clone());
        }
    }
    Ok(candidates)
}

/// Build every configured bot, enabled or not.
pub fn build_bots(configs: &[BotConfig], signals: Arc<dyn SignalSource>) -> Vec<BotSlot> {
    configs
        .iter()
        .map(|config| {
            let bot: Arc<dyn TradingBot> = match config.kind {
                BotKind::Momentum => Arc::new(MomentumBot::new(config, signals.clone())),
                BotKind::Options => Arc::new(OptionsBot::new(config, signals.clone())),
                BotKind::Crypto => Arc::new(CryptoBot::new(config, signals.clone())),
            };
            BotSlot {
                bot,
                enabled: config.enabled,
                weight: config.weight,
            }
        })
        .collect()
}
