use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CycleId;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Equity,
    Option,
    Crypto,
}

/// What a bot wants to trade. Sized in currency (notional), not shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub bot_id: String,
    pub cycle_id: CycleId,
    pub ticker: String,
    pub side: OrderSide,
    pub asset_class: AssetClass,
    pub notional: Decimal,
    pub rationale: String,
}

impl OrderIntent {
    pub fn new(
        bot_id: &str,
        cycle_id: CycleId,
        ticker: &str,
        side: OrderSide,
        asset_class: AssetClass,
        notional: Decimal,
    ) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            bot_id: bot_id.to_string(),
            cycle_id,
            ticker: ticker.to_string(),
            side,
            asset_class,
            notional,
            rationale: String::new(),
        }
    }

    pub fn buy(
        bot_id: &str,
        cycle_id: CycleId,
        ticker: &str,
        asset_class: AssetClass,
        notional: Decimal,
    ) -> Self {
        Self::new(bot_id, cycle_id, ticker, OrderSide::Buy, asset_class, notional)
    }

    /// Reduce an existing long position by `notional`.
    pub fn sell(
        bot_id: &str,
        cycle_id: CycleId,
        ticker: &str,
        asset_class: AssetClass,
        notional: Decimal,
    ) -> Self {
        Self::new(bot_id, cycle_id, ticker, OrderSide::Sell, asset_class, notional)
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}

/// Broker acknowledgement for a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub client_order_id: String,
    pub broker_order_id: Option<String>,
    pub accepted: bool,
    pub message: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl OrderResult {
    pub fn accepted(intent: &OrderIntent, broker_order_id: String, at: DateTime<Utc>) -> Self {
        Self {
            client_order_id: intent.client_order_id.clone(),
            broker_order_id: Some(broker_order_id),
            accepted: true,
            message: None,
            submitted_at: at,
        }
    }

    pub fn rejected(intent: &OrderIntent, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            client_order_id: intent.client_order_id.clone(),
            broker_order_id: None,
            accepted: false,
            message: Some(message.into()),
            submitted_at: at,
        }
    }
}

/// What the broker did when asked to flatten the account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlattenReport {
    pub orders_cancelled: u32,
    pub positions_closed: u32,
}
