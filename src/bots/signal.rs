use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Enter,
    Hold,
}

/// Where bots get their entry decisions from. Strategy research plugs in here.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn signal(&self, bot_id: &str, ticker: &str) -> Result<Signal>;
}

/// Never enters. Keeps the loop exercised without trading.
#[derive(Debug, Default)]
pub struct NeutralSignals;

#[async_trait]
impl SignalSource for NeutralSignals {
    async fn signal(&self, _bot_id: &str, _ticker: &str) -> Result<Signal> {
        Ok(Signal::Hold)
    }
}

/// Enters a fixed set of tickers every time it is asked
#[derive(Debug, Default)]
pub struct StaticSignals {
    enter: HashSet<String>,
}

impl StaticSignals {
    pub fn entering<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enter: tickers.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl SignalSource for StaticSignals {
    async fn signal(&self, _bot_id: &str, ticker: &str) -> Result<Signal> {
        Ok(if self.enter.contains(ticker) {
            Signal::Enter
        } else {
            Signal::Hold
        })
    }
}
