//! Broker boundary
//!
//! The orchestrator only ever talks to a broker through [`BrokerClient`].
//! Every call is wrapped in a timeout and recorded in the health monitor by
//! the caller.

pub mod paper;

use async_trait::async_trait;

use crate::domain::{AccountInfo, Exposures, FlattenReport, OrderIntent, OrderResult};
use crate::error::Result;

pub use paper::PaperBroker;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn get_account(&self) -> Result<AccountInfo>;

    /// Exposure (absolute market value) per ticker
    async fn get_positions(&self) -> Result<Exposures>;

    /// A broker-side rejection is `Ok` with `accepted == false`; `Err` means
    /// the call itself failed.
    async fn submit_order(&self, intent: &OrderIntent) -> Result<OrderResult>;

    /// Cancel open orders and close all positions.
    async fn flatten(&self) -> Result<FlattenReport>;
}
