//! Execution gateway
//!
//! The only path from a bot to the broker.

pub mod gateway;

pub use gateway::{DispatchReport, ExecutionGateway};
