//! Rolling record of external-call outcomes

pub mod monitor;

pub use monitor::*;
