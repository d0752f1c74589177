//! State persistence
//!
//! The [`StateStore`] trait is the only way any component reads or writes
//! durable state:
//! - halt state (compare-and-set)
//! - cycle ids and the cycle audit log
//! - day-start equity, account snapshot, budget ledger, exposures
//! - queued operator resume requests

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::InMemoryStateStore;
pub use sqlite::SqliteStateStore;
pub use store::{ResumeRequest, StateStore};
