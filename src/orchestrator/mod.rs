//! Orchestrator
//!
//! Runs the fail-closed trading cycle:
//! Initialize -> HealthAndHalt -> Allocate -> Execute -> Finalize.
//! Every phase error is caught at one place, recorded, and turned into a halt.

pub mod handle;
pub mod orchestrator;

pub use handle::{OrchestratorCommand, OrchestratorHandle};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
