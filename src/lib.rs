pub mod allocator;
pub mod audit;
pub mod bots;
pub mod broker;
pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod execution;
pub mod halt;
pub mod health;
pub mod orchestrator;
pub mod persistence;

pub use allocator::{AllocationPlan, BudgetAllocator, RiskLimits};
pub use audit::{AuditEntry, AuditSink, JsonlAuditSink, TracingAuditSink};
pub use bots::{build_bots, BotSlot, TradingBot};
pub use broker::{BrokerClient, PaperBroker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::{Result, WardenError};
pub use execution::{DispatchReport, ExecutionGateway};
pub use halt::{HaltManager, HaltPolicy, HaltTransition};
pub use health::{HealthMonitor, HealthRecord};
pub use orchestrator::{Orchestrator, OrchestratorHandle, OrchestratorSettings};
pub use persistence::{InMemoryStateStore, SqliteStateStore, StateStore};
