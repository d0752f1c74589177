use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::handle::{OrchestratorCommand, OrchestratorHandle};
use crate::allocator::{AllocationInput, AllocationPlan, BudgetAllocator, RiskLimits};
use crate::audit::{AuditEntry, AuditSink};
use crate::bots::BotSlot;
use crate::broker::BrokerClient;
use crate::clock::{trading_day, Clock};
use crate::config::AppConfig;
use crate::domain::{
    AccountInfo, AccountSnapshot, AccountStatus, BotBudget, CycleId, CyclePhase, CycleRecord,
    ExecutionOutcome, Exposures, FailureKind, HaltState, SkipReason,
};
use crate::error::{Result, WardenError};
use crate::execution::{DispatchReport, ExecutionGateway};
use crate::halt::{HaltManager, HaltPolicy, HaltTransition};
use crate::health::{HealthCategory, HealthMonitor};
use crate::persistence::StateStore;

const CONTROL_CHANNEL_SIZE: usize = 16;

/// Runtime knobs taken from configuration at start
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub loop_interval: Duration,
    pub io_timeout: Duration,
    pub bot_timeout: Duration,
    pub account_fetch_retries: u32,
    pub retry_backoff: Duration,
    pub trading_day_utc_offset_minutes: i32,
    pub flatten_on_halt: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            loop_interval: config.runner.loop_interval(),
            io_timeout: config.runner.io_timeout(),
            bot_timeout: config.runner.bot_timeout(),
            account_fetch_retries: config.runner.account_fetch_retries,
            retry_backoff: config.runner.retry_backoff(),
            trading_day_utc_offset_minutes: config.runner.trading_day_utc_offset_minutes,
            flatten_on_halt: config.risk.flatten_on_halt,
        }
    }
}

/// A phase error, tagged with where it happened
struct PhaseFailure {
    phase: CyclePhase,
    error: WardenError,
}

impl PhaseFailure {
    fn at(phase: CyclePhase) -> impl FnOnce(WardenError) -> PhaseFailure {
        move |error| PhaseFailure { phase, error }
    }
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    store: Arc<dyn StateStore>,
    broker: Arc<dyn BrokerClient>,
    health: Arc<HealthMonitor>,
    halt: HaltManager,
    allocator: BudgetAllocator,
    gateway: Arc<ExecutionGateway>,
    bots: Vec<BotSlot>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    run_id: Uuid,
    control_tx: mpsc::Sender<OrchestratorCommand>,
    control_rx: mpsc::Receiver<OrchestratorCommand>,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn StateStore>,
        broker: Arc<dyn BrokerClient>,
        bots: Vec<BotSlot>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = OrchestratorSettings::from_config(config);
        let health = Arc::new(HealthMonitor::from_config(&config.health, clock.clone()));
        let halt = HaltManager::new(
            store.clone(),
            health.clone(),
            HaltPolicy::from_config(config),
            clock.clone(),
            settings.io_timeout,
        );
        let gateway = Arc::new(ExecutionGateway::new(
            store.clone(),
            broker.clone(),
            health.clone(),
            settings.io_timeout,
        ));
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);

        Self {
            settings,
            store,
            broker,
            health,
            halt,
            allocator: BudgetAllocator::new(RiskLimits::from_config(&config.risk)),
            gateway,
            bots,
            audit,
            clock,
            run_id: Uuid::new_v4(),
            control_tx,
            control_rx,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle::new(self.control_tx.clone())
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    pub fn halt_manager(&self) -> &HaltManager {
        &self.halt
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run cycles every `interval` until `shutdown_rx` fires.
    ///
    /// A cycle in progress always runs to completion before the loop exits.
    pub async fn run_forever(
        mut self,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        match self.halt.current().await {
            Ok(state) if state.is_halted() => warn!(
                reason = state.reason_or_default(),
                since = %state.set_at,
                "starting in HALTED state; no bot will trade until resumed"
            ),
            Ok(_) => info!("starting in RUNNING state"),
            Err(e) => error!(error = %e, "could not read halt state at startup"),
        }

        info!(
            run_id = %self.run_id,
            bots = self.bots.len(),
            interval_secs = interval.as_secs_f64(),
            "orchestrator starting main loop"
        );

        let mut tick = tokio::time::interval(interval);
        // Don't burst-fire missed ticks
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("orchestrator: shutdown signal received");
                    break;
                }

                Some(cmd) = self.control_rx.recv() => {
                    self.handle_command(cmd).await;
                }

                _ = tick.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "cycle could not start");
                    }
                }
            }
        }

        info!(run_id = %self.run_id, "orchestrator stopped");
    }

    async fn handle_command(&self, cmd: OrchestratorCommand) {
        match cmd {
            OrchestratorCommand::Resume { reply } => {
                info!("operator resume requested");
                let result = self.halt.resume().await;
                if let Ok(transition) = &result {
                    self.audit_transition(None, transition).await;
                }
                let _ = reply.send(result.map(|t| t.current));
            }
            OrchestratorCommand::Halt { reason, reply } => {
                warn!(reason = %reason, "operator halt requested");
                let result = self.halt.halt(&reason).await;
                if let Ok(transition) = &result {
                    self.on_transition(None, transition).await;
                }
                let _ = reply.send(result.map(|t| t.current));
            }
        }
    }

    /// Run one full cycle.
    ///
    /// Phase errors never escape: they are recorded on the returned
    /// CycleRecord and force HALTED. `Err` only means no cycle id could be
    /// allocated, so no cycle started; that attempt is still audited.
    pub async fn run_cycle(&self) -> Result<CycleRecord> {
        let cycle_id = match self
            .health
            .observe(
                HealthCategory::State,
                "next_cycle_id",
                self.settings.io_timeout,
                self.store.next_cycle_id(),
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "could not allocate a cycle id; cycle not started");
                self.emit(AuditEntry::CycleNotStarted {
                    at: self.clock.now(),
                    error: e.to_string(),
                })
                .await;
                return Err(e);
            }
        };

        let mut record = CycleRecord::start(cycle_id, self.run_id, self.clock.now());
        debug!(cycle_id = %cycle_id, "cycle started");

        if let Err(failure) = self.run_phases(&mut record).await {
            let detail = failure.error.to_string();
            error!(
                cycle_id = %cycle_id,
                phase = %failure.phase,
                error = %detail,
                "cycle phase failed"
            );
            record.fail(failure.phase, detail.clone());
            if let Some(state) = self.halt_after_failure(cycle_id, failure.phase, &detail).await {
                if state.is_halted() {
                    let reason = state.reason_or_default().to_string();
                    self.skip_unrecorded_bots(&mut record, &reason);
                    record.mark_halted(reason);
                }
            }
        }

        self.finalize(&mut record).await;
        Ok(record)
    }

    async fn run_phases(&self, record: &mut CycleRecord) -> std::result::Result<(), PhaseFailure> {
        let cycle_id = record.cycle_id;

        let account = self
            .initialize()
            .await
            .map_err(PhaseFailure::at(CyclePhase::Initialize))?;
        record.equity = Some(account.equity);
        record.complete_phase(CyclePhase::Initialize);

        let halt = self
            .health_and_halt(cycle_id, &account)
            .await
            .map_err(PhaseFailure::at(CyclePhase::HealthAndHalt))?;
        record.complete_phase(CyclePhase::HealthAndHalt);

        if halt.is_halted() {
            let reason = halt.reason_or_default().to_string();
            info!(cycle_id = %cycle_id, reason = %reason, "trading halted; no bots dispatched");
            self.skip_unrecorded_bots(record, &reason);
            record.mark_halted(reason);
            return Ok(());
        }

        self.allocate(cycle_id, &account)
            .await
            .map_err(PhaseFailure::at(CyclePhase::Allocate))?;
        record.complete_phase(CyclePhase::Allocate);

        let reports = self
            .execute(cycle_id)
            .await
            .map_err(PhaseFailure::at(CyclePhase::Execute))?;
        for report in &reports {
            record.record_bot(report.bot_id.clone(), report.outcome.clone());
        }
        self.persist_exposures(&reports)
            .await
            .map_err(PhaseFailure::at(CyclePhase::Execute))?;
        record.complete_phase(CyclePhase::Execute);

        Ok(())
    }

    // ---------------------------------------------------------------------
    // Initialize
    // ---------------------------------------------------------------------

    async fn initialize(&self) -> Result<AccountSnapshot> {
        let info = self.fetch_account().await?;

        if info.status != AccountStatus::Active {
            return Err(WardenError::InvalidAccount(format!(
                "account status is {}",
                info.status
            )));
        }
        if info.equity <= Decimal::ZERO {
            return Err(WardenError::InvalidAccount(format!(
                "equity must be positive, got {}",
                info.equity
            )));
        }

        let now = self.clock.now();
        let day = trading_day(now, self.settings.trading_day_utc_offset_minutes);
        let day_start_equity = self
            .health
            .observe(
                HealthCategory::State,
                "set_day_start_equity_once",
                self.settings.io_timeout,
                self.store.set_day_start_equity_once(day, info.equity),
            )
            .await?;

        let snapshot = AccountSnapshot::from_info(&info, day_start_equity, day, now);
        self.health
            .observe(
                HealthCategory::State,
                "save_account_snapshot",
                self.settings.io_timeout,
                self.store.save_account_snapshot(&snapshot),
            )
            .await?;

        debug!(
            equity = %snapshot.equity,
            day_start_equity = %snapshot.day_start_equity,
            trading_day = %snapshot.trading_day,
            "account snapshot captured"
        );
        Ok(snapshot)
    }

    /// Broker account with bounded retries and exponential backoff.
    async fn fetch_account(&self) -> Result<AccountInfo> {
        let attempts = self.settings.account_fetch_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self
                .health
                .observe(
                    HealthCategory::Broker,
                    "get_account",
                    self.settings.io_timeout,
                    self.broker.get_account(),
                )
                .await
            {
                Ok(info) => return Ok(info),
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        attempts = attempts,
                        error = %e,
                        "account fetch failed"
                    );
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        let backoff = self.settings.retry_backoff.saturating_mul(2u32.saturating_pow(attempt));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| WardenError::Broker("account fetch not attempted".into())))
    }

    // ---------------------------------------------------------------------
    // HealthAndHalt
    // ---------------------------------------------------------------------

    async fn health_and_halt(
        &self,
        cycle_id: CycleId,
        account: &AccountSnapshot,
    ) -> Result<HaltState> {
        let request = self
            .health
            .observe(
                HealthCategory::State,
                "take_resume_request",
                self.settings.io_timeout,
                self.store.take_resume_request(),
            )
            .await?;
        if let Some(request) = request {
            info!(
                cycle_id = %cycle_id,
                requested_by = %request.requested_by,
                requested_at = %request.requested_at,
                "processing queued resume request"
            );
            let transition = self.halt.resume().await?;
            self.audit_transition(Some(cycle_id), &transition).await;
        }

        let health = self.health.snapshot();
        let transition = self.halt.evaluate(account, &health).await?;
        self.on_transition(Some(cycle_id), &transition).await;
        Ok(transition.current)
    }

    // ---------------------------------------------------------------------
    // Allocate
    // ---------------------------------------------------------------------

    async fn allocate(&self, cycle_id: CycleId, account: &AccountSnapshot) -> Result<AllocationPlan> {
        let exposures = self.current_exposures().await?;

        let inputs: Vec<AllocationInput> = self
            .bots
            .iter()
            .filter(|slot| slot.enabled)
            .map(|slot| AllocationInput {
                bot_id: slot.id().to_string(),
                weight: slot.weight,
                exposure: exposures.get(slot.id()).copied().unwrap_or_default(),
            })
            .collect();

        let plan = self.allocator.allocate(cycle_id, account.equity, &inputs);

        self.health
            .observe(
                HealthCategory::State,
                "put_budgets",
                self.settings.io_timeout,
                self.store.put_budgets(cycle_id, &plan.budgets),
            )
            .await?;

        Ok(plan)
    }

    /// Per-bot exposure marked from the broker's open positions, so fills,
    /// closes and flattens are all reflected. Written back to the ledger.
    /// If positions cannot be read the last persisted ledger is used.
    async fn current_exposures(&self) -> Result<Exposures> {
        let positions = match self
            .health
            .observe(
                HealthCategory::Broker,
                "get_positions",
                self.settings.io_timeout,
                self.broker.get_positions(),
            )
            .await
        {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "positions unavailable; allocating against the persisted ledger");
                return self
                    .health
                    .observe(
                        HealthCategory::State,
                        "load_exposures",
                        self.settings.io_timeout,
                        self.store.load_exposures(),
                    )
                    .await;
            }
        };

        let exposures: Exposures = self
            .bots
            .iter()
            .filter(|slot| slot.enabled)
            .map(|slot| {
                let held: Decimal = slot
                    .bot
                    .tickers()
                    .iter()
                    .filter_map(|ticker| positions.get(ticker))
                    .map(|value| value.abs())
                    .sum();
                (slot.id().to_string(), held)
            })
            .collect();

        self.health
            .observe(
                HealthCategory::State,
                "save_exposures",
                self.settings.io_timeout,
                self.store.save_exposures(&exposures),
            )
            .await?;
        Ok(exposures)
    }

    // ---------------------------------------------------------------------
    // Execute
    // ---------------------------------------------------------------------

    /// Dispatch every configured bot concurrently. Budgets are re-read from
    /// the store so only this cycle's persisted ledger is ever used.
    async fn execute(&self, cycle_id: CycleId) -> Result<Vec<DispatchReport>> {
        let budgets: HashMap<String, BotBudget> = self
            .health
            .observe(
                HealthCategory::State,
                "budgets_for_cycle",
                self.settings.io_timeout,
                self.store.budgets_for_cycle(cycle_id),
            )
            .await?
            .into_iter()
            .map(|b| (b.bot_id.clone(), b))
            .collect();

        let mut handles = Vec::with_capacity(self.bots.len());
        for slot in &self.bots {
            let gateway = self.gateway.clone();
            let slot = slot.clone();
            let budget = budgets.get(slot.id()).cloned();
            let bot_timeout = self.settings.bot_timeout;
            let bot_id = slot.id().to_string();

            let handle = tokio::spawn(async move {
                let bot_id = slot.id().to_string();
                match tokio::time::timeout(
                    bot_timeout,
                    gateway.dispatch(&slot, budget.as_ref(), cycle_id),
                )
                .await
                {
                    Ok(report) => report,
                    Err(_) => DispatchReport::new(
                        &bot_id,
                        ExecutionOutcome::failed(
                            FailureKind::Timeout,
                            format!("dispatch exceeded {}ms", bot_timeout.as_millis()),
                        ),
                    ),
                }
            });
            handles.push((bot_id, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (bot_id, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) if e.is_panic() => {
                    error!(cycle_id = %cycle_id, bot_id = %bot_id, "bot panicked during dispatch");
                    self.health.record_strategy_failure(&bot_id);
                    DispatchReport::new(
                        &bot_id,
                        ExecutionOutcome::failed(FailureKind::Panicked, "strategy panicked"),
                    )
                }
                Err(e) => DispatchReport::new(
                    &bot_id,
                    ExecutionOutcome::failed(FailureKind::Cancelled, e.to_string()),
                ),
            };

            match &report.outcome {
                ExecutionOutcome::Failed { .. } => warn!(
                    cycle_id = %cycle_id,
                    bot_id = %report.bot_id,
                    outcome = %report.outcome,
                    "bot dispatch failed"
                ),
                _ => info!(
                    cycle_id = %cycle_id,
                    bot_id = %report.bot_id,
                    outcome = %report.outcome,
                    "bot dispatched"
                ),
            }
            reports.push(report);
        }

        Ok(reports)
    }

    async fn persist_exposures(&self, reports: &[DispatchReport]) -> Result<()> {
        let exposures: BTreeMap<String, Decimal> = reports
            .iter()
            .filter_map(|r| r.exposure.map(|e| (r.bot_id.clone(), e)))
            .collect();
        if exposures.is_empty() {
            return Ok(());
        }

        self.health
            .observe(
                HealthCategory::State,
                "save_exposures",
                self.settings.io_timeout,
                self.store.save_exposures(&exposures),
            )
            .await
    }

    // ---------------------------------------------------------------------
    // Finalize
    // ---------------------------------------------------------------------

    async fn finalize(&self, record: &mut CycleRecord) {
        let cycle_id = record.cycle_id;
        let mut finalize_error: Option<String> = None;

        // Budgets expire with their cycle.
        if let Err(e) = self
            .health
            .observe(
                HealthCategory::State,
                "discard_budgets",
                self.settings.io_timeout,
                self.store.discard_budgets(cycle_id),
            )
            .await
        {
            finalize_error = Some(format!("discard_budgets: {}", e));
        }

        match &finalize_error {
            Some(detail) => record.fail(CyclePhase::Finalize, detail.clone()),
            None => record.complete_phase(CyclePhase::Finalize),
        }
        record.finish(self.clock.now());

        if let Err(e) = self
            .health
            .observe(
                HealthCategory::State,
                "append_cycle",
                self.settings.io_timeout,
                self.store.append_cycle(record),
            )
            .await
        {
            let detail = format!("append_cycle: {}", e);
            record.phases_completed.retain(|p| *p != CyclePhase::Finalize);
            record.fail(CyclePhase::Finalize, detail.clone());
            record.finish(self.clock.now());
            finalize_error.get_or_insert(detail);
        }

        if let Some(detail) = finalize_error {
            error!(cycle_id = %cycle_id, error = %detail, "finalize failed");
            self.halt_after_failure(cycle_id, CyclePhase::Finalize, &detail)
                .await;
        }

        self.emit(AuditEntry::Cycle {
            record: record.clone(),
        })
        .await;

        info!(
            cycle_id = %cycle_id,
            outcome = %record.outcome,
            status = %record.status,
            orders = record.orders_submitted(),
            "cycle finished"
        );
    }

    // ---------------------------------------------------------------------
    // Halt plumbing
    // ---------------------------------------------------------------------

    /// Force HALTED after a phase failure. `None` if even that could not be persisted.
    async fn halt_after_failure(
        &self,
        cycle_id: CycleId,
        phase: CyclePhase,
        detail: &str,
    ) -> Option<HaltState> {
        match self.halt.record_failure(phase, detail).await {
            Ok(transition) => {
                self.on_transition(Some(cycle_id), &transition).await;
                Some(transition.current)
            }
            Err(e) => {
                // The gateway re-reads halt state before every dispatch, so an
                // unreachable store still blocks trading.
                error!(
                    cycle_id = %cycle_id,
                    phase = %phase,
                    error = %e,
                    "could not persist halt"
                );
                None
            }
        }
    }

    async fn on_transition(&self, cycle_id: Option<CycleId>, transition: &HaltTransition) {
        self.audit_transition(cycle_id, transition).await;
        if transition.newly_halted() {
            self.flatten_if_configured(cycle_id).await;
        }
    }

    async fn audit_transition(&self, cycle_id: Option<CycleId>, transition: &HaltTransition) {
        if !transition.changed() {
            return;
        }
        self.emit(AuditEntry::HaltTransition {
            cycle_id,
            from: transition.previous.status,
            to: transition.current.status,
            reason: transition.current.reason.clone(),
        })
        .await;
    }

    async fn flatten_if_configured(&self, cycle_id: Option<CycleId>) {
        if !self.settings.flatten_on_halt {
            return;
        }

        let entry = match self
            .health
            .observe(
                HealthCategory::Broker,
                "flatten",
                self.settings.io_timeout,
                self.broker.flatten(),
            )
            .await
        {
            Ok(report) => {
                warn!(
                    orders_cancelled = report.orders_cancelled,
                    positions_closed = report.positions_closed,
                    "account flattened after halt"
                );
                self.clear_exposures().await;
                AuditEntry::Flatten {
                    cycle_id,
                    ok: true,
                    detail: format!(
                        "cancelled {} orders, closed {} positions",
                        report.orders_cancelled, report.positions_closed
                    ),
                }
            }
            Err(e) => {
                error!(error = %e, "flatten after halt failed");
                AuditEntry::Flatten {
                    cycle_id,
                    ok: false,
                    detail: e.to_string(),
                }
            }
        };
        self.emit(entry).await;
    }

    /// Nothing is at risk after a flatten.
    async fn clear_exposures(&self) {
        let cleared: Exposures = self
            .bots
            .iter()
            .map(|slot| (slot.id().to_string(), Decimal::ZERO))
            .collect();
        if cleared.is_empty() {
            return;
        }
        if let Err(e) = self
            .health
            .observe(
                HealthCategory::State,
                "save_exposures",
                self.settings.io_timeout,
                self.store.save_exposures(&cleared),
            )
            .await
        {
            warn!(error = %e, "could not clear exposure ledger after flatten");
        }
    }

    fn skip_unrecorded_bots(&self, record: &mut CycleRecord, reason: &str) {
        for slot in &self.bots {
            if record.bots.iter().any(|b| b.bot_id == slot.id()) {
                continue;
            }
            record.record_bot(
                slot.id(),
                ExecutionOutcome::skipped(SkipReason::Halted {
                    reason: reason.to_string(),
                }),
            );
        }
    }

    /// Audit writes never block or fail the cycle.
    async fn emit(&self, entry: AuditEntry) {
        let _ = self
            .health
            .observe(
                HealthCategory::Io,
                "audit_append",
                self.settings.io_timeout,
                self.audit.append(&entry),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditSink;
    use crate::bots::{BotContext, TradingBot};
    use crate::broker::{MockBrokerClient, PaperBroker};
    use crate::clock::ManualClock;
    use crate::config::{
        AuditConfig, BotKind, HealthConfig, LoggingConfig, PaperConfig, RiskConfig, RunnerConfig,
        StoreConfig,
    };
    use crate::domain::{AssetClass, CycleOutcome, HaltStatus, OrderIntent};
    use crate::persistence::store::MockStateStore;
    use crate::persistence::InMemoryStateStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAuditSink {
        entries: Mutex<Vec<AuditEntry>>,
    }

    #[async_trait]
    impl AuditSink for RecordingAuditSink {
        async fn append(&self, entry: &AuditEntry) -> Result<()> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    enum Behavior {
        Buy(Decimal),
        Fail,
        Panic,
        Hang,
    }

    struct TestBot {
        id: String,
        tickers: Vec<String>,
        behavior: Behavior,
    }

    #[async_trait]
    impl TradingBot for TestBot {
        fn id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> BotKind {
            BotKind::Momentum
        }

        fn tickers(&self) -> &[String] {
            &self.tickers
        }

        async fn budget_aware_execute(&self, ctx: &BotContext) -> Result<Vec<OrderIntent>> {
            match self.behavior {
                Behavior::Buy(notional) => Ok(vec![OrderIntent::buy(
                    &self.id,
                    ctx.cycle_id,
                    &self.tickers[0],
                    AssetClass::Equity,
                    notional.min(ctx.budget.max_position_size),
                )]),
                Behavior::Fail => Err(WardenError::Strategy("signal feed empty".into())),
                Behavior::Panic => panic!("strategy bug"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn bot(id: &str, ticker: &str, behavior: Behavior) -> BotSlot {
        BotSlot {
            bot: Arc::new(TestBot {
                id: id.to_string(),
                tickers: vec![ticker.to_string()],
                behavior,
            }),
            enabled: true,
            weight: Decimal::ONE,
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            runner: RunnerConfig {
                io_timeout_ms: 1_000,
                bot_timeout_ms: 200,
                account_fetch_retries: 2,
                retry_backoff_ms: 1,
                ..RunnerConfig::default()
            },
            risk: RiskConfig::default(),
            health: HealthConfig::default(),
            store: StoreConfig::default(),
            audit: AuditConfig { jsonl_path: None },
            logging: LoggingConfig::default(),
            paper: PaperConfig::default(),
            bots: Vec::new(),
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap(),
        ))
    }

    fn orchestrator(
        store: Arc<InMemoryStateStore>,
        broker: Arc<dyn BrokerClient>,
        bots: Vec<BotSlot>,
    ) -> Orchestrator {
        Orchestrator::new(
            &config(),
            store,
            broker,
            bots,
            Arc::new(TracingAuditSink),
            clock(),
        )
    }

    #[tokio::test]
    async fn test_halted_cycle_places_no_orders() {
        let store = Arc::new(
            InMemoryStateStore::new()
                .with_halt(HaltState::halted("manual halt: ops", Utc::now()))
                .await,
        );
        let broker = Arc::new(PaperBroker::new(dec!(100000), clock()));
        let orch = orchestrator(
            store.clone(),
            broker.clone(),
            vec![bot("a", "AAPL", Behavior::Buy(dec!(500)))],
        );

        let record = orch.run_cycle().await.unwrap();

        assert_eq!(record.outcome, CycleOutcome::Halted);
        assert_eq!(record.status, "HALTED: manual halt: ops");
        assert!(broker.filled_orders().await.is_empty());
        assert_eq!(
            record.bots[0].outcome,
            ExecutionOutcome::skipped(SkipReason::Halted {
                reason: "manual halt: ops".into()
            })
        );
        assert!(!record.phases_completed.contains(&CyclePhase::Allocate));
        assert!(record.phases_completed.contains(&CyclePhase::Finalize));
    }

    #[tokio::test]
    async fn test_running_cycle_executes_within_budget() {
        let store = Arc::new(InMemoryStateStore::new());
        let broker = Arc::new(PaperBroker::new(dec!(100000), clock()));
        let orch = orchestrator(
            store.clone(),
            broker.clone(),
            vec![
                bot("a", "AAPL", Behavior::Buy(dec!(9000))),
                bot("b", "MSFT", Behavior::Buy(dec!(500))),
            ],
        );

        let record = orch.run_cycle().await.unwrap();

        assert_eq!(record.outcome, CycleOutcome::Completed);
        assert_eq!(record.status, "OK: 2 bots executed");
        assert_eq!(record.phases_completed.len(), 5);
        assert_eq!(record.equity, Some(dec!(100000)));

        // Per-bot cap is 100000 * 0.04
        let fills = broker.filled_orders().await;
        assert_eq!(fills.len(), 2);
        assert!(fills.iter().all(|o| o.notional <= dec!(4000)));

        // Budgets do not outlive their cycle
        assert!(store.budgets_for_cycle(record.cycle_id).await.unwrap().is_empty());
        assert_eq!(store.cycles().await.len(), 1);
        assert_eq!(store.load_exposures().await.unwrap().get("a"), Some(&dec!(4000)));
    }

    #[tokio::test]
    async fn test_bot_failures_stay_local() {
        let store = Arc::new(InMemoryStateStore::new());
        let broker = Arc::new(PaperBroker::new(dec!(100000), clock()));
        let orch = orchestrator(
            store.clone(),
            broker.clone(),
            vec![
                bot("failing", "AAPL", Behavior::Fail),
                bot("panicking", "TSLA", Behavior::Panic),
                bot("hanging", "NVDA", Behavior::Hang),
                bot("healthy", "MSFT", Behavior::Buy(dec!(500))),
            ],
        );

        let record = orch.run_cycle().await.unwrap();

        assert_eq!(record.outcome, CycleOutcome::Completed);
        assert_eq!(record.status, "PARTIAL: 1 executed, 3 failed");
        let kind = |id: &str| match &record.bots.iter().find(|b| b.bot_id == id).unwrap().outcome {
            ExecutionOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        };
        assert_eq!(kind("failing"), Some(FailureKind::Strategy));
        assert_eq!(kind("panicking"), Some(FailureKind::Panicked));
        assert_eq!(kind("hanging"), Some(FailureKind::Timeout));
        assert_eq!(kind("healthy"), None);

        assert_eq!(broker.filled_orders().await.len(), 1);
        assert_eq!(store.load_halt().await.unwrap().status, HaltStatus::Running);
    }

    #[tokio::test]
    async fn test_account_failure_halts_and_records_phase() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_account()
            .times(2)
            .returning(|| Err(WardenError::Broker("503 service unavailable".into())));
        let store = Arc::new(InMemoryStateStore::new());
        let orch = orchestrator(
            store.clone(),
            Arc::new(broker),
            vec![bot("a", "AAPL", Behavior::Buy(dec!(500)))],
        );

        let record = orch.run_cycle().await.unwrap();

        assert_eq!(record.outcome, CycleOutcome::Errored);
        assert_eq!(record.failed_phase, Some(CyclePhase::Initialize));
        assert!(record.status.starts_with("ERROR: initialize:"));

        let halt = store.load_halt().await.unwrap();
        assert!(halt.is_halted());
        assert!(halt
            .reason_or_default()
            .starts_with("cycle phase initialize failed"));
        assert_eq!(store.cycles().await.len(), 1);
    }

    #[tokio::test]
    async fn test_restricted_account_is_rejected() {
        let mut broker = MockBrokerClient::new();
        broker.expect_get_account().returning(|| {
            Ok(AccountInfo {
                equity: dec!(50000),
                cash: dec!(50000),
                buying_power: dec!(50000),
                status: AccountStatus::Restricted,
            })
        });
        let store = Arc::new(InMemoryStateStore::new());
        let orch = orchestrator(store.clone(), Arc::new(broker), Vec::new());

        let record = orch.run_cycle().await.unwrap();
        assert_eq!(record.failed_phase, Some(CyclePhase::Initialize));
        assert!(store.load_halt().await.unwrap().is_halted());
    }

    #[tokio::test]
    async fn test_cycle_ids_increase() {
        let store = Arc::new(InMemoryStateStore::new());
        let broker = Arc::new(PaperBroker::new(dec!(100000), clock()));
        let orch = orchestrator(store, broker, Vec::new());

        let first = orch.run_cycle().await.unwrap();
        let second = orch.run_cycle().await.unwrap();
        assert!(second.cycle_id > first.cycle_id);
        assert_eq!(second.status, "SKIPPED: no bots executed");
    }

    #[tokio::test]
    async fn test_budget_follows_live_positions() {
        let store = Arc::new(InMemoryStateStore::new());
        let broker = Arc::new(PaperBroker::new(dec!(100000), clock()));
        let orch = orchestrator(
            store.clone(),
            broker.clone(),
            vec![bot("a", "AAPL", Behavior::Buy(dec!(2000)))],
        );

        // 10000 daily pool filled in 2000 steps
        for _ in 0..5 {
            let record = orch.run_cycle().await.unwrap();
            assert!(matches!(
                record.bots[0].outcome,
                ExecutionOutcome::Executed { submitted: 1, .. }
            ));
        }
        let exhausted = orch.run_cycle().await.unwrap();
        assert_eq!(
            exhausted.bots[0].outcome,
            ExecutionOutcome::skipped(SkipReason::ZeroBudget)
        );
        assert_eq!(store.load_exposures().await.unwrap().get("a"), Some(&dec!(10000)));

        // Closing at the broker frees the pool on the next cycle
        broker.flatten().await.unwrap();
        let record = orch.run_cycle().await.unwrap();
        assert!(matches!(
            record.bots[0].outcome,
            ExecutionOutcome::Executed { submitted: 1, .. }
        ));
        assert_eq!(broker.filled_orders().await.len(), 6);
        assert_eq!(store.load_exposures().await.unwrap().get("a"), Some(&dec!(2000)));
    }

    #[tokio::test]
    async fn test_cycle_id_failure_is_audited() {
        let mut store = MockStateStore::new();
        store
            .expect_next_cycle_id()
            .times(1)
            .returning(|| Err(WardenError::Database(sqlx::Error::PoolTimedOut)));
        let mut broker = MockBrokerClient::new();
        broker.expect_get_account().never();
        let audit = Arc::new(RecordingAuditSink::default());
        let clock = clock();
        let orch = Orchestrator::new(
            &config(),
            Arc::new(store),
            Arc::new(broker),
            vec![bot("a", "AAPL", Behavior::Buy(dec!(500)))],
            audit.clone(),
            clock.clone(),
        );

        assert!(orch.run_cycle().await.is_err());

        let entries = audit.entries.lock().unwrap().clone();
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            AuditEntry::CycleNotStarted { at, error } => {
                assert_eq!(*at, clock.now());
                assert!(error.contains("pool timed out"));
            }
            other => panic!("unexpected audit entry {:?}", other),
        }
        assert_eq!(orch.health().snapshot().failures_in(HealthCategory::State), 1);
    }
}
