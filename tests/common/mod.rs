#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use warden::audit::TracingAuditSink;
use warden::bots::{BotContext, BotSlot, TradingBot};
use warden::broker::BrokerClient;
use warden::clock::ManualClock;
use warden::config::{
    AppConfig, AuditConfig, BotKind, HealthConfig, LoggingConfig, PaperConfig, RiskConfig,
    RunnerConfig, StoreConfig,
};
use warden::domain::{
    AccountInfo, AccountStatus, AssetClass, BotBudget, Exposures, FlattenReport, OrderIntent,
    OrderResult, OrderSide,
};
use warden::error::{Result, WardenError};
use warden::orchestrator::Orchestrator;
use warden::persistence::StateStore;

/// Broker whose account and failure modes the test controls directly.
/// Accepted orders fill instantly at their notional.
pub struct FakeBroker {
    equity: Mutex<Decimal>,
    fail_account: AtomicBool,
    orders: Mutex<Vec<OrderIntent>>,
    positions: Mutex<Exposures>,
    flattens: AtomicU32,
}

impl FakeBroker {
    pub fn new(equity: Decimal) -> Arc<Self> {
        Arc::new(Self {
            equity: Mutex::new(equity),
            fail_account: AtomicBool::new(false),
            orders: Mutex::new(Vec::new()),
            positions: Mutex::new(BTreeMap::new()),
            flattens: AtomicU32::new(0),
        })
    }

    pub fn set_equity(&self, equity: Decimal) {
        *self.equity.lock().unwrap() = equity;
    }

    pub fn fail_account(&self, fail: bool) {
        self.fail_account.store(fail, Ordering::SeqCst);
    }

    pub fn orders(&self) -> Vec<OrderIntent> {
        self.orders.lock().unwrap().clone()
    }

    pub fn positions(&self) -> Exposures {
        self.positions.lock().unwrap().clone()
    }

    pub fn flattens(&self) -> u32 {
        self.flattens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for FakeBroker {
    async fn get_account(&self) -> Result<AccountInfo> {
        if self.fail_account.load(Ordering::SeqCst) {
            return Err(WardenError::Broker("502 bad gateway".into()));
        }
        let equity = *self.equity.lock().unwrap();
        Ok(AccountInfo {
            equity,
            cash: equity,
            buying_power: equity,
            status: AccountStatus::Active,
        })
    }

    async fn get_positions(&self) -> Result<Exposures> {
        Ok(self.positions())
    }

    async fn submit_order(&self, intent: &OrderIntent) -> Result<OrderResult> {
        {
            let mut positions = self.positions.lock().unwrap();
            let held = positions.entry(intent.ticker.clone()).or_insert(Decimal::ZERO);
            match intent.side {
                OrderSide::Buy => *held += intent.notional,
                OrderSide::Sell => *held -= intent.notional.min(*held),
            }
            if held.is_zero() {
                positions.remove(&intent.ticker);
            }
        }
        let id = {
            let mut orders = self.orders.lock().unwrap();
            orders.push(intent.clone());
            orders.len()
        };
        Ok(OrderResult::accepted(intent, format!("fake-{}", id), Utc::now()))
    }

    async fn flatten(&self) -> Result<FlattenReport> {
        self.flattens.fetch_add(1, Ordering::SeqCst);
        let closed = std::mem::take(&mut *self.positions.lock().unwrap());
        Ok(FlattenReport {
            orders_cancelled: 0,
            positions_closed: closed.len() as u32,
        })
    }
}

pub enum Script {
    /// Buy this notional (capped at the position limit) every cycle
    Buy(Decimal),
    Fail,
    Panic,
    Hang,
}

/// Bot that follows a script and remembers the budgets it was handed
pub struct ScriptedBot {
    id: String,
    tickers: Vec<String>,
    script: Script,
    budgets: Mutex<Vec<BotBudget>>,
}

impl ScriptedBot {
    pub fn new(id: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            tickers: vec![format!("{}-TICKER", id.to_uppercase())],
            script,
            budgets: Mutex::new(Vec::new()),
        })
    }

    pub fn budgets(&self) -> Vec<BotBudget> {
        self.budgets.lock().unwrap().clone()
    }

    pub fn slot(self: &Arc<Self>, weight: Decimal) -> BotSlot {
        BotSlot {
            bot: self.clone(),
            enabled: true,
            weight,
        }
    }
}

#[async_trait]
impl TradingBot for ScriptedBot {
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
        self.budgets.lock().unwrap().push(ctx.budget.clone());
        match self.script {
            Script::Buy(notional) => Ok(vec![OrderIntent::buy(
                &self.id,
                ctx.cycle_id,
                &self.tickers[0],
                AssetClass::Equity,
                notional.min(ctx.budget.max_position_size),
            )]),
            Script::Fail => Err(WardenError::Strategy("indicator warmup incomplete".into())),
            Script::Panic => panic!("index out of bounds in signal buffer"),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }
}

pub fn config() -> AppConfig {
    AppConfig {
        runner: RunnerConfig {
            loop_interval_seconds: 3600,
            io_timeout_ms: 1_000,
            bot_timeout_ms: 250,
            account_fetch_retries: 2,
            retry_backoff_ms: 1,
            trading_day_utc_offset_minutes: -300,
        },
        risk: RiskConfig {
            global_max_daily_risk: dec!(0.1),
            global_max_position_size: dec!(0.04),
            global_max_daily_loss: dec!(0.02),
            flatten_on_halt: false,
        },
        health: HealthConfig {
            window_seconds: 300,
            max_api_failures_in_window: 5,
            max_failure_ratio: dec!(0.5),
            min_samples: 4,
            max_data_staleness_seconds: 3600,
        },
        store: StoreConfig::default(),
        audit: AuditConfig { jsonl_path: None },
        logging: LoggingConfig::default(),
        paper: PaperConfig::default(),
        bots: Vec::new(),
    }
}

/// Monday 10:00 in New York
pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap(),
    ))
}

pub fn orchestrator(
    config: &AppConfig,
    store: Arc<dyn StateStore>,
    broker: Arc<FakeBroker>,
    bots: Vec<BotSlot>,
    clock: Arc<ManualClock>,
) -> Orchestrator {
    Orchestrator::new(
        config,
        store,
        broker,
        bots,
        Arc::new(TracingAuditSink),
        clock,
    )
}
