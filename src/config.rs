use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, WardenError};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    pub risk: RiskConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Seconds between cycle starts
    #[serde(default = "default_loop_interval")]
    pub loop_interval_seconds: u64,
    /// Upper bound for any single broker or store call
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
    /// Upper bound for one bot dispatch, strategy hook included
    #[serde(default = "default_bot_timeout")]
    pub bot_timeout_ms: u64,
    /// Attempts for the account fetch during Initialize
    #[serde(default = "default_account_retries")]
    pub account_fetch_retries: u32,
    /// Base backoff between account fetch attempts, doubled per attempt
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Offset from UTC used to decide which trading day a timestamp belongs to
    #[serde(default = "default_trading_day_offset")]
    pub trading_day_utc_offset_minutes: i32,
}

fn default_loop_interval() -> u64 {
    5
}

fn default_io_timeout() -> u64 {
    5_000
}

fn default_bot_timeout() -> u64 {
    30_000
}

fn default_account_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    1_000
}

fn default_trading_day_offset() -> i32 {
    -300 // US Eastern (standard time)
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            loop_interval_seconds: default_loop_interval(),
            io_timeout_ms: default_io_timeout(),
            bot_timeout_ms: default_bot_timeout(),
            account_fetch_retries: default_account_retries(),
            retry_backoff_ms: default_retry_backoff(),
            trading_day_utc_offset_minutes: default_trading_day_offset(),
        }
    }
}

impl RunnerConfig {
    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_seconds)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn bot_timeout(&self) -> Duration {
        Duration::from_millis(self.bot_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Global risk limits, all expressed as fractions of account equity
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Fraction of equity that may be put at risk across all bots in one day
    pub global_max_daily_risk: Decimal,
    /// Fraction of equity any single bot (and any single position) may use
    pub global_max_position_size: Decimal,
    /// Drawdown from day-start equity that halts trading
    pub global_max_daily_loss: Decimal,
    /// Ask the broker to cancel orders and close positions when trading halts
    #[serde(default)]
    pub flatten_on_halt: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            global_max_daily_risk: dec!(0.1),
            global_max_position_size: dec!(0.04),
            global_max_daily_loss: dec!(0.02),
            flatten_on_halt: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Length of the rolling window health is judged over
    #[serde(default = "default_health_window")]
    pub window_seconds: u64,
    /// Absolute number of failures inside the window that trips a halt
    #[serde(default = "default_max_failures")]
    pub max_api_failures_in_window: u32,
    /// Failure ratio above which a halt trips, once enough samples exist
    #[serde(default = "default_max_failure_ratio")]
    pub max_failure_ratio: Decimal,
    /// Samples required before the ratio rule applies
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
    /// Broker silence beyond this counts as unhealthy
    #[serde(default = "default_max_data_staleness")]
    pub max_data_staleness_seconds: u64,
}

fn default_health_window() -> u64 {
    300
}

fn default_max_failures() -> u32 {
    5
}

fn default_max_failure_ratio() -> Decimal {
    dec!(0.5)
}

fn default_min_samples() -> u32 {
    4
}

fn default_max_data_staleness() -> u64 {
    120
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_health_window(),
            max_api_failures_in_window: default_max_failures(),
            max_failure_ratio: default_max_failure_ratio(),
            min_samples: default_min_samples(),
            max_data_staleness_seconds: default_max_data_staleness(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite connection URL for the durable state store
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://state/warden.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Append-only JSONL audit file; `None` routes audit entries to tracing only
    #[serde(default = "default_audit_path")]
    pub jsonl_path: Option<String>,
}

fn default_audit_path() -> Option<String> {
    Some("logs/audit.jsonl".to_string())
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            jsonl_path: default_audit_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling log files
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_starting_equity")]
    pub starting_equity: Decimal,
}

fn default_starting_equity() -> Decimal {
    dec!(100000)
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_equity: default_starting_equity(),
        }
    }
}

/// Strategy family a configured bot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BotKind {
    Momentum,
    Options,
    Crypto,
}

impl std::fmt::Display for BotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotKind::Momentum => write!(f, "momentum"),
            BotKind::Options => write!(f, "options"),
            BotKind::Crypto => write!(f, "crypto"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub id: String,
    pub kind: BotKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Share of the daily risk capital relative to the other enabled bots
    #[serde(default = "default_weight")]
    pub weight: Decimal,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub max_new_entries_per_cycle: Option<u32>,
    #[serde(default)]
    pub max_concurrent_positions: Option<u32>,
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> Decimal {
    Decimal::ONE
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("store.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("WARDEN_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (WARDEN__RISK__GLOBAL_MAX_DAILY_LOSS, etc.)
            .add_source(
                Environment::with_prefix("WARDEN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Reject configurations the loop must never start with.
    pub fn validate(&self) -> Result<()> {
        if self.runner.loop_interval_seconds == 0 {
            return Err(WardenError::Validation(
                "runner.loop_interval_seconds must be > 0".into(),
            ));
        }
        if self.runner.io_timeout_ms == 0 || self.runner.bot_timeout_ms == 0 {
            return Err(WardenError::Validation("runner timeouts must be > 0".into()));
        }
        if self.runner.account_fetch_retries == 0 {
            return Err(WardenError::Validation(
                "runner.account_fetch_retries must be >= 1".into(),
            ));
        }
        if !(-14 * 60..=14 * 60).contains(&self.runner.trading_day_utc_offset_minutes) {
            return Err(WardenError::Validation(
                "runner.trading_day_utc_offset_minutes out of range".into(),
            ));
        }

        for (name, value) in [
            ("risk.global_max_daily_risk", self.risk.global_max_daily_risk),
            ("risk.global_max_position_size", self.risk.global_max_position_size),
            ("risk.global_max_daily_loss", self.risk.global_max_daily_loss),
            ("health.max_failure_ratio", self.health.max_failure_ratio),
        ] {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(WardenError::Validation(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.health.window_seconds == 0
            || self.health.max_api_failures_in_window == 0
            || self.health.max_data_staleness_seconds == 0
        {
            return Err(WardenError::Validation(
                "health.window_seconds, health.max_api_failures_in_window and health.max_data_staleness_seconds must be > 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for bot in &self.bots {
            if bot.id.trim().is_empty() {
                return Err(WardenError::Validation("bot id must not be empty".into()));
            }
            if !seen.insert(bot.id.as_str()) {
                return Err(WardenError::Validation(format!(
                    "duplicate bot id: {}",
                    bot.id
                )));
            }
            if bot.weight < Decimal::ZERO {
                return Err(WardenError::Validation(format!(
                    "bot {} has negative weight {}",
                    bot.id, bot.weight
                )));
            }
            if bot.enabled && bot.tickers.is_empty() {
                return Err(WardenError::Validation(format!(
                    "enabled bot {} has no tickers",
                    bot.id
                )));
            }
        }

        Ok(())
    }

    pub fn enabled_bots(&self) -> impl Iterator<Item = &BotConfig> {
        self.bots.iter().filter(|b| b.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot(id: &str) -> BotConfig {
        BotConfig {
            id: id.to_string(),
            kind: BotKind::Momentum,
            enabled: true,
            weight: dec!(0.5),
            tickers: vec!["AAPL".to_string()],
            max_new_entries_per_cycle: None,
            max_concurrent_positions: None,
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            runner: RunnerConfig::default(),
            risk: RiskConfig::default(),
            health: HealthConfig::default(),
            store: StoreConfig::default(),
            audit: AuditConfig::default(),
            logging: LoggingConfig::default(),
            paper: PaperConfig::default(),
            bots: vec![bot("a"), bot("b")],
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_rejects_fraction_out_of_range() {
        let mut cfg = config();
        cfg.risk.global_max_daily_loss = dec!(1.5);
        assert!(matches!(cfg.validate(), Err(WardenError::Validation(_))));

        let mut cfg = config();
        cfg.risk.global_max_daily_risk = Decimal::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_bot_ids() {
        let mut cfg = config();
        cfg.bots.push(bot("a"));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate bot id"));
    }

    #[test]
    fn test_disabled_bot_may_have_no_tickers() {
        let mut cfg = config();
        cfg.bots[1].enabled = false;
        cfg.bots[1].tickers.clear();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.enabled_bots().count(), 1);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let mut cfg = config();
        cfg.runner.loop_interval_seconds = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[risk]
global_max_daily_risk = "0.1"
global_max_position_size = "0.04"
global_max_daily_loss = "0.02"

[[bots]]
id = "mom"
kind = "momentum"
weight = "0.5"
tickers = ["AAPL", "MSFT"]

[[bots]]
id = "btc"
kind = "crypto"
enabled = false
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(cfg.risk.global_max_daily_loss, dec!(0.02));
        assert_eq!(cfg.runner.loop_interval_seconds, 5);
        assert_eq!(cfg.bots.len(), 2);
        assert_eq!(cfg.bots[0].kind, BotKind::Momentum);
        assert!(!cfg.bots[1].enabled);
        assert!(cfg.validate().is_ok());
    }
}
