use clap::{Parser, Subcommand};
use std::io::Write;

use crate::domain::{CycleRecord, HaltState};
use crate::error::Result;
use crate::persistence::StateStore;

#[derive(Parser)]
#[command(name = "warden")]
#[command(version = "0.1.0")]
#[command(about = "Fail-closed orchestrator for a fleet of trading bots", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and the per-environment overrides
    #[arg(short, long, default_value = "config", env = "WARDEN_CONFIG_DIR")]
    pub config_dir: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestration loop until SIGINT/SIGTERM
    Run,
    /// Queue a resume request; the running loop re-checks limits before honoring it
    Resume {
        #[arg(long, default_value = "operator")]
        requested_by: String,
    },
    /// Show the halt state and the most recent cycles
    Status {
        #[arg(long, default_value = "10")]
        cycles: usize,
    },
}

/// Write a human-readable status report.
pub async fn print_status<W: Write>(
    out: &mut W,
    store: &dyn StateStore,
    cycles: usize,
) -> Result<()> {
    let halt = store.load_halt().await?;
    writeln!(out, "{}", format_halt(&halt))?;

    if let Some(account) = store.load_account_snapshot().await? {
        writeln!(
            out,
            "Equity: {} (day start {} on {}, loss {:.2}%)",
            account.equity,
            account.day_start_equity,
            account.trading_day,
            account.daily_loss_fraction() * rust_decimal::Decimal::ONE_HUNDRED
        )?;
    }

    let records = store.recent_cycles(cycles).await?;
    if records.is_empty() {
        writeln!(out, "No cycles recorded yet")?;
        return Ok(());
    }

    writeln!(out, "Recent cycles:")?;
    for record in &records {
        writeln!(out, "  {}", format_cycle(record))?;
    }
    Ok(())
}

fn format_halt(halt: &HaltState) -> String {
    match &halt.reason {
        Some(reason) if halt.is_halted() => format!(
            "Trading: {} since {} ({})",
            halt.status,
            halt.set_at.to_rfc3339(),
            reason
        ),
        _ => format!("Trading: {}", halt.status),
    }
}

fn format_cycle(record: &CycleRecord) -> String {
    format!(
        "#{:<6} {}  {:<9} {}",
        record.cycle_id.to_string(),
        record.started_at.format("%Y-%m-%d %H:%M:%S"),
        record.outcome.to_string(),
        record.status
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CycleId;
    use crate::persistence::InMemoryStateStore;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["warden", "resume", "--requested-by", "alice"]);
        match cli.command {
            Some(Commands::Resume { requested_by }) => assert_eq!(requested_by, "alice"),
            _ => panic!("expected resume"),
        }

        let cli = Cli::parse_from(["warden", "--config-dir", "/etc/warden", "status"]);
        assert_eq!(cli.config_dir, "/etc/warden");
        assert!(matches!(cli.command, Some(Commands::Status { cycles: 10 })));
    }

    #[tokio::test]
    async fn test_status_shows_halt_reason_and_cycles() {
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap();
        let store = InMemoryStateStore::new()
            .with_halt(HaltState::halted("manual halt: ops", at))
            .await;
        let mut record = CycleRecord::start(CycleId(7), Uuid::new_v4(), at);
        record.mark_halted("manual halt: ops");
        record.finish(at);
        store.append_cycle(&record).await.unwrap();

        let mut out = Vec::new();
        print_status(&mut out, &store, 5).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Trading: HALTED"));
        assert!(text.contains("manual halt: ops"));
        assert!(text.contains("#7"));
        assert!(text.contains("HALTED: manual halt: ops"));
    }
}
