//! Deriv Copy-Trading Client
//!
//! Drives a single persistent WebSocket session against the Deriv trading
//! API: authenticate, optionally stake an initial contract, then mirror a
//! remote trader's transactions with automatic reconnection.

mod api;
mod catalog;
mod config;
mod error;
mod models;
mod session;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::catalog::StrategyCatalog;
use crate::config::{InitialStake, SessionConfig, TradingMode};
use crate::models::TraderProfile;
use crate::session::SessionController;

/// Deriv copy-trading CLI.
#[derive(Parser)]
#[command(name = "derivcopier")]
#[command(about = "Mirror a Deriv trader's transactions on your own account", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a copy-trading session
    Run {
        /// Trading mode (real or demo)
        #[arg(short, long, default_value = "demo")]
        mode: TradingMode,

        /// Your API token for the selected mode
        #[arg(short, long, env = "DERIV_API_TOKEN")]
        token: String,

        /// Initial contract stake: an amount, or 'balance' for the full
        /// account balance. Omit to skip the initial purchase.
        #[arg(short, long)]
        stake: Option<InitialStake>,
    },

    /// Show the performance profile of the mirrored trader
    Trader {
        /// Trading mode (real or demo)
        #[arg(short, long, default_value = "demo")]
        mode: TradingMode,
    },

    /// List available bot strategies
    Strategies {
        /// Directory holding strategy JSON files
        #[arg(short, long, default_value = "strategies")]
        dir: String,

        /// Print the full payload of one strategy by id
        #[arg(long)]
        show: Option<String>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { mode, token, stake } => {
            let mut config = SessionConfig::from_env();
            config.initial_stake = stake;

            if config.trader_token(mode).is_empty() {
                anyhow::bail!(
                    "no trader token configured for {} mode (set DERIV_{}_TRADER_TOKEN)",
                    mode,
                    mode.as_str().to_uppercase()
                );
            }

            let profile = TraderProfile::builtin(mode);
            print_profile(&profile, mode);

            // Sessions default to demo, like the dashboard; selecting real
            // goes through the same mode switch the UI uses.
            let mut controller = SessionController::new(config.clone(), TradingMode::Demo);
            controller
                .switch_mode(mode)
                .await
                .context("Failed to select trading mode")?;

            println!("\n=== Copy-Trading Session ===");
            println!("Mode:     {}", controller.mode());
            println!("Endpoint: {}", config.ws_url());
            println!(
                "Stake:    {}",
                match config.initial_stake {
                    Some(InitialStake::Balance) => "full balance".to_string(),
                    Some(InitialStake::Fixed(amount)) => format!("${amount}"),
                    None => "none".to_string(),
                }
            );
            println!("\nPress Ctrl+C to stop.\n");

            controller
                .start(token, mode)
                .await
                .context("Failed to start session")?;

            run_until_interrupted(&controller).await;

            let snapshot = controller.snapshot().await;
            controller.stop().await;

            println!("\n=== Session Summary ===");
            if let Some(balance) = snapshot.balance {
                println!("Balance:  ${balance:.2}");
            }
            if let Some(contract) = &snapshot.contract {
                println!(
                    "Contract: {} {} @ ${} (payout ${})",
                    contract.contract_type, contract.symbol, contract.buy_price, contract.payout
                );
            }
            println!("Trades:   {}", snapshot.trades.len());
            for trade in snapshot.trades.iter().take(10) {
                println!(
                    "  {} {} ${} (contract {})",
                    trade.received_at.format("%H:%M:%S"),
                    trade.action,
                    trade.amount,
                    trade
                        .contract_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            if let Some(error) = snapshot.error {
                println!("Error:    {error}");
            }
        }

        Commands::Trader { mode } => {
            let profile = TraderProfile::builtin(mode);
            print_profile(&profile, mode);
        }

        Commands::Strategies { dir, show } => {
            let catalog = StrategyCatalog::load_dir(&dir)
                .with_context(|| format!("Failed to load strategies from '{dir}'"))?;

            if let Some(id) = show {
                let strategy = catalog.load(&id)?;
                println!("\n=== {} ({}) ===", strategy.name, strategy.id);
                println!("{}", serde_json::to_string_pretty(&strategy.payload)?);
                return Ok(());
            }

            if catalog.list().is_empty() {
                println!("No strategies found in '{dir}'.");
                return Ok(());
            }

            println!("\n{:<20} {:<30}", "ID", "NAME");
            println!("{}", "-".repeat(50));
            for strategy in catalog.list() {
                println!("{:<20} {:<30}", strategy.id, strategy.name);
            }
        }

        Commands::Config => {
            let config = SessionConfig::from_env();

            println!("\n=== Session Configuration ===\n");
            println!("Endpoint:          {}", config.endpoint);
            println!("App id:            {}", config.app_id);
            println!("Ping interval:     {}s", config.ping_interval.as_secs());
            println!("Reconnect delay:   {}s", config.reconnect_delay.as_secs());
            println!("Connect timeout:   {}s", config.connect_timeout.as_secs());
            println!("Minimum balance:   ${}", config.minimum_balance);
            println!("Buy cooldown:      {}ms", config.buy_cooldown.as_millis());
            println!("Trade log size:    {}", config.trade_log_capacity);

            println!("\n=== Contract Template ===\n");
            println!("Basis:             {}", config.contract.basis);
            println!("Contract type:     {}", config.contract.contract_type);
            println!("Currency:          {}", config.contract.currency);
            println!(
                "Duration:          {}{}",
                config.contract.duration,
                config.contract.duration_unit.as_str()
            );
            println!("Symbol:            {}", config.contract.symbol);
        }
    }

    Ok(())
}

/// Poll the session snapshot, echoing status changes until Ctrl+C or until
/// the session reaches a terminal phase.
async fn run_until_interrupted(controller: &SessionController) {
    let mut last_status = String::new();
    let mut last_trades = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping copy trading...");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                let snapshot = controller.snapshot().await;

                if snapshot.status != last_status {
                    match snapshot.balance {
                        Some(balance) => println!("[{}] {} (balance ${balance:.2})", snapshot.mode, snapshot.status),
                        None => println!("[{}] {}", snapshot.mode, snapshot.status),
                    }
                    last_status = snapshot.status.clone();
                }

                if snapshot.trades.len() > last_trades {
                    for trade in snapshot.trades.iter().take(snapshot.trades.len() - last_trades) {
                        info!(
                            action = %trade.action,
                            amount = %trade.amount,
                            contract_id = ?trade.contract_id,
                            symbol = ?trade.symbol,
                            transaction_id = ?trade.transaction_id,
                            "Mirrored trade"
                        );
                    }
                    last_trades = snapshot.trades.len();
                }

                if snapshot.phase.is_terminal() {
                    return;
                }
            }
        }
    }
}

fn print_profile(profile: &TraderProfile, mode: TradingMode) {
    println!("\n=== Trader Performance ({mode}) ===");
    println!("Login id:       {}", profile.trader_loginid);
    println!("Win rate:       {:.2}%", profile.win_rate());
    println!("Avg profit:     ${:.2}", profile.avg_profit);
    println!("Avg loss:       ${:.2}", profile.avg_loss);
    println!("Avg duration:   {:.1}m", profile.avg_duration);
    println!("Total trades:   {}", profile.total_trades);
    println!("Copiers:        {}", profile.copiers);
    if let Some(active_since) = profile.active_since {
        println!("Active since:   {}", active_since.format("%b %e, %Y"));
    }
    println!(
        "Allows copiers: {}",
        if profile.allow_copiers { "Yes" } else { "No" }
    );
}
