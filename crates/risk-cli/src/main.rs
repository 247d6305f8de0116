//! Risk CLI
//!
//! Subcommands:
//!   - `validate` checks a risk profile and prints its resolved limits
//!   - `replay` drives a coordinator from a JSON event file

mod replay;

use anyhow::Result;
use clap::{Parser, Subcommand};
use leverage_core::types::LiquidityTier;
use leverage_core::{Error, RiskProfile};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trading_engine::{LoggingSink, RiskCoordinator};

#[derive(Parser)]
#[command(
    name = "risk-cli",
    version,
    about = "Risk profile validation and replay for the leverage risk engine",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a risk profile file
    Validate(ValidateArgs),
    /// Replay recorded entries and ticks through the engine
    Replay(ReplayArgs),
}

#[derive(Parser)]
struct ValidateArgs {
    /// Profile path; `RISK_PROFILE_PATH` or config/risk_profile.toml when omitted
    #[arg(long)]
    profile: Option<PathBuf>,
}

#[derive(Parser)]
struct ReplayArgs {
    #[arg(long)]
    profile: Option<PathBuf>,

    /// JSON array of entry, tick and external_close events
    #[arg(long)]
    events: PathBuf,

    /// Acknowledge leverage changes held for manual confirmation
    #[arg(long, default_value_t = false)]
    auto_confirm: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "risk_cli=info,risk_manager=info,trading_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate(args) => Ok(validate(args.profile.as_deref())),
        Commands::Replay(args) => run_replay(args).await,
    }
}

fn load_profile(path: Option<&Path>) -> leverage_core::Result<RiskProfile> {
    match path {
        Some(path) => RiskProfile::load(path),
        None => RiskProfile::from_env(),
    }
}

fn validate(path: Option<&Path>) -> ExitCode {
    let profile = match load_profile(path) {
        Ok(profile) => profile,
        Err(Error::ConfigValidation { errors }) => {
            eprintln!("Risk profile is invalid ({} errors):", errors.len());
            for e in &errors {
                eprintln!("  - {e}");
            }
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!(error = %e, "Failed to load risk profile");
            return ExitCode::FAILURE;
        }
    };

    println!(
        "Global leverage: {}x - {}x (default {}x)",
        profile.leverage.min_leverage, profile.leverage.max_leverage, profile.leverage.default_leverage
    );
    for tier in [LiquidityTier::Tier1, LiquidityTier::Tier2, LiquidityTier::Tier3] {
        let limits = profile.resolve_limits("", Some(tier));
        println!(
            "{tier:?}: {}x - {}x (default {}x), offset {}, max size ${}",
            limits.bounds.min_leverage,
            limits.bounds.max_leverage,
            limits.bounds.default_leverage,
            limits.leverage_offset,
            limits.max_position_size_usd
        );
    }

    let mut symbols: Vec<_> = profile.symbol_specific_limits.keys().collect();
    symbols.sort();
    for symbol in symbols {
        let limits = profile.resolve_limits(symbol, None);
        println!(
            "{symbol} ({:?}): {}x - {}x (default {}x), max size ${}",
            limits.tier,
            limits.bounds.min_leverage,
            limits.bounds.max_leverage,
            limits.bounds.default_leverage,
            limits.max_position_size_usd
        );
    }
    println!(
        "Combination: {:?}, circuit breaker: {} losses / {}% daily",
        profile.adjustments.combination,
        profile.circuit_breaker.max_consecutive_losses,
        profile.circuit_breaker.daily_loss_threshold_pct
    );
    println!("Risk profile OK");

    ExitCode::SUCCESS
}

async fn run_replay(args: ReplayArgs) -> Result<ExitCode> {
    let profile = load_profile(args.profile.as_deref())?;
    let events = replay::load_events(&args.events)?;
    info!(events = events.len(), path = %args.events.display(), "Starting replay");

    let coordinator = RiskCoordinator::new(Arc::new(profile), Arc::new(LoggingSink));
    let summary = replay::run(&coordinator, events, args.auto_confirm).await;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    let mut symbols: Vec<String> = coordinator
        .positions()
        .all_positions()
        .into_iter()
        .map(|p| p.position.symbol)
        .collect();
    symbols.sort();
    symbols.dedup();
    for symbol in symbols {
        let state = coordinator.breaker().snapshot(&symbol).await;
        println!("{symbol}: {}", serde_json::to_string(&state)?);
    }

    let stats = coordinator.positions().stats();
    info!(
        open = stats.open_positions,
        closed = stats.closed_positions,
        realized_pnl = %stats.total_realized_pnl,
        "Replay finished"
    );

    Ok(ExitCode::SUCCESS)
}
