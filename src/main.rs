//! LRC strategies - main entry point
//!
//! This binary provides four subcommands:
//! - backtest: Replay a CSV series through the channel strategy
//! - optimize: Sweep strategy parameters over the config grid
//! - live: Run the paper trading loop
//! - channel: Print the current channel, grids and stops

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "lrc-strategies")]
#[command(about = "Linear regression channel strategy with backtesting, optimization, and paper trading", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run strategy backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/lrc_btc_1h.json")]
        config: String,

        /// CSV file to use instead of {data_dir}/{symbol}_{timeframe}.csv
        #[arg(short, long)]
        data: Option<String>,

        /// Initial capital
        #[arg(long)]
        capital: Option<f64>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Refit policy: once, every_bar or every:N
        #[arg(long)]
        fit_policy: Option<String>,

        /// Skip invalid bars instead of aborting
        #[arg(long)]
        skip_invalid: bool,
    },

    /// Optimize strategy parameters
    Optimize {
        /// Path to base configuration file
        #[arg(short, long, default_value = "configs/lrc_btc_1h.json")]
        config: String,

        /// CSV file to use instead of {data_dir}/{symbol}_{timeframe}.csv
        #[arg(short, long)]
        data: Option<String>,

        /// Grid entries, e.g. --set sub_order_count=1,3,5 (repeatable)
        #[arg(long = "set")]
        overrides: Vec<String>,

        /// Sort results by metric (sharpe, return, drawdown, win_rate)
        #[arg(long, default_value = "sharpe")]
        sort_by: String,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Run sequentially instead of parallel
        #[arg(long)]
        sequential: bool,
    },

    /// Run paper trading
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/lrc_btc_1h.json")]
        config: String,

        /// Replay a CSV file bar by bar instead of tailing the data file
        #[arg(long)]
        replay: Option<String>,

        /// Cycle interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,

        /// State database path (overrides config)
        #[arg(long)]
        state_db: Option<String>,

        /// Ignore any saved state and start flat
        #[arg(long)]
        fresh: bool,
    },

    /// Show the channel, grids and stops for the latest bar
    Channel {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/lrc_btc_1h.json")]
        config: String,

        /// CSV file to use instead of {data_dir}/{symbol}_{timeframe}.csv
        #[arg(short, long)]
        data: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Optimizer: keep the console clean for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Optimize { .. } => ("optimize", true),
        Commands::Live { .. } => ("live", false),
        Commands::Channel { .. } => ("channel", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            config,
            data,
            capital,
            start,
            end,
            fit_policy,
            skip_invalid,
        } => commands::backtest::run(config, data, capital, start, end, fit_policy, skip_invalid),

        Commands::Optimize {
            config,
            data,
            overrides,
            sort_by,
            top,
            sequential,
        } => commands::optimize::run(config, data, overrides, sort_by, top, sequential),

        Commands::Live {
            config,
            replay,
            interval,
            state_db,
            fresh,
        } => commands::live::run(config, replay, interval, state_db, fresh),

        Commands::Channel { config, data } => commands::channel::run(config, data),
    }
}
