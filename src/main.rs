use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::env;
use std::path::PathBuf;
use swing_engine::{
    commands::{backtest, export_market_data, sweep},
    context::AppContext,
};

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "swing-engine")]
#[command(about = "Daily-bar swing trading backtester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest described by a JSON run request
    Backtest {
        /// Path to the run request JSON
        request: PathBuf,
        /// Path to a market data snapshot; the database is used when omitted
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Write the full run result as JSON instead of printing a summary
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Run a parameter grid against one shared market history
    Sweep {
        /// Path to the run request JSON supplying the universe, window and base config
        request: PathBuf,
        /// Path to the sweep grid JSON
        #[arg(long, value_name = "PATH")]
        grid: PathBuf,
        /// Path to a market data snapshot; the database is used when omitted
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
    },
    /// Export a market data snapshot for offline runs
    ExportMarketData {
        /// Path to the run request JSON selecting universe and window
        request: PathBuf,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    let database_url = env::var("DATABASE_URL").ok();
    if database_url.is_none() && command_requires_database(&command) {
        return Err(anyhow!(
            "DATABASE_URL must be set for this command. For offline runs, use a market data snapshot."
        ));
    }
    let app_context = AppContext::initialize(database_url).await?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting engine. Backtest results are simulations, not financial advice.");

    match command {
        Commands::Backtest {
            request,
            data_file,
            output,
        } => {
            backtest::run(
                &app_context,
                &request,
                data_file.as_deref(),
                output.as_deref(),
            )
            .await?;
        }
        Commands::Sweep {
            request,
            grid,
            data_file,
        } => {
            sweep::run(&app_context, &request, &grid, data_file.as_deref()).await?;
        }
        Commands::ExportMarketData { request, output } => {
            let output_path = resolve_market_data_path(output);
            export_market_data::run(&app_context, &request, &output_path).await?;
        }
    }

    Ok(())
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_MARKET_DATA_FILE)
}

fn command_requires_database(command: &Commands) -> bool {
    match command {
        Commands::Backtest { data_file, .. } | Commands::Sweep { data_file, .. } => {
            data_file.is_none()
        }
        Commands::ExportMarketData { .. } => true,
    }
}
