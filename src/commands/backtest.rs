use crate::context::{load_run_request, AppContext};
use crate::engine::Engine;
use crate::models::RunResult;
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

pub async fn run(
    app: &AppContext,
    request_path: &Path,
    data_file: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let request = load_run_request(request_path)?;
    info!(
        "Backtesting {} symbols from {} to {}",
        request.universe.len(),
        request.start_date,
        request.end_date
    );

    let engine = Engine::from_config(request.config.clone())?;
    let history = app.load_history(&request, data_file).await?;
    let result = engine.run(&history);

    match output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&result)?;
            fs::write(path, json)
                .with_context(|| format!("failed to write run result to {}", path.display()))?;
            info!("Run result written to {}", path.display());
        }
        None => print_summary(&result),
    }

    Ok(())
}

fn print_summary(result: &RunResult) {
    let summary = &result.summary;
    println!("\n=== BACKTEST {} ===\n", result.id);
    println!("Window: {} to {}", result.start_date, result.end_date);
    println!("Symbols Loaded: {}", result.symbols_loaded);
    println!("Trading Days: {}", summary.trading_days);
    println!("Final Equity: {:.2}", summary.final_equity);
    println!("Total Return: {:.2}%", summary.total_return_pct);
    println!("Annualized Return: {:.2}%", summary.annualized_return_pct);
    println!("Sharpe Ratio: {:.2}", summary.sharpe_ratio);
    println!("Max Drawdown: {:.2}%", summary.max_drawdown_pct);
    println!(
        "Trades: {} ({} wins, {} losses, win rate {:.2}%)",
        summary.total_trades, summary.winning_trades, summary.losing_trades, summary.win_rate
    );
    println!("Profit Factor: {:.2}", summary.profit_factor);

    if !result.by_signal_type.is_empty() {
        println!("\nBy signal type:");
        for row in &result.by_signal_type {
            println!(
                "  {:<16} trades {:>4}  win rate {:>6.2}%  avg {:>6.2}%",
                row.key, row.trades, row.win_rate, row.avg_return_pct
            );
        }
    }
    println!();
}
