use crate::config::RunConfig;
use crate::data_context::MarketHistory;
use crate::engine::Engine;
use crate::models::PerformanceSummary;
use crate::param_utils::parameter_signature;
use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

const MAX_VARIATIONS: usize = 20_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParameterRange {
    fn values(&self) -> Vec<f64> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Vec::new();
        }
        if !(self.step.is_finite() && self.step > 0.0) || self.max <= self.min {
            return vec![self.min];
        }
        let count = ((self.max - self.min) / self.step + 1e-9).floor() as usize + 1;
        (0..count)
            .map(|i| {
                let value = self.min + self.step * i as f64;
                (value * 1e9).round() / 1e9
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepObjective {
    #[default]
    TotalReturn,
    Sharpe,
}

fn default_top_n() -> usize {
    10
}

/// Parameter grid read from JSON; keys use the flat `RunConfig` parameter names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepGrid {
    #[serde(default)]
    pub objective: SweepObjective,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    pub parameters: BTreeMap<String, ParameterRange>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepOutcome {
    pub parameters: HashMap<String, f64>,
    pub summary: PerformanceSummary,
    pub score: f64,
}

/// Cartesian product of every range, de-duplicated by parameter signature.
pub fn expand_grid(grid: &SweepGrid) -> Result<Vec<HashMap<String, f64>>> {
    let mut variations: Vec<HashMap<String, f64>> = vec![HashMap::new()];
    for (name, range) in &grid.parameters {
        let values = range.values();
        if values.is_empty() {
            return Err(anyhow!("Parameter range for {} is not finite", name));
        }
        let mut next = Vec::with_capacity(variations.len() * values.len());
        for base in &variations {
            for value in &values {
                let mut variation = base.clone();
                variation.insert(name.clone(), *value);
                next.push(variation);
            }
        }
        if next.len() > MAX_VARIATIONS {
            return Err(anyhow!(
                "Sweep grid expands to more than {} variations",
                MAX_VARIATIONS
            ));
        }
        variations = next;
    }

    let mut seen = HashSet::new();
    variations.retain(|variation| seen.insert(parameter_signature(variation)));
    Ok(variations)
}

fn objective_score(summary: &PerformanceSummary, objective: SweepObjective) -> f64 {
    let score = match objective {
        SweepObjective::TotalReturn => summary.total_return_pct,
        SweepObjective::Sharpe => summary.sharpe_ratio,
    };
    if score.is_finite() {
        score
    } else {
        f64::NEG_INFINITY
    }
}

/// Runs every grid variation against the shared history, best first.
///
/// Each variation gets its own engine and ledger; variations whose
/// configuration fails validation are logged and left out.
pub fn run_sweep(
    history: Arc<MarketHistory>,
    base_config: &RunConfig,
    grid: &SweepGrid,
) -> Result<Vec<SweepOutcome>> {
    let variations = expand_grid(grid)?;
    let total = variations.len();
    info!(
        "Running {} sweep variations on {} worker threads",
        total,
        rayon::current_num_threads()
    );
    let started = Instant::now();
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let mut outcomes: Vec<SweepOutcome> = variations
        .into_par_iter()
        .filter_map(|parameters| {
            let history = Arc::clone(&history);
            let mut config = base_config.clone();
            config.apply_parameters(&parameters);
            let engine = match Engine::from_config(config) {
                Ok(engine) => engine,
                Err(err) => {
                    pb.inc(1);
                    warn!(
                        "Skipping variation {}: {}",
                        parameter_signature(&parameters),
                        err
                    );
                    return None;
                }
            };
            let result = engine.run(&history);
            pb.inc(1);
            let score = objective_score(&result.summary, grid.objective);
            Some(SweepOutcome {
                parameters,
                summary: result.summary,
                score,
            })
        })
        .collect();
    pb.finish_and_clear();

    // Stable on equal scores so ties keep grid order.
    outcomes.sort_by(|a, b| b.score.total_cmp(&a.score));
    info!(
        "Sweep finished {} variations in {:.1}s",
        outcomes.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(outcomes)
}

pub fn print_results(results: &[SweepOutcome], top_n: usize) {
    println!(
        "\n=== TOP {} CONFIGURATIONS ===\n",
        std::cmp::min(top_n, results.len())
    );

    for (i, result) in results.iter().take(top_n).enumerate() {
        let summary = &result.summary;
        println!("Rank {}:", i + 1);
        println!("  Total Return: {:.2}%", summary.total_return_pct);
        println!("  Annualized Return: {:.2}%", summary.annualized_return_pct);
        println!("  Sharpe Ratio: {:.2}", summary.sharpe_ratio);
        println!("  Max Drawdown: {:.2}%", summary.max_drawdown_pct);
        println!("  Win Rate: {:.2}%", summary.win_rate);
        println!("  Total Trades: {}", summary.total_trades);
        println!("  Parameters:");
        let mut keys: Vec<_> = result.parameters.keys().collect();
        keys.sort();
        for key in keys {
            println!("    {}: {}", key, result.parameters[key]);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candle, SymbolInfo};
    use chrono::{Duration, NaiveDate};

    fn grid(parameters: &[(&str, f64, f64, f64)]) -> SweepGrid {
        SweepGrid {
            objective: SweepObjective::TotalReturn,
            top_n: 5,
            parameters: parameters
                .iter()
                .map(|&(name, min, max, step)| (name.to_string(), ParameterRange { min, max, step }))
                .collect(),
        }
    }

    #[test]
    fn range_values_include_max() {
        let range = ParameterRange {
            min: 0.1,
            max: 0.3,
            step: 0.1,
        };
        assert_eq!(range.values(), vec![0.1, 0.2, 0.3]);
        let degenerate = ParameterRange {
            min: 5.0,
            max: 5.0,
            step: 0.0,
        };
        assert_eq!(degenerate.values(), vec![5.0]);
    }

    #[test]
    fn grid_is_cartesian_product() {
        let variations = expand_grid(&grid(&[
            ("stopLossPct", 3.0, 5.0, 1.0),
            ("maxPositions", 1.0, 2.0, 1.0),
        ]))
        .unwrap();
        assert_eq!(variations.len(), 6);
        let signatures: HashSet<_> = variations.iter().map(parameter_signature).collect();
        assert_eq!(signatures.len(), 6);
    }

    #[test]
    fn oversized_grid_is_rejected() {
        let result = expand_grid(&grid(&[
            ("a", 0.0, 200.0, 1.0),
            ("b", 0.0, 200.0, 1.0),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn invalid_variations_are_skipped() {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let candles: Vec<Candle> = (-60..30)
            .map(|offset| Candle {
                ticker: "AAA".to_string(),
                date: base + Duration::days(offset),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1_000,
            })
            .collect();
        let history = MarketHistory::from_candles(
            &[SymbolInfo::new("AAA", "Alpha")],
            base,
            base + Duration::days(29),
            candles,
            Vec::new(),
        );
        let outcomes = run_sweep(
            Arc::new(history),
            &RunConfig::default(),
            &grid(&[("maxPositions", 0.0, 2.0, 1.0)]),
        )
        .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|outcome| outcome.parameters["maxPositions"] >= 1.0));
    }
}
