use crate::config::{ConfigError, RunConfig, RunRequest};
use crate::data_context::{load_market_history, MarketHistory};
use crate::indicators::IndicatorSet;
use crate::models::*;
use crate::performance::PerformanceCalculator;
use crate::repository::PriceRepository;
use crate::scheduler::{collect_candidates, fill_slots, is_scan_day};
use crate::signals::DetectorSet;
use crate::state::SimulationState;
use crate::trading_rules::{step, StepContext};
use anyhow::Result;
use chrono::NaiveDate;
use log::{debug, info};
use rayon::prelude::*;
use uuid::Uuid;

/// Replays a `MarketHistory` day by day under one validated configuration.
pub struct Engine {
    config: RunConfig,
    detectors: DetectorSet,
}

impl Engine {
    pub fn new(config: RunConfig, detectors: DetectorSet) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, detectors })
    }

    /// Engine with the reference detectors for the enabled signal types.
    pub fn from_config(config: RunConfig) -> Result<Self, ConfigError> {
        let detectors = DetectorSet::from_config(&config);
        Self::new(config, detectors)
    }

    pub fn run(&self, history: &MarketHistory) -> RunResult {
        if !history.is_runnable() {
            info!(
                "Nothing to simulate: {} symbols, {} trading days",
                history.symbol_count(),
                history.calendar().len()
            );
            let mut empty = RunResult::empty(
                history.start_date(),
                history.end_date(),
                self.config.initial_capital,
            );
            empty.symbols_loaded = history.symbol_count();
            return empty;
        }

        info!(
            "Running backtest over {} symbols and {} trading days ({} to {})",
            history.symbol_count(),
            history.calendar().len(),
            history.start_date(),
            history.end_date()
        );

        let state = self.run_simulation_loop(history);
        let (trades, equity_curve) = state.into_parts();
        let result = self.build_result(history, trades, equity_curve);

        info!(
            "Backtest finished: {} trades, total return {:.2}%, max drawdown {:.2}%",
            result.summary.total_trades,
            result.summary.total_return_pct,
            result.summary.max_drawdown_pct
        );
        result
    }

    fn run_simulation_loop(&self, history: &MarketHistory) -> SimulationState {
        let config = &self.config;
        let calendar = history.calendar();
        let indicators: Vec<IndicatorSet> = history
            .series()
            .par_iter()
            .map(|series| IndicatorSet::compute(series, config.long_ma_period))
            .collect();
        let last_window_dates: Vec<Option<NaiveDate>> = history
            .series()
            .iter()
            .map(|series| {
                series
                    .last_bar_on_or_before(history.end_date())
                    .map(|bar| bar.date)
            })
            .collect();

        let cooldown_days = config.cooldown_days.max(0) as usize;
        let scan_interval = config.scan_interval_days.max(1) as usize;
        let max_positions = config.slot_count();
        let mut state = SimulationState::new(config.initial_capital);

        for (day_index, &current_date) in calendar.dates().iter().enumerate() {
            let is_last_day = calendar.is_last(day_index);

            for position in state.take_positions() {
                if position.entry_day_index > day_index {
                    state.keep_position(position);
                    continue;
                }
                let Some(series_index) = history.series_index(&position.symbol) else {
                    state.keep_position(position);
                    continue;
                };
                let series = &history.series()[series_index];
                let Some((bar_index, bar)) = series
                    .bar_index(current_date)
                    .and_then(|index| series.bar(index).map(|bar| (index, bar)))
                else {
                    // Data gap: hold and keep the last mark.
                    state.keep_position(position);
                    continue;
                };

                state.update_mark(&position.symbol, bar.close);
                let ctx = StepContext {
                    day_index,
                    is_final_day: is_last_day
                        || last_window_dates[series_index] == Some(current_date),
                    long_ma: indicators[series_index].long_ma_at(bar_index),
                };
                let outcome = step(&position, &bar, &ctx, config);
                match outcome.exit {
                    Some(exit) => {
                        debug!(
                            "{} closed on {} ({}) at {:.2}",
                            outcome.position.symbol,
                            exit.date,
                            exit.reason.as_str(),
                            exit.price
                        );
                        state.close_position(&outcome.position, &exit, cooldown_days);
                    }
                    None => state.keep_position(outcome.position),
                }
            }

            if is_scan_day(day_index, scan_interval) && state.free_slots(max_positions) > 0 {
                let candidates =
                    collect_candidates(history, &indicators, &state, day_index, &self.detectors);
                if !candidates.is_empty() {
                    let opened = fill_slots(history, &mut state, candidates, day_index, config);
                    debug!("{}: opened {} positions", current_date, opened);
                }
            }

            state.record_equity(current_date, day_index);
        }

        state
    }

    fn build_result(
        &self,
        history: &MarketHistory,
        trades: Vec<ClosedTrade>,
        equity_curve: Vec<EquityPoint>,
    ) -> RunResult {
        let initial_capital = self.config.initial_capital;
        let summary =
            PerformanceCalculator::calculate_summary(&trades, &equity_curve, initial_capital);
        let benchmarks = history
            .benchmarks()
            .iter()
            .filter_map(|series| {
                PerformanceCalculator::normalize_benchmark(series, &equity_curve, initial_capital)
            })
            .collect();

        RunResult {
            id: Uuid::new_v4().to_string(),
            start_date: history.start_date(),
            end_date: history.end_date(),
            symbols_loaded: history.symbol_count(),
            summary,
            equity_curve,
            benchmarks,
            by_signal_type: PerformanceCalculator::breakdown_by_signal_type(&trades),
            by_month: PerformanceCalculator::breakdown_by_month(&trades),
            trades,
        }
    }
}

/// Validates the request, loads its history through `repository` and runs it.
pub async fn run_backtest<R: PriceRepository>(
    request: &RunRequest,
    repository: &R,
    detectors: DetectorSet,
) -> Result<RunResult> {
    request.validate()?;
    let engine = Engine::new(request.config.clone(), detectors)?;
    let history = load_market_history(repository, request).await?;
    Ok(engine.run(&history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregationMode;
    use crate::data_context::HistoryPrefix;
    use crate::indicators::IndicatorPrefix;
    use crate::strategy::SignalDetector;
    use chrono::Duration;

    struct FireOnce {
        symbol: &'static str,
        date: NaiveDate,
    }

    impl SignalDetector for FireOnce {
        fn signal_type(&self) -> SignalType {
            SignalType::Breakout
        }

        fn min_history(&self) -> usize {
            1
        }

        fn detect(
            &self,
            history: &HistoryPrefix<'_>,
            _indicators: &IndicatorPrefix<'_>,
        ) -> Result<Option<SignalCandidate>> {
            let fires = history.symbol == self.symbol
                && history.today().map(|bar| bar.date) == Some(self.date);
            Ok(fires.then(|| SignalCandidate::new(SignalType::Breakout, 80.0)))
        }
    }

    fn create_date(days_offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(days_offset)
    }

    fn generate_candles(ticker: &str, from: i64, prices: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &price)| Candle {
                ticker: ticker.to_string(),
                date: create_date(from + i as i64),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 10_000,
            })
            .collect()
    }

    fn engine_with(detector: FireOnce, config: RunConfig) -> Engine {
        let detectors =
            DetectorSet::with_detectors(vec![Box::new(detector)], AggregationMode::BestOf, 60.0);
        Engine::new(config, detectors).unwrap()
    }

    #[test]
    fn rejects_invalid_config_before_running() {
        let config = RunConfig {
            max_positions: 0,
            ..RunConfig::default()
        };
        assert!(matches!(
            Engine::from_config(config),
            Err(ConfigError::InvalidPositionSlots(0))
        ));
    }

    #[test]
    fn short_window_yields_empty_result() {
        let universe = vec![SymbolInfo::new("AAA", "Alpha")];
        let candles = generate_candles("AAA", -60, &[100.0; 65]);
        let history =
            MarketHistory::from_candles(&universe, create_date(0), create_date(4), candles, Vec::new());
        let engine = Engine::from_config(RunConfig::default()).unwrap();
        let result = engine.run(&history);
        assert!(result.is_empty());
        assert_eq!(result.symbols_loaded, 1);
        assert_eq!(result.summary.final_equity, RunConfig::default().initial_capital);
    }

    #[test]
    fn entry_fills_next_day_open_and_marks_equity() {
        let universe = vec![SymbolInfo::new("AAA", "Alpha")];
        let mut prices = vec![100.0; 60];
        prices.extend([100.0, 100.0, 104.0, 104.0, 104.0, 104.0, 104.0, 104.0, 104.0, 104.0]);
        let candles = generate_candles("AAA", -60, &prices);
        let history =
            MarketHistory::from_candles(&universe, create_date(0), create_date(9), candles, Vec::new());
        let config = RunConfig {
            initial_capital: 10_000.0,
            max_positions: 1,
            ma_exit_deviation_pct: None,
            ..RunConfig::default()
        };
        let engine = engine_with(
            FireOnce {
                symbol: "AAA",
                date: create_date(0),
            },
            config,
        );
        let result = engine.run(&history);

        assert_eq!(result.equity_curve.len(), 10);
        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.entry_day_index, 1);
        assert_eq!(trade.entry_date, create_date(1));
        assert_eq!(trade.shares, 100);
        assert_eq!(trade.exit_reason, ExitReason::EndOfTest);
        assert_eq!(trade.exit_day_index, 9);
        assert_eq!(trade.return_pct, 4.0);

        // Day 0: cash debited, position marked at entry price.
        let day0 = &result.equity_curve[0];
        assert!((day0.cash - 0.0).abs() < 1e-9);
        assert!((day0.value - 10_000.0).abs() < 1e-9);
        let day2 = &result.equity_curve[2];
        assert!((day2.value - 10_400.0).abs() < 1e-9);
        assert_eq!(result.summary.final_equity, 10_400.0);
    }
}
