use crate::data_context::OhlcvSeries;
use crate::models::*;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Reported when there are winning trades but no losing ones.
pub const PROFIT_FACTOR_NO_LOSSES: f64 = 999.99;
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate_summary(
        trades: &[ClosedTrade],
        equity_curve: &[EquityPoint],
        initial_capital: f64,
    ) -> PerformanceSummary {
        let trading_days = equity_curve.len();
        let final_equity = equity_curve
            .last()
            .map(|point| point.value)
            .filter(|value| value.is_finite())
            .unwrap_or(initial_capital);

        let total_trades = trades.len();
        let winning_trades = trades.iter().filter(|t| t.profit > 0.0).count();
        let losing_trades = trades.iter().filter(|t| t.profit < 0.0).count();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
        let holding: Vec<f64> = trades.iter().map(|t| t.holding_days as f64).collect();
        let open_counts: Vec<f64> = equity_curve
            .iter()
            .map(|p| p.open_positions as f64)
            .collect();

        let best_trade_pct = returns.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let worst_trade_pct = returns.iter().copied().fold(f64::INFINITY, f64::min);

        PerformanceSummary {
            initial_capital,
            final_equity: round2(final_equity),
            total_return_pct: round2(Self::calculate_total_return_pct(initial_capital, final_equity)),
            annualized_return_pct: round2(Self::calculate_annualized_return_pct(
                initial_capital,
                final_equity,
                trading_days,
            )),
            max_drawdown_pct: round2(Self::calculate_max_drawdown_pct(equity_curve)),
            sharpe_ratio: round2(Self::calculate_sharpe_ratio(equity_curve)),
            total_trades,
            winning_trades,
            losing_trades,
            win_rate: round2(win_rate),
            avg_return_pct: round2(Self::average(&returns)),
            avg_holding_days: round2(Self::average(&holding)),
            profit_factor: round2(Self::calculate_profit_factor(trades)),
            best_trade_pct: if best_trade_pct.is_finite() { best_trade_pct } else { 0.0 },
            worst_trade_pct: if worst_trade_pct.is_finite() { worst_trade_pct } else { 0.0 },
            total_profit: round2(trades.iter().map(|t| t.profit).sum()),
            avg_open_positions: round2(Self::average(&open_counts)),
            trading_days,
        }
    }

    fn calculate_total_return_pct(initial_capital: f64, final_equity: f64) -> f64 {
        if initial_capital <= 0.0 {
            return 0.0;
        }
        (final_equity / initial_capital - 1.0) * 100.0
    }

    /// `((final / initial) ^ (252 / n_days) - 1) * 100`.
    pub fn calculate_annualized_return_pct(
        initial_capital: f64,
        final_equity: f64,
        trading_days: usize,
    ) -> f64 {
        if initial_capital <= 0.0 || trading_days == 0 || !final_equity.is_finite() {
            return 0.0;
        }
        let ratio = final_equity / initial_capital;
        if ratio <= 0.0 {
            return -100.0;
        }
        (ratio.powf(TRADING_DAYS_PER_YEAR / trading_days as f64) - 1.0) * 100.0
    }

    fn average(values: &[f64]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;

        for value in values.iter().copied() {
            if value.is_finite() {
                sum += value;
                count += 1;
            }
        }

        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Mean over sample standard deviation of day-over-day returns,
    /// annualized with sqrt(252). No risk-free rate.
    pub fn calculate_sharpe_ratio(equity_curve: &[EquityPoint]) -> f64 {
        if equity_curve.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|window| {
                let prev_value = window[0].value;
                let curr_value = window[1].value;
                if prev_value > 0.0 {
                    (curr_value - prev_value) / prev_value
                } else {
                    0.0
                }
            })
            .collect();

        if returns.len() < 2 {
            return 0.0;
        }

        let mean_return = returns.as_slice().mean();
        let std_dev = returns.as_slice().std_dev();

        if !std_dev.is_finite() || std_dev <= f64::EPSILON {
            return 0.0;
        }

        mean_return / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    pub fn calculate_max_drawdown_pct(equity_curve: &[EquityPoint]) -> f64 {
        let Some(first) = equity_curve.first() else {
            return 0.0;
        };

        let mut max_drawdown_percent = 0.0;
        let mut peak_value = first.value;

        for point in equity_curve {
            if point.value > peak_value {
                peak_value = point.value;
            } else if peak_value > 0.0 {
                let drawdown_percent = (peak_value - point.value) / peak_value * 100.0;
                if drawdown_percent > max_drawdown_percent {
                    max_drawdown_percent = drawdown_percent;
                }
            }
        }

        max_drawdown_percent
    }

    /// Gross profit over gross loss.
    pub fn calculate_profit_factor(trades: &[ClosedTrade]) -> f64 {
        let gross_profit: f64 = trades.iter().filter(|t| t.profit > 0.0).map(|t| t.profit).sum();
        let gross_loss: f64 = trades
            .iter()
            .filter(|t| t.profit < 0.0)
            .map(|t| t.profit.abs())
            .sum();

        if trades.is_empty() || gross_profit <= 0.0 {
            return 0.0;
        }
        if gross_loss <= 0.0 {
            return PROFIT_FACTOR_NO_LOSSES;
        }
        gross_profit / gross_loss
    }

    pub fn breakdown_by_signal_type(trades: &[ClosedTrade]) -> Vec<BreakdownRow> {
        Self::breakdown(trades, |trade| trade.signal_type.as_str().to_string())
    }

    /// Grouped by exit month, `YYYY-MM`.
    pub fn breakdown_by_month(trades: &[ClosedTrade]) -> Vec<BreakdownRow> {
        Self::breakdown(trades, |trade| trade.exit_date.format("%Y-%m").to_string())
    }

    fn breakdown<F>(trades: &[ClosedTrade], key: F) -> Vec<BreakdownRow>
    where
        F: Fn(&ClosedTrade) -> String,
    {
        let mut groups: BTreeMap<String, Vec<&ClosedTrade>> = BTreeMap::new();
        for trade in trades {
            groups.entry(key(trade)).or_default().push(trade);
        }

        groups
            .into_iter()
            .map(|(key, group)| {
                let wins = group.iter().filter(|t| t.is_win()).count();
                let returns: Vec<f64> = group.iter().map(|t| t.return_pct).collect();
                BreakdownRow {
                    key,
                    trades: group.len(),
                    win_rate: round2(wins as f64 / group.len() as f64 * 100.0),
                    avg_return_pct: round2(Self::average(&returns)),
                }
            })
            .collect()
    }

    /// Index series rescaled so its value equals `initial_capital` on the
    /// first equity date, sampled on every equity date with carry-forward.
    pub fn normalize_benchmark(
        series: &OhlcvSeries,
        equity_curve: &[EquityPoint],
        initial_capital: f64,
    ) -> Option<BenchmarkCurve> {
        let first_date = equity_curve.first()?.date;
        let base = series
            .last_bar_on_or_before(first_date)
            .or_else(|| series.bar(0))?
            .close;
        if !(base.is_finite() && base > 0.0) {
            return None;
        }

        let points = equity_curve
            .iter()
            .map(|point| {
                let value = series
                    .last_bar_on_or_before(point.date)
                    .map(|bar| initial_capital * bar.close / base)
                    .unwrap_or(initial_capital);
                BenchmarkPoint {
                    date: point.date,
                    value: round2(value),
                }
            })
            .collect();

        Some(BenchmarkCurve {
            code: series.symbol().to_string(),
            points,
        })
    }
}
