use crate::config::{ExitPolicy, RunConfig};
use crate::data_context::Bar;
use crate::indicators::deviation_pct;
use crate::models::{round2, ClosedTrade, ExitReason, Position, PositionMode};
use chrono::NaiveDate;

pub const PRICE_EPSILON: f64 = 1e-6;

/// What `step` needs to know about the day beyond the bar itself.
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    pub day_index: usize,
    /// Last calendar day, or the last bar this symbol has inside the window.
    pub is_final_day: bool,
    /// Long moving average of the position's symbol as of today.
    pub long_ma: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitEvent {
    pub reason: ExitReason,
    pub price: f64,
    pub date: NaiveDate,
    pub day_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub position: Position,
    pub exit: Option<ExitEvent>,
}

impl StepOutcome {
    fn hold(position: Position) -> Self {
        Self {
            position,
            exit: None,
        }
    }

    fn close(position: Position, reason: ExitReason, price: f64, bar: &Bar, ctx: &StepContext) -> Self {
        Self {
            position,
            exit: Some(ExitEvent {
                reason,
                price,
                date: bar.date,
                day_index: ctx.day_index,
            }),
        }
    }
}

/// Advances one live position by one day.
///
/// Pure: the input position is never mutated and the same inputs always
/// produce the same outcome.
pub fn step(position: &Position, bar: &Bar, ctx: &StepContext, config: &RunConfig) -> StepOutcome {
    let next = position.clone();
    if ctx.is_final_day {
        return StepOutcome::close(next, ExitReason::EndOfTest, bar.close, bar, ctx);
    }
    let deviation = ctx.long_ma.and_then(|ma| deviation_pct(bar.close, ma));
    match position.mode {
        PositionMode::Fixed => step_fixed(next, bar, ctx, config, deviation),
        PositionMode::Trailing => step_trailing(next, bar, ctx, config, deviation),
    }
}

fn step_fixed(
    mut position: Position,
    bar: &Bar,
    ctx: &StepContext,
    config: &RunConfig,
    deviation: Option<f64>,
) -> StepOutcome {
    let entry = position.entry_price;

    let stop_price = entry * (1.0 - config.stop_loss_pct / 100.0);
    if bar.low <= stop_price {
        return StepOutcome::close(position, ExitReason::StopLoss, stop_price, bar, ctx);
    }

    if let (Some(threshold), Some(deviation)) = (config.ma_exit_deviation_pct, deviation) {
        if deviation >= threshold {
            return StepOutcome::close(position, ExitReason::MaDeviation, bar.close, bar, ctx);
        }
    }

    let target_price = entry * (1.0 + config.trailing_trigger_pct() / 100.0);
    if bar.high >= target_price {
        return match config.exit_policy {
            ExitPolicy::Standard => {
                StepOutcome::close(position, ExitReason::TakeProfit, target_price, bar, ctx)
            }
            ExitPolicy::Adaptive => {
                arm_trailing(&mut position, bar.high);
                StepOutcome::hold(position)
            }
        };
    }

    let holding_days = ctx.day_index.saturating_sub(position.entry_day_index);
    if holding_days as i64 >= config.max_holding_days as i64 {
        if bar.close > entry {
            arm_trailing(&mut position, bar.high);
            return StepOutcome::hold(position);
        }
        return StepOutcome::close(position, ExitReason::MaxHolding, bar.close, bar, ctx);
    }

    StepOutcome::hold(position)
}

fn arm_trailing(position: &mut Position, high: f64) {
    position.mode = PositionMode::Trailing;
    position.peak_price = high;
}

fn step_trailing(
    mut position: Position,
    bar: &Bar,
    ctx: &StepContext,
    config: &RunConfig,
    deviation: Option<f64>,
) -> StepOutcome {
    position.peak_price = position.peak_price.max(bar.high);

    let trail_pct = match config.exit_policy {
        ExitPolicy::Standard => config.trailing_stop_pct,
        ExitPolicy::Adaptive => config.adaptive.trail_pct_for(deviation),
    };
    let stop_price = position.peak_price * (1.0 - trail_pct / 100.0);
    if bar.low <= stop_price {
        return StepOutcome::close(position, ExitReason::TrailingStop, stop_price, bar, ctx);
    }

    if config.exit_policy == ExitPolicy::Adaptive {
        if let Some(deviation) = deviation {
            let adaptive = &config.adaptive;
            if deviation >= adaptive.warning_deviation_pct && !position.in_warning_zone {
                position.in_warning_zone = true;
                position.peak_deviation = deviation;
            }
            if position.in_warning_zone {
                position.peak_deviation = position.peak_deviation.max(deviation);
                if position.peak_deviation - deviation > adaptive.peak_drop_pct {
                    return StepOutcome::close(
                        position,
                        ExitReason::MaDeviation,
                        bar.close,
                        bar,
                        ctx,
                    );
                }
            }
        }
    }

    StepOutcome::hold(position)
}

/// Turns a closed position into its trade log row.
pub fn close_position(position: &Position, exit: &ExitEvent) -> ClosedTrade {
    let entry = position.entry_price;
    ClosedTrade {
        symbol: position.symbol.clone(),
        name: position.name.clone(),
        signal_type: position.signal_type,
        signal_score: position.signal_score,
        entry_date: position.entry_date,
        entry_price: entry,
        detection_day_index: position.detection_day_index,
        entry_day_index: position.entry_day_index,
        exit_date: exit.date,
        exit_price: exit.price,
        exit_day_index: exit.day_index,
        exit_reason: exit.reason,
        shares: position.shares,
        return_pct: round2((exit.price - entry) / entry * 100.0),
        profit: (exit.price - entry) * position.shares as f64,
        holding_days: exit.day_index.saturating_sub(position.entry_day_index),
    }
}

/// Whole shares to buy at `fill` from one slot, capped by available cash.
/// None when not even one share is affordable.
pub fn determine_shares(per_slot_capital: f64, available_cash: f64, fill: f64) -> Option<i64> {
    if !(fill.is_finite() && fill > 0.0) || !available_cash.is_finite() {
        return None;
    }
    let mut shares = (per_slot_capital / fill).floor().max(0.0) as i64;
    if shares as f64 * fill > available_cash {
        shares = (available_cash.max(0.0) / fill).floor() as i64;
        while shares > 0 && shares as f64 * fill > available_cash {
            shares -= 1;
        }
    }
    (shares > 0).then_some(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdaptiveTrailingConfig;
    use crate::models::SignalType;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn position(entry: f64) -> Position {
        Position {
            symbol: "AAA".to_string(),
            name: "Alpha".to_string(),
            signal_type: SignalType::Breakout,
            signal_score: 80.0,
            detection_day_index: 0,
            entry_day_index: 1,
            entry_date: date(2),
            entry_price: entry,
            shares: 100,
            mode: PositionMode::Fixed,
            peak_price: entry,
            in_warning_zone: false,
            peak_deviation: 0.0,
        }
    }

    fn bar(day: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            date: date(day),
            open,
            high,
            low,
            close,
            volume: 1_000,
        }
    }

    fn ctx(day_index: usize) -> StepContext {
        StepContext {
            day_index,
            is_final_day: false,
            long_ma: None,
        }
    }

    fn adaptive_config() -> RunConfig {
        RunConfig {
            exit_policy: ExitPolicy::Adaptive,
            ma_exit_deviation_pct: None,
            adaptive: AdaptiveTrailingConfig::default(),
            ..RunConfig::default()
        }
    }

    #[test]
    fn stop_loss_fills_at_stop_price() {
        let outcome = step(
            &position(100.0),
            &bar(3, 98.0, 99.0, 90.0, 92.0),
            &ctx(2),
            &RunConfig::default(),
        );
        let exit = outcome.exit.expect("exit");
        assert_eq!(exit.reason, ExitReason::StopLoss);
        assert!((exit.price - 95.0).abs() < 1e-9);
        let trade = close_position(&outcome.position, &exit);
        assert_eq!(trade.return_pct, -5.0);
        assert!((trade.profit + 500.0).abs() < 1e-6);
        assert_eq!(trade.holding_days, 1);
        assert_eq!(trade.detection_day_index, 0);
        assert_eq!(trade.entry_day_index, trade.detection_day_index + 1);
    }

    #[test]
    fn stop_loss_wins_over_take_profit_on_same_bar() {
        let outcome = step(
            &position(100.0),
            &bar(3, 100.0, 120.0, 94.0, 100.0),
            &ctx(2),
            &RunConfig::default(),
        );
        assert_eq!(outcome.exit.map(|e| e.reason), Some(ExitReason::StopLoss));
    }

    #[test]
    fn standard_take_profit_fills_at_target() {
        let outcome = step(
            &position(100.0),
            &bar(3, 101.0, 118.0, 100.0, 110.0),
            &ctx(2),
            &RunConfig::default(),
        );
        let exit = outcome.exit.expect("exit");
        assert_eq!(exit.reason, ExitReason::TakeProfit);
        assert!((exit.price - 115.0).abs() < 1e-9);
    }

    #[test]
    fn adaptive_take_profit_switches_to_trailing_without_same_day_check() {
        let outcome = step(
            &position(100.0),
            &bar(3, 101.0, 118.0, 100.0, 101.0),
            &ctx(2),
            &adaptive_config(),
        );
        assert!(outcome.exit.is_none());
        assert_eq!(outcome.position.mode, PositionMode::Trailing);
        assert_eq!(outcome.position.peak_price, 118.0);
    }

    #[test]
    fn profit_trigger_overrides_take_profit_for_adaptive() {
        let mut config = adaptive_config();
        config.adaptive.profit_trigger_pct = Some(8.0);
        let outcome = step(
            &position(100.0),
            &bar(3, 101.0, 109.0, 100.0, 108.0),
            &ctx(2),
            &config,
        );
        assert_eq!(outcome.position.mode, PositionMode::Trailing);
    }

    #[test]
    fn ma_deviation_exits_fixed_position_at_close() {
        let outcome = step(
            &position(100.0),
            &bar(3, 100.0, 104.0, 99.0, 104.0),
            &StepContext {
                long_ma: Some(80.0),
                ..ctx(2)
            },
            &RunConfig::default(),
        );
        let exit = outcome.exit.expect("exit");
        assert_eq!(exit.reason, ExitReason::MaDeviation);
        assert_eq!(exit.price, 104.0);
    }

    #[test]
    fn max_holding_in_profit_arms_trailing() {
        let outcome = step(
            &position(100.0),
            &bar(25, 103.0, 106.0, 102.0, 105.0),
            &ctx(21),
            &RunConfig::default(),
        );
        assert!(outcome.exit.is_none());
        assert_eq!(outcome.position.mode, PositionMode::Trailing);
        assert_eq!(outcome.position.peak_price, 106.0);
    }

    #[test]
    fn max_holding_at_loss_closes_at_close() {
        let outcome = step(
            &position(100.0),
            &bar(25, 99.0, 100.0, 97.0, 98.0),
            &ctx(21),
            &RunConfig::default(),
        );
        let exit = outcome.exit.expect("exit");
        assert_eq!(exit.reason, ExitReason::MaxHolding);
        assert_eq!(exit.price, 98.0);
    }

    #[test]
    fn trailing_updates_peak_before_checking_stop() {
        let mut trailing = position(100.0);
        trailing.mode = PositionMode::Trailing;
        trailing.peak_price = 120.0;
        let outcome = step(
            &trailing,
            &bar(10, 121.0, 130.0, 123.0, 125.0),
            &ctx(9),
            &RunConfig::default(),
        );
        let exit = outcome.exit.expect("exit");
        assert_eq!(exit.reason, ExitReason::TrailingStop);
        assert!((exit.price - 123.5).abs() < 1e-9);
        assert_eq!(outcome.position.peak_price, 130.0);
    }

    #[test]
    fn adaptive_trail_widens_with_deviation() {
        let mut trailing = position(100.0);
        trailing.mode = PositionMode::Trailing;
        trailing.peak_price = 120.0;
        let outcome = step(
            &trailing,
            &bar(10, 115.0, 116.0, 111.0, 112.0),
            &StepContext {
                long_ma: Some(100.0),
                ..ctx(9)
            },
            &adaptive_config(),
        );
        // Deviation 12% selects the 8% tier: stop at 110.4, untouched by a 111 low.
        assert!(outcome.exit.is_none());
    }

    #[test]
    fn warning_zone_peak_reversal_exits_at_close() {
        let mut trailing = position(100.0);
        trailing.mode = PositionMode::Trailing;
        trailing.peak_price = 140.0;
        let config = adaptive_config();
        let ma = Some(100.0);

        let first = step(
            &trailing,
            &bar(10, 138.0, 140.0, 136.0, 130.0),
            &StepContext { long_ma: ma, ..ctx(9) },
            &config,
        );
        assert!(first.exit.is_none());
        assert!(first.position.in_warning_zone);
        assert!((first.position.peak_deviation - 30.0).abs() < 1e-9);

        let second = step(
            &first.position,
            &bar(11, 130.0, 131.0, 124.0, 124.5),
            &StepContext { long_ma: ma, ..ctx(10) },
            &config,
        );
        let exit = second.exit.expect("exit");
        assert_eq!(exit.reason, ExitReason::MaDeviation);
        assert_eq!(exit.price, 124.5);
    }

    #[test]
    fn final_day_forces_close() {
        let outcome = step(
            &position(100.0),
            &bar(3, 100.0, 101.0, 50.0, 99.0),
            &StepContext {
                is_final_day: true,
                ..ctx(2)
            },
            &RunConfig::default(),
        );
        let exit = outcome.exit.expect("exit");
        assert_eq!(exit.reason, ExitReason::EndOfTest);
        assert_eq!(exit.price, 99.0);
    }

    #[test]
    fn shares_capped_by_cash() {
        assert_eq!(determine_shares(1_000.0, 10_000.0, 30.0), Some(33));
        assert_eq!(determine_shares(1_000.0, 500.0, 30.0), Some(16));
        assert_eq!(determine_shares(1_000.0, 20.0, 30.0), None);
        assert_eq!(determine_shares(10.0, 10_000.0, 30.0), None);
    }
}
