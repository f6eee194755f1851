use crate::models::{ClosedTrade, EquityPoint, Position};
use crate::trading_rules::{close_position, ExitEvent, PRICE_EPSILON};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Mutable ledger of one run: cash, live positions, the trade log, the
/// equity curve, cooldowns and last known marks.
#[derive(Debug, Clone)]
pub struct SimulationState {
    cash: f64,
    positions: Vec<Position>,
    trades: Vec<ClosedTrade>,
    equity_curve: Vec<EquityPoint>,
    cooldowns: HashMap<String, usize>,
    last_marks: HashMap<String, f64>,
}

impl SimulationState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            positions: Vec::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            cooldowns: HashMap::new(),
            last_marks: HashMap::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn trades(&self) -> &[ClosedTrade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn free_slots(&self, max_positions: usize) -> usize {
        max_positions.saturating_sub(self.positions.len())
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.iter().any(|p| p.symbol == symbol)
    }

    /// True while `day_index` is before the symbol's re-eligible day.
    pub fn is_cooling_down(&self, symbol: &str, day_index: usize) -> bool {
        self.cooldowns
            .get(symbol)
            .map_or(false, |&until| day_index < until)
    }

    pub fn cooldown_until(&self, symbol: &str) -> Option<usize> {
        self.cooldowns.get(symbol).copied()
    }

    /// Debits the cost and starts tracking the position.
    pub fn open_position(&mut self, position: Position) -> Result<()> {
        if self.has_position(&position.symbol) {
            return Err(anyhow!("{} already has a live position", position.symbol));
        }
        let cost = position.cost_basis();
        if cost > self.cash + PRICE_EPSILON {
            return Err(anyhow!(
                "Insufficient cash for {}: cost {:.2}, cash {:.2}",
                position.symbol,
                cost,
                self.cash
            ));
        }
        self.cash = (self.cash - cost).max(0.0);
        self.positions.push(position);
        Ok(())
    }

    /// Removes every live position so the caller can step them; survivors
    /// are handed back through `keep_position` in the same order.
    pub fn take_positions(&mut self) -> Vec<Position> {
        std::mem::take(&mut self.positions)
    }

    pub fn keep_position(&mut self, position: Position) {
        self.positions.push(position);
    }

    /// Credits the proceeds, logs the trade and starts the cooldown.
    pub fn close_position(&mut self, position: &Position, exit: &ExitEvent, cooldown_days: usize) {
        let trade = close_position(position, exit);
        self.cash += exit.price * position.shares as f64;
        self.cooldowns
            .insert(position.symbol.clone(), exit.day_index + cooldown_days);
        self.last_marks.insert(position.symbol.clone(), exit.price);
        self.trades.push(trade);
    }

    pub fn update_mark(&mut self, symbol: &str, close: f64) {
        self.last_marks.insert(symbol.to_string(), close);
    }

    /// Mark-to-market value of live positions at the end of `day_index`.
    ///
    /// Positions entering tomorrow are valued at their entry price; the rest
    /// at the last known close, falling back to entry when none was seen.
    pub fn positions_value(&self, day_index: usize) -> f64 {
        self.positions
            .iter()
            .map(|position| {
                let mark = if position.entry_day_index > day_index {
                    position.entry_price
                } else {
                    self.last_marks
                        .get(&position.symbol)
                        .copied()
                        .unwrap_or(position.entry_price)
                };
                mark * position.shares as f64
            })
            .sum()
    }

    pub fn record_equity(&mut self, date: NaiveDate, day_index: usize) -> &EquityPoint {
        let positions_value = self.positions_value(day_index);
        self.equity_curve.push(EquityPoint {
            date,
            value: self.cash + positions_value,
            cash: self.cash,
            positions_value,
            open_positions: self.positions.len(),
        });
        let last = self.equity_curve.len() - 1;
        &self.equity_curve[last]
    }

    pub fn into_parts(self) -> (Vec<ClosedTrade>, Vec<EquityPoint>) {
        (self.trades, self.equity_curve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, PositionMode, SignalType};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn position(symbol: &str, entry_day_index: usize, price: f64, shares: i64) -> Position {
        Position {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            signal_type: SignalType::Pullback,
            signal_score: 70.0,
            detection_day_index: entry_day_index - 1,
            entry_day_index,
            entry_date: date(entry_day_index as u32 + 1),
            entry_price: price,
            shares,
            mode: PositionMode::Fixed,
            peak_price: price,
            in_warning_zone: false,
            peak_deviation: 0.0,
        }
    }

    #[test]
    fn open_and_close_keep_cash_consistent() {
        let mut state = SimulationState::new(10_000.0);
        state.open_position(position("AAA", 1, 50.0, 100)).unwrap();
        assert!((state.cash() - 5_000.0).abs() < 1e-9);

        let positions = state.take_positions();
        let exit = ExitEvent {
            reason: ExitReason::TakeProfit,
            price: 60.0,
            date: date(5),
            day_index: 4,
        };
        state.close_position(&positions[0], &exit, 5);
        assert!((state.cash() - 11_000.0).abs() < 1e-9);
        assert_eq!(state.trades().len(), 1);
        assert_eq!(state.cooldown_until("AAA"), Some(9));
        assert!(state.is_cooling_down("AAA", 8));
        assert!(!state.is_cooling_down("AAA", 9));
    }

    #[test]
    fn rejects_duplicate_symbol_and_overdraft() {
        let mut state = SimulationState::new(1_000.0);
        state.open_position(position("AAA", 1, 5.0, 100)).unwrap();
        assert!(state.open_position(position("AAA", 2, 5.0, 1)).is_err());
        assert!(state.open_position(position("BBB", 2, 5.0, 200)).is_err());
        assert_eq!(state.open_count(), 1);
    }

    #[test]
    fn pending_entry_is_marked_at_entry_price() {
        let mut state = SimulationState::new(10_000.0);
        state.open_position(position("AAA", 3, 20.0, 100)).unwrap();
        state.update_mark("AAA", 25.0);
        let point = state.record_equity(date(3), 2).clone();
        assert!((point.value - 10_000.0).abs() < 1e-9);
        let point = state.record_equity(date(4), 3).clone();
        assert!((point.value - 10_500.0).abs() < 1e-9);
        assert_eq!(point.open_positions, 1);
    }
}
