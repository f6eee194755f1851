use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Candle {
    /// A bar is usable when every price is finite and strictly positive.
    pub fn is_usable(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|value| value.is_finite() && *value > 0.0)
    }
}

/// One entry of the symbol universe handed to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub code: String,
    #[serde(default)]
    pub name: String,
}

impl SymbolInfo {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Pullback,
    Breakout,
    SupportTest,
    OversoldRebound,
}

impl SignalType {
    pub const ALL: [SignalType; 4] = [
        SignalType::Pullback,
        SignalType::Breakout,
        SignalType::SupportTest,
        SignalType::OversoldRebound,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Pullback => "pullback",
            SignalType::Breakout => "breakout",
            SignalType::SupportTest => "support_test",
            SignalType::OversoldRebound => "oversold_rebound",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a detector: which pattern fired and how strongly (0..=100).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalCandidate {
    pub signal_type: SignalType,
    pub score: f64,
}

impl SignalCandidate {
    pub fn new(signal_type: SignalType, score: f64) -> Self {
        Self {
            signal_type,
            score: score.clamp(0.0, 100.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    MaDeviation,
    MaxHolding,
    EndOfTest,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::MaDeviation => "ma_deviation",
            ExitReason::MaxHolding => "max_holding",
            ExitReason::EndOfTest => "end_of_test",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    Fixed,
    Trailing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub name: String,
    pub signal_type: SignalType,
    pub signal_score: f64,
    pub detection_day_index: usize,
    pub entry_day_index: usize,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub shares: i64,
    pub mode: PositionMode,
    pub peak_price: f64,
    pub in_warning_zone: bool,
    pub peak_deviation: f64,
}

impl Position {
    pub fn cost_basis(&self) -> f64 {
        self.entry_price * self.shares as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    pub symbol: String,
    pub name: String,
    pub signal_type: SignalType,
    pub signal_score: f64,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub detection_day_index: usize,
    pub entry_day_index: usize,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub exit_day_index: usize,
    pub exit_reason: ExitReason,
    pub shares: i64,
    pub return_pct: f64,
    pub profit: f64,
    pub holding_days: usize,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.profit > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub cash: f64,
    pub positions_value: f64,
    pub open_positions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCurve {
    pub code: String,
    pub points: Vec<BenchmarkPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub annualized_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_return_pct: f64,
    pub avg_holding_days: f64,
    pub profit_factor: f64,
    pub best_trade_pct: f64,
    pub worst_trade_pct: f64,
    pub total_profit: f64,
    pub avg_open_positions: f64,
    pub trading_days: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownRow {
    pub key: String,
    pub trades: usize,
    pub win_rate: f64,
    pub avg_return_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub symbols_loaded: usize,
    pub summary: PerformanceSummary,
    pub equity_curve: Vec<EquityPoint>,
    pub benchmarks: Vec<BenchmarkCurve>,
    pub by_signal_type: Vec<BreakdownRow>,
    pub by_month: Vec<BreakdownRow>,
    pub trades: Vec<ClosedTrade>,
}

impl RunResult {
    /// Structurally valid, zero-valued result for runs with nothing to simulate.
    pub fn empty(start_date: NaiveDate, end_date: NaiveDate, initial_capital: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            start_date,
            end_date,
            symbols_loaded: 0,
            summary: PerformanceSummary {
                initial_capital,
                final_equity: initial_capital,
                ..Default::default()
            },
            equity_curve: Vec::new(),
            benchmarks: Vec::new(),
            by_signal_type: Vec::new(),
            by_month: Vec::new(),
            trades: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.equity_curve.is_empty()
    }
}

/// Rounds to two decimals, the precision used for every reported percentage.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
