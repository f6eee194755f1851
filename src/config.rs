use crate::models::{SignalType, SymbolInfo};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Validation failures that stop a run before the simulation loop starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("maxPositions must be >= 1 (value: {0})")]
    InvalidPositionSlots(i32),

    #[error("initialCapital must be a positive number (value: {0})")]
    NonPositiveCapital(f64),

    #[error("startDate {start} is after endDate {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("{field} must be within ({min}, {max}) (value: {value})")]
    PercentOutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must be >= {min} (value: {value})")]
    DaysOutOfRange {
        field: &'static str,
        value: i32,
        min: i32,
    },

    #[error("longMaPeriod must be >= 1")]
    InvalidLongMaPeriod,

    #[error("adaptive trailing schedule is invalid: {0}")]
    InvalidAdaptiveSchedule(String),

    #[error("at least one signal type must be enabled")]
    NoSignalTypes,

    #[error("symbol universe is empty")]
    EmptyUniverse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitPolicy {
    /// Take-profit closes the position; trailing percentage is constant.
    #[default]
    Standard,
    /// Take-profit arms a trailing stop whose width follows MA deviation.
    Adaptive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Run every detector, keep the single best score (>= 60).
    #[default]
    BestOf,
    /// Run detectors in configured order, keep the first passing the minimum score.
    FirstMatch,
}

/// Three-tier trailing schedule keyed by deviation above the long moving average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdaptiveTrailingConfig {
    pub deviation_thresholds: [f64; 2],
    pub trail_pcts: [f64; 3],
    pub profit_trigger_pct: Option<f64>,
    pub warning_deviation_pct: f64,
    pub peak_drop_pct: f64,
}

impl Default for AdaptiveTrailingConfig {
    fn default() -> Self {
        Self {
            deviation_thresholds: [10.0, 20.0],
            trail_pcts: [5.0, 8.0, 12.0],
            profit_trigger_pct: None,
            warning_deviation_pct: 20.0,
            peak_drop_pct: 5.0,
        }
    }
}

impl AdaptiveTrailingConfig {
    /// Trail percentage for the current deviation; unknown deviation uses the tightest tier.
    pub fn trail_pct_for(&self, deviation_pct: Option<f64>) -> f64 {
        match deviation_pct {
            Some(deviation) if deviation >= self.deviation_thresholds[1] => self.trail_pcts[2],
            Some(deviation) if deviation >= self.deviation_thresholds[0] => self.trail_pcts[1],
            _ => self.trail_pcts[0],
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let [low, high] = self.deviation_thresholds;
        if !low.is_finite() || !high.is_finite() || low > high {
            return Err(ConfigError::InvalidAdaptiveSchedule(format!(
                "deviation thresholds must be finite and ascending ({}, {})",
                low, high
            )));
        }
        for pct in self.trail_pcts {
            if !(pct > 0.0 && pct < 100.0) {
                return Err(ConfigError::InvalidAdaptiveSchedule(format!(
                    "trail percentages must be within (0, 100) (value: {})",
                    pct
                )));
            }
        }
        if self.trail_pcts.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(ConfigError::InvalidAdaptiveSchedule(
                "trail percentages must widen as deviation grows".to_string(),
            ));
        }
        if let Some(trigger) = self.profit_trigger_pct {
            if !(trigger.is_finite() && trigger > 0.0) {
                return Err(ConfigError::InvalidAdaptiveSchedule(format!(
                    "profit trigger must be positive (value: {})",
                    trigger
                )));
            }
        }
        if !(self.peak_drop_pct.is_finite() && self.peak_drop_pct > 0.0) {
            return Err(ConfigError::InvalidAdaptiveSchedule(format!(
                "peak drop must be positive (value: {})",
                self.peak_drop_pct
            )));
        }
        if !self.warning_deviation_pct.is_finite() {
            return Err(ConfigError::InvalidAdaptiveSchedule(
                "warning deviation must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Immutable parameters of one simulation run. Percentages are in percent units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    pub initial_capital: f64,
    pub max_positions: i32,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_stop_pct: f64,
    pub max_holding_days: i32,
    pub cooldown_days: i32,
    pub scan_interval_days: i32,
    pub min_signal_score: f64,
    pub long_ma_period: usize,
    pub ma_exit_deviation_pct: Option<f64>,
    pub exit_policy: ExitPolicy,
    pub aggregation: AggregationMode,
    pub adaptive: AdaptiveTrailingConfig,
    pub signal_types: Vec<SignalType>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000_000.0,
            max_positions: 5,
            stop_loss_pct: 5.0,
            take_profit_pct: 15.0,
            trailing_stop_pct: 5.0,
            max_holding_days: 20,
            cooldown_days: 5,
            scan_interval_days: 1,
            min_signal_score: 60.0,
            long_ma_period: 120,
            ma_exit_deviation_pct: Some(30.0),
            exit_policy: ExitPolicy::Standard,
            aggregation: AggregationMode::BestOf,
            adaptive: AdaptiveTrailingConfig::default(),
            signal_types: SignalType::ALL.to_vec(),
        }
    }
}

impl RunConfig {
    /// Create a RunConfig from a flat parameter map, starting from defaults
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Self {
        let mut config = Self::default();
        config.apply_parameters(parameters);
        config
    }

    /// Override the fields present in `parameters`; absent keys keep their value.
    pub fn apply_parameters(&mut self, parameters: &HashMap<String, f64>) {
        use crate::param_utils::*;

        self.initial_capital = get_param(parameters, "initialCapital", self.initial_capital);
        self.max_positions = get_rounded_param(parameters, "maxPositions", self.max_positions);
        self.stop_loss_pct = get_param(parameters, "stopLossPct", self.stop_loss_pct);
        self.take_profit_pct = get_param(parameters, "takeProfitPct", self.take_profit_pct);
        self.trailing_stop_pct = get_param(parameters, "trailingStopPct", self.trailing_stop_pct);
        self.max_holding_days =
            get_rounded_param(parameters, "maxHoldingDays", self.max_holding_days);
        self.cooldown_days = get_rounded_param(parameters, "cooldownDays", self.cooldown_days);
        self.scan_interval_days =
            get_rounded_param(parameters, "scanIntervalDays", self.scan_interval_days);
        self.min_signal_score = get_param(parameters, "minSignalScore", self.min_signal_score);
        self.long_ma_period =
            get_usize_param_min(parameters, "longMaPeriod", self.long_ma_period, 1);
        if let Some(value) = parameters.get("maExitDeviationPct").copied() {
            self.ma_exit_deviation_pct = if value.is_finite() && value > 0.0 {
                Some(value)
            } else {
                None
            };
        }
        let adaptive_default = self.exit_policy == ExitPolicy::Adaptive;
        self.exit_policy = if get_flag_param(parameters, "adaptiveExit", adaptive_default) {
            ExitPolicy::Adaptive
        } else {
            ExitPolicy::Standard
        };

        let adaptive = &mut self.adaptive;
        adaptive.deviation_thresholds = [
            get_param(parameters, "deviationTierLow", adaptive.deviation_thresholds[0]),
            get_param(parameters, "deviationTierHigh", adaptive.deviation_thresholds[1]),
        ];
        adaptive.trail_pcts = [
            get_param(parameters, "trailPctTight", adaptive.trail_pcts[0]),
            get_param(parameters, "trailPctMid", adaptive.trail_pcts[1]),
            get_param(parameters, "trailPctWide", adaptive.trail_pcts[2]),
        ];
        if let Some(value) = parameters.get("profitTriggerPct").copied() {
            adaptive.profit_trigger_pct = value.is_finite().then_some(value);
        }
        adaptive.warning_deviation_pct = get_param(
            parameters,
            "warningDeviationPct",
            adaptive.warning_deviation_pct,
        );
        adaptive.peak_drop_pct = get_param(parameters, "peakDropPct", adaptive.peak_drop_pct);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_positions <= 0 {
            return Err(ConfigError::InvalidPositionSlots(self.max_positions));
        }
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(ConfigError::NonPositiveCapital(self.initial_capital));
        }
        require_percent("stopLossPct", self.stop_loss_pct, 0.0, 100.0)?;
        require_percent("takeProfitPct", self.take_profit_pct, 0.0, f64::MAX)?;
        require_percent("trailingStopPct", self.trailing_stop_pct, 0.0, 100.0)?;
        if let Some(deviation) = self.ma_exit_deviation_pct {
            require_percent("maExitDeviationPct", deviation, 0.0, f64::MAX)?;
        }
        if !(self.min_signal_score.is_finite()
            && (0.0..=100.0).contains(&self.min_signal_score))
        {
            return Err(ConfigError::PercentOutOfRange {
                field: "minSignalScore",
                value: self.min_signal_score,
                min: 0.0,
                max: 100.0,
            });
        }
        require_days("maxHoldingDays", self.max_holding_days, 1)?;
        require_days("cooldownDays", self.cooldown_days, 0)?;
        require_days("scanIntervalDays", self.scan_interval_days, 1)?;
        if self.long_ma_period == 0 {
            return Err(ConfigError::InvalidLongMaPeriod);
        }
        if self.signal_types.is_empty() {
            return Err(ConfigError::NoSignalTypes);
        }
        self.adaptive.validate()
    }

    /// Capital reserved per slot; fixed for the whole run, never rebased on equity.
    pub fn per_slot_capital(&self) -> f64 {
        self.initial_capital / self.max_positions.max(1) as f64
    }

    pub fn slot_count(&self) -> usize {
        self.max_positions.max(0) as usize
    }

    /// Gain (percent) at which the adaptive policy switches to trailing.
    pub fn trailing_trigger_pct(&self) -> f64 {
        match self.exit_policy {
            ExitPolicy::Standard => self.take_profit_pct,
            ExitPolicy::Adaptive => self
                .adaptive
                .profit_trigger_pct
                .unwrap_or(self.take_profit_pct),
        }
    }
}

fn require_percent(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > min && value < max {
        Ok(())
    } else {
        Err(ConfigError::PercentOutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn require_days(field: &'static str, value: i32, min: i32) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::DaysOutOfRange { field, value, min });
    }
    Ok(())
}

/// Request object for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub universe: Vec<SymbolInfo>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub config: RunConfig,
    #[serde(default)]
    pub benchmark_codes: Vec<String>,
}

impl RunRequest {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_date > self.end_date {
            return Err(ConfigError::InvalidDateRange {
                start: self.start_date,
                end: self.end_date,
            });
        }
        if self.universe.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }
        self.config.validate()
    }
}
