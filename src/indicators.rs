use crate::data_context::OhlcvSeries;

/// Simple moving average; positions before the first full window are NaN.
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    let mut sma_values = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period {
        return sma_values;
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values[period - 1] = window_sum / period as f64;
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values[i] = window_sum / period as f64;
    }

    sma_values
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder RSI; NaN until `period` deltas are available.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let mut rsi_values = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period + 1 {
        return rsi_values;
    }

    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    rsi_values[period] = rsi_from_avgs(avg_gain, avg_loss);

    for i in (period + 1)..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = rsi_from_avgs(avg_gain, avg_loss);
    }

    rsi_values
}

/// Wilder ATR aligned with the input (NaN until `period` true ranges exist).
pub fn calculate_atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut atr = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return atr;
    }

    let mut tr_sum = 0.0f64;
    for i in 1..n {
        let tr = (highs[i] - lows[i])
            .max((highs[i] - closes[i - 1]).abs())
            .max((lows[i] - closes[i - 1]).abs());
        if i <= period {
            tr_sum += tr;
            if i == period {
                atr[i] = tr_sum / period as f64;
            }
        } else {
            atr[i] = (atr[i - 1] * (period as f64 - 1.0) + tr) / period as f64;
        }
    }

    atr
}

/// Highest value of the `period` rows strictly before each index.
pub fn calculate_prior_high(values: &[f64], period: usize) -> Vec<f64> {
    rolling_prior(values, period, f64::max)
}

/// Lowest value of the `period` rows strictly before each index.
pub fn calculate_prior_low(values: &[f64], period: usize) -> Vec<f64> {
    rolling_prior(values, period, f64::min)
}

fn rolling_prior(values: &[f64], period: usize, pick: fn(f64, f64) -> f64) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    for i in period..values.len() {
        out[i] = values[i - period..i]
            .iter()
            .copied()
            .fold(values[i - period], pick);
    }
    out
}

/// Percentage distance of `close` above `ma`; None when the MA is not available.
pub fn deviation_pct(close: f64, ma: f64) -> Option<f64> {
    if ma.is_finite() && ma > 0.0 && close.is_finite() {
        Some((close - ma) / ma * 100.0)
    } else {
        None
    }
}

/// Indicators computed once per series before the loop starts.
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    pub sma5: Vec<f64>,
    pub sma20: Vec<f64>,
    pub sma60: Vec<f64>,
    pub long_ma: Vec<f64>,
    pub rsi14: Vec<f64>,
    pub atr14: Vec<f64>,
    pub avg_volume20: Vec<f64>,
    pub high20: Vec<f64>,
    pub low20: Vec<f64>,
}

impl IndicatorSet {
    pub fn compute(series: &OhlcvSeries, long_ma_period: usize) -> Self {
        let prefix = series.prefix(series.len().saturating_sub(1));
        let closes = prefix.close;
        let volumes: Vec<f64> = prefix.volume.iter().map(|v| *v as f64).collect();
        Self {
            sma5: calculate_sma(closes, 5),
            sma20: calculate_sma(closes, 20),
            sma60: calculate_sma(closes, 60),
            long_ma: calculate_sma(closes, long_ma_period),
            rsi14: calculate_rsi(closes, 14),
            atr14: calculate_atr(prefix.high, prefix.low, closes, 14),
            avg_volume20: calculate_sma(&volumes, 20),
            high20: calculate_prior_high(prefix.high, 20),
            low20: calculate_prior_low(prefix.low, 20),
        }
    }

    pub fn len(&self) -> usize {
        self.sma5.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sma5.is_empty()
    }

    pub fn long_ma_at(&self, index: usize) -> Option<f64> {
        finite(self.long_ma.get(index).copied())
    }

    /// View of rows `[..=end]`, matching `OhlcvSeries::prefix`.
    pub fn prefix(&self, end: usize) -> IndicatorPrefix<'_> {
        let upto = (end + 1).min(self.len());
        IndicatorPrefix {
            sma5: &self.sma5[..upto],
            sma20: &self.sma20[..upto],
            sma60: &self.sma60[..upto],
            long_ma: &self.long_ma[..upto],
            rsi14: &self.rsi14[..upto],
            atr14: &self.atr14[..upto],
            avg_volume20: &self.avg_volume20[..upto],
            high20: &self.high20[..upto],
            low20: &self.low20[..upto],
        }
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Copy)]
pub struct IndicatorPrefix<'a> {
    pub sma5: &'a [f64],
    pub sma20: &'a [f64],
    pub sma60: &'a [f64],
    pub long_ma: &'a [f64],
    pub rsi14: &'a [f64],
    pub atr14: &'a [f64],
    pub avg_volume20: &'a [f64],
    pub high20: &'a [f64],
    pub low20: &'a [f64],
}

impl<'a> IndicatorPrefix<'a> {
    pub fn sma5(&self) -> Option<f64> {
        finite(self.sma5.last().copied())
    }

    pub fn sma20(&self) -> Option<f64> {
        finite(self.sma20.last().copied())
    }

    pub fn sma60(&self) -> Option<f64> {
        finite(self.sma60.last().copied())
    }

    pub fn long_ma(&self) -> Option<f64> {
        finite(self.long_ma.last().copied())
    }

    pub fn rsi14(&self) -> Option<f64> {
        finite(self.rsi14.last().copied())
    }

    pub fn previous_rsi14(&self) -> Option<f64> {
        let index = self.rsi14.len().checked_sub(2)?;
        finite(self.rsi14.get(index).copied())
    }

    pub fn atr14(&self) -> Option<f64> {
        finite(self.atr14.last().copied())
    }

    pub fn avg_volume20(&self) -> Option<f64> {
        finite(self.avg_volume20.last().copied())
    }

    pub fn high20(&self) -> Option<f64> {
        finite(self.high20.last().copied())
    }

    pub fn low20(&self) -> Option<f64> {
        finite(self.low20.last().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_is_nan_until_window_fills() {
        let values = calculate_sma(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!(values[0].is_nan());
        assert!(values[1].is_nan());
        assert!((values[2] - 2.0).abs() < 1e-9);
        assert!((values[3] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_saturates_on_monotonic_rise() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let rsi = calculate_rsi(&prices, 14);
        assert!(rsi[13].is_nan());
        assert!((rsi[29] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn atr_of_constant_range() {
        let highs = vec![11.0; 20];
        let lows = vec![9.0; 20];
        let closes = vec![10.0; 20];
        let atr = calculate_atr(&highs, &lows, &closes, 14);
        assert!(atr[13].is_nan());
        assert!((atr[14] - 2.0).abs() < 1e-9);
        assert!((atr[19] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn prior_high_excludes_today() {
        let highs = vec![1.0, 5.0, 2.0, 9.0];
        let prior = calculate_prior_high(&highs, 2);
        assert!(prior[1].is_nan());
        assert_eq!(prior[2], 5.0);
        assert_eq!(prior[3], 5.0);
    }

    #[test]
    fn deviation_requires_valid_ma() {
        let deviation = deviation_pct(110.0, 100.0).expect("deviation");
        assert!((deviation - 10.0).abs() < 1e-9);
        assert_eq!(deviation_pct(110.0, f64::NAN), None);
        assert_eq!(deviation_pct(110.0, 0.0), None);
    }
}
