use crate::data_context::HistoryPrefix;
use crate::indicators::IndicatorPrefix;
use crate::models::*;
use anyhow::Result;

/// Shallow dip back to the 20-day average inside an established uptrend.
pub struct PullbackDetector {
    max_below_sma20_pct: f64,
    max_above_sma20_pct: f64,
    min_rsi: f64,
    max_rsi: f64,
}

impl Default for PullbackDetector {
    fn default() -> Self {
        Self {
            max_below_sma20_pct: 3.0,
            max_above_sma20_pct: 3.0,
            min_rsi: 30.0,
            max_rsi: 70.0,
        }
    }
}

impl super::SignalDetector for PullbackDetector {
    fn signal_type(&self) -> SignalType {
        SignalType::Pullback
    }

    fn min_history(&self) -> usize {
        61
    }

    fn detect(
        &self,
        history: &HistoryPrefix<'_>,
        indicators: &IndicatorPrefix<'_>,
    ) -> Result<Option<SignalCandidate>> {
        super::ensure_aligned(history, indicators)?;
        let (Some(bar), Some(sma20), Some(sma60), Some(rsi)) = (
            history.today(),
            indicators.sma20(),
            indicators.sma60(),
            indicators.rsi14(),
        ) else {
            return Ok(None);
        };

        if sma20 <= sma60 || bar.close <= sma60 || bar.close < bar.open {
            return Ok(None);
        }
        let distance_pct = (bar.close - sma20) / sma20 * 100.0;
        if distance_pct < -self.max_below_sma20_pct || distance_pct > self.max_above_sma20_pct {
            return Ok(None);
        }
        if rsi < self.min_rsi || rsi > self.max_rsi {
            return Ok(None);
        }

        let trend = ((sma20 / sma60 - 1.0) * 100.0 * 2.0).min(20.0);
        let proximity = (1.0 - distance_pct.abs() / self.max_above_sma20_pct).max(0.0) * 10.0;
        let cooling = ((self.max_rsi - rsi) / (self.max_rsi - self.min_rsi)).clamp(0.0, 1.0) * 10.0;
        Ok(Some(SignalCandidate::new(
            SignalType::Pullback,
            60.0 + trend + proximity + cooling,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorSet;
    use crate::strategy::test_support::{flat, series_from_rows};
    use crate::strategy::SignalDetector;

    fn detect_last(rows: &[(f64, f64, f64, f64, i64)]) -> Option<SignalCandidate> {
        let series = series_from_rows(rows);
        let indicators = IndicatorSet::compute(&series, 120);
        let end = series.len() - 1;
        PullbackDetector::default()
            .detect(&series.prefix(end), &indicators.prefix(end))
            .unwrap()
    }

    #[test]
    fn fires_on_dip_within_uptrend() {
        let mut rows: Vec<_> = (0..=60).map(|i| flat(100.0 + i as f64, 1_000)).collect();
        rows.extend((1..=8).map(|i| flat(160.0 - i as f64, 1_000)));
        rows.push((151.5, 153.0, 151.0, 152.5, 1_000));
        let candidate = detect_last(&rows).expect("pullback expected");
        assert_eq!(candidate.signal_type, SignalType::Pullback);
        assert!(candidate.score >= 60.0 && candidate.score <= 100.0);
    }

    #[test]
    fn flat_market_is_not_a_trend() {
        let rows: Vec<_> = (0..80).map(|_| flat(100.0, 1_000)).collect();
        assert!(detect_last(&rows).is_none());
    }
}
