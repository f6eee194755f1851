use crate::data_context::HistoryPrefix;
use crate::indicators::IndicatorPrefix;
use crate::models::*;
use anyhow::Result;

/// Intraday test of the prior 20-day low that closes back above it with a long lower wick.
pub struct SupportTestDetector {
    touch_tolerance_pct: f64,
    min_wick_ratio: f64,
}

impl Default for SupportTestDetector {
    fn default() -> Self {
        Self {
            touch_tolerance_pct: 2.0,
            min_wick_ratio: 0.3,
        }
    }
}

impl super::SignalDetector for SupportTestDetector {
    fn signal_type(&self) -> SignalType {
        SignalType::SupportTest
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
        let (Some(bar), Some(support), Some(sma60)) =
            (history.today(), indicators.low20(), indicators.sma60())
        else {
            return Ok(None);
        };

        let tolerance = self.touch_tolerance_pct / 100.0;
        let touched = bar.low <= support * (1.0 + tolerance) && bar.low >= support * (1.0 - tolerance);
        if !touched || bar.close <= support || bar.close <= bar.open || bar.close < sma60 * 0.9 {
            return Ok(None);
        }

        let range = bar.high - bar.low;
        if range <= 0.0 {
            return Ok(None);
        }
        let wick_ratio = (bar.open.min(bar.close) - bar.low) / range;
        if wick_ratio < self.min_wick_ratio {
            return Ok(None);
        }

        let hold_pct = (bar.close / support - 1.0) * 100.0;
        let score = 60.0 + wick_ratio * 20.0 + (hold_pct * 4.0).min(20.0);
        Ok(Some(SignalCandidate::new(SignalType::SupportTest, score)))
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
        SupportTestDetector::default()
            .detect(&series.prefix(end), &indicators.prefix(end))
            .unwrap()
    }

    #[test]
    fn fires_on_wick_off_support() {
        let mut rows: Vec<_> = (0..70).map(|_| (100.0, 101.0, 99.0, 100.0, 1_000)).collect();
        rows.push((99.5, 100.5, 98.5, 100.3, 1_000));
        let candidate = detect_last(&rows).expect("support test expected");
        assert_eq!(candidate.signal_type, SignalType::SupportTest);
    }

    #[test]
    fn breakdown_through_support_is_ignored() {
        let mut rows: Vec<_> = (0..70).map(|_| (100.0, 101.0, 99.0, 100.0, 1_000)).collect();
        rows.push((99.0, 99.2, 95.0, 96.0, 1_000));
        assert!(detect_last(&rows).is_none());
    }
}
