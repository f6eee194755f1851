use crate::data_context::HistoryPrefix;
use crate::indicators::IndicatorPrefix;
use crate::models::*;
use anyhow::Result;

/// First up day after RSI dropped below the oversold level.
pub struct OversoldReboundDetector {
    oversold_level: f64,
}

impl Default for OversoldReboundDetector {
    fn default() -> Self {
        Self {
            oversold_level: 30.0,
        }
    }
}

impl super::SignalDetector for OversoldReboundDetector {
    fn signal_type(&self) -> SignalType {
        SignalType::OversoldRebound
    }

    fn min_history(&self) -> usize {
        16
    }

    fn detect(
        &self,
        history: &HistoryPrefix<'_>,
        indicators: &IndicatorPrefix<'_>,
    ) -> Result<Option<SignalCandidate>> {
        super::ensure_aligned(history, indicators)?;
        let (Some(bar), Some(previous_close), Some(rsi), Some(previous_rsi)) = (
            history.today(),
            history.previous_close(),
            indicators.rsi14(),
            indicators.previous_rsi14(),
        ) else {
            return Ok(None);
        };

        if previous_rsi >= self.oversold_level
            || rsi <= previous_rsi
            || bar.close <= bar.open
            || bar.close <= previous_close
        {
            return Ok(None);
        }

        let depth = self.oversold_level - previous_rsi;
        let rebound_pct = (bar.close / previous_close - 1.0) * 100.0;
        let score = 60.0 + depth + (rebound_pct * 5.0).min(15.0);
        Ok(Some(SignalCandidate::new(SignalType::OversoldRebound, score)))
    }
}
