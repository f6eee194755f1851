use crate::data_context::HistoryPrefix;
use crate::indicators::IndicatorPrefix;
use crate::models::*;
use anyhow::Result;

/// Close above the prior 20-day high on expanding volume.
pub struct BreakoutDetector {
    min_volume_ratio: f64,
}

impl Default for BreakoutDetector {
    fn default() -> Self {
        Self {
            min_volume_ratio: 1.5,
        }
    }
}

impl super::SignalDetector for BreakoutDetector {
    fn signal_type(&self) -> SignalType {
        SignalType::Breakout
    }

    fn min_history(&self) -> usize {
        21
    }

    fn detect(
        &self,
        history: &HistoryPrefix<'_>,
        indicators: &IndicatorPrefix<'_>,
    ) -> Result<Option<SignalCandidate>> {
        super::ensure_aligned(history, indicators)?;
        let (Some(bar), Some(high20), Some(avg_volume)) = (
            history.today(),
            indicators.high20(),
            indicators.avg_volume20(),
        ) else {
            return Ok(None);
        };
        if avg_volume <= 0.0 || bar.close <= high20 || bar.close <= bar.open {
            return Ok(None);
        }

        let volume_ratio = bar.volume as f64 / avg_volume;
        if volume_ratio < self.min_volume_ratio {
            return Ok(None);
        }

        let breakout_pct = (bar.close / high20 - 1.0) * 100.0;
        let score = 60.0
            + (breakout_pct * 4.0).min(20.0)
            + ((volume_ratio - self.min_volume_ratio) * 10.0).min(20.0);
        Ok(Some(SignalCandidate::new(SignalType::Breakout, score)))
    }
}
