use crate::data_context::HistoryPrefix;
use crate::indicators::IndicatorPrefix;
use crate::models::*;
use anyhow::{anyhow, Result};

/// A pure pattern detector over the history available up to "today".
///
/// `history` and `indicators` both end at today's bar; nothing later is
/// reachable through them.
pub trait SignalDetector: Send + Sync {
    fn signal_type(&self) -> SignalType;

    /// Bars required before the detector may fire.
    fn min_history(&self) -> usize;

    /// Failures must come back as `Err`; the caller logs them and treats the
    /// symbol as having no signal that day. A panic is also contained to that
    /// symbol and day, but the panic hook still reports it.
    fn detect(
        &self,
        history: &HistoryPrefix<'_>,
        indicators: &IndicatorPrefix<'_>,
    ) -> Result<Option<SignalCandidate>>;
}

/// Rejects views whose columns disagree in length.
pub fn ensure_aligned(history: &HistoryPrefix<'_>, indicators: &IndicatorPrefix<'_>) -> Result<()> {
    if history.len() != indicators.sma5.len() {
        return Err(anyhow!(
            "{}: history has {} rows but indicators have {}",
            history.symbol,
            history.len(),
            indicators.sma5.len()
        ));
    }
    Ok(())
}

#[path = "strategies/pullback.rs"]
pub mod pullback;

pub use pullback::PullbackDetector;

#[path = "strategies/breakout.rs"]
pub mod breakout;

pub use breakout::BreakoutDetector;

#[path = "strategies/support_test.rs"]
pub mod support_test;

pub use support_test::SupportTestDetector;

#[path = "strategies/oversold_rebound.rs"]
pub mod oversold_rebound;

pub use oversold_rebound::OversoldReboundDetector;

pub fn create_detector(signal_type: SignalType) -> Box<dyn SignalDetector> {
    match signal_type {
        SignalType::Pullback => Box::new(PullbackDetector::default()),
        SignalType::Breakout => Box::new(BreakoutDetector::default()),
        SignalType::SupportTest => Box::new(SupportTestDetector::default()),
        SignalType::OversoldRebound => Box::new(OversoldReboundDetector::default()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorSet;
    use crate::strategy::test_support::{flat, series_from_rows};

    #[test]
    fn factory_maps_every_type() {
        for signal_type in SignalType::ALL {
            assert_eq!(create_detector(signal_type).signal_type(), signal_type);
        }
    }

    #[test]
    fn misaligned_views_are_rejected() {
        let rows: Vec<_> = (0..30).map(|_| flat(100.0, 1_000)).collect();
        let series = series_from_rows(&rows);
        let indicators = IndicatorSet::compute(&series, 20);
        assert!(ensure_aligned(&series.prefix(10), &indicators.prefix(10)).is_ok());
        assert!(ensure_aligned(&series.prefix(10), &indicators.prefix(12)).is_err());
    }
}
