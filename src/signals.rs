use anyhow::anyhow;
use log::{debug, warn};
use std::panic::{self, AssertUnwindSafe};

use crate::config::{AggregationMode, RunConfig};
use crate::data_context::HistoryPrefix;
use crate::indicators::IndicatorPrefix;
use crate::models::{SignalCandidate, SignalType};
use crate::strategy::{create_detector, SignalDetector};

/// Score a best-of candidate must reach regardless of the configured minimum.
pub const BEST_OF_MIN_SCORE: f64 = 60.0;

/// Ordered detectors plus the rule for combining their output.
pub struct DetectorSet {
    detectors: Vec<Box<dyn SignalDetector>>,
    mode: AggregationMode,
    min_score: f64,
}

impl DetectorSet {
    /// Reference detectors for every enabled signal type, in configured order.
    pub fn from_config(config: &RunConfig) -> Self {
        let mut seen: Vec<SignalType> = Vec::with_capacity(config.signal_types.len());
        let mut detectors = Vec::with_capacity(config.signal_types.len());
        for signal_type in &config.signal_types {
            if seen.contains(signal_type) {
                continue;
            }
            seen.push(*signal_type);
            detectors.push(create_detector(*signal_type));
        }
        Self::with_detectors(detectors, config.aggregation, config.min_signal_score)
    }

    pub fn with_detectors(
        detectors: Vec<Box<dyn SignalDetector>>,
        mode: AggregationMode,
        min_score: f64,
    ) -> Self {
        Self {
            detectors,
            mode,
            min_score,
        }
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn mode(&self) -> AggregationMode {
        self.mode
    }

    /// Runs the detectors over one symbol's prefix and returns the aggregated candidate.
    ///
    /// A detector that errors is logged and treated as having found nothing.
    pub fn evaluate(
        &self,
        history: &HistoryPrefix<'_>,
        indicators: &IndicatorPrefix<'_>,
    ) -> Option<SignalCandidate> {
        match self.mode {
            AggregationMode::BestOf => {
                let mut best: Option<SignalCandidate> = None;
                for detector in &self.detectors {
                    let Some(candidate) = run_detector(detector.as_ref(), history, indicators)
                    else {
                        continue;
                    };
                    if candidate.score < BEST_OF_MIN_SCORE {
                        continue;
                    }
                    // Strictly greater keeps the earlier detector on ties.
                    if best.map_or(true, |current| candidate.score > current.score) {
                        best = Some(candidate);
                    }
                }
                best
            }
            AggregationMode::FirstMatch => self.detectors.iter().find_map(|detector| {
                run_detector(detector.as_ref(), history, indicators)
                    .filter(|candidate| candidate.score >= self.min_score)
            }),
        }
    }
}

fn run_detector(
    detector: &dyn SignalDetector,
    history: &HistoryPrefix<'_>,
    indicators: &IndicatorPrefix<'_>,
) -> Option<SignalCandidate> {
    if history.len() < detector.min_history() {
        return None;
    }
    // A panic is contained to this symbol and day.
    let detected = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(history, indicators)))
        .unwrap_or_else(|_| Err(anyhow!("detector panicked")));
    match detected {
        Ok(Some(candidate)) if candidate.score.is_finite() => Some(candidate),
        Ok(Some(_)) => {
            debug!(
                "{} detector produced a non-finite score for {}; ignoring",
                detector.signal_type(),
                history.symbol
            );
            None
        }
        Ok(None) => None,
        Err(err) => {
            warn!(
                "{} detector failed for {} on {:?}: {:#}",
                detector.signal_type(),
                history.symbol,
                history.dates.last(),
                err
            );
            None
        }
    }
}
