use crate::config::RunConfig;
use crate::data_context::MarketHistory;
use crate::indicators::IndicatorSet;
use crate::models::{Position, PositionMode, SignalCandidate};
use crate::signals::DetectorSet;
use crate::state::SimulationState;
use crate::trading_rules::determine_shares;
use log::debug;
use rayon::prelude::*;

/// A detector hit waiting for a slot, in discovery order until ranked.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryCandidate {
    pub series_index: usize,
    pub symbol: String,
    pub candidate: SignalCandidate,
}

#[derive(Debug, PartialEq, Eq)]
pub enum EntryOutcome {
    Executed,
    Skipped { reason: &'static str },
}

pub fn is_scan_day(day_index: usize, scan_interval_days: usize) -> bool {
    scan_interval_days > 0 && day_index % scan_interval_days == 0
}

/// Runs the detectors for every eligible symbol on `day_index` and returns
/// the hits ranked by score (ties keep discovery order).
pub fn collect_candidates(
    history: &MarketHistory,
    indicators: &[IndicatorSet],
    state: &SimulationState,
    day_index: usize,
    detectors: &DetectorSet,
) -> Vec<EntryCandidate> {
    let calendar = history.calendar();
    let (Some(today), Some(next_day)) = (calendar.date(day_index), calendar.date(day_index + 1))
    else {
        return Vec::new();
    };

    let eligible: Vec<(usize, usize)> = history
        .series()
        .iter()
        .enumerate()
        .filter(|(_, series)| {
            !state.has_position(series.symbol())
                && !state.is_cooling_down(series.symbol(), day_index)
                && series.bar_index(next_day).is_some()
        })
        .filter_map(|(series_index, series)| {
            series
                .bar_index(today)
                .map(|bar_index| (series_index, bar_index))
        })
        .collect();

    let hits: Vec<Option<EntryCandidate>> = eligible
        .par_iter()
        .map(|&(series_index, bar_index)| {
            let series = &history.series()[series_index];
            let prefix = series.prefix(bar_index);
            let indicator_prefix = indicators[series_index].prefix(bar_index);
            detectors
                .evaluate(&prefix, &indicator_prefix)
                .map(|candidate| EntryCandidate {
                    series_index,
                    symbol: series.symbol().to_string(),
                    candidate,
                })
        })
        .collect();

    let mut ranked: Vec<EntryCandidate> = hits.into_iter().flatten().collect();
    ranked.sort_by(|a, b| b.candidate.score.total_cmp(&a.candidate.score));
    ranked
}

/// Opens positions for ranked candidates until slots or cash run out.
/// Fills at the next calendar day's open.
pub fn fill_slots(
    history: &MarketHistory,
    state: &mut SimulationState,
    candidates: Vec<EntryCandidate>,
    day_index: usize,
    config: &RunConfig,
) -> usize {
    let mut opened = 0usize;
    for entry in candidates {
        if state.free_slots(config.slot_count()) == 0 {
            break;
        }
        let symbol = entry.symbol.clone();
        if let EntryOutcome::Skipped { reason } = execute_entry(history, state, entry, day_index, config)
        {
            debug!("Skipped entry for {} on day {}: {}", symbol, day_index, reason);
            continue;
        }
        opened += 1;
    }
    opened
}

fn execute_entry(
    history: &MarketHistory,
    state: &mut SimulationState,
    entry: EntryCandidate,
    day_index: usize,
    config: &RunConfig,
) -> EntryOutcome {
    let entry_day_index = day_index + 1;
    let Some(entry_date) = history.calendar().date(entry_day_index) else {
        return EntryOutcome::Skipped {
            reason: "missing_next_day",
        };
    };
    let Some(next_bar) = history
        .series()
        .get(entry.series_index)
        .and_then(|series| series.bar_on(entry_date))
    else {
        return EntryOutcome::Skipped {
            reason: "missing_next_candle",
        };
    };
    let fill = next_bar.open;

    let Some(shares) = determine_shares(config.per_slot_capital(), state.cash(), fill) else {
        return EntryOutcome::Skipped {
            reason: "insufficient_cash",
        };
    };

    let name = history.series()[entry.series_index].name().to_string();
    let position = Position {
        symbol: entry.symbol,
        name,
        signal_type: entry.candidate.signal_type,
        signal_score: entry.candidate.score,
        detection_day_index: day_index,
        entry_day_index,
        entry_date,
        entry_price: fill,
        shares,
        mode: PositionMode::Fixed,
        peak_price: fill,
        in_warning_zone: false,
        peak_deviation: 0.0,
    };
    match state.open_position(position) {
        Ok(()) => EntryOutcome::Executed,
        Err(err) => {
            debug!("{:#}", err);
            EntryOutcome::Skipped {
                reason: "ledger_rejected",
            }
        }
    }
}
