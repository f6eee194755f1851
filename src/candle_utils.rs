use crate::models::{Candle, SymbolInfo};
use std::collections::{HashMap, HashSet};

/// Groups candles keyed by symbol, restricted to a known set of symbols.
///
/// Each bucket is sorted by date; when the same date appears more than once
/// the row fetched last wins.
pub fn group_candles_for_symbols(symbols: &[String], candles: Vec<Candle>) -> HashMap<String, Vec<Candle>> {
    let mut grouped: HashMap<String, Vec<Candle>> = symbols
        .iter()
        .map(|symbol| (symbol.clone(), Vec::new()))
        .collect();

    for mut candle in candles {
        let Some(key) = normalize_ticker_symbol(&candle.ticker) else {
            continue;
        };
        if let Some(bucket) = grouped.get_mut(&key) {
            candle.ticker = key;
            bucket.push(candle);
        }
    }

    grouped.retain(|_, values| !values.is_empty());
    for values in grouped.values_mut() {
        // Stable sort keeps fetch order within a date, so the last duplicate survives dedup.
        values.sort_by(|a, b| a.date.cmp(&b.date));
        dedup_keep_last_by_date(values);
    }

    grouped
}

fn dedup_keep_last_by_date(values: &mut Vec<Candle>) {
    let mut deduped: Vec<Candle> = Vec::with_capacity(values.len());
    for candle in values.drain(..) {
        match deduped.last_mut() {
            Some(last) if last.date == candle.date => *last = candle,
            _ => deduped.push(candle),
        }
    }
    *values = deduped;
}

/// Normalizes a ticker string by trimming whitespace and uppercasing.
pub fn normalize_ticker_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Normalizes and de-duplicates a universe, keeping the first occurrence of each code.
pub fn normalize_universe(universe: &[SymbolInfo]) -> Vec<SymbolInfo> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut normalized = Vec::with_capacity(universe.len());
    for info in universe {
        let Some(code) = normalize_ticker_symbol(&info.code) else {
            continue;
        };
        if seen.insert(code.clone()) {
            let name = if info.name.trim().is_empty() {
                code.clone()
            } else {
                info.name.trim().to_string()
            };
            normalized.push(SymbolInfo { code, name });
        }
    }
    normalized
}
