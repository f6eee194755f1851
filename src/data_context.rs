use crate::candle_utils::{group_candles_for_symbols, normalize_ticker_symbol, normalize_universe};
use crate::config::RunRequest;
use crate::models::{Candle, SymbolInfo};
use crate::repository::{InMemoryRepository, PriceRepository};
use crate::retry::retry_fetch;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::future::try_join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Calendar days fetched before the window start so indicators are warm on day 0.
pub const LOOKBACK_CALENDAR_DAYS: i64 = 220;
/// Symbols with fewer usable bars than this are dropped from the run.
pub const MIN_USABLE_BARS: usize = 40;
/// Windows shorter than this produce an empty result.
pub const MIN_WINDOW_DAYS: usize = 10;

const FETCH_CHUNK_SIZE: usize = 50;
const MARKET_HISTORY_SNAPSHOT_VERSION: u32 = 1;

/// One daily bar copied out of a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Dense, immutable OHLCV columns for one symbol.
#[derive(Debug, Clone)]
pub struct OhlcvSeries {
    symbol: String,
    name: String,
    dates: Vec<NaiveDate>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<i64>,
    index_by_date: HashMap<NaiveDate, usize>,
}

impl OhlcvSeries {
    /// Builds columns from date-sorted candles, skipping unusable rows.
    pub fn from_candles(symbol: &str, name: &str, candles: &[Candle]) -> Self {
        let usable: Vec<&Candle> = candles.iter().filter(|c| c.is_usable()).collect();
        let mut series = Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            dates: Vec::with_capacity(usable.len()),
            open: Vec::with_capacity(usable.len()),
            high: Vec::with_capacity(usable.len()),
            low: Vec::with_capacity(usable.len()),
            close: Vec::with_capacity(usable.len()),
            volume: Vec::with_capacity(usable.len()),
            index_by_date: HashMap::with_capacity(usable.len()),
        };
        for candle in usable {
            series.index_by_date.insert(candle.date, series.dates.len());
            series.dates.push(candle.date);
            series.open.push(candle.open);
            series.high.push(candle.high);
            series.low.push(candle.low);
            series.close.push(candle.close);
            series.volume.push(candle.volume);
        }
        series
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn closes(&self) -> &[f64] {
        &self.close
    }

    pub fn bar_index(&self, date: NaiveDate) -> Option<usize> {
        self.index_by_date.get(&date).copied()
    }

    pub fn bar(&self, index: usize) -> Option<Bar> {
        if index >= self.dates.len() {
            return None;
        }
        Some(Bar {
            date: self.dates[index],
            open: self.open[index],
            high: self.high[index],
            low: self.low[index],
            close: self.close[index],
            volume: self.volume[index],
        })
    }

    pub fn bar_on(&self, date: NaiveDate) -> Option<Bar> {
        self.bar_index(date).and_then(|index| self.bar(index))
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Last bar dated on or before `date`.
    pub fn last_bar_on_or_before(&self, date: NaiveDate) -> Option<Bar> {
        let upper = self.dates.partition_point(|d| *d <= date);
        upper.checked_sub(1).and_then(|index| self.bar(index))
    }

    /// View of rows `[..=end]`; later rows are unreachable through it.
    pub fn prefix(&self, end: usize) -> HistoryPrefix<'_> {
        let upto = (end + 1).min(self.dates.len());
        HistoryPrefix {
            symbol: &self.symbol,
            dates: &self.dates[..upto],
            open: &self.open[..upto],
            high: &self.high[..upto],
            low: &self.low[..upto],
            close: &self.close[..upto],
            volume: &self.volume[..upto],
        }
    }

    fn to_candles(&self) -> Vec<Candle> {
        (0..self.len())
            .filter_map(|index| self.bar(index))
            .map(|bar| Candle {
                ticker: self.symbol.clone(),
                date: bar.date,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
            })
            .collect()
    }
}

/// Read-only slice of a series ending at "today".
#[derive(Debug, Clone, Copy)]
pub struct HistoryPrefix<'a> {
    pub symbol: &'a str,
    pub dates: &'a [NaiveDate],
    pub open: &'a [f64],
    pub high: &'a [f64],
    pub low: &'a [f64],
    pub close: &'a [f64],
    pub volume: &'a [i64],
}

impl<'a> HistoryPrefix<'a> {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn today(&self) -> Option<Bar> {
        let index = self.len().checked_sub(1)?;
        Some(Bar {
            date: self.dates[index],
            open: self.open[index],
            high: self.high[index],
            low: self.low[index],
            close: self.close[index],
            volume: self.volume[index],
        })
    }

    pub fn previous_close(&self) -> Option<f64> {
        let index = self.len().checked_sub(2)?;
        Some(self.close[index])
    }
}

/// Sorted, de-duplicated trading dates of the run window.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    dates: Vec<NaiveDate>,
    index_by_date: HashMap<NaiveDate, usize>,
}

impl TradingCalendar {
    pub fn from_series(series: &[OhlcvSeries], start: NaiveDate, end: NaiveDate) -> Self {
        let mut unique = BTreeSet::new();
        for s in series {
            unique.extend(s.dates().iter().copied().filter(|d| *d >= start && *d <= end));
        }
        Self::from_dates(unique.into_iter().collect())
    }

    fn from_dates(dates: Vec<NaiveDate>) -> Self {
        let index_by_date = dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();
        Self {
            dates,
            index_by_date,
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn date(&self, index: usize) -> Option<NaiveDate> {
        self.dates.get(index).copied()
    }

    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.index_by_date.get(&date).copied()
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.dates.len()
    }
}

/// Immutable snapshot of everything a run reads: per-symbol series, the
/// calendar and benchmark index series.
#[derive(Debug, Clone)]
pub struct MarketHistory {
    start_date: NaiveDate,
    end_date: NaiveDate,
    series: Arc<Vec<OhlcvSeries>>,
    series_by_symbol: Arc<HashMap<String, usize>>,
    calendar: Arc<TradingCalendar>,
    benchmarks: Arc<Vec<OhlcvSeries>>,
}

impl MarketHistory {
    /// Assembles a history from raw candles; `universe` must already be normalized.
    pub fn from_candles(
        universe: &[SymbolInfo],
        start_date: NaiveDate,
        end_date: NaiveDate,
        candles: Vec<Candle>,
        benchmark_candles: Vec<(String, Vec<Candle>)>,
    ) -> Self {
        let first_fetch_date = start_date - Duration::days(LOOKBACK_CALENDAR_DAYS);
        let symbols: Vec<String> = universe.iter().map(|info| info.code.clone()).collect();
        let in_range: Vec<Candle> = candles
            .into_iter()
            .filter(|c| c.date >= first_fetch_date && c.date <= end_date)
            .collect();
        let grouped = group_candles_for_symbols(&symbols, in_range);

        let mut series = Vec::with_capacity(universe.len());
        let mut dropped = 0usize;
        for info in universe {
            let Some(candles) = grouped.get(&info.code) else {
                dropped += 1;
                continue;
            };
            let s = OhlcvSeries::from_candles(&info.code, &info.name, candles);
            if s.len() < MIN_USABLE_BARS {
                debug!(
                    "Dropping {}: {} usable bars (minimum {})",
                    info.code,
                    s.len(),
                    MIN_USABLE_BARS
                );
                dropped += 1;
                continue;
            }
            series.push(s);
        }
        if dropped > 0 {
            info!(
                "Dropped {} of {} symbols with insufficient history",
                dropped,
                universe.len()
            );
        }

        let calendar = TradingCalendar::from_series(&series, start_date, end_date);

        let benchmarks = benchmark_candles
            .into_iter()
            .filter_map(|(code, candles)| {
                let code = normalize_ticker_symbol(&code)?;
                let mut candles: Vec<Candle> = candles
                    .into_iter()
                    .filter(|c| c.date >= first_fetch_date && c.date <= end_date)
                    .collect();
                candles.sort_by(|a, b| a.date.cmp(&b.date));
                candles.dedup_by(|later, earlier| {
                    if later.date == earlier.date {
                        *earlier = later.clone();
                        true
                    } else {
                        false
                    }
                });
                Some(OhlcvSeries::from_candles(&code, &code, &candles))
            })
            .collect();

        Self::from_components(start_date, end_date, series, calendar, benchmarks)
    }

    fn from_components(
        start_date: NaiveDate,
        end_date: NaiveDate,
        series: Vec<OhlcvSeries>,
        calendar: TradingCalendar,
        benchmarks: Vec<OhlcvSeries>,
    ) -> Self {
        let series_by_symbol = series
            .iter()
            .enumerate()
            .map(|(index, s)| (s.symbol().to_string(), index))
            .collect();
        Self {
            start_date,
            end_date,
            series: Arc::new(series),
            series_by_symbol: Arc::new(series_by_symbol),
            calendar: Arc::new(calendar),
            benchmarks: Arc::new(benchmarks),
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    /// Series in discovery order.
    pub fn series(&self) -> &[OhlcvSeries] {
        self.series.as_slice()
    }

    pub fn series_for(&self, symbol: &str) -> Option<&OhlcvSeries> {
        self.series_index(symbol).map(|index| &self.series[index])
    }

    pub fn series_index(&self, symbol: &str) -> Option<usize> {
        self.series_by_symbol.get(symbol).copied()
    }

    pub fn calendar(&self) -> &TradingCalendar {
        self.calendar.as_ref()
    }

    pub fn benchmarks(&self) -> &[OhlcvSeries] {
        self.benchmarks.as_slice()
    }

    pub fn symbol_count(&self) -> usize {
        self.series.len()
    }

    /// False when the window is too short or every symbol was filtered out.
    pub fn is_runnable(&self) -> bool {
        !self.series.is_empty() && self.calendar.len() >= MIN_WINDOW_DAYS
    }

    /// Repository over this history's candles, so a snapshot can serve
    /// requests for any sub-universe or sub-window it covers.
    pub fn to_repository(&self) -> InMemoryRepository {
        let mut repository =
            InMemoryRepository::with_candles(self.series().iter().flat_map(|s| s.to_candles()).collect());
        for benchmark in self.benchmarks() {
            repository.insert_index_candles(benchmark.symbol(), benchmark.to_candles());
        }
        repository
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading market history snapshot from {}", path.display());
        let file = File::open(path).with_context(|| {
            format!("Failed to open market history snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketHistorySnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_HISTORY_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market history snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_HISTORY_SNAPSHOT_VERSION
            ));
        }
        debug!(
            "Snapshot generated at {} with {} symbols",
            snapshot.generated_at,
            snapshot.universe.len()
        );

        Ok(Self::from_candles(
            &snapshot.universe,
            snapshot.start_date,
            snapshot.end_date,
            snapshot.candles,
            snapshot.benchmarks,
        ))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market history snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketHistorySnapshot {
            version: MARKET_HISTORY_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            start_date: self.start_date,
            end_date: self.end_date,
            universe: self
                .series()
                .iter()
                .map(|s| SymbolInfo::new(s.symbol(), s.name()))
                .collect(),
            candles: self.series().iter().flat_map(|s| s.to_candles()).collect(),
            benchmarks: self
                .benchmarks()
                .iter()
                .map(|s| (s.symbol().to_string(), s.to_candles()))
                .collect(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market history snapshot")?;
        writer
            .flush()
            .context("Failed to flush market history snapshot to disk")?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct MarketHistorySnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    universe: Vec<SymbolInfo>,
    candles: Vec<Candle>,
    benchmarks: Vec<(String, Vec<Candle>)>,
}

/// Fetches everything a run needs through `repository` and builds the snapshot.
///
/// Symbol chunks are fetched concurrently; the call returns once every chunk
/// and benchmark has arrived.
pub async fn load_market_history<R: PriceRepository>(
    repository: &R,
    request: &RunRequest,
) -> Result<MarketHistory> {
    let universe = normalize_universe(&request.universe);
    let from = request.start_date - Duration::days(LOOKBACK_CALENDAR_DAYS);
    let to = request.end_date;
    let symbols: Vec<String> = universe.iter().map(|info| info.code.clone()).collect();

    info!(
        "Loading candles for {} symbols from {} to {}",
        symbols.len(),
        from,
        to
    );

    let chunk_fetches = symbols.chunks(FETCH_CHUNK_SIZE).map(|chunk| async move {
        let context = format!("fetch candles for {} symbols", chunk.len());
        retry_fetch!(context, repository.fetch_candles(chunk, from, to))
    });
    let candles: Vec<Candle> = try_join_all(chunk_fetches)
        .await
        .context("Failed to load candles")?
        .into_iter()
        .flatten()
        .collect();

    let benchmark_fetches = request.benchmark_codes.iter().map(|code| async move {
        let context = format!("fetch index candles for {}", code);
        retry_fetch!(context, repository.fetch_index_candles(code, from, to))
            .map(|candles| (code.clone(), candles))
    });
    let mut benchmarks = Vec::new();
    for fetched in futures::future::join_all(benchmark_fetches).await {
        match fetched {
            Ok(pair) => benchmarks.push(pair),
            Err(err) => warn!("Skipping benchmark: {:#}", err),
        }
    }

    let candle_count = candles.len();
    let history = MarketHistory::from_candles(
        &universe,
        request.start_date,
        request.end_date,
        candles,
        benchmarks,
    );
    info!(
        "Loaded {} candles for {} symbols across {} trading dates",
        candle_count,
        history.symbol_count(),
        history.calendar().len()
    );
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    fn candles_for(symbol: &str, days: std::ops::Range<i64>) -> Vec<Candle> {
        days.map(|offset| Candle {
            ticker: symbol.to_string(),
            date: day(offset),
            open: 100.0 + offset as f64,
            high: 101.0 + offset as f64,
            low: 99.0 + offset as f64,
            close: 100.5 + offset as f64,
            volume: 1_000,
        })
        .collect()
    }

    #[test]
    fn thin_symbols_are_dropped() {
        let universe = vec![SymbolInfo::new("AAA", "Alpha"), SymbolInfo::new("BBB", "Bravo")];
        let mut candles = candles_for("AAA", -60..30);
        candles.extend(candles_for("BBB", 0..30));
        let history = MarketHistory::from_candles(&universe, day(0), day(29), candles, Vec::new());
        assert_eq!(history.symbol_count(), 1);
        assert!(history.series_for("AAA").is_some());
        assert!(history.series_for("BBB").is_none());
        assert_eq!(history.calendar().len(), 30);
        assert!(history.is_runnable());
    }

    #[test]
    fn calendar_is_clipped_to_window() {
        let universe = vec![SymbolInfo::new("AAA", "Alpha")];
        let history = MarketHistory::from_candles(
            &universe,
            day(0),
            day(5),
            candles_for("AAA", -60..30),
            Vec::new(),
        );
        assert_eq!(history.calendar().len(), 6);
        assert_eq!(history.calendar().date(0), Some(day(0)));
        assert!(history.calendar().is_last(5));
        assert!(!history.is_runnable());
    }

    #[test]
    fn prefix_never_exposes_later_rows() {
        let series = OhlcvSeries::from_candles("AAA", "Alpha", &candles_for("AAA", 0..10));
        let prefix = series.prefix(4);
        assert_eq!(prefix.len(), 5);
        assert_eq!(prefix.today().map(|bar| bar.date), Some(day(4)));
        assert_eq!(prefix.previous_close(), Some(103.5));
    }

    #[test]
    fn unusable_bars_are_skipped() {
        let mut candles = candles_for("AAA", 0..3);
        candles[1].low = f64::NAN;
        let series = OhlcvSeries::from_candles("AAA", "Alpha", &candles);
        assert_eq!(series.len(), 2);
        assert_eq!(series.bar_index(day(1)), None);
        assert_eq!(series.bar_index(day(2)), Some(1));
        assert_eq!(series.last_bar_on_or_before(day(1)).map(|b| b.date), Some(day(0)));
    }

    fn request(codes: &[&str], benchmarks: &[&str]) -> RunRequest {
        RunRequest {
            universe: codes.iter().map(|c| SymbolInfo::new(*c, "")).collect(),
            start_date: day(0),
            end_date: day(29),
            config: Default::default(),
            benchmark_codes: benchmarks.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn loader_normalizes_universe_and_skips_missing_benchmarks() {
        let mut repository = InMemoryRepository::with_candles(candles_for("AAA", -60..30));
        repository.insert_index_candles("IDX", candles_for("IDX", -5..30));
        let history = load_market_history(&repository, &request(&[" aaa", "AAA"], &["IDX"]))
            .await
            .unwrap();
        assert_eq!(history.symbol_count(), 1);
        let series = history.series_for("AAA").unwrap();
        assert_eq!(series.name(), "AAA");
        assert_eq!(history.benchmarks().len(), 1);
        assert_eq!(history.benchmarks()[0].symbol(), "IDX");
    }

    #[tokio::test]
    async fn snapshot_repository_serves_sub_windows() {
        let universe = vec![SymbolInfo::new("AAA", "Alpha"), SymbolInfo::new("BBB", "Bravo")];
        let mut candles = candles_for("AAA", -60..30);
        candles.extend(candles_for("BBB", -60..30));
        let full = MarketHistory::from_candles(&universe, day(0), day(29), candles, Vec::new());

        let mut narrow = request(&["BBB"], &[]);
        narrow.start_date = day(10);
        narrow.end_date = day(19);
        let history = load_market_history(&full.to_repository(), &narrow)
            .await
            .unwrap();
        assert_eq!(history.symbol_count(), 1);
        assert_eq!(history.calendar().len(), 10);
        assert_eq!(history.calendar().date(0), Some(day(10)));
    }

    struct Flaky {
        inner: InMemoryRepository,
        failures_left: std::sync::atomic::AtomicU32,
    }

    impl PriceRepository for Flaky {
        async fn fetch_candles(
            &self,
            symbols: &[String],
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<Candle>> {
            use std::sync::atomic::Ordering;
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow!("connection reset"));
            }
            self.inner.fetch_candles(symbols, from, to).await
        }

        async fn fetch_index_candles(
            &self,
            code: &str,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<Candle>> {
            self.inner.fetch_index_candles(code, from, to).await
        }
    }

    #[tokio::test]
    async fn transient_fetch_errors_are_retried() {
        let repository = Flaky {
            inner: InMemoryRepository::with_candles(candles_for("AAA", -60..30)),
            failures_left: std::sync::atomic::AtomicU32::new(1),
        };
        let history = load_market_history(&repository, &request(&["AAA"], &[]))
            .await
            .unwrap();
        assert_eq!(history.symbol_count(), 1);
    }
}
