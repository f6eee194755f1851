use crate::candle_utils::normalize_ticker_symbol;
use crate::models::Candle;
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Read-only access to daily bars. Both bounds are inclusive.
#[allow(async_fn_in_trait)]
pub trait PriceRepository {
    async fn fetch_candles(
        &self,
        symbols: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>>;

    async fn fetch_index_candles(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>>;
}

/// Repository backed by vectors in memory, used by tests and snapshot replays.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    candles: HashMap<String, Vec<Candle>>,
    index_candles: HashMap<String, Vec<Candle>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candles(candles: Vec<Candle>) -> Self {
        let mut repository = Self::new();
        repository.insert_candles(candles);
        repository
    }

    pub fn insert_candles(&mut self, candles: Vec<Candle>) {
        for candle in candles {
            if let Some(key) = normalize_ticker_symbol(&candle.ticker) {
                self.candles.entry(key).or_default().push(candle);
            }
        }
    }

    pub fn insert_index_candles(&mut self, code: &str, candles: Vec<Candle>) {
        if let Some(key) = normalize_ticker_symbol(code) {
            self.index_candles.entry(key).or_default().extend(candles);
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.candles.len()
    }
}

fn within(candles: &[Candle], from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = &Candle> {
    candles
        .iter()
        .filter(move |candle| candle.date >= from && candle.date <= to)
}

impl PriceRepository for InMemoryRepository {
    async fn fetch_candles(
        &self,
        symbols: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let mut result = Vec::new();
        for symbol in symbols {
            let Some(key) = normalize_ticker_symbol(symbol) else {
                continue;
            };
            if let Some(candles) = self.candles.get(&key) {
                result.extend(within(candles, from, to).cloned());
            }
        }
        Ok(result)
    }

    async fn fetch_index_candles(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let Some(key) = normalize_ticker_symbol(code) else {
            return Ok(Vec::new());
        };
        Ok(self
            .index_candles
            .get(&key)
            .map(|candles| within(candles, from, to).cloned().collect())
            .unwrap_or_default())
    }
}
