use crate::models::Candle;
use crate::repository::PriceRepository;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{debug, error};
use tokio_postgres::{Client, NoTls, Row};

/// PostgreSQL-backed price repository.
///
/// Expects `candles (ticker, date, open, high, low, close, volume)` and
/// `index_candles (code, date, open, high, low, close, volume)` with
/// `DATE` dates, `DOUBLE PRECISION` prices and `BIGINT` volume.
pub struct Database {
    client: Client,
}

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to PostgreSQL at {}", database_url))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        Ok(Self { client })
    }

    pub async fn get_candles_for_symbols(
        &self,
        symbols: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let symbols_param: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
        let rows = self
            .client
            .query(
                "SELECT ticker, date, open, high, low, close, volume
                 FROM candles
                 WHERE ticker = ANY($1) AND date >= $2 AND date <= $3
                 ORDER BY date, ticker",
                &[&symbols_param, &from, &to],
            )
            .await
            .context("failed to query candles")?;

        debug!("Fetched {} candle rows for {} symbols", rows.len(), symbols.len());
        Ok(rows.iter().map(row_to_candle).collect())
    }

    pub async fn get_index_candles(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let rows = self
            .client
            .query(
                "SELECT code, date, open, high, low, close, volume
                 FROM index_candles
                 WHERE code = $1 AND date >= $2 AND date <= $3
                 ORDER BY date",
                &[&code, &from, &to],
            )
            .await
            .with_context(|| format!("failed to query index candles for {}", code))?;

        Ok(rows.iter().map(row_to_candle).collect())
    }
}

// NULL prices become NaN so the loader drops the bar as unusable.
fn row_to_candle(row: &Row) -> Candle {
    let price = |idx: usize| row.get::<_, Option<f64>>(idx).unwrap_or(f64::NAN);
    Candle {
        ticker: row.get(0),
        date: row.get(1),
        open: price(2),
        high: price(3),
        low: price(4),
        close: price(5),
        volume: row.get::<_, Option<i64>>(6).unwrap_or(0),
    }
}

impl PriceRepository for Database {
    async fn fetch_candles(
        &self,
        symbols: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        self.get_candles_for_symbols(symbols, from, to).await
    }

    async fn fetch_index_candles(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        self.get_index_candles(code, from, to).await
    }
}
