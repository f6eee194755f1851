use crate::config::RunRequest;
use crate::data_context::{load_market_history, MarketHistory};
use crate::database::Database;
use crate::sweep::SweepGrid;
use anyhow::{anyhow, Context, Result};
use log::info;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

#[derive(Clone)]
pub struct AppContext {
    database_url: Option<String>,
}

impl AppContext {
    pub async fn initialize(database_url: Option<String>) -> Result<Self> {
        Ok(Self { database_url })
    }

    pub async fn database(&self) -> Result<Database> {
        let Some(database_url) = self.database_url.as_deref() else {
            return Err(anyhow!(
                "DATABASE_URL must be set to use database-backed engine commands."
            ));
        };
        Database::new(database_url).await
    }

    /// Loads the request's history from a snapshot when one is given,
    /// otherwise from the database.
    pub async fn load_history(
        &self,
        request: &RunRequest,
        data_file: Option<&Path>,
    ) -> Result<MarketHistory> {
        match data_file {
            Some(path) => {
                info!("Loading market data snapshot from {}", path.display());
                let snapshot = MarketHistory::load_from_file(path)?;
                let repository = snapshot.to_repository();
                load_market_history(&repository, request).await
            }
            None => {
                let db = self.database().await?;
                load_market_history(&db, request).await
            }
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {} from {}", what, path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {} in {}", what, path.display()))
}

pub fn load_run_request(path: &Path) -> Result<RunRequest> {
    let request: RunRequest = read_json(path, "run request")?;
    request.validate()?;
    Ok(request)
}

pub fn load_sweep_grid(path: &Path) -> Result<SweepGrid> {
    read_json(path, "sweep grid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn run_request_reads_camel_case_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "universe": [{{"code": "aaa", "name": "Alpha"}}],
                "startDate": "2024-01-01",
                "endDate": "2024-03-01",
                "config": {{"maxPositions": 2, "stopLossPct": 4.0}}
            }}"#
        )
        .unwrap();

        let request = load_run_request(file.path()).unwrap();
        assert_eq!(request.universe.len(), 1);
        assert_eq!(request.config.max_positions, 2);
        assert_eq!(request.config.stop_loss_pct, 4.0);
        assert_eq!(request.config.take_profit_pct, 15.0);
    }

    #[test]
    fn invalid_run_request_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"universe": [], "startDate": "2024-01-01", "endDate": "2024-03-01"}}"#
        )
        .unwrap();
        assert!(load_run_request(file.path()).is_err());
    }

    #[tokio::test]
    async fn database_requires_url() {
        let app = AppContext::initialize(None).await.unwrap();
        assert!(app.database().await.is_err());
    }
}
