mod retry;

pub mod candle_utils;
pub mod config;
pub mod context;
pub mod data_context;
pub mod database;
pub mod engine;
pub mod indicators;
pub mod models;
pub mod param_utils;
pub mod performance;
pub mod repository;
pub mod scheduler;
pub mod signals;
pub mod state;
pub mod strategy;
pub mod sweep;
pub mod trading_rules;

pub mod commands {
    pub mod backtest;
    pub mod export_market_data;
    pub mod sweep;
}

pub use config::{RunConfig, RunRequest};
pub use engine::{run_backtest, Engine};
pub use models::RunResult;
