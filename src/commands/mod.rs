pub mod backtest;
pub mod export_market_data;
pub mod market_data_snapshot;
pub mod recommend;
pub mod sweep;
pub mod update_rsi;
