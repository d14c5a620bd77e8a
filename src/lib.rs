pub mod calendar;
pub mod commands;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod ledger;
pub mod market_data;
pub mod models;
pub mod optimizer;
pub mod performance;
pub mod reconciliation;
pub mod regime;
pub mod retry;
pub mod rsi_reference;
pub mod session;
pub mod trading_rules;
