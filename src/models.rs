use crate::performance::{DrawdownReport, PerformanceStats};
use crate::regime::Regime;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// External cash movement. Positive amounts inject cash, negative amounts withdraw it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedEvent {
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellReason {
    TargetReached,
    MaxHoldExceeded,
    Reconciled,
}

impl SellReason {
    pub fn label(self) -> &'static str {
        match self {
            SellReason::TargetReached => "target reached",
            SellReason::MaxHoldExceeded => "max hold exceeded",
            SellReason::Reconciled => "reconciled limit fill",
        }
    }
}

/// One open buy lot ("round").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tranche {
    pub id: u64,
    pub round_index: usize,
    pub buy_date: NaiveDate,
    pub buy_price: f64,
    pub shares: u64,
    pub nominal_target_price: f64,
    pub invested_amount: f64,
    pub regime_at_purchase: Regime,
}

impl Tranche {
    pub fn market_value(&self, close: f64) -> f64 {
        self.shares as f64 * close
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyFill {
    pub tranche_id: u64,
    pub round_index: usize,
    pub trigger_price: f64,
    pub price: f64,
    pub shares: u64,
    pub amount: f64,
    /// Filled in once the tranche is sold.
    pub sell_date: Option<NaiveDate>,
    pub sell_price: Option<f64>,
    pub holding_days: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellFill {
    pub tranche_id: u64,
    pub round_index: usize,
    pub buy_date: NaiveDate,
    pub sell_date: NaiveDate,
    pub price: f64,
    pub shares: u64,
    pub proceeds: f64,
    pub realized_pnl: f64,
    pub holding_days: usize,
    pub reason: SellReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLedgerRecord {
    pub date: NaiveDate,
    pub iso_week: u32,
    pub week_number: usize,
    pub regime: Regime,
    pub rsi: Option<f64>,
    pub close: f64,
    pub round_before_buy: usize,
    pub buy_trigger: Option<f64>,
    pub buy: Option<BuyFill>,
    pub sells: Vec<SellFill>,
    pub daily_realized_pnl: f64,
    pub cumulative_realized_pnl: f64,
    pub cash_balance: f64,
    pub position_value: f64,
    pub total_assets: f64,
    pub investment_capital_baseline: f64,
    pub open_tranches: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataWarning {
    pub symbol: String,
    pub date: NaiveDate,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub run_id: Uuid,
    /// Requested window.
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// First and last bar actually processed inside the window.
    pub first_trading_day: Option<NaiveDate>,
    pub last_trading_day: Option<NaiveDate>,
    pub trading_days: usize,
    pub initial_capital: f64,
    pub final_total_assets: f64,
    pub total_return_pct: f64,
    pub open_tranche_count: usize,
    pub final_round: usize,
    pub final_regime: Regime,
    pub final_cash: f64,
    pub drawdown: DrawdownReport,
    pub performance: PerformanceStats,
    pub open_tranches: Vec<Tranche>,
    pub daily_records: Vec<DailyLedgerRecord>,
}
