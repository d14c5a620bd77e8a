use crate::calendar::SystemClock;
use crate::context::{write_json_report, AppContext, MarketDataSource};
use crate::error::{parse_date, EngineError};
use crate::session::{DailyRecommendation, TraderSession};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use std::path::PathBuf;

pub struct RecommendArgs {
    pub start: Option<String>,
    pub as_of: Option<String>,
    pub capital: Option<f64>,
    pub config_path: Option<PathBuf>,
    pub data_file: Option<PathBuf>,
    /// `YYYY-MM-DD=AMOUNT`
    pub seeds: Vec<String>,
    /// `ROUND=SHARES@PRICE`
    pub corrections: Vec<String>,
    pub json: bool,
    pub output: Option<PathBuf>,
}

pub async fn run(app: &AppContext, args: RecommendArgs) -> Result<()> {
    let session_start = match args.start.as_deref() {
        Some(raw) => parse_date(raw)?,
        None => app.settings().session_start_date.ok_or_else(|| {
            anyhow!("No session start date; pass --start or set SESSION_START_DATE")
        })?,
    };
    let as_of = args.as_of.as_deref().map(parse_date).transpose()?;
    let config = app.strategy_config(args.config_path.as_deref(), args.capital)?;
    let source = MarketDataSource::from_cli(args.data_file, session_start);
    let ctx = app.engine_context(&source).await?;
    let (traded, rsi, calendar) = ctx.into_parts();

    let mut session = TraderSession::new(
        config,
        calendar,
        Box::new(SystemClock),
        traded,
        Box::new(rsi),
        session_start,
    );
    session.set_as_of_override(as_of);

    for raw in &args.seeds {
        let (date, amount) = parse_seed(raw)?;
        session.add_seed_event(date, amount, "cli")?;
        info!("Seed event of {:.2} scheduled for {}", amount, date);
    }
    for raw in &args.corrections {
        let (round, shares, price) = parse_correction(raw)?;
        if session.correct_tranche(round, shares, price)? {
            info!("Round {} corrected to {} shares at {:.2}", round, shares, price);
        } else {
            warn!(
                "Correction for round {} was not applied (unknown round or not enough cash)",
                round
            );
        }
    }

    let recommendation = match session.daily_recommendation() {
        Ok(recommendation) => recommendation,
        Err(err) if !err.is_fatal() => {
            warn!("No recommendation yet: {}", err.reason());
            return Ok(());
        }
        Err(err) => return Err(anyhow!("Recommendation failed: {}", err.reason())),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&recommendation)?);
    } else {
        print_recommendation(&recommendation);
    }
    if let Some(path) = args.output.as_deref() {
        write_json_report(path, &recommendation)?;
    }
    Ok(())
}

fn parse_seed(raw: &str) -> Result<(NaiveDate, f64)> {
    let (date, amount) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Seed '{}' must look like YYYY-MM-DD=AMOUNT", raw))?;
    let amount = amount
        .trim()
        .parse::<f64>()
        .with_context(|| format!("Invalid seed amount in '{}'", raw))?;
    Ok((parse_date(date.trim())?, amount))
}

fn parse_correction(raw: &str) -> Result<(usize, u64, f64)> {
    let invalid = || anyhow!("Correction '{}' must look like ROUND=SHARES@PRICE", raw);
    let (round, rest) = raw.split_once('=').ok_or_else(invalid)?;
    let (shares, price) = rest.split_once('@').ok_or_else(invalid)?;
    let round = round.trim().parse::<usize>().map_err(|_| invalid())?;
    let shares = shares.trim().parse::<u64>().map_err(|_| invalid())?;
    let price = price.trim().parse::<f64>().map_err(|_| invalid())?;
    if !(price.is_finite() && price > 0.0) {
        return Err(EngineError::InvalidConfig(format!(
            "correction price must be positive (value: {})",
            price
        ))
        .into());
    }
    Ok((round, shares, price))
}

fn print_recommendation(rec: &DailyRecommendation) {
    println!(
        "\n=== ORDERS FOR {} (closes through {}: {:.2}) ===\n",
        rec.date, rec.basis_date, rec.basis_close
    );
    println!(
        "Regime {} (RSI {:.2} last week, {:.2} the week before; plan week ending {})",
        rec.regime.code(),
        rec.rsi_readings.one_week_ago,
        rec.rsi_readings.two_weeks_ago,
        rec.rsi_readings.week_ending
    );

    for fill in &rec.reconciled {
        println!(
            "Reconciled: round {} bought {} sold {} at {:.2} x {} ({:+.2})",
            fill.round_index, fill.buy_date, fill.sell_date, fill.price, fill.shares, fill.realized_pnl
        );
    }

    match (&rec.buy_plan, rec.buy_skip_reason) {
        (Some(plan), _) => println!(
            "BUY  LOC round {}: limit {:.2}, budget {:.2}, about {} shares",
            plan.round, plan.limit_price, plan.round_amount, plan.estimated_shares
        ),
        (None, Some(reason)) => println!("BUY  none: {}", reason),
        (None, None) => println!("BUY  none"),
    }

    for plan in &rec.sell_plans {
        if plan.time_exit_due {
            println!(
                "SELL MOC round {}: {} shares bought {} at {:.2} (held {} > {} days)",
                plan.round_index,
                plan.shares,
                plan.buy_date,
                plan.buy_price,
                plan.holding_days,
                plan.max_hold_days
            );
        } else {
            println!(
                "SELL LOC round {}: {} shares at {:.2} (bought {} at {:.2}, {} regime, day {}/{})",
                plan.round_index,
                plan.shares,
                plan.target_price,
                plan.buy_date,
                plan.buy_price,
                plan.regime_at_purchase.code(),
                plan.holding_days,
                plan.max_hold_days
            );
        }
    }

    let snapshot = &rec.portfolio_snapshot;
    println!(
        "\nCash {:.2} | positions {:.2} | total {:.2} | baseline {:.2} | realized {:+.2} | next round {} ({} open)\n",
        snapshot.cash,
        snapshot.position_value,
        snapshot.total_assets,
        snapshot.investment_capital_baseline,
        snapshot.realized_pnl,
        snapshot.current_round,
        snapshot.open_tranches
    );
}
