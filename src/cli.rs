use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::time::Instant;

use crate::{
    engine::MatchingEngine,
    orders::{OrderKind, Side},
};

/// Simple CLI to drive the matching engine
#[derive(Parser)]
#[command(name = "matching-engine")]
#[command(version = "0.1", about = "A demo of a single-book limit order matching engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scripted session against a fresh book
    Scenario {
        /// Print book snapshots as JSON instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Stream random limit orders through the engine and report throughput
    Flow {
        /// Number of orders to submit
        #[arg(long, default_value_t = 100_000)]
        orders: u64,

        /// RNG seed (fixed default keeps runs reproducible)
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

/// Prices cross the API as integer ticks; the demo quotes in dollars and
/// converts at the boundary (one tick = one cent).
fn to_ticks(dollars: f64) -> u64 {
    (dollars * 100.0).round() as u64
}

fn fmt_ticks(ticks: u64) -> String {
    format!("{}.{:02}", ticks / 100, ticks % 100)
}

fn print_book(engine: &MatchingEngine, depth: usize) {
    println!("------ Order Book ------");
    println!("Asks (best last):");
    for level in engine.depth(Side::Sell, depth).iter().rev() {
        println!(
            "  Price: {}, Total Qty: {}, Orders: {}",
            fmt_ticks(level.price),
            level.quantity,
            level.orders
        );
    }
    match (engine.mid_price(), engine.spread()) {
        (Some(mid), Some(spread)) => println!(
            "  -- Mid: {:.2} | Spread: {} --",
            mid / 100.0,
            fmt_ticks(spread)
        ),
        _ => println!("  -- one-sided book --"),
    }
    println!("Bids (best first):");
    for level in engine.depth(Side::Buy, depth) {
        println!(
            "  Price: {}, Total Qty: {}, Orders: {}",
            fmt_ticks(level.price),
            level.quantity,
            level.orders
        );
    }
    println!("------------------------");
}

fn print_recent_trades(engine: &MatchingEngine, n: usize) {
    println!("--- Recent Trades ---");
    for trade in engine.recent_trades(n) {
        println!(
            "  buy #{} x sell #{} @ {} qty {}",
            trade.buy_order_id,
            trade.sell_order_id,
            fmt_ticks(trade.price),
            trade.quantity
        );
    }
}

fn print_stats(engine: &MatchingEngine) {
    let stats = engine.stats();
    println!("--- Statistics ---");
    println!("  Orders processed: {}", stats.orders_processed);
    println!("  Trades executed:  {}", stats.trades_executed);
    println!("  Active resting orders: {}", stats.active_orders);
}

fn show(engine: &MatchingEngine, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&engine.snapshot(5))?);
    } else {
        print_book(engine, 5);
    }
    Ok(())
}

fn run_scenario(json: bool) -> Result<()> {
    let mut engine = MatchingEngine::new();

    println!("Building initial order book...");
    for (price, qty) in [
        (100.50, 100),
        (100.60, 150),
        (100.70, 200),
        (100.80, 175),
        (100.90, 125),
    ] {
        engine.add_order(Side::Sell, OrderKind::Limit, to_ticks(price), qty)?;
    }
    for (price, qty) in [
        (100.40, 120),
        (100.30, 180),
        (100.20, 150),
        (100.10, 200),
        (100.00, 100),
    ] {
        engine.add_order(Side::Buy, OrderKind::Limit, to_ticks(price), qty)?;
    }
    show(&engine, json)?;

    println!("\n>>> MARKET BUY for 250 <<<");
    engine.add_order(Side::Buy, OrderKind::Market, 0, 250)?;
    show(&engine, json)?;
    print_recent_trades(&engine, 3);

    println!("\n>>> LIMIT BUY at 100.65 for 180 <<<");
    engine.add_order(Side::Buy, OrderKind::Limit, to_ticks(100.65), 180)?;
    show(&engine, json)?;
    print_recent_trades(&engine, 3);

    println!("\n>>> Passive LIMIT orders at 100.35 and 100.95 <<<");
    engine.add_order(Side::Buy, OrderKind::Limit, to_ticks(100.35), 100)?;
    engine.add_order(Side::Sell, OrderKind::Limit, to_ticks(100.95), 150)?;
    show(&engine, json)?;

    println!("\n>>> LIMIT SELL at 101.00 for 50, then cancel it <<<");
    let id = engine.add_order(Side::Sell, OrderKind::Limit, to_ticks(101.00), 50)?;
    println!("  cancel({}) -> {}", id, engine.cancel_order(id));
    println!("  cancel({}) -> {}", id, engine.cancel_order(id));
    show(&engine, json)?;

    print_stats(&engine);
    Ok(())
}

fn run_flow(orders: u64, seed: u64) -> Result<()> {
    let mut engine = MatchingEngine::new();
    let mut rng = StdRng::seed_from_u64(seed);

    let start = Instant::now();
    for _ in 0..orders {
        let side = if rng.random_bool(0.5) {
            Side::Buy
        } else {
            Side::Sell
        };
        // Random limits on a one-cent grid around 100.00
        let price = rng.random_range(9900..=10100);
        let quantity = rng.random_range(10..=500);
        engine.add_order(side, OrderKind::Limit, price, quantity)?;
    }
    let elapsed = start.elapsed();

    println!("Processed {} orders in {} ms", orders, elapsed.as_millis());
    println!(
        "Throughput: {:.0} orders/sec",
        orders as f64 / elapsed.as_secs_f64()
    );
    print_stats(&engine);
    Ok(())
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Scenario { json } => run_scenario(json),
        Commands::Flow { orders, seed } => run_flow(orders, seed),
    }
}
