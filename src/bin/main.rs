use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use coinfolio::provider::coingecko::CoinGecko;
use coinfolio::provider::TimeFrame;
use coinfolio::reconciler::Reconciler;
use coinfolio::store::storage::JsonFileStorage;
use coinfolio::store::{PortfolioStore, StoreError};
use coinfolio::tui::app::App;
use coinfolio::AppEvent;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "COINFOLIO_STORE", default_value = "portfolio.json")]
    store_path: PathBuf,
    #[arg(long, default_value = "usd")]
    currency: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive dashboard
    Tui {
        #[arg(long, default_value = "7d")]
        range: TimeFrame,
    },
    /// Track a coin
    Add {
        coin_id: String,
        #[arg(long, default_value = "0")]
        amount: Decimal,
    },
    /// Stop tracking a coin
    Remove { coin_id: String },
    /// Record the amount invested in a tracked coin
    SetAmount { coin_id: String, amount: String },
    /// Print the portfolio and its invested total
    List,
    /// Spot price with the 24h change
    Price { coin_id: String },
    /// Top coins by market cap
    Coins {
        #[arg(long, default_value = "100")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("{}=info,reqwest=warn", env!("CARGO_CRATE_NAME")).into()
        }))
        .with(fmt::layer())
        .init();

    let args = Args::parse();
    let store = PortfolioStore::open(JsonFileStorage::new(&args.store_path));

    let command = args.command.unwrap_or(Commands::Tui {
        range: TimeFrame::Week,
    });

    let result = match command {
        Commands::Tui { range } => run_tui(store, args.currency, range).await,
        Commands::Add { coin_id, amount } => run_add(store, &coin_id, &args.currency, amount),
        Commands::Remove { coin_id } => run_remove(store, &coin_id),
        Commands::SetAmount { coin_id, amount } => run_set_amount(store, &coin_id, &amount),
        Commands::List => run_list(&store),
        Commands::Price { coin_id } => run_price(&coin_id, &args.currency).await,
        Commands::Coins { limit } => run_coins(limit).await,
    };

    if let Err(err) = result {
        eprintln!("{} : {}", "error".red(), err);
        std::process::exit(1);
    }
}

async fn run_tui(
    store: PortfolioStore<JsonFileStorage>,
    currency: String,
    range: TimeFrame,
) -> Result<()> {
    let (tx, rx) = tokio::sync::mpsc::channel::<AppEvent>(100);

    let provider = CoinGecko::new();
    let reconciler = Reconciler::new(store);
    let mut app = App::new(rx, tx, provider, reconciler, currency, range);

    let result = app.run().await;
    ratatui::restore();
    result
}

fn run_add(
    mut store: PortfolioStore<JsonFileStorage>,
    coin_id: &str,
    currency: &str,
    amount: Decimal,
) -> Result<()> {
    store.add(coin_id, currency, amount)?;
    println!("Tracking {}", coin_id.purple());
    Ok(())
}

fn run_remove(mut store: PortfolioStore<JsonFileStorage>, coin_id: &str) -> Result<()> {
    store.remove(coin_id)?;
    println!("Removed {}", coin_id.purple());
    Ok(())
}

fn run_set_amount(
    mut store: PortfolioStore<JsonFileStorage>,
    coin_id: &str,
    amount: &str,
) -> Result<()> {
    let amount = Decimal::from_str(amount.trim())
        .map_err(|_| StoreError::InvalidAmount(amount.trim().to_string()))?;
    store.update_invested_amount(coin_id, amount)?;
    println!(
        "{} invested in {}",
        store
            .get(coin_id)
            .map(|record| record.invested_amount.to_string())
            .unwrap_or_default()
            .yellow(),
        coin_id.purple()
    );
    Ok(())
}

fn run_list(store: &PortfolioStore<JsonFileStorage>) -> Result<()> {
    if store.records().is_empty() {
        println!("Portfolio is empty");
        return Ok(());
    }
    for record in store.records() {
        println!("{}", record);
    }
    println!(
        "Total invested : {}",
        store.sum_invested().to_string().yellow()
    );
    Ok(())
}

async fn run_price(coin_id: &str, currency: &str) -> Result<()> {
    let provider = CoinGecko::new();
    let quote = provider.spot(coin_id, currency).await?;

    println!(
        "{} : {} {}",
        coin_id.purple(),
        quote.price.to_string().yellow(),
        currency.to_uppercase()
    );
    match quote.change_24h {
        Some(change) if change < Decimal::ZERO => {
            println!("24h change : {}%", change.to_string().red())
        }
        Some(change) => println!("24h change : {}%", change.to_string().green()),
        None => println!("24h change : n/a"),
    }
    Ok(())
}

async fn run_coins(limit: usize) -> Result<()> {
    let provider = CoinGecko::new();
    let coins = provider.top_coins(limit).await?;

    for coin in coins {
        println!(
            "{} : {} ({})",
            coin.id.purple(),
            coin.name,
            coin.symbol.to_uppercase()
        );
    }
    Ok(())
}
