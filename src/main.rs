use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use house_ledger::{
    config::{Settings, database, load_settings},
    core::{hsi::HsiEngine, late_payment, notification::LogPushNotifier, summary},
    errors::Result,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Job runner for the house ledger, invoked by an external scheduler
#[derive(Debug, Parser)]
#[command(name = "house-ledger", version, about)]
struct Cli {
    /// Settings file (TOML); built-in defaults when omitted
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create missing tables and indexes
    InitDb,
    /// Apply late-payment penalties, then recompute the HSI of affected houses
    LateSweep {
        /// Day to sweep for (YYYY-MM-DD), today when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Recompute the House Status Index
    HsiRecompute {
        /// Only this house; every house with members when omitted
        #[arg(long)]
        house_id: Option<i64>,
    },
    /// Print the financial summary of a house
    Summary {
        /// House to summarize
        house_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, env vars can also be set externally
    dotenv().ok();

    let cli = Cli::parse();

    // 3. Load settings
    let settings = match &cli.config {
        Some(path) => load_settings(path)
            .inspect_err(|e| error!("Failed to load settings from {}: {e}", path.display()))?,
        None => Settings::default(),
    };

    // 4. Connect and make sure the schema exists
    let db = database::create_connection(&database::get_database_url())
        .await
        .inspect_err(|e| error!("Failed to connect to database: {e}"))?;
    database::create_tables(&db).await?;

    match cli.command {
        Command::InitDb => info!("Database initialized successfully."),
        Command::LateSweep { date } => {
            let today = date.unwrap_or_else(|| Utc::now().date_naive());
            let sweep = late_payment::process_late_charges(&db, &settings, today).await?;
            let engine = HsiEngine::new(db.clone(), &settings, LogPushNotifier);
            for house_id in sweep.houses_affected {
                if let Err(e) = engine.update_house_hsi(house_id).await {
                    error!(house_id, "HSI recompute after sweep failed: {e}");
                }
            }
        }
        Command::HsiRecompute { house_id } => {
            let engine = HsiEngine::new(db.clone(), &settings, LogPushNotifier);
            match house_id {
                Some(house_id) => {
                    engine.update_house_hsi(house_id).await?;
                }
                None => {
                    engine.recompute_all().await?;
                }
            }
        }
        Command::Summary { house_id } => {
            let summary = summary::house_summary(&db, house_id, None).await?;
            println!("House {}", summary.house_id);
            println!("  members:              {}", summary.member_count);
            println!("  balance:              {}", summary.balance);
            println!("  collected:            {}", summary.ledger_total);
            println!("  outstanding advances: {}", summary.outstanding_advances);
            println!(
                "  unpaid charges:       {} ({})",
                summary.unpaid_charges_count, summary.unpaid_amount
            );
            match summary.hsi {
                Some(hsi) => println!("  HSI:                  {} (bracket {})", hsi.score, hsi.bracket),
                None => println!("  HSI:                  not computed"),
            }
        }
    }

    Ok(())
}
