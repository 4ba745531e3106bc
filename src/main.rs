mod config;
mod error;
mod models;
mod pipeline;
mod reconcile;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::Reconciler;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "otodom-mirror", about = "Apartment listings mirror", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reconciliation pass: discover, classify, insert/update, close
    Run,

    /// Apply schema migrations without scraping anything
    Migrate,

    /// Show database statistics
    Stats,

    /// List all active listings
    Listings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "otodom_mirror=info,warn",
        1 => "otodom_mirror=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run => {
            let timer = utils::RunTimer::start("reconciliation");
            let stats = Reconciler::new(config).run().await?;
            timer.finish();
            println!(
                "Done: {} seen, {} new, {} price changes, {} unchanged, {} closed, {} errors",
                stats.summaries_seen,
                stats.new_listings,
                stats.price_changes,
                stats.unchanged,
                stats.closures,
                stats.errors
            );
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let s = repo.stats()?;
            println!("─────────────────────────────────");
            println!("  Otodom Mirror — Database Stats");
            println!("─────────────────────────────────");
            println!("  Listings      : {}", utils::fmt_number(s.listings));
            println!("  Active        : {}", utils::fmt_number(s.active));
            println!("  Locations     : {}", utils::fmt_number(s.locations));
            println!("  Price changes : {}", utils::fmt_number(s.price_changes));
            println!("  Photos        : {}", utils::fmt_number(s.photos));
            println!(
                "  Last closing  : {}",
                s.last_closing.map(|d| d.to_string()).unwrap_or("—".into())
            );
            println!("─────────────────────────────────");
        }

        Command::Listings => {
            let repo = Repository::open(&config.storage.db_path)?;
            let rows = repo.list_active()?;
            if rows.is_empty() {
                println!("No active listings — run `otodom-mirror run` first.");
            } else {
                println!("{} active listings:", rows.len());
                for row in &rows {
                    println!(
                        "  #{:<6} site {:<10} {:>7.2} m²  {:>12}  {}",
                        row.id,
                        row.site_id,
                        row.area,
                        utils::fmt_number(row.updated_price),
                        row.link
                    );
                }
            }
        }
    }

    Ok(())
}
