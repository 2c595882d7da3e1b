use clap::{Parser, Subcommand};
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{error, info};
use treasure_house_api::migrator::Migrator;

/// Schema tool for the Treasure House database
#[derive(Parser)]
#[command(name = "migration", version, about)]
struct Cli {
    /// Database URL; falls back to `DATABASE_URL`, then `APP__DATABASE_URL`
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations
    Up {
        #[arg(long, help = "Apply at most this many migrations")]
        steps: Option<u32>,
    },
    /// Roll back applied migrations
    Down {
        #[arg(long, default_value_t = 1, help = "Number of migrations to roll back")]
        steps: u32,
    },
    /// Drop every table and re-apply all migrations
    Fresh,
    /// Show applied and pending migrations
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    let database_url = cli
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .or_else(|| std::env::var("APP__DATABASE_URL").ok())
        .ok_or_else(|| anyhow::anyhow!("no database url: pass --database-url or set DATABASE_URL"))?;

    let mut options = ConnectOptions::new(database_url);
    options
        .max_connections(2)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    let db = Database::connect(options).await?;

    let result = match cli.command {
        Command::Up { steps } => Migrator::up(&db, steps).await,
        Command::Down { steps } => Migrator::down(&db, Some(steps)).await,
        Command::Fresh => Migrator::fresh(&db).await,
        Command::Status => Migrator::status(&db).await,
    };

    if let Err(e) = result {
        error!("Migration failed: {}", e);
        return Err(e.into());
    }
    info!("Migration completed successfully");
    Ok(())
}
