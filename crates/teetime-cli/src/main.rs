use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use teetime_storage::{PgStore, TeeTimeStore};
use teetime_sync::{CourseRegistry, SyncConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "teetime")]
#[command(about = "Golf tee-time ingestion and read API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion pass over every active configured course.
    Ingest {
        /// Seed an in-memory store from courses.yaml instead of using Postgres.
        #[arg(long)]
        dry_run: bool,
        /// Override TEETIME_WINDOW_DAYS for this pass.
        #[arg(long)]
        days: Option<u32>,
        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Insert configured courses that are not yet in the database.
    Seed,
    /// Apply database migrations.
    Migrate,
    /// Serve the JSON read API.
    Serve,
    /// Toggle a course's active flag.
    Course {
        #[command(subcommand)]
        action: CourseAction,
    },
}

#[derive(Debug, Subcommand)]
enum CourseAction {
    Activate { id: Uuid },
    Deactivate { id: Uuid },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teetime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn connect(config: &SyncConfig) -> Result<PgStore> {
    PgStore::connect(config.require_database_url()?)
        .await
        .context("connecting to database")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Ingest {
        dry_run: false,
        days: None,
        json: false,
    }) {
        Commands::Ingest { dry_run, days, json } => {
            let summary = teetime_sync::run_ingest_from_env(dry_run, days).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "ingest complete: run_id={} courses={}/{} skipped={} failed={} tee_times={}",
                    summary.run_id,
                    summary.courses_resolved,
                    summary.courses_configured,
                    summary.courses_skipped,
                    summary.courses_failed,
                    summary.tee_times_upserted
                );
            }
        }
        Commands::Seed => {
            let config = SyncConfig::from_env()?;
            let registry = CourseRegistry::load(&config.courses_path)?;
            let store = connect(&config).await?;
            let inserted = teetime_sync::seed_courses(&store, &registry).await?;
            println!("seed complete: inserted={} configured={}", inserted.len(), registry.len());
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env()?;
            connect(&config).await?.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            teetime_web::serve_from_env().await?;
        }
        Commands::Course { action } => {
            let config = SyncConfig::from_env()?;
            let store = connect(&config).await?;
            let (id, active) = match action {
                CourseAction::Activate { id } => (id, true),
                CourseAction::Deactivate { id } => (id, false),
            };
            store.set_course_active(id, active).await?;
            tracing::info!(course_id = %id, active, "course updated");
            println!("course {id} active={active}");
        }
    }

    Ok(())
}
