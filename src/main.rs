use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

mod auth;
mod clock;
mod config;
mod db;
mod directory;
mod error;
mod models;
mod progression;
mod report;
mod server;
mod store;

use clock::{Clock, SystemClock};
use config::Config;
use db::PgStore;
use models::{ApprovalStatus, ProfileEdit, Role};
use progression::{ProgressionRequest, Term};
use server::AppState;

#[derive(Parser)]
#[command(name = "alumni-directory")]
#[command(about = "Alumni and student directory service with semester progression", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Register profiles from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Serve the HTTP API
    Serve,
    /// Run semester progression from the operator shell
    Progress {
        /// Run outside January and July
        #[arg(long)]
        force: bool,
        /// Rule set for a forced run: january or july
        #[arg(long, requires = "force")]
        term: Option<Term>,
    },
    /// Approve a pending profile
    Approve {
        #[arg(long)]
        email: String,
    },
    /// Reject a pending profile
    Reject {
        #[arg(long)]
        email: String,
    },
    /// Edit a profile; it returns to pending until approved again
    Edit {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        high_commission: Option<String>,
        #[arg(long)]
        expected_passout_year: Option<i32>,
        #[arg(long)]
        scholarship_year: Option<i32>,
    },
    /// List profiles awaiting approval
    Pending,
    /// Search the approved directory
    Search {
        #[arg(required = true)]
        query: Vec<String>,
        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },
    /// Grant a role to a user
    Grant {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long, default_value = "admin")]
        role: Role,
    },
    /// Issue a bearer token for a user
    IssueToken {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Generate a markdown analytics report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            store.seed().await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = store.import_csv(&csv).await?;
            println!("Registered {inserted} profiles from {}.", csv.display());
        }
        Commands::Serve => {
            let store = Arc::new(store);
            let state = Arc::new(AppState {
                profiles: store.clone(),
                identity: store.clone(),
                roles: store,
                clock: Arc::new(SystemClock),
            });

            info!("Starting server...");
            server::start_server(state, config.port).await?;
        }
        Commands::Progress { force, term } => {
            let outcome =
                progression::run_progression(&store, &SystemClock, ProgressionRequest { force, term })
                    .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Approve { email } => {
            store.set_status(&email, ApprovalStatus::Approved).await?;
            println!("Approved {email}.");
        }
        Commands::Reject { email } => {
            store.set_status(&email, ApprovalStatus::Rejected).await?;
            println!("Rejected {email}.");
        }
        Commands::Edit {
            email,
            name,
            program,
            high_commission,
            expected_passout_year,
            scholarship_year,
        } => {
            let edit = ProfileEdit {
                full_name: name,
                program,
                high_commission,
                expected_passout_year,
                scholarship_year,
            };
            let profile = store.update_profile(&email, edit).await?;
            println!(
                "Updated {}; status is now {}.",
                profile.email,
                profile.status.as_str()
            );
        }
        Commands::Pending => {
            let pending = store.fetch_pending().await?;

            if pending.is_empty() {
                println!("No profiles awaiting approval.");
                return Ok(());
            }

            println!("Awaiting approval:");
            for profile in pending.iter() {
                println!(
                    "- {} ({}, {}) registered {}",
                    profile.full_name,
                    profile.email,
                    profile.user_type().as_str(),
                    profile.created_at.date_naive()
                );
            }
        }
        Commands::Search { query, json } => {
            let query = query.join(" ");
            let profiles = store.fetch_directory().await?;
            let hits = directory::filter_profiles(&profiles, &query);

            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
                return Ok(());
            }

            if hits.is_empty() {
                println!("No profiles match '{query}'.");
                return Ok(());
            }

            for profile in hits {
                let standing = match (profile.current_semester(), profile.passout_year()) {
                    (Some(semester), _) => format!("semester {semester}"),
                    (None, Some(year)) => format!("class of {year}"),
                    (None, None) => "semester unknown".to_string(),
                };
                println!(
                    "- {} ({}, {}, {})",
                    profile.full_name,
                    profile.email,
                    profile.user_type().as_str(),
                    standing
                );
            }
        }
        Commands::Grant { user_id, role } => {
            store.grant_role(user_id, role).await?;
            println!("Granted {} to {user_id}.", role.as_str());
        }
        Commands::IssueToken { user_id, days } => {
            let token = store.issue_session(user_id, days).await?;
            println!("{token}");
        }
        Commands::Report { out } => {
            let profiles = store.fetch_all().await?;
            let report = report::build_report(SystemClock.today(), &profiles);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
