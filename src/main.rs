use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

mod approval;
mod db;
mod export;
mod logging;
mod models;
mod report;
mod scoring;

use approval::{ApprovalAction, MemoryApprovalStore};
use models::{ApprovalStatus, EvaluationSubmission};

#[derive(Parser)]
#[command(name = "hr-evaluation-tracker")]
#[command(about = "Performance evaluation scoring and approval tracking", long_about = None)]
struct Cli {
    /// Postgres connection string, required by database-backed commands
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,
    #[arg(long, default_value_t = 5, global = true)]
    max_connections: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Read submissions from a JSON array instead of the database
    #[arg(long)]
    from_file: Option<PathBuf>,
    /// Stored employee approvals as a JSON object of storage key to value
    #[arg(long, requires = "from_file")]
    approvals_file: Option<PathBuf>,
    #[arg(long, default_value_t = 30)]
    since_days: i64,
}

#[derive(Clone, Copy, ValueEnum)]
enum SignerRole {
    Employee,
    Evaluator,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import submissions (and optionally stored approvals) from JSON files
    Import {
        #[arg(long)]
        json: PathBuf,
        #[arg(long)]
        approvals: Option<PathBuf>,
    },
    /// Rank submissions by overall rating
    Score {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, value_enum)]
        status: Option<ApprovalStatus>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export scored submissions as CSV
    Export {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        out: PathBuf,
    },
    /// Record a signature on a submission
    Approve {
        #[arg(long)]
        id: i64,
        #[arg(long, value_enum)]
        role: SignerRole,
        /// File holding the `data:image/...` signature URL
        #[arg(long)]
        signature_file: PathBuf,
    },
    /// Mark an unsigned submission as rejected
    Reject {
        #[arg(long)]
        id: i64,
    },
}

impl ValueEnum for ApprovalStatus {
    fn value_variants<'a>() -> &'a [Self] {
        &ApprovalStatus::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

async fn connect(cli: &Cli) -> anyhow::Result<PgPool> {
    let database_url = cli
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn read_submissions_file(path: &Path) -> anyhow::Result<Vec<EvaluationSubmission>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} must hold a JSON array of submissions", path.display()))
}

/// Loads submissions, merges stored employee approvals and applies the
/// time window.
async fn load_submissions(
    cli: &Cli,
    source: &SourceArgs,
) -> anyhow::Result<Vec<EvaluationSubmission>> {
    let (submissions, store) = match source.from_file.as_deref() {
        Some(path) => {
            let store = match source.approvals_file.as_deref() {
                Some(approvals) => MemoryApprovalStore::from_json_file(approvals)?,
                None => MemoryApprovalStore::new(),
            };
            (read_submissions_file(path)?, store)
        }
        None => {
            let pool = connect(cli).await?;
            let submissions = db::fetch_submissions(&pool).await?;
            let store = db::load_approval_store(&pool).await?;
            (submissions, store)
        }
    };

    let cutoff = scoring::cutoff_date(source.since_days);
    let merged = approval::merge_employee_approval_data(submissions, &store);
    let total = merged.len();
    let windowed: Vec<EvaluationSubmission> = merged
        .into_iter()
        .filter(|submission| scoring::within_window(submission, cutoff))
        .collect();

    info!(
        total,
        in_window = windowed.len(),
        stored_approvals = store.len(),
        "loaded submissions"
    );
    Ok(windowed)
}

async fn record_action(pool: &PgPool, id: i64, action: ApprovalAction) -> anyhow::Result<()> {
    let mut submission = db::fetch_submission(pool, id).await?;
    let store = db::load_approval_store(pool).await?;
    let status =
        approval::apply_action_with_store(&mut submission, &store, action, chrono::Utc::now())?;
    db::update_submission(pool, &submission).await?;
    info!(id, %status, "approval recorded");
    println!("Submission {id} is now {status}.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::InitDb => {
            let pool = connect(&cli).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&cli).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { json, approvals } => {
            let pool = connect(&cli).await?;
            let inserted = db::import_json(&pool, json).await?;
            println!("Inserted {inserted} submissions from {}.", json.display());

            if let Some(path) = approvals {
                let store = MemoryApprovalStore::from_json_file(path)?;
                if store.is_empty() {
                    tracing::warn!(path = %path.display(), "approvals file holds no records");
                }
                let written = db::import_approvals(&pool, &store).await?;
                println!("Stored {written} approval records from {}.", path.display());
            }
        }
        Commands::Score {
            source,
            status,
            limit,
        } => {
            let submissions = load_submissions(&cli, source).await?;
            let summaries =
                scoring::filter_by_status(scoring::rank_summaries(&submissions), *status);

            if summaries.is_empty() {
                println!("No submissions found for this window.");
                return Ok(());
            }

            println!("Top employees by overall rating:");
            for summary in summaries.iter().take(*limit) {
                let overview = summary
                    .overview_percentage
                    .map(|percent| format!(", overview {percent}%"))
                    .unwrap_or_default();
                println!(
                    "- #{} {} ({}, reviewed by {}) rated {:.1}{} [{}]",
                    summary.id,
                    summary.employee_name,
                    summary.department,
                    summary.evaluator,
                    summary.overall_rating,
                    overview,
                    summary.status
                );
            }
        }
        Commands::Report { source, out } => {
            let submissions = load_submissions(&cli, source).await?;
            let cutoff = scoring::cutoff_date(source.since_days);
            let report = report::build_report(source.since_days, cutoff, &submissions);
            std::fs::write(out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { source, out } => {
            let submissions = load_submissions(&cli, source).await?;
            let summaries = scoring::rank_summaries(&submissions);
            let file = std::fs::File::create(out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            export::write_csv(file, &summaries)?;
            println!("Exported {} submissions to {}.", summaries.len(), out.display());
        }
        Commands::Approve {
            id,
            role,
            signature_file,
        } => {
            let signature = std::fs::read_to_string(signature_file)
                .with_context(|| format!("failed to read {}", signature_file.display()))?
                .trim()
                .to_string();
            let action = match role {
                SignerRole::Employee => ApprovalAction::EmployeeSign(signature),
                SignerRole::Evaluator => ApprovalAction::EvaluatorSign(signature),
            };
            let pool = connect(&cli).await?;
            record_action(&pool, *id, action).await?;
        }
        Commands::Reject { id } => {
            let pool = connect(&cli).await?;
            record_action(&pool, *id, ApprovalAction::Reject).await?;
        }
    }

    Ok(())
}
