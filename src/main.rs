use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use cohort_dropout_risk::attribution::risk_factor;
use cohort_dropout_risk::{
    EngineConfig, FeatureVector, GradientBoostedModel, RiskEngine, RiskLevel, StudentProfile,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

mod db;
mod report;
mod telemetry;

#[derive(Parser)]
#[command(name = "cohort-dropout-risk")]
#[command(about = "Dropout risk scoring and root-cause reporting for student cohorts", long_about = None)]
struct Cli {
    /// Path to the trained tree-ensemble model (JSON)
    #[arg(
        long,
        env = "MODEL_PATH",
        default_value = "models/trained/churn_model.json",
        global = true
    )]
    model: PathBuf,
    /// Churn probability at which Medium risk starts
    #[arg(long, default_value_t = 0.40, global = true)]
    low_threshold: f64,
    /// Churn probability at which High risk starts
    #[arg(long, default_value_t = 0.70, global = true)]
    high_threshold: f64,
    /// Number of root causes to report
    #[arg(long, default_value_t = 5, global = true)]
    top_k: usize,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo students across all three risk bands
    Seed,
    /// Import students from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Score risk across students
    #[command(group(
        ArgGroup::new("scope")
            .args(["course", "email"])
            .multiple(false)
    ))]
    Score {
        #[arg(long)]
        course: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown cohort report
    Report {
        #[arg(long)]
        course: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Explain one student's assessment feature by feature
    Explain {
        #[arg(long)]
        email: String,
    },
}

fn load_engine(
    path: &Path,
    config: EngineConfig,
) -> anyhow::Result<RiskEngine<GradientBoostedModel>> {
    let model = GradientBoostedModel::load(path)
        .with_context(|| format!("failed to load risk model from {}", path.display()))?;
    Ok(RiskEngine::new(model, config))
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn score_cohort(
    pool: &PgPool,
    engine: &RiskEngine<GradientBoostedModel>,
    course: Option<&str>,
    email: Option<&str>,
) -> anyhow::Result<cohort_dropout_risk::CohortRun<StudentProfile>> {
    let students = db::fetch_students(pool, course, email).await?;
    info!(students = students.len(), "fetched students");
    let rows = students
        .into_iter()
        .map(|record| (record.profile, record.features))
        .collect();
    Ok(engine.assess_cohort(rows))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_json);

    let config = EngineConfig::new(cli.low_threshold, cli.high_threshold, cli.top_k)
        .context("invalid scoring configuration")?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let inserted = db::seed(&pool).await?;
            println!("Seeded {inserted} students.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let imported = db::import_csv(&pool, &csv).await?;
            println!("Imported {imported} students from {}.", csv.display());
        }
        Commands::Score {
            course,
            email,
            limit,
        } => {
            let engine = load_engine(&cli.model, config)?;
            let pool = connect().await?;
            let run = score_cohort(&pool, &engine, course.as_deref(), email.as_deref()).await?;

            if run.scored.is_empty() && run.skipped.is_empty() {
                println!("No students found.");
                return Ok(());
            }

            let counts = run.summary.risk_counts;
            let thresholds = engine.thresholds();
            println!(
                "Cut points: Medium from {:.2}, High from {:.2}.",
                thresholds.low(),
                thresholds.high()
            );
            println!(
                "Assessed {} students: {} high, {} medium, {} low.",
                run.summary.total(),
                counts.get(RiskLevel::High),
                counts.get(RiskLevel::Medium),
                counts.get(RiskLevel::Low)
            );
            println!("Top students by risk:");
            for student in report::rank_students(&run).iter().take(limit) {
                println!("- {}", report::describe_student(student));
            }
            if !run.skipped.is_empty() {
                println!("Skipped {} students with invalid data.", run.skipped.len());
            }
        }
        Commands::Report { course, out } => {
            let engine = load_engine(&cli.model, config)?;
            let pool = connect().await?;
            let run = score_cohort(&pool, &engine, course.as_deref(), None).await?;
            let report = report::build_report(course.as_deref(), chrono::Utc::now(), &run);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Explain { email } => {
            let engine = load_engine(&cli.model, config)?;
            let pool = connect().await?;
            let record = db::fetch_students(&pool, None, Some(&email))
                .await?
                .into_iter()
                .next()
                .with_context(|| format!("no student with email {email}"))?;
            let features = FeatureVector::try_from(&record.features)
                .with_context(|| format!("stored features for {email} are invalid"))?;
            let (assessment, attribution) = engine.assess_one(&features)?;

            println!(
                "{} ({}): {} risk, confidence {:.2}",
                record.profile.name,
                record.profile.course,
                assessment.risk_level,
                assessment.confidence
            );
            let mut contributions: Vec<_> = attribution.iter().collect();
            contributions
                .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            for (feature, weight) in contributions {
                println!(
                    "- {}: value {}, risk factor {:.3}, contribution {:.1}%",
                    feature.label(),
                    features.value(feature),
                    risk_factor(feature, features.value(feature)),
                    weight * 100.0
                );
            }
        }
    }

    Ok(())
}
