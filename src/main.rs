//! CLI entry point for the school indicator engine.
//!
//! Computes indicators over the configured data source, prints results,
//! breakdowns and trends as JSON, and publishes full reports to S3.

use anyhow::Result;
use clap::{Parser, Subcommand};
use school_indicators::config::AppConfig;
use school_indicators::hierarchy::EntityId;
use school_indicators::output::{Report, write_json};
use school_indicators::publish::{report_key, write_json_to_s3};
use school_indicators::session::ReportSession;
use school_indicators::submission::ItineraryId;
use std::ffi::OsStr;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "school_indicators")]
#[command(about = "Aggregates school monitoring indicators across the region hierarchy", long_about = None)]
struct Cli {
    /// Directory of exported entities, itineraries and submissions
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Base URL of the monitoring backend API
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// JSON formula set to use instead of the built-in catalogue
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Only fetch the subtree of this entity
    #[arg(long, global = true)]
    scope: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered indicators
    Indicators,
    /// List the known itineraries, oldest first
    Itineraries,
    /// Compute one indicator for one entity
    Result {
        #[arg(short, long)]
        itinerary: String,
        #[arg(short = 'k', long)]
        indicator: String,
        #[arg(short, long)]
        entity: String,
    },
    /// Rank the children of an entity by one indicator
    Breakdown {
        #[arg(short, long)]
        itinerary: String,
        #[arg(short = 'k', long)]
        indicator: String,
        #[arg(short, long)]
        parent: String,
    },
    /// Show one indicator for an entity over recent itineraries
    Trend {
        #[arg(short = 'k', long)]
        indicator: String,
        #[arg(short, long)]
        entity: String,
        /// Number of itineraries (defaults to INDICATORS_TREND_LIMIT)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Compute every indicator for an entity and its descendants
    Report {
        #[arg(short, long)]
        itinerary: String,
        #[arg(short, long)]
        entity: String,
        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List hierarchy records and submissions left out of an itinerary's snapshot
    Rejected {
        #[arg(short, long)]
        itinerary: String,
    },
    /// Compute a full report and upload it to S3
    Publish {
        #[arg(short, long)]
        itinerary: String,
        #[arg(short, long)]
        entity: String,
        /// S3 bucket name to upload the report to (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: String,
        /// Gzip compress the report before uploading
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = AppConfig::load()?;

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = Path::new(&config.log_file_path);
    let log_dir = log_file_path.parent().unwrap_or(Path::new("logs"));
    let log_file_name = log_file_path
        .file_name()
        .unwrap_or(OsStr::new("school_indicators.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir;
    }
    if cli.api_url.is_some() {
        config.api_url = cli.api_url;
    }
    if cli.registry.is_some() {
        config.registry_path = cli.registry;
    }

    let registry = Arc::new(config.registry()?);
    info!(indicators = registry.len(), "Indicator registry loaded");

    if let Commands::Indicators = cli.command {
        let definitions: Vec<_> = registry.iter().collect();
        return write_json(std::io::stdout().lock(), &definitions);
    }

    let (source, hierarchy_provider) = config.connect()?;
    let mut session = ReportSession::new(source, hierarchy_provider, registry.clone())
        .with_fetch_timeout(config.fetch_timeout);
    if let Some(scope) = cli.scope {
        session = session.with_scope(EntityId(scope));
    }

    let stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Indicators => {}
        Commands::Itineraries => {
            write_json(stdout, &session.itineraries().await?)?;
        }
        Commands::Result {
            itinerary,
            indicator,
            entity,
        } => {
            let result = session
                .get_indicator_result(&ItineraryId(itinerary), &indicator, &EntityId(entity))
                .await?;
            write_json(stdout, &result)?;
        }
        Commands::Breakdown {
            itinerary,
            indicator,
            parent,
        } => {
            let rows = session
                .get_breakdown(&ItineraryId(itinerary), &indicator, &EntityId(parent))
                .await?;
            write_json(stdout, &rows)?;
        }
        Commands::Trend {
            indicator,
            entity,
            limit,
        } => {
            let limit = limit.unwrap_or(config.trend_limit);
            let points = session
                .get_trend(&indicator, &EntityId(entity), limit)
                .await?;
            write_json(stdout, &points)?;
        }
        Commands::Report {
            itinerary,
            entity,
            output,
        } => {
            let report = build_report(&mut session, itinerary, entity).await?;
            match output {
                Some(path) => {
                    write_json(BufWriter::new(File::create(&path)?), &report)?;
                    info!(path = %path.display(), rows = report.rows.len(), "Report written");
                }
                None => write_json(stdout, &report)?,
            }
        }
        Commands::Rejected { itinerary } => {
            let entities = session.rejected_entities().await?;
            let submissions = session.rejected(&ItineraryId(itinerary)).await?;
            info!(
                entities = entities.len(),
                submissions = submissions.len(),
                "Rejected records"
            );
            write_json(
                stdout,
                &serde_json::json!({ "entities": entities, "submissions": submissions }),
            )?;
        }
        Commands::Publish {
            itinerary,
            entity,
            s3_bucket,
            gzip,
        } => {
            if s3_bucket.is_empty() {
                info!("S3 bucket not specified, skipping upload");
                return Ok(());
            }

            let report = build_report(&mut session, itinerary, entity).await?;
            let key = report_key(&report.itinerary_id, &report.scope, gzip);

            let aws = aws_config::load_from_env().await;
            let s3 = aws_sdk_s3::Client::new(&aws);
            write_json_to_s3(&s3, &s3_bucket, &key, &report, gzip).await?;
        }
    }

    Ok(())
}

/// Computes every indicator for `entity` and flattens it into report rows.
#[tracing::instrument(skip(session))]
async fn build_report(session: &mut ReportSession, itinerary: String, entity: String) -> Result<Report> {
    let itinerary = ItineraryId(itinerary);
    let entity = EntityId(entity);
    let sets = session.report(&itinerary, &entity).await?;
    Ok(Report::build(session.registry(), itinerary, entity, &sets))
}
