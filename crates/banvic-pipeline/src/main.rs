//! BanVic Pipeline - daily extraction and warehouse load

use anyhow::{bail, Context, Result};
use banvic_common::logging::{init_logging, LogConfig, LogLevel};
use banvic_pipeline::config::load_dotenv;
use banvic_pipeline::db::health_check;
use banvic_pipeline::extract::{FlatFileExtractor, SourceTableExtractor};
use banvic_pipeline::landing::{LandingZone, CAPTURE_DATE_FORMAT};
use banvic_pipeline::load::{self, WarehouseLoader};
use banvic_pipeline::schedule::DailySchedule;
use banvic_pipeline::{ConnectionProvider, Pipeline, PipelineConfig, RunReport, Stage, UnitOutcome};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "banvic-pipeline")]
#[command(author, version, about = "BanVic daily extraction and warehouse load")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run both extractors and then the warehouse load
    Run {
        /// Capture date (YYYY-MM-DD), defaults to today in UTC
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Land every configured source table
    ExtractSql {
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },

    /// Land the transactions flat file
    ExtractCsv {
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },

    /// Load landing files into the warehouse
    Load {
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },

    /// Trigger a full run at every scheduled time until interrupted
    Schedule,

    /// Verify both database connections
    Check,

    /// Show which warehouse table each landing file would replace
    Artifacts {
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, CAPTURE_DATE_FORMAT)
        .map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    load_dotenv();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the CLI defaults
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("banvic-pipeline")
        .filter_directives("sqlx=warn")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let connections = ConnectionProvider::from_env();
    let today = || Utc::now().date_naive();

    // Each command resolves only the connections it uses
    match cli.command {
        Command::Run { date, json } => {
            let pipeline = Pipeline::from_config(&config, &connections)?;
            let report = pipeline.run(date.unwrap_or_else(today)).await;
            print_report(&report, json)?;
            if !report.succeeded() {
                bail!("Pipeline run for {} failed", report.capture_date);
            }
        },
        Command::ExtractSql { date } => {
            let extractor = SourceTableExtractor::from_config(&config, &connections)?;
            let report = extractor.run(date.unwrap_or_else(today)).await?;
            print_summary(Stage::PostgresExtract, &report.summary());
        },
        Command::ExtractCsv { date } => {
            let extractor = FlatFileExtractor::from_config(&config);
            let report = extractor.run(date.unwrap_or_else(today)).await?;
            print_summary(Stage::CsvExtract, &report.summary());
        },
        Command::Load { date } => {
            let loader = WarehouseLoader::from_config(&config, &connections)?;
            let report = loader.run(date.unwrap_or_else(today)).await?;
            print_summary(Stage::LoadWarehouse, &report.summary());
        },
        Command::Schedule => {
            let schedule = DailySchedule::parse(&config.schedule)?;
            let pipeline = Pipeline::from_config(&config, &connections)?;
            schedule.run_forever(&pipeline).await?;
        },
        Command::Check => {
            for conn_id in [&config.source_conn_id, &config.dw_conn_id] {
                let pool = connections.connect(conn_id).await?;
                health_check(&pool, conn_id).await?;
                println!("{}: ok", conn_id);
            }
        },
        Command::Artifacts { date } => {
            let landing = LandingZone::new(&config.landing_dir);
            let planned = load::plan(&landing, config.load_scope, date.unwrap_or_else(today))?;
            for artifact in &planned {
                println!(
                    "{}\t{}\t{}",
                    artifact.path.display(),
                    artifact.destination_table(),
                    if artifact.from_manifest { "manifest" } else { "file name" }
                );
            }
            info!(files = planned.len(), "Listed landing files");
        },
    }

    Ok(())
}

fn print_summary(stage: Stage, summary: &str) {
    println!("{}: {}", stage, summary);
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Run for {}", report.capture_date);
    for unit in &report.units {
        match &unit.outcome {
            UnitOutcome::Succeeded { attempts, summary } => {
                println!("  {:<17} ok      ({} attempt(s)) {}", unit.stage.as_str(), attempts, summary)
            },
            UnitOutcome::Failed { attempts, error } => {
                println!("  {:<17} failed  ({} attempt(s)) {}", unit.stage.as_str(), attempts, error)
            },
            UnitOutcome::UpstreamFailed => {
                println!("  {:<17} skipped (upstream failed)", unit.stage.as_str())
            },
        }
    }
    Ok(())
}
