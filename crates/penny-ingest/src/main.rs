//! Penny Ingest - staging warmer and list consolidation

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use penny_common::logging::{init_logging, LogConfig, LogLevel};
use penny_ingest::config::HarvestConfig;
use penny_ingest::consolidate::{ConsolidationCounts, ConsolidationInputs, Consolidator};
use penny_ingest::export::{write_rows_to_path, ExportAudience, ExportRow};
use penny_ingest::fetch::PartitionFetcher;
use penny_ingest::identity::{IdentityConfig, MergePolicy};
use penny_ingest::purchase_history::PurchaseHistoryImporter;
use penny_ingest::reconcile::MergeRules;
use penny_ingest::storage::{InMemoryStagingStore, PgStagingStore, StagingStore};
use penny_ingest::warmer::StagingWarmer;
use penny_ingest::{RunCounts, RunSummary};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "penny-ingest")]
#[command(author, version, about = "Penny list staging and consolidation tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch upstream listings and write new items to staging
    Warm {
        /// Fetch and normalize without touching the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Merge the current list with contributor exports and the verified backup
    Consolidate {
        /// Current list export
        #[arg(long)]
        current: PathBuf,

        /// Additional contributor exports, merged in order
        #[arg(long = "export")]
        exports: Vec<PathBuf>,

        /// Verified backup JSON
        #[arg(long)]
        verified: Option<PathBuf>,

        /// Backend output CSV
        #[arg(long)]
        out: PathBuf,

        /// Public feed CSV (no internet SKU column)
        #[arg(long)]
        public_out: Option<PathBuf>,

        /// Plain-text audit report
        #[arg(long)]
        audit: Option<PathBuf>,

        /// Identity policy: sku or contributor
        #[arg(long, default_value = "contributor")]
        policy: MergePolicy,

        /// Let a later purchase date replace an earlier one
        #[arg(long)]
        latest_purchase_date: bool,

        /// Report what would be written without writing outputs
        #[arg(long)]
        dry_run: bool,
    },

    /// Convert purchase-history exports into sheet rows
    ImportPurchases {
        /// Output CSV
        #[arg(long)]
        out: PathBuf,

        /// Use this state code for every file instead of inferring it
        #[arg(long)]
        force_state: Option<String>,

        /// Purchase-history CSV files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Default, Serialize)]
struct ImportCounts {
    files: usize,
    read: usize,
    skipped: usize,
    deduplicated: usize,
    written: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("penny-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        },
    };

    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        },
    }
}

/// Run one command. `Ok(false)` means the command printed a failed summary.
async fn run(command: Command) -> Result<bool> {
    match command {
        Command::Warm { dry_run } => warm(dry_run).await,
        Command::Consolidate {
            current,
            exports,
            verified,
            out,
            public_out,
            audit,
            policy,
            latest_purchase_date,
            dry_run,
        } => {
            let mut rules = MergeRules::default();
            if latest_purchase_date {
                rules = rules.with_latest_purchase_date();
            }
            let outputs = Outputs {
                out,
                public_out,
                audit,
                dry_run,
            };
            consolidate(current, exports, verified, policy, rules, outputs)
        },
        Command::ImportPurchases {
            out,
            force_state,
            files,
        } => import_purchases(out, force_state, files),
    }
}

async fn warm(dry_run: bool) -> Result<bool> {
    let summary = match prepare_warmer(dry_run).await {
        Ok(warmer) => warmer.run().await,
        Err(e) => {
            error!(stage = %e.stage(), error = %e, "Staging warmer setup failed");
            RunSummary::from_error(&e, RunCounts::default())
        },
    };
    print_summary(&summary)
}

async fn prepare_warmer(dry_run: bool) -> penny_ingest::Result<StagingWarmer> {
    let config = HarvestConfig::from_env(!dry_run)?;
    let fetcher = PartitionFetcher::new(config.fetch.clone(), &config.credentials)?;

    let store: Arc<dyn StagingStore> = if dry_run {
        info!("Dry run: staging rows are kept in memory");
        Arc::new(InMemoryStagingStore::new())
    } else {
        Arc::new(PgStagingStore::connect(&config.store).await?)
    };

    Ok(StagingWarmer::new(fetcher, store, config.store))
}

struct Outputs {
    out: PathBuf,
    public_out: Option<PathBuf>,
    audit: Option<PathBuf>,
    dry_run: bool,
}

fn consolidate(
    current: PathBuf,
    exports: Vec<PathBuf>,
    verified: Option<PathBuf>,
    policy: MergePolicy,
    rules: MergeRules,
    outputs: Outputs,
) -> Result<bool> {
    let inputs = match ConsolidationInputs::load(&current, &exports, verified.as_deref()) {
        Ok(inputs) => inputs,
        Err(e) => {
            error!(stage = %e.stage(), error = %e, "Failed to load consolidation inputs");
            return print_summary(&RunSummary::from_error(&e, ConsolidationCounts::default()));
        },
    };

    let identity = IdentityConfig::default();
    let consolidation = Consolidator::new(&identity, policy)
        .with_rules(rules)
        .consolidate(inputs);

    if let Some(path) = &outputs.audit {
        let report = consolidation.audit_report(Utc::now());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, report)
            .with_context(|| format!("Failed to write audit report {}", path.display()))?;
        info!(path = %path.display(), "Wrote audit report");
    }

    match consolidation.rows() {
        Some(rows) if outputs.dry_run => {
            info!(rows = rows.len(), "Dry run: outputs not written");
        },
        Some(rows) => {
            write_output(&outputs.out, rows, ExportAudience::Backend)?;
            if let Some(path) = &outputs.public_out {
                write_output(path, rows, ExportAudience::PublicFeed)?;
            }
        },
        None => {
            warn!("Validation failed; no output written");
        },
    }

    print_summary(&consolidation.summary())
}

fn import_purchases(out: PathBuf, force_state: Option<String>, files: Vec<PathBuf>) -> Result<bool> {
    let mut importer = PurchaseHistoryImporter::new().context("Failed to build importer")?;
    if let Some(state) = force_state {
        importer = importer.with_forced_state(state);
    }

    let mut counts = ImportCounts::default();
    let mut rows: Vec<ExportRow> = Vec::new();
    for path in &files {
        let file = match importer.import_path(path) {
            Ok(file) => file,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to import purchase history");
                return print_summary(&RunSummary::from_error(&e, counts));
            },
        };
        counts.files += 1;
        counts.read += file.read;
        counts.skipped += file.skipped;
        counts.deduplicated += file.deduplicated;
        rows.extend(file.rows.iter().map(ExportRow::from));
    }

    write_output(&out, &rows, ExportAudience::Backend)?;
    counts.written = rows.len();
    print_summary(&RunSummary::success(counts))
}

fn write_output(path: &Path, rows: &[ExportRow], audience: ExportAudience) -> Result<()> {
    write_rows_to_path(path, rows, audience).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), rows = rows.len(), "Wrote output");
    Ok(())
}

fn print_summary<C: Serialize>(summary: &RunSummary<C>) -> Result<bool> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
    println!("{}", json);
    Ok(summary.ok)
}
