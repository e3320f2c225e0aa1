//! CLI binary for anjuman-intake.
//!
//! A thin shim over the library crate: maps flags to `IntakeConfig`, runs
//! ingestion passes and exposes the results operations.

use anjuman_intake::orchestrator::{clean_orphaned_scratch, Disposition};
use anjuman_intake::pipeline::ocr::{process_batch, DocumentAiClient};
use anjuman_intake::results::{self, UploadOutcome};
use anjuman_intake::{
    Collaborators, IntakeConfig, Orchestrator, ProcessorIdentity, ProgressCallback,
    RunProgressCallback,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the pass, one log line per finished application. Lines may
/// arrive out of order when more than one worker runs.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<u64, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Discovering");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, app_id: u64) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&app_id))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} applications  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix("Ingesting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total} application(s) found"))
        ));
    }

    fn on_application_start(&self, app_id: u64, sources: &[PathBuf]) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(app_id, Instant::now());
        }
        let first = sources
            .first()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.bar.set_message(format!("{app_id} ← {first}"));
    }

    fn on_application_complete(&self, app_id: u64, draft_path: &Path) {
        let secs = self.elapsed_secs(app_id);
        let draft = draft_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.bar.println(format!(
            "  {} {app_id}  {}  {}",
            green("✓"),
            draft,
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_application_error(&self, app_id: Option<u64>, error: &str) {
        let label = app_id.map(|id| id.to_string()).unwrap_or_else(|| "----".into());
        let secs = app_id.map(|id| self.elapsed_secs(id)).unwrap_or(0.0);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {label}  {}  {}",
            red("✗"),
            red(&msg),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, attempted: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = attempted.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!("{} {} application(s) ingested", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {}/{} application(s) ingested  ({} failed, sources left in place)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                attempted,
                red(&failed.to_string()),
            );
        }
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # One ingestion pass over <base>/incoming with two workers
  intake --base-dir /srv/anjuman --workers 2 run

  # Drop a zip of scans into the ingestion directory
  intake --base-dir /srv/anjuman upload scans.zip

  # Inspect results
  intake --base-dir /srv/anjuman results list
  intake --base-dir /srv/anjuman results draft application_1001_Abdul_Karim.json

  # OCR a few PDFs without the rest of the pipeline
  intake ocr-batch a.pdf b.pdf

  # After a crash, remove scratch directories left behind
  intake --base-dir /srv/anjuman clean-scratch

ENVIRONMENT VARIABLES:
  INTAKE_BASE_DIR       Deployment root (incoming/, work/, results/, local_db.json)
  INTAKE_ACCESS_TOKEN   OAuth bearer token for the document service
  INTAKE_ENDPOINT       Override the document service REST endpoint
  PDFIUM_LIB_PATH       Path to libpdfium (file or directory)
  RUST_LOG              Log filter, overrides --verbose/--quiet
"#;

/// Ingest scanned registration forms into structured drafts.
#[derive(Parser, Debug)]
#[command(
    name = "intake",
    version,
    about = "Ingest scanned Anjuman registration forms into structured drafts",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Deployment root directory.
    #[arg(long, env = "INTAKE_BASE_DIR", default_value = ".", global = true)]
    base_dir: PathBuf,

    /// Applications processed concurrently.
    #[arg(short, long, env = "INTAKE_WORKERS", default_value_t = 1, global = true)]
    workers: usize,

    /// Document service project id.
    #[arg(long, env = "INTAKE_PROJECT_ID", default_value = anjuman_intake::config::DEFAULT_PROJECT_ID, global = true)]
    project_id: String,

    /// Document service region.
    #[arg(long, env = "INTAKE_LOCATION", default_value = anjuman_intake::config::DEFAULT_LOCATION, global = true)]
    location: String,

    /// Document service processor id.
    #[arg(long, env = "INTAKE_PROCESSOR_ID", default_value = anjuman_intake::config::DEFAULT_PROCESSOR_ID, global = true)]
    processor_id: String,

    /// REST endpoint override.
    #[arg(long, env = "INTAKE_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// OAuth bearer token for the document service.
    #[arg(long, env = "INTAKE_ACCESS_TOKEN", hide_env_values = true, global = true)]
    access_token: Option<String>,

    /// Per-document service timeout in seconds.
    #[arg(long, env = "INTAKE_TIMEOUT", default_value_t = 600, global = true)]
    timeout: u64,

    /// Pause between calls in batch OCR mode, in seconds.
    #[arg(long, env = "INTAKE_POLL_INTERVAL", default_value_t = 3, global = true)]
    poll_interval: u64,

    /// Page rasterisation zoom (0.5–8.0).
    #[arg(long, env = "INTAKE_RENDER_SCALE", default_value_t = 2.0, global = true)]
    render_scale: f32,

    /// Fields below this confidence are flagged for review.
    #[arg(long, env = "INTAKE_CONFIDENCE_THRESHOLD", default_value_t = 0.75, global = true)]
    confidence_threshold: f64,

    /// Output machine-readable JSON where a command prints results.
    #[arg(long, global = true)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "INTAKE_NO_PROGRESS", global = true)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INTAKE_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INTAKE_QUIET", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one ingestion pass over the ingestion directory.
    Run,
    /// Copy a scan (or extract a zip of scans) into the ingestion directory.
    Upload {
        file: PathBuf,
    },
    /// List or fetch drafts and reports.
    Results {
        #[command(subcommand)]
        action: ResultsAction,
    },
    /// Send PDFs to the document service only, writing raw responses.
    OcrBatch {
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,
    },
    /// Remove scratch directories left by an interrupted pass.
    CleanScratch,
}

#[derive(Subcommand, Debug)]
enum ResultsAction {
    /// List draft and report file names.
    List,
    /// Print a draft's JSON.
    Draft { name: String },
    /// Print the path of a report.
    Report { name: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are hidden while the bar is drawn.
    let show_progress = matches!(cli.command, Command::Run) && !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    match &cli.command {
        Command::Run => run(&cli, config).await,
        Command::Upload { file } => {
            match results::upload_file(&config.dirs, file).context("Upload failed")? {
                UploadOutcome::Stored(p) => println!("{}", p.display()),
                UploadOutcome::Extracted(files) => {
                    for p in files {
                        println!("{}", p.display());
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Results { action } => {
            results_command(&cli, &config, action)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::OcrBatch { pdfs } => {
            config.ensure_directories().context("Failed to create directories")?;
            let client = DocumentAiClient::from_config(&config)
                .context("Failed to build document service client")?;
            let outcome = process_batch(
                &client,
                pdfs,
                &config.dirs.ocr_raw_dir,
                Duration::from_secs(config.poll_interval_secs),
            )
            .await;
            for (pdf, raw) in &outcome.completed {
                println!("{}  →  {}", pdf.display(), raw.display());
            }
            for (pdf, reason) in &outcome.failed {
                eprintln!("{} {}: {}", red("✗"), pdf.display(), reason);
            }
            Ok(if outcome.failed.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::CleanScratch => {
            let removed = clean_orphaned_scratch(&config.dirs.work_dir)
                .context("Failed to clean scratch directories")?;
            if !cli.quiet {
                eprintln!("Removed {} scratch director(ies)", removed.len());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(cli: &Cli, config: IntakeConfig) -> Result<ExitCode> {
    let collaborators =
        Collaborators::production(&config).context("Failed to initialise collaborators")?;
    let orchestrator =
        Orchestrator::new(config, collaborators).context("Failed to open deployment")?;
    let summary = orchestrator.run_once().await.context("Ingestion pass failed")?;

    if cli.json {
        let rows: Vec<serde_json::Value> = summary
            .outcomes
            .iter()
            .map(|o| match &o.disposition {
                Disposition::Archived { draft, report, provenance } => serde_json::json!({
                    "app_id": o.app_id,
                    "sources": o.sources,
                    "status": "archived",
                    "draft": draft,
                    "report": report,
                    "provenance": provenance,
                }),
                Disposition::Failed { stage, reason } => serde_json::json!({
                    "app_id": o.app_id,
                    "sources": o.sources,
                    "status": "failed",
                    "stage": stage.to_string(),
                    "reason": reason.to_string(),
                }),
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "attempted": summary.attempted,
                "succeeded": summary.succeeded,
                "applications": rows,
            }))
            .context("Failed to serialise summary")?
        );
    } else if !cli.quiet && cli.no_progress {
        eprintln!("{} succeeded of {}", summary.succeeded, summary.attempted);
        for o in summary.failures() {
            if let Disposition::Failed { stage, reason } = &o.disposition {
                eprintln!("  {:?} {:?} at {stage}: {reason}", o.app_id, o.sources);
            }
        }
    }

    Ok(if summary.succeeded == summary.attempted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn results_command(cli: &Cli, config: &IntakeConfig, action: &ResultsAction) -> Result<()> {
    match action {
        ResultsAction::List => {
            let listing = results::list_results(&config.dirs).context("Failed to list results")?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&listing).context("Failed to serialise listing")?
                );
            } else {
                println!("{}", bold("Drafts"));
                for name in &listing.drafts {
                    println!("  {name}");
                }
                println!("{}", bold("Reports"));
                for name in &listing.reports {
                    println!("  {name}");
                }
            }
        }
        ResultsAction::Draft { name } => {
            let draft = results::fetch_draft(&config.dirs, name)
                .with_context(|| format!("Failed to fetch draft {name}"))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&draft).context("Failed to serialise draft")?
            );
        }
        ResultsAction::Report { name } => {
            let path = results::report_path(&config.dirs, name)
                .with_context(|| format!("Failed to fetch report {name}"))?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

/// Map CLI args to `IntakeConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<IntakeConfig> {
    let mut builder = IntakeConfig::builder()
        .base_dir(&cli.base_dir)
        .workers(cli.workers)
        .processor(ProcessorIdentity {
            project_id: cli.project_id.clone(),
            location: cli.location.clone(),
            processor_id: cli.processor_id.clone(),
        })
        .timeout_secs(cli.timeout)
        .poll_interval_secs(cli.poll_interval)
        .render_scale(cli.render_scale)
        .confidence_threshold(cli.confidence_threshold);

    if let Some(ref endpoint) = cli.endpoint {
        builder = builder.endpoint(endpoint);
    }
    if let Some(ref token) = cli.access_token {
        builder = builder.access_token(token);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
