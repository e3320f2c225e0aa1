//! The ingestion pass: discover → group → run every application through the
//! pipeline on a bounded worker pool → summarise.
//!
//! ## Per-application state machine
//!
//! ```text
//! Discovered → Preprocessed → Assembled → OcrCompleted → Mapped
//!            → Persisted → Reported → Archived
//!        ╰──────────── Failed { stage, reason } ────────────╯
//! ```
//!
//! Each application runs in its own Tokio task, so a panic anywhere in its
//! pipeline is contained to that application. Blocking stages (store I/O,
//! rasterisation, enhancement, assembly, report rendering) run on the
//! blocking pool; the OCR call is awaited. Only the [`Store`] is shared;
//! everything else is partitioned by app id (`<work_dir>/app_<id>`,
//! `app_<id>.pdf`, `application_<id>_*`).
//!
//! A failed application leaves its sources in the ingestion directory and
//! its scratch directory removed; the next pass rediscovers it.

use crate::config::IntakeConfig;
use crate::error::{ApplicationError, IntakeError};
use crate::mapper::{FieldMapper, Provenance};
use crate::pipeline::discover::{discover, ApplicationGroup, GroupingPolicy, SingleFilePolicy};
use crate::pipeline::enhance::ScanEnhancer;
use crate::pipeline::ocr::{self, DocumentAiClient, DocumentService};
use crate::pipeline::render::PdfiumEngine;
use crate::pipeline::{assemble, preprocess, report, ImageEnhancer, PageRasterizer, PdfAssembler, ReportRenderer};
use crate::progress::ProgressCallback;
use crate::schema::{report_file_name, ApplicationRecord, RecordMetadata, RecordStatus};
use crate::store::Store;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

// ── Outcome types ────────────────────────────────────────────────────────

/// Pipeline stages, named by the state reached when the stage succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Discovered,
    Preprocessed,
    Assembled,
    OcrCompleted,
    Mapped,
    Persisted,
    Reported,
    Archived,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Discovered => "discovered",
            Stage::Preprocessed => "preprocessed",
            Stage::Assembled => "assembled",
            Stage::OcrCompleted => "ocr-completed",
            Stage::Mapped => "mapped",
            Stage::Persisted => "persisted",
            Stage::Reported => "reported",
            Stage::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// Terminal state of one application.
#[derive(Debug, Clone)]
pub enum Disposition {
    /// Record stored, draft and report written, sources archived.
    Archived {
        draft: PathBuf,
        report: PathBuf,
        provenance: Provenance,
    },
    /// `stage` is the state the application failed to reach.
    Failed {
        stage: Stage,
        reason: ApplicationError,
    },
}

/// What happened to one application group.
#[derive(Debug, Clone)]
pub struct ApplicationOutcome {
    /// `None` when the pipeline failed before an id was allocated.
    pub app_id: Option<u64>,
    pub sources: Vec<PathBuf>,
    pub disposition: Disposition,
    pub duration_ms: u64,
}

impl ApplicationOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.disposition, Disposition::Archived { .. })
    }
}

/// Aggregate result of one ingestion pass.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    /// One entry per application, in completion order.
    pub outcomes: Vec<ApplicationOutcome>,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &ApplicationOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

// ── Collaborators ────────────────────────────────────────────────────────

/// The external engines one pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub grouping: Arc<dyn GroupingPolicy>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub enhancer: Arc<dyn ImageEnhancer>,
    pub assembler: Arc<dyn PdfAssembler>,
    pub document_service: Arc<dyn DocumentService>,
    pub report_renderer: Arc<dyn ReportRenderer>,
}

impl Collaborators {
    /// pdfium for PDF work, `ScanEnhancer` for images, the REST client for OCR.
    pub fn production(config: &IntakeConfig) -> Result<Self, IntakeError> {
        let engine = Arc::new(PdfiumEngine::new(config.render_scale));
        engine.check_binding()?;
        Ok(Self {
            grouping: Arc::new(SingleFilePolicy),
            rasterizer: engine.clone(),
            enhancer: Arc::new(ScanEnhancer::default()),
            assembler: engine.clone(),
            document_service: Arc::new(DocumentAiClient::from_config(config)?),
            report_renderer: engine,
        })
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

struct Context {
    config: IntakeConfig,
    store: Arc<Store>,
    mapper: FieldMapper,
    collab: Collaborators,
}

impl Context {
    fn progress(&self) -> Option<&ProgressCallback> {
        self.config.progress_callback.as_ref()
    }
}

/// Drives ingestion passes over one deployment.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<Context>,
}

impl Orchestrator {
    /// Create the directory layout, open the store and compile the mapper.
    pub fn new(config: IntakeConfig, collaborators: Collaborators) -> Result<Self, IntakeError> {
        config.ensure_directories()?;
        let store = Arc::new(Store::open(&config.dirs.store_path)?);
        let mapper = FieldMapper::from_config(&config)?;
        Ok(Self {
            ctx: Arc::new(Context {
                config,
                store,
                mapper,
                collab: collaborators,
            }),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.ctx.store
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.ctx.config
    }

    /// Run one ingestion pass over everything currently in the ingestion
    /// directory.
    ///
    /// Returns `Err` only when the pass cannot start (unreadable ingestion
    /// directory). Per-application failures are reported in the summary.
    pub async fn run_once(&self) -> Result<RunSummary, IntakeError> {
        let files = discover(&self.ctx.config.dirs.incoming_dir)?;
        let groups = self.ctx.collab.grouping.group(files);
        let attempted = groups.len();
        info!(
            "Starting ingestion pass: {} application(s), {} worker(s)",
            attempted, self.ctx.config.workers
        );
        if let Some(cb) = self.ctx.progress() {
            cb.on_run_start(attempted);
        }

        let outcomes: Vec<ApplicationOutcome> = stream::iter(groups.into_iter().map(|group| {
            let ctx = Arc::clone(&self.ctx);
            async move { run_isolated(ctx, group).await }
        }))
        .buffer_unordered(self.ctx.config.workers)
        .collect()
        .await;

        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        info!("Ingestion pass finished: {succeeded} succeeded of {attempted}");
        if let Some(cb) = self.ctx.progress() {
            cb.on_run_complete(attempted, succeeded);
        }
        Ok(RunSummary {
            attempted,
            succeeded,
            outcomes,
        })
    }
}

/// Where a pipeline task got to, readable after the task has died.
#[derive(Debug)]
struct TaskTrace {
    app_id: AtomicU64,
    stage: Mutex<Stage>,
}

impl TaskTrace {
    fn new() -> Self {
        Self {
            app_id: AtomicU64::new(0),
            stage: Mutex::new(Stage::Preprocessed),
        }
    }

    fn enter(&self, stage: Stage) {
        if let Ok(mut s) = self.stage.lock() {
            *s = stage;
        }
    }

    fn app_id(&self) -> Option<u64> {
        match self.app_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    fn stage(&self) -> Stage {
        self.stage.lock().map(|s| *s).unwrap_or(Stage::Preprocessed)
    }
}

/// Run one application in its own task so a panic stays contained.
async fn run_isolated(ctx: Arc<Context>, group: ApplicationGroup) -> ApplicationOutcome {
    let sources = group.sources.clone();
    let trace = Arc::new(TaskTrace::new());
    let start = Instant::now();

    let task = tokio::spawn(process_application(
        Arc::clone(&ctx),
        group,
        Arc::clone(&trace),
    ));
    match task.await {
        Ok(outcome) => outcome,
        Err(join_err) => {
            let app_id = trace.app_id();
            let reason = ApplicationError::Panicked {
                detail: join_err.to_string(),
            };
            error!(?app_id, "Pipeline for {:?} aborted: {reason}", sources);
            if let Some(id) = app_id {
                remove_scratch(&ctx.config.dirs.scratch_dir(id));
            }
            if let Some(cb) = ctx.progress() {
                cb.on_application_error(app_id, &reason.to_string());
            }
            ApplicationOutcome {
                app_id,
                sources,
                disposition: Disposition::Failed {
                    stage: trace.stage(),
                    reason,
                },
                duration_ms: start.elapsed().as_millis() as u64,
            }
        }
    }
}

/// Drive one application group to `Archived` or `Failed`.
async fn process_application(
    ctx: Arc<Context>,
    group: ApplicationGroup,
    trace: Arc<TaskTrace>,
) -> ApplicationOutcome {
    let start = Instant::now();
    let sources = group.sources.clone();
    let outcome = |app_id, disposition| ApplicationOutcome {
        app_id,
        sources: sources.clone(),
        disposition,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    // ── Id allocation ────────────────────────────────────────────────────
    let store = Arc::clone(&ctx.store);
    let app_id = match blocking(move || store.allocate_id().map_err(ApplicationError::from)).await {
        Ok(id) => id,
        Err(reason) => {
            error!("Id allocation failed for {}: {reason}", group.label());
            if let Some(cb) = ctx.progress() {
                cb.on_application_error(None, &reason.to_string());
            }
            return outcome(
                None,
                Disposition::Failed {
                    stage: Stage::Preprocessed,
                    reason,
                },
            );
        }
    };
    trace.app_id.store(app_id, Ordering::SeqCst);
    info!(app_id, "Processing {} source(s) from {}", sources.len(), group.label());
    if let Some(cb) = ctx.progress() {
        cb.on_application_start(app_id, &sources);
    }

    let scratch = ctx.config.dirs.scratch_dir(app_id);
    let result = run_stages(&ctx, &trace, app_id, &sources, &scratch).await;
    remove_scratch(&scratch);

    match result {
        Ok(done) => {
            info!(
                app_id,
                "Completed → JSON {} | Report {}",
                done.draft.display(),
                done.report.display()
            );
            if let Some(cb) = ctx.progress() {
                cb.on_application_complete(app_id, &done.draft);
            }
            outcome(
                Some(app_id),
                Disposition::Archived {
                    draft: done.draft,
                    report: done.report,
                    provenance: done.provenance,
                },
            )
        }
        Err((stage, reason)) => {
            error!(app_id, %stage, "Application failed: {reason}");
            if let Some(cb) = ctx.progress() {
                cb.on_application_error(Some(app_id), &reason.to_string());
            }
            outcome(Some(app_id), Disposition::Failed { stage, reason })
        }
    }
}

struct Completed {
    draft: PathBuf,
    report: PathBuf,
    provenance: Provenance,
}

type StageResult<T> = Result<T, (Stage, ApplicationError)>;

fn at(stage: Stage) -> impl FnOnce(ApplicationError) -> (Stage, ApplicationError) {
    move |e| (stage, e)
}

async fn run_stages(
    ctx: &Arc<Context>,
    trace: &TaskTrace,
    app_id: u64,
    sources: &[PathBuf],
    scratch: &Path,
) -> StageResult<Completed> {
    let dirs = &ctx.config.dirs;
    let started = Utc::now();

    // ── Preprocess ───────────────────────────────────────────────────────
    trace.enter(Stage::Preprocessed);
    let pages = {
        let (rasterizer, enhancer) = (
            Arc::clone(&ctx.collab.rasterizer),
            Arc::clone(&ctx.collab.enhancer),
        );
        let (sources, scratch) = (sources.to_vec(), scratch.to_path_buf());
        let processed = blocking(move || {
            std::fs::create_dir_all(&scratch).map_err(|e| ApplicationError::io(&scratch, e))?;
            preprocess::preprocess_group(rasterizer.as_ref(), enhancer.as_ref(), &sources, &scratch)
        })
        .await
        .map_err(at(Stage::Preprocessed))?;
        if !processed.skipped.is_empty() {
            warn!(app_id, "{} page(s) or source(s) skipped", processed.skipped.len());
        }
        if processed.pages.is_empty() {
            return Err((Stage::Preprocessed, ApplicationError::NoPages { app_id }));
        }
        processed.pages
    };
    debug!(app_id, "{} page(s) preprocessed", pages.len());

    // ── Assemble ─────────────────────────────────────────────────────────
    trace.enter(Stage::Assembled);
    let pdf_path = {
        let assembler = Arc::clone(&ctx.collab.assembler);
        let (inputs, pdfs_dir) = (pages.clone(), dirs.pdfs_dir.clone());
        blocking(move || assemble::assemble_application(assembler.as_ref(), &inputs, &pdfs_dir, app_id))
            .await
            .map_err(at(Stage::Assembled))?
    };

    // ── OCR ──────────────────────────────────────────────────────────────
    trace.enter(Stage::OcrCompleted);
    let raw_path = ocr::invoke(ctx.collab.document_service.as_ref(), &pdf_path, &dirs.ocr_raw_dir)
        .await
        .map_err(at(Stage::OcrCompleted))?;
    let document = ocr::load_document(&raw_path)
        .await
        .map_err(at(Stage::OcrCompleted))?;

    // ── Map ──────────────────────────────────────────────────────────────
    trace.enter(Stage::Mapped);
    let (form, provenance) = ctx.mapper.map(&document);
    if !provenance.low_confidence_fields.is_empty() {
        info!(
            app_id,
            "Fields flagged for review: {}",
            provenance.low_confidence_fields.join(", ")
        );
    }
    let record = ApplicationRecord {
        app_id,
        form,
        metadata: RecordMetadata {
            app_id,
            source_pdf: pdf_path,
            status: RecordStatus::Draft,
            processing_started: started,
            processing_completed: Utc::now(),
        },
    };

    // ── Persist: draft, then store ───────────────────────────────────────
    trace.enter(Stage::Persisted);
    let draft = {
        let store = Arc::clone(&ctx.store);
        let drafts_dir = dirs.drafts_dir.clone();
        let record = record.clone();
        blocking(move || {
            let draft = write_draft(&drafts_dir, &record)?;
            if let Err(e) = store.insert(record) {
                // Drafts exist only for stored records.
                if let Err(rm) = std::fs::remove_file(&draft) {
                    warn!("Could not remove draft {}: {rm}", draft.display());
                }
                return Err(e.into());
            }
            Ok(draft)
        })
        .await
        .map_err(at(Stage::Persisted))?
    };

    // ── Report ───────────────────────────────────────────────────────────
    trace.enter(Stage::Reported);
    let report = {
        let renderer = Arc::clone(&ctx.collab.report_renderer);
        let output = dirs.reports_dir.join(report_file_name(app_id));
        blocking(move || report::generate_report(renderer.as_ref(), &record, &pages, &output))
            .await
            .map_err(at(Stage::Reported))?
    };

    // ── Archive ──────────────────────────────────────────────────────────
    trace.enter(Stage::Archived);
    {
        let (sources, archive_dir) = (sources.to_vec(), dirs.archive_dir.clone());
        blocking(move || archive_sources(&sources, &archive_dir).map(|_| ()))
            .await
            .map_err(at(Stage::Archived))?;
    }

    Ok(Completed {
        draft,
        report,
        provenance,
    })
}

/// Run a blocking stage on the blocking pool; a panic becomes an error.
async fn blocking<T, F>(f: F) -> Result<T, ApplicationError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApplicationError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApplicationError::Panicked {
            detail: e.to_string(),
        })?
}

// ── Filesystem helpers ───────────────────────────────────────────────────

/// Write the draft JSON atomically (temp file + fsync + rename).
fn write_draft(drafts_dir: &Path, record: &ApplicationRecord) -> Result<PathBuf, ApplicationError> {
    let path = drafts_dir.join(record.draft_file_name());
    let body = serde_json::to_vec_pretty(record).map_err(|e| ApplicationError::Io {
        path: path.clone(),
        detail: e.to_string(),
    })?;
    std::fs::create_dir_all(drafts_dir).map_err(|e| ApplicationError::io(drafts_dir, e))?;
    let mut tmp =
        tempfile::NamedTempFile::new_in(drafts_dir).map_err(|e| ApplicationError::io(drafts_dir, e))?;
    tmp.write_all(&body)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ApplicationError::io(&path, e))?;
    tmp.persist(&path)
        .map_err(|e| ApplicationError::io(&path, e.error))?;
    debug!("Draft written: {}", path.display());
    Ok(path)
}

/// Move `sources` into `archive_dir`, returning their new paths.
pub fn archive_sources(sources: &[PathBuf], archive_dir: &Path) -> Result<Vec<PathBuf>, ApplicationError> {
    std::fs::create_dir_all(archive_dir).map_err(|e| ApplicationError::io(archive_dir, e))?;
    sources
        .iter()
        .map(|src| {
            let name = src.file_name().ok_or_else(|| ApplicationError::Archive {
                path: src.clone(),
                detail: "source has no file name".into(),
            })?;
            let dest = archive_dir.join(name);
            move_file(src, &dest).map_err(|e| ApplicationError::Archive {
                path: src.clone(),
                detail: e.to_string(),
            })?;
            Ok(dest)
        })
        .collect()
}

/// Rename, falling back to copy + delete (e.g. across filesystems).
fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dest)?;
    std::fs::remove_file(src)
}

fn remove_scratch(scratch: &Path) {
    match std::fs::remove_dir_all(scratch) {
        Ok(()) => debug!("Removed scratch {}", scratch.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove scratch {}: {e}", scratch.display()),
    }
}

/// Remove leftover `app_<id>` scratch directories under `work_dir`.
///
/// Only call this while no ingestion pass is running.
pub fn clean_orphaned_scratch(work_dir: &Path) -> Result<Vec<PathBuf>, IntakeError> {
    let entries = std::fs::read_dir(work_dir).map_err(|e| IntakeError::Directory {
        path: work_dir.to_path_buf(),
        source: e,
    })?;
    let mut removed = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_scratch = path.is_dir()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("app_"))
                .map(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false);
        if is_scratch {
            std::fs::remove_dir_all(&path).map_err(|e| IntakeError::Io {
                path: path.clone(),
                source: e,
            })?;
            info!("Removed orphaned scratch {}", path.display());
            removed.push(path);
        }
    }
    removed.sort();
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Discovered < Stage::Preprocessed);
        assert!(Stage::Reported < Stage::Archived);
        assert_eq!(Stage::OcrCompleted.to_string(), "ocr-completed");
    }

    #[test]
    fn archive_moves_sources() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("scan_a.pdf");
        std::fs::write(&src, b"%PDF").unwrap();
        let archive = dir.path().join("archive");

        let moved = archive_sources(&[src.clone()], &archive).unwrap();
        assert_eq!(moved, vec![archive.join("scan_a.pdf")]);
        assert!(!src.exists());
        assert!(moved[0].exists());
    }

    #[test]
    fn archive_of_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let err = archive_sources(&[dir.path().join("gone.pdf")], &dir.path().join("a")).unwrap_err();
        assert!(matches!(err, ApplicationError::Archive { .. }));
    }

    #[test]
    fn orphaned_scratch_cleanup_only_touches_app_dirs() {
        let dir = TempDir::new().unwrap();
        for d in ["app_1001", "app_1002", "pdfs", "archive", "app_x"] {
            std::fs::create_dir(dir.path().join(d)).unwrap();
        }
        std::fs::write(dir.path().join("app_1003"), b"file").unwrap();

        let removed = clean_orphaned_scratch(dir.path()).unwrap();
        assert_eq!(
            removed,
            vec![dir.path().join("app_1001"), dir.path().join("app_1002")]
        );
        assert!(dir.path().join("pdfs").exists());
        assert!(dir.path().join("app_x").exists());
        assert!(dir.path().join("app_1003").exists());
    }

    #[test]
    fn draft_written_atomically_with_expected_name() {
        let dir = TempDir::new().unwrap();
        let (form, _) = FieldMapper::default().map(&crate::schema::OcrDocument {
            text: "Name: Abdul Karim\n".into(),
            entities: vec![],
        });
        let record = ApplicationRecord {
            app_id: 1001,
            form,
            metadata: RecordMetadata {
                app_id: 1001,
                source_pdf: PathBuf::from("app_1001.pdf"),
                status: RecordStatus::Draft,
                processing_started: Utc::now(),
                processing_completed: Utc::now(),
            },
        };
        let path = write_draft(dir.path(), &record).unwrap();
        assert_eq!(path, dir.path().join("application_1001_Abdul_Karim.json"));
        let back: ApplicationRecord =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back.app_id, 1001);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
