//! Ingestion passes over a temporary deployment with in-process collaborators.
//!
//! The fakes keep each scan's text flowing through every stage: a source
//! file's body is copied onto each of its "pages", pages are concatenated by
//! the assembler, and the document service answers based on what it reads.
//! No pdfium library or network access is needed.

use anjuman_intake::error::{ApplicationError, PageError};
use anjuman_intake::pipeline::discover::SingleFilePolicy;
use anjuman_intake::pipeline::ocr::DocumentService;
use anjuman_intake::pipeline::report::{DrawOp, ReportLayout};
use anjuman_intake::pipeline::{ImageEnhancer, PageRasterizer, PdfAssembler, ReportRenderer};
use anjuman_intake::{
    Collaborators, Disposition, IntakeConfig, IntakeConfigBuilder, Orchestrator,
    ProgressCallback, RunProgressCallback, Stage,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// `pages=N` in the source sets the page count; `corrupt=K` marks page K.
struct TextRasterizer;

impl PageRasterizer for TextRasterizer {
    fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, PageError> {
        let body = std::fs::read_to_string(pdf).map_err(|e| PageError::RasterFailed {
            source_file: pdf.to_path_buf(),
            detail: e.to_string(),
        })?;
        if !body.starts_with("%PDF") {
            return Err(PageError::RasterFailed {
                source_file: pdf.to_path_buf(),
                detail: "not a PDF".into(),
            });
        }
        let pages = directive(&body, "pages").unwrap_or(1);
        let corrupt = directive(&body, "corrupt");
        (1..=pages)
            .map(|n| {
                let out = out_dir.join(format!("page_{n:02}.jpg"));
                let content = if Some(n) == corrupt {
                    "CORRUPT".to_string()
                } else {
                    body.clone()
                };
                std::fs::write(&out, content).map_err(|e| PageError::RasterFailed {
                    source_file: pdf.to_path_buf(),
                    detail: e.to_string(),
                })?;
                Ok(out)
            })
            .collect()
    }
}

fn directive(body: &str, key: &str) -> Option<usize> {
    body.split_whitespace()
        .find_map(|tok| tok.strip_prefix(&format!("{key}=")))
        .and_then(|v| v.parse().ok())
}

struct CopyEnhancer;

impl ImageEnhancer for CopyEnhancer {
    fn enhance(&self, input: &Path, output: &Path) -> Result<(), PageError> {
        let body = std::fs::read_to_string(input).unwrap_or_default();
        if body == "CORRUPT" {
            return Err(PageError::EnhanceFailed {
                page: input.to_path_buf(),
                detail: "cannot decode".into(),
            });
        }
        std::fs::write(output, body).map_err(|e| PageError::EnhanceFailed {
            page: input.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

/// Concatenates its inputs and remembers how many it was given per output.
#[derive(Default)]
struct ConcatAssembler {
    page_counts: Mutex<Vec<(PathBuf, usize)>>,
}

impl PdfAssembler for ConcatAssembler {
    fn assemble(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ApplicationError> {
        let mut merged = String::new();
        for input in inputs {
            merged.push_str(&std::fs::read_to_string(input).unwrap_or_default());
            merged.push('\n');
        }
        std::fs::write(output, merged).map_err(|e| ApplicationError::Assembly {
            detail: e.to_string(),
        })?;
        self.page_counts
            .lock()
            .unwrap()
            .push((output.to_path_buf(), inputs.len()));
        Ok(())
    }
}

/// Answers with the `name=` of the scan; `ocr=fail` and `ocr=panic` misbehave,
/// `store=down` starts a store outage.
struct ScriptedService {
    calls: AtomicUsize,
    outage: Option<Arc<StoreOutage>>,
}

impl ScriptedService {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outage: None,
        })
    }

    fn with_outage(outage: Arc<StoreOutage>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outage: Some(outage),
        })
    }
}

#[async_trait]
impl DocumentService for ScriptedService {
    async fn process_document(
        &self,
        content: &[u8],
        _mime_type: &str,
    ) -> Result<String, ApplicationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = String::from_utf8_lossy(content);
        if text.contains("ocr=panic") {
            panic!("service crashed");
        }
        if text.contains("ocr=fail") {
            return Err(ApplicationError::Ocr {
                detail: "HTTP 503 Service Unavailable".into(),
            });
        }
        if let Some(outage) = self.outage.as_ref().filter(|_| text.contains("store=down")) {
            outage.begin();
        }
        let name = text
            .split_whitespace()
            .find_map(|tok| tok.strip_prefix("name="))
            .unwrap_or("")
            .replace('_', " ");
        Ok(serde_json::json!({
            "document": {
                "text": format!("Name: {name}\nAge: 42\nMobile Number: 9876543210\n"),
                "entities": [],
            }
        })
        .to_string())
    }
}

/// Refuses any report mentioning "Report Breaker".
struct StubReportRenderer;

impl ReportRenderer for StubReportRenderer {
    fn render(&self, report: &ReportLayout, output: &Path) -> Result<(), ApplicationError> {
        let breaks = report.pages.iter().flat_map(|p| &p.ops).any(|op| {
            matches!(op, DrawOp::Text { text, .. } if text.contains("Report Breaker"))
        });
        if breaks {
            return Err(ApplicationError::Report {
                detail: "font table exhausted".into(),
            });
        }
        std::fs::write(output, format!("%PDF report pages={}", report.pages.len())).map_err(|e| {
            ApplicationError::Report {
                detail: e.to_string(),
            }
        })
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<String>>,
}

impl RunProgressCallback for RecordingProgress {
    fn on_run_start(&self, total: usize) {
        self.events.lock().unwrap().push(format!("run:{total}"));
    }
    fn on_application_start(&self, app_id: u64, _sources: &[PathBuf]) {
        self.events.lock().unwrap().push(format!("start:{app_id}"));
    }
    fn on_application_complete(&self, app_id: u64, _draft: &Path) {
        self.events.lock().unwrap().push(format!("done:{app_id}"));
    }
    fn on_application_error(&self, app_id: Option<u64>, _error: &str) {
        self.events.lock().unwrap().push(format!("error:{app_id:?}"));
    }
    fn on_run_complete(&self, attempted: usize, succeeded: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("end:{succeeded}/{attempted}"));
    }
}

/// Swaps the store's directory for a plain file, so every store access
/// fails, until the affected application reports its failure.
struct StoreOutage {
    db_dir: PathBuf,
}

impl StoreOutage {
    fn parked(&self) -> PathBuf {
        self.db_dir.with_extension("parked")
    }

    fn begin(&self) {
        std::fs::rename(&self.db_dir, self.parked()).unwrap();
        std::fs::write(&self.db_dir, b"").unwrap();
    }

    fn end(&self) {
        if self.parked().exists() {
            std::fs::remove_file(&self.db_dir).unwrap();
            std::fs::rename(self.parked(), &self.db_dir).unwrap();
        }
    }
}

impl RunProgressCallback for StoreOutage {
    fn on_application_error(&self, _app_id: Option<u64>, _error: &str) {
        self.end();
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

/// `RUST_LOG=anjuman_intake=debug cargo test` shows the pipeline's logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Deployment {
    _base: TempDir,
    config: IntakeConfig,
    assembler: Arc<ConcatAssembler>,
    service: Arc<ScriptedService>,
}

impl Deployment {
    fn new(workers: usize) -> Self {
        Self::build(TempDir::new().unwrap(), workers, ScriptedService::new(), |b| b)
    }

    fn with_progress(workers: usize, progress: ProgressCallback) -> Self {
        Self::build(TempDir::new().unwrap(), workers, ScriptedService::new(), |b| {
            b.progress_callback(progress)
        })
    }

    fn build(
        base: TempDir,
        workers: usize,
        service: Arc<ScriptedService>,
        customise: impl FnOnce(IntakeConfigBuilder) -> IntakeConfigBuilder,
    ) -> Self {
        init_tracing();
        let builder = IntakeConfig::builder().base_dir(base.path()).workers(workers);
        let config = customise(builder).build().unwrap();
        config.ensure_directories().unwrap();
        Self {
            _base: base,
            config,
            assembler: Arc::new(ConcatAssembler::default()),
            service,
        }
    }

    fn drop_scan(&self, file_name: &str, body: &str) -> PathBuf {
        let path = self.config.dirs.incoming_dir.join(file_name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn orchestrator(&self) -> Orchestrator {
        let collaborators = Collaborators {
            grouping: Arc::new(SingleFilePolicy),
            rasterizer: Arc::new(TextRasterizer),
            enhancer: Arc::new(CopyEnhancer),
            assembler: self.assembler.clone(),
            document_service: self.service.clone(),
            report_renderer: Arc::new(StubReportRenderer),
        };
        Orchestrator::new(self.config.clone(), collaborators).unwrap()
    }

    fn files_in(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn scratch_dirs(&self) -> Vec<String> {
        self.files_in(&self.config.dirs.work_dir)
            .into_iter()
            .filter(|n| n.starts_with("app_") && !n.ends_with(".pdf"))
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn three_scans_two_workers_all_archived() {
    let d = Deployment::new(2);
    d.drop_scan("scan_a.pdf", "%PDF name=Abdul_Karim pages=2");
    d.drop_scan("scan_b.pdf", "%PDF name=Fatima_Begum pages=3");
    d.drop_scan("scan_c.pdf", "%PDF name=Yusuf_Khan pages=1");
    let orch = d.orchestrator();
    let before = orch.store().snapshot().unwrap();

    let summary = orch.run_once().await.unwrap();

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 3);
    assert!(summary.outcomes.iter().all(|o| o.succeeded()));

    let after = orch.store().snapshot().unwrap();
    assert_eq!(after.forms.len(), before.forms.len() + 3);
    assert_eq!(after.last_app_id, before.last_app_id + 3);

    let mut ids: Vec<u64> = summary.outcomes.iter().filter_map(|o| o.app_id).collect();
    ids.sort();
    assert_eq!(ids, vec![1001, 1002, 1003]);

    let dirs = &d.config.dirs;
    assert_eq!(d.files_in(&dirs.drafts_dir).len(), 3);
    assert_eq!(
        d.files_in(&dirs.reports_dir),
        vec![
            "application_1001_report.pdf",
            "application_1002_report.pdf",
            "application_1003_report.pdf"
        ]
    );
    assert!(d.files_in(&dirs.incoming_dir).is_empty());
    assert_eq!(
        d.files_in(&dirs.archive_dir),
        vec!["scan_a.pdf", "scan_b.pdf", "scan_c.pdf"]
    );
    assert_eq!(d.files_in(&dirs.ocr_raw_dir).len(), 3);
    assert!(d.scratch_dirs().is_empty());

    // Each draft is named after the head of family its scan carried.
    let drafts = d.files_in(&dirs.drafts_dir);
    for name in ["Abdul_Karim", "Fatima_Begum", "Yusuf_Khan"] {
        assert!(
            drafts.iter().any(|f| f.ends_with(&format!("_{name}.json"))),
            "no draft for {name}: {drafts:?}"
        );
    }

    // Every draft matches the record stored under the same id.
    for record in &after.forms {
        let draft: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dirs.drafts_dir.join(record.draft_file_name())).unwrap(),
        )
        .unwrap();
        assert_eq!(draft["app_id"], record.app_id);
        assert_eq!(draft["metadata"]["status"], "draft");
        assert_eq!(
            draft["AnjumanRegistrationForm"]["HeadOfFamily"]["name"]["value"],
            record.form.head_of_family.name.value.as_str()
        );
    }
}

#[tokio::test]
async fn corrupt_page_is_skipped_and_the_rest_assembled() {
    let d = Deployment::new(1);
    d.drop_scan("scan.pdf", "%PDF name=Abdul_Karim pages=5 corrupt=3");
    let summary = d.orchestrator().run_once().await.unwrap();

    assert_eq!(summary.succeeded, 1);
    let counts = d.assembler.page_counts.lock().unwrap().clone();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].1, 4);
    assert!(counts[0].0.ends_with("app_1001.pdf"));
}

#[tokio::test]
async fn ocr_failure_leaves_sources_and_removes_scratch() {
    let d = Deployment::new(2);
    let bad = d.drop_scan("scan_bad.pdf", "%PDF name=X ocr=fail pages=2");
    d.drop_scan("scan_ok.pdf", "%PDF name=Abdul_Karim pages=1");
    let orch = d.orchestrator();

    let summary = orch.run_once().await.unwrap();
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, 1);

    let failed: Vec<_> = summary.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].sources, vec![bad.clone()]);
    match &failed[0].disposition {
        Disposition::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::OcrCompleted);
            assert!(matches!(reason, ApplicationError::Ocr { .. }));
        }
        other => panic!("unexpected disposition {other:?}"),
    }

    assert!(bad.exists());
    assert!(d.scratch_dirs().is_empty());
    assert_eq!(orch.store().list_all().unwrap().len(), 1);
    // The failed application's id was consumed and is not handed out again.
    assert_eq!(orch.store().snapshot().unwrap().last_app_id, 1002);
}

#[tokio::test]
async fn failed_application_is_retried_on_the_next_pass() {
    let d = Deployment::new(1);
    let scan = d.drop_scan("scan.pdf", "%PDF name=Abdul_Karim ocr=fail");
    let orch = d.orchestrator();
    assert_eq!(orch.run_once().await.unwrap().succeeded, 0);

    std::fs::write(&scan, "%PDF name=Abdul_Karim").unwrap();
    let summary = orch.run_once().await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.outcomes[0].app_id, Some(1002));
    assert_eq!(d.service.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn panic_in_one_application_is_contained() {
    let d = Deployment::new(2);
    let crashing = d.drop_scan("scan_crash.pdf", "%PDF name=X ocr=panic");
    d.drop_scan("scan_ok_1.pdf", "%PDF name=Abdul_Karim");
    d.drop_scan("scan_ok_2.pdf", "%PDF name=Fatima_Begum");

    let summary = d.orchestrator().run_once().await.unwrap();
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 2);

    let failed: Vec<_> = summary.failures().collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].app_id.is_some());
    match &failed[0].disposition {
        Disposition::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::OcrCompleted);
            assert!(matches!(reason, ApplicationError::Panicked { .. }));
        }
        other => panic!("unexpected disposition {other:?}"),
    }
    assert!(crashing.exists());
    assert!(d.scratch_dirs().is_empty());
}

#[tokio::test]
async fn unreadable_scan_fails_with_no_pages() {
    let d = Deployment::new(1);
    let junk = d.drop_scan("junk.pdf", "not really a pdf");
    let summary = d.orchestrator().run_once().await.unwrap();

    assert_eq!(summary.succeeded, 0);
    match &summary.outcomes[0].disposition {
        Disposition::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::Preprocessed);
            assert!(matches!(reason, ApplicationError::NoPages { app_id: 1001 }));
        }
        other => panic!("unexpected disposition {other:?}"),
    }
    assert!(junk.exists());
    assert_eq!(d.service.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_ingestion_directory_is_a_no_op() {
    let d = Deployment::new(4);
    let summary = d.orchestrator().run_once().await.unwrap();
    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.succeeded, 0);
    assert!(summary.outcomes.is_empty());
}

#[tokio::test]
async fn progress_callback_sees_every_application() {
    let progress = Arc::new(RecordingProgress::default());
    let d = Deployment::with_progress(1, progress.clone());
    d.drop_scan("scan_a.pdf", "%PDF name=Abdul_Karim");
    d.drop_scan("scan_b.pdf", "%PDF name=X ocr=fail");

    d.orchestrator().run_once().await.unwrap();

    let events = progress.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("run:2"));
    assert_eq!(events.last().map(String::as_str), Some("end:1/2"));
    assert!(events.contains(&"start:1001".to_string()));
    assert!(events.contains(&"done:1001".to_string()));
    assert!(events.contains(&"start:1002".to_string()));
    assert!(events.contains(&"error:Some(1002)".to_string()));
}

#[tokio::test]
async fn store_outage_fails_only_the_application_persisting_during_it() {
    let base = TempDir::new().unwrap();
    let db_dir = base.path().join("db");
    let outage = Arc::new(StoreOutage {
        db_dir: db_dir.clone(),
    });
    let d = Deployment::build(
        base,
        1,
        ScriptedService::with_outage(outage.clone()),
        |b| {
            b.store_path(db_dir.join("local_db.json"))
                .progress_callback(outage.clone())
        },
    );
    let stalled = d.drop_scan("scan_a.pdf", "%PDF name=Abdul_Karim store=down");
    d.drop_scan("scan_b.pdf", "%PDF name=Fatima_Begum");
    let orch = d.orchestrator();

    let summary = orch.run_once().await.unwrap();
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, 1);

    let failed: Vec<_> = summary.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].app_id, Some(1001));
    match &failed[0].disposition {
        Disposition::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::Persisted);
            assert!(matches!(reason, ApplicationError::Store { .. }));
        }
        other => panic!("unexpected disposition {other:?}"),
    }
    assert!(stalled.exists());

    // The store file survived intact and holds only the sibling's record.
    let raw = std::fs::read(db_dir.join("local_db.json")).unwrap();
    let on_disk: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(on_disk["last_app_id"], 1002);
    let records = orch.store().list_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].app_id, 1002);
    assert_eq!(
        d.files_in(&d.config.dirs.drafts_dir),
        vec!["application_1002_Fatima_Begum.json"]
    );
    assert!(d.scratch_dirs().is_empty());
}

#[tokio::test]
async fn report_failure_after_persisting_keeps_record_and_sources() {
    let d = Deployment::new(1);
    let scan = d.drop_scan("scan.pdf", "%PDF name=Report_Breaker pages=2");
    let orch = d.orchestrator();

    let summary = orch.run_once().await.unwrap();
    assert_eq!(summary.succeeded, 0);
    match &summary.outcomes[0].disposition {
        Disposition::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::Reported);
            assert!(matches!(reason, ApplicationError::Report { .. }));
        }
        other => panic!("unexpected disposition {other:?}"),
    }

    assert!(scan.exists());
    assert!(d.files_in(&d.config.dirs.archive_dir).is_empty());
    assert!(d.files_in(&d.config.dirs.reports_dir).is_empty());
    assert_eq!(
        d.files_in(&d.config.dirs.drafts_dir),
        vec!["application_1001_Report_Breaker.json"]
    );
    let stored = orch.store().get(1001).unwrap().unwrap();
    assert_eq!(stored.form.head_of_family.name.value, "Report Breaker");
    assert!(d.scratch_dirs().is_empty());
}
