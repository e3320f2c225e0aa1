//! # anjuman-intake
//!
//! Batch ingestion of scanned Anjuman registration forms.
//!
//! Scans dropped into an ingestion directory are grouped into applications,
//! cleaned up page by page, merged into one PDF per application, read by a
//! document-understanding service, mapped onto the fixed registration form
//! schema with per-field confidences, stored as draft records awaiting human
//! adjudication, and rendered into a review report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! incoming/*.pdf
//!  │
//!  ├─ 1. Discover    list scans, group into applications
//!  ├─ 2. Preprocess  rasterise (pdfium) + enhance (Otsu binarisation)
//!  ├─ 3. Assemble    merge cleaned pages → work/pdfs/app_<id>.pdf
//!  ├─ 4. OCR         document service → work/ocr_raw/app_<id>_ocr.json
//!  ├─ 5. Map         text + entities → StructuredForm with confidences
//!  ├─ 6. Persist     drafts/application_<id>_<name>.json + store record
//!  ├─ 7. Report      reports/application_<id>_report.pdf
//!  └─ 8. Archive     sources → work/archive/
//! ```
//!
//! Applications run concurrently on a bounded worker pool; a failure in one
//! never touches another, and a failed application's scans stay in the
//! ingestion directory for the next pass.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use anjuman_intake::{Collaborators, IntakeConfig, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IntakeConfig::builder()
//!         .base_dir("/srv/anjuman")
//!         .access_token(std::env::var("INTAKE_ACCESS_TOKEN")?)
//!         .workers(2)
//!         .build()?;
//!     let collaborators = Collaborators::production(&config)?;
//!     let orchestrator = Orchestrator::new(config, collaborators)?;
//!     let summary = orchestrator.run_once().await?;
//!     eprintln!("{} of {} applications succeeded", summary.succeeded, summary.attempted);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `intake` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod mapper;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod results;
pub mod schema;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Directories, IntakeConfig, IntakeConfigBuilder, ProcessorIdentity};
pub use error::{ApplicationError, IntakeError, PageError, StoreError};
pub use mapper::{FieldExtractor, FieldMapper, Provenance, WindowExtractor};
pub use orchestrator::{
    clean_orphaned_scratch, ApplicationOutcome, Collaborators, Disposition, Orchestrator,
    RunSummary, Stage,
};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use schema::{ApplicationRecord, OcrDocument, StructuredForm};
pub use store::Store;
