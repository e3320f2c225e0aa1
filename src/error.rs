//! Error types for the anjuman-intake library.
//!
//! Failures fall into three tiers, and each tier has its own type:
//!
//! * [`IntakeError`]: **run-level**. The ingestion pass (or a trigger
//!   operation such as an upload) cannot proceed at all: bad configuration,
//!   an unreadable ingestion directory, a results lookup for a missing file.
//!
//! * [`ApplicationError`]: **application-level**. One applicant's pipeline
//!   failed (no usable pages, assembly error, OCR failure, store write error).
//!   It is carried inside [`crate::orchestrator::ApplicationOutcome`] and never
//!   crosses into sibling applications.
//!
//! * [`PageError`]: **page-level**. A single page could not be rasterised or
//!   enhanced. The page is skipped; the rest of the group carries on.
//!
//! [`StoreError`] is the store's own failure type. Inside a pipeline it is
//! wrapped into [`ApplicationError::Store`].

use std::path::PathBuf;
use thiserror::Error;

/// Run-level errors returned by the public entry points.
#[derive(Debug, Error)]
pub enum IntakeError {
    // ── Configuration ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Filesystem ────────────────────────────────────────────────────────
    /// A configured directory could not be created or listed.
    #[error("Directory error for '{path}': {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be read or written.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Store ─────────────────────────────────────────────────────────────
    #[error(transparent)]
    Store(#[from] StoreError),

    // ── Trigger surface ───────────────────────────────────────────────────
    /// Uploaded archive could not be extracted.
    #[error("Failed to extract archive '{path}': {detail}")]
    ArchiveExtraction { path: PathBuf, detail: String },

    /// Requested result file does not exist.
    #[error("Result file not found: '{name}'")]
    ResultNotFound { name: String },

    /// Requested file name is not a plain file name.
    #[error("Invalid result file name '{name}'")]
    InvalidFileName { name: String },

    /// A draft file exists but does not hold valid JSON.
    #[error("Draft '{path}' is not valid JSON: {source}")]
    InvalidDraft {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── Collaborators ─────────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// The document service client could not be built.
    #[error("Document service client error: {0}")]
    ServiceClient(String),
}

/// Errors raised by [`crate::store::Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read store '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store file exists but does not parse. The store refuses to reset
    /// itself because a reset would hand out already-used ids again.
    #[error("Store '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write store '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialise store: {0}")]
    Serialise(#[source] serde_json::Error),

    /// The store lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Why one application's pipeline ended in the `Failed` state.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ApplicationError {
    /// Every page of every source file failed to preprocess.
    #[error("No pages extracted for application {app_id}")]
    NoPages { app_id: u64 },

    /// The merged application PDF could not be produced.
    #[error("PDF assembly failed: {detail}")]
    Assembly { detail: String },

    /// The document service call failed.
    #[error("OCR invocation failed: {detail}")]
    Ocr { detail: String },

    /// The raw OCR output was missing or did not parse.
    #[error("OCR output unreadable at '{path}': {detail}")]
    OcrOutput { path: PathBuf, detail: String },

    /// Allocating an id or persisting the record failed.
    #[error("Store failure: {detail}")]
    Store { detail: String },

    /// The human-readable report could not be written.
    #[error("Report generation failed: {detail}")]
    Report { detail: String },

    /// Source files could not be moved into the archive directory.
    #[error("Archiving '{path}' failed: {detail}")]
    Archive { path: PathBuf, detail: String },

    /// Any other filesystem failure inside the pipeline.
    #[error("I/O failure on '{path}': {detail}")]
    Io { path: PathBuf, detail: String },

    /// The pipeline task panicked.
    #[error("Pipeline task panicked: {detail}")]
    Panicked { detail: String },
}

impl From<StoreError> for ApplicationError {
    fn from(e: StoreError) -> Self {
        ApplicationError::Store {
            detail: e.to_string(),
        }
    }
}

impl ApplicationError {
    pub(crate) fn io(path: impl Into<PathBuf>, e: std::io::Error) -> Self {
        ApplicationError::Io {
            path: path.into(),
            detail: e.to_string(),
        }
    }
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// A source PDF could not be split into page images.
    #[error("{source_file}: rasterisation failed: {detail}")]
    RasterFailed { source_file: PathBuf, detail: String },

    /// One page image could not be read, enhanced, or written.
    #[error("{page}: enhancement failed: {detail}")]
    EnhanceFailed { page: PathBuf, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_pages_display_mentions_id() {
        let e = ApplicationError::NoPages { app_id: 1004 };
        assert!(e.to_string().contains("1004"), "got: {e}");
    }

    #[test]
    fn store_error_converts_into_application_error() {
        let e: ApplicationError = StoreError::Poisoned.into();
        match e {
            ApplicationError::Store { detail } => assert!(detail.contains("poisoned")),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn page_error_display_names_page() {
        let e = PageError::EnhanceFailed {
            page: PathBuf::from("page_03.jpg"),
            detail: "bad header".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page_03.jpg"));
        assert!(msg.contains("bad header"));
    }
}
