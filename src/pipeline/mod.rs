//! Pipeline stages for one application.
//!
//! Each submodule implements exactly one step. The heavy lifting of each step
//! is delegated to a collaborator behind a trait so the orchestration can be
//! exercised with in-process fakes.
//!
//! ## Data Flow
//!
//! ```text
//! discover ──▶ preprocess ──▶ assemble ──▶ ocr ──▶ (mapper) ──▶ report
//! (incoming)   (raster+enhance) (merge)    (service)           (render)
//! ```
//!
//! 1. [`discover`]: list scanned PDFs and group them into applications
//! 2. [`preprocess`]: rasterise every page ([`PageRasterizer`]) and clean
//!    each page image ([`ImageEnhancer`]); page failures are skipped
//! 3. [`assemble`]: merge page images into one PDF ([`PdfAssembler`])
//! 4. [`ocr`]: submit the PDF to the [`ocr::DocumentService`]; the
//!    only stage with network I/O
//! 5. [`report`]: lay out the record and page images, drawn by a
//!    [`ReportRenderer`]
//!
//! [`render`] is the pdfium-backed implementation of the three PDF traits.
//! Collaborator calls are blocking; the orchestrator runs them inside
//! `spawn_blocking`.

pub mod assemble;
pub mod discover;
pub mod enhance;
pub mod ocr;
pub mod preprocess;
pub mod render;
pub mod report;

use crate::error::{ApplicationError, PageError};
use std::path::{Path, PathBuf};

/// Splits a PDF into one image file per page.
pub trait PageRasterizer: Send + Sync {
    /// Write every page of `pdf` into `out_dir` and return the image paths
    /// in page order.
    fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, PageError>;
}

/// Cleans one scanned page image for OCR.
pub trait ImageEnhancer: Send + Sync {
    fn enhance(&self, input: &Path, output: &Path) -> Result<(), PageError>;
}

/// Merges images and/or PDFs, in order, into one PDF.
pub trait PdfAssembler: Send + Sync {
    fn assemble(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ApplicationError>;
}

/// Draws a laid-out report to a PDF file.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, report: &report::ReportLayout, output: &Path) -> Result<(), ApplicationError>;
}
