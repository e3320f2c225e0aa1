//! Discovery: list scanned PDFs in the ingestion directory and group them
//! into applications.
//!
//! Discovery is re-runnable. Files of failed applications stay in the
//! ingestion directory and are simply picked up again on the next pass.

use crate::error::IntakeError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An ordered, non-empty set of scanned files belonging to one applicant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationGroup {
    pub sources: Vec<PathBuf>,
}

impl ApplicationGroup {
    /// Short label for logs: the first source's file name.
    pub fn label(&self) -> String {
        self.sources
            .first()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Decides which discovered files form one application.
pub trait GroupingPolicy: Send + Sync {
    /// Partition `files` (already sorted) into groups. Every file lands in
    /// exactly one group and no group is empty.
    fn group(&self, files: Vec<PathBuf>) -> Vec<ApplicationGroup>;
}

/// One file per application.
///
/// Multi-file applications (e.g. a form split across scans, joined by the
/// printed "Page X of Y" footer) need a footer-aware policy in its place.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleFilePolicy;

impl GroupingPolicy for SingleFilePolicy {
    fn group(&self, files: Vec<PathBuf>) -> Vec<ApplicationGroup> {
        files
            .into_iter()
            .map(|f| ApplicationGroup { sources: vec![f] })
            .collect()
    }
}

/// List `*.pdf` files (extension matched case-insensitively) directly inside
/// `incoming_dir`, in lexicographic order.
///
/// A file whose first bytes are not `%PDF` is still returned, with a warning;
/// it will fail at rasterisation with a specific reason.
pub fn discover(incoming_dir: &Path) -> Result<Vec<PathBuf>, IntakeError> {
    let entries = std::fs::read_dir(incoming_dir).map_err(|e| IntakeError::Directory {
        path: incoming_dir.to_path_buf(),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_pdf_name(p))
        .collect();
    files.sort();

    for f in &files {
        if !has_pdf_magic(f) {
            warn!("{} does not start with %PDF", f.display());
        }
    }
    debug!("Discovered {} PDF(s) in {}", files.len(), incoming_dir.display());
    Ok(files)
}

fn is_pdf_name(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Whether the file starts with the `%PDF` magic bytes.
pub fn has_pdf_magic(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    std::fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == b"%PDF")
        .unwrap_or(false)
}
