//! Operator-facing operations around a deployment: dropping new scans into
//! the ingestion directory and reading back drafts and reports.
//!
//! Every lookup takes a bare file name. Names carrying a path separator or
//! `..` are rejected before touching the filesystem.

use crate::config::Directories;
use crate::error::IntakeError;
use serde::Serialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// File names currently in the drafts and reports directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultListing {
    pub drafts: Vec<String>,
    pub reports: Vec<String>,
}

/// What an upload left in the ingestion directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// A plain file stored under its own name.
    Stored(PathBuf),
    /// An archive whose files were extracted; the archive itself is gone.
    Extracted(Vec<PathBuf>),
}

/// Reject anything but a plain file name.
pub fn validate_file_name(name: &str) -> Result<(), IntakeError> {
    let bad = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(IntakeError::InvalidFileName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// List `*.json` drafts and `*.pdf` reports, sorted by name.
pub fn list_results(dirs: &Directories) -> Result<ResultListing, IntakeError> {
    Ok(ResultListing {
        drafts: list_with_extension(&dirs.drafts_dir, "json")?,
        reports: list_with_extension(&dirs.reports_dir, "pdf")?,
    })
}

fn list_with_extension(dir: &Path, ext: &str) -> Result<Vec<String>, IntakeError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(IntakeError::Directory {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map(|x| x == ext).unwrap_or(false))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}

/// Read a draft back as JSON.
pub fn fetch_draft(dirs: &Directories, name: &str) -> Result<serde_json::Value, IntakeError> {
    let path = existing(&dirs.drafts_dir, name)?;
    let raw = std::fs::read(&path).map_err(|e| IntakeError::Io {
        path: path.clone(),
        source: e,
    })?;
    serde_json::from_slice(&raw).map_err(|e| IntakeError::InvalidDraft { path, source: e })
}

/// Path of an existing report.
pub fn report_path(dirs: &Directories, name: &str) -> Result<PathBuf, IntakeError> {
    existing(&dirs.reports_dir, name)
}

fn existing(dir: &Path, name: &str) -> Result<PathBuf, IntakeError> {
    validate_file_name(name)?;
    let path = dir.join(name);
    if !path.is_file() {
        return Err(IntakeError::ResultNotFound {
            name: name.to_string(),
        });
    }
    Ok(path)
}

/// Store an uploaded file in the ingestion directory.
///
/// A zip archive (recognised by content) is extracted there instead and not
/// kept. Archive entries are flattened to their file names; entries with
/// unsafe paths are skipped.
pub fn upload(dirs: &Directories, file_name: &str, bytes: &[u8]) -> Result<UploadOutcome, IntakeError> {
    validate_file_name(file_name)?;
    std::fs::create_dir_all(&dirs.incoming_dir).map_err(|e| IntakeError::Directory {
        path: dirs.incoming_dir.clone(),
        source: e,
    })?;

    if bytes.starts_with(ZIP_MAGIC) {
        let extracted = extract_zip(bytes, &dirs.incoming_dir, file_name)?;
        info!("Extracted {} file(s) from {file_name}", extracted.len());
        return Ok(UploadOutcome::Extracted(extracted));
    }

    let dest = dirs.incoming_dir.join(file_name);
    write_file(&dest, bytes)?;
    info!("Stored upload {}", dest.display());
    Ok(UploadOutcome::Stored(dest))
}

/// [`upload`] for a file already on disk.
pub fn upload_file(dirs: &Directories, path: &Path) -> Result<UploadOutcome, IntakeError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = std::fs::read(path).map_err(|e| IntakeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    upload(dirs, &name, &bytes)
}

fn extract_zip(bytes: &[u8], into: &Path, archive_name: &str) -> Result<Vec<PathBuf>, IntakeError> {
    let fail = |detail: String| IntakeError::ArchiveExtraction {
        path: PathBuf::from(archive_name),
        detail,
    };
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| fail(e.to_string()))?;

    let mut written = Vec::new();
    let mut seen = HashSet::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| fail(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        else {
            warn!("Skipping unsafe archive entry {}", entry.name());
            continue;
        };
        if !seen.insert(name.clone()) {
            warn!(
                "Skipping archive entry {}: {} already extracted from this archive",
                entry.name(),
                name.to_string_lossy()
            );
            continue;
        }
        // Declared sizes are untrusted; grow with the data actually read.
        let mut body = Vec::new();
        entry
            .read_to_end(&mut body)
            .map_err(|e| fail(format!("{}: {e}", entry.name())))?;
        let dest = into.join(name);
        write_file(&dest, &body)?;
        written.push(dest);
    }
    written.sort();
    Ok(written)
}

fn write_file(dest: &Path, bytes: &[u8]) -> Result<(), IntakeError> {
    std::fs::write(dest, bytes).map_err(|e| IntakeError::Io {
        path: dest.to_path_buf(),
        source: e,
    })
}
