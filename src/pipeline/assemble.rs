//! Assembly: merge an application's processed pages into one PDF.

use super::PdfAssembler;
use crate::error::ApplicationError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the merged PDF of `app_id` lives.
pub fn application_pdf_path(pdfs_dir: &Path, app_id: u64) -> PathBuf {
    pdfs_dir.join(format!("app_{app_id}.pdf"))
}

/// Merge `inputs` (in order) into `<pdfs_dir>/app_<id>.pdf`.
pub fn assemble_application(
    assembler: &dyn PdfAssembler,
    inputs: &[PathBuf],
    pdfs_dir: &Path,
    app_id: u64,
) -> Result<PathBuf, ApplicationError> {
    if inputs.is_empty() {
        return Err(ApplicationError::Assembly {
            detail: "no input pages".into(),
        });
    }
    std::fs::create_dir_all(pdfs_dir).map_err(|e| ApplicationError::io(pdfs_dir, e))?;
    let output = application_pdf_path(pdfs_dir, app_id);
    assembler.assemble(inputs, &output)?;
    info!(app_id, "Assembled {} page(s) → {}", inputs.len(), output.display());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recording(Mutex<Vec<PathBuf>>);

    impl PdfAssembler for Recording {
        fn assemble(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ApplicationError> {
            self.0.lock().unwrap().extend(inputs.iter().cloned());
            std::fs::write(output, b"%PDF-1.7").map_err(|e| ApplicationError::io(output, e))
        }
    }

    #[test]
    fn empty_input_fails_without_calling_assembler() {
        let dir = TempDir::new().unwrap();
        let rec = Recording::default();
        let err = assemble_application(&rec, &[], dir.path(), 1001).unwrap_err();
        assert!(matches!(err, ApplicationError::Assembly { .. }));
        assert!(rec.0.lock().unwrap().is_empty());
    }

    #[test]
    fn writes_to_application_path() {
        let dir = TempDir::new().unwrap();
        let pdfs = dir.path().join("pdfs");
        let rec = Recording::default();
        let inputs = vec![PathBuf::from("page_01.jpg"), PathBuf::from("page_02.jpg")];
        let out = assemble_application(&rec, &inputs, &pdfs, 1007).unwrap();
        assert_eq!(out, pdfs.join("app_1007.pdf"));
        assert!(out.exists());
        assert_eq!(*rec.0.lock().unwrap(), inputs);
    }
}
