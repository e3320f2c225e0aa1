//! Preprocessing: turn an application's source PDFs into cleaned page images.
//!
//! Raw rasterised pages go to `<scratch>/raw/<NN>/`; enhanced pages are
//! numbered across the whole group as `<scratch>/page_NN.jpg` so their order
//! is the order of the sources, then the order of pages within each source.

use super::{ImageEnhancer, PageRasterizer};
use crate::error::{ApplicationError, PageError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of preprocessing one application group.
#[derive(Debug, Default)]
pub struct PreprocessOutcome {
    /// Enhanced page images, in order.
    pub pages: Vec<PathBuf>,
    /// Pages (or whole sources) that were skipped.
    pub skipped: Vec<PageError>,
}

/// Rasterise and enhance every page of `sources` into `scratch`.
///
/// A source that fails to rasterise and a page that fails to enhance are
/// logged and skipped. Only a scratch-directory failure is an error here;
/// the caller decides what zero pages means.
pub fn preprocess_group(
    rasterizer: &dyn PageRasterizer,
    enhancer: &dyn ImageEnhancer,
    sources: &[PathBuf],
    scratch: &Path,
) -> Result<PreprocessOutcome, ApplicationError> {
    let mut outcome = PreprocessOutcome::default();
    let mut page_no = 0usize;

    for (k, source) in sources.iter().enumerate() {
        let raw_dir = scratch.join("raw").join(format!("{k:02}"));
        std::fs::create_dir_all(&raw_dir).map_err(|e| ApplicationError::io(&raw_dir, e))?;

        let raw_pages = match rasterizer.rasterize(source, &raw_dir) {
            Ok(pages) => pages,
            Err(e) => {
                warn!("Skipping source: {e}");
                outcome.skipped.push(e);
                continue;
            }
        };
        debug!("{}: {} page(s) rasterised", source.display(), raw_pages.len());

        for raw in raw_pages {
            page_no += 1;
            let out = scratch.join(format!("page_{page_no:02}.jpg"));
            match enhancer.enhance(&raw, &out) {
                Ok(()) => outcome.pages.push(out),
                Err(e) => {
                    warn!("Skipping page: {e}");
                    outcome.skipped.push(e);
                }
            }
        }
    }

    Ok(outcome)
}
