//! Report generation: a human-readable PDF of one application.
//!
//! Layout is computed here as plain data ([`ReportLayout`]): positions in PDF
//! points, origin bottom-left, A4 pages. A [`ReportRenderer`] only draws it.
//!
//! ```text
//! page 1..k   "Application Report — <id>" / "Status: <status>" /
//!             the record as pretty JSON, wrapped at 120 columns
//! page k+1..  one page per processed scan, "Page image: <file>",
//!             scaled to fit (never enlarged) and centred
//! ```

use super::ReportRenderer;
use crate::error::ApplicationError;
use crate::schema::ApplicationRecord;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const A4_WIDTH: f32 = 595.2756;
pub const A4_HEIGHT: f32 = 841.8898;
/// 20 mm in points.
pub const MARGIN: f32 = 56.692_91;
pub const WRAP_COLUMNS: usize = 120;
pub const LINE_STEP: f32 = 12.0;
/// Body text moves to a new page once the cursor drops below this.
pub const PAGE_BREAK_Y: f32 = 80.0;
/// Drawn in place of a scan that cannot be embedded.
pub const IMAGE_ERROR_MARKER: &str = "Error embedding image.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFont {
    Helvetica,
    HelveticaBold,
    Courier,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Text {
        x: f32,
        y: f32,
        text: String,
        font: ReportFont,
        size: f32,
    },
    /// Embed the image at `path` into the given box. If the renderer cannot
    /// load it, it draws [`IMAGE_ERROR_MARKER`] instead.
    Image {
        path: PathBuf,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportPage {
    pub ops: Vec<DrawOp>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportLayout {
    pub width: f32,
    pub height: f32,
    pub pages: Vec<ReportPage>,
}

/// A page image and its pixel size, `None` when it could not be read.
pub type ScanImage = (PathBuf, Option<(u32, u32)>);

fn text(x: f32, y: f32, s: impl Into<String>, font: ReportFont, size: f32) -> DrawOp {
    DrawOp::Text {
        x,
        y,
        text: s.into(),
        font,
        size,
    }
}

/// Lay out the report for `record` followed by one page per scan.
pub fn layout_report(
    record: &ApplicationRecord,
    scans: &[ScanImage],
) -> Result<ReportLayout, serde_json::Error> {
    let body = serde_json::to_string_pretty(record)?;
    let mut pages = Vec::new();

    let mut page = ReportPage::default();
    let mut y = A4_HEIGHT - MARGIN;
    page.ops.push(text(
        MARGIN,
        y,
        format!("Application Report — {}", record.app_id),
        ReportFont::HelveticaBold,
        14.0,
    ));
    y -= 18.0;
    page.ops.push(text(
        MARGIN,
        y,
        format!("Status: {}", record.metadata.status.label()),
        ReportFont::Helvetica,
        9.0,
    ));
    y -= 20.0;

    for line in wrap_lines(&body, WRAP_COLUMNS) {
        if y < PAGE_BREAK_Y {
            pages.push(std::mem::take(&mut page));
            y = A4_HEIGHT - MARGIN;
        }
        page.ops.push(text(MARGIN, y, line, ReportFont::Courier, 7.0));
        y -= LINE_STEP;
    }
    pages.push(page);

    for (path, dims) in scans {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut page = ReportPage::default();
        page.ops.push(text(
            MARGIN,
            A4_HEIGHT - MARGIN - 12.0,
            format!("Page image: {name}"),
            ReportFont::HelveticaBold,
            12.0,
        ));
        match dims {
            Some((iw, ih)) if *iw > 0 && *ih > 0 => {
                let (x, y, width, height) = fit_image(*iw, *ih);
                page.ops.push(DrawOp::Image {
                    path: path.clone(),
                    x,
                    y,
                    width,
                    height,
                });
            }
            _ => page.ops.push(image_error_op()),
        }
        pages.push(page);
    }

    Ok(ReportLayout {
        width: A4_WIDTH,
        height: A4_HEIGHT,
        pages,
    })
}

/// The marker drawn where a scan could not be embedded.
pub fn image_error_op() -> DrawOp {
    text(
        MARGIN,
        A4_HEIGHT - MARGIN - 40.0,
        IMAGE_ERROR_MARKER,
        ReportFont::HelveticaBold,
        12.0,
    )
}

/// Box `(x, y, width, height)` for an `iw`×`ih` image on an image page.
///
/// The image is scaled down to the printable area below the title, never up,
/// and centred (nudged 20 pt down to clear the title).
pub fn fit_image(iw: u32, ih: u32) -> (f32, f32, f32, f32) {
    let max_w = A4_WIDTH - 2.0 * MARGIN;
    let max_h = A4_HEIGHT - 2.0 * MARGIN - MARGIN;
    let (iw, ih) = (iw as f32, ih as f32);
    let scale = (max_w / iw).min(max_h / ih).min(1.0);
    let (w, h) = (iw * scale, ih * scale);
    ((A4_WIDTH - w) / 2.0, (A4_HEIGHT - h) / 2.0 - 20.0, w, h)
}

/// Break every line of `text` into chunks of at most `columns` characters,
/// preferring to break at a space.
pub fn wrap_lines(text: &str, columns: usize) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.lines() {
        let mut rest = line;
        while rest.chars().count() > columns {
            let cut = rest
                .char_indices()
                .nth(columns)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let head = &rest[..cut];
            let split = head
                .rfind(' ')
                .filter(|&i| !head[..i].trim().is_empty())
                .unwrap_or(cut);
            out.push(rest[..split].trim_end().to_string());
            rest = rest[split..].trim_start();
        }
        out.push(rest.to_string());
    }
    out
}

/// Lay out and render the report for `record` to `output`.
///
/// Scans whose size cannot be read get the error marker; the report is
/// still produced.
pub fn generate_report(
    renderer: &dyn ReportRenderer,
    record: &ApplicationRecord,
    page_images: &[PathBuf],
    output: &Path,
) -> Result<PathBuf, ApplicationError> {
    let scans: Vec<ScanImage> = page_images
        .iter()
        .map(|p| {
            let dims = image::image_dimensions(p)
                .map_err(|e| warn!("Cannot size {} for report: {e}", p.display()))
                .ok();
            (p.clone(), dims)
        })
        .collect();

    let layout = layout_report(record, &scans).map_err(|e| ApplicationError::Report {
        detail: format!("serialise record: {e}"),
    })?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ApplicationError::io(parent, e))?;
    }
    renderer.render(&layout, output)?;
    info!(
        app_id = record.app_id,
        "Report written: {} ({} pages)",
        output.display(),
        layout.pages.len()
    );
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::FieldMapper;
    use crate::schema::{OcrDocument, RecordMetadata, RecordStatus};
    use chrono::Utc;

    fn record() -> ApplicationRecord {
        let (form, _) = FieldMapper::default().map(&OcrDocument {
            text: "Name: Ayesha Begum\nAddress: 4 Lake View".into(),
            entities: vec![],
        });
        ApplicationRecord {
            app_id: 1042,
            form,
            metadata: RecordMetadata {
                app_id: 1042,
                source_pdf: PathBuf::from("work/pdfs/app_1042.pdf"),
                status: RecordStatus::Draft,
                processing_started: Utc::now(),
                processing_completed: Utc::now(),
            },
        }
    }

    fn texts(page: &ReportPage) -> Vec<&str> {
        page.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn header_and_status_lead_the_first_page() {
        let layout = layout_report(&record(), &[]).unwrap();
        let first = texts(&layout.pages[0]);
        assert_eq!(first[0], "Application Report — 1042");
        assert_eq!(first[1], "Status: draft");
        assert!(first[2..].iter().any(|l| l.contains("Ayesha Begum")));
    }

    #[test]
    fn body_paginates_below_break_line() {
        let layout = layout_report(&record(), &[]).unwrap();
        assert!(layout.pages.len() > 1, "record body should span pages");
        for page in &layout.pages {
            for op in &page.ops {
                if let DrawOp::Text { y, .. } = op {
                    assert!(*y >= PAGE_BREAK_Y - LINE_STEP);
                }
            }
        }
    }

    #[test]
    fn one_page_per_scan_with_marker_for_unreadable() {
        let scans = vec![
            (PathBuf::from("/w/page_01.jpg"), Some((1190, 1684))),
            (PathBuf::from("/w/page_02.jpg"), None),
        ];
        let base = layout_report(&record(), &[]).unwrap().pages.len();
        let layout = layout_report(&record(), &scans).unwrap();
        assert_eq!(layout.pages.len(), base + 2);

        let img_page = &layout.pages[base];
        assert_eq!(texts(img_page), vec!["Page image: page_01.jpg"]);
        assert!(matches!(img_page.ops[1], DrawOp::Image { .. }));

        let bad_page = &layout.pages[base + 1];
        assert_eq!(
            texts(bad_page),
            vec!["Page image: page_02.jpg", IMAGE_ERROR_MARKER]
        );
    }

    #[test]
    fn small_images_are_not_enlarged() {
        let (x, _, w, h) = fit_image(100, 50);
        assert_eq!((w, h), (100.0, 50.0));
        assert!((x - (A4_WIDTH - 100.0) / 2.0).abs() < 1e-3);
    }

    #[test]
    fn large_images_fit_printable_area() {
        let (x, y, w, h) = fit_image(2480, 3508);
        assert!(w <= A4_WIDTH - 2.0 * MARGIN + 1e-3);
        assert!(h <= A4_HEIGHT - 3.0 * MARGIN + 1e-3);
        assert!((w / h - 2480.0 / 3508.0).abs() < 1e-3);
        assert!(x > 0.0 && y > 0.0);
    }

    #[test]
    fn wrap_prefers_spaces_and_respects_width() {
        let line = format!("{} {}", "a".repeat(70), "b".repeat(70));
        let wrapped = wrap_lines(&line, 120);
        assert_eq!(wrapped, vec!["a".repeat(70), "b".repeat(70)]);

        let long = "x".repeat(250);
        let wrapped = wrap_lines(&long, 120);
        assert_eq!(wrapped.len(), 3);
        assert!(wrapped.iter().all(|l| l.chars().count() <= 120));
    }

    #[test]
    fn wrap_keeps_short_lines_and_blank_lines() {
        assert_eq!(wrap_lines("a\n\nb", 120), vec!["a", "", "b"]);
    }
}
