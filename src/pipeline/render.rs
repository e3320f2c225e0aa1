//! pdfium-backed collaborators: page rasterisation, PDF assembly and report
//! drawing.
//!
//! pdfium is bound per call and every call is blocking; the orchestrator
//! runs them inside `spawn_blocking`. The `thread_safe` feature of
//! `pdfium-render` serialises access to the library across workers.
//!
//! The library is located through `PDFIUM_LIB_PATH` (a file, or a directory
//! holding the platform library) and falls back to the system library.

use super::report::{image_error_op, DrawOp, ReportFont, ReportLayout};
use super::{PageRasterizer, PdfAssembler, ReportRenderer};
use crate::error::{ApplicationError, IntakeError, PageError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Resolution assumed when placing a page image onto a PDF page.
pub const IMAGE_DPI: f32 = 100.0;

/// Rasteriser, assembler and report renderer over one pdfium binding.
#[derive(Debug, Clone)]
pub struct PdfiumEngine {
    library_path: Option<PathBuf>,
    render_scale: f32,
}

impl PdfiumEngine {
    /// Engine rendering pages at `render_scale` × their natural size.
    pub fn new(render_scale: f32) -> Self {
        Self {
            library_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
            render_scale,
        }
    }

    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    /// Bind once up front so a missing library is reported before any
    /// application is touched.
    pub fn check_binding(&self) -> Result<(), IntakeError> {
        self.bind().map(|_| ()).map_err(IntakeError::PdfiumBindingFailed)
    }

    fn bind(&self) -> Result<Pdfium, String> {
        let bindings = match &self.library_path {
            Some(p) if p.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
            }
            Some(p) => Pdfium::bind_to_library(p),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| format!("{e:?}"))?;
        Ok(Pdfium::new(bindings))
    }
}

fn is_pdf_input(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn pixels_to_points(px: u32) -> PdfPoints {
    PdfPoints::new(px as f32 * 72.0 / IMAGE_DPI)
}

// ── Rasterisation ────────────────────────────────────────────────────────

impl PageRasterizer for PdfiumEngine {
    fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, PageError> {
        let fail = |detail: String| PageError::RasterFailed {
            source_file: pdf.to_path_buf(),
            detail,
        };
        let pdfium = self.bind().map_err(fail)?;
        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| fail(format!("{e:?}")))?;

        let config = PdfRenderConfig::new().scale_page_by_factor(self.render_scale);
        let mut pages = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let out = out_dir.join(format!("page_{:02}.jpg", idx + 1));
            let rendered = page
                .render_with_config(&config)
                .map_err(|e| format!("{e:?}"))
                .and_then(|bitmap| {
                    bitmap
                        .as_image()
                        .to_rgb8()
                        .save_with_format(&out, image::ImageFormat::Jpeg)
                        .map_err(|e| e.to_string())
                });
            match rendered {
                Ok(()) => pages.push(out),
                Err(detail) => warn!("{}: page {} skipped: {detail}", pdf.display(), idx + 1),
            }
        }
        info!("{}: rasterised {} page(s)", pdf.display(), pages.len());
        Ok(pages)
    }
}

// ── Assembly ─────────────────────────────────────────────────────────────

impl PdfAssembler for PdfiumEngine {
    fn assemble(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ApplicationError> {
        let fail = |detail: String| ApplicationError::Assembly { detail };
        let pdfium = self.bind().map_err(fail)?;
        let mut document = pdfium
            .create_new_pdf()
            .map_err(|e| fail(format!("{e:?}")))?;

        for input in inputs {
            if is_pdf_input(input) {
                let source = pdfium
                    .load_pdf_from_file(input, None)
                    .map_err(|e| fail(format!("{}: {e:?}", input.display())))?;
                document
                    .pages_mut()
                    .append(&source)
                    .map_err(|e| fail(format!("{}: {e:?}", input.display())))?;
            } else {
                let img = image::open(input)
                    .map_err(|e| fail(format!("{}: {e}", input.display())))?;
                append_image_page(&mut document, &img)
                    .map_err(|e| fail(format!("{}: {e:?}", input.display())))?;
            }
            debug!("Appended {}", input.display());
        }

        document
            .save_to_file(output)
            .map_err(|e| fail(format!("save {}: {e:?}", output.display())))
    }
}

fn append_image_page(document: &mut PdfDocument, img: &DynamicImage) -> Result<(), PdfiumError> {
    let (w, h) = (pixels_to_points(img.width()), pixels_to_points(img.height()));
    let mut page = document
        .pages_mut()
        .create_page_at_end(PdfPagePaperSize::Custom(w, h))?;
    page.objects_mut()
        .create_image_object(PdfPoints::ZERO, PdfPoints::ZERO, img, Some(w), Some(h))?;
    Ok(())
}

// ── Report drawing ───────────────────────────────────────────────────────

impl ReportRenderer for PdfiumEngine {
    fn render(&self, layout: &ReportLayout, output: &Path) -> Result<(), ApplicationError> {
        let fail = |detail: String| ApplicationError::Report { detail };
        let pdfium = self.bind().map_err(fail)?;
        let mut document = pdfium
            .create_new_pdf()
            .map_err(|e| fail(format!("{e:?}")))?;

        let helvetica = document.fonts_mut().helvetica();
        let helvetica_bold = document.fonts_mut().helvetica_bold();
        let courier = document.fonts_mut().courier();
        let font_for = |font: ReportFont| match font {
            ReportFont::Helvetica => helvetica,
            ReportFont::HelveticaBold => helvetica_bold,
            ReportFont::Courier => courier,
        };
        for report_page in &layout.pages {
            let mut page = document
                .pages_mut()
                .create_page_at_end(PdfPagePaperSize::Custom(
                    PdfPoints::new(layout.width),
                    PdfPoints::new(layout.height),
                ))
                .map_err(|e| fail(format!("{e:?}")))?;

            for op in &report_page.ops {
                match op {
                    DrawOp::Text {
                        x,
                        y,
                        text,
                        font,
                        size,
                    } => {
                        page.objects_mut()
                            .create_text_object(
                                PdfPoints::new(*x),
                                PdfPoints::new(*y),
                                text,
                                font_for(*font),
                                PdfPoints::new(*size),
                            )
                            .map_err(|e| fail(format!("{e:?}")))?;
                    }
                    DrawOp::Image {
                        path,
                        x,
                        y,
                        width,
                        height,
                    } => {
                        let placed = image::open(path)
                            .map_err(|e| e.to_string())
                            .and_then(|img| {
                                page.objects_mut()
                                    .create_image_object(
                                        PdfPoints::new(*x),
                                        PdfPoints::new(*y),
                                        &img,
                                        Some(PdfPoints::new(*width)),
                                        Some(PdfPoints::new(*height)),
                                    )
                                    .map(|_| ())
                                    .map_err(|e| format!("{e:?}"))
                            });
                        if let Err(e) = placed {
                            warn!("Embedding {} failed: {e}", path.display());
                            if let DrawOp::Text { x, y, text, font, size } = image_error_op() {
                                page.objects_mut()
                                    .create_text_object(
                                        PdfPoints::new(x),
                                        PdfPoints::new(y),
                                        &text,
                                        font_for(font),
                                        PdfPoints::new(size),
                                    )
                                    .map_err(|e| fail(format!("{e:?}")))?;
                            }
                        }
                    }
                }
            }
        }

        document
            .save_to_file(output)
            .map_err(|e| fail(format!("save {}: {e:?}", output.display())))
    }
}
