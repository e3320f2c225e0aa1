//! OCR invocation: submit an assembled PDF to the document-understanding
//! service and persist its raw response.
//!
//! One call per application, no retry: a failed call fails the application
//! and the next ingestion pass rediscovers its sources. [`process_batch`]
//! runs many PDFs back to back with a fixed pause between calls.

use crate::config::IntakeConfig;
use crate::error::{ApplicationError, IntakeError};
use crate::schema::OcrDocument;
use async_trait::async_trait;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub const PDF_MIME: &str = "application/pdf";

/// The external document-understanding engine.
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Process one document and return the service's raw JSON response.
    async fn process_document(
        &self,
        content: &[u8],
        mime_type: &str,
    ) -> Result<String, ApplicationError>;
}

// ── REST client ──────────────────────────────────────────────────────────

/// Client for the `:process` method of a Document AI processor.
pub struct DocumentAiClient {
    http: reqwest::Client,
    url: String,
    resource_name: String,
    access_token: Option<String>,
    timeout_secs: u64,
}

impl std::fmt::Debug for DocumentAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentAiClient")
            .field("url", &self.url)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl DocumentAiClient {
    pub fn from_config(config: &IntakeConfig) -> Result<Self, IntakeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IntakeError::ServiceClient(e.to_string()))?;
        let resource_name = config.processor.resource_name();
        Ok(Self {
            http,
            url: process_url(&config.service_endpoint(), &resource_name),
            resource_name,
            access_token: config.access_token.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// `<endpoint>/<resource>:process`
pub fn process_url(endpoint: &str, resource_name: &str) -> String {
    format!("{}/{}:process", endpoint.trim_end_matches('/'), resource_name)
}

/// JSON body of a synchronous process request.
pub fn request_body(resource_name: &str, content: &[u8], mime_type: &str) -> serde_json::Value {
    serde_json::json!({
        "name": resource_name,
        "rawDocument": {
            "content": base64::engine::general_purpose::STANDARD.encode(content),
            "mimeType": mime_type,
        }
    })
}

#[async_trait]
impl DocumentService for DocumentAiClient {
    async fn process_document(
        &self,
        content: &[u8],
        mime_type: &str,
    ) -> Result<String, ApplicationError> {
        let body = request_body(&self.resource_name, content, mime_type);
        let mut request = self.http.post(&self.url).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| ApplicationError::Ocr {
            detail: if e.is_timeout() {
                format!("timed out after {}s", self.timeout_secs)
            } else {
                e.to_string()
            },
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ApplicationError::Ocr {
            detail: format!("reading response: {e}"),
        })?;
        if !status.is_success() {
            let snippet: String = text.chars().take(300).collect();
            return Err(ApplicationError::Ocr {
                detail: format!("HTTP {status}: {snippet}"),
            });
        }
        Ok(text)
    }
}

// ── Invocation ───────────────────────────────────────────────────────────

/// `<ocr_raw_dir>/<pdf stem>_ocr.json`
pub fn ocr_output_path(ocr_raw_dir: &Path, pdf: &Path) -> PathBuf {
    let stem = pdf
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    ocr_raw_dir.join(format!("{stem}_ocr.json"))
}

/// Submit `pdf` and write the raw response next to the other OCR outputs.
/// Returns the path of the written response.
pub async fn invoke(
    service: &dyn DocumentService,
    pdf: &Path,
    ocr_raw_dir: &Path,
) -> Result<PathBuf, ApplicationError> {
    let content = tokio::fs::read(pdf)
        .await
        .map_err(|e| ApplicationError::io(pdf, e))?;
    info!("Processing {} via document service", pdf.display());

    let start = Instant::now();
    let raw = service.process_document(&content, PDF_MIME).await?;
    debug!("Document service answered in {:.1}s", start.elapsed().as_secs_f64());

    tokio::fs::create_dir_all(ocr_raw_dir)
        .await
        .map_err(|e| ApplicationError::io(ocr_raw_dir, e))?;
    let out = ocr_output_path(ocr_raw_dir, pdf);
    tokio::fs::write(&out, raw)
        .await
        .map_err(|e| ApplicationError::io(&out, e))?;
    info!("Completed {} in {:.1}s", pdf.display(), start.elapsed().as_secs_f64());
    Ok(out)
}

/// Read a persisted response back as an [`OcrDocument`].
pub async fn load_document(path: &Path) -> Result<OcrDocument, ApplicationError> {
    let unreadable = |detail: String| ApplicationError::OcrOutput {
        path: path.to_path_buf(),
        detail,
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| unreadable(e.to_string()))?;
    OcrDocument::from_json(&raw).map_err(|e| unreadable(e.to_string()))
}

// ── Batch mode ───────────────────────────────────────────────────────────

/// Outcome of [`process_batch`].
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// `(pdf, raw response path)` for every successful call.
    pub completed: Vec<(PathBuf, PathBuf)>,
    /// `(pdf, reason)` for every failed call.
    pub failed: Vec<(PathBuf, String)>,
}

/// Process `pdfs` one after another, pausing `poll_interval` between calls.
/// Failures are logged and skipped.
pub async fn process_batch(
    service: &dyn DocumentService,
    pdfs: &[PathBuf],
    ocr_raw_dir: &Path,
    poll_interval: Duration,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    let total = pdfs.len();
    for (idx, pdf) in pdfs.iter().enumerate() {
        info!("[batch] ({}/{}) {}", idx + 1, total, pdf.display());
        match invoke(service, pdf, ocr_raw_dir).await {
            Ok(out) => outcome.completed.push((pdf.clone(), out)),
            Err(e) => {
                error!("{}: {e}", pdf.display());
                outcome.failed.push((pdf.clone(), e.to_string()));
            }
        }
        if idx + 1 < total && !poll_interval.is_zero() {
            tokio::time::sleep(poll_interval).await;
        }
    }
    outcome
}
