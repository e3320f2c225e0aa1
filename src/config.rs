//! Configuration types for an ingestion run.
//!
//! Every knob lives in [`IntakeConfig`], built via [`IntakeConfigBuilder`].
//! The directory layout is derived from one base directory so a deployment
//! only has to name where it lives; individual directories can still be
//! overridden.
//!
//! ```text
//! <base>/incoming/            scanned PDFs dropped here
//! <base>/work/app_<id>/       per-application scratch space
//! <base>/work/pdfs/           assembled application PDFs
//! <base>/work/ocr_raw/        raw document-service responses
//! <base>/work/archive/        sources of completed applications
//! <base>/results/drafts/      structured JSON drafts
//! <base>/results/reports/     human-readable PDF reports
//! <base>/local_db.json        the store
//! ```

use crate::error::IntakeError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default processor deployment the registration forms were trained on.
pub const DEFAULT_PROJECT_ID: &str = "ai-form-416805";
pub const DEFAULT_LOCATION: &str = "us";
pub const DEFAULT_PROCESSOR_ID: &str = "8c59dbf065df1fa2";

/// Footer markers printed on the registration form pages.
pub const DEFAULT_FOOTER_PATTERNS: &[&str] = &[
    "applicant acknowledgement slip",
    "acknowledgement slip",
    r"page\s*\d+\s*of\s*\d+",
];

/// Identity of the document-understanding processor every request targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorIdentity {
    pub project_id: String,
    /// Region of the processor, e.g. `us` or `eu`.
    pub location: String,
    pub processor_id: String,
}

impl Default for ProcessorIdentity {
    fn default() -> Self {
        Self {
            project_id: DEFAULT_PROJECT_ID.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            processor_id: DEFAULT_PROCESSOR_ID.to_string(),
        }
    }
}

impl ProcessorIdentity {
    /// Fully-qualified resource name sent with every request.
    pub fn resource_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/processors/{}",
            self.project_id, self.location, self.processor_id
        )
    }

    /// Regional REST endpoint, e.g. `https://us-documentai.googleapis.com/v1`.
    pub fn default_endpoint(&self) -> String {
        format!("https://{}-documentai.googleapis.com/v1", self.location)
    }
}

/// On-disk layout of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directories {
    pub incoming_dir: PathBuf,
    pub work_dir: PathBuf,
    pub pdfs_dir: PathBuf,
    pub ocr_raw_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub drafts_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub store_path: PathBuf,
}

impl Directories {
    /// Derive the standard layout under `base`.
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let work = base.join("work");
        Self {
            incoming_dir: base.join("incoming"),
            pdfs_dir: work.join("pdfs"),
            ocr_raw_dir: work.join("ocr_raw"),
            archive_dir: work.join("archive"),
            work_dir: work,
            drafts_dir: base.join("results").join("drafts"),
            reports_dir: base.join("results").join("reports"),
            store_path: base.join("local_db.json"),
        }
    }

    /// Scratch directory owned by one application.
    pub fn scratch_dir(&self, app_id: u64) -> PathBuf {
        self.work_dir.join(format!("app_{app_id}"))
    }

    fn all(&self) -> [&Path; 7] {
        [
            &self.incoming_dir,
            &self.work_dir,
            &self.pdfs_dir,
            &self.ocr_raw_dir,
            &self.archive_dir,
            &self.drafts_dir,
            &self.reports_dir,
        ]
    }
}

/// Configuration for an ingestion run.
#[derive(Clone)]
pub struct IntakeConfig {
    pub dirs: Directories,

    /// Number of application pipelines allowed to run at once. Default: 1.
    ///
    /// Each worker holds one application end to end, including the full
    /// duration of its OCR call.
    pub workers: usize,

    /// Processor every OCR request targets.
    pub processor: ProcessorIdentity,

    /// REST endpoint override. `None` uses the processor's regional endpoint.
    pub endpoint: Option<String>,

    /// OAuth bearer token for the document service.
    pub access_token: Option<String>,

    /// Delay between consecutive calls in batch OCR mode, in seconds. Default: 3.
    pub poll_interval_secs: u64,

    /// Maximum wait for one document-service call, in seconds. Default: 600.
    pub timeout_secs: u64,

    /// Zoom factor applied when rasterising PDF pages. Default: 2.0.
    pub render_scale: f32,

    /// Fields whose confidence falls below this are listed in provenance
    /// for human adjudication. Default: 0.75.
    pub confidence_threshold: f64,

    /// Regexes recognising form footers (case-insensitive).
    pub footer_patterns: Vec<String>,

    /// Optional per-application progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            dirs: Directories::under("."),
            workers: 1,
            processor: ProcessorIdentity::default(),
            endpoint: None,
            access_token: None,
            poll_interval_secs: 3,
            timeout_secs: 600,
            render_scale: 2.0,
            confidence_threshold: 0.75,
            footer_patterns: DEFAULT_FOOTER_PATTERNS.iter().map(|s| s.to_string()).collect(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IntakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntakeConfig")
            .field("dirs", &self.dirs)
            .field("workers", &self.workers)
            .field("processor", &self.processor)
            .field("endpoint", &self.endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("timeout_secs", &self.timeout_secs)
            .field("render_scale", &self.render_scale)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("footer_patterns", &self.footer_patterns)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RunProgressCallback>"),
            )
            .finish()
    }
}

impl IntakeConfig {
    /// Create a new builder rooted at the current directory.
    pub fn builder() -> IntakeConfigBuilder {
        IntakeConfigBuilder {
            config: Self::default(),
        }
    }

    /// Endpoint the OCR client posts to.
    pub fn service_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.processor.default_endpoint())
    }

    /// Create every configured directory that does not exist yet.
    pub fn ensure_directories(&self) -> Result<(), IntakeError> {
        for dir in self.dirs.all() {
            std::fs::create_dir_all(dir).map_err(|e| IntakeError::Directory {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        if let Some(parent) = self.dirs.store_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| IntakeError::Directory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }
}

/// Builder for [`IntakeConfig`].
#[derive(Debug)]
pub struct IntakeConfigBuilder {
    config: IntakeConfig,
}

impl IntakeConfigBuilder {
    /// Re-derive every directory under `base`. Call before individual overrides.
    pub fn base_dir(mut self, base: impl AsRef<Path>) -> Self {
        self.config.dirs = Directories::under(base);
        self
    }

    pub fn incoming_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.dirs.incoming_dir = dir.into();
        self
    }

    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.dirs.archive_dir = dir.into();
        self
    }

    pub fn drafts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.dirs.drafts_dir = dir.into();
        self
    }

    pub fn reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.dirs.reports_dir = dir.into();
        self
    }

    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dirs.store_path = path.into();
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn processor(mut self, identity: ProcessorIdentity) -> Self {
        self.config.processor = identity;
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = Some(url.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.config.access_token = Some(token.into());
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale;
        self
    }

    pub fn confidence_threshold(mut self, t: f64) -> Self {
        self.config.confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn footer_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.footer_patterns = patterns;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IntakeConfig, IntakeError> {
        let c = &self.config;
        if c.workers == 0 {
            return Err(IntakeError::InvalidConfig("Workers must be ≥ 1".into()));
        }
        if !(0.5..=8.0).contains(&c.render_scale) {
            return Err(IntakeError::InvalidConfig(format!(
                "Render scale must be 0.5–8.0, got {}",
                c.render_scale
            )));
        }
        if c.timeout_secs == 0 {
            return Err(IntakeError::InvalidConfig(
                "Service timeout must be at least one second".into(),
            ));
        }
        for pattern in &c.footer_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                IntakeError::InvalidConfig(format!("Invalid footer pattern '{pattern}': {e}"))
            })?;
        }
        if c.dirs.incoming_dir == c.dirs.archive_dir {
            return Err(IntakeError::InvalidConfig(
                "Archive directory must differ from the ingestion directory".into(),
            ));
        }
        Ok(self.config)
    }
}
