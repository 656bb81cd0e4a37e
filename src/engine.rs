//! Execution engine seam.
//!
//! The scan worker never matches templates or speaks network protocols
//! itself. It assembles an [`ExecuterOptions`] bundle and hands it to an
//! [`ExecutionBackend`], which builds the workflow loader, the template store
//! and the engine that actually runs the scan.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ScanError;
use crate::progress::ProgressTracker;
use crate::ratelimit::RateLimiter;
use crate::scans::output::OutputWriter;
use crate::settings::TypedOptions;

/// Whether a loaded file is a plain template or a workflow of templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Template,
    Workflow,
}

/// A loaded template or workflow, as far as the worker needs to know it.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: String,
    pub path: PathBuf,
    pub name: Option<String>,
    pub severity: Option<String>,
    pub kind: TemplateKind,
}

/// Resolves template identifiers against a templates directory.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a template identifier relative to the root.
    pub fn resolve(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

/// Targets for one scan. The count must be known before execution starts.
pub trait InputProvider: Send + Sync {
    fn count(&self) -> u64;

    fn targets(&self) -> Box<dyn Iterator<Item = &str> + '_>;
}

/// Resolves the files a template store should load.
pub trait WorkflowLoader: Send + Sync {
    fn template_paths(&self, templates: &[String]) -> Result<Vec<PathBuf>, ScanError>;

    fn workflow_paths(&self, workflows: &[String]) -> Result<Vec<PathBuf>, ScanError>;
}

/// Holds the templates and workflows loaded for a scan.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn load(&mut self) -> Result<(), ScanError>;

    fn templates(&self) -> &[Template];

    fn workflows(&self) -> &[Template];
}

/// Runs templates against targets.
///
/// Per-task failures go to the output writer; `execute` itself never fails.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn execute(&self, templates: &[Template], input: &dyn InputProvider);
}

/// Builds the engine-side pieces for one scan.
pub trait ExecutionBackend: Send + Sync {
    fn workflow_loader(&self, opts: &ExecuterOptions) -> Result<Arc<dyn WorkflowLoader>, ScanError>;

    fn template_store(&self, opts: &ExecuterOptions) -> Result<Box<dyn TemplateStore>, ScanError>;

    fn engine(&self, opts: &ExecuterOptions) -> Box<dyn Engine>;
}

/// Everything the engine needs for one scan.
#[derive(Clone)]
pub struct ExecuterOptions {
    pub scan_id: i64,
    pub options: Arc<TypedOptions>,
    pub output: Arc<dyn OutputWriter>,
    pub progress: Arc<dyn ProgressTracker>,
    pub catalog: Arc<Catalog>,
    pub rate_limiter: Arc<RateLimiter>,
    /// Set while the scan context is populated.
    pub workflow_loader: Option<Arc<dyn WorkflowLoader>>,
}

impl fmt::Debug for ExecuterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuterOptions")
            .field("scan_id", &self.scan_id)
            .field("catalog", &self.catalog)
            .field("rate_limit", &self.rate_limiter.limit())
            .field("workflow_loader", &self.workflow_loader.is_some())
            .finish_non_exhaustive()
    }
}
