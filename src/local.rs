//! Built-in execution backend.
//!
//! Loads template headers from the materialized working area and runs a
//! dry-run engine that records one `planned` result per template and target.
//! It sends no traffic; a real engine plugs in through [`ExecutionBackend`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::warn;

use crate::engine::{
    Catalog, Engine, ExecuterOptions, ExecutionBackend, InputProvider, Template, TemplateKind,
    TemplateStore, WorkflowLoader,
};
use crate::error::ScanError;
use crate::scans::output::ResultEvent;
use crate::settings::TypedOptions;

/// Backend wiring [`LocalWorkflowLoader`], [`DiskTemplateStore`] and [`DryRunEngine`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalBackend;

impl ExecutionBackend for LocalBackend {
    fn workflow_loader(&self, opts: &ExecuterOptions) -> Result<Arc<dyn WorkflowLoader>, ScanError> {
        Ok(Arc::new(LocalWorkflowLoader::new(Arc::clone(&opts.catalog))))
    }

    fn template_store(&self, opts: &ExecuterOptions) -> Result<Box<dyn TemplateStore>, ScanError> {
        let loader = opts
            .workflow_loader
            .clone()
            .ok_or_else(|| ScanError::Setup("workflow loader not initialised".to_string()))?;
        Ok(Box::new(DiskTemplateStore::new(Arc::clone(&opts.options), loader)))
    }

    fn engine(&self, opts: &ExecuterOptions) -> Box<dyn Engine> {
        Box::new(DryRunEngine::new(opts.clone()))
    }
}

/// Resolves template identifiers to files under the catalog root.
#[derive(Debug)]
pub struct LocalWorkflowLoader {
    catalog: Arc<Catalog>,
}

impl LocalWorkflowLoader {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    fn resolve_all(&self, ids: &[String]) -> Result<Vec<PathBuf>, ScanError> {
        ids.iter()
            .map(|id| {
                let path = self.catalog.resolve(id);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(ScanError::Setup(format!(
                        "template {id} not found under {}",
                        self.catalog.root().display()
                    )))
                }
            })
            .collect()
    }
}

impl WorkflowLoader for LocalWorkflowLoader {
    fn template_paths(&self, templates: &[String]) -> Result<Vec<PathBuf>, ScanError> {
        self.resolve_all(templates)
    }

    fn workflow_paths(&self, workflows: &[String]) -> Result<Vec<PathBuf>, ScanError> {
        self.resolve_all(workflows)
    }
}

#[derive(Debug, Deserialize)]
struct TemplateHeader {
    id: String,
    #[serde(default)]
    info: TemplateInfo,
}

#[derive(Debug, Default, Deserialize)]
struct TemplateInfo {
    name: Option<String>,
    severity: Option<String>,
    /// Comma-separated.
    tags: Option<String>,
}

impl TemplateInfo {
    fn tags(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Template store reading YAML headers from disk.
///
/// An unreadable or undecodable file fails the whole load.
pub struct DiskTemplateStore {
    options: Arc<TypedOptions>,
    loader: Arc<dyn WorkflowLoader>,
    templates: Vec<Template>,
    workflows: Vec<Template>,
}

impl DiskTemplateStore {
    pub fn new(options: Arc<TypedOptions>, loader: Arc<dyn WorkflowLoader>) -> Self {
        Self {
            options,
            loader,
            templates: Vec::new(),
            workflows: Vec::new(),
        }
    }

    /// Severity and tag filters from the scan options.
    fn selected(&self, info: &TemplateInfo) -> bool {
        let options = &self.options;
        if !options.severities.is_empty() {
            let severity = info.severity.as_deref().unwrap_or_default();
            if !options
                .severities
                .iter()
                .any(|s| s.eq_ignore_ascii_case(severity))
            {
                return false;
            }
        }

        let tags = info.tags();
        let has = |wanted: &String| tags.iter().any(|t| t.eq_ignore_ascii_case(wanted));
        if !options.tags.is_empty() && !options.tags.iter().any(has) {
            return false;
        }
        !options.exclude_tags.iter().any(has)
    }
}

async fn read_header(path: &Path) -> Result<TemplateHeader, ScanError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ScanError::Setup(format!("read {}: {e}", path.display())))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| ScanError::Setup(format!("parse {}: {e}", path.display())))
}

#[async_trait]
impl TemplateStore for DiskTemplateStore {
    async fn load(&mut self) -> Result<(), ScanError> {
        let template_paths = self.loader.template_paths(&self.options.templates)?;
        let workflow_paths = self.loader.workflow_paths(&self.options.workflows)?;

        let mut templates = Vec::with_capacity(template_paths.len());
        for path in template_paths {
            let header = read_header(&path).await?;
            if !self.selected(&header.info) {
                continue;
            }
            templates.push(Template {
                id: header.id,
                path,
                name: header.info.name,
                severity: header.info.severity,
                kind: TemplateKind::Template,
            });
        }

        let mut workflows = Vec::with_capacity(workflow_paths.len());
        for path in workflow_paths {
            let header = read_header(&path).await?;
            workflows.push(Template {
                id: header.id,
                path,
                name: header.info.name,
                severity: header.info.severity,
                kind: TemplateKind::Workflow,
            });
        }

        self.templates = templates;
        self.workflows = workflows;
        Ok(())
    }

    fn templates(&self) -> &[Template] {
        &self.templates
    }

    fn workflows(&self) -> &[Template] {
        &self.workflows
    }
}

/// Walks every template × target pair under the scan's rate limit and records
/// it as a `planned` result.
pub struct DryRunEngine {
    opts: ExecuterOptions,
}

impl DryRunEngine {
    pub fn new(opts: ExecuterOptions) -> Self {
        Self { opts }
    }

    async fn run_one(&self, template: &Template, target: &str) {
        self.opts.rate_limiter.take().await;

        let mut event = ResultEvent::new(&template.id, target, "planned");
        event.template_name = template.name.clone();
        event.severity = template.severity.clone();

        match self.opts.output.write(&event) {
            Ok(()) => self.opts.progress.increment_requests(),
            Err(e) => {
                warn!(
                    scan_id = self.opts.scan_id,
                    template = %template.id,
                    target,
                    error = %e,
                    "Failed to record result"
                );
                self.opts.progress.increment_errors();
            }
        }
    }
}

#[async_trait]
impl Engine for DryRunEngine {
    async fn execute(&self, templates: &[Template], input: &dyn InputProvider) {
        let targets: Vec<String> = input.targets().map(str::to_string).collect();
        let mut pairs: Vec<(&Template, &str)> =
            Vec::with_capacity(templates.len() * targets.len());
        for template in templates {
            for target in &targets {
                pairs.push((template, target.as_str()));
            }
        }
        let concurrency = self.opts.options.template_threads.max(1);

        futures::stream::iter(pairs)
            .for_each_concurrent(concurrency, |(template, target)| self.run_one(template, target))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufWriter;
    use std::sync::Mutex;

    use super::*;
    use crate::progress::{PercentSource, ProgressTracker, StatsTracker};
    use crate::ratelimit::RateLimiter;
    use crate::scans::logs::{FileLogStore, LogStore};
    use crate::scans::materialize::ListInput;
    use crate::scans::output::{LogOutputWriter, SharedLog};
    use crate::settings::ScanSettings;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    async fn opts_for(
        dir: &Path,
        extra_yaml: &str,
        logs: &FileLogStore,
    ) -> (ExecuterOptions, Arc<StatsTracker>) {
        let mut options = ScanSettings::from_yaml(
            "t",
            &format!("rate-limit: 0\nrate-limit-minute: 0\n{extra_yaml}"),
        )
        .unwrap()
        .to_options();
        options.templates_directory = dir.to_path_buf();
        options.templates = vec!["http/a.yaml".to_string(), "http/b.yaml".to_string()];
        options.workflows = vec!["workflows/w.yaml".to_string()];

        let log: SharedLog = Arc::new(Mutex::new(BufWriter::new(logs.open(1).await.unwrap())));
        let tracker = Arc::new(StatsTracker::new());
        let opts = ExecuterOptions {
            scan_id: 1,
            options: Arc::new(options),
            output: Arc::new(LogOutputWriter::new(1, log)),
            progress: tracker.clone(),
            catalog: Arc::new(Catalog::new(dir)),
            rate_limiter: Arc::new(RateLimiter::unbounded()),
            workflow_loader: None,
        };
        (opts, tracker)
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "http/a.yaml",
            "id: a\ninfo:\n  name: A\n  severity: high\n  tags: cve,rce\n",
        );
        write(
            dir.path(),
            "http/b.yaml",
            "id: b\ninfo:\n  name: B\n  severity: info\n  tags: tech\n",
        );
        write(dir.path(), "workflows/w.yaml", "id: w\ninfo:\n  name: W\n");
        dir
    }

    async fn loaded(opts: &mut ExecuterOptions) -> Result<Box<dyn TemplateStore>, ScanError> {
        let backend = LocalBackend;
        opts.workflow_loader = Some(backend.workflow_loader(opts)?);
        let mut store = backend.template_store(opts)?;
        store.load().await?;
        Ok(store)
    }

    #[tokio::test]
    async fn loads_headers() {
        let dir = fixture();
        let logs = FileLogStore::new(dir.path().join("logs"));
        let (mut opts, _) = opts_for(dir.path(), "", &logs).await;

        let store = loaded(&mut opts).await.unwrap();
        let ids: Vec<&str> = store.templates().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.workflows()[0].kind, TemplateKind::Workflow);
        assert_eq!(store.templates()[0].severity.as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn filters_by_severity_and_tags() {
        let dir = fixture();
        let logs = FileLogStore::new(dir.path().join("logs"));

        let (mut opts, _) = opts_for(dir.path(), "severities: [HIGH]\n", &logs).await;
        let store = loaded(&mut opts).await.unwrap();
        assert_eq!(store.templates().len(), 1);
        assert_eq!(store.templates()[0].id, "a");

        let (mut opts, _) = opts_for(dir.path(), "exclude-tags: [rce]\n", &logs).await;
        let store = loaded(&mut opts).await.unwrap();
        assert_eq!(store.templates().len(), 1);
        assert_eq!(store.templates()[0].id, "b");
    }

    #[tokio::test]
    async fn invalid_template_fails_load() {
        let dir = fixture();
        write(dir.path(), "http/b.yaml", "info: [not a header");
        let logs = FileLogStore::new(dir.path().join("logs"));
        let (mut opts, _) = opts_for(dir.path(), "", &logs).await;

        let err = loaded(&mut opts).await.err().unwrap();
        assert!(matches!(err, ScanError::Setup(ref msg) if msg.contains("b.yaml")));
    }

    #[tokio::test]
    async fn missing_template_fails_loader() {
        let dir = fixture();
        std::fs::remove_file(dir.path().join("workflows/w.yaml")).unwrap();
        let logs = FileLogStore::new(dir.path().join("logs"));
        let (mut opts, _) = opts_for(dir.path(), "", &logs).await;

        let err = loaded(&mut opts).await.err().unwrap();
        assert!(matches!(err, ScanError::Setup(ref msg) if msg.contains("workflows/w.yaml")));
    }

    #[tokio::test]
    async fn dry_run_covers_every_pair() {
        let dir = fixture();
        let logs = FileLogStore::new(dir.path().join("logs"));
        let (mut opts, tracker) = opts_for(dir.path(), "template-threads: 2\n", &logs).await;
        let store = loaded(&mut opts).await.unwrap();

        let list: Vec<Template> = store
            .templates()
            .iter()
            .chain(store.workflows())
            .cloned()
            .collect();
        let input = ListInput::new(["https://a.example", "https://b.example"]);
        tracker.init(2, list.len(), 2 * list.len() as u64);

        LocalBackend.engine(&opts).execute(&list, &input).await;

        let metrics = tracker.metrics();
        assert_eq!(metrics["requests"], 6);
        assert_eq!(tracker.percent(), 100.0);
    }
}
