//! Preparing request templates and targets for execution.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::fs;

use crate::engine::InputProvider;
use crate::error::ScanError;

/// Directory prefix marking a template reference as a workflow.
const WORKFLOWS_PREFIX: &str = "workflows";

/// Templates copied into a scan's working area.
///
/// The working area is deleted when this value is dropped.
#[derive(Debug)]
pub struct MaterializedTemplates {
    pub workdir: TempDir,
    /// Template paths relative to `workdir`.
    pub templates: Vec<String>,
    /// Workflow paths relative to `workdir`.
    pub workflows: Vec<String>,
}

impl MaterializedTemplates {
    pub fn path(&self) -> &Path {
        self.workdir.path()
    }
}

/// Turns request references into something the engine can consume.
#[async_trait]
pub trait Materializer: Send + Sync {
    async fn templates(&self, refs: &[String]) -> Result<MaterializedTemplates, ScanError>;

    async fn input(&self, targets: &[String]) -> Result<Box<dyn InputProvider>, ScanError>;
}

/// Copies referenced templates out of a source tree into a fresh temporary
/// directory, keeping their relative layout.
#[derive(Debug, Clone)]
pub struct DirectoryMaterializer {
    source: PathBuf,
}

impl DirectoryMaterializer {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Reject references that would escape the source tree.
fn checked_relative(reference: &str) -> Result<&Path, ScanError> {
    let path = Path::new(reference);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if reference.is_empty() || escapes {
        return Err(ScanError::Materialization(format!(
            "invalid template reference: {reference:?}"
        )));
    }
    Ok(path)
}

fn is_workflow(path: &Path) -> bool {
    path.components()
        .find(|c| !matches!(c, Component::CurDir))
        .is_some_and(|c| c.as_os_str() == WORKFLOWS_PREFIX)
}

#[async_trait]
impl Materializer for DirectoryMaterializer {
    async fn templates(&self, refs: &[String]) -> Result<MaterializedTemplates, ScanError> {
        let workdir = tempfile::Builder::new()
            .prefix("scan-templates-")
            .tempdir()
            .map_err(|e| ScanError::Materialization(format!("working directory: {e}")))?;

        let mut seen = HashSet::new();
        let mut templates = Vec::new();
        let mut workflows = Vec::new();

        for reference in refs.iter().map(|r| r.trim()) {
            if !seen.insert(reference) {
                continue;
            }
            let relative = checked_relative(reference)?;
            let source = self.source.join(relative);
            let dest = workdir.path().join(relative);

            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    ScanError::Materialization(format!("template {reference}: {e}"))
                })?;
            }
            fs::copy(&source, &dest).await.map_err(|e| {
                ScanError::Materialization(format!("template {reference}: {e}"))
            })?;

            if is_workflow(relative) {
                workflows.push(reference.to_string());
            } else {
                templates.push(reference.to_string());
            }
        }

        if templates.is_empty() && workflows.is_empty() {
            return Err(ScanError::Materialization(
                "request references no templates".to_string(),
            ));
        }

        tracing::debug!(
            workdir = %workdir.path().display(),
            templates = templates.len(),
            workflows = workflows.len(),
            "Templates materialized"
        );

        Ok(MaterializedTemplates {
            workdir,
            templates,
            workflows,
        })
    }

    async fn input(&self, targets: &[String]) -> Result<Box<dyn InputProvider>, ScanError> {
        let input = ListInput::new(targets.iter().map(String::as_str));
        if input.count() == 0 {
            return Err(ScanError::Materialization(
                "request contains no targets".to_string(),
            ));
        }
        Ok(Box::new(input))
    }
}

/// In-memory target list: trimmed, blanks dropped, duplicates removed with
/// first-seen order kept.
#[derive(Debug, Clone, Default)]
pub struct ListInput {
    targets: Vec<String>,
}

impl ListInput {
    pub fn new<'a>(targets: impl IntoIterator<Item = &'a str>) -> Self {
        let mut seen = HashSet::new();
        let targets = targets
            .into_iter()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(*t))
            .map(str::to_string)
            .collect();
        Self { targets }
    }
}

impl InputProvider for ListInput {
    fn count(&self) -> u64 {
        self.targets.len() as u64
    }

    fn targets(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.targets.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("http")).unwrap();
        std::fs::create_dir_all(dir.path().join("workflows")).unwrap();
        std::fs::write(dir.path().join("http/title.yaml"), "id: title\n").unwrap();
        std::fs::write(dir.path().join("http/tech.yaml"), "id: tech\n").unwrap();
        std::fs::write(dir.path().join("workflows/wp.yaml"), "id: wp\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn copies_and_classifies() {
        let source = source_tree();
        let materializer = DirectoryMaterializer::new(source.path());

        let refs = vec![
            "http/title.yaml".to_string(),
            "workflows/wp.yaml".to_string(),
            "http/title.yaml".to_string(),
        ];
        let materialized = materializer.templates(&refs).await.unwrap();

        assert_eq!(materialized.templates, vec!["http/title.yaml".to_string()]);
        assert_eq!(materialized.workflows, vec!["workflows/wp.yaml".to_string()]);
        assert!(materialized.path().join("http/title.yaml").is_file());
        assert!(materialized.path().join("workflows/wp.yaml").is_file());
    }

    #[tokio::test]
    async fn working_area_removed_on_drop() {
        let source = source_tree();
        let materializer = DirectoryMaterializer::new(source.path());
        let materialized = materializer
            .templates(&["http/tech.yaml".to_string()])
            .await
            .unwrap();
        let path = materialized.path().to_path_buf();
        assert!(path.exists());

        drop(materialized);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_template_fails() {
        let source = source_tree();
        let materializer = DirectoryMaterializer::new(source.path());
        let err = materializer
            .templates(&["http/nope.yaml".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Materialization(ref msg) if msg.contains("nope")));
    }

    #[tokio::test]
    async fn unwritable_working_area_is_a_materialization_error() {
        let source = source_tree();
        let materializer = DirectoryMaterializer::new(source.path());

        // The second reference needs a directory where the first put a file.
        let refs = vec![
            "http/title.yaml".to_string(),
            "http/title.yaml/inner.yaml".to_string(),
        ];
        let err = materializer.templates(&refs).await.unwrap_err();
        assert!(
            matches!(err, ScanError::Materialization(ref msg) if msg.contains("inner.yaml")),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn escaping_reference_rejected() {
        let source = source_tree();
        let materializer = DirectoryMaterializer::new(source.path());
        for bad in ["../etc/passwd", "/etc/passwd", ""] {
            let err = materializer.templates(&[bad.to_string()]).await.unwrap_err();
            assert!(matches!(err, ScanError::Materialization(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn input_dedups_and_counts() {
        let materializer = DirectoryMaterializer::new(".");
        let targets = vec![
            " https://a.example ".to_string(),
            "https://b.example".to_string(),
            "".to_string(),
            "https://a.example".to_string(),
        ];
        let input = materializer.input(&targets).await.unwrap();
        assert_eq!(input.count(), 2);
        assert_eq!(
            input.targets().collect::<Vec<_>>(),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[tokio::test]
    async fn empty_input_fails() {
        let materializer = DirectoryMaterializer::new(".");
        let err = materializer.input(&[" ".to_string()]).await.err().unwrap();
        assert!(matches!(err, ScanError::Materialization(_)));
    }
}
