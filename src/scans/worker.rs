//! Scan worker: runs one scan request from profile lookup to cleanup.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::engine::ExecutionBackend;
use crate::error::ScanError;
use crate::scans::context::ScanContext;
use crate::scans::logs::LogStore;
use crate::scans::materialize::Materializer;
use crate::scans::registry::RunningScans;
use crate::settings::resolve_options;
use crate::store::SettingsStore;

/// A request to scan `targets` with `templates` under the `config` profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub scan_id: i64,
    pub config: String,
    pub templates: Vec<String>,
    pub targets: Vec<String>,
}

/// What a finished scan reports back.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub scan_id: i64,
    pub templates: usize,
    pub targets: u64,
    pub results: u64,
    pub failures: u64,
    pub metrics: BTreeMap<String, Value>,
}

/// Collaborators shared by every scan worker.
#[derive(Clone)]
pub struct ScanDeps {
    pub settings: Arc<dyn SettingsStore>,
    pub logs: Arc<dyn LogStore>,
    pub materializer: Arc<dyn Materializer>,
    pub backend: Arc<dyn ExecutionBackend>,
}

/// Execute one scan request.
///
/// Steps run strictly in order and the first failure ends the scan. The
/// working area and the scan context are guards: whichever of them exist are
/// released on every return path, context first.
pub async fn run_scan(
    deps: &ScanDeps,
    registry: &Arc<RunningScans>,
    req: &ScanRequest,
) -> Result<ScanSummary, ScanError> {
    let scan_id = req.scan_id;
    info!(scan_id, "Got new scan request");

    let mut options = resolve_options(deps.settings.as_ref(), &req.config).await?;
    info!(scan_id, config = %req.config, "Loaded settings");

    let materialized = deps.materializer.templates(&req.templates).await?;
    info!(
        scan_id,
        templates = materialized.templates.len(),
        workflows = materialized.workflows.len(),
        "Loaded templates and workflows from request"
    );

    options.templates_directory = materialized.path().to_path_buf();
    options.templates = materialized.templates.clone();
    options.workflows = materialized.workflows.clone();

    let mut ctx = ScanContext::create(scan_id, options, deps.logs.as_ref(), registry).await?;
    ctx.populate(deps.backend.as_ref()).await?;

    let execution_list = ctx.execution_list()?;
    info!(scan_id, count = execution_list.len(), "Total loaded templates");

    let input = deps.materializer.input(&req.targets).await?;
    let hosts = input.count();
    info!(scan_id, count = hosts, "Total loaded inputs");

    ctx.progress().init(
        hosts,
        execution_list.len(),
        hosts * execution_list.len() as u64,
    );
    ctx.execute(&execution_list, input.as_ref()).await?;
    info!(scan_id, "Finished scan");

    let metrics = ctx.progress().metrics();
    for (name, value) in &metrics {
        info!(scan_id, metric = %name, %value, "Scan metric");
    }

    let summary = ScanSummary {
        scan_id,
        templates: execution_list.len(),
        targets: hosts,
        results: ctx.output().results(),
        failures: ctx.output().failures(),
        metrics,
    };

    ctx.close();
    drop(materialized);
    Ok(summary)
}
