//! Per-scan execution context.
//!
//! A `ScanContext` owns every mutable resource of one running scan: the
//! buffered log, the execution options bundle, the loaded template store,
//! the engine, and the scan's entry in [`RunningScans`]. Closing it flushes
//! the log, closes the sink, then drops the registry entry. Close runs once,
//! either explicitly or from `Drop`.

use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{
    Catalog, Engine, ExecuterOptions, ExecutionBackend, InputProvider, Template, TemplateStore,
};
use crate::error::ScanError;
use crate::progress::{ProgressTracker, StatsTracker};
use crate::ratelimit::select_limiter;
use crate::scans::logs::LogStore;
use crate::scans::output::{LogOutputWriter, SharedLog};
use crate::scans::registry::{Registration, RunningScans};
use crate::settings::TypedOptions;

/// Lifecycle of a scan context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// Registered, log open, options bundle skeleton built.
    Created,
    /// Workflow loader, template store and engine are ready.
    Populated,
    /// The engine is running.
    Executing,
    /// Resources released. Terminal.
    Closed,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Populated => "populated",
            Self::Executing => "executing",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Keep setup failures inside the setup error kind whatever the backend raised.
fn as_setup_error(err: ScanError) -> ScanError {
    match err {
        ScanError::Setup(_) => err,
        other => ScanError::Setup(other.to_string()),
    }
}

pub struct ScanContext {
    scan_id: i64,
    state: ScanState,
    log: SharedLog,
    output: Arc<LogOutputWriter>,
    executer_opts: ExecuterOptions,
    store: Option<Box<dyn TemplateStore>>,
    engine: Option<Box<dyn Engine>>,
    registration: Registration,
}

impl ScanContext {
    /// Register the scan, open its log and build the options bundle.
    ///
    /// The registry entry exists from the first line on; if opening the log
    /// fails the entry is removed again before the error is returned.
    pub async fn create(
        scan_id: i64,
        options: TypedOptions,
        logs: &dyn LogStore,
        registry: &Arc<RunningScans>,
    ) -> Result<Self, ScanError> {
        let tracker = Arc::new(StatsTracker::new());
        let registration = registry.track(scan_id, tracker.clone());

        let sink = logs.open(scan_id).await?;
        let log: SharedLog = Arc::new(Mutex::new(BufWriter::new(sink)));
        let output = Arc::new(LogOutputWriter::new(scan_id, Arc::clone(&log)));

        let rate_limiter = Arc::new(select_limiter(&options));
        let catalog = Arc::new(Catalog::new(options.templates_directory.clone()));

        info!(
            scan_id,
            rate_limit = ?rate_limiter.limit(),
            templates_directory = %catalog.root().display(),
            "Scan context created"
        );

        let executer_opts = ExecuterOptions {
            scan_id,
            options: Arc::new(options),
            output: output.clone(),
            progress: tracker,
            catalog,
            rate_limiter,
            workflow_loader: None,
        };

        Ok(Self {
            scan_id,
            state: ScanState::Created,
            log,
            output,
            executer_opts,
            store: None,
            engine: None,
            registration,
        })
    }

    pub fn scan_id(&self) -> i64 {
        self.scan_id
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn options(&self) -> &TypedOptions {
        &self.executer_opts.options
    }

    pub fn executer_options(&self) -> &ExecuterOptions {
        &self.executer_opts
    }

    pub fn progress(&self) -> &Arc<dyn ProgressTracker> {
        &self.executer_opts.progress
    }

    pub fn output(&self) -> &LogOutputWriter {
        &self.output
    }

    fn expect_state(&self, expected: ScanState, action: &str) -> Result<(), ScanError> {
        if self.state != expected {
            return Err(ScanError::InvalidState {
                id: self.scan_id,
                state: self.state.to_string(),
                action: action.to_string(),
            });
        }
        Ok(())
    }

    /// Build the workflow loader, load the template store and build the engine.
    pub async fn populate(&mut self, backend: &dyn ExecutionBackend) -> Result<(), ScanError> {
        self.expect_state(ScanState::Created, "populate")?;

        let loader = backend
            .workflow_loader(&self.executer_opts)
            .map_err(as_setup_error)?;
        self.executer_opts.workflow_loader = Some(loader);

        let mut store = backend
            .template_store(&self.executer_opts)
            .map_err(as_setup_error)?;
        store.load().await.map_err(as_setup_error)?;

        debug!(
            scan_id = self.scan_id,
            templates = store.templates().len(),
            workflows = store.workflows().len(),
            "Template store loaded"
        );

        self.engine = Some(backend.engine(&self.executer_opts));
        self.store = Some(store);
        self.state = ScanState::Populated;
        Ok(())
    }

    /// Loaded templates followed by loaded workflows.
    pub fn execution_list(&self) -> Result<Vec<Template>, ScanError> {
        self.expect_state(ScanState::Populated, "list templates")?;
        let store = self.store.as_ref().ok_or_else(|| ScanError::InvalidState {
            id: self.scan_id,
            state: self.state.to_string(),
            action: "list templates".to_string(),
        })?;
        Ok(store
            .templates()
            .iter()
            .chain(store.workflows())
            .cloned()
            .collect())
    }

    /// Hand the templates and targets to the engine and wait for it.
    pub async fn execute(
        &mut self,
        templates: &[Template],
        input: &dyn InputProvider,
    ) -> Result<(), ScanError> {
        self.expect_state(ScanState::Populated, "execute")?;
        let Some(engine) = self.engine.as_ref() else {
            return Err(ScanError::InvalidState {
                id: self.scan_id,
                state: self.state.to_string(),
                action: "execute".to_string(),
            });
        };

        self.state = ScanState::Executing;
        engine.execute(templates, input).await;
        Ok(())
    }

    /// Flush the log, close the sink, unregister. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state == ScanState::Closed {
            return;
        }

        {
            let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = log.flush() {
                warn!(scan_id = self.scan_id, error = %e, "Failed to flush scan log");
            }
            if let Err(e) = log.get_mut().close() {
                warn!(scan_id = self.scan_id, error = %e, "Failed to close scan log");
            }
        }
        self.registration.release();

        self.engine = None;
        self.store = None;
        self.state = ScanState::Closed;
        info!(scan_id = self.scan_id, "Closed scan resources");
    }
}

impl Drop for ScanContext {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanContext")
            .field("scan_id", &self.scan_id)
            .field("state", &self.state)
            .field("executer_opts", &self.executer_opts)
            .finish_non_exhaustive()
    }
}
