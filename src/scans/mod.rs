//! Scan execution: per-scan context, worker pipeline, service and REST surface.

pub mod context;
pub mod logs;
pub mod materialize;
pub mod output;
pub mod registry;
pub mod routes;
pub mod service;
pub mod worker;

pub use context::{ScanContext, ScanState};
pub use registry::{Registration, RunningScans};
pub use service::ScanService;
pub use worker::{ScanDeps, ScanRequest, ScanSummary, run_scan};
