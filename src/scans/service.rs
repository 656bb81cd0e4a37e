//! Scan service: a bounded request queue drained by a fixed pool of workers.

use std::io;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::registry::RunningScans;
use super::worker::{ScanDeps, ScanRequest, ScanSummary, run_scan};
use crate::config::ServiceConfig;
use crate::error::ScanError;

pub struct ScanService {
    deps: ScanDeps,
    registry: Arc<RunningScans>,
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<ScanRequest>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ScanService {
    /// Start `config.workers` worker tasks. Must be called inside a tokio runtime.
    pub fn new(deps: ScanDeps, config: &ServiceConfig) -> Arc<Self> {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let registry = Arc::new(RunningScans::new());

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&rx),
                    deps.clone(),
                    Arc::clone(&registry),
                ))
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), capacity, "Scan service started");

        Arc::new(Self {
            deps,
            registry,
            capacity,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    pub fn registry(&self) -> &Arc<RunningScans> {
        &self.registry
    }

    /// Enqueue a request without waiting for room.
    pub async fn queue(&self, request: ScanRequest) -> Result<(), ScanError> {
        let sender = self.sender.lock().await;
        let Some(tx) = sender.as_ref() else {
            return Err(ScanError::QueueClosed);
        };

        let scan_id = request.scan_id;
        tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ScanError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => ScanError::QueueClosed,
        })?;
        debug!(scan_id, "Scan request queued");
        Ok(())
    }

    /// Percentage for a running scan.
    pub fn progress(&self, scan_id: i64) -> Option<f64> {
        self.registry.percent(scan_id)
    }

    /// IDs of running scans, ascending.
    pub fn running(&self) -> Vec<i64> {
        self.registry.running()
    }

    /// Run a request on the caller's task, bypassing the queue.
    pub async fn run_now(&self, request: &ScanRequest) -> Result<ScanSummary, ScanError> {
        run_scan(&self.deps, &self.registry, request).await
    }

    /// Log text recorded for a scan.
    pub async fn logs(&self, scan_id: i64) -> io::Result<Option<String>> {
        self.deps.logs.read(scan_id).await
    }

    /// Stop accepting requests, let workers drain the queue, and wait for them.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Scan worker panicked");
            }
        }
        info!("Scan service stopped");
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<ScanRequest>>>,
    deps: ScanDeps,
    registry: Arc<RunningScans>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(request) = next else {
            break;
        };

        match run_scan(&deps, &registry, &request).await {
            Ok(summary) => info!(
                worker,
                scan_id = summary.scan_id,
                results = summary.results,
                failures = summary.failures,
                "Scan completed"
            ),
            Err(e) => error!(worker, scan_id = request.scan_id, error = %e, "Could not execute scan"),
        }
    }
    debug!(worker, "Scan worker exiting");
}
