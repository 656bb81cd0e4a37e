use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;

use scan_runner::config::ServiceConfig;
use scan_runner::local::LocalBackend;
use scan_runner::scans::logs::FileLogStore;
use scan_runner::scans::materialize::DirectoryMaterializer;
use scan_runner::scans::routes::scan_routes;
use scan_runner::scans::{ScanDeps, ScanRequest, ScanService};
use scan_runner::store::{LibSqlBackend, SettingsStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env().context("invalid service configuration")?;

    eprintln!("🛰  Scan Runner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Templates: {}", config.templates_dir.display());
    eprintln!("   Logs: {}", config.logs_dir.display());
    eprintln!("   Workers: {} (queue {})", config.workers, config.queue_capacity);

    // ── Database ─────────────────────────────────────────────────────────
    let db = LibSqlBackend::new_local(&config.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;
    let profiles = db.list_settings().await?;
    eprintln!("   Profiles: {}", profiles.len());

    let deps = ScanDeps {
        settings: Arc::new(db),
        logs: Arc::new(FileLogStore::new(&config.logs_dir)),
        materializer: Arc::new(DirectoryMaterializer::new(&config.templates_dir)),
        backend: Arc::new(LocalBackend),
    };
    let service = ScanService::new(deps, &config);

    // `scan-runner run <request.json>` executes one request and exits.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, path] = args.as_slice() {
        if command == "run" {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            let request: ScanRequest =
                serde_json::from_str(&raw).with_context(|| format!("invalid request in {path}"))?;
            let summary = service.run_now(&request).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            service.shutdown().await;
            return Ok(());
        }
    }

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = scan_routes(Arc::clone(&service)).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;
    eprintln!("   API: http://0.0.0.0:{}/api/v1/scans\n", config.http_port);
    tracing::info!(port = config.http_port, "Scan API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    tracing::info!("Shutting down, draining queued scans");
    service.shutdown().await;
    Ok(())
}
