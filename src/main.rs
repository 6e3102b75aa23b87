use duckdb::Connection;
use site_analytics::config::Config;
use site_analytics::ingest::geoip::GeoIpReader;
use site_analytics::ingest::processor::ViewProcessor;
use site_analytics::server::{self, AppState};
use site_analytics::storage;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "site_analytics=info,tower_http=info".into());
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

async fn run_maintenance(state: &Arc<AppState>, batch_size: usize, retention_days: u32) {
    let state = Arc::clone(state);
    let outcome =
        tokio::task::spawn_blocking(move || state.run_maintenance(batch_size, retention_days))
            .await;
    match outcome {
        Ok(Ok(report)) if report.processed > 0 || report.collected > 0 => {
            tracing::info!(
                processed = report.processed,
                collected = report.collected,
                "Processing run completed"
            );
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Processing run failed"),
        Err(e) => tracing::error!(error = %e, "Processing task panicked"),
    }
}

#[tokio::main]
async fn main() {
    // Load configuration
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref().map(std::path::Path::new));
    init_tracing(config.log_json);

    tracing::info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir.display(),
        "Starting site analytics"
    );

    std::fs::create_dir_all(&config.data_dir).expect("Failed to create data directory");

    let conn = Connection::open(config.database_path()).expect("Failed to open DuckDB");
    storage::migrations::run_migrations(&conn).expect("Failed to run migrations");

    let secret = config.secret_key.clone().unwrap_or_else(|| {
        tracing::warn!(
            "No secret_key configured, using a random one. Set SITE_ANALYTICS_SECRET for visitor identities that survive restarts."
        );
        uuid::Uuid::new_v4().to_string()
    });
    let geoip = GeoIpReader::open(config.geoip_db_path.as_deref());
    let state = Arc::new(AppState::new(
        conn,
        ViewProcessor::new(geoip, secret),
        &config,
    ));

    // Periodic processing, garbage collection and cache sweep
    let worker_state = Arc::clone(&state);
    let batch_size = config.process_batch_size;
    let retention_days = config.retention_days;
    let interval_secs = config.process_interval_secs.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            run_maintenance(&worker_state, batch_size, retention_days).await;
            worker_state.query_cache.cleanup_expired();
        }
    });

    let app = server::build_router(Arc::clone(&state));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(addr = %addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Process whatever arrived before shutdown
    let timeout = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(timeout, run_maintenance(&state, batch_size, 0))
        .await
        .is_err()
    {
        tracing::warn!("Final processing run timed out");
    }
    tracing::info!("Shutdown complete");
}
