use crate::api::{data, traffic};
use crate::config::Config;
use crate::ingest::processor::{self, ViewProcessor};
use crate::query::cache::QueryCache;
use crate::query::QueryLimits;
use crate::storage::{processed_views, raw_views, StorageError};
use axum::extract::DefaultBodyLimit;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use chrono::{TimeDelta, Utc};
use duckdb::Connection;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared state for every handler and the background processing task.
pub struct AppState {
    pub conn: Arc<Mutex<Connection>>,
    pub processor: ViewProcessor,
    pub query_cache: QueryCache,
    pub limits: QueryLimits,
    pub max_views_per_request: usize,
    pub dashboard_origin: Option<String>,
    pub views_reported_total: AtomicU64,
    pub views_processed_total: AtomicU64,
}

/// Outcome of one processing and garbage-collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub processed: usize,
    pub collected: usize,
}

impl AppState {
    pub fn new(conn: Connection, processor: ViewProcessor, config: &Config) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            processor,
            query_cache: QueryCache::new(config.cache_ttl_secs),
            limits: QueryLimits {
                max_buckets: config.max_buckets,
            },
            max_views_per_request: config.max_views_per_request,
            dashboard_origin: config.dashboard_origin.clone(),
            views_reported_total: AtomicU64::new(0),
            views_processed_total: AtomicU64::new(0),
        }
    }

    /// Process pending raw views, then drop processed raw views older than
    /// `retention_days` (0 keeps them forever).
    ///
    /// Cached query results are invalidated whenever new views land.
    pub fn run_maintenance(
        &self,
        batch_size: usize,
        retention_days: u32,
    ) -> Result<MaintenanceReport, StorageError> {
        let mut conn = self.conn.lock();
        let processed = processor::process_pending(&mut conn, &self.processor, batch_size)?;
        let collected = if retention_days > 0 {
            let cutoff = Utc::now().naive_utc() - TimeDelta::days(i64::from(retention_days));
            raw_views::delete_processed_before(&conn, cutoff)?
        } else {
            0
        };
        drop(conn);

        if processed > 0 {
            self.query_cache.clear();
            self.views_processed_total
                .fetch_add(processed as u64, Ordering::Relaxed);
        }
        Ok(MaintenanceReport {
            processed,
            collected,
        })
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Permissive CORS for traffic reports (tracked sites post from any origin)
    let traffic_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let data_cors = build_dashboard_cors(state.dashboard_origin.as_deref());

    // A full batch of 200 views fits comfortably in 1 MB
    let traffic_routes = Router::new()
        .route("/traffic", post(traffic::report_traffic))
        .layer(DefaultBodyLimit::max(1_048_576))
        .layer(traffic_cors);

    let data_routes = Router::new()
        .route("/data/query", get(data::get_query))
        .route("/data/buckets", get(data::get_buckets))
        .layer(CompressionLayer::new())
        .layer(data_cors);

    let api_routes = Router::new().merge(traffic_routes).merge(data_routes);

    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
        .route("/metrics", get(prometheus_metrics))
        .nest("/api/v1", api_routes)
        .layer(axum::middleware::map_response(add_security_headers))
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            std::time::Duration::from_secs(30),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Inject OWASP-recommended security headers on every HTTP response.
async fn add_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

/// Build CORS layer for the data routes based on configured origin.
fn build_dashboard_cors(dashboard_origin: Option<&str>) -> CorsLayer {
    dashboard_origin.map_or_else(
        || {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET])
                .allow_headers(Any)
        },
        |origin| {
            let allowed_origin = origin
                .parse::<HeaderValue>()
                .unwrap_or_else(|_| HeaderValue::from_static("*"));
            CorsLayer::new()
                .allow_origin(allowed_origin)
                .allow_methods([Method::GET])
                .allow_headers([header::CONTENT_TYPE])
        },
    )
}

/// GET /health: Simple health check endpoint.
async fn health_check() -> &'static str {
    "ok"
}

/// GET /health/detailed: Detailed health check with backlog and cache info.
async fn detailed_health_check(
    State(state): State<Arc<AppState>>,
) -> axum::Json<serde_json::Value> {
    let state2 = Arc::clone(&state);
    let counts = tokio::task::spawn_blocking(move || {
        let conn = state2.conn.lock();
        Ok::<_, StorageError>((
            raw_views::count_unprocessed(&conn)?,
            processed_views::count(&conn)?,
        ))
    })
    .await;

    let (status, pending, processed) = match counts {
        Ok(Ok((pending, processed))) => ("ok", Some(pending), Some(processed)),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Health check query failed");
            ("degraded", None, None)
        }
        Err(e) => {
            tracing::error!(error = %e, "Health check task panicked");
            ("degraded", None, None)
        }
    };

    axum::Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "pending_views": pending,
        "processed_views": processed,
        "geoip_loaded": state.processor.geoip().is_loaded(),
        "cache_entries": state.query_cache.len(),
        "max_buckets": state.limits.max_buckets,
    }))
}

/// GET /metrics: Prometheus-compatible metrics endpoint.
async fn prometheus_metrics(
    State(state): State<Arc<AppState>>,
) -> ([(header::HeaderName, &'static str); 1], String) {
    use std::fmt::Write;

    let cache_entries = state.query_cache.len();
    let geoip_loaded = u8::from(state.processor.geoip().is_loaded());
    let reported = state.views_reported_total.load(Ordering::Relaxed);
    let processed = state.views_processed_total.load(Ordering::Relaxed);

    let mut out = String::with_capacity(1024);
    let _ = writeln!(
        out,
        "# HELP site_analytics_cache_entries Number of cached query results"
    );
    let _ = writeln!(out, "# TYPE site_analytics_cache_entries gauge");
    let _ = writeln!(out, "site_analytics_cache_entries {cache_entries}");
    let _ = writeln!(
        out,
        "# HELP site_analytics_geoip_loaded Whether GeoIP database is loaded"
    );
    let _ = writeln!(out, "# TYPE site_analytics_geoip_loaded gauge");
    let _ = writeln!(out, "site_analytics_geoip_loaded {geoip_loaded}");
    let _ = writeln!(
        out,
        "# HELP site_analytics_views_reported_total Raw views stored since startup"
    );
    let _ = writeln!(out, "# TYPE site_analytics_views_reported_total counter");
    let _ = writeln!(out, "site_analytics_views_reported_total {reported}");
    let _ = writeln!(
        out,
        "# HELP site_analytics_views_processed_total Raw views processed since startup"
    );
    let _ = writeln!(out, "# TYPE site_analytics_views_processed_total counter");
    let _ = writeln!(out, "site_analytics_views_processed_total {processed}");

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], out)
}
