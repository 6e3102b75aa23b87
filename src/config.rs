use crate::query::descriptor::DEFAULT_MAX_BUCKETS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Application configuration loaded from environment variables or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Path to a MaxMind GeoLite2 .mmdb file for IP geolocation.
    /// If not set or file is missing, location columns stay empty.
    #[serde(default)]
    pub geoip_db_path: Option<PathBuf>,
    /// Origin allowed to call the data API cross-origin.
    /// If not set, any origin may read.
    #[serde(default)]
    pub dashboard_origin: Option<String>,
    /// Key for visitor identity hashing. A random key is generated at
    /// startup when unset, so identities do not survive restarts.
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Ceiling on buckets per query (default: 1000).
    #[serde(default = "default_max_buckets")]
    pub max_buckets: u64,
    /// Maximum views accepted in one traffic report (default: 200).
    #[serde(default = "default_max_views_per_request")]
    pub max_views_per_request: usize,
    /// Seconds between processing runs (default: 60).
    #[serde(default = "default_process_interval_secs")]
    pub process_interval_secs: u64,
    /// Raw views processed per transaction (default: 500).
    #[serde(default = "default_process_batch_size")]
    pub process_batch_size: usize,
    /// Days to keep processed raw views. 0 = keep forever.
    #[serde(default)]
    pub retention_days: u32,
    /// Query cache TTL in seconds (default: 60). 0 = no caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Graceful shutdown timeout in seconds (default: 30).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Emit logs as JSON lines.
    #[serde(default)]
    pub log_json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

const fn default_max_buckets() -> u64 {
    DEFAULT_MAX_BUCKETS
}

const fn default_max_views_per_request() -> usize {
    200
}

const fn default_process_interval_secs() -> u64 {
    60
}

const fn default_process_batch_size() -> usize {
    500
}

const fn default_cache_ttl_secs() -> u64 {
    60
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            geoip_db_path: None,
            dashboard_origin: None,
            secret_key: None,
            max_buckets: default_max_buckets(),
            max_views_per_request: default_max_views_per_request(),
            process_interval_secs: default_process_interval_secs(),
            process_batch_size: default_process_batch_size(),
            retention_days: 0,
            cache_ttl_secs: default_cache_ttl_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            log_json: false,
        }
    }
}

fn env_parse<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(var = name, value = %raw, "Ignoring unparseable override"),
        }
    }
}

fn env_flag(name: &str, target: &mut bool) {
    if let Ok(val) = std::env::var(name) {
        *target = val != "0" && !val.eq_ignore_ascii_case("false");
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Environment variables override file values:
    /// - `SITE_ANALYTICS_HOST` → host
    /// - `SITE_ANALYTICS_PORT` → port
    /// - `SITE_ANALYTICS_DATA_DIR` → data_dir
    /// - `SITE_ANALYTICS_GEOIP_DB` → geoip_db_path
    /// - `SITE_ANALYTICS_DASHBOARD_ORIGIN` → dashboard_origin
    /// - `SITE_ANALYTICS_SECRET` → secret_key
    /// - `SITE_ANALYTICS_MAX_BUCKETS` → max_buckets
    /// - `SITE_ANALYTICS_MAX_VIEWS_PER_REQUEST` → max_views_per_request
    /// - `SITE_ANALYTICS_PROCESS_INTERVAL` → process_interval_secs
    /// - `SITE_ANALYTICS_PROCESS_BATCH_SIZE` → process_batch_size
    /// - `SITE_ANALYTICS_RETENTION_DAYS` → retention_days
    /// - `SITE_ANALYTICS_CACHE_TTL` → cache_ttl_secs
    /// - `SITE_ANALYTICS_SHUTDOWN_TIMEOUT` → shutdown_timeout_secs
    /// - `SITE_ANALYTICS_LOG_JSON` → log_json
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config =
            config_path.map_or_else(Self::default, |path| match std::fs::read_to_string(path) {
                Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file: {e}, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config file: {e}, using defaults");
                    Self::default()
                }
            });

        // Environment variable overrides
        if let Ok(host) = std::env::var("SITE_ANALYTICS_HOST") {
            config.host = host;
        }
        env_parse("SITE_ANALYTICS_PORT", &mut config.port);
        if let Ok(data_dir) = std::env::var("SITE_ANALYTICS_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(geoip) = std::env::var("SITE_ANALYTICS_GEOIP_DB") {
            config.geoip_db_path = Some(PathBuf::from(geoip));
        }
        if let Ok(origin) = std::env::var("SITE_ANALYTICS_DASHBOARD_ORIGIN") {
            config.dashboard_origin = Some(origin);
        }
        if let Ok(secret) = std::env::var("SITE_ANALYTICS_SECRET") {
            config.secret_key = Some(secret);
        }
        env_parse("SITE_ANALYTICS_MAX_BUCKETS", &mut config.max_buckets);
        env_parse(
            "SITE_ANALYTICS_MAX_VIEWS_PER_REQUEST",
            &mut config.max_views_per_request,
        );
        env_parse(
            "SITE_ANALYTICS_PROCESS_INTERVAL",
            &mut config.process_interval_secs,
        );
        env_parse(
            "SITE_ANALYTICS_PROCESS_BATCH_SIZE",
            &mut config.process_batch_size,
        );
        env_parse("SITE_ANALYTICS_RETENTION_DAYS", &mut config.retention_days);
        env_parse("SITE_ANALYTICS_CACHE_TTL", &mut config.cache_ttl_secs);
        env_parse(
            "SITE_ANALYTICS_SHUTDOWN_TIMEOUT",
            &mut config.shutdown_timeout_secs,
        );
        env_flag("SITE_ANALYTICS_LOG_JSON", &mut config.log_json);

        config
    }

    /// Path to the DuckDB database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("analytics.duckdb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Serializes tests that call `Config::load`, which reads process-wide
    /// environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert!(config.geoip_db_path.is_none());
        assert!(config.dashboard_origin.is_none());
        assert!(config.secret_key.is_none());
        assert_eq!(config.max_buckets, 1000);
        assert_eq!(config.max_views_per_request, 200);
        assert_eq!(config.process_interval_secs, 60);
        assert_eq!(config.process_batch_size, 500);
        assert_eq!(config.retention_days, 0);
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.shutdown_timeout_secs, 30);
        assert!(!config.log_json);
    }

    #[test]
    fn test_load_from_toml() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        write!(
            file,
            r#"
host = "127.0.0.1"
port = 9000
data_dir = "/tmp/site-analytics"
geoip_db_path = "/data/GeoLite2-City.mmdb"
dashboard_origin = "https://analytics.example.com"
secret_key = "s3cret"
max_buckets = 400
max_views_per_request = 50
process_interval_secs = 5
process_batch_size = 100
retention_days = 90
log_json = true
"#
        )
        .unwrap();

        let config = Config::load(Some(&config_path));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/site-analytics"));
        assert_eq!(
            config.geoip_db_path,
            Some(PathBuf::from("/data/GeoLite2-City.mmdb"))
        );
        assert_eq!(
            config.dashboard_origin.as_deref(),
            Some("https://analytics.example.com")
        );
        assert_eq!(config.secret_key.as_deref(), Some("s3cret"));
        assert_eq!(config.max_buckets, 400);
        assert_eq!(config.max_views_per_request, 50);
        assert_eq!(config.process_interval_secs, 5);
        assert_eq!(config.process_batch_size, 100);
        assert_eq!(config.retention_days, 90);
        assert!(config.log_json);
        assert_eq!(config.cache_ttl_secs, 60);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = Config::load(Some(Path::new("/nonexistent/config.toml")));
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_load_no_path_uses_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = Config::load(None);
        assert_eq!(config.port, 8000);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_database_path() {
        let config = Config {
            data_dir: PathBuf::from("/var/site-analytics"),
            ..Config::default()
        };
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/site-analytics/analytics.duckdb")
        );
    }

    #[test]
    fn test_env_var_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();

        let vars = [
            ("SITE_ANALYTICS_PORT", "3000"),
            ("SITE_ANALYTICS_MAX_BUCKETS", "250"),
            ("SITE_ANALYTICS_LOG_JSON", "true"),
            ("SITE_ANALYTICS_RETENTION_DAYS", "not-a-number"),
        ];
        let originals: Vec<_> = vars
            .iter()
            .map(|(name, _)| (*name, std::env::var(name).ok()))
            .collect();
        for (name, value) in vars {
            std::env::set_var(name, value);
        }

        let config = Config::load(None);
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_buckets, 250);
        assert!(config.log_json);
        assert_eq!(config.retention_days, 0);

        for (name, original) in originals {
            match original {
                Some(v) => std::env::set_var(name, v),
                None => std::env::remove_var(name),
            }
        }
    }

    #[test]
    fn test_invalid_toml_uses_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "this is not valid toml {{{").unwrap();

        let config = Config::load(Some(&config_path));
        assert_eq!(config.port, 8000);
    }
}
