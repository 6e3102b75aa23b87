use maxminddb::geoip2::City;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Location columns of a processed view. Every field is optional; a view
/// with no resolvable location groups under `UNKNOWN` at query time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoInfo {
    /// English country name, falling back to the ISO code.
    pub country: Option<String>,
    /// First-level subdivision (state, province).
    pub region: Option<String>,
    pub city: Option<String>,
}

impl GeoInfo {
    fn from_record(record: &City<'_>) -> Self {
        Self {
            country: record
                .country
                .names
                .english
                .or(record.country.iso_code)
                .map(str::to_string),
            region: record
                .subdivisions
                .first()
                .and_then(|subdivision| subdivision.names.english)
                .map(str::to_string),
            city: record.city.names.english.map(str::to_string),
        }
    }
}

/// Visitor location from a local MaxMind city database.
///
/// Nothing is sent over the network. Without a usable database every lookup
/// yields an empty [`GeoInfo`] and views are still processed.
pub struct GeoIpReader {
    db: Option<Arc<maxminddb::Reader<Vec<u8>>>>,
}

impl GeoIpReader {
    /// Load the database at `path`, degrading to a disabled reader when the
    /// path is unset, missing or unreadable.
    pub fn open(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            tracing::info!("No GeoIP database configured, location fields stay empty");
            return Self { db: None };
        };
        let db = match maxminddb::Reader::open_readfile(path) {
            Ok(db) => {
                tracing::info!(path = %path.display(), "GeoIP database loaded");
                Some(Arc::new(db))
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "GeoIP database unusable, location fields stay empty"
                );
                None
            }
        };
        Self { db }
    }

    pub const fn is_loaded(&self) -> bool {
        self.db.is_some()
    }

    /// Resolve a reported IP address. Unparseable and non-public addresses
    /// are never looked up. The address itself is never logged.
    pub fn lookup(&self, ip: &str) -> GeoInfo {
        let Some(db) = &self.db else {
            return GeoInfo::default();
        };
        ip.trim()
            .parse::<IpAddr>()
            .ok()
            .filter(is_public)
            .and_then(|addr| db.lookup(addr).ok())
            .and_then(|found| found.decode::<City>().ok().flatten())
            .map_or_else(GeoInfo::default, |record| GeoInfo::from_record(&record))
    }
}

/// Loopback, private, link-local and unspecified addresses have no location.
fn is_public(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified())
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            let unique_local = first & 0xfe00 == 0xfc00;
            let link_local = first & 0xffc0 == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str) -> IpAddr {
        ip.parse().unwrap()
    }

    #[test]
    fn test_disabled_reader_yields_empty_location() {
        let reader = GeoIpReader::open(None);
        assert!(!reader.is_loaded());
        assert_eq!(reader.lookup("8.8.8.8"), GeoInfo::default());
    }

    #[test]
    fn test_missing_db_file_degrades() {
        let reader = GeoIpReader::open(Some(Path::new("/nonexistent/GeoLite2-City.mmdb")));
        assert!(!reader.is_loaded());
        assert!(reader.lookup("8.8.8.8").country.is_none());
    }

    #[test]
    fn test_corrupt_db_file_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mmdb");
        std::fs::write(&path, b"not a maxmind database").unwrap();
        assert!(!GeoIpReader::open(Some(&path)).is_loaded());
    }

    #[test]
    fn test_unparseable_ip() {
        let reader = GeoIpReader::open(None);
        assert_eq!(reader.lookup("not-an-ip"), GeoInfo::default());
        assert_eq!(reader.lookup(""), GeoInfo::default());
    }

    #[test]
    fn test_public_address_classification() {
        for ip in ["8.8.8.8", "2001:4860:4860::8888"] {
            assert!(is_public(&addr(ip)), "{ip} should be public");
        }
        for ip in [
            "127.0.0.1",
            "10.1.2.3",
            "192.168.0.10",
            "169.254.1.1",
            "0.0.0.0",
            "::1",
            "::",
            "fd00::1",
            "fe80::1",
        ] {
            assert!(!is_public(&addr(ip)), "{ip} should not be public");
        }
    }
}
