use crate::ingest::geoip::GeoIpReader;
use crate::ingest::useragent::parse_user_agent;
use crate::ingest::visitor_id::visitor_id;
use crate::storage::processed_views::{self, ProcessedView};
use crate::storage::raw_views::{self, RawView};
use crate::storage::StorageError;
use chrono::{NaiveDateTime, Utc};
use duckdb::Connection;

/// Turns raw views into processed views.
///
/// Enrichment is local: User-Agent classification, a MaxMind lookup and the
/// keyed visitor hash. Reverse-DNS hostname/domain lookups are not performed,
/// so those columns stay NULL.
pub struct ViewProcessor {
    geoip: GeoIpReader,
    secret: String,
}

impl ViewProcessor {
    pub const fn new(geoip: GeoIpReader, secret: String) -> Self {
        Self { geoip, secret }
    }

    pub fn process(&self, raw: &RawView, processed_at: NaiveDateTime) -> ProcessedView {
        let ua = parse_user_agent(&raw.user_agent);
        let geo = self.geoip.lookup(&raw.ip_address);
        ProcessedView {
            raw_view_id: raw.id,
            url: raw.url.clone(),
            visitor_id: visitor_id(&raw.ip_address, &self.secret),
            timestamp: raw.timestamp,
            process_timestamp: processed_at,
            is_bot: ua.is_bot,
            hostname: None,
            domain: None,
            country: geo.country,
            region: geo.region,
            city: geo.city,
            operating_system: ua.os,
            operating_system_version: ua.os_version,
            browser: ua.browser,
            browser_version: ua.browser_version,
            device: ua.device,
            device_type: ua.device_type.as_str().to_string(),
        }
    }

    pub const fn geoip(&self) -> &GeoIpReader {
        &self.geoip
    }
}

/// Process every pending raw view, `batch_size` rows per transaction.
///
/// Each batch inserts the processed rows and stamps the raw rows in one
/// transaction, so a crash mid-batch leaves the batch pending rather than
/// half-processed. Returns the number of views processed.
pub fn process_pending(
    conn: &mut Connection,
    processor: &ViewProcessor,
    batch_size: usize,
) -> Result<usize, StorageError> {
    let batch_size = batch_size.max(1);
    let mut total = 0;
    loop {
        let pending = raw_views::fetch_unprocessed(conn, batch_size)?;
        if pending.is_empty() {
            break;
        }

        let processed_at = Utc::now().naive_utc();
        let views: Vec<ProcessedView> = pending
            .iter()
            .map(|raw| processor.process(raw, processed_at))
            .collect();
        let ids: Vec<i64> = pending.iter().map(|raw| raw.id).collect();

        let tx = conn.transaction()?;
        processed_views::insert_batch(&tx, &views)?;
        raw_views::mark_processed(&tx, &ids, processed_at)?;
        tx.commit()?;

        let bots = views.iter().filter(|v| v.is_bot).count();
        tracing::debug!(count = views.len(), bots, "Processed raw views");
        total += views.len();

        if pending.len() < batch_size {
            break;
        }
    }
    Ok(total)
}
