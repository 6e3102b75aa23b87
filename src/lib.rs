//! Website traffic analytics: stores reported page views, enriches them with
//! bot classification, location and device details, and answers
//! calendar-bucketed aggregate queries over DuckDB.

pub mod api;
pub mod config;
pub mod ingest;
pub mod query;
pub mod server;
pub mod storage;
