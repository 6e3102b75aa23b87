pub mod geoip;
pub mod processor;
pub mod useragent;
pub mod visitor_id;
