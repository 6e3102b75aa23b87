pub mod buckets;
pub mod cache;
pub mod calendar;
pub mod columns;
pub mod descriptor;
pub mod error;
pub mod generator;
pub mod runner;

pub use buckets::{Bucket, BucketAccumulator, BucketSeries};
pub use descriptor::{
    BucketQuery, CountTarget, GroupBy, Population, QueryDescriptor, QueryLimits, Resolution,
};
pub use error::QueryError;
pub use generator::{generate, generate_events, GeneratedSql};
pub use runner::{run, run_bucketed, Cell, QueryExecutor, ResultRecord};
