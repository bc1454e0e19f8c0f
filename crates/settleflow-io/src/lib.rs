//! Frame building for settleflow
//!
//! Converts the fetch client's uniform JSON rows into Polars DataFrames
//! ready for warehouse loading:
//!
//! - `normalize` - column typing, temporal coercion, provenance metadata
//! - `dedup` - content-hash idempotency keys over business columns

pub mod dedup;
pub mod normalize;

pub use dedup::{add_dedup_key, DedupError};
pub use normalize::{
    is_metadata_column, normalize, NormalizeError, META_DATASET, META_HASH_KEY,
    META_HASH_SOURCE_COLS, META_INGESTED_AT, META_SOURCE_API, META_SOURCE_COLUMNS,
    META_WINDOW_FROM, META_WINDOW_TO, METADATA_COLUMNS,
};
