//! Insights API provider
//!
//! Fetches one time window of one dataset through an ordered fallback
//! chain:
//!
//! 1. primary dataset endpoint (RFC3339 `from`/`to`, settlement-period
//!    bounds for the codes that require them)
//! 2. per-dataset endpoint alternates (stream paths, renamed parameters,
//!    date-only bounds)
//! 3. per-settlement-period physical fallback (one request per day and
//!    period, filtered to the requested dataset)
//! 4. CSV-format fallback on the primary endpoint
//!
//! ## Architecture
//!
//! - `endpoints` - declarative fallback tables and parameter builders
//! - `keys` - round-robin API key rotation
//! - `payload` - JSON/CSV response decoding into uniform rows
//! - `fetch` - the chain driver with retry, backoff and debug dumps

pub mod endpoints;
pub mod fetch;
pub mod keys;
pub mod payload;

pub use endpoints::{attempts_for, EndpointAttempt, ParamStyle};
pub use fetch::{BlockingFetcher, FetchClient, FetchError, WindowFetcher};
pub use keys::KeyRotator;
pub use payload::{rows_from_csv, rows_from_json, RawRow};
