//! Data provider integrations
//!
//! Source-specific adapters for fetching time-windowed settlement-market
//! datasets.
//!
//! ## Supported Providers
//!
//! - `insights` - the settlement-data Insights REST API (primary). JSON
//!   first, with per-dataset endpoint alternates, a per-settlement-period
//!   physical fallback, and a CSV fallback.
//!
//! ## Design Principles
//!
//! 1. **Declarative fallbacks**: endpoint variants live in a table, not
//!    nested conditionals
//! 2. **Explicit state**: API-key rotation is a value passed in, never a
//!    module-global
//! 3. **Error discipline**: transient transport errors retry with backoff;
//!    404 means "try the next variant"; a final 400/422 is surfaced, an
//!    exhausted chain without one yields an empty table

pub mod insights;

pub use insights::endpoints::{attempts_for, EndpointAttempt, ParamStyle};
pub use insights::fetch::{BlockingFetcher, FetchClient, FetchError, WindowFetcher};
pub use insights::keys::KeyRotator;
pub use insights::payload::{rows_from_csv, rows_from_json, RawRow};
