//! Static dataset catalog
//!
//! Registry of settlement-market dataset codes the pipeline knows how to
//! ingest, with the per-dataset constraints the upstream API enforces:
//!
//! - **Chunk rule**: the maximum time span a single request may cover.
//!   High-frequency datasets (system frequency, instantaneous generation)
//!   only accept short windows; half-hourly and daily datasets accept up
//!   to a week.
//! - **Presumed offline**: datasets the upstream has stopped publishing.
//!   These are skipped by default and only queried when explicitly
//!   requested.
//!
//! Unknown codes are still ingestible and fall back to the default chunk
//! rule, so a newly published dataset works before the catalog learns
//! about it.

use chrono::Duration;

/// Default chunk rule for datasets without a catalog entry, in days.
pub const DEFAULT_MAX_WINDOW_DAYS: i64 = 7;

/// Per-dataset chunk rules in hours.
///
/// Sorted by dataset code. Codes absent from this table use
/// [`DEFAULT_MAX_WINDOW_DAYS`].
const CHUNK_RULES_HOURS: &[(&str, i64)] = &[
    ("ABUC", 7 * 24),
    ("BOALF", 24),
    ("DISBSAD", 7 * 24),
    ("FREQ", 2),
    ("FUELHH", 7 * 24),
    ("FUELINST", 6),
    ("IMBALNGC", 7 * 24),
    ("INDOD", 7 * 24),
    ("MELNGC", 7 * 24),
    ("MID", 7 * 24),
    ("NETBSAD", 7 * 24),
    ("PN", 24),
    ("QPN", 24),
    ("ROLSYSDEM", 24),
    ("SYSDEM", 7 * 24),
    ("SYSWARN", 30 * 24),
    ("TEMP", 30 * 24),
    ("WINDFOR", 7 * 24),
];

/// Dataset codes the upstream is presumed to have stopped publishing.
///
/// Skipped by the orchestrator unless offline datasets are explicitly
/// included in the run.
pub const PRESUMED_OFFLINE: &[&str] = &["ABUC", "QPN", "SYSWARN"];

/// Datasets whose endpoints accept a BM-unit filter parameter.
pub const BM_UNIT_DATASETS: &[&str] = &["BOALF", "PN", "QPN"];

/// Static description of one ingestible dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSpec {
    /// Upstream dataset code, upper-case (e.g. `FUELHH`).
    pub code: String,
    /// Maximum time span one request may cover.
    pub max_window: Duration,
    /// Whether the upstream is presumed to have stopped publishing it.
    pub presumed_offline: bool,
}

/// Look up the spec for a dataset code.
///
/// Unknown codes get the default chunk rule and are not presumed offline.
///
/// # Examples
///
/// ```
/// use settleflow_core::catalog::dataset_spec;
/// use chrono::Duration;
///
/// assert_eq!(dataset_spec("FREQ").max_window, Duration::hours(2));
/// assert_eq!(dataset_spec("freq").max_window, Duration::hours(2));
/// assert_eq!(dataset_spec("NEWDATA").max_window, Duration::days(7));
/// ```
pub fn dataset_spec(code: &str) -> DatasetSpec {
    let upper = code.to_uppercase();
    let hours = CHUNK_RULES_HOURS
        .iter()
        .find(|(known, _)| *known == upper)
        .map(|(_, hours)| *hours)
        .unwrap_or(DEFAULT_MAX_WINDOW_DAYS * 24);

    DatasetSpec {
        presumed_offline: is_presumed_offline(&upper),
        code: upper,
        max_window: Duration::hours(hours),
    }
}

/// Check whether a dataset is presumed offline.
///
/// # Examples
///
/// ```
/// use settleflow_core::catalog::is_presumed_offline;
///
/// assert!(is_presumed_offline("ABUC"));
/// assert!(is_presumed_offline("abuc"));
/// assert!(!is_presumed_offline("FUELHH"));
/// ```
pub fn is_presumed_offline(code: &str) -> bool {
    PRESUMED_OFFLINE.contains(&code.to_uppercase().as_str())
}

/// Check whether a dataset's endpoints accept a BM-unit filter.
pub fn accepts_bm_units(code: &str) -> bool {
    BM_UNIT_DATASETS.contains(&code.to_uppercase().as_str())
}

/// All dataset codes known to the catalog.
pub fn all_dataset_codes() -> Vec<String> {
    CHUNK_RULES_HOURS
        .iter()
        .map(|(code, _)| code.to_string())
        .collect()
}
