//! Declarative endpoint fallback tables
//!
//! Every dataset is fetched through an ordered list of
//! [`EndpointAttempt`]s: the primary dataset endpoint first, then any
//! alternates known to work when the primary is finicky for that code.
//! The chain driver iterates the list generically; adding a variant is a
//! table edit, not a new branch.

use chrono::NaiveDate;
use settleflow_core::window::TimeWindow;

/// How a window is encoded into query parameters for one endpoint shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `from`/`to` as RFC3339 instants.
    Rfc3339FromTo,
    /// `from`/`to` as date-only values.
    DateFromTo,
    /// `publishDateTimeFrom`/`publishDateTimeTo` as RFC3339 instants.
    PublishWindow,
    /// RFC3339 `from`/`to` plus full-day settlement-period bounds.
    SettlementBounded,
}

/// One endpoint variant in a dataset's fallback chain.
#[derive(Debug, Clone)]
pub struct EndpointAttempt {
    /// Short label used in logs.
    pub label: &'static str,
    /// Path relative to the API base URL.
    pub path: String,
    /// Query parameter shape.
    pub params: ParamStyle,
}

/// Datasets whose primary endpoint requires explicit settlement-period
/// bounds alongside the time window.
const SETTLEMENT_BOUNDED: &[&str] = &["BOALF", "PN", "QPN"];

/// Per-dataset endpoint alternates, tried in order after the primary.
const ALTERNATES: &[(&str, &[(&str, &str, ParamStyle)])] = &[
    (
        "FREQ",
        &[("stream", "/datasets/FREQ/stream", ParamStyle::Rfc3339FromTo)],
    ),
    (
        "FUELINST",
        &[(
            "stream",
            "/datasets/FUELINST/stream",
            ParamStyle::PublishWindow,
        )],
    ),
    (
        "MID",
        &[(
            "market-index",
            "/balancing/pricing/market-index",
            ParamStyle::DateFromTo,
        )],
    ),
    (
        "SYSDEM",
        &[("demand-total", "/demand/total", ParamStyle::DateFromTo)],
    ),
    (
        "ROLSYSDEM",
        &[(
            "demand-rolling",
            "/demand/rollingSystemDemand",
            ParamStyle::PublishWindow,
        )],
    ),
    (
        "WINDFOR",
        &[(
            "wind-forecast",
            "/forecast/generation/wind",
            ParamStyle::DateFromTo,
        )],
    ),
    (
        "BOALF",
        &[(
            "stream",
            "/datasets/BOALF/stream",
            ParamStyle::SettlementBounded,
        )],
    ),
    (
        "PN",
        &[(
            "stream",
            "/datasets/PN/stream",
            ParamStyle::SettlementBounded,
        )],
    ),
];

/// Path of the per-settlement-period physical fallback endpoint.
pub const PHYSICAL_PATH: &str = "/balancing/physical";

/// First and last settlement period queried per day (long days included).
pub const SETTLEMENT_PERIODS: std::ops::RangeInclusive<u32> = 1..=50;

/// Primary endpoint for a dataset code.
pub fn primary_attempt(dataset: &str) -> EndpointAttempt {
    let upper = dataset.to_uppercase();
    let params = if SETTLEMENT_BOUNDED.contains(&upper.as_str()) {
        ParamStyle::SettlementBounded
    } else {
        ParamStyle::Rfc3339FromTo
    };
    EndpointAttempt {
        label: "primary",
        path: format!("/datasets/{upper}"),
        params,
    }
}

/// Ordered fallback chain for a dataset: primary first, then alternates.
pub fn attempts_for(dataset: &str) -> Vec<EndpointAttempt> {
    let upper = dataset.to_uppercase();
    let mut attempts = vec![primary_attempt(&upper)];
    if let Some((_, alternates)) = ALTERNATES.iter().find(|(code, _)| *code == upper) {
        for (label, path, params) in alternates.iter() {
            attempts.push(EndpointAttempt {
                label,
                path: (*path).to_string(),
                params: *params,
            });
        }
    }
    attempts
}

/// Build the query parameters for one attempt over one window.
///
/// `bm_units` are appended as repeated `bmUnit` parameters for datasets
/// that accept them; callers pass an empty slice otherwise.
pub fn build_params(
    style: ParamStyle,
    window: TimeWindow,
    bm_units: &[String],
) -> Vec<(String, String)> {
    let mut params = match style {
        ParamStyle::Rfc3339FromTo => vec![
            ("from".to_string(), window.start.to_rfc3339()),
            ("to".to_string(), window.end.to_rfc3339()),
        ],
        ParamStyle::DateFromTo => vec![
            (
                "from".to_string(),
                window.start.date_naive().format("%Y-%m-%d").to_string(),
            ),
            (
                "to".to_string(),
                window.end.date_naive().format("%Y-%m-%d").to_string(),
            ),
        ],
        ParamStyle::PublishWindow => vec![
            ("publishDateTimeFrom".to_string(), window.start.to_rfc3339()),
            ("publishDateTimeTo".to_string(), window.end.to_rfc3339()),
        ],
        ParamStyle::SettlementBounded => vec![
            ("from".to_string(), window.start.to_rfc3339()),
            ("to".to_string(), window.end.to_rfc3339()),
            (
                "settlementPeriodFrom".to_string(),
                SETTLEMENT_PERIODS.start().to_string(),
            ),
            (
                "settlementPeriodTo".to_string(),
                SETTLEMENT_PERIODS.end().to_string(),
            ),
        ],
    };
    for unit in bm_units {
        params.push(("bmUnit".to_string(), unit.clone()));
    }
    params
}

/// Query parameters for one (day, settlement period) physical request.
pub fn physical_params(dataset: &str, day: NaiveDate, period: u32) -> Vec<(String, String)> {
    vec![
        ("dataset".to_string(), dataset.to_uppercase()),
        (
            "settlementDate".to_string(),
            day.format("%Y-%m-%d").to_string(),
        ),
        ("settlementPeriod".to_string(), period.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn window() -> TimeWindow {
        TimeWindow {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_primary_path() {
        let attempt = primary_attempt("fuelhh");
        assert_eq!(attempt.path, "/datasets/FUELHH");
        assert_eq!(attempt.params, ParamStyle::Rfc3339FromTo);
    }

    #[test]
    fn test_settlement_bounded_primary() {
        let attempt = primary_attempt("PN");
        assert_eq!(attempt.params, ParamStyle::SettlementBounded);
    }

    #[test]
    fn test_finicky_datasets_have_alternates() {
        let attempts = attempts_for("FREQ");
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].label, "primary");
        assert_eq!(attempts[1].path, "/datasets/FREQ/stream");

        let plain = attempts_for("FUELHH");
        assert_eq!(plain.len(), 1);
    }

    #[test]
    fn test_rfc3339_params() {
        let params = build_params(ParamStyle::Rfc3339FromTo, window(), &[]);
        assert_eq!(params[0].0, "from");
        assert!(params[0].1.starts_with("2024-01-01T00:00:00"));
        assert_eq!(params[1].0, "to");
        assert!(params[1].1.starts_with("2024-01-02T00:00:00"));
    }

    #[test]
    fn test_date_only_params() {
        let params = build_params(ParamStyle::DateFromTo, window(), &[]);
        assert_eq!(params[0].1, "2024-01-01");
        assert_eq!(params[1].1, "2024-01-02");
    }

    #[test]
    fn test_settlement_bounds_cover_long_days() {
        let params = build_params(ParamStyle::SettlementBounded, window(), &[]);
        assert!(params.contains(&("settlementPeriodFrom".to_string(), "1".to_string())));
        assert!(params.contains(&("settlementPeriodTo".to_string(), "50".to_string())));
    }

    #[test]
    fn test_bm_units_appended() {
        let units = vec!["T_DRAXX-1".to_string(), "T_DIDC1".to_string()];
        let params = build_params(ParamStyle::Rfc3339FromTo, window(), &units);
        let bm: Vec<_> = params.iter().filter(|(k, _)| k == "bmUnit").collect();
        assert_eq!(bm.len(), 2);
    }

    #[test]
    fn test_physical_params() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let params = physical_params("fuelhh", day, 17);
        assert!(params.contains(&("dataset".to_string(), "FUELHH".to_string())));
        assert!(params.contains(&("settlementDate".to_string(), "2024-01-01".to_string())));
        assert!(params.contains(&("settlementPeriod".to_string(), "17".to_string())));
    }
}
