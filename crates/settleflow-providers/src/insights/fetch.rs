//! Fallback-chain fetch client
//!
//! Drives one dataset × window through the ordered endpoint chain:
//! primary, per-dataset alternates, per-settlement-period physical
//! fallback, CSV fallback. Within a step, transient transport errors
//! (connect/read timeouts, 5xx) retry with bounded exponential backoff.
//! A 404 or a non-404 client error ends the step and moves the chain
//! along. When every step has failed, the *last* observed error decides
//! the outcome: HTTP 400/422 is surfaced to the caller, anything else
//! resolves to an empty table ("no data for this window").

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use settleflow_config::ApiConfig;
use settleflow_core::catalog::accepts_bm_units;
use settleflow_core::timestamp::format_compact_utc;
use settleflow_core::window::TimeWindow;

use super::endpoints::{
    attempts_for, build_params, physical_params, primary_attempt, PHYSICAL_PATH,
    SETTLEMENT_PERIODS,
};
use super::keys::KeyRotator;
use super::payload::{rows_from_csv, rows_from_json, RawRow};

/// Errors surfaced by the fetch client after the whole chain resolves.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The upstream rejected the request (HTTP 400/422) and no fallback
    /// produced data.
    #[error("upstream rejected {dataset} request (HTTP {status}): {message}")]
    Rejected {
        dataset: String,
        status: u16,
        message: String,
    },

    /// Every fallback exhausted its transient retries.
    #[error("transport failure fetching {dataset}: {message}")]
    Transport { dataset: String, message: String },

    /// A response body could not be decoded.
    #[error("failed decoding {dataset} payload: {message}")]
    Decode { dataset: String, message: String },

    /// HTTP client construction failed.
    #[error("failed building HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// Tokio runtime construction failed (blocking facade).
    #[error("failed building fetch runtime: {0}")]
    Runtime(String),
}

/// Why a single chain step gave up.
#[derive(Debug)]
enum StepFailure {
    /// HTTP 404: nothing at this endpoint, try the next variant.
    NoData,
    /// Non-404 client error; not retried, chain continues.
    ClientError { status: u16, body: String },
    /// Transient retries exhausted.
    Transport(String),
    /// Body received but undecodable.
    Decode(String),
}

/// Body format expected from an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    Json,
    Csv,
}

/// HTTP status classification used by the chain driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Ok,
    NoData,
    Client,
    Server,
}

fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Ok,
        404 => StatusClass::NoData,
        400..=499 => StatusClass::Client,
        _ => StatusClass::Server,
    }
}

fn decode_body(body: &str, kind: PayloadKind) -> Result<Vec<RawRow>, StepFailure> {
    match kind {
        PayloadKind::Json => {
            let value: serde_json::Value =
                serde_json::from_str(body).map_err(|e| StepFailure::Decode(e.to_string()))?;
            Ok(rows_from_json(&value))
        }
        PayloadKind::Csv => rows_from_csv(body).map_err(|e| StepFailure::Decode(e.to_string())),
    }
}

/// Resolve an exhausted chain from its last observed failure.
///
/// A trailing 400/422 distinguishes "truly invalid request" from
/// "dataset has no data for this window", which yields an empty table.
fn resolve_exhausted(
    dataset: &str,
    last_failure: Option<StepFailure>,
) -> Result<Vec<RawRow>, FetchError> {
    match last_failure {
        None | Some(StepFailure::NoData) => Ok(Vec::new()),
        Some(StepFailure::ClientError { status, body }) if status == 400 || status == 422 => {
            Err(FetchError::Rejected {
                dataset: dataset.to_string(),
                status,
                message: truncate_body(&body),
            })
        }
        Some(StepFailure::ClientError { status, .. }) => {
            warn!(
                event_type = "fetch_client_error_ignored",
                dataset = %dataset,
                http_status = status,
                "Chain exhausted on non-terminal client error, treating as no data"
            );
            Ok(Vec::new())
        }
        Some(StepFailure::Transport(message)) => Err(FetchError::Transport {
            dataset: dataset.to_string(),
            message,
        }),
        Some(StepFailure::Decode(message)) => Err(FetchError::Decode {
            dataset: dataset.to_string(),
            message,
        }),
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 256;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX).collect();
        format!("{head}…")
    }
}

/// Async fetch client for the Insights API.
pub struct FetchClient {
    client: Client,
    api: ApiConfig,
    keys: KeyRotator,
    data_dir: Option<PathBuf>,
}

impl FetchClient {
    /// Build a client from API configuration. `data_dir` enables raw
    /// payload dumps when set.
    pub fn new(api: ApiConfig, data_dir: Option<PathBuf>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .build()?;
        let keys = KeyRotator::new(api.api_keys.clone());
        Ok(Self {
            client,
            api,
            keys,
            data_dir,
        })
    }

    /// Fetch one window of one dataset through the fallback chain.
    ///
    /// Returns the decoded rows (possibly empty). See [`FetchError`] for
    /// the terminal conditions.
    pub async fn fetch(
        &mut self,
        dataset: &str,
        window: TimeWindow,
    ) -> Result<Vec<RawRow>, FetchError> {
        let dataset = dataset.to_uppercase();
        let bm_units = if accepts_bm_units(&dataset) {
            self.api.bm_units.clone()
        } else {
            Vec::new()
        };

        let mut last_failure: Option<StepFailure> = None;

        for attempt in attempts_for(&dataset) {
            let params = build_params(attempt.params, window, &bm_units);
            match self
                .request_rows(&attempt.path, &params, PayloadKind::Json)
                .await
            {
                Ok((rows, body)) => {
                    debug!(
                        event_type = "fetch_step_ok",
                        dataset = %dataset,
                        step = attempt.label,
                        row_count = rows.len(),
                        "Fetch step succeeded"
                    );
                    self.dump_raw(&dataset, window, &body);
                    return Ok(rows);
                }
                Err(failure) => {
                    debug!(
                        event_type = "fetch_step_failed",
                        dataset = %dataset,
                        step = attempt.label,
                        failure = ?failure,
                        "Fetch step failed, trying next fallback"
                    );
                    last_failure = Some(failure);
                }
            }
        }

        match self.physical_fallback(&dataset, window).await {
            Ok(Some(rows)) => {
                info!(
                    event_type = "fetch_physical_ok",
                    dataset = %dataset,
                    row_count = rows.len(),
                    "Physical per-period fallback produced rows"
                );
                if let Ok(body) = serde_json::to_string(&rows) {
                    self.dump_raw(&dataset, window, &body);
                }
                return Ok(rows);
            }
            Ok(None) => {}
            Err(failure) => last_failure = Some(failure),
        }

        let primary = primary_attempt(&dataset);
        let mut params = build_params(primary.params, window, &bm_units);
        params.push(("format".to_string(), "csv".to_string()));
        match self
            .request_rows(&primary.path, &params, PayloadKind::Csv)
            .await
        {
            Ok((rows, body)) => {
                debug!(
                    event_type = "fetch_csv_ok",
                    dataset = %dataset,
                    row_count = rows.len(),
                    "CSV fallback succeeded"
                );
                self.dump_raw(&dataset, window, &body);
                return Ok(rows);
            }
            Err(failure) => last_failure = Some(failure),
        }

        resolve_exhausted(&dataset, last_failure)
    }

    /// One endpoint request with transient-retry backoff.
    ///
    /// Retries connect/read timeouts and 5xx responses up to the
    /// configured attempt count with doubling delays. Returns the
    /// decoded rows together with the raw body for the debug sink.
    async fn request_rows(
        &mut self,
        path: &str,
        params: &[(String, String)],
        kind: PayloadKind,
    ) -> Result<(Vec<RawRow>, String), StepFailure> {
        let url = format!("{}{}", self.api.base_url_trimmed(), path);
        let attempts = self.api.retry_attempts.max(1);
        let mut delay = Duration::from_millis(self.api.retry_delay_ms);
        let mut last_transport = String::from("no attempts made");

        for attempt in 1..=attempts {
            let mut request = self.client.get(&url).query(params);
            if let Some(key) = self.keys.next_key() {
                request = request.header("apikey", key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    match classify_status(status) {
                        StatusClass::Ok => {
                            let body = response
                                .text()
                                .await
                                .map_err(|e| StepFailure::Transport(e.to_string()))?;
                            let rows = decode_body(&body, kind)?;
                            return Ok((rows, body));
                        }
                        StatusClass::NoData => return Err(StepFailure::NoData),
                        StatusClass::Client => {
                            let body = response.text().await.unwrap_or_default();
                            return Err(StepFailure::ClientError { status, body });
                        }
                        StatusClass::Server => {
                            last_transport = format!("HTTP {status}");
                        }
                    }
                }
                Err(err) => {
                    last_transport = err.to_string();
                }
            }

            if attempt < attempts {
                warn!(
                    event_type = "fetch_retry",
                    url = %url,
                    attempt = attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_transport,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(StepFailure::Transport(last_transport))
    }

    /// Per-settlement-period physical fallback: one request per (day,
    /// period) pair in the window, filtered to the requested dataset.
    ///
    /// Returns `Ok(Some(rows))` only when something was found; an empty
    /// sweep falls through to the CSV fallback. A transport failure
    /// aborts the sweep.
    async fn physical_fallback(
        &mut self,
        dataset: &str,
        window: TimeWindow,
    ) -> Result<Option<Vec<RawRow>>, StepFailure> {
        let mut day = window.start.date_naive();
        let end_day = (window.end - chrono::Duration::milliseconds(1)).date_naive();
        let mut collected: Vec<RawRow> = Vec::new();
        let mut client_failure: Option<StepFailure> = None;

        while day <= end_day {
            for period in SETTLEMENT_PERIODS {
                let params = physical_params(dataset, day, period);
                match self
                    .request_rows(PHYSICAL_PATH, &params, PayloadKind::Json)
                    .await
                {
                    Ok((rows, _)) => {
                        collected.extend(rows.into_iter().filter(|row| {
                            row.get("dataset")
                                .and_then(|v| v.as_str())
                                .is_some_and(|code| code.eq_ignore_ascii_case(dataset))
                        }));
                    }
                    Err(StepFailure::NoData) => {}
                    Err(failure @ StepFailure::Transport(_)) => return Err(failure),
                    Err(failure) => client_failure = Some(failure),
                }
            }
            day += chrono::Duration::days(1);
        }

        if !collected.is_empty() {
            Ok(Some(collected))
        } else if let Some(failure) = client_failure {
            Err(failure)
        } else {
            Ok(None)
        }
    }

    /// Persist a raw response body to `{data_dir}/{DATASET}/{date}_{time}.json`.
    ///
    /// Best-effort: a sink failure is logged and never fails the fetch.
    fn dump_raw(&self, dataset: &str, window: TimeWindow, body: &str) {
        let Some(data_dir) = &self.data_dir else {
            return;
        };
        let dir = data_dir.join(dataset);
        let path = dir.join(format!("{}.json", format_compact_utc(window.start)));
        let result = std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, body));
        match result {
            Ok(()) => debug!(
                event_type = "raw_dump_written",
                dataset = %dataset,
                path = %path.display(),
                "Raw payload dumped"
            ),
            Err(err) => warn!(
                event_type = "raw_dump_failed",
                dataset = %dataset,
                path = %path.display(),
                error = %err,
                "Failed writing raw payload dump"
            ),
        }
    }
}

/// Blocking fetch interface the orchestrator consumes.
///
/// Implemented by [`BlockingFetcher`] for production and by scripted
/// doubles in tests.
pub trait WindowFetcher {
    /// Fetch one window of one dataset, blocking until resolved.
    fn fetch_window(&mut self, dataset: &str, window: TimeWindow)
        -> Result<Vec<RawRow>, FetchError>;
}

/// Synchronous facade over [`FetchClient`].
///
/// Owns a current-thread tokio runtime and drives the async client to
/// completion per call, keeping the pipeline single-threaded and
/// blocking.
pub struct BlockingFetcher {
    inner: FetchClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingFetcher {
    /// Build the blocking facade.
    pub fn new(api: ApiConfig, data_dir: Option<PathBuf>) -> Result<Self, FetchError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| FetchError::Runtime(e.to_string()))?;
        Ok(Self {
            inner: FetchClient::new(api, data_dir)?,
            runtime,
        })
    }
}

impl WindowFetcher for BlockingFetcher {
    fn fetch_window(
        &mut self,
        dataset: &str,
        window: TimeWindow,
    ) -> Result<Vec<RawRow>, FetchError> {
        self.runtime.block_on(self.inner.fetch(dataset, window))
    }
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
    fn test_classify_status() {
        assert_eq!(classify_status(200), StatusClass::Ok);
        assert_eq!(classify_status(204), StatusClass::Ok);
        assert_eq!(classify_status(404), StatusClass::NoData);
        assert_eq!(classify_status(400), StatusClass::Client);
        assert_eq!(classify_status(422), StatusClass::Client);
        assert_eq!(classify_status(429), StatusClass::Client);
        assert_eq!(classify_status(500), StatusClass::Server);
        assert_eq!(classify_status(503), StatusClass::Server);
    }

    #[test]
    fn test_all_not_found_resolves_to_empty_table() {
        // Fallback termination: only 404s along the chain -> empty, not error
        let result = resolve_exhausted("FUELHH", Some(StepFailure::NoData)).unwrap();
        assert!(result.is_empty());

        let result = resolve_exhausted("FUELHH", None).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_terminal_bad_request_is_raised() {
        let failure = StepFailure::ClientError {
            status: 400,
            body: "bad from parameter".to_string(),
        };
        let result = resolve_exhausted("FUELHH", Some(failure));
        assert!(matches!(
            result,
            Err(FetchError::Rejected { status: 400, .. })
        ));

        let failure = StepFailure::ClientError {
            status: 422,
            body: "unprocessable".to_string(),
        };
        assert!(matches!(
            resolve_exhausted("FREQ", Some(failure)),
            Err(FetchError::Rejected { status: 422, .. })
        ));
    }

    #[test]
    fn test_other_client_errors_resolve_to_empty() {
        let failure = StepFailure::ClientError {
            status: 403,
            body: "forbidden".to_string(),
        };
        let result = resolve_exhausted("FUELHH", Some(failure)).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_exhausted_transport_is_raised() {
        let failure = StepFailure::Transport("connect timeout".to_string());
        assert!(matches!(
            resolve_exhausted("FUELHH", Some(failure)),
            Err(FetchError::Transport { .. })
        ));
    }

    #[test]
    fn test_decode_failure_is_raised() {
        let failure = StepFailure::Decode("unexpected token".to_string());
        assert!(matches!(
            resolve_exhausted("FUELHH", Some(failure)),
            Err(FetchError::Decode { .. })
        ));
    }

    #[test]
    fn test_decode_body_json_and_csv() {
        let json = r#"{"data": [{"a": 1}]}"#;
        assert_eq!(decode_body(json, PayloadKind::Json).unwrap().len(), 1);

        let csv = "a,b\n1,2\n";
        assert_eq!(decode_body(csv, PayloadKind::Csv).unwrap().len(), 1);

        assert!(matches!(
            decode_body("not json", PayloadKind::Json),
            Err(StepFailure::Decode(_))
        ));
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");
        let long = "x".repeat(1000);
        assert!(truncate_body(&long).len() < 1000);
    }

    #[test]
    fn test_dump_raw_layout() {
        let dir = tempfile::tempdir().unwrap();
        let client = FetchClient::new(ApiConfig::default(), Some(dir.path().to_path_buf()))
            .expect("client builds");
        client.dump_raw("FUELHH", window(), r#"{"data": []}"#);

        let expected = dir.path().join("FUELHH").join("20240101_000000.json");
        assert!(expected.exists());
        let contents = std::fs::read_to_string(expected).unwrap();
        assert_eq!(contents, r#"{"data": []}"#);
    }

    #[test]
    fn test_dump_disabled_without_data_dir() {
        let client = FetchClient::new(ApiConfig::default(), None).expect("client builds");
        // Must be a no-op rather than an error.
        client.dump_raw("FUELHH", window(), "{}");
    }
}
