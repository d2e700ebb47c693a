//! Series store (VictoriaMetrics) client fixture.
//!
//! The store speaks three time units: line-protocol ingest takes
//! nanoseconds, `/api/v1/export` returns milliseconds, and PromQL query
//! parameters are seconds. [`SeriesTimestamp`] keeps the conversions in one
//! place so tests compare like with like.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Selector matching every series in the store.
const MATCH_ALL: &str = r#"{__name__!=""}"#;

/// Series store client errors.
#[derive(Debug, Error)]
pub enum SeriesStoreError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Request to {endpoint} failed with status {status}: {body}")]
    RequestFailed {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("JSON deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A point in time, stored in milliseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesTimestamp(i64);

impl SeriesTimestamp {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    /// Truncates sub-millisecond precision.
    pub fn from_nanos(ns: i64) -> Self {
        Self(ns / 1_000_000)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1000.0).round() as i64)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn as_nanos(self) -> i64 {
        self.0.saturating_mul(1_000_000)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

/// One series as returned by `/api/v1/export`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExportedSeries {
    pub metric: HashMap<String, String>,
    pub values: Vec<f64>,
    /// Milliseconds.
    pub timestamps: Vec<i64>,
}

impl ExportedSeries {
    /// Metric name, if the series has one.
    pub fn name(&self) -> Option<&str> {
        self.metric.get("__name__").map(String::as_str)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metric.get(key).map(String::as_str)
    }

    /// `(timestamp, value)` pairs in export order.
    pub fn samples(&self) -> impl Iterator<Item = (SeriesTimestamp, f64)> + '_ {
        self.timestamps
            .iter()
            .zip(&self.values)
            .map(|(ts, v)| (SeriesTimestamp::from_millis(*ts), *v))
    }
}

/// Parse an export body: one JSON object per line.
pub fn parse_export(body: &str) -> Result<Vec<ExportedSeries>, SeriesStoreError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(SeriesStoreError::from))
        .collect()
}

/// Range query response.
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    pub data: QueryData,
}

/// Query response data.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub result_type: String,
    pub result: Vec<QueryResult>,
}

/// A single query result. Sample timestamps are seconds.
#[derive(Debug, Deserialize)]
pub struct QueryResult {
    pub metric: HashMap<String, String>,
    pub value: Option<(f64, String)>,
    pub values: Option<Vec<(f64, String)>>,
}

/// Parameters for `/api/v1/query_range`.
#[derive(Debug, Serialize)]
struct RangeQuery<'a> {
    query: &'a str,
    start: f64,
    end: f64,
    step: String,
}

/// Client for the series store.
#[derive(Debug, Clone)]
pub struct SeriesStore {
    base_url: String,
    http_client: Client,
}

impl SeriesStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SeriesStoreError> {
        let http_client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(
        endpoint: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, SeriesStoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SeriesStoreError::RequestFailed {
            endpoint,
            status: status.as_u16(),
            body: super::truncate_body(&body),
        })
    }

    /// Whether the store answers its health endpoint.
    pub async fn health(&self) -> Result<(), SeriesStoreError> {
        let response = self
            .http_client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        Self::check("/health", response).await?;
        Ok(())
    }

    /// Ingest InfluxDB line protocol (nanosecond timestamps).
    pub async fn write_lines(&self, lines: &[String]) -> Result<(), SeriesStoreError> {
        let response = self
            .http_client
            .post(format!("{}/write", self.base_url))
            .body(lines.join("\n"))
            .send()
            .await?;

        Self::check("/write", response).await?;
        debug!(target: "lake.env", lines = lines.len(), "Wrote series lines");
        Ok(())
    }

    /// Export series matching `selector`. Timestamps are milliseconds.
    pub async fn export(&self, selector: &str) -> Result<Vec<ExportedSeries>, SeriesStoreError> {
        let response = self
            .http_client
            .get(format!("{}/api/v1/export", self.base_url))
            .query(&[("match[]", selector)])
            .send()
            .await?;

        let body = Self::check("/api/v1/export", response).await?.text().await?;
        parse_export(&body)
    }

    /// Export every series in the store.
    pub async fn export_all(&self) -> Result<Vec<ExportedSeries>, SeriesStoreError> {
        self.export(MATCH_ALL).await
    }

    /// Run a PromQL range query. `start` and `end` are sent as seconds.
    pub async fn query_range(
        &self,
        query: &str,
        start: SeriesTimestamp,
        end: SeriesTimestamp,
        step: Duration,
    ) -> Result<QueryResponse, SeriesStoreError> {
        let params = RangeQuery {
            query,
            start: start.as_secs_f64(),
            end: end.as_secs_f64(),
            step: format!("{}s", step.as_secs().max(1)),
        };

        let response = self
            .http_client
            .get(format!("{}/api/v1/query_range", self.base_url))
            .query(&params)
            .send()
            .await?;

        let query_response = Self::check("/api/v1/query_range", response)
            .await?
            .json::<QueryResponse>()
            .await?;

        if query_response.status != "success" {
            return Err(SeriesStoreError::QueryFailed(format!(
                "Query status: {}",
                query_response.status
            )));
        }

        Ok(query_response)
    }

    /// Delete every series.
    pub async fn delete_all(&self) -> Result<(), SeriesStoreError> {
        let response = self
            .http_client
            .post(format!("{}/api/v1/admin/tsdb/delete_series", self.base_url))
            .query(&[("match[]", MATCH_ALL)])
            .send()
            .await?;

        Self::check("/api/v1/admin/tsdb/delete_series", response).await?;
        debug!(target: "lake.env", "Deleted all series");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_unit_conversions() {
        let ts = SeriesTimestamp::from_millis(1_626_179_600_123);

        assert_eq!(ts.as_nanos(), 1_626_179_600_123_000_000);
        assert_eq!(SeriesTimestamp::from_nanos(ts.as_nanos()), ts);
        assert!((ts.as_secs_f64() - 1_626_179_600.123).abs() < 1e-6);
        assert_eq!(SeriesTimestamp::from_secs_f64(1_626_179_600.123), ts);
    }

    #[test]
    fn test_from_nanos_truncates() {
        assert_eq!(
            SeriesTimestamp::from_nanos(1_999_999).as_millis(),
            1
        );
    }

    #[test]
    fn test_parse_export_lines() {
        let body = concat!(
            r#"{"metric":{"__name__":"cpu_usage","object_id":"a"},"values":[1.5],"timestamps":[1626179600000]}"#,
            "\n",
            r#"{"metric":{"__name__":"cpu_usage","object_id":"b"},"values":[2,3],"timestamps":[1626179600000,1626179601000]}"#,
            "\n\n"
        );

        let series = parse_export(body).expect("export should parse");

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].name(), Some("cpu_usage"));
        assert_eq!(series[0].label("object_id"), Some("a"));
        let samples: Vec<_> = series[1].samples().collect();
        assert_eq!(
            samples,
            vec![
                (SeriesTimestamp::from_millis(1_626_179_600_000), 2.0),
                (SeriesTimestamp::from_millis(1_626_179_601_000), 3.0),
            ]
        );
    }

    #[test]
    fn test_parse_export_empty_body() {
        assert!(parse_export("").expect("empty export parses").is_empty());
    }

    #[test]
    fn test_parse_export_rejects_garbage() {
        assert!(matches!(
            parse_export("not json"),
            Err(SeriesStoreError::JsonError(_))
        ));
    }

    #[test]
    fn test_query_response_deserializes() {
        let json = r#"{
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{"metric": {"__name__": "cpu"}, "values": [[1626179600, "1.5"]]}]
            }
        }"#;

        let response: QueryResponse = serde_json::from_str(json).expect("response parses");
        assert_eq!(response.data.result_type, "matrix");
        let values = response.data.result[0].values.as_ref().expect("values");
        assert_eq!(values[0], (1_626_179_600.0, "1.5".to_string()));
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let store = SeriesStore::new("http://127.0.0.1:8428/").expect("client builds");
        assert_eq!(store.base_url(), "http://127.0.0.1:8428");
    }
}
