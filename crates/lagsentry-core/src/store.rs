//! Metrics Store Access
//!
//! `SeriesStore` is the seam between the pipeline and the remote metrics
//! store. `GraphiteStore` talks to a Graphite render endpoint (directly or
//! through a dashboard proxy) with one bounded-timeout request per target
//! and no retries.

use crate::error::FetchError;
use crate::series::{RawValue, SeriesPoint, TimeSeries};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Pulls time series for one target over a time range
pub trait SeriesStore {
    /// Several logical series may come back for one target; an empty
    /// vector means the store had nothing.
    fn fetch(
        &self,
        target: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TimeSeries>, FetchError>;
}

impl<S: SeriesStore + ?Sized> SeriesStore for &S {
    fn fetch(
        &self,
        target: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TimeSeries>, FetchError> {
        (**self).fetch(target, from, until)
    }
}

#[derive(Debug, Clone)]
pub struct GraphiteConfig {
    /// Full render URL, e.g. `https://graphite.example/render`
    pub render_url: String,
    /// Sent as `Authorization: Bearer ...` when set
    pub api_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GraphiteConfig {
    fn default() -> Self {
        Self {
            render_url: "http://localhost:8080/render".to_string(),
            api_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Wire format of one Graphite render series
#[derive(Debug, Deserialize)]
struct GraphiteSeries {
    #[serde(default)]
    target: String,
    /// `[value, unix_seconds]` pairs
    datapoints: Vec<(Option<RawValue>, Option<f64>)>,
}

impl From<GraphiteSeries> for TimeSeries {
    fn from(wire: GraphiteSeries) -> Self {
        let points = wire
            .datapoints
            .into_iter()
            .filter_map(|(value, ts)| {
                let timestamp = DateTime::from_timestamp(ts? as i64, 0)?;
                Some(SeriesPoint { timestamp, value })
            })
            .collect();
        TimeSeries::new(wire.target, points)
    }
}

/// Decode a render response body
pub fn decode_render_response(body: &str) -> Result<Vec<TimeSeries>, FetchError> {
    let wire: Vec<GraphiteSeries> =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(wire.into_iter().map(TimeSeries::from).collect())
}

/// Any non-2xx answer is a failed fetch
fn check_status(status: reqwest::StatusCode) -> Result<(), FetchError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(FetchError::Status(status.as_u16()))
    }
}

pub struct GraphiteStore {
    client: reqwest::blocking::Client,
    config: GraphiteConfig,
}

impl GraphiteStore {
    pub fn new(config: GraphiteConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }
}

impl SeriesStore for GraphiteStore {
    fn fetch(
        &self,
        target: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TimeSeries>, FetchError> {
        let params = [
            ("target", target.to_string()),
            ("from", from.timestamp().to_string()),
            ("until", until.timestamp().to_string()),
            ("format", "json".to_string()),
        ];

        let mut request = self.client.get(&self.config.render_url).query(&params);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        check_status(response.status())?;
        let body = response.text()?;
        let series = decode_render_response(&body)?;
        debug!(metric = target, series = series.len(), "fetched render response");
        Ok(series)
    }
}
