use crate::config::Config;
use crate::error::{FetchError, FetchResult};
use crate::models::{
    order_by_seq, ChannelResult, FeatureRow, HealthStatus, LogRecord, ResultRecord, Spectrum,
    TimestampFormat, VrmsPoint,
};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

// Upper bounds the backend enforces anyway; clamping here keeps the
// requested and returned counts in agreement.
const MAX_RESULT_LIMIT: u32 = 200;
const MAX_FEATURE_LIMIT: u32 = 500;
const MAX_LOG_LIMIT: u32 = 500;
const MAX_VRMS_LIMIT: u32 = 5000;

/// Typed access to the PMS backend's read-only JSON endpoints.
#[derive(Clone, Debug)]
pub struct FetchGateway {
    client: Client,
    base_url: String,
}

impl FetchGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.api_base_url, config.http_timeout())
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T, Q>(&self, path: &str, query: &Q) -> FetchResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%url, status = status.as_u16(), "backend returned non-success");
            return Err(FetchError::HttpError {
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Newest-first classifier results for the monitored bearing.
    pub async fn ai_results(&self, limit: u32) -> FetchResult<Vec<ResultRecord>> {
        let limit = limit.clamp(1, MAX_RESULT_LIMIT);
        let rows: Vec<ResultRecord> = self
            .get_json("/api/airesult/single", &[("limit", limit)])
            .await?;
        tracing::debug!(count = rows.len(), limit, "fetched ai results");
        Ok(rows)
    }

    pub async fn channel_results(
        &self,
        channel_id: i64,
        limit: u32,
    ) -> FetchResult<Vec<ChannelResult>> {
        let limit = limit.clamp(1, MAX_RESULT_LIMIT);
        self.get_json(
            "/api/airesult/latest",
            &[("channelId", channel_id), ("limit", i64::from(limit))],
        )
        .await
    }

    pub async fn feature_rows(&self, limit: u32) -> FetchResult<Vec<FeatureRow>> {
        let limit = limit.clamp(1, MAX_FEATURE_LIMIT);
        let rows: Vec<FeatureRow> = self.get_json("/api/realtime", &[("limit", limit)]).await?;
        tracing::debug!(count = rows.len(), limit, "fetched feature rows");
        Ok(rows)
    }

    /// Every line of one retraining run, in `seq` order.
    pub async fn retrain_logs(&self, log_id: i64) -> FetchResult<Vec<LogRecord>> {
        let mut rows: Vec<LogRecord> = self
            .get_json("/api/retrain/detail/by-log-id", &[("logId", log_id)])
            .await?;
        order_by_seq(&mut rows);
        Ok(rows)
    }

    /// The newest `limit` lines of one run. The backend returns them newest
    /// first; they come back here in `seq` order.
    pub async fn latest_retrain_logs(
        &self,
        log_id: i64,
        limit: u32,
    ) -> FetchResult<Vec<LogRecord>> {
        let limit = limit.clamp(1, MAX_LOG_LIMIT);
        let mut rows: Vec<LogRecord> = self
            .get_json(
                "/api/retrain/detail/latest-by-log-id",
                &[("logId", log_id), ("limit", i64::from(limit))],
            )
            .await?;
        order_by_seq(&mut rows);
        tracing::debug!(count = rows.len(), log_id, "fetched retrain log lines");
        Ok(rows)
    }

    pub async fn recent_retrain_logs(&self, limit: u32) -> FetchResult<Vec<LogRecord>> {
        let limit = limit.clamp(1, MAX_LOG_LIMIT);
        self.get_json("/api/retrain/detail", &[("limit", limit)])
            .await
    }

    pub async fn vrms_latest(&self, channel_id: i64, limit: u32) -> FetchResult<Vec<VrmsPoint>> {
        let limit = limit.clamp(1, MAX_VRMS_LIMIT);
        self.get_json(
            "/api/vrms/latest",
            &[("channelId", channel_id), ("limit", i64::from(limit))],
        )
        .await
    }

    pub async fn health(&self) -> FetchResult<HealthStatus> {
        self.get_json("/api/health", &[] as &[(&str, &str)]).await
    }

    /// Recent spectrum capture times of one channel, newest first.
    pub async fn spectrum_timestamps(
        &self,
        channel: i64,
        limit: u32,
        format: TimestampFormat,
    ) -> FetchResult<Vec<String>> {
        let query = [
            ("channel", channel.to_string()),
            ("limit", limit.max(1).to_string()),
            ("format", format.as_str().to_string()),
        ];
        self.get_json("/api/spectrum/timestamps", &query).await
    }

    /// Spectra of `channels` captured at `ts`, or at the newest capture when
    /// `ts` is absent. `ts` may be zone-less local time or RFC 3339 UTC.
    pub async fn spectrum_by_ts(
        &self,
        channels: &[i64],
        ts: Option<&str>,
    ) -> FetchResult<Vec<Spectrum>> {
        let mut query = vec![("channels", join_channels(channels))];
        if let Some(ts) = ts.map(str::trim).filter(|ts| !ts.is_empty()) {
            query.push(("ts", ts.to_string()));
        }
        self.spectra("/api/spectrum/by-ts", channels, &query).await
    }

    /// Each channel's `rank`-th newest spectrum (0 is the newest). Channels
    /// with fewer captures are left out.
    pub async fn spectrum_by_rank(&self, channels: &[i64], rank: u32) -> FetchResult<Vec<Spectrum>> {
        let query = [
            ("channels", join_channels(channels)),
            ("rank", rank.to_string()),
        ];
        self.spectra("/api/spectrum/by-rank", channels, &query).await
    }

    /// Spectra at the `offset`-th newest capture time shared by every channel.
    pub async fn spectrum_by_common(
        &self,
        channels: &[i64],
        offset: u32,
    ) -> FetchResult<Vec<Spectrum>> {
        let query = [
            ("channels", join_channels(channels)),
            ("offset", offset.to_string()),
        ];
        self.spectra("/api/spectrum/by-common", channels, &query).await
    }

    async fn spectra<Q>(&self, path: &str, channels: &[i64], query: &Q) -> FetchResult<Vec<Spectrum>>
    where
        Q: Serialize + ?Sized,
    {
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        let mut rows: Vec<Spectrum> = self.get_json(path, query).await?;
        rows.sort_by_key(|row| row.channel_id);
        tracing::debug!(count = rows.len(), path, "fetched spectra");
        Ok(rows)
    }
}

fn join_channels(channels: &[i64]) -> String {
    channels
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
