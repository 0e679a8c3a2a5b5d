use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Binary output of the anomaly classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Verdict {
    Normal,
    Anomalous,
}

impl Verdict {
    pub fn is_anomalous(self) -> bool {
        matches!(self, Verdict::Anomalous)
    }

    pub fn as_flag(self) -> u8 {
        match self {
            Verdict::Normal => 0,
            Verdict::Anomalous => 1,
        }
    }
}

impl TryFrom<i64> for Verdict {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Verdict::Normal),
            1 => Ok(Verdict::Anomalous),
            other => Err(format!("result must be 0 or 1, got {other}")),
        }
    }
}

impl From<Verdict> for i64 {
    fn from(value: Verdict) -> Self {
        i64::from(value.as_flag())
    }
}

/// One row of `pms_ai_result`, as served by `/api/airesult/single`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub id: i64,
    pub result: Verdict,
    /// Zone-less wall-clock time written by the classifier host.
    pub created_at: NaiveDateTime,
}

/// Per-channel anomaly level from `/api/airesult/latest`, ascending by `ts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResult {
    pub ts: NaiveDateTime,
    #[serde(default)]
    pub anomaly_lvl: Option<i32>,
}

/// A row of extracted vibration features from `/api/realtime`.
///
/// The backend serialises each feature as its own camelCase field
/// (`timeRms`, `fftAmp1x`, `cD3Kurtosis`, ...); everything that is not the
/// row key lands in `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub id: i64,
    #[serde(default)]
    pub ts: Option<NaiveDateTime>,
    #[serde(flatten)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl FeatureRow {
    pub fn value(&self, feature: &str) -> Option<f64> {
        self.values.get(feature).and_then(serde_json::Value::as_f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Other(String),
}

impl From<String> for LogLevel {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "INFO" => LogLevel::Info,
            "WARN" | "WARNING" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            _ => LogLevel::Other(value),
        }
    }
}

impl From<LogLevel> for String {
    fn from(value: LogLevel) -> Self {
        value.to_string()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Other(raw) => raw,
        };
        f.pad(name)
    }
}

/// One line of a retraining run (`pms_retrain_log_detail`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    pub log_id: i64,
    pub seq: i64,
    pub level: LogLevel,
    #[serde(default)]
    pub text: Option<String>,
    pub ts: NaiveDateTime,
}

/// Sorts log lines into their group order. Stable for equal `seq`.
pub fn order_by_seq(records: &mut [LogRecord]) {
    records.sort_by_key(|record| (record.log_id, record.seq));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VrmsPoint {
    pub ts: NaiveDateTime,
    pub vrms: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// Rendering of `/api/spectrum/timestamps` entries: zone-less local time, or
/// UTC with a trailing `Z`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampFormat {
    #[default]
    Local,
    Utc,
}

impl TimestampFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            TimestampFormat::Local => "local",
            TimestampFormat::Utc => "utc",
        }
    }
}

impl FromStr for TimestampFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(TimestampFormat::Local),
            "utc" => Ok(TimestampFormat::Utc),
            other => Err(format!("unknown timestamp format {other:?} (expected local or utc)")),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<f64>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One decoded amplitude spectrum of a channel, from `/api/spectrum/*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spectrum {
    pub channel_id: i64,
    pub ts: NaiveDateTime,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub freq: Vec<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub amplitude: Vec<f64>,
}

impl Spectrum {
    /// Frequency and amplitude of the strongest bin. NaN amplitudes are skipped.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.freq
            .iter()
            .zip(&self.amplitude)
            .filter(|(_, amplitude)| !amplitude.is_nan())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(freq, amplitude)| (*freq, *amplitude))
    }
}
