use crate::buckets::{WallClock, MAX_BUCKET_COUNT};
use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";

fn setup_config_path() -> Option<PathBuf> {
    env::var("PMS_SETUP_CONFIG_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Optional JSON file whose values apply where the environment is silent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupConfigOverrides {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub http_timeout_ms: Option<u64>,
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
    #[serde(default)]
    pub result_limit: Option<u32>,
    #[serde(default)]
    pub feature_limit: Option<u32>,
    #[serde(default)]
    pub log_limit: Option<u32>,
    #[serde(default)]
    pub minute_buckets: Option<usize>,
    #[serde(default)]
    pub hour_buckets: Option<usize>,
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

pub fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "bearing-monitor failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "bearing-monitor failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_base_url: String,
    pub http_timeout_ms: u64,
    pub refresh_interval_ms: u64,
    pub result_limit: u32,
    pub feature_limit: u32,
    pub log_limit: u32,
    pub minute_buckets: usize,
    pub hour_buckets: usize,
    pub utc_offset_minutes: Option<i32>,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let overrides = setup_config_path().and_then(|path| load_setup_config_overrides(&path));
        Self::from_lookup(|key| env::var(key).ok(), overrides.as_ref())
    }

    /// Resolves every setting from `lookup`, falling back to `overrides` and
    /// then to built-in defaults.
    pub fn from_lookup<F>(lookup: F, overrides: Option<&SetupConfigOverrides>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SetupConfigOverrides::default();
        let ov = overrides.unwrap_or(&defaults);
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_base_url = value("PMS_API_BASE_URL")
            .or_else(|| {
                ov.api_base_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let parsed = Url::parse(&api_base_url)
            .with_context(|| format!("invalid PMS_API_BASE_URL {api_base_url:?}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("PMS_API_BASE_URL must be http or https, got {api_base_url:?}");
        }

        let http_timeout_ms = parse_or(&value, "PMS_HTTP_TIMEOUT_MS", ov.http_timeout_ms, 15_000)?;
        if http_timeout_ms == 0 {
            bail!("PMS_HTTP_TIMEOUT_MS must be greater than zero");
        }
        let refresh_interval_ms = parse_or(
            &value,
            "PMS_REFRESH_INTERVAL_MS",
            ov.refresh_interval_ms,
            60_000,
        )?;
        if refresh_interval_ms == 0 {
            bail!("PMS_REFRESH_INTERVAL_MS must be greater than zero");
        }
        let result_limit = parse_or(&value, "PMS_RESULT_LIMIT", ov.result_limit, 200)?;
        let feature_limit = parse_or(&value, "PMS_FEATURE_LIMIT", ov.feature_limit, 50)?;
        let log_limit = parse_or(&value, "PMS_LOG_LIMIT", ov.log_limit, 50)?;
        let minute_buckets = parse_or(&value, "PMS_MINUTE_BUCKETS", ov.minute_buckets, 60)?;
        let hour_buckets = parse_or(&value, "PMS_HOUR_BUCKETS", ov.hour_buckets, 24)?;
        for (key, count) in [
            ("PMS_MINUTE_BUCKETS", minute_buckets),
            ("PMS_HOUR_BUCKETS", hour_buckets),
        ] {
            if count > MAX_BUCKET_COUNT {
                bail!("{key} must be at most {MAX_BUCKET_COUNT}, got {count}");
            }
        }

        let utc_offset_minutes = match value("PMS_UTC_OFFSET_MINUTES") {
            Some(raw) => Some(
                raw.parse::<i32>()
                    .with_context(|| format!("invalid PMS_UTC_OFFSET_MINUTES {raw:?}"))?,
            ),
            None => ov.utc_offset_minutes,
        };
        if let Some(minutes) = utc_offset_minutes {
            if WallClock::from_offset_minutes(minutes).is_none() {
                bail!("PMS_UTC_OFFSET_MINUTES out of range: {minutes}");
            }
        }

        let otlp_endpoint = value("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(Self {
            api_base_url,
            http_timeout_ms,
            refresh_interval_ms,
            result_limit,
            feature_limit,
            log_limit,
            minute_buckets,
            hour_buckets,
            utc_offset_minutes,
            otlp_endpoint,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn wall_clock(&self) -> WallClock {
        self.utc_offset_minutes
            .and_then(WallClock::from_offset_minutes)
            .unwrap_or_else(WallClock::local)
    }
}

fn parse_or<T, V>(value: &V, key: &str, fallback: Option<T>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Option<String>,
{
    match value(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid {key} {raw:?}")),
        None => Ok(fallback.unwrap_or(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[]), None).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.http_timeout(), Duration::from_secs(15));
        assert_eq!(config.result_limit, 200);
        assert_eq!(config.minute_buckets, 60);
        assert_eq!(config.hour_buckets, 24);
        assert_eq!(config.utc_offset_minutes, None);
    }

    #[test]
    fn env_wins_over_setup_file() {
        let overrides = SetupConfigOverrides {
            api_base_url: Some("http://file-host:9000".to_string()),
            refresh_interval_ms: Some(5_000),
            minute_buckets: Some(30),
            ..Default::default()
        };
        let config = Config::from_lookup(
            lookup(&[("PMS_REFRESH_INTERVAL_MS", "1000"), ("PMS_API_BASE_URL", " ")]),
            Some(&overrides),
        )
        .unwrap();
        assert_eq!(config.api_base_url, "http://file-host:9000");
        assert_eq!(config.refresh_interval_ms, 1_000);
        assert_eq!(config.minute_buckets, 30);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("PMS_REFRESH_INTERVAL_MS", "0")]), None).is_err());
        assert!(Config::from_lookup(lookup(&[("PMS_HTTP_TIMEOUT_MS", "0")]), None).is_err());
        assert!(Config::from_lookup(lookup(&[("PMS_MINUTE_BUCKETS", "10081")]), None).is_err());
        let overrides = SetupConfigOverrides {
            hour_buckets: Some(usize::MAX),
            ..Default::default()
        };
        assert!(Config::from_lookup(lookup(&[]), Some(&overrides)).is_err());
        assert!(Config::from_lookup(lookup(&[("PMS_RESULT_LIMIT", "lots")]), None).is_err());
        assert!(Config::from_lookup(lookup(&[("PMS_API_BASE_URL", "ftp://x")]), None).is_err());
        assert!(Config::from_lookup(lookup(&[("PMS_UTC_OFFSET_MINUTES", "5000")]), None).is_err());
    }

    #[test]
    fn fixed_offset_drives_wall_clock() {
        let config =
            Config::from_lookup(lookup(&[("PMS_UTC_OFFSET_MINUTES", "540")]), None).unwrap();
        assert_eq!(
            config.wall_clock(),
            WallClock::Fixed(chrono::FixedOffset::east_opt(9 * 3600).unwrap())
        );
        let unset = Config::from_lookup(lookup(&[]), None).unwrap();
        assert_eq!(unset.wall_clock(), WallClock::Local);
    }

    #[test]
    fn setup_file_is_parsed_and_bad_files_ignored() {
        let mut good = tempfile::NamedTempFile::new().unwrap();
        write!(good, r#"{{"refresh_interval_ms": 2500, "hour_buckets": 12}}"#).unwrap();
        let overrides = load_setup_config_overrides(good.path()).unwrap();
        assert_eq!(overrides.refresh_interval_ms, Some(2_500));
        assert_eq!(overrides.hour_buckets, Some(12));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, "not json").unwrap();
        assert!(load_setup_config_overrides(bad.path()).is_none());

        assert!(load_setup_config_overrides(Path::new("/nonexistent/pms.json")).is_none());
    }
}
