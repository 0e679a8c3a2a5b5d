use crate::buckets::{parse_bucket_count, BucketUnit};
use crate::features::FeatureGroup;
use crate::models::TimestampFormat;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "bearing-monitor",
    version,
    about = "Bearing condition dashboard poller"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll the backend and print a bucket line on every refresh.
    Watch(WatchArgs),
    /// Fetch once and print the anomaly buckets.
    Buckets(BucketsArgs),
    /// Fetch once and print one feature group as JSON.
    Features(FeaturesArgs),
    /// Print the newest lines of a retraining run.
    Logs(LogsArgs),
    /// Print the VRMS trend of a channel.
    Vrms(VrmsArgs),
    /// Query vibration spectra.
    Spectrum(SpectrumArgs),
    /// Probe the backend health endpoint.
    Health,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[arg(long, default_value = "minute")]
    pub unit: BucketUnit,
    /// Bucket count; defaults to the configured window for the unit.
    #[arg(long, value_parser = parse_bucket_count)]
    pub count: Option<usize>,
    /// Also follow this retraining run's log.
    #[arg(long)]
    pub log_id: Option<i64>,
}

#[derive(Args, Debug)]
pub struct BucketsArgs {
    #[arg(long, default_value = "minute")]
    pub unit: BucketUnit,
    #[arg(long, value_parser = parse_bucket_count)]
    pub count: Option<usize>,
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct FeaturesArgs {
    #[arg(long)]
    pub limit: Option<u32>,
    #[arg(long, default_value = "time")]
    pub group: FeatureGroup,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    #[arg(long)]
    pub log_id: i64,
    #[arg(long)]
    pub limit: Option<u32>,
}

#[derive(Args, Debug)]
pub struct VrmsArgs {
    #[arg(long)]
    pub channel_id: i64,
    #[arg(long, default_value_t = 300)]
    pub limit: u32,
}

#[derive(Args, Debug)]
pub struct SpectrumArgs {
    /// Print full spectra as JSON instead of one peak line per channel.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
    #[command(subcommand)]
    pub query: SpectrumQuery,
}

#[derive(Subcommand, Debug)]
pub enum SpectrumQuery {
    /// Recent capture times of one channel, newest first.
    Timestamps {
        #[arg(long)]
        channel: i64,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value = "local")]
        format: TimestampFormat,
    },
    /// Spectra captured at `--ts`, or at the newest capture.
    ByTs {
        #[arg(long, value_delimiter = ',', required = true)]
        channels: Vec<i64>,
        #[arg(long)]
        ts: Option<String>,
    },
    /// Each channel's n-th newest spectrum.
    ByRank {
        #[arg(long, value_delimiter = ',', required = true)]
        channels: Vec<i64>,
        #[arg(long, default_value_t = 0)]
        rank: u32,
    },
    /// Spectra at the n-th newest capture time shared by all channels.
    ByCommon {
        #[arg(long, value_delimiter = ',', required = true)]
        channels: Vec<i64>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
}
