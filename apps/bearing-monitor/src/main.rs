use anyhow::{bail, Result};
use bearing_monitor::buckets::{anomaly_count, BucketUnit, TimeBucket};
use bearing_monitor::cli::{
    BucketsArgs, Cli, Commands, FeaturesArgs, LogsArgs, SpectrumArgs, SpectrumQuery, VrmsArgs,
    WatchArgs,
};
use bearing_monitor::config::Config;
use bearing_monitor::dashboard::{Dashboard, ResultPanel};
use bearing_monitor::features::{self, FeatureGroup};
use bearing_monitor::gateway::FetchGateway;
use bearing_monitor::models::{Spectrum, Verdict};
use bearing_monitor::scheduler::RefreshOutcome;
use clap::Parser;

fn otlp_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as TraceConfig, Resource};

    let resource = Resource::new(vec![
        KeyValue::new("service.name", "bearing-monitor"),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(normalize_otlp_http_endpoint(endpoint)),
        )
        .with_trace_config(TraceConfig::default().with_resource(resource))
        .install_batch(Tokio)?;
    Ok(tracer)
}

/// Installs the subscriber. Spans are also exported over OTLP/HTTP when an
/// endpoint is configured.
fn init_tracing(config: &Config) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,bearing_monitor=info".into());
    // Command output owns stdout.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    let otel_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => Some(tracing_opentelemetry::layer().with_tracer(otlp_tracer(endpoint)?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;
    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{trimmed}/v1/traces")
}

fn render_line(unit: BucketUnit, buckets: &[TimeBucket], latest: Option<Verdict>) -> String {
    let cells: Vec<String> = buckets
        .iter()
        .map(|bucket| format!("{}:{}", bucket.label, bucket.value))
        .collect();
    let latest = match latest {
        Some(Verdict::Anomalous) => "anomalous",
        Some(Verdict::Normal) => "normal",
        None => "none",
    };
    format!(
        "[{unit}] {} | anomalies={}/{} latest={latest}",
        cells.join(" "),
        anomaly_count(buckets),
        buckets.len()
    )
}

async fn run_watch(config: Config, args: WatchArgs) -> Result<()> {
    let gateway = FetchGateway::from_config(&config)?;
    let dashboard = Dashboard::new(gateway, &config, args.log_id);
    let count = args
        .count
        .unwrap_or_else(|| dashboard.results.window(args.unit));

    let mut results = dashboard.results.subscribe();
    for outcome in dashboard.load().await {
        if let RefreshOutcome::Failed(err) = outcome {
            tracing::warn!(error = %err, "initial load incomplete");
        }
    }
    let print = |dashboard: &Dashboard| {
        let buckets = dashboard.results.buckets(args.unit, count);
        println!(
            "{}",
            render_line(args.unit, &buckets, dashboard.results.latest_verdict())
        );
        if let Some(logs) = &dashboard.logs {
            if let Some(line) = logs.lines().last() {
                println!(
                    "  log {} #{} {} {}",
                    logs.log_id(),
                    line.seq,
                    line.level,
                    line.text.as_deref().unwrap_or("")
                );
            }
        }
    };
    results.mark_unchanged();
    print(&dashboard);

    dashboard.start_all(config.refresh_interval());
    loop {
        tokio::select! {
            changed = results.changed() => {
                if changed.is_err() {
                    break;
                }
                print(&dashboard);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }
    dashboard.stop_all();
    Ok(())
}

async fn print_buckets(config: Config, args: BucketsArgs) -> Result<()> {
    let gateway = FetchGateway::from_config(&config)?;
    let panel = ResultPanel::new(gateway, config.result_limit, config.wall_clock())
        .with_windows(config.minute_buckets, config.hour_buckets);
    if let RefreshOutcome::Failed(err) = panel.refresh_now().await {
        return Err(err.into());
    }
    let count = args.count.unwrap_or_else(|| panel.window(args.unit));
    let buckets = panel.buckets(args.unit, count);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&buckets)?);
    } else {
        println!("{}", render_line(args.unit, &buckets, panel.latest_verdict()));
    }
    Ok(())
}

async fn print_features(config: Config, args: FeaturesArgs) -> Result<()> {
    let gateway = FetchGateway::from_config(&config)?;
    let mut rows = gateway
        .feature_rows(args.limit.unwrap_or(config.feature_limit))
        .await?;
    features::sort_chronologically(&mut rows);
    let output = match args.group {
        FeatureGroup::Time => serde_json::to_string_pretty(&features::time_domain(&rows))?,
        FeatureGroup::Fft => serde_json::to_string_pretty(&features::fft(&rows))?,
        FeatureGroup::Wavelet => serde_json::to_string_pretty(&features::wavelet(&rows))?,
    };
    println!("{output}");
    Ok(())
}

async fn print_logs(config: Config, args: LogsArgs) -> Result<()> {
    let gateway = FetchGateway::from_config(&config)?;
    let lines = gateway
        .latest_retrain_logs(args.log_id, args.limit.unwrap_or(config.log_limit))
        .await?;
    for line in lines {
        println!(
            "{} #{:<4} {:<5} {}",
            line.ts,
            line.seq,
            line.level,
            line.text.unwrap_or_default()
        );
    }
    Ok(())
}

async fn print_vrms(config: Config, args: VrmsArgs) -> Result<()> {
    let gateway = FetchGateway::from_config(&config)?;
    let points = gateway.vrms_latest(args.channel_id, args.limit).await?;
    println!("{}", serde_json::to_string_pretty(&points)?);
    Ok(())
}

fn render_spectrum(spectrum: &Spectrum) -> String {
    let peak = match spectrum.peak() {
        Some((freq, amplitude)) => format!("{freq:.1}Hz@{amplitude:.4}"),
        None => "none".to_string(),
    };
    format!(
        "ch{} {} bins={} peak={peak}",
        spectrum.channel_id,
        spectrum.ts,
        spectrum.freq.len()
    )
}

async fn print_spectrum(config: Config, args: SpectrumArgs) -> Result<()> {
    let gateway = FetchGateway::from_config(&config)?;
    let spectra = match args.query {
        SpectrumQuery::Timestamps {
            channel,
            limit,
            format,
        } => {
            let stamps = gateway.spectrum_timestamps(channel, limit, format).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&stamps)?);
            } else {
                for stamp in stamps {
                    println!("{stamp}");
                }
            }
            return Ok(());
        }
        SpectrumQuery::ByTs { channels, ts } => {
            gateway.spectrum_by_ts(&channels, ts.as_deref()).await?
        }
        SpectrumQuery::ByRank { channels, rank } => {
            gateway.spectrum_by_rank(&channels, rank).await?
        }
        SpectrumQuery::ByCommon { channels, offset } => {
            gateway.spectrum_by_common(&channels, offset).await?
        }
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&spectra)?);
    } else {
        for spectrum in &spectra {
            println!("{}", render_spectrum(spectrum));
        }
    }
    Ok(())
}

async fn probe_health(config: Config) -> Result<()> {
    let gateway = FetchGateway::from_config(&config)?;
    let status = gateway.health().await?;
    println!("{} {}", gateway.base_url(), status.status);
    if !status.is_ok() {
        bail!("backend reports status {:?}", status.status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config)?;

    match cli.command {
        Commands::Watch(args) => run_watch(config, args).await,
        Commands::Buckets(args) => print_buckets(config, args).await,
        Commands::Features(args) => print_features(config, args).await,
        Commands::Logs(args) => print_logs(config, args).await,
        Commands::Vrms(args) => print_vrms(config, args).await,
        Commands::Spectrum(args) => print_spectrum(config, args).await,
        Commands::Health => probe_health(config).await,
    }
}
