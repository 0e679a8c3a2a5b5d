//! Panels: one scheduler and one snapshot per backend data family.
//!
//! Each panel owns a [`RefreshScheduler`] whose fetch writes into a
//! [`SharedSnapshot`] only when the request succeeds, so a failed poll keeps
//! the previous rows on screen. Derived views (buckets, feature groups) are
//! computed on demand from whatever snapshot is current.

use crate::buckets::{bucketize, BucketUnit, TimeBucket, WallClock};
use crate::config::Config;
use crate::error::{FetchError, FetchResult};
use crate::features::{self, FeatureSeries, WaveletBand};
use crate::gateway::FetchGateway;
use crate::models::{FeatureRow, LogRecord, ResultRecord, Verdict};
use crate::scheduler::{RefreshOutcome, RefreshScheduler, RefreshState};
use crate::state::SharedSnapshot;
use chrono::NaiveDateTime;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn snapshot_scheduler<T, F, Fut>(
    name: &str,
    rows: SharedSnapshot<T>,
    fetch: F,
) -> RefreshScheduler
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<Vec<T>>> + Send + 'static,
{
    RefreshScheduler::new(name, move || {
        let rows = rows.clone();
        let pending = fetch();
        async move {
            rows.replace(pending.await?);
            Ok::<(), FetchError>(())
        }
    })
}

/// Anomaly results and their minute/hour bucket views.
pub struct ResultPanel {
    rows: SharedSnapshot<ResultRecord>,
    scheduler: RefreshScheduler,
    clock: WallClock,
    minute_buckets: usize,
    hour_buckets: usize,
}

impl ResultPanel {
    pub fn new(gateway: FetchGateway, limit: u32, clock: WallClock) -> Self {
        let rows = SharedSnapshot::new();
        let scheduler = snapshot_scheduler("ai-results", rows.clone(), move || {
            let gateway = gateway.clone();
            async move { gateway.ai_results(limit).await }
        });
        Self {
            rows,
            scheduler,
            clock,
            minute_buckets: 60,
            hour_buckets: 24,
        }
    }

    pub fn with_windows(mut self, minute_buckets: usize, hour_buckets: usize) -> Self {
        self.minute_buckets = minute_buckets;
        self.hour_buckets = hour_buckets;
        self
    }

    pub fn window(&self, unit: BucketUnit) -> usize {
        match unit {
            BucketUnit::Minute => self.minute_buckets,
            BucketUnit::Hour => self.hour_buckets,
        }
    }

    pub fn clock(&self) -> WallClock {
        self.clock
    }

    pub fn rows(&self) -> Arc<Vec<ResultRecord>> {
        self.rows.current()
    }

    pub fn minute_buckets(&self) -> Vec<TimeBucket> {
        self.buckets(BucketUnit::Minute, self.minute_buckets)
    }

    pub fn hour_buckets(&self) -> Vec<TimeBucket> {
        self.buckets(BucketUnit::Hour, self.hour_buckets)
    }

    pub fn buckets(&self, unit: BucketUnit, count: usize) -> Vec<TimeBucket> {
        self.buckets_at(unit, count, self.clock.now())
    }

    pub fn buckets_at(&self, unit: BucketUnit, count: usize, now: NaiveDateTime) -> Vec<TimeBucket> {
        bucketize(&self.rows.current(), count, unit, now)
    }

    /// Verdict of the newest result in the snapshot, if any.
    pub fn latest_verdict(&self) -> Option<Verdict> {
        self.rows
            .current()
            .iter()
            .max_by_key(|row| (row.created_at, row.id))
            .map(|row| row.result)
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.scheduler.refresh_now().await
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.scheduler.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<ResultRecord>>> {
        self.rows.subscribe()
    }
}

/// Vibration feature rows, kept oldest first.
pub struct FeaturePanel {
    rows: SharedSnapshot<FeatureRow>,
    scheduler: RefreshScheduler,
}

impl FeaturePanel {
    pub fn new(gateway: FetchGateway, limit: u32) -> Self {
        let rows = SharedSnapshot::new();
        let scheduler = snapshot_scheduler("features", rows.clone(), move || {
            let gateway = gateway.clone();
            async move {
                let mut rows = gateway.feature_rows(limit).await?;
                features::sort_chronologically(&mut rows);
                Ok::<_, FetchError>(rows)
            }
        });
        Self { rows, scheduler }
    }

    pub fn rows(&self) -> Arc<Vec<FeatureRow>> {
        self.rows.current()
    }

    pub fn time_domain(&self) -> Vec<FeatureSeries> {
        features::time_domain(&self.rows.current())
    }

    pub fn fft(&self) -> Vec<FeatureSeries> {
        features::fft(&self.rows.current())
    }

    pub fn wavelet(&self) -> Vec<WaveletBand> {
        features::wavelet(&self.rows.current())
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.scheduler.refresh_now().await
    }
}

/// Tail of one retraining run's log, in `seq` order.
pub struct RetrainLogPanel {
    log_id: i64,
    rows: SharedSnapshot<LogRecord>,
    scheduler: RefreshScheduler,
}

impl RetrainLogPanel {
    pub fn new(gateway: FetchGateway, log_id: i64, limit: u32) -> Self {
        let rows = SharedSnapshot::new();
        let scheduler = snapshot_scheduler("retrain-log", rows.clone(), move || {
            let gateway = gateway.clone();
            async move { gateway.latest_retrain_logs(log_id, limit).await }
        });
        Self {
            log_id,
            rows,
            scheduler,
        }
    }

    pub fn log_id(&self) -> i64 {
        self.log_id
    }

    pub fn lines(&self) -> Arc<Vec<LogRecord>> {
        self.rows.current()
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.scheduler.refresh_now().await
    }
}

pub struct Dashboard {
    pub results: ResultPanel,
    pub features: FeaturePanel,
    pub logs: Option<RetrainLogPanel>,
}

impl Dashboard {
    pub fn new(gateway: FetchGateway, config: &Config, log_id: Option<i64>) -> Self {
        let results = ResultPanel::new(gateway.clone(), config.result_limit, config.wall_clock())
            .with_windows(config.minute_buckets, config.hour_buckets);
        let features = FeaturePanel::new(gateway.clone(), config.feature_limit);
        let logs = log_id.map(|id| RetrainLogPanel::new(gateway, id, config.log_limit));
        Self {
            results,
            features,
            logs,
        }
    }

    fn schedulers(&self) -> impl Iterator<Item = &RefreshScheduler> {
        [
            Some(self.results.scheduler()),
            Some(self.features.scheduler()),
            self.logs.as_ref().map(RetrainLogPanel::scheduler),
        ]
        .into_iter()
        .flatten()
    }

    /// Explicit first load; every panel refreshes once, concurrently.
    pub async fn load(&self) -> Vec<RefreshOutcome> {
        futures::future::join_all(self.schedulers().map(|scheduler| scheduler.refresh_now())).await
    }

    pub fn start_all(&self, interval: Duration) {
        for scheduler in self.schedulers() {
            scheduler.start(interval);
        }
    }

    pub fn stop_all(&self) {
        for scheduler in self.schedulers() {
            scheduler.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buckets::anomaly_count;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn results(State(failing): State<Arc<AtomicBool>>) -> Response {
        if failing.load(Ordering::SeqCst) {
            return (StatusCode::SERVICE_UNAVAILABLE, "down").into_response();
        }
        Json(json!([
            {"id": 3, "result": 1, "createdAt": "2025-11-03T14:05:40"},
            {"id": 2, "result": 0, "createdAt": "2025-11-03T14:03:10"},
            {"id": 1, "result": 1, "createdAt": "2025-11-03T12:59:59"}
        ]))
        .into_response()
    }

    async fn features() -> Json<serde_json::Value> {
        Json(json!([
            {"id": 21, "timeRms": 0.9},
            {"id": 20, "timeRms": 0.7}
        ]))
    }

    async fn logs(
        axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
    ) -> Json<serde_json::Value> {
        let log_id: i64 = params
            .get("logId")
            .and_then(|value| value.parse().ok())
            .unwrap_or_default();
        Json(json!([
            {"id": 2, "logId": log_id, "seq": 2, "level": "INFO", "text": "epoch 2", "ts": "2025-11-03T10:00:02"},
            {"id": 1, "logId": log_id, "seq": 1, "level": "INFO", "text": "epoch 1", "ts": "2025-11-03T10:00:01"}
        ]))
    }

    async fn spawn_backend() -> (FetchGateway, Arc<AtomicBool>) {
        let failing = Arc::new(AtomicBool::new(false));
        let app = Router::new()
            .route("/api/airesult/single", get(results))
            .route("/api/realtime", get(features))
            .route("/api/retrain/detail/latest-by-log-id", get(logs))
            .with_state(failing.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        let gateway = FetchGateway::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
        (gateway, failing)
    }

    fn utc_clock() -> WallClock {
        WallClock::from_offset_minutes(0).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 3)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[tokio::test]
    async fn result_panel_buckets_latest_snapshot() {
        let (gateway, _) = spawn_backend().await;
        let panel = ResultPanel::new(gateway, 200, utc_clock()).with_windows(5, 3);
        assert_eq!(panel.refresh_now().await, RefreshOutcome::Refreshed);

        let minutes = panel.buckets_at(BucketUnit::Minute, panel.window(BucketUnit::Minute), at(14, 5, 59));
        let flags: Vec<u8> = minutes.iter().map(|bucket| bucket.value).collect();
        assert_eq!(flags, vec![0, 0, 0, 0, 1]);
        assert_eq!(minutes[0].label, "01분");

        let hours = panel.buckets_at(BucketUnit::Hour, panel.window(BucketUnit::Hour), at(14, 30, 0));
        let flags: Vec<u8> = hours.iter().map(|bucket| bucket.value).collect();
        assert_eq!(flags, vec![1, 0, 1]);
        assert_eq!(anomaly_count(&hours), 2);
        assert_eq!(hours[0].label, "12시");

        assert_eq!(panel.latest_verdict(), Some(Verdict::Anomalous));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let (gateway, failing) = spawn_backend().await;
        let panel = ResultPanel::new(gateway, 200, utc_clock());
        panel.refresh_now().await;
        let before = panel.rows();
        let updated = panel.refresh_state().last_updated;

        failing.store(true, Ordering::SeqCst);
        let outcome = panel.refresh_now().await;
        assert!(matches!(outcome, RefreshOutcome::Failed(_)));

        assert_eq!(panel.rows(), before);
        let state = panel.refresh_state();
        assert_eq!(state.last_updated, updated);
        assert_eq!(state.last_error.map(|err| err.kind()), Some("http_error"));
        assert!(!state.is_refreshing);
    }

    #[tokio::test]
    async fn empty_panel_still_yields_full_window() {
        let (gateway, _) = spawn_backend().await;
        let panel = ResultPanel::new(gateway, 200, utc_clock()).with_windows(60, 24);
        assert!(panel.rows().is_empty());
        assert_eq!(panel.minute_buckets().len(), 60);
        assert_eq!(panel.hour_buckets().len(), 24);
        assert_eq!(panel.latest_verdict(), None);
    }

    #[tokio::test]
    async fn dashboard_loads_every_panel() {
        let (gateway, _) = spawn_backend().await;
        let config = Config::from_lookup(|_| None, None).unwrap();
        let dashboard = Dashboard::new(gateway, &config, Some(7));

        let outcomes = dashboard.load().await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|outcome| *outcome == RefreshOutcome::Refreshed));

        let ids: Vec<i64> = dashboard.features.rows().iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![20, 21]);
        assert_eq!(dashboard.features.time_domain()[0].values, vec![Some(0.7), Some(0.9)]);

        let logs = dashboard.logs.as_ref().unwrap();
        let seqs: Vec<i64> = logs.lines().iter().map(|line| line.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(logs.lines()[0].log_id, 7);

        dashboard.start_all(Duration::from_secs(60));
        assert!(dashboard.results.scheduler().is_running());
        dashboard.stop_all();
        assert!(!dashboard.features.scheduler().is_running());
    }
}
