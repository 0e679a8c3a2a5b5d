//! Fixed-width time bucketing of anomaly results.
//!
//! `bucketize` turns an irregular, possibly sparse list of classifier
//! results into exactly `N` contiguous buckets ending at the bucket that
//! contains `now`. A bucket is flagged when any result inside it was
//! anomalous. Records that truncate outside the window are ignored.
//!
//! All arithmetic happens on zone-less wall-clock timestamps. The caller
//! decides which wall clock that is through [`WallClock`]; the aggregator
//! itself never reads the system clock.

use crate::models::ResultRecord;
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Widest window accepted from configuration or the command line: one week
/// of minute buckets.
pub const MAX_BUCKET_COUNT: usize = 7 * 24 * 60;

/// Parses a bucket count, rejecting anything above [`MAX_BUCKET_COUNT`].
pub fn parse_bucket_count(raw: &str) -> Result<usize, String> {
    let count: usize = raw
        .trim()
        .parse()
        .map_err(|err| format!("invalid bucket count {raw:?}: {err}"))?;
    if count > MAX_BUCKET_COUNT {
        return Err(format!(
            "bucket count {count} exceeds the maximum of {MAX_BUCKET_COUNT}"
        ));
    }
    Ok(count)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketUnit {
    Minute,
    Hour,
}

impl BucketUnit {
    /// Start of the unit-wide window containing `ts`.
    pub fn truncate(self, ts: NaiveDateTime) -> NaiveDateTime {
        let minute = match self {
            BucketUnit::Minute => ts.minute(),
            BucketUnit::Hour => 0,
        };
        ts.date().and_hms_opt(ts.hour(), minute, 0).unwrap_or(ts)
    }

    fn steps(self, count: i64) -> Option<Duration> {
        match self {
            BucketUnit::Minute => Duration::try_minutes(count),
            BucketUnit::Hour => Duration::try_hours(count),
        }
    }

    pub fn label(self, start: NaiveDateTime) -> String {
        match self {
            BucketUnit::Minute => format!("{:02}분", start.minute()),
            BucketUnit::Hour => format!("{:02}시", start.hour()),
        }
    }
}

impl fmt::Display for BucketUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketUnit::Minute => f.write_str("minute"),
            BucketUnit::Hour => f.write_str("hour"),
        }
    }
}

impl FromStr for BucketUnit {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "minute" | "minutes" | "min" | "m" => Ok(BucketUnit::Minute),
            "hour" | "hours" | "h" => Ok(BucketUnit::Hour),
            other => Err(format!("unknown bucket unit {other:?} (expected minute or hour)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeBucket {
    pub label: String,
    pub value: u8,
    pub start: NaiveDateTime,
}

impl TimeBucket {
    pub fn is_anomalous(&self) -> bool {
        self.value == 1
    }
}

/// Rolls `records` up into `bucket_count` buckets of `unit` width, oldest
/// first, the last one containing `now`.
pub fn bucketize(
    records: &[ResultRecord],
    bucket_count: usize,
    unit: BucketUnit,
    now: NaiveDateTime,
) -> Vec<TimeBucket> {
    let anchor = unit.truncate(now);

    // Keys walk backwards from the newest bucket, then get flipped.
    let mut starts: Vec<NaiveDateTime> = (0..bucket_count)
        .map(|back| {
            i64::try_from(back)
                .ok()
                .and_then(|back| unit.steps(back))
                .and_then(|offset| anchor.checked_sub_signed(offset))
                .unwrap_or(NaiveDateTime::MIN)
        })
        .collect();
    starts.reverse();

    let index: HashMap<NaiveDateTime, usize> = starts
        .iter()
        .enumerate()
        .map(|(position, start)| (*start, position))
        .collect();

    let mut flagged = vec![false; bucket_count];
    for record in records {
        let key = unit.truncate(record.created_at);
        if let Some(position) = index.get(&key) {
            flagged[*position] |= record.result.is_anomalous();
        }
    }

    starts
        .into_iter()
        .zip(flagged)
        .map(|(start, anomalous)| TimeBucket {
            label: unit.label(start),
            value: u8::from(anomalous),
            start,
        })
        .collect()
}

pub fn anomaly_count(buckets: &[TimeBucket]) -> usize {
    buckets.iter().filter(|bucket| bucket.is_anomalous()).count()
}

/// The wall clock bucket boundaries are cut in.
///
/// Result timestamps carry no zone, so "now" has to be expressed in the same
/// local time the classifier host wrote them in. `Local` resolves the host
/// zone on every call, so daylight-saving changes are picked up by
/// long-running watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallClock {
    Local,
    Fixed(FixedOffset),
}

impl WallClock {
    pub fn local() -> Self {
        WallClock::Local
    }

    pub fn fixed(offset: FixedOffset) -> Self {
        WallClock::Fixed(offset)
    }

    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(Self::fixed)
    }

    /// UTC offset in effect at `instant`.
    pub fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset {
        match self {
            WallClock::Local => *instant.with_timezone(&chrono::Local).offset(),
            WallClock::Fixed(offset) => *offset,
        }
    }

    pub fn at(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            WallClock::Local => instant.with_timezone(&chrono::Local).naive_local(),
            WallClock::Fixed(offset) => instant.with_timezone(offset).naive_local(),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Verdict;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 3)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn record(id: i64, verdict: Verdict, created_at: NaiveDateTime) -> ResultRecord {
        ResultRecord {
            id,
            result: verdict,
            created_at,
        }
    }

    fn values(buckets: &[TimeBucket]) -> Vec<u8> {
        buckets.iter().map(|bucket| bucket.value).collect()
    }

    #[test]
    fn empty_input_yields_requested_number_of_zero_buckets() {
        let now = at(14, 5, 30);
        for unit in [BucketUnit::Minute, BucketUnit::Hour] {
            for count in [0usize, 1, 5, 60, 200] {
                let buckets = bucketize(&[], count, unit, now);
                assert_eq!(buckets.len(), count);
                assert!(buckets.iter().all(|bucket| bucket.value == 0));
            }
        }
    }

    #[test]
    fn current_minute_anomaly_lands_in_last_bucket() {
        let now = at(14, 5, 30);
        let records = vec![record(1, Verdict::Anomalous, at(14, 5, 2))];
        let buckets = bucketize(&records, 5, BucketUnit::Minute, now);
        assert_eq!(values(&buckets), vec![0, 0, 0, 0, 1]);
        let labels: Vec<&str> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["01분", "02분", "03분", "04분", "05분"]);
    }

    #[test]
    fn all_normal_results_produce_no_flags() {
        let now = at(14, 5, 30);
        let records: Vec<ResultRecord> = (0..10)
            .map(|i| record(i, Verdict::Normal, at(14, 5 - (i as u32 % 5), 0)))
            .collect();
        let buckets = bucketize(&records, 5, BucketUnit::Minute, now);
        assert_eq!(values(&buckets), vec![0; 5]);
    }

    #[test]
    fn single_anomaly_only_touches_its_bucket() {
        let now = at(14, 5, 30);
        let records = vec![
            record(1, Verdict::Normal, at(14, 1, 10)),
            record(2, Verdict::Anomalous, at(14, 3, 59)),
            record(3, Verdict::Normal, at(14, 3, 1)),
        ];
        let buckets = bucketize(&records, 5, BucketUnit::Minute, now);
        assert_eq!(values(&buckets), vec![0, 0, 1, 0, 0]);
        assert_eq!(anomaly_count(&buckets), 1);
    }

    #[test]
    fn records_outside_window_are_dropped() {
        let now = at(14, 5, 30);
        let records = vec![
            record(1, Verdict::Anomalous, at(14, 0, 59)),
            record(2, Verdict::Anomalous, at(14, 6, 0)),
            record(3, Verdict::Anomalous, at(13, 3, 0)),
        ];
        let buckets = bucketize(&records, 5, BucketUnit::Minute, now);
        assert_eq!(values(&buckets), vec![0; 5]);
    }

    #[test]
    fn hour_buckets_cross_midnight_in_order() {
        let now = NaiveDate::from_ymd_opt(2025, 11, 4)
            .unwrap()
            .and_hms_opt(1, 20, 0)
            .unwrap();
        let records = vec![
            record(1, Verdict::Anomalous, at(23, 59, 59)),
            record(2, Verdict::Normal, now),
        ];
        let buckets = bucketize(&records, 4, BucketUnit::Hour, now);
        let labels: Vec<&str> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["22시", "23시", "00시", "01시"]);
        assert_eq!(values(&buckets), vec![0, 1, 0, 0]);
        assert!(buckets.windows(2).all(|pair| pair[0].start < pair[1].start));
    }

    #[test]
    fn same_hour_on_previous_day_does_not_leak_into_window() {
        let now = at(14, 10, 0);
        let yesterday = NaiveDate::from_ymd_opt(2025, 11, 2)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        let records = vec![record(1, Verdict::Anomalous, yesterday)];
        let buckets = bucketize(&records, 24, BucketUnit::Hour, now);
        assert_eq!(buckets.len(), 24);
        assert_eq!(anomaly_count(&buckets), 0);
    }

    #[test]
    fn bucket_count_is_capped() {
        assert_eq!(parse_bucket_count("60"), Ok(60));
        assert_eq!(parse_bucket_count("0"), Ok(0));
        assert_eq!(parse_bucket_count("10080"), Ok(MAX_BUCKET_COUNT));
        assert!(parse_bucket_count("10081").is_err());
        assert!(parse_bucket_count(&usize::MAX.to_string()).is_err());
        assert!(parse_bucket_count("-1").is_err());
    }

    #[test]
    fn unit_parses_from_config_strings() {
        assert_eq!("minute".parse::<BucketUnit>(), Ok(BucketUnit::Minute));
        assert_eq!(" H ".parse::<BucketUnit>(), Ok(BucketUnit::Hour));
        assert!("day".parse::<BucketUnit>().is_err());
    }

    #[test]
    fn wall_clock_applies_fixed_offset() {
        let clock = WallClock::from_offset_minutes(9 * 60).unwrap();
        let instant = DateTime::parse_from_rfc3339("2025-11-03T05:05:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(clock.at(instant), at(14, 5, 30));
        assert!(WallClock::from_offset_minutes(48 * 60).is_none());
    }

    #[test]
    fn local_wall_clock_follows_zone_offset_per_instant() {
        let clock = WallClock::local();
        for raw in [
            "2026-01-15T12:00:00Z",
            "2026-07-15T12:00:00Z",
            "2026-12-15T12:00:00Z",
        ] {
            let instant = DateTime::parse_from_rfc3339(raw)
                .unwrap()
                .with_timezone(&Utc);
            let expected = instant.with_timezone(&chrono::Local);
            assert_eq!(clock.at(instant), expected.naive_local());
            assert_eq!(clock.offset_at(instant), *expected.offset());
        }
    }
}
